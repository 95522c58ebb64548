//! Render Graph System
//!
//! Turns a set of named nodes and their dependencies into an ordered,
//! semaphore-synchronized sequence of GPU submissions, double-buffered across
//! two frames in flight.
//!
//! # Module Contents
//!
//! - [`RenderGraph`] - node registry, bake and the per-frame protocol
//! - [`RenderNode`] - the interface every pass implements
//! - [`FrameResources`] - everything one frame in flight owns
//! - [`NodeResources`] - one node's framebuffers, command list and semaphores
//! - [`build_batches`] - mapping of execution order to submissions
//!
//! # Synchronization Model
//!
//! | Level | Primitive | Purpose |
//! |-------|-----------|---------|
//! | Node → Node | Semaphores | GPU ordering, one per baked edge |
//! | Graph → Present | Target semaphore | Presentation waits on the terminal node |
//! | Frame → Frame | Fences | CPU backpressure, at most two frames in flight |

mod executor;
mod frame_resources;
mod graph;
mod node;
mod node_resources;

pub use executor::{build_batches, SubmitBatch};
pub use frame_resources::{FrameResources, FrameState};
pub use graph::{RenderGraph, FRAMES_IN_FLIGHT};
pub use node::{NodeContext, PostBakeContext, RenderNode};
pub use node_resources::{Framebuffer, FramebufferRef, NodeResources};
