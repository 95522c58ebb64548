//! # Render Core
//!
//! Render graph scheduler: turns named rendering nodes and their dependencies
//! into correctly ordered, semaphore-synchronized GPU submissions,
//! double-buffered across two frames in flight.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`RenderGraph`] - Node registry, topological bake and the frame protocol
//! - [`RenderNode`] - Trait implemented by every rendering pass
//! - [`Device`] - The graphics device interface the graph consumes
//! - [`DummyDevice`] - Headless device for tests and tools
//! - [`Name`] - Typed hashed identifiers for nodes, framebuffers and flags
//!
//! ## Example
//!
//! ```ignore
//! let mut graph = RenderGraph::new(device.clone(), GraphConfig::default())?;
//! graph.emplace_node(GEOMETRY, GeometryNode::new());
//! graph.emplace_node(SHADING, ShadingNode::new());
//! graph.add_dependency(SHADING, GEOMETRY);
//! graph.bake(SHADING)?;
//! graph.initialize_nodes()?;
//!
//! loop {
//!     graph.await_frame()?;
//!     graph.record_command_lists()?;
//!     graph.execute()?;
//!     graph.present(image_index)?;
//!     graph.swap_frames();
//! }
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod name;
pub mod render_graph;

pub use config::{GraphConfig, SubmitPolicy};
pub use device::{Device, DummyDevice};
pub use error::{DeviceError, DeviceResult, GraphError, GraphResult};
pub use name::{make_name, Name, ResourceType};
pub use render_graph::{FrameResources, FrameState, NodeResources, RenderGraph, RenderNode};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library version. Call once at startup after installing a logger.
pub fn init() {
    log::info!("Render Core v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
