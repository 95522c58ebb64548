//! Error types for the device layer and the render graph.

use thiserror::Error;

use crate::device::{QueueFamily, WorkTypeFlags};
use crate::name::Name;

/// Errors reported by a [`Device`](crate::device::Device).
///
/// Device errors are fatal for the current frame. The graph never retries a
/// failed device call; it surfaces the error to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("out of device memory")]
    OutOfMemory,
    #[error("device lost")]
    DeviceLost,
    #[error("no queue family supports work types {0:?}")]
    UnsupportedWorkTypes(WorkTypeFlags),
    #[error("command list {id} is {actual}, expected {expected}")]
    InvalidCommandListState {
        id: u64,
        actual: &'static str,
        expected: &'static str,
    },
    #[error("command list {id} belongs to queue family {list:?}, submitted to {queue:?}")]
    QueueMismatch {
        id: u64,
        list: QueueFamily,
        queue: QueueFamily,
    },
    #[error("semaphore {0} is waited on without a pending signal")]
    SemaphoreNotSignaled(u64),
    #[error("semaphore {0} is signaled while a previous signal is still pending")]
    SemaphoreAlreadySignaled(u64),
    #[error("unknown {kind} {id}")]
    UnknownObject { kind: &'static str, id: u64 },
    #[error("submission failed: {0}")]
    SubmissionFailed(String),
    #[error("present failed: {0}")]
    PresentFailed(String),
}

/// Result alias for device calls.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors reported by a [`RenderGraph`](crate::render_graph::RenderGraph).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("target node {0} is not registered")]
    UnknownTarget(Name),
    #[error("dependency references unregistered node {0}")]
    UnknownNode(Name),
    #[error("render graph contains a cyclic dependency through {nodes:?}")]
    CyclicDependency { nodes: Vec<Name> },
    #[error("external node {0} has dependencies but is not the bake target")]
    ExternalNodeHasDependencies(Name),
    #[error("render graph has not been baked")]
    NotBaked,
    #[error("frame {frame} is still in flight and must be awaited before recording")]
    FrameNotAwaited { frame: usize },
    #[error("frame {frame} has no recorded command lists to execute")]
    NotRecorded { frame: usize },
    #[error("node {0} did not finish its command list")]
    CommandListNotFinished(Name),
    #[error("node {node} has no framebuffer {resource}")]
    UnknownResource { node: Name, resource: Name },
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Result alias for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;
