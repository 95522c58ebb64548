//! GPU synchronization handles.
//!
//! Both primitives are owned by the [`Device`](super::Device); the types here
//! are plain `Copy` handles that the graph stores and passes back to the
//! device. Whoever created a handle is responsible for destroying it.

/// Binary GPU semaphore for ordering submissions on the GPU.
///
/// - One submission signals the semaphore when it completes
/// - Another submission waits on it before starting
///
/// Unlike fences, semaphores cannot be waited on from the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Semaphore {
    id: u64,
}

impl Semaphore {
    /// Wrap a device-assigned identifier.
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    /// Device-unique identifier.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Status of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence has not yet been signaled.
    Unsignaled,
    /// The fence has been signaled (GPU work complete).
    Signaled,
}

/// CPU-waitable primitive signaled when a submission completes.
///
/// The graph attaches one fence to the last submission of each frame and
/// waits on it before reusing that frame's resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fence {
    id: u64,
}

impl Fence {
    /// Wrap a device-assigned identifier.
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    /// Device-unique identifier.
    pub fn id(&self) -> u64 {
        self.id
    }
}
