//! Graphics device abstraction consumed by the render graph.
//!
//! The render graph never talks to a graphics API directly. Everything it needs
//! from the GPU goes through the [`Device`] trait: framebuffer, semaphore, fence
//! and command list creation, queue submission and presentation.
//!
//! # Available Devices
//!
//! - [`DummyDevice`]: headless device for tests and tools. It performs no GPU
//!   work but validates semaphore, fence and command list usage.
//!
//! # Ownership
//!
//! All objects handed out by a device are plain handles. The graph that created
//! them destroys them again in `RenderGraph::clean`, which must run before the
//! device itself goes away.

mod command;
mod dummy;
mod sync;
mod types;

pub use command::{Command, CommandList, CommandListState};
pub use dummy::{DeviceStats, DummyDevice, SubmissionEntry, SubmissionRecord};
pub use sync::{Fence, FenceStatus, Semaphore};
pub use types::{
    ClearValue, FramebufferHandle, QueueFamily, RenderTarget, Resolution, TextureFormat,
    WorkTypeFlags,
};

use crate::error::DeviceResult;

/// One entry of a queue submission.
///
/// The GPU waits on every `wait_semaphores` entry before running
/// `command_list`, and signals every `signal_semaphores` entry once it is done.
#[derive(Debug, Clone, Copy)]
pub struct SubmitInfo<'a> {
    pub command_list: &'a CommandList,
    pub wait_semaphores: &'a [Semaphore],
    pub signal_semaphores: &'a [Semaphore],
}

/// Graphics device trait implemented by GPU backends.
pub trait Device: Send + Sync + 'static {
    /// Get the device name.
    fn name(&self) -> &str;

    /// Pick the queue family that runs `work_types`.
    fn queue_family(&self, work_types: WorkTypeFlags) -> DeviceResult<QueueFamily>;

    /// Create a framebuffer for `target` at `resolution`.
    fn create_framebuffer(
        &self,
        target: &RenderTarget,
        resolution: Resolution,
    ) -> DeviceResult<FramebufferHandle>;

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle);

    /// Create a binary semaphore.
    fn create_semaphore(&self) -> DeviceResult<Semaphore>;

    fn destroy_semaphore(&self, semaphore: Semaphore);

    /// Create an unsignaled fence.
    fn create_fence(&self) -> DeviceResult<Fence>;

    fn destroy_fence(&self, fence: Fence);

    /// Block until `fence` is signaled, then reset it.
    fn wait_fence(&self, fence: Fence) -> DeviceResult<()>;

    /// Non-blocking fence query.
    fn fence_status(&self, fence: Fence) -> DeviceResult<FenceStatus>;

    /// Allocate a command list on `queue` for `work_types`.
    fn create_command_list(
        &self,
        queue: QueueFamily,
        work_types: WorkTypeFlags,
    ) -> DeviceResult<CommandList>;

    fn free_command_list(&self, command_list: CommandList);

    /// Submit `submits` to `queue` in order, signaling `fence` after the last one.
    fn submit(
        &self,
        queue: QueueFamily,
        submits: &[SubmitInfo<'_>],
        fence: Option<Fence>,
    ) -> DeviceResult<()>;

    /// Acquire the next swapchain image; `signal` is signaled once it is ready.
    fn acquire_next_image(&self, signal: Semaphore) -> DeviceResult<u32>;

    /// Present swapchain image `framebuffer_index` after `wait` is signaled.
    fn present(&self, wait: Semaphore, framebuffer_index: u32) -> DeviceResult<()>;

    /// Block until the device is idle.
    fn await_all(&self) -> DeviceResult<()>;
}
