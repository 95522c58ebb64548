//! Dummy device for testing and development.
//!
//! This device doesn't perform actual GPU operations but provides a valid
//! implementation of [`Device`] for running the render graph without GPU
//! hardware. It is stricter than a release driver: every submission is checked
//! the way a validation layer would check it.
//!
//! - A wait on a binary semaphore must consume a signal that was submitted
//!   earlier (or produced by [`acquire_next_image`](Device::acquire_next_image)).
//! - A semaphore must not be signaled again while a signal is still pending.
//! - Submitted command lists must be executable and belong to the queue.
//! - A fence must not be submitted while it is signaled or still pending.
//!
//! By default fences are signaled as soon as work is submitted. With
//! [`DummyDevice::with_manual_completion`] they stay pending until
//! [`DummyDevice::complete_pending`] is called, which lets tests observe the CPU
//! blocking on a frame that the "GPU" has not finished yet.

use std::collections::{HashMap, HashSet};

use parking_lot::{Condvar, Mutex};

use crate::error::{DeviceError, DeviceResult};

use super::{
    CommandList, Device, Fence, FenceStatus, FramebufferHandle, QueueFamily, RenderTarget,
    Resolution, Semaphore, SubmitInfo, WorkTypeFlags,
};

/// One entry of a recorded submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionEntry {
    pub command_list: u64,
    pub command_count: usize,
    pub wait_semaphores: Vec<Semaphore>,
    pub signal_semaphores: Vec<Semaphore>,
}

/// A `submit` call as seen by the dummy device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub queue: QueueFamily,
    pub entries: Vec<SubmissionEntry>,
    pub fence: Option<Fence>,
}

/// Object and call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub live_framebuffers: usize,
    pub live_semaphores: usize,
    pub live_fences: usize,
    pub live_command_lists: usize,
    pub framebuffers_created: usize,
    pub semaphores_created: usize,
    pub submissions: usize,
    pub presents: usize,
}

#[derive(Debug, Default)]
struct FenceRecord {
    signaled: bool,
    pending: bool,
}

#[derive(Debug, Default)]
struct DummyState {
    next_id: u64,
    framebuffers: HashMap<u64, Resolution>,
    /// Semaphore id -> signal pending.
    semaphores: HashMap<u64, bool>,
    fences: HashMap<u64, FenceRecord>,
    command_lists: HashSet<u64>,
    submissions: Vec<SubmissionRecord>,
    presents: Vec<(Semaphore, u32)>,
    pending_fences: Vec<u64>,
    next_image: u32,
    framebuffers_created: usize,
    semaphores_created: usize,
    fail_next_submit: Option<DeviceError>,
    fail_next_allocation: Option<DeviceError>,
}

impl DummyState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn take_allocation_failure(&mut self) -> DeviceResult<()> {
        match self.fail_next_allocation.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Dummy GPU device.
#[derive(Debug)]
pub struct DummyDevice {
    queue_families: Vec<WorkTypeFlags>,
    swapchain_images: u32,
    manual_completion: bool,
    state: Mutex<DummyState>,
    fence_signaled: Condvar,
}

impl DummyDevice {
    /// Create a dummy device with one queue family that supports every work type.
    pub fn new() -> Self {
        Self {
            queue_families: vec![WorkTypeFlags::all()],
            swapchain_images: 3,
            manual_completion: false,
            state: Mutex::new(DummyState::default()),
            fence_signaled: Condvar::new(),
        }
    }

    /// Replace the queue families (index order is family order).
    pub fn with_queue_families(mut self, families: Vec<WorkTypeFlags>) -> Self {
        assert!(!families.is_empty(), "a device needs at least one queue family");
        self.queue_families = families;
        self
    }

    /// Keep fences pending until [`complete_pending`](Self::complete_pending).
    pub fn with_manual_completion(mut self) -> Self {
        self.manual_completion = true;
        self
    }

    /// Set the number of swapchain images handed out by `acquire_next_image`.
    pub fn with_swapchain_images(mut self, count: u32) -> Self {
        assert!(count > 0, "swapchain needs at least one image");
        self.swapchain_images = count;
        self
    }

    /// Make the next `submit` or `present` call fail with `err`.
    pub fn fail_next_submit(&self, err: DeviceError) {
        self.state.lock().fail_next_submit = Some(err);
    }

    /// Make the next object creation (framebuffer, semaphore, fence or command
    /// list) fail with `err`.
    pub fn fail_next_allocation(&self, err: DeviceError) {
        self.state.lock().fail_next_allocation = Some(err);
    }

    /// Signal every fence whose submission is still pending.
    ///
    /// Returns the number of fences signaled.
    pub fn complete_pending(&self) -> usize {
        let mut state = self.state.lock();
        let pending = std::mem::take(&mut state.pending_fences);
        for id in &pending {
            if let Some(fence) = state.fences.get_mut(id) {
                fence.pending = false;
                fence.signaled = true;
            }
        }
        drop(state);
        if !pending.is_empty() {
            self.fence_signaled.notify_all();
        }
        pending.len()
    }

    /// Number of fences submitted but not yet signaled.
    pub fn pending_fence_count(&self) -> usize {
        self.state.lock().pending_fences.len()
    }

    pub fn stats(&self) -> DeviceStats {
        let state = self.state.lock();
        DeviceStats {
            live_framebuffers: state.framebuffers.len(),
            live_semaphores: state.semaphores.len(),
            live_fences: state.fences.len(),
            live_command_lists: state.command_lists.len(),
            framebuffers_created: state.framebuffers_created,
            semaphores_created: state.semaphores_created,
            submissions: state.submissions.len(),
            presents: state.presents.len(),
        }
    }

    /// All submissions so far, in submission order.
    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.state.lock().submissions.clone()
    }

    /// All presents so far, as `(wait semaphore, image index)`.
    pub fn presents(&self) -> Vec<(Semaphore, u32)> {
        self.state.lock().presents.clone()
    }

    /// Forget recorded submissions and presents (object tracking is kept).
    pub fn clear_log(&self) {
        let mut state = self.state.lock();
        state.submissions.clear();
        state.presents.clear();
    }

    /// Resolution a live framebuffer was created with.
    pub fn framebuffer_resolution(&self, framebuffer: FramebufferHandle) -> Option<Resolution> {
        self.state.lock().framebuffers.get(&framebuffer.id()).copied()
    }

    /// Whether `semaphore` currently has a pending signal.
    pub fn is_semaphore_pending(&self, semaphore: Semaphore) -> bool {
        self.state
            .lock()
            .semaphores
            .get(&semaphore.id())
            .copied()
            .unwrap_or(false)
    }

    /// Signal `semaphore` from the host, as an external producer would.
    pub fn signal_semaphore(&self, semaphore: Semaphore) -> DeviceResult<()> {
        let mut state = self.state.lock();
        match state.semaphores.get_mut(&semaphore.id()) {
            Some(pending) if *pending => Err(DeviceError::SemaphoreAlreadySignaled(semaphore.id())),
            Some(pending) => {
                *pending = true;
                Ok(())
            }
            None => Err(DeviceError::UnknownObject {
                kind: "semaphore",
                id: semaphore.id(),
            }),
        }
    }

    /// Consume a pending signal from the host.
    pub fn consume_semaphore(&self, semaphore: Semaphore) -> DeviceResult<()> {
        let mut state = self.state.lock();
        match state.semaphores.get_mut(&semaphore.id()) {
            Some(pending) if *pending => {
                *pending = false;
                Ok(())
            }
            Some(_) => Err(DeviceError::SemaphoreNotSignaled(semaphore.id())),
            None => Err(DeviceError::UnknownObject {
                kind: "semaphore",
                id: semaphore.id(),
            }),
        }
    }

    fn family_flags(&self, queue: QueueFamily) -> DeviceResult<WorkTypeFlags> {
        self.queue_families
            .get(queue.index() as usize)
            .copied()
            .ok_or(DeviceError::UnknownObject {
                kind: "queue family",
                id: u64::from(queue.index()),
            })
    }
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for DummyDevice {
    fn name(&self) -> &str {
        "Dummy Device"
    }

    fn queue_family(&self, work_types: WorkTypeFlags) -> DeviceResult<QueueFamily> {
        // Best fit: the supporting family with the fewest extra capabilities.
        self.queue_families
            .iter()
            .enumerate()
            .filter(|(_, flags)| flags.contains(work_types))
            .min_by_key(|(index, flags)| (flags.bits().count_ones(), *index))
            .map(|(index, _)| QueueFamily(index as u32))
            .ok_or(DeviceError::UnsupportedWorkTypes(work_types))
    }

    fn create_framebuffer(
        &self,
        target: &RenderTarget,
        resolution: Resolution,
    ) -> DeviceResult<FramebufferHandle> {
        let mut state = self.state.lock();
        state.take_allocation_failure()?;
        let id = state.next_id();
        state.framebuffers.insert(id, resolution);
        state.framebuffers_created += 1;
        log::trace!(
            "DummyDevice: creating framebuffer {} for {:?} ({})",
            id,
            target.label(),
            resolution
        );
        Ok(FramebufferHandle::new(id))
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        if self
            .state
            .lock()
            .framebuffers
            .remove(&framebuffer.id())
            .is_none()
        {
            log::warn!("DummyDevice: destroying unknown framebuffer {}", framebuffer.id());
        }
    }

    fn create_semaphore(&self) -> DeviceResult<Semaphore> {
        let mut state = self.state.lock();
        state.take_allocation_failure()?;
        let id = state.next_id();
        state.semaphores.insert(id, false);
        state.semaphores_created += 1;
        Ok(Semaphore::new(id))
    }

    fn destroy_semaphore(&self, semaphore: Semaphore) {
        if self
            .state
            .lock()
            .semaphores
            .remove(&semaphore.id())
            .is_none()
        {
            log::warn!("DummyDevice: destroying unknown semaphore {}", semaphore.id());
        }
    }

    fn create_fence(&self) -> DeviceResult<Fence> {
        let mut state = self.state.lock();
        state.take_allocation_failure()?;
        let id = state.next_id();
        state.fences.insert(id, FenceRecord::default());
        Ok(Fence::new(id))
    }

    fn destroy_fence(&self, fence: Fence) {
        let mut state = self.state.lock();
        state.pending_fences.retain(|&id| id != fence.id());
        if state.fences.remove(&fence.id()).is_none() {
            log::warn!("DummyDevice: destroying unknown fence {}", fence.id());
        }
    }

    fn wait_fence(&self, fence: Fence) -> DeviceResult<()> {
        let mut state = self.state.lock();
        loop {
            let record = state.fences.get_mut(&fence.id()).ok_or(DeviceError::UnknownObject {
                kind: "fence",
                id: fence.id(),
            })?;
            if record.signaled {
                record.signaled = false;
                return Ok(());
            }
            if !record.pending {
                return Err(DeviceError::SubmissionFailed(format!(
                    "fence {} waited on without a pending submission",
                    fence.id()
                )));
            }
            self.fence_signaled.wait(&mut state);
        }
    }

    fn fence_status(&self, fence: Fence) -> DeviceResult<FenceStatus> {
        let state = self.state.lock();
        let record = state.fences.get(&fence.id()).ok_or(DeviceError::UnknownObject {
            kind: "fence",
            id: fence.id(),
        })?;
        Ok(if record.signaled {
            FenceStatus::Signaled
        } else {
            FenceStatus::Unsignaled
        })
    }

    fn create_command_list(
        &self,
        queue: QueueFamily,
        work_types: WorkTypeFlags,
    ) -> DeviceResult<CommandList> {
        let family = self.family_flags(queue)?;
        if !family.contains(work_types) {
            return Err(DeviceError::UnsupportedWorkTypes(work_types));
        }
        let mut state = self.state.lock();
        state.take_allocation_failure()?;
        let id = state.next_id();
        state.command_lists.insert(id);
        Ok(CommandList::new(id, queue, work_types))
    }

    fn free_command_list(&self, command_list: CommandList) {
        if !self.state.lock().command_lists.remove(&command_list.id()) {
            log::warn!("DummyDevice: freeing unknown command list {}", command_list.id());
        }
    }

    fn submit(
        &self,
        queue: QueueFamily,
        submits: &[SubmitInfo<'_>],
        fence: Option<Fence>,
    ) -> DeviceResult<()> {
        self.family_flags(queue)?;
        let mut state = self.state.lock();
        if let Some(err) = state.fail_next_submit.take() {
            return Err(err);
        }

        // Validate against a scratch copy so a rejected submission changes nothing.
        let mut semaphores = state.semaphores.clone();
        let mut entries = Vec::with_capacity(submits.len());
        for submit in submits {
            let list = submit.command_list;
            if !state.command_lists.contains(&list.id()) {
                return Err(DeviceError::UnknownObject {
                    kind: "command list",
                    id: list.id(),
                });
            }
            if !list.is_executable() {
                return Err(DeviceError::InvalidCommandListState {
                    id: list.id(),
                    actual: list.state().as_str(),
                    expected: "executable",
                });
            }
            if list.queue() != queue {
                return Err(DeviceError::QueueMismatch {
                    id: list.id(),
                    list: list.queue(),
                    queue,
                });
            }
            for wait in submit.wait_semaphores {
                match semaphores.get_mut(&wait.id()) {
                    Some(pending) if *pending => *pending = false,
                    Some(_) => return Err(DeviceError::SemaphoreNotSignaled(wait.id())),
                    None => {
                        return Err(DeviceError::UnknownObject {
                            kind: "semaphore",
                            id: wait.id(),
                        })
                    }
                }
            }
            for signal in submit.signal_semaphores {
                match semaphores.get_mut(&signal.id()) {
                    Some(pending) if *pending => {
                        return Err(DeviceError::SemaphoreAlreadySignaled(signal.id()))
                    }
                    Some(pending) => *pending = true,
                    None => {
                        return Err(DeviceError::UnknownObject {
                            kind: "semaphore",
                            id: signal.id(),
                        })
                    }
                }
            }
            entries.push(SubmissionEntry {
                command_list: list.id(),
                command_count: list.commands().len(),
                wait_semaphores: submit.wait_semaphores.to_vec(),
                signal_semaphores: submit.signal_semaphores.to_vec(),
            });
        }

        if let Some(fence) = fence {
            let record = state.fences.get(&fence.id()).ok_or(DeviceError::UnknownObject {
                kind: "fence",
                id: fence.id(),
            })?;
            if record.signaled || record.pending {
                return Err(DeviceError::SubmissionFailed(format!(
                    "fence {} is still in use",
                    fence.id()
                )));
            }
        }

        state.semaphores = semaphores;
        log::trace!(
            "DummyDevice: submit {} command lists to queue {}",
            entries.len(),
            queue.index()
        );
        state.submissions.push(SubmissionRecord {
            queue,
            entries,
            fence,
        });

        if let Some(fence) = fence {
            if self.manual_completion {
                if let Some(record) = state.fences.get_mut(&fence.id()) {
                    record.pending = true;
                }
                state.pending_fences.push(fence.id());
            } else {
                if let Some(record) = state.fences.get_mut(&fence.id()) {
                    record.signaled = true;
                }
                drop(state);
                self.fence_signaled.notify_all();
            }
        }
        Ok(())
    }

    fn acquire_next_image(&self, signal: Semaphore) -> DeviceResult<u32> {
        let mut state = self.state.lock();
        match state.semaphores.get_mut(&signal.id()) {
            Some(pending) if *pending => {
                return Err(DeviceError::SemaphoreAlreadySignaled(signal.id()))
            }
            Some(pending) => *pending = true,
            None => {
                return Err(DeviceError::UnknownObject {
                    kind: "semaphore",
                    id: signal.id(),
                })
            }
        }
        let index = state.next_image;
        state.next_image = (index + 1) % self.swapchain_images;
        Ok(index)
    }

    fn present(&self, wait: Semaphore, framebuffer_index: u32) -> DeviceResult<()> {
        let mut state = self.state.lock();
        if let Some(err) = state.fail_next_submit.take() {
            return Err(err);
        }
        if framebuffer_index >= self.swapchain_images {
            return Err(DeviceError::PresentFailed(format!(
                "swapchain image {framebuffer_index} out of range"
            )));
        }
        match state.semaphores.get_mut(&wait.id()) {
            Some(pending) if *pending => *pending = false,
            Some(_) => return Err(DeviceError::SemaphoreNotSignaled(wait.id())),
            None => {
                return Err(DeviceError::UnknownObject {
                    kind: "semaphore",
                    id: wait.id(),
                })
            }
        }
        state.presents.push((wait, framebuffer_index));
        Ok(())
    }

    fn await_all(&self) -> DeviceResult<()> {
        // Device idle: everything submitted has finished.
        self.complete_pending();
        Ok(())
    }
}
