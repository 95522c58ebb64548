//! Per-node, per-frame-in-flight resources.

use std::collections::BTreeMap;

use crate::device::{
    CommandList, Device, FramebufferHandle, RenderTarget, Resolution, Semaphore, WorkTypeFlags,
};
use crate::error::DeviceResult;
use crate::name::Name;

/// Reference to a framebuffer owned by another node, set up in `post_bake`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferRef {
    pub node: Name,
    pub framebuffer: Name,
}

/// An allocated framebuffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framebuffer {
    name: Name,
    target: RenderTarget,
    fixed_resolution: Option<Resolution>,
    handle: FramebufferHandle,
    resolution: Resolution,
}

impl Framebuffer {
    pub fn name(&self) -> Name {
        self.name
    }

    /// Attachment layout the framebuffer was created from.
    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    pub fn handle(&self) -> FramebufferHandle {
        self.handle
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Whether the framebuffer ignores swapchain resizes.
    pub fn is_fixed(&self) -> bool {
        self.fixed_resolution.is_some()
    }
}

#[derive(Debug, Clone)]
struct FramebufferDesc {
    name: Name,
    target: RenderTarget,
    fixed_resolution: Option<Resolution>,
}

/// Everything one node owns in one frame in flight.
///
/// A node creates an empty instance in
/// [`create_node_resources`](super::RenderNode::create_node_resources) and
/// declares its render targets on it. The graph then allocates the
/// framebuffers, the command list and the semaphores connecting the node to its
/// neighbours.
///
/// # Semaphores
///
/// For every edge `(consumer, self)` of the baked graph there is exactly one
/// signal semaphore keyed by `consumer`, and the same semaphore is in the
/// consumer's wait list. The terminal node additionally signals the graph's
/// target semaphore, which presentation waits on.
#[derive(Debug, Default)]
pub struct NodeResources {
    declared: Vec<FramebufferDesc>,
    framebuffers: BTreeMap<Name, Framebuffer>,
    command_list: Option<CommandList>,
    pub(crate) wait_semaphores: Vec<Semaphore>,
    pub(crate) signal_semaphores: BTreeMap<Name, Semaphore>,
    pub(crate) target_semaphore: Option<Semaphore>,
    pub(crate) links: BTreeMap<Name, FramebufferRef>,
    external: bool,
}

impl NodeResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resources of an external node: no framebuffers, no command list.
    ///
    /// An external bake target later gets a completion list, see
    /// [`allocate_completion_list`](Self::allocate_completion_list).
    pub(crate) fn external() -> Self {
        Self {
            external: true,
            ..Self::default()
        }
    }

    /// Declare a framebuffer that follows the swapchain resolution.
    ///
    /// # Panics
    ///
    /// Panics if a framebuffer named `name` was already declared.
    pub fn add_render_target(&mut self, name: Name, target: RenderTarget) -> &mut Self {
        self.declare(name, target, None)
    }

    /// Declare a framebuffer pinned to `resolution` (e.g. a shadow map).
    ///
    /// # Panics
    ///
    /// Panics if a framebuffer named `name` was already declared.
    pub fn add_render_target_with_resolution(
        &mut self,
        name: Name,
        target: RenderTarget,
        resolution: Resolution,
    ) -> &mut Self {
        self.declare(name, target, Some(resolution))
    }

    fn declare(
        &mut self,
        name: Name,
        target: RenderTarget,
        fixed_resolution: Option<Resolution>,
    ) -> &mut Self {
        assert!(
            !self.declared.iter().any(|desc| desc.name == name)
                && !self.framebuffers.contains_key(&name),
            "Framebuffer {name} declared twice"
        );
        self.declared.push(FramebufferDesc {
            name,
            target,
            fixed_resolution,
        });
        self
    }

    pub fn is_external(&self) -> bool {
        self.external
    }

    /// Get a framebuffer by name.
    ///
    /// # Panics
    ///
    /// Panics if the node has no framebuffer named `name`.
    pub fn framebuffer(&self, name: Name) -> &Framebuffer {
        match self.framebuffers.get(&name) {
            Some(framebuffer) => framebuffer,
            None => panic!("Unknown framebuffer {name}"),
        }
    }

    pub fn try_framebuffer(&self, name: Name) -> Option<&Framebuffer> {
        self.framebuffers.get(&name)
    }

    pub fn framebuffers(&self) -> impl Iterator<Item = &Framebuffer> {
        self.framebuffers.values()
    }

    /// The node's command list.
    ///
    /// While the node itself is recording, the list is handed to
    /// `record_commands` directly and is not available here.
    ///
    /// # Panics
    ///
    /// Panics for external sources and while the list is being recorded.
    pub fn command_list(&self) -> &CommandList {
        match &self.command_list {
            Some(list) => list,
            None => panic!("Node resources hold no command list"),
        }
    }

    pub fn try_command_list(&self) -> Option<&CommandList> {
        self.command_list.as_ref()
    }

    /// Semaphores this node waits on, in dependency execution order.
    pub fn wait_semaphores(&self) -> &[Semaphore] {
        &self.wait_semaphores
    }

    /// Semaphore signaled toward `consumer`, if `consumer` depends on this node.
    pub fn signal_semaphore(&self, consumer: Name) -> Option<Semaphore> {
        self.signal_semaphores.get(&consumer).copied()
    }

    /// `(consumer, semaphore)` pairs, ordered by consumer name.
    pub fn signal_semaphores(&self) -> impl Iterator<Item = (Name, Semaphore)> + '_ {
        self.signal_semaphores.iter().map(|(&name, &sem)| (name, sem))
    }

    /// The graph's target semaphore, set on the terminal node only.
    pub fn target_semaphore(&self) -> Option<Semaphore> {
        self.target_semaphore
    }

    /// Link stored under `slot` by `post_bake`.
    pub fn link(&self, slot: Name) -> Option<FramebufferRef> {
        self.links.get(&slot).copied()
    }

    /// Triangles drawn by the last recorded command list.
    pub fn triangle_count(&self) -> u64 {
        self.command_list
            .as_ref()
            .map_or(0, CommandList::triangle_count)
    }

    /// Everything the node signals when its submission completes.
    pub(crate) fn submission_signals(&self) -> Vec<Semaphore> {
        self.signal_semaphores
            .values()
            .copied()
            .chain(self.target_semaphore)
            .collect()
    }

    pub(crate) fn take_command_list(&mut self) -> Option<CommandList> {
        self.command_list.take()
    }

    pub(crate) fn reset_command_list(&mut self) {
        if let Some(list) = self.command_list.as_mut() {
            list.reset();
        }
    }

    pub(crate) fn put_command_list(&mut self, list: CommandList) {
        debug_assert!(self.command_list.is_none());
        self.command_list = Some(list);
    }

    /// Give an external target an empty command list on the least capable
    /// queue. Its submission waits on every producer and carries the frame
    /// fence, so the fence covers all branches feeding the target.
    pub(crate) fn allocate_completion_list(&mut self, device: &dyn Device) -> DeviceResult<()> {
        let queue = device.queue_family(WorkTypeFlags::empty())?;
        self.command_list = Some(device.create_command_list(queue, WorkTypeFlags::empty())?);
        Ok(())
    }

    /// Re-record the completion list of an external target, if any.
    pub(crate) fn record_completion(&mut self) -> DeviceResult<()> {
        let Some(list) = self.command_list.as_mut() else {
            return Ok(());
        };
        list.begin()?;
        list.insert_marker("frame complete")?;
        list.finish()
    }

    /// Allocate declared framebuffers and the command list.
    ///
    /// On failure everything allocated so far is released again.
    pub(crate) fn allocate(
        &mut self,
        device: &dyn Device,
        resolution: Resolution,
        work_types: WorkTypeFlags,
    ) -> DeviceResult<()> {
        if let Err(err) = self.try_allocate(device, resolution, work_types) {
            self.release(device);
            return Err(err);
        }
        Ok(())
    }

    fn try_allocate(
        &mut self,
        device: &dyn Device,
        resolution: Resolution,
        work_types: WorkTypeFlags,
    ) -> DeviceResult<()> {
        if self.external {
            return Ok(());
        }
        for desc in std::mem::take(&mut self.declared) {
            let size = desc.fixed_resolution.unwrap_or(resolution);
            let handle = device.create_framebuffer(&desc.target, size)?;
            self.framebuffers.insert(
                desc.name,
                Framebuffer {
                    name: desc.name,
                    target: desc.target,
                    fixed_resolution: desc.fixed_resolution,
                    handle,
                    resolution: size,
                },
            );
        }
        let queue = device.queue_family(work_types)?;
        self.command_list = Some(device.create_command_list(queue, work_types)?);
        Ok(())
    }

    /// Recreate every framebuffer without a fixed resolution at `resolution`.
    ///
    /// Returns the number of framebuffers recreated.
    pub(crate) fn resize(
        &mut self,
        device: &dyn Device,
        resolution: Resolution,
    ) -> DeviceResult<usize> {
        let mut resized = 0;
        for framebuffer in self.framebuffers.values_mut() {
            if framebuffer.is_fixed() || framebuffer.resolution == resolution {
                continue;
            }
            let handle = device.create_framebuffer(&framebuffer.target, resolution)?;
            device.destroy_framebuffer(framebuffer.handle);
            framebuffer.handle = handle;
            framebuffer.resolution = resolution;
            resized += 1;
        }
        Ok(resized)
    }

    /// Destroy every device object owned by these resources.
    pub(crate) fn release(&mut self, device: &dyn Device) {
        for (_, framebuffer) in std::mem::take(&mut self.framebuffers) {
            device.destroy_framebuffer(framebuffer.handle);
        }
        if let Some(list) = self.command_list.take() {
            device.free_command_list(list);
        }
        for (_, semaphore) in std::mem::take(&mut self.signal_semaphores) {
            device.destroy_semaphore(semaphore);
        }
        if let Some(semaphore) = self.target_semaphore.take() {
            device.destroy_semaphore(semaphore);
        }
        self.wait_semaphores.clear();
        self.links.clear();
        self.declared.clear();
    }
}
