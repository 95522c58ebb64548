//! Resources of one frame in flight.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::device::{Device, Fence, Semaphore};
use crate::error::DeviceResult;
use crate::name::Name;

use super::node_resources::{Framebuffer, NodeResources};

/// Lifecycle of a [`FrameResources`] instance.
///
/// ```text
/// Empty -> Baked -> Recording -> Recorded -> Submitted -> Awaited -> Recording -> ...
///
/// Recording | Recorded -> Failed -> Awaited   (await_frame)
/// any                  -> Released            (clean)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameState {
    /// Nothing baked yet.
    Empty,
    /// Resources allocated, nothing recorded yet.
    Baked,
    /// `record_command_lists` is running.
    Recording,
    /// Every command list is executable.
    Recorded,
    /// Work submitted; the fence has not been waited on.
    Submitted,
    /// The GPU finished the frame; resources may be reused.
    Awaited,
    /// Recording or submission failed; the frame is abandoned.
    Failed,
    /// Released by `clean`.
    Released,
}

impl FrameState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Baked => "baked",
            Self::Recording => "recording",
            Self::Recorded => "recorded",
            Self::Submitted => "submitted",
            Self::Awaited => "awaited",
            Self::Failed => "failed",
            Self::Released => "released",
        }
    }
}

impl fmt::Display for FrameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One complete set of node resources plus frame-scoped flags and the frame's
/// completion fence.
///
/// The graph owns exactly two instances and alternates between them, so the CPU
/// records into one while the GPU may still be executing the other.
#[derive(Debug)]
pub struct FrameResources {
    index: usize,
    pub(crate) nodes: BTreeMap<Name, NodeResources>,
    flags: BTreeSet<Name>,
    fence: Fence,
    /// Set when the last submission of the frame carried the fence.
    pub(crate) fence_pending: bool,
    pub(crate) target_semaphore: Option<Semaphore>,
    pub(crate) state: FrameState,
}

impl FrameResources {
    pub(crate) fn new(index: usize, fence: Fence) -> Self {
        Self {
            index,
            nodes: BTreeMap::new(),
            flags: BTreeSet::new(),
            fence,
            fence_pending: false,
            target_semaphore: None,
            state: FrameState::Empty,
        }
    }

    /// Frame-in-flight index of this instance (0 or 1).
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn fence(&self) -> Fence {
        self.fence
    }

    /// The semaphore presentation waits on.
    pub fn target_semaphore(&self) -> Option<Semaphore> {
        self.target_semaphore
    }

    /// Get a node's resources.
    ///
    /// # Panics
    ///
    /// Panics if `node` is not part of the baked graph.
    pub fn node(&self, node: Name) -> &NodeResources {
        match self.nodes.get(&node) {
            Some(resources) => resources,
            None => panic!("Unknown render node {node}"),
        }
    }

    pub fn try_node(&self, node: Name) -> Option<&NodeResources> {
        self.nodes.get(&node)
    }

    pub(crate) fn node_mut(&mut self, node: Name) -> &mut NodeResources {
        match self.nodes.get_mut(&node) {
            Some(resources) => resources,
            None => panic!("Unknown render node {node}"),
        }
    }

    /// Names of every node with resources in this frame.
    pub fn node_names(&self) -> impl Iterator<Item = Name> + '_ {
        self.nodes.keys().copied()
    }

    /// Framebuffer `framebuffer` of node `node`.
    ///
    /// # Panics
    ///
    /// Panics if the node or the framebuffer does not exist.
    pub fn framebuffer(&self, node: Name, framebuffer: Name) -> &Framebuffer {
        self.node(node).framebuffer(framebuffer)
    }

    /// Resolve a link set up with
    /// [`PostBakeContext::link_framebuffer`](super::PostBakeContext::link_framebuffer).
    ///
    /// # Panics
    ///
    /// Panics if `resources` has no link named `slot`.
    pub fn linked_framebuffer(&self, resources: &NodeResources, slot: Name) -> &Framebuffer {
        match resources.link(slot) {
            Some(link) => self.framebuffer(link.node, link.framebuffer),
            None => panic!("No framebuffer linked as {slot}"),
        }
    }

    /// Semaphore `parent` signals toward its dependent `child`.
    ///
    /// # Panics
    ///
    /// Panics if there is no baked edge from `child` to `parent`.
    pub fn semaphore(&self, parent: Name, child: Name) -> Semaphore {
        match self.try_semaphore(parent, child) {
            Some(semaphore) => semaphore,
            None => panic!("No semaphore from {parent} to {child}"),
        }
    }

    pub fn try_semaphore(&self, parent: Name, child: Name) -> Option<Semaphore> {
        self.nodes.get(&parent)?.signal_semaphore(child)
    }

    pub fn has_flag(&self, flag: Name) -> bool {
        self.flags.contains(&flag)
    }

    pub fn set_flag(&mut self, flag: Name, enabled: bool) {
        if enabled {
            self.flags.insert(flag);
        } else {
            self.flags.remove(&flag);
        }
    }

    pub fn flags(&self) -> impl Iterator<Item = Name> + '_ {
        self.flags.iter().copied()
    }

    /// Number of semaphores owned by this frame.
    pub fn semaphore_count(&self) -> usize {
        self.nodes
            .values()
            .map(|resources| {
                resources.signal_semaphores.len() + usize::from(resources.target_semaphore.is_some())
            })
            .sum()
    }

    /// Replace every semaphore of the frame with a fresh one.
    ///
    /// Must only run while the device is idle. Used after a failed frame,
    /// since a partial submission can leave signals pending.
    pub(crate) fn recreate_semaphores(&mut self, device: &dyn Device) -> DeviceResult<()> {
        let mut replaced: HashMap<Semaphore, Semaphore> = HashMap::new();
        let mut result = Ok(());

        'nodes: for resources in self.nodes.values_mut() {
            let owned = resources
                .signal_semaphores
                .values_mut()
                .chain(resources.target_semaphore.as_mut());
            for semaphore in owned {
                match device.create_semaphore() {
                    Ok(fresh) => {
                        device.destroy_semaphore(*semaphore);
                        replaced.insert(*semaphore, fresh);
                        *semaphore = fresh;
                    }
                    Err(err) => {
                        result = Err(err);
                        break 'nodes;
                    }
                }
            }
        }

        // Keep waits consistent with whatever was replaced, even on failure.
        for resources in self.nodes.values_mut() {
            for wait in &mut resources.wait_semaphores {
                if let Some(&fresh) = replaced.get(wait) {
                    *wait = fresh;
                }
            }
        }
        if let Some(target) = self.target_semaphore.as_mut() {
            if let Some(&fresh) = replaced.get(target) {
                *target = fresh;
            }
        }
        result
    }

    /// Release every node's resources. The fence is kept.
    pub(crate) fn release_nodes(&mut self, device: &dyn Device) {
        for (_, mut resources) in std::mem::take(&mut self.nodes) {
            resources.release(device);
        }
        self.target_semaphore = None;
        self.fence_pending = false;
    }
}
