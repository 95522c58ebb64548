//! The node interface implemented by rendering passes.

use std::any::Any;

use crate::device::{CommandList, Device, Resolution, Semaphore, WorkTypeFlags};
use crate::error::{DeviceResult, GraphError, GraphResult};
use crate::name::Name;

use super::frame_resources::FrameResources;
use super::node_resources::{FramebufferRef, NodeResources};

/// Context handed to [`RenderNode::create_node_resources`].
#[derive(Clone, Copy)]
pub struct NodeContext<'a> {
    pub device: &'a dyn Device,
    /// Name the node was registered under.
    pub name: Name,
    /// Current swapchain resolution.
    pub resolution: Resolution,
    /// Frame-in-flight index the resources are created for.
    pub frame_index: usize,
}

/// Context handed to [`RenderNode::post_bake`].
///
/// By the time `post_bake` runs, every node of the baked graph has its
/// resources for this frame in flight. The node's own resources are available
/// mutably through [`resources_mut`](Self::resources_mut); every other node is
/// visible read-only through [`frame`](Self::frame).
pub struct PostBakeContext<'a> {
    pub(crate) device: &'a dyn Device,
    pub(crate) name: Name,
    pub(crate) frame: &'a FrameResources,
    pub(crate) resources: &'a mut NodeResources,
}

impl<'a> PostBakeContext<'a> {
    pub fn device(&self) -> &dyn Device {
        self.device
    }

    /// Name of the node being post-baked.
    pub fn name(&self) -> Name {
        self.name
    }

    pub fn frame_index(&self) -> usize {
        self.frame.index()
    }

    /// Resources of the other nodes in the same frame in flight.
    ///
    /// The node's own resources are lent out to this context while
    /// `post_bake` runs, so `frame().node(self.name())` panics here. Use
    /// [`resources`](Self::resources) and [`semaphore`](Self::semaphore)
    /// instead.
    pub fn frame(&self) -> &FrameResources {
        self.frame
    }

    /// Semaphore this node signals toward its dependent `child`.
    pub fn semaphore(&self, child: Name) -> Option<Semaphore> {
        self.resources.signal_semaphore(child)
    }

    pub fn resources(&self) -> &NodeResources {
        &*self.resources
    }

    pub fn resources_mut(&mut self) -> &mut NodeResources {
        self.resources
    }

    /// Make framebuffer `framebuffer` of node `node` available under `slot`.
    ///
    /// The link is stored by name and resolved through
    /// [`FrameResources::linked_framebuffer`] while recording, so it stays
    /// valid when the sibling's framebuffers are recreated on resize.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] if `node` is not part of the baked
    /// graph, and [`GraphError::UnknownResource`] if it has no such framebuffer.
    pub fn link_framebuffer(
        &mut self,
        slot: Name,
        node: Name,
        framebuffer: Name,
    ) -> GraphResult<FramebufferRef> {
        let exists = if node == self.name {
            self.resources.try_framebuffer(framebuffer).is_some()
        } else {
            let sibling = self
                .frame
                .try_node(node)
                .ok_or(GraphError::UnknownNode(node))?;
            sibling.try_framebuffer(framebuffer).is_some()
        };
        if !exists {
            return Err(GraphError::UnknownResource {
                node,
                resource: framebuffer,
            });
        }

        let link = FramebufferRef { node, framebuffer };
        self.resources.links.insert(slot, link);
        Ok(link)
    }
}

/// A unit of GPU work in the render graph.
///
/// The graph calls the methods in this order:
///
/// ```text
/// bake:        create_node_resources (per frame) -> post_bake (per frame)
/// once:        initialize
/// every frame: record_commands
/// on resize:   update_resolution
/// teardown:    clean
/// ```
///
/// # Recording rules
///
/// `record_commands` must not block and must not allocate device memory. All
/// allocation belongs in `create_node_resources`. The node calls
/// [`CommandList::begin`] and [`CommandList::finish`] itself; a list that is not
/// executable afterwards fails the frame.
///
/// Errors returned from any hook are propagated unchanged. Nodes must not
/// retry failed device calls.
///
/// # Example
///
/// ```
/// use std::any::Any;
/// use render_core::device::{CommandList, WorkTypeFlags};
/// use render_core::error::DeviceResult;
/// use render_core::render_graph::{FrameResources, NodeResources, RenderNode};
///
/// struct ClearPass;
///
/// impl RenderNode for ClearPass {
///     fn work_types(&self) -> WorkTypeFlags {
///         WorkTypeFlags::GRAPHICS
///     }
///
///     fn record_commands(
///         &mut self,
///         _frame: &FrameResources,
///         _resources: &NodeResources,
///         cmd: &mut CommandList,
///     ) -> DeviceResult<()> {
///         cmd.begin()?;
///         cmd.insert_marker("clear")?;
///         cmd.finish()
///     }
///
///     fn as_any(&self) -> &dyn Any {
///         self
///     }
///
///     fn as_any_mut(&mut self) -> &mut dyn Any {
///         self
///     }
/// }
/// ```
pub trait RenderNode: Send + 'static {
    /// Queue capabilities the node's commands need.
    fn work_types(&self) -> WorkTypeFlags;

    /// Declare the node's per-frame resources.
    ///
    /// Called once per frame in flight during bake. Render targets declared
    /// here are allocated by the graph right after this returns.
    fn create_node_resources(&mut self, ctx: &NodeContext<'_>) -> DeviceResult<NodeResources> {
        let _ = ctx;
        Ok(NodeResources::new())
    }

    /// Resolve references to sibling resources.
    fn post_bake(&mut self, ctx: &mut PostBakeContext<'_>) -> GraphResult<()> {
        let _ = ctx;
        Ok(())
    }

    /// One-time setup after bake (pipelines, descriptor layouts).
    fn initialize(&mut self, device: &dyn Device) -> DeviceResult<()> {
        let _ = device;
        Ok(())
    }

    /// Record this frame's commands into `cmd`.
    fn record_commands(
        &mut self,
        frame: &FrameResources,
        resources: &NodeResources,
        cmd: &mut CommandList,
    ) -> DeviceResult<()>;

    /// The swapchain resolution changed. Framebuffers are already resized.
    fn update_resolution(&mut self, resolution: Resolution) {
        let _ = resolution;
    }

    /// Release anything the node created outside of its `NodeResources`.
    fn clean(&mut self, device: &dyn Device) {
        let _ = device;
    }

    /// Allow downcasting
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
