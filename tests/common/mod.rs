//! Common nodes and helpers for render graph integration tests.
//!
//! Every test runs against [`DummyDevice`], which validates semaphore, fence
//! and command list usage, so a mis-synchronized frame fails the test.

#![allow(dead_code)]

use std::any::Any;
use std::sync::Arc;

use render_core::config::{GraphConfig, SubmitPolicy};
use render_core::device::{
    ClearValue, CommandList, Device, DummyDevice, FramebufferHandle, RenderTarget, Resolution,
    TextureFormat, WorkTypeFlags,
};
use render_core::error::{DeviceError, DeviceResult, GraphResult};
use render_core::name::Name;
use render_core::render_graph::{
    FrameResources, NodeContext, NodeResources, PostBakeContext, RenderGraph, RenderNode,
};

pub const COLOR: Name = Name::framebuffer("color");
pub const SHADOW_MAP: Name = Name::framebuffer("shadow_map");
pub const SCENE_INPUT: Name = Name::framebuffer("scene_input");

pub const SHADOW_RESOLUTION: Resolution = Resolution::new(2048, 2048);

/// Install a test logger once.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn dummy_device() -> Arc<DummyDevice> {
    init_logging();
    Arc::new(DummyDevice::new())
}

/// Graph on `device` with `policy` at 1280x720.
pub fn new_graph(device: &Arc<DummyDevice>, policy: SubmitPolicy) -> RenderGraph {
    let config = GraphConfig::default()
        .with_label("test")
        .with_submit_policy(policy);
    RenderGraph::new(device.clone(), config).expect("Failed to create render graph")
}

/// One iteration of the frame loop.
///
/// Signals every semaphore the `externals` feed into the graph, records,
/// executes, presents and swaps.
pub fn run_frame(graph: &mut RenderGraph, device: &DummyDevice, externals: &[Name]) -> GraphResult<()> {
    graph.await_frame()?;
    for &external in externals {
        for semaphore in graph.external_signal_semaphores(external) {
            device.signal_semaphore(semaphore)?;
        }
    }
    graph.record_command_lists()?;
    graph.execute()?;
    if graph.target_semaphore().is_some() {
        graph.present(0)?;
    }
    graph.swap_frames();
    Ok(())
}

// ============================================================================
// Nodes
// ============================================================================

/// Draws `triangles` triangles into its own color framebuffer, optionally
/// into a fixed-size shadow map as well.
pub struct DrawNode {
    work_types: WorkTypeFlags,
    triangles: u32,
    shadow_map: bool,
    pub frames_recorded: usize,
    pub initialized: usize,
    pub resolutions: Vec<Resolution>,
    pub cleaned: bool,
}

impl DrawNode {
    pub fn new(triangles: u32) -> Self {
        Self {
            work_types: WorkTypeFlags::GRAPHICS,
            triangles,
            shadow_map: false,
            frames_recorded: 0,
            initialized: 0,
            resolutions: Vec::new(),
            cleaned: false,
        }
    }

    /// Also own a fixed-resolution shadow map.
    pub fn with_shadow_map(mut self) -> Self {
        self.shadow_map = true;
        self
    }

    /// Run on a compute queue and dispatch instead of drawing.
    pub fn compute() -> Self {
        Self {
            work_types: WorkTypeFlags::COMPUTE,
            ..Self::new(0)
        }
    }
}

impl RenderNode for DrawNode {
    fn work_types(&self) -> WorkTypeFlags {
        self.work_types
    }

    fn create_node_resources(&mut self, _ctx: &NodeContext<'_>) -> DeviceResult<NodeResources> {
        let mut resources = NodeResources::new();
        if self.work_types.contains(WorkTypeFlags::GRAPHICS) {
            resources.add_render_target(
                COLOR,
                RenderTarget::new("color")
                    .with_color(TextureFormat::Rgba8Unorm)
                    .with_depth(TextureFormat::Depth32Float),
            );
        }
        if self.shadow_map {
            resources.add_render_target_with_resolution(
                SHADOW_MAP,
                RenderTarget::new("shadow_map").with_depth(TextureFormat::Depth32Float),
                SHADOW_RESOLUTION,
            );
        }
        Ok(resources)
    }

    fn initialize(&mut self, _device: &dyn Device) -> DeviceResult<()> {
        self.initialized += 1;
        Ok(())
    }

    fn record_commands(
        &mut self,
        _frame: &FrameResources,
        resources: &NodeResources,
        cmd: &mut CommandList,
    ) -> DeviceResult<()> {
        cmd.begin()?;
        if self.work_types.contains(WorkTypeFlags::COMPUTE) {
            cmd.dispatch(16, 16, 1)?;
        } else {
            if let Some(shadow) = resources.try_framebuffer(SHADOW_MAP) {
                cmd.begin_render_pass(shadow.handle(), &[ClearValue::Depth(1.0)])?;
                cmd.end_render_pass()?;
            }
            cmd.begin_render_pass(
                resources.framebuffer(COLOR).handle(),
                &[ClearValue::Color([0.0, 0.0, 0.0, 1.0]), ClearValue::Depth(1.0)],
            )?;
            cmd.draw_primitives(self.triangles * 3, 1)?;
            cmd.end_render_pass()?;
        }
        cmd.finish()?;
        self.frames_recorded += 1;
        Ok(())
    }

    fn update_resolution(&mut self, resolution: Resolution) {
        self.resolutions.push(resolution);
    }

    fn clean(&mut self, _device: &dyn Device) {
        self.cleaned = true;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Records whether `flag` was set, once per recorded frame.
pub struct FlagProbe {
    flag: Name,
    pub observed: Vec<(usize, bool)>,
}

impl FlagProbe {
    pub fn new(flag: Name) -> Self {
        Self {
            flag,
            observed: Vec::new(),
        }
    }
}

impl RenderNode for FlagProbe {
    fn work_types(&self) -> WorkTypeFlags {
        WorkTypeFlags::GRAPHICS
    }

    fn record_commands(
        &mut self,
        frame: &FrameResources,
        _resources: &NodeResources,
        cmd: &mut CommandList,
    ) -> DeviceResult<()> {
        let enabled = frame.has_flag(self.flag);
        self.observed.push((frame.index(), enabled));
        cmd.begin()?;
        if enabled {
            cmd.insert_marker("flag enabled")?;
        }
        cmd.finish()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Samples a sibling's framebuffer, linked in `post_bake`.
pub struct PostProcessNode {
    source: Name,
    source_framebuffer: Name,
    pub post_baked: Vec<usize>,
    pub sampled: Vec<FramebufferHandle>,
}

impl PostProcessNode {
    pub fn new(source: Name, source_framebuffer: Name) -> Self {
        Self {
            source,
            source_framebuffer,
            post_baked: Vec::new(),
            sampled: Vec::new(),
        }
    }
}

impl RenderNode for PostProcessNode {
    fn work_types(&self) -> WorkTypeFlags {
        WorkTypeFlags::GRAPHICS
    }

    fn create_node_resources(&mut self, _ctx: &NodeContext<'_>) -> DeviceResult<NodeResources> {
        let mut resources = NodeResources::new();
        resources.add_render_target(
            COLOR,
            RenderTarget::new("post").with_color(TextureFormat::Bgra8Unorm),
        );
        Ok(resources)
    }

    fn post_bake(&mut self, ctx: &mut PostBakeContext<'_>) -> GraphResult<()> {
        ctx.link_framebuffer(SCENE_INPUT, self.source, self.source_framebuffer)?;
        self.post_baked.push(ctx.frame_index());
        Ok(())
    }

    fn record_commands(
        &mut self,
        frame: &FrameResources,
        resources: &NodeResources,
        cmd: &mut CommandList,
    ) -> DeviceResult<()> {
        let input = frame.linked_framebuffer(resources, SCENE_INPUT);
        self.sampled.push(input.handle());

        cmd.begin()?;
        cmd.begin_render_pass(resources.framebuffer(COLOR).handle(), &[])?;
        cmd.draw_primitives(3, 1)?;
        cmd.end_render_pass()?;
        cmd.finish()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Misbehaving node for failure tests.
pub enum FaultyNode {
    /// Returns a device error from `record_commands`.
    Fails,
    /// Never calls `finish`.
    LeavesListOpen,
}

impl RenderNode for FaultyNode {
    fn work_types(&self) -> WorkTypeFlags {
        WorkTypeFlags::GRAPHICS
    }

    fn record_commands(
        &mut self,
        _frame: &FrameResources,
        _resources: &NodeResources,
        cmd: &mut CommandList,
    ) -> DeviceResult<()> {
        cmd.begin()?;
        match self {
            FaultyNode::Fails => Err(DeviceError::DeviceLost),
            FaultyNode::LeavesListOpen => Ok(()),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
