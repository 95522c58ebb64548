//! Headless frame loop on the dummy device.
//!
//! Builds a small deferred pipeline, bakes it and runs the full frame protocol
//! (acquire, record, execute, present, swap) for a number of frames. Run with
//! `RUST_LOG=trace` to see every submission.
//!
//! ```text
//! cargo run --example frame_loop -- --frames 120 --async-compute --resize-at 60
//! ```

use std::any::Any;
use std::sync::Arc;

use clap::Parser;
use render_core::config::GraphConfig;
use render_core::device::{
    ClearValue, CommandList, Device, DummyDevice, RenderTarget, Resolution, TextureFormat,
    WorkTypeFlags,
};
use render_core::error::{DeviceResult, GraphResult};
use render_core::name::{make_name, Name};
use render_core::render_graph::{
    FrameResources, NodeContext, NodeResources, PostBakeContext, RenderGraph, RenderNode,
};

const SWAPCHAIN: Name = make_name("swapchain.node");
const SHADOW_MAP: Name = make_name("shadow_map.node");
const GEOMETRY: Name = make_name("geometry.node");
const AMBIENT_OCCLUSION: Name = make_name("ambient_occlusion.node");
const SHADING: Name = make_name("shading.node");
const POST_PROCESSING: Name = make_name("post_processing.node");
const UI: Name = make_name("ui.node");

const DEPTH: Name = make_name("depth.fb");
const GBUFFER: Name = make_name("gbuffer.fb");
const HDR: Name = make_name("hdr.fb");
const LDR: Name = make_name("ldr.fb");
const SHADING_INPUT: Name = make_name("shading_input.fb");

const FXAA: Name = make_name("fxaa.flag");
const HIDE_UI: Name = make_name("hide_ui.flag");

/// Render graph frame loop demo.
#[derive(Parser, Debug)]
#[command(name = "frame_loop", about = "Run the render graph frame loop headless")]
struct Args {
    /// Number of frames to render.
    #[arg(long, default_value = "16")]
    frames: u64,

    /// Swapchain width in pixels.
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Swapchain height in pixels.
    #[arg(long, default_value = "720")]
    height: u32,

    /// Enable FXAA in post-processing.
    #[arg(long)]
    fxaa: bool,

    /// Skip UI rendering.
    #[arg(long)]
    hide_ui: bool,

    /// Run ambient occlusion on a dedicated compute queue family.
    #[arg(long)]
    async_compute: bool,

    /// Double the resolution after this many frames.
    #[arg(long)]
    resize_at: Option<u64>,
}

/// Generic draw pass: one framebuffer, a fixed triangle budget.
struct DrawPass {
    label: &'static str,
    framebuffer: Name,
    target: RenderTarget,
    fixed: Option<Resolution>,
    triangles: u32,
}

impl RenderNode for DrawPass {
    fn work_types(&self) -> WorkTypeFlags {
        WorkTypeFlags::GRAPHICS
    }

    fn create_node_resources(&mut self, _ctx: &NodeContext<'_>) -> DeviceResult<NodeResources> {
        let mut resources = NodeResources::new();
        match self.fixed {
            Some(resolution) => resources.add_render_target_with_resolution(
                self.framebuffer,
                self.target.clone(),
                resolution,
            ),
            None => resources.add_render_target(self.framebuffer, self.target.clone()),
        };
        Ok(resources)
    }

    fn record_commands(
        &mut self,
        _frame: &FrameResources,
        resources: &NodeResources,
        cmd: &mut CommandList,
    ) -> DeviceResult<()> {
        cmd.begin()?;
        cmd.insert_marker(self.label)?;
        cmd.begin_render_pass(
            resources.framebuffer(self.framebuffer).handle(),
            &[ClearValue::Color([0.0, 0.0, 0.0, 1.0]), ClearValue::Depth(1.0)],
        )?;
        cmd.draw_indexed_primitives(self.triangles * 3, 1)?;
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

struct AmbientOcclusionPass;

impl RenderNode for AmbientOcclusionPass {
    fn work_types(&self) -> WorkTypeFlags {
        WorkTypeFlags::COMPUTE
    }

    fn record_commands(
        &mut self,
        _frame: &FrameResources,
        _resources: &NodeResources,
        cmd: &mut CommandList,
    ) -> DeviceResult<()> {
        cmd.begin()?;
        cmd.dispatch(80, 45, 1)?;
        cmd.finish()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Tonemaps the shading output, optionally with FXAA.
struct PostProcessingPass;

impl RenderNode for PostProcessingPass {
    fn work_types(&self) -> WorkTypeFlags {
        WorkTypeFlags::GRAPHICS
    }

    fn create_node_resources(&mut self, _ctx: &NodeContext<'_>) -> DeviceResult<NodeResources> {
        let mut resources = NodeResources::new();
        resources.add_render_target(
            LDR,
            RenderTarget::new("ldr").with_color(TextureFormat::Bgra8Unorm),
        );
        Ok(resources)
    }

    fn post_bake(&mut self, ctx: &mut PostBakeContext<'_>) -> GraphResult<()> {
        ctx.link_framebuffer(SHADING_INPUT, SHADING, HDR)?;
        Ok(())
    }

    fn record_commands(
        &mut self,
        frame: &FrameResources,
        resources: &NodeResources,
        cmd: &mut CommandList,
    ) -> DeviceResult<()> {
        let input = frame.linked_framebuffer(resources, SHADING_INPUT);
        cmd.begin()?;
        cmd.insert_marker(format!("tonemap {}", input.resolution()))?;
        cmd.begin_render_pass(resources.framebuffer(LDR).handle(), &[])?;
        cmd.draw_primitives(3, 1)?;
        if frame.has_flag(FXAA) {
            cmd.insert_marker("fxaa")?;
            cmd.draw_primitives(3, 1)?;
        }
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

struct UiPass {
    widgets: u32,
}

impl RenderNode for UiPass {
    fn work_types(&self) -> WorkTypeFlags {
        WorkTypeFlags::GRAPHICS | WorkTypeFlags::PRESENTATION
    }

    fn post_bake(&mut self, ctx: &mut PostBakeContext<'_>) -> GraphResult<()> {
        ctx.link_framebuffer(LDR, POST_PROCESSING, LDR)?;
        Ok(())
    }

    fn record_commands(
        &mut self,
        frame: &FrameResources,
        resources: &NodeResources,
        cmd: &mut CommandList,
    ) -> DeviceResult<()> {
        cmd.begin()?;
        if !frame.has_flag(HIDE_UI) {
            let target = frame.linked_framebuffer(resources, LDR);
            cmd.begin_render_pass(target.handle(), &[])?;
            cmd.draw_primitives(6, self.widgets)?;
            cmd.end_render_pass()?;
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

fn build_graph(device: Arc<DummyDevice>, resolution: Resolution) -> GraphResult<RenderGraph> {
    let config = GraphConfig::default()
        .with_label("frame_loop")
        .with_resolution(resolution);
    let mut graph = RenderGraph::new(device, config)?;

    graph.add_external_node(SWAPCHAIN);
    graph.emplace_node(
        SHADOW_MAP,
        DrawPass {
            label: "shadow map",
            framebuffer: DEPTH,
            target: RenderTarget::new("shadow_map").with_depth(TextureFormat::Depth32Float),
            fixed: Some(Resolution::new(2048, 2048)),
            triangles: 40_000,
        },
    );
    graph.emplace_node(
        GEOMETRY,
        DrawPass {
            label: "geometry",
            framebuffer: GBUFFER,
            target: RenderTarget::new("gbuffer")
                .with_color(TextureFormat::Rgba16Float)
                .with_color(TextureFormat::Rgba8Unorm)
                .with_depth(TextureFormat::Depth32Float),
            fixed: None,
            triangles: 120_000,
        },
    );
    graph.emplace_node(AMBIENT_OCCLUSION, AmbientOcclusionPass);
    graph.emplace_node(
        SHADING,
        DrawPass {
            label: "shading",
            framebuffer: HDR,
            target: RenderTarget::new("hdr").with_color(TextureFormat::Rgba16Float),
            fixed: None,
            triangles: 2,
        },
    );
    graph.emplace_node(POST_PROCESSING, PostProcessingPass);
    graph.emplace_node(UI, UiPass { widgets: 32 });

    graph.add_dependency(GEOMETRY, SHADOW_MAP);
    graph.add_dependency(AMBIENT_OCCLUSION, GEOMETRY);
    graph.add_dependency(SHADING, GEOMETRY);
    graph.add_dependency(SHADING, SHADOW_MAP);
    graph.add_dependency(SHADING, AMBIENT_OCCLUSION);
    graph.add_dependency(POST_PROCESSING, SHADING);
    graph.add_dependency(UI, POST_PROCESSING);
    graph.add_dependency(UI, SWAPCHAIN);

    graph.bake(UI)?;
    graph.initialize_nodes()?;
    Ok(graph)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    render_core::init();
    let args = Args::parse();

    let device = if args.async_compute {
        DummyDevice::new().with_queue_families(vec![
            WorkTypeFlags::GRAPHICS | WorkTypeFlags::TRANSFER | WorkTypeFlags::PRESENTATION,
            WorkTypeFlags::COMPUTE | WorkTypeFlags::TRANSFER,
        ])
    } else {
        DummyDevice::new()
    };
    let device = Arc::new(device);
    let mut resolution = Resolution::new(args.width, args.height);
    let mut graph = build_graph(device.clone(), resolution)?;
    log::info!("Execution order: {:?}", graph.execution_order());

    for frame in 0..args.frames {
        if args.resize_at == Some(frame) {
            resolution = Resolution::new(resolution.width * 2, resolution.height * 2);
            graph.update_resolution(resolution)?;
        }

        graph.await_frame()?;
        graph.set_flag(FXAA, args.fxaa);
        graph.set_flag(HIDE_UI, args.hide_ui);

        let semaphores = graph.external_signal_semaphores(SWAPCHAIN);
        let &[acquired] = semaphores.as_slice() else {
            return Err("swapchain node must feed exactly one consumer".into());
        };
        let image = device.acquire_next_image(acquired)?;

        graph.record_command_lists()?;
        graph.execute()?;
        graph.present(image)?;
        log::debug!(
            "Frame {} on slot {}: image {}, {} geometry triangles",
            frame,
            graph.frame_index(),
            image,
            graph.triangle_count(GEOMETRY)
        );
        graph.swap_frames();
    }

    graph.clean();
    let stats = device.stats();
    log::info!(
        "Rendered {} frames in {} submissions, {} framebuffers created",
        stats.presents,
        stats.submissions,
        stats.framebuffers_created
    );
    Ok(())
}
