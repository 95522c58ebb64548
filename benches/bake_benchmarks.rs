use std::any::Any;
use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use render_core::config::{GraphConfig, SubmitPolicy};
use render_core::device::{CommandList, DummyDevice, RenderTarget, TextureFormat, WorkTypeFlags};
use render_core::error::DeviceResult;
use render_core::name::Name;
use render_core::render_graph::{FrameResources, NodeContext, NodeResources, RenderGraph, RenderNode};

const COLOR: Name = Name::framebuffer("color");

struct BenchNode {
    work_types: WorkTypeFlags,
}

impl BenchNode {
    fn graphics() -> Self {
        Self {
            work_types: WorkTypeFlags::GRAPHICS,
        }
    }

    fn compute() -> Self {
        Self {
            work_types: WorkTypeFlags::COMPUTE,
        }
    }
}

impl RenderNode for BenchNode {
    fn work_types(&self) -> WorkTypeFlags {
        self.work_types
    }

    fn create_node_resources(&mut self, _ctx: &NodeContext<'_>) -> DeviceResult<NodeResources> {
        let mut resources = NodeResources::new();
        if self.work_types.contains(WorkTypeFlags::GRAPHICS) {
            resources.add_render_target(
                COLOR,
                RenderTarget::new("color").with_color(TextureFormat::Rgba8Unorm),
            );
        }
        Ok(resources)
    }

    fn record_commands(
        &mut self,
        _frame: &FrameResources,
        resources: &NodeResources,
        cmd: &mut CommandList,
    ) -> DeviceResult<()> {
        cmd.begin()?;
        if let Some(framebuffer) = resources.try_framebuffer(COLOR) {
            cmd.begin_render_pass(framebuffer.handle(), &[])?;
            cmd.draw_primitives(3, 1)?;
            cmd.end_render_pass()?;
        } else {
            cmd.dispatch(8, 8, 1)?;
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

fn new_graph(device: Arc<DummyDevice>, policy: SubmitPolicy) -> RenderGraph {
    let config = GraphConfig::default().with_submit_policy(policy);
    RenderGraph::new(device, config).expect("Failed to create render graph")
}

/// Linear chain `pass_0 <- pass_1 <- ... <- pass_{len-1}`, returns the last node.
fn chain_graph(graph: &mut RenderGraph, len: usize) -> Name {
    let mut prev = Name::node("pass_0");
    graph.emplace_node(prev, BenchNode::graphics());
    for i in 1..len {
        let name = Name::node(&format!("pass_{i}"));
        graph.emplace_node(name, BenchNode::graphics());
        graph.add_dependency(name, prev);
        prev = name;
    }
    prev
}

/// Graphics and compute passes interleaved, each depending on the two before it.
fn mixed_graph(graph: &mut RenderGraph, len: usize) -> Name {
    let names: Vec<Name> = (0..len).map(|i| Name::node(&format!("mixed_{i}"))).collect();
    for (i, &name) in names.iter().enumerate() {
        let node = if i % 2 == 0 {
            BenchNode::graphics()
        } else {
            BenchNode::compute()
        };
        graph.emplace_node(name, node);
        for back in 1..=2 {
            if i >= back {
                graph.add_dependency(name, names[i - back]);
            }
        }
    }
    names[len - 1]
}

fn async_compute_device() -> Arc<DummyDevice> {
    Arc::new(DummyDevice::new().with_queue_families(vec![
        WorkTypeFlags::GRAPHICS | WorkTypeFlags::TRANSFER | WorkTypeFlags::PRESENTATION,
        WorkTypeFlags::COMPUTE | WorkTypeFlags::TRANSFER,
    ]))
}

// ---------------------------------------------------------------------------
// Bake
// ---------------------------------------------------------------------------

fn bench_bake_chain(c: &mut Criterion) {
    let mut graph = new_graph(Arc::new(DummyDevice::new()), SubmitPolicy::default());
    let target = chain_graph(&mut graph, 32);

    c.bench_function("bake_32_node_chain", |b| {
        b.iter(|| {
            graph.bake(black_box(target)).expect("Bake failed");
            black_box(&graph);
        });
    });
}

fn bench_bake_mixed(c: &mut Criterion) {
    let mut graph = new_graph(async_compute_device(), SubmitPolicy::default());
    let target = mixed_graph(&mut graph, 16);

    c.bench_function("bake_16_node_mixed_queues", |b| {
        b.iter(|| {
            graph.bake(black_box(target)).expect("Bake failed");
            black_box(&graph);
        });
    });
}

// ---------------------------------------------------------------------------
// Frame loop
// ---------------------------------------------------------------------------

fn run_frame(graph: &mut RenderGraph) {
    graph.await_frame().expect("Await failed");
    graph.record_command_lists().expect("Record failed");
    graph.execute().expect("Execute failed");
    graph.present(0).expect("Present failed");
    graph.swap_frames();
}

fn bench_frame(c: &mut Criterion) {
    for (label, policy) in [
        ("frame_16_node_mixed_batched", SubmitPolicy::BatchContiguousQueues),
        ("frame_16_node_mixed_per_node", SubmitPolicy::PerNode),
    ] {
        let mut graph = new_graph(async_compute_device(), policy);
        let target = mixed_graph(&mut graph, 16);
        graph.bake(target).expect("Bake failed");
        graph.initialize_nodes().expect("Initialize failed");

        c.bench_function(label, |b| {
            b.iter(|| {
                run_frame(&mut graph);
                black_box(&graph);
            });
        });
    }
}

criterion_group!(benches, bench_bake_chain, bench_bake_mixed, bench_frame);
criterion_main!(benches);
