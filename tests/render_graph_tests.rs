//! Integration tests for baking: ordering, cycle detection, resource and
//! semaphore allocation.
//!
//! Tests that submit are parameterized using `rstest` over submit policies.

mod common;

use std::sync::Arc;

use common::*;
use render_core::config::SubmitPolicy;
use render_core::device::{DummyDevice, QueueFamily, WorkTypeFlags};
use render_core::error::{DeviceError, GraphError};
use render_core::name::{make_name, Name};
use render_core::render_graph::{FrameState, FRAMES_IN_FLIGHT};
use rstest::rstest;

const A: Name = make_name("a.node");
const B: Name = make_name("b.node");
const C: Name = make_name("c.node");
const D: Name = make_name("d.node");

const GEOMETRY: Name = Name::node("geometry");
const AMBIENT_OCCLUSION: Name = Name::node("ambient_occlusion");
const SHADING: Name = Name::node("shading");
const POST_PROCESSING: Name = Name::node("post_processing");
const SWAPCHAIN: Name = Name::node("swapchain");

// ============================================================================
// Ordering and structural errors
// ============================================================================

#[test]
fn test_bake_orders_chain() {
    let device = dummy_device();
    let mut graph = new_graph(&device, SubmitPolicy::default());
    graph.emplace_node(C, DrawNode::new(1));
    graph.emplace_node(B, DrawNode::new(1));
    graph.emplace_node(A, DrawNode::new(1));
    graph.add_dependency(B, A);
    graph.add_dependency(C, B);

    graph.bake(C).unwrap();

    assert_eq!(graph.execution_order(), &[A, B, C]);
    assert_eq!(graph.target(), Some(C));
    assert_eq!(graph.frame_state(), FrameState::Baked);
    graph.clean();
}

#[test]
fn test_bake_rejects_cycle_without_allocating() {
    let device = dummy_device();
    let mut graph = new_graph(&device, SubmitPolicy::default());
    graph.emplace_node(A, DrawNode::new(1));
    graph.emplace_node(B, DrawNode::new(1));
    graph.add_dependency(A, B);
    graph.add_dependency(B, A);

    let err = graph.bake(A).unwrap_err();

    assert_eq!(err, GraphError::CyclicDependency { nodes: vec![A, B] });
    let stats = device.stats();
    assert_eq!(stats.framebuffers_created, 0);
    assert_eq!(stats.semaphores_created, 0);
    assert_eq!(stats.live_command_lists, 0);
    assert!(!graph.is_baked());
    assert_eq!(graph.frame_state(), FrameState::Empty);
    graph.clean();
}

#[test]
fn test_cycle_outside_closure_is_ignored() {
    let device = dummy_device();
    let mut graph = new_graph(&device, SubmitPolicy::default());
    graph.emplace_node(A, DrawNode::new(1));
    graph.emplace_node(B, DrawNode::new(1));
    graph.emplace_node(C, DrawNode::new(1));
    graph.add_dependency(B, C);
    graph.add_dependency(C, B);
    graph.add_dependency(B, A);

    graph.bake(A).unwrap();
    assert_eq!(graph.execution_order(), &[A]);
    assert!(matches!(
        graph.bake(B),
        Err(GraphError::CyclicDependency { .. })
    ));
    graph.clean();
}

#[test]
fn test_bake_unknown_target_and_dependency() {
    let device = dummy_device();
    let mut graph = new_graph(&device, SubmitPolicy::default());
    graph.emplace_node(A, DrawNode::new(1));
    graph.add_dependency(A, D);

    assert_eq!(graph.bake(B), Err(GraphError::UnknownTarget(B)));
    assert_eq!(graph.bake(A), Err(GraphError::UnknownNode(D)));
    assert_eq!(device.stats().framebuffers_created, 0);
    graph.clean();
}

#[test]
fn test_operations_before_bake_fail() {
    let device = dummy_device();
    let mut graph = new_graph(&device, SubmitPolicy::default());
    graph.emplace_node(A, DrawNode::new(1));

    assert_eq!(graph.execute(), Err(GraphError::NotBaked));
    assert_eq!(graph.record_command_lists(), Err(GraphError::NotBaked));
    assert_eq!(graph.initialize_nodes(), Err(GraphError::NotBaked));
    assert_eq!(graph.present(0), Err(GraphError::NotBaked));
    assert!(graph.await_frame().is_ok());
    assert_eq!(device.stats().submissions, 0);
    graph.clean();
}

// ============================================================================
// Resources and semaphores
// ============================================================================

fn diamond(device: &Arc<DummyDevice>, policy: SubmitPolicy) -> render_core::RenderGraph {
    let mut graph = new_graph(device, policy);
    graph.emplace_node(A, DrawNode::new(1));
    graph.emplace_node(B, DrawNode::new(2));
    graph.emplace_node(C, DrawNode::new(3));
    graph.emplace_node(D, DrawNode::new(4));
    graph.add_dependency(B, A);
    graph.add_dependency(C, A);
    graph.add_dependency(D, B);
    graph.add_dependency(D, C);
    graph
}

#[test]
fn test_every_edge_has_a_semaphore_pair() {
    let device = dummy_device();
    let mut graph = diamond(&device, SubmitPolicy::default());
    graph.bake(D).unwrap();

    let edges = [(B, A), (C, A), (D, B), (D, C)];
    for index in 0..FRAMES_IN_FLIGHT {
        let frame = graph.frame_resources(index);
        for (target, dependency) in edges {
            let semaphore = frame.semaphore(dependency, target);
            assert!(frame.node(target).wait_semaphores().contains(&semaphore));
        }
        assert_eq!(frame.node(A).signal_semaphores().count(), 2);
        assert_eq!(frame.node(A).wait_semaphores().len(), 0);
        assert_eq!(frame.node(D).wait_semaphores().len(), 2);
        assert_eq!(frame.node(D).signal_semaphores().count(), 0);
        assert_eq!(frame.target_semaphore(), frame.node(D).target_semaphore());
        assert!(frame.target_semaphore().is_some());
    }

    // Frames in flight never share semaphores.
    assert_ne!(
        graph.frame_resources(0).semaphore(A, B),
        graph.frame_resources(1).semaphore(A, B)
    );
    assert_eq!(graph.semaphore(A, B), graph.active_frame_resources().semaphore(A, B));
    // Four edges plus the target semaphore, per frame.
    assert_eq!(device.stats().live_semaphores, 10);
    graph.clean();
}

#[test]
fn test_bake_allocates_per_frame_resources() {
    let device = dummy_device();
    let mut graph = new_graph(&device, SubmitPolicy::default());
    graph.emplace_node(A, DrawNode::new(1).with_shadow_map());
    graph.emplace_node(B, DrawNode::new(1));
    graph.add_dependency(B, A);
    graph.bake(B).unwrap();

    let stats = device.stats();
    assert_eq!(stats.live_framebuffers, 3 * FRAMES_IN_FLIGHT);
    assert_eq!(stats.live_command_lists, 2 * FRAMES_IN_FLIGHT);
    assert_eq!(stats.live_fences, FRAMES_IN_FLIGHT);

    let frame = graph.active_frame_resources();
    assert_eq!(frame.framebuffer(A, SHADOW_MAP).resolution(), SHADOW_RESOLUTION);
    assert_eq!(frame.framebuffer(A, COLOR).resolution(), graph.resolution());
    assert!(frame.framebuffer(A, SHADOW_MAP).is_fixed());
    graph.clean();
}

#[test]
fn test_rebake_releases_previous_resources() {
    let device = dummy_device();
    let mut graph = diamond(&device, SubmitPolicy::default());
    graph.bake(D).unwrap();
    let first = device.stats();

    graph.bake(D).unwrap();
    let second = device.stats();
    assert_eq!(second.live_framebuffers, first.live_framebuffers);
    assert_eq!(second.live_semaphores, first.live_semaphores);
    assert_eq!(second.live_command_lists, first.live_command_lists);
    assert_eq!(second.framebuffers_created, 2 * first.framebuffers_created);

    graph.bake(B).unwrap();
    assert_eq!(graph.execution_order(), &[A, B]);
    assert_eq!(device.stats().live_framebuffers, 2 * FRAMES_IN_FLIGHT);
    graph.clean();
}

#[test]
fn test_device_failure_during_bake_releases_everything() {
    let device = dummy_device();
    let mut graph = diamond(&device, SubmitPolicy::default());
    device.fail_next_allocation(DeviceError::OutOfMemory);

    assert_eq!(
        graph.bake(D),
        Err(GraphError::Device(DeviceError::OutOfMemory))
    );
    let stats = device.stats();
    assert_eq!(stats.live_framebuffers, 0);
    assert_eq!(stats.live_semaphores, 0);
    assert_eq!(stats.live_command_lists, 0);
    assert!(!graph.is_baked());

    graph.bake(D).unwrap();
    assert!(graph.is_baked());
    graph.clean();
}

#[test]
fn test_unsupported_work_types_fail_bake() {
    init_logging();
    let device = Arc::new(DummyDevice::new().with_queue_families(vec![WorkTypeFlags::GRAPHICS]));
    let mut graph = new_graph(&device, SubmitPolicy::default());
    graph.emplace_node(A, DrawNode::compute());

    assert_eq!(
        graph.bake(A),
        Err(GraphError::Device(DeviceError::UnsupportedWorkTypes(
            WorkTypeFlags::COMPUTE
        )))
    );
    assert_eq!(device.stats().live_command_lists, 0);
    graph.clean();
}

#[test]
fn test_post_bake_links_sibling_framebuffer() {
    let device = dummy_device();
    let mut graph = new_graph(&device, SubmitPolicy::default());
    graph.emplace_node(SHADING, DrawNode::new(10));
    graph.emplace_node(POST_PROCESSING, PostProcessNode::new(SHADING, COLOR));
    graph.add_dependency(POST_PROCESSING, SHADING);
    graph.bake(POST_PROCESSING).unwrap();

    let post = graph.node::<PostProcessNode>(POST_PROCESSING);
    assert_eq!(post.post_baked, vec![0, 1]);

    for index in 0..FRAMES_IN_FLIGHT {
        let frame = graph.frame_resources(index);
        let resources = frame.node(POST_PROCESSING);
        let link = resources.link(SCENE_INPUT).unwrap();
        assert_eq!(link.node, SHADING);
        assert_eq!(
            frame.linked_framebuffer(resources, SCENE_INPUT).handle(),
            frame.framebuffer(SHADING, COLOR).handle()
        );
    }
    graph.clean();
}

#[test]
fn test_post_bake_missing_resource_fails_bake() {
    let device = dummy_device();
    let missing = Name::framebuffer("missing");
    let mut graph = new_graph(&device, SubmitPolicy::default());
    graph.emplace_node(SHADING, DrawNode::new(10));
    graph.emplace_node(POST_PROCESSING, PostProcessNode::new(SHADING, missing));
    graph.add_dependency(POST_PROCESSING, SHADING);

    assert_eq!(
        graph.bake(POST_PROCESSING),
        Err(GraphError::UnknownResource {
            node: SHADING,
            resource: missing,
        })
    );
    assert_eq!(device.stats().live_framebuffers, 0);
    assert_eq!(device.stats().live_semaphores, 0);
    graph.clean();
}

#[test]
fn test_initialize_nodes_runs_once_per_node() {
    let device = dummy_device();
    let mut graph = diamond(&device, SubmitPolicy::default());
    graph.bake(D).unwrap();
    graph.initialize_nodes().unwrap();

    assert!(graph.is_initialized());
    for name in [A, B, C, D] {
        assert_eq!(graph.node::<DrawNode>(name).initialized, 1);
    }
    graph.clean();
}

#[test]
fn test_external_nodes() {
    let device = dummy_device();
    let mut graph = new_graph(&device, SubmitPolicy::default());
    graph.add_external_node(SWAPCHAIN);
    graph.emplace_node(GEOMETRY, DrawNode::new(100));
    graph.emplace_node(SHADING, DrawNode::new(2));
    graph.add_dependency(GEOMETRY, SWAPCHAIN);
    graph.add_dependency(SHADING, SWAPCHAIN);
    graph.add_dependency(SHADING, GEOMETRY);
    graph.bake(SHADING).unwrap();

    assert!(graph.is_external(SWAPCHAIN));
    let frame = graph.active_frame_resources();
    assert!(frame.node(SWAPCHAIN).try_command_list().is_none());
    assert_eq!(graph.external_signal_semaphores(SWAPCHAIN).len(), 2);
    assert!(frame.node(SWAPCHAIN).wait_semaphores().is_empty());
    // Only the two drawing nodes own framebuffers and command lists.
    assert_eq!(device.stats().live_command_lists, 2 * FRAMES_IN_FLIGHT);

    for _ in 0..4 {
        run_frame(&mut graph, &device, &[SWAPCHAIN]).unwrap();
    }
    assert_eq!(device.stats().presents, 4);
    graph.clean();
}

#[test]
fn test_external_target_has_no_target_semaphore() {
    let device = dummy_device();
    let mut graph = new_graph(&device, SubmitPolicy::default());
    graph.emplace_node(SHADING, DrawNode::new(2));
    graph.add_external_node(SWAPCHAIN);
    graph.add_dependency(SWAPCHAIN, SHADING);
    graph.bake(SWAPCHAIN).unwrap();

    assert_eq!(graph.target_semaphore(), None);
    // The graph consumes the sink's inputs itself, frame after frame.
    for _ in 0..4 {
        run_frame(&mut graph, &device, &[]).unwrap();
    }
    assert_eq!(device.stats().presents, 0);
    let shading = graph.frame_resources(0).semaphore(SHADING, SWAPCHAIN);
    assert!(!device.is_semaphore_pending(shading));
    graph.clean();
}

#[test]
fn test_external_node_in_the_middle_is_rejected() {
    let device = dummy_device();
    let mut graph = new_graph(&device, SubmitPolicy::default());
    graph.emplace_node(GEOMETRY, DrawNode::new(1));
    graph.add_external_node(SWAPCHAIN);
    graph.emplace_node(SHADING, DrawNode::new(1));
    graph.add_dependency(SWAPCHAIN, GEOMETRY);
    graph.add_dependency(SHADING, SWAPCHAIN);

    assert_eq!(
        graph.bake(SHADING),
        Err(GraphError::ExternalNodeHasDependencies(SWAPCHAIN))
    );
    assert_eq!(device.stats().framebuffers_created, 0);
    assert_eq!(graph.frame_state(), FrameState::Empty);
    graph.clean();
}

// ============================================================================
// Submission batching
// ============================================================================

fn async_compute_device() -> Arc<DummyDevice> {
    init_logging();
    Arc::new(DummyDevice::new().with_queue_families(vec![
        WorkTypeFlags::GRAPHICS | WorkTypeFlags::TRANSFER | WorkTypeFlags::PRESENTATION,
        WorkTypeFlags::COMPUTE | WorkTypeFlags::TRANSFER,
    ]))
}

fn async_compute_graph(device: &Arc<DummyDevice>, policy: SubmitPolicy) -> render_core::RenderGraph {
    let mut graph = new_graph(device, policy);
    graph.emplace_node(GEOMETRY, DrawNode::new(1000));
    graph.emplace_node(AMBIENT_OCCLUSION, DrawNode::compute());
    graph.emplace_node(SHADING, DrawNode::new(2));
    graph.emplace_node(POST_PROCESSING, PostProcessNode::new(SHADING, COLOR));
    graph.add_dependency(AMBIENT_OCCLUSION, GEOMETRY);
    graph.add_dependency(SHADING, GEOMETRY);
    graph.add_dependency(SHADING, AMBIENT_OCCLUSION);
    graph.add_dependency(POST_PROCESSING, SHADING);
    graph.bake(POST_PROCESSING).unwrap();
    graph
}

#[rstest]
#[case::batch_contiguous_queues(SubmitPolicy::BatchContiguousQueues, 3)]
#[case::per_node(SubmitPolicy::PerNode, 4)]
fn test_submissions_per_frame(#[case] policy: SubmitPolicy, #[case] expected: usize) {
    let device = async_compute_device();
    let mut graph = async_compute_graph(&device, policy);
    assert_eq!(
        graph.execution_order(),
        &[GEOMETRY, AMBIENT_OCCLUSION, SHADING, POST_PROCESSING]
    );

    for _ in 0..3 {
        run_frame(&mut graph, &device, &[]).unwrap();
    }

    let submissions = device.submissions();
    assert_eq!(submissions.len(), 3 * expected);
    for frame in submissions.chunks(expected) {
        assert_eq!(frame[0].queue, QueueFamily(0));
        assert_eq!(frame[1].queue, QueueFamily(1));
        // Only the last submission of a frame carries the fence.
        assert!(frame[..expected - 1].iter().all(|s| s.fence.is_none()));
        assert!(frame[expected - 1].fence.is_some());
    }
    let entries: usize = submissions.iter().map(|s| s.entries.len()).sum();
    assert_eq!(entries, 3 * 4);
    graph.clean();
}

#[rstest]
#[case::batch_contiguous_queues(SubmitPolicy::BatchContiguousQueues, 2)]
#[case::per_node(SubmitPolicy::PerNode, 3)]
fn test_external_target_fence_covers_every_branch(
    #[case] policy: SubmitPolicy,
    #[case] expected: usize,
) {
    let device = async_compute_device();
    let mut graph = new_graph(&device, policy);
    graph.add_external_node(SWAPCHAIN);
    graph.emplace_node(GEOMETRY, DrawNode::new(10));
    graph.emplace_node(AMBIENT_OCCLUSION, DrawNode::compute());
    graph.add_dependency(SWAPCHAIN, GEOMETRY);
    graph.add_dependency(SWAPCHAIN, AMBIENT_OCCLUSION);
    graph.bake(SWAPCHAIN).unwrap();

    graph.record_command_lists().unwrap();
    graph.execute().unwrap();

    let frame = graph.frame_resources(0);
    let from_geometry = frame.semaphore(GEOMETRY, SWAPCHAIN);
    let from_ao = frame.semaphore(AMBIENT_OCCLUSION, SWAPCHAIN);
    let submissions = device.submissions();
    assert_eq!(submissions.len(), expected);

    // Only the last submission carries the fence, and it waits on both branches.
    let (last, earlier) = submissions.split_last().unwrap();
    assert!(earlier.iter().all(|s| s.fence.is_none()));
    assert_eq!(last.fence, Some(frame.fence()));
    let sink = last.entries.last().unwrap();
    assert_eq!(sink.command_list, frame.node(SWAPCHAIN).command_list().id());
    assert_eq!(sink.wait_semaphores, vec![from_geometry, from_ao]);
    assert!(sink.signal_semaphores.is_empty());

    graph.swap_frames();
    for _ in 0..3 {
        run_frame(&mut graph, &device, &[]).unwrap();
    }
    graph.clean();
}

#[rstest]
#[case::batch_contiguous_queues(SubmitPolicy::BatchContiguousQueues)]
#[case::per_node(SubmitPolicy::PerNode)]
fn test_submission_entries_keep_node_semaphores(#[case] policy: SubmitPolicy) {
    let device = async_compute_device();
    let mut graph = async_compute_graph(&device, policy);
    run_frame(&mut graph, &device, &[]).unwrap();

    let frame = graph.frame_resources(0);
    let shading = frame.node(SHADING);
    let shading_list = shading.command_list().id();
    let entry = device
        .submissions()
        .into_iter()
        .flat_map(|submission| submission.entries)
        .find(|entry| entry.command_list == shading_list)
        .unwrap();

    assert_eq!(entry.wait_semaphores, shading.wait_semaphores());
    assert_eq!(entry.wait_semaphores.len(), 2);
    assert_eq!(
        entry.signal_semaphores,
        vec![frame.semaphore(SHADING, POST_PROCESSING)]
    );
    graph.clean();
}
