//! Submission of a recorded frame.
//!
//! Execution order is already a valid GPU order, so the executor only decides
//! how many `submit` calls a frame takes. [`build_batches`] splits the order
//! according to the graph's [`SubmitPolicy`]:
//!
//! ```text
//! order:    shadow(G) geometry(G) ao(C) shading(G) post(G)
//!
//! BatchContiguousQueues:  [shadow geometry] [ao] [shading post]
//! PerNode:                [shadow] [geometry] [ao] [shading] [post]
//! ```
//!
//! Each node keeps its own wait/signal semaphores inside a batch. The frame's
//! fence is attached to the final batch, which contains the terminal node. An
//! external terminal node submits an empty entry there that waits on each of
//! its producers, so the fence still covers every branch.

use crate::config::SubmitPolicy;
use crate::device::{Device, QueueFamily, SubmitInfo};
use crate::error::{GraphError, GraphResult};
use crate::name::Name;

use super::frame_resources::FrameResources;

/// Nodes submitted together in one `submit` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitBatch {
    pub queue: QueueFamily,
    pub nodes: Vec<Name>,
}

/// Split `(node, queue)` pairs, in execution order, into submissions.
pub fn build_batches(
    nodes: impl IntoIterator<Item = (Name, QueueFamily)>,
    policy: SubmitPolicy,
) -> Vec<SubmitBatch> {
    let mut batches: Vec<SubmitBatch> = Vec::new();
    for (node, queue) in nodes {
        match batches.last_mut() {
            Some(batch) if policy == SubmitPolicy::BatchContiguousQueues && batch.queue == queue => {
                batch.nodes.push(node);
            }
            _ => batches.push(SubmitBatch {
                queue,
                nodes: vec![node],
            }),
        }
    }
    batches
}

/// Batches for `frame`, skipping external sources.
pub(crate) fn frame_batches(
    order: &[Name],
    frame: &FrameResources,
    policy: SubmitPolicy,
) -> Vec<SubmitBatch> {
    let nodes = order.iter().filter_map(|&name| {
        let list = frame.node(name).try_command_list()?;
        Some((name, list.queue()))
    });
    build_batches(nodes, policy)
}

/// Submit every recorded command list of `frame`.
///
/// Returns the number of `submit` calls made. The caller moves the frame to
/// `Failed` when this returns an error.
pub(crate) fn submit_frame(
    device: &dyn Device,
    order: &[Name],
    frame: &FrameResources,
    policy: SubmitPolicy,
) -> GraphResult<usize> {
    let batches = frame_batches(order, frame, policy);
    let last = batches.len().saturating_sub(1);

    for (index, batch) in batches.iter().enumerate() {
        let mut signals = Vec::with_capacity(batch.nodes.len());
        let mut lists = Vec::with_capacity(batch.nodes.len());
        for &name in &batch.nodes {
            let resources = frame.node(name);
            let list = resources
                .try_command_list()
                .ok_or(GraphError::CommandListNotFinished(name))?;
            if !list.is_executable() {
                return Err(GraphError::CommandListNotFinished(name));
            }
            lists.push((list, resources.wait_semaphores()));
            signals.push(resources.submission_signals());
        }

        let infos: Vec<SubmitInfo<'_>> = lists
            .iter()
            .zip(&signals)
            .map(|(&(command_list, wait_semaphores), signal_semaphores)| SubmitInfo {
                command_list,
                wait_semaphores,
                signal_semaphores,
            })
            .collect();

        let fence = (index == last).then(|| frame.fence());
        log::trace!(
            "Submitting batch {} ({} nodes) to queue {} for frame {}",
            index,
            batch.nodes.len(),
            batch.queue.index(),
            frame.index()
        );
        device.submit(batch.queue, &infos, fence)?;
    }
    Ok(batches.len())
}
