//! Render graph configuration.

use crate::device::Resolution;

/// How the executor maps nodes to device submissions.
///
/// | Policy | Submissions per frame |
/// |--------|-----------------------|
/// | `BatchContiguousQueues` | One per run of consecutive nodes on the same queue family |
/// | `PerNode` | One per node with a command list |
///
/// Either way each node keeps its own wait and signal semaphores, so GPU-side
/// ordering is identical. Batching only reduces the number of `submit` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitPolicy {
    /// Group consecutive nodes (in execution order) that run on the same queue
    /// family into one submission. External sources submit nothing and are
    /// signaled by the application before `execute`, so they never split a run.
    #[default]
    BatchContiguousQueues,
    /// Submit every node on its own.
    PerNode,
}

/// Configuration for a [`RenderGraph`](crate::render_graph::RenderGraph).
///
/// ```
/// use render_core::config::{GraphConfig, SubmitPolicy};
/// use render_core::device::Resolution;
///
/// let config = GraphConfig::default()
///     .with_label("main")
///     .with_resolution(Resolution::new(1920, 1080))
///     .with_submit_policy(SubmitPolicy::PerNode);
/// assert_eq!(config.label, "main");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    /// Debug label used in log output.
    pub label: String,
    /// Initial swapchain resolution.
    pub resolution: Resolution,
    pub submit_policy: SubmitPolicy,
}

impl GraphConfig {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_submit_policy(mut self, submit_policy: SubmitPolicy) -> Self {
        self.submit_policy = submit_policy;
        self
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            label: "render-graph".to_string(),
            resolution: Resolution::new(1280, 720),
            submit_policy: SubmitPolicy::default(),
        }
    }
}
