//! Render graph definition, baking and the per-frame protocol.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::config::GraphConfig;
use crate::device::{Device, Resolution, Semaphore};
use crate::error::{DeviceError, GraphError, GraphResult};
use crate::name::Name;

use super::executor;
use super::frame_resources::{FrameResources, FrameState};
use super::node::{NodeContext, PostBakeContext, RenderNode};
use super::node_resources::NodeResources;

/// Number of frames the CPU may record ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

struct NodeEntry {
    /// Registration order, used to break ties in the topological sort.
    index: usize,
    /// `None` for external nodes.
    node: Option<Box<dyn RenderNode>>,
}

/// Dependency closure of a bake target.
struct Closure {
    members: HashSet<Name>,
    /// Distinct dependencies per member.
    dependencies: HashMap<Name, Vec<Name>>,
}

/// The render graph scheduler.
///
/// Owns the registered nodes, the dependency relation and two
/// [`FrameResources`] instances, and drives the frame protocol:
///
/// ```text
/// bake(target) -> initialize_nodes()
/// loop {
///     await_frame()            blocks only if the GPU is a full frame behind
///     record_command_lists()
///     execute()
///     present(image)           waits on target_semaphore()
///     swap_frames()
/// }
/// clean()
/// ```
///
/// # Dependencies
///
/// `add_dependency(target, dependency)` means `target` runs after `dependency`
/// on the GPU. Edges are not validated until [`bake`](Self::bake), which only
/// looks at the nodes reachable from the bake target.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use render_core::config::GraphConfig;
/// use render_core::device::DummyDevice;
/// use render_core::name::Name;
/// use render_core::render_graph::RenderGraph;
///
/// const ACQUIRE: Name = Name::node("acquire");
/// const PRESENT: Name = Name::node("present");
///
/// let mut graph = RenderGraph::new(Arc::new(DummyDevice::new()), GraphConfig::default())?;
/// graph.add_external_node(ACQUIRE);
/// graph.add_external_node(PRESENT);
/// graph.add_dependency(PRESENT, ACQUIRE);
/// graph.bake(PRESENT)?;
/// assert_eq!(graph.execution_order(), &[ACQUIRE, PRESENT]);
/// graph.clean();
/// # Ok::<(), render_core::error::GraphError>(())
/// ```
pub struct RenderGraph {
    device: Arc<dyn Device>,
    config: GraphConfig,
    resolution: Resolution,
    nodes: HashMap<Name, NodeEntry>,
    registration: Vec<Name>,
    /// `(target, dependency)` pairs in registration order.
    dependencies: Vec<(Name, Name)>,
    order: Vec<Name>,
    target: Option<Name>,
    frames: [FrameResources; FRAMES_IN_FLIGHT],
    active: usize,
    initialized: bool,
    released: bool,
}

impl RenderGraph {
    /// Create an empty graph and the fences of both frames in flight.
    pub fn new(device: Arc<dyn Device>, config: GraphConfig) -> GraphResult<Self> {
        let first = device.create_fence()?;
        let second = match device.create_fence() {
            Ok(fence) => fence,
            Err(err) => {
                device.destroy_fence(first);
                return Err(err.into());
            }
        };
        log::debug!(
            "Created render graph {:?} on {} at {}",
            config.label,
            device.name(),
            config.resolution
        );

        Ok(Self {
            resolution: config.resolution,
            device,
            config,
            nodes: HashMap::new(),
            registration: Vec::new(),
            dependencies: Vec::new(),
            order: Vec::new(),
            target: None,
            frames: [FrameResources::new(0, first), FrameResources::new(1, second)],
            active: 0,
            initialized: false,
            released: false,
        })
    }

    /// Register a node instance under `name`.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered.
    pub fn emplace_node<T: RenderNode>(&mut self, name: Name, node: T) {
        self.register(name, Some(Box::new(node)));
    }

    /// Register a node without resources or commands.
    ///
    /// External nodes are synchronization anchors. As a source (no
    /// dependencies) its outgoing semaphores are signaled by the application,
    /// see [`external_signal_semaphores`](Self::external_signal_semaphores).
    /// As the bake target it is a sink: the graph submits one empty entry that
    /// waits on every producer and carries the frame fence.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered.
    pub fn add_external_node(&mut self, name: Name) {
        self.register(name, None);
    }

    fn register(&mut self, name: Name, node: Option<Box<dyn RenderNode>>) {
        assert!(
            !self.nodes.contains_key(&name),
            "Render node {name} registered twice"
        );
        let index = self.registration.len();
        self.registration.push(name);
        self.nodes.insert(name, NodeEntry { index, node });
    }

    /// Make `target` run after `dependency`. Not validated until bake.
    pub fn add_dependency(&mut self, target: Name, dependency: Name) {
        self.dependencies.push((target, dependency));
    }

    pub fn is_registered(&self, name: Name) -> bool {
        self.nodes.contains_key(&name)
    }

    pub fn is_external(&self, name: Name) -> bool {
        self.nodes
            .get(&name)
            .is_some_and(|entry| entry.node.is_none())
    }

    /// Typed access to a registered node.
    ///
    /// # Panics
    ///
    /// Panics if no node of type `T` is registered under `name`.
    pub fn node<T: RenderNode>(&self, name: Name) -> &T {
        match self.try_node(name) {
            Some(node) => node,
            None => panic!(
                "Render node {name} is not registered as {}",
                std::any::type_name::<T>()
            ),
        }
    }

    pub fn try_node<T: RenderNode>(&self, name: Name) -> Option<&T> {
        self.nodes
            .get(&name)?
            .node
            .as_ref()?
            .as_any()
            .downcast_ref::<T>()
    }

    /// Typed mutable access to a registered node.
    ///
    /// # Panics
    ///
    /// Panics if no node of type `T` is registered under `name`.
    pub fn node_mut<T: RenderNode>(&mut self, name: Name) -> &mut T {
        match self
            .nodes
            .get_mut(&name)
            .and_then(|entry| entry.node.as_mut())
            .and_then(|node| node.as_any_mut().downcast_mut::<T>())
        {
            Some(node) => node,
            None => panic!(
                "Render node {name} is not registered as {}",
                std::any::type_name::<T>()
            ),
        }
    }

    /// Compile the graph for `target` and allocate every frame's resources.
    ///
    /// Only nodes reachable from `target` through dependencies take part. They
    /// are sorted topologically; ties go to the node registered first. Then,
    /// for each frame in flight, every node gets its resources, every edge gets
    /// a semaphore and `post_bake` runs on every node.
    ///
    /// Re-baking waits for in-flight frames and releases the previous
    /// resources first.
    ///
    /// # Errors
    ///
    /// - [`GraphError::UnknownTarget`] if `target` is not registered.
    /// - [`GraphError::UnknownNode`] if a reachable edge names an unregistered node.
    /// - [`GraphError::CyclicDependency`] if the reachable subgraph has a cycle.
    /// - [`GraphError::ExternalNodeHasDependencies`] if an external node other
    ///   than `target` has dependencies.
    ///
    /// None of these allocate anything. Device and `post_bake` errors release
    /// whatever was allocated and leave the graph unbaked.
    ///
    /// # Panics
    ///
    /// Panics if the graph was already cleaned.
    pub fn bake(&mut self, target: Name) -> GraphResult<()> {
        assert!(
            !self.released,
            "Render graph {:?} used after clean",
            self.config.label
        );
        if !self.nodes.contains_key(&target) {
            return Err(GraphError::UnknownTarget(target));
        }

        let closure = self.closure(target)?;
        let order = self.sort(&closure)?;
        self.check_externals(&order, &closure, target)?;

        self.await_frames()?;
        self.release_resources();

        if let Err(err) = self.allocate(&order, &closure, target) {
            self.release_resources();
            return Err(err);
        }

        for frame in &mut self.frames {
            frame.state = FrameState::Baked;
        }
        log::debug!(
            "Baked render graph {:?}: {} of {} nodes, order {:?}, {} semaphores per frame",
            self.config.label,
            order.len(),
            self.registration.len(),
            order,
            self.frames[0].semaphore_count()
        );
        self.order = order;
        self.target = Some(target);
        self.initialized = false;
        Ok(())
    }

    /// Reverse reachability from `target`.
    fn closure(&self, target: Name) -> GraphResult<Closure> {
        let mut direct: HashMap<Name, Vec<Name>> = HashMap::new();
        let mut seen = HashSet::new();
        for &(node, dependency) in &self.dependencies {
            if seen.insert((node, dependency)) {
                direct.entry(node).or_default().push(dependency);
            }
        }

        let mut members = HashSet::from([target]);
        let mut dependencies = HashMap::new();
        let mut stack = vec![target];
        while let Some(node) = stack.pop() {
            let inputs = direct.remove(&node).unwrap_or_default();
            for &dependency in &inputs {
                if !self.nodes.contains_key(&dependency) {
                    return Err(GraphError::UnknownNode(dependency));
                }
                if members.insert(dependency) {
                    stack.push(dependency);
                }
            }
            dependencies.insert(node, inputs);
        }
        Ok(Closure {
            members,
            dependencies,
        })
    }

    /// Kahn's algorithm, always taking the earliest registered ready node.
    fn sort(&self, closure: &Closure) -> GraphResult<Vec<Name>> {
        let index = |name: &Name| self.nodes[name].index;

        let mut in_degree: HashMap<Name, usize> = HashMap::new();
        let mut dependents: HashMap<Name, Vec<Name>> = HashMap::new();
        for &node in &closure.members {
            let inputs = &closure.dependencies[&node];
            in_degree.insert(node, inputs.len());
            for &dependency in inputs {
                dependents.entry(dependency).or_default().push(node);
            }
        }

        let mut ready: BTreeSet<(usize, Name)> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(name, _)| (index(name), *name))
            .collect();

        let mut order = Vec::with_capacity(closure.members.len());
        while let Some((_, node)) = ready.pop_first() {
            order.push(node);
            for dependent in dependents.get(&node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert((index(dependent), *dependent));
                    }
                }
            }
        }

        if order.len() != closure.members.len() {
            // Cycle members plus everything downstream of them.
            let mut nodes: Vec<Name> = in_degree
                .into_iter()
                .filter(|&(_, degree)| degree > 0)
                .map(|(name, _)| name)
                .collect();
            nodes.sort_by_key(index);
            return Err(GraphError::CyclicDependency { nodes });
        }
        Ok(order)
    }

    /// External nodes are sources, or the sink the graph is baked for.
    fn check_externals(&self, order: &[Name], closure: &Closure, target: Name) -> GraphResult<()> {
        let misplaced = order.iter().find(|&&name| {
            name != target && self.is_external(name) && !closure.dependencies[&name].is_empty()
        });
        match misplaced {
            Some(&name) => Err(GraphError::ExternalNodeHasDependencies(name)),
            None => Ok(()),
        }
    }

    fn allocate(&mut self, order: &[Name], closure: &Closure, target: Name) -> GraphResult<()> {
        let device = Arc::clone(&self.device);
        let device = &*device;
        let position: HashMap<Name, usize> =
            order.iter().enumerate().map(|(i, &name)| (name, i)).collect();

        for frame in &mut self.frames {
            for &name in order {
                let resources = match self.nodes.get_mut(&name).and_then(|e| e.node.as_mut()) {
                    None => NodeResources::external(),
                    Some(node) => {
                        let ctx = NodeContext {
                            device,
                            name,
                            resolution: self.resolution,
                            frame_index: frame.index(),
                        };
                        let mut resources = node.create_node_resources(&ctx)?;
                        resources.allocate(device, self.resolution, node.work_types())?;
                        resources
                    }
                };
                frame.nodes.insert(name, resources);
            }

            for &consumer in order {
                let mut inputs = closure.dependencies[&consumer].clone();
                inputs.sort_by_key(|dependency| position[dependency]);
                for producer in inputs {
                    let semaphore = device.create_semaphore()?;
                    frame
                        .node_mut(producer)
                        .signal_semaphores
                        .insert(consumer, semaphore);
                    frame.node_mut(consumer).wait_semaphores.push(semaphore);
                }
            }

            if !frame.node(target).is_external() {
                let semaphore = device.create_semaphore()?;
                frame.node_mut(target).target_semaphore = Some(semaphore);
                frame.target_semaphore = Some(semaphore);
            } else if !closure.dependencies[&target].is_empty() {
                frame.node_mut(target).allocate_completion_list(device)?;
            }
        }

        for frame in &mut self.frames {
            for &name in order {
                let Some(node) = self.nodes.get_mut(&name).and_then(|e| e.node.as_mut()) else {
                    continue;
                };
                let Some(mut resources) = frame.nodes.remove(&name) else {
                    continue;
                };
                let result = node.post_bake(&mut PostBakeContext {
                    device,
                    name,
                    frame: &*frame,
                    resources: &mut resources,
                });
                frame.nodes.insert(name, resources);
                result?;
            }
        }
        Ok(())
    }

    fn release_resources(&mut self) {
        for frame in &mut self.frames {
            frame.release_nodes(&*self.device);
            frame.state = FrameState::Empty;
        }
        self.order.clear();
        self.target = None;
    }

    /// Run every node's one-time `initialize` hook.
    pub fn initialize_nodes(&mut self) -> GraphResult<()> {
        if self.target.is_none() {
            return Err(GraphError::NotBaked);
        }
        if self.initialized {
            log::warn!("Render graph {:?} initialized twice", self.config.label);
        }
        for &name in &self.order {
            if let Some(node) = self.nodes.get_mut(&name).and_then(|e| e.node.as_mut()) {
                node.initialize(&*self.device)?;
            }
        }
        self.initialized = true;
        Ok(())
    }

    /// Record every node's commands for the active frame, in execution order.
    ///
    /// Never blocks. A frame still in flight must be awaited first.
    ///
    /// # Errors
    ///
    /// - [`GraphError::NotBaked`] before bake or after clean.
    /// - [`GraphError::FrameNotAwaited`] if the active frame is submitted or failed.
    /// - [`GraphError::CommandListNotFinished`] if a node left its list unfinished.
    /// - Any device error returned by a node.
    ///
    /// Node and list errors move the frame to [`FrameState::Failed`].
    pub fn record_command_lists(&mut self) -> GraphResult<()> {
        let active = self.active;
        let frame = &mut self.frames[active];
        match frame.state {
            FrameState::Empty | FrameState::Released => return Err(GraphError::NotBaked),
            FrameState::Recording | FrameState::Submitted | FrameState::Failed => {
                return Err(GraphError::FrameNotAwaited { frame: active })
            }
            FrameState::Baked | FrameState::Awaited | FrameState::Recorded => {}
        }

        frame.state = FrameState::Recording;
        log::trace!("Recording frame {} ({} nodes)", active, self.order.len());

        for &name in &self.order {
            let Some(node) = self.nodes.get_mut(&name).and_then(|e| e.node.as_mut()) else {
                if let Err(err) = frame.node_mut(name).record_completion() {
                    frame.state = FrameState::Failed;
                    return Err(err.into());
                }
                continue;
            };
            let Some(mut list) = frame.node_mut(name).take_command_list() else {
                continue;
            };
            let result = node.record_commands(&*frame, frame.node(name), &mut list);
            let finished = list.is_executable();
            frame.node_mut(name).put_command_list(list);

            if let Err(err) = result {
                frame.state = FrameState::Failed;
                return Err(err.into());
            }
            if !finished {
                frame.state = FrameState::Failed;
                return Err(GraphError::CommandListNotFinished(name));
            }
        }

        frame.state = FrameState::Recorded;
        Ok(())
    }

    /// Submit the active frame's command lists.
    ///
    /// Submissions follow execution order and are grouped according to the
    /// configured [`SubmitPolicy`](crate::config::SubmitPolicy). The frame's
    /// fence rides on the last submission.
    ///
    /// # Errors
    ///
    /// [`GraphError::NotBaked`] before bake, [`GraphError::NotRecorded`] unless
    /// the frame was just recorded. A device failure moves the frame to
    /// [`FrameState::Failed`] and is returned unchanged.
    pub fn execute(&mut self) -> GraphResult<()> {
        let active = self.active;
        let frame = &mut self.frames[active];
        match frame.state {
            FrameState::Empty | FrameState::Released => return Err(GraphError::NotBaked),
            FrameState::Recorded => {}
            _ => return Err(GraphError::NotRecorded { frame: active }),
        }

        match executor::submit_frame(
            &*self.device,
            &self.order,
            frame,
            self.config.submit_policy,
        ) {
            Ok(submissions) => {
                log::trace!("Frame {} submitted in {} submissions", active, submissions);
                frame.fence_pending = submissions > 0;
                frame.state = FrameState::Submitted;
                Ok(())
            }
            Err(err) => {
                log::trace!("Frame {} failed to submit: {}", active, err);
                frame.state = FrameState::Failed;
                Err(err)
            }
        }
    }

    /// Present swapchain image `framebuffer_index` once the active frame's
    /// target semaphore is signaled.
    pub fn present(&self, framebuffer_index: u32) -> GraphResult<()> {
        let frame = &self.frames[self.active];
        match frame.state {
            FrameState::Submitted => {}
            FrameState::Empty | FrameState::Released => return Err(GraphError::NotBaked),
            _ => return Err(GraphError::NotRecorded { frame: self.active }),
        }
        let semaphore = frame.target_semaphore().ok_or_else(|| {
            DeviceError::PresentFailed(format!(
                "render graph {:?} has an external target",
                self.config.label
            ))
        })?;
        self.device.present(semaphore, framebuffer_index)?;
        Ok(())
    }

    /// Block until the active frame's GPU work is finished.
    ///
    /// Returns immediately unless the frame is submitted or failed. For a
    /// failed frame it waits for device idle, replaces the frame's semaphores
    /// (a partial submission can leave signals pending) and resets its command
    /// lists.
    pub fn await_frame(&mut self) -> GraphResult<()> {
        self.await_frame_at(self.active)
    }

    fn await_frame_at(&mut self, index: usize) -> GraphResult<()> {
        let device = &*self.device;
        let frame = &mut self.frames[index];
        match frame.state {
            FrameState::Submitted => {
                if frame.fence_pending {
                    log::trace!("Waiting for frame {} fence", index);
                    if let Err(err) = device.wait_fence(frame.fence()) {
                        frame.state = FrameState::Failed;
                        return Err(err.into());
                    }
                    frame.fence_pending = false;
                }
                frame.state = FrameState::Awaited;
            }
            FrameState::Failed => {
                log::trace!("Recovering failed frame {}", index);
                device.await_all()?;
                frame.recreate_semaphores(device)?;
                for resources in frame.nodes.values_mut() {
                    resources.reset_command_list();
                }
                frame.fence_pending = false;
                frame.state = FrameState::Awaited;
            }
            _ => {}
        }
        Ok(())
    }

    fn await_frames(&mut self) -> GraphResult<()> {
        for index in 0..FRAMES_IN_FLIGHT {
            self.await_frame_at(index)?;
        }
        Ok(())
    }

    /// Make the other frame in flight active.
    pub fn swap_frames(&mut self) {
        self.active = (self.active + 1) % FRAMES_IN_FLIGHT;
        log::trace!("Active frame is now {}", self.active);
    }

    /// Resize every framebuffer without a fixed resolution.
    ///
    /// Waits for both frames in flight, recreates the affected framebuffers,
    /// then calls every node's `update_resolution` hook. Before bake this only
    /// sets the resolution used by the next bake.
    pub fn update_resolution(&mut self, resolution: Resolution) -> GraphResult<()> {
        self.await_frames()?;
        self.resolution = resolution;

        let device = &*self.device;
        let mut resized = 0;
        for frame in &mut self.frames {
            for resources in frame.nodes.values_mut() {
                resized += resources.resize(device, resolution)?;
            }
        }
        for name in &self.registration {
            if let Some(node) = self.nodes.get_mut(name).and_then(|e| e.node.as_mut()) {
                node.update_resolution(resolution);
            }
        }
        log::debug!(
            "Render graph {:?} resized to {} ({} framebuffers recreated)",
            self.config.label,
            resolution,
            resized
        );
        Ok(())
    }

    /// Set or clear a flag in the active frame.
    pub fn set_flag(&mut self, flag: Name, enabled: bool) {
        self.frames[self.active].set_flag(flag, enabled);
    }

    /// Whether `flag` is set in the active frame.
    pub fn has_flag(&self, flag: Name) -> bool {
        self.frames[self.active].has_flag(flag)
    }

    /// Release every device object and call every node's `clean` hook.
    ///
    /// Waits for device idle first. Must run before the device is destroyed;
    /// `Drop` calls it if it was not called. Calling it twice is a no-op.
    pub fn clean(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.device.await_all() {
            log::warn!("Device did not go idle while cleaning: {}", err);
        }

        let device = &*self.device;
        for frame in &mut self.frames {
            frame.release_nodes(device);
            device.destroy_fence(frame.fence());
            frame.state = FrameState::Released;
        }
        for name in &self.registration {
            if let Some(node) = self.nodes.get_mut(name).and_then(|e| e.node.as_mut()) {
                node.clean(device);
            }
        }

        self.order.clear();
        self.target = None;
        self.released = true;
        log::info!("Render graph {:?} cleaned", self.config.label);
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Current swapchain resolution.
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Nodes of the baked graph, dependencies first. Empty before bake.
    pub fn execution_order(&self) -> &[Name] {
        &self.order
    }

    /// The node the graph was baked for.
    pub fn target(&self) -> Option<Name> {
        self.target
    }

    pub fn is_baked(&self) -> bool {
        self.target.is_some()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Index of the active frame in flight.
    pub fn frame_index(&self) -> usize {
        self.active
    }

    pub fn frame_state(&self) -> FrameState {
        self.frames[self.active].state()
    }

    pub fn active_frame_resources(&self) -> &FrameResources {
        &self.frames[self.active]
    }

    /// Resources of frame in flight `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= FRAMES_IN_FLIGHT`.
    pub fn frame_resources(&self, index: usize) -> &FrameResources {
        &self.frames[index]
    }

    /// Semaphore the active frame's presentation waits on.
    ///
    /// `None` before bake and when the target is an external node.
    pub fn target_semaphore(&self) -> Option<Semaphore> {
        self.frames[self.active].target_semaphore()
    }

    /// Semaphore `parent` signals toward `child` in the active frame.
    ///
    /// # Panics
    ///
    /// Panics if `child` does not depend on `parent` in the baked graph.
    pub fn semaphore(&self, parent: Name, child: Name) -> Semaphore {
        self.frames[self.active].semaphore(parent, child)
    }

    /// Triangles recorded by `node` in the active frame.
    ///
    /// # Panics
    ///
    /// Panics if `node` is not part of the baked graph.
    pub fn triangle_count(&self, node: Name) -> u64 {
        self.frames[self.active].node(node).triangle_count()
    }

    /// Semaphores the external node `name` must signal in the active frame,
    /// ordered by consumer name.
    ///
    /// # Panics
    ///
    /// Panics if `name` is not an external node of the baked graph.
    pub fn external_signal_semaphores(&self, name: Name) -> Vec<Semaphore> {
        let resources = self.external_resources(name);
        resources.signal_semaphores().map(|(_, sem)| sem).collect()
    }

    fn external_resources(&self, name: Name) -> &NodeResources {
        let resources = self.frames[self.active].node(name);
        assert!(resources.is_external(), "Render node {name} is not external");
        resources
    }
}

impl Drop for RenderGraph {
    fn drop(&mut self) {
        if !self.released {
            log::warn!(
                "Render graph {:?} dropped without clean, cleaning now",
                self.config.label
            );
            self.clean();
        }
    }
}
