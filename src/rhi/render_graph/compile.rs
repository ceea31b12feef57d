//! Graph compilation: version edges, validation, usage spans and the
//! orchestration of scheduling, barrier planning and GPU-side setup.

use super::super::rhi_enums::RenderGraphError;
use super::super::version_registry::{ResourceId, ResourceVersion, ResourceVersionRegistry};
use super::attachments::plan_attachments;
use super::barrier::{plan_barriers, ResourceQuery};
use super::schedule::{schedule_to_queues, QueueLayout};
use super::{RenderGraph, RenderResource, ResourceKind, UsageSpan};
use super::super::vulkan::{CommandPool, Device, TimelineSemaphore};
use log::error;
use std::collections::HashMap;

impl ResourceQuery for ResourceVersionRegistry<RenderResource> {
    fn resource_id(&self, version: ResourceVersion) -> ResourceId {
        ResourceVersionRegistry::resource_id(self, version)
    }

    fn kind(&self, id: ResourceId) -> ResourceKind {
        self.resource_by_id(id).kind()
    }
}

/// Runs every CPU-side compile step on the graph.
pub(crate) fn compile(
    graph: &mut RenderGraph,
    layout: &QueueLayout,
) -> Result<(), RenderGraphError> {
    build_version_edges(graph);
    validate_accesses(graph)?;

    graph.order = graph
        .dag
        .topological_sort()
        .map_err(|_| RenderGraphError::Cycle)?;

    compute_usage_spans(graph);
    accumulate_transient_usage(graph);

    let (render_passes, node_render_pass) = {
        let registry = &graph.registry;
        let transient_textures = &graph.transient_texture_infos;

        let is_attachable = |version: ResourceVersion| {
            let id = registry.resource_id(version);
            match registry.resource_by_id(id).kind() {
                ResourceKind::Texture => true,
                ResourceKind::Null => transient_textures.contains_key(&id),
                _ => false,
            }
        };

        let texture_desc = |version: ResourceVersion| {
            if let RenderResource::Texture(slot) = registry.resource_by_version(version) {
                return Some(slot.texture.info().clone());
            }

            let id = registry.resource_id(version);
            transient_textures.get(&id).map(|info| info.resolved())
        };

        plan_attachments(&graph.dag, &is_attachable, &texture_desc)?
    };
    graph.render_passes = render_passes;
    graph.node_render_pass = node_render_pass;

    graph.schedule = schedule_to_queues(&graph.dag, &graph.order, layout);

    graph.barriers = plan_barriers(
        &graph.dag,
        &graph.order.depths,
        &graph.schedule,
        &graph.registry,
        &graph.imported_usages,
        &graph.usage_spans,
    );

    Ok(())
}

/// Creates the per-queue timeline semaphores and the command pool grid.
pub(crate) fn init_gpu_state(graph: &mut RenderGraph, device: &Device) {
    let shared = device.shared();

    // Timeline values per frame must exceed the largest submission count so
    // that frame-biased values never collide.
    let max_per_frame = graph.schedule.max_submission_count() + 1;

    graph.semaphores.clear();
    for queue in 0..graph.schedule.queue_count {
        match TimelineSemaphore::new(shared.clone(), max_per_frame) {
            Ok(semaphore) => {
                shared.set_debug_name(
                    semaphore.raw(),
                    &format!("RenderGraph({})::semaphores[{}]", graph.name, queue),
                );
                graph.semaphores.push(semaphore);
            }
            Err(err) => error!(
                "failed to create the timeline semaphore for queue {}: {}",
                queue, err
            ),
        }
    }

    match CommandPool::new(
        shared.clone(),
        device.frames_in_flight(),
        graph.schedule.queue_count,
    ) {
        Ok(pool) => graph.command_pool = Some(pool),
        Err(err) => error!("failed to create the render graph command pool: {}", err),
    }

    graph.shared = Some(shared);
}

/// Adds the edge `u -> v` for every resource version written by `u` and read
/// by `v`. Writes never form edges to writes: the single-writer invariant
/// makes write conflicts impossible.
pub(crate) fn build_version_edges(graph: &mut RenderGraph) {
    let mut writers: HashMap<ResourceVersion, u32> = HashMap::new();
    for handle in graph.dag.handles() {
        for write in &graph.dag.node(handle).write {
            writers.insert(write.version, handle);
        }
    }

    let mut edges = Vec::new();
    for handle in graph.dag.handles() {
        for read in &graph.dag.node(handle).read {
            if let Some(&writer) = writers.get(&read.version) {
                if writer != handle {
                    edges.push((writer, handle));
                }
            }
        }
    }

    for (from, to) in edges {
        graph.dag.add_edge(from, to);
    }
}

fn validate_accesses(graph: &RenderGraph) -> Result<(), RenderGraphError> {
    /* Single writer per version. */
    let mut writers: HashMap<ResourceVersion, u32> = HashMap::new();
    for handle in graph.dag.handles() {
        for write in &graph.dag.node(handle).write {
            if let Some(&previous) = writers.get(&write.version) {
                if previous != handle {
                    return Err(RenderGraphError::DoubleWriter(write.version));
                }
            }
            writers.insert(write.version, handle);
        }
    }

    /* Every accessed version must have been handed out by the builder. */
    let version_count = graph.registry.version_count();
    for handle in graph.dag.handles() {
        let node = graph.dag.node(handle);
        let versions = node
            .read
            .iter()
            .map(|read| read.version)
            .chain(node.write.iter().map(|write| write.version));

        for version in versions {
            if version == 0 || version >= version_count {
                return Err(RenderGraphError::DanglingRead(version));
            }
        }
    }

    Ok(())
}

/// Records, per resource id, the earliest and latest usage by dependency
/// level together with the states observed there.
fn compute_usage_spans(graph: &mut RenderGraph) {
    let mut spans: HashMap<ResourceId, UsageSpan> = HashMap::new();

    for handle in graph.dag.handles() {
        let level = graph.order.depths[handle as usize];
        let node = graph.dag.node(handle);

        let accesses = node
            .read
            .iter()
            .map(|read| (read.version, read.state))
            .chain(node.write.iter().map(|write| (write.version, write.state)));

        for (version, state) in accesses {
            let id = graph.registry.resource_id(version);
            let span = spans.entry(id).or_insert_with(UsageSpan::default);

            let first_level = span
                .first_node
                .map(|node| graph.order.depths[node as usize]);
            if first_level.map_or(true, |first| level < first) {
                span.first_node = Some(handle);
                span.first_state = state;
            }

            let last_level = span.last_node.map(|node| graph.order.depths[node as usize]);
            if last_level.map_or(true, |last| level > last) {
                span.last_node = Some(handle);
                span.last_state = state;
            }
        }
    }

    graph.usage_spans = spans;
}

/// A transient's usage mask is the union of every state the graph observes
/// on it.
fn accumulate_transient_usage(graph: &mut RenderGraph) {
    for handle in graph.dag.handles() {
        let node = graph.dag.node(handle);

        let accesses: Vec<_> = node
            .read
            .iter()
            .map(|read| (read.version, read.state))
            .chain(node.write.iter().map(|write| (write.version, write.state)))
            .collect();

        for (version, state) in accesses {
            let id = graph.registry.resource_id(version);

            if let Some(info) = graph.transient_texture_infos.get_mut(&id) {
                info.usage |= state;
            }
            if let Some(info) = graph.transient_buffer_infos.get_mut(&id) {
                info.usage |= state;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::super::rhi_enums::*;
    use super::super::{Node, ResourceRead, ResourceWrite};
    use super::*;

    struct TestGraph {
        graph: RenderGraph,
    }

    impl TestGraph {
        fn new() -> Self {
            TestGraph {
                graph: RenderGraph::new(),
            }
        }

        fn declare(&mut self) -> ResourceVersion {
            self.graph.registry.declare_resource()
        }

        fn bump(&mut self, version: ResourceVersion) -> ResourceVersion {
            self.graph.registry.next_version(version)
        }

        fn node(
            &mut self,
            name: &str,
            reads: Vec<(ResourceVersion, ResourceState)>,
            writes: Vec<(ResourceVersion, ResourceState)>,
        ) -> u32 {
            let handle = self.graph.dag.add_node(Node {
                job_type: JobType::Compute,
                capabilities: Capability::COMPUTE,
                is_async: false,
                name: name.to_owned(),
                read: reads
                    .into_iter()
                    .map(|(version, state)| ResourceRead { version, state })
                    .collect(),
                write: writes
                    .into_iter()
                    .map(|(version, state)| ResourceWrite {
                        version,
                        state,
                        load: AttachmentLoad::DontCare,
                        store: AttachmentStore::Store,
                    })
                    .collect(),
            });
            self.graph.jobs.push(None);
            handle
        }

        fn compile(&mut self) -> Result<(), RenderGraphError> {
            compile(&mut self.graph, &QueueLayout::single_queue())
        }
    }

    /// Property 1: edges follow shared versions, and the sorted order and
    /// dependency levels respect them.
    #[test]
    fn version_edges_connect_writer_to_reader() {
        let mut test = TestGraph::new();
        let buffer = test.declare();
        let produced = test.bump(buffer);

        let producer = test.node(
            "produce",
            vec![],
            vec![(produced, ResourceState::STORAGE_BUFFER_WRITE)],
        );
        let consumer = test.node(
            "consume",
            vec![(produced, ResourceState::UNIFORM_BUFFER)],
            vec![],
        );

        test.compile().unwrap();

        assert_eq!(test.graph.dag.adjacency(producer), &[consumer]);
        assert!(
            test.graph.dependency_level(producer) < test.graph.dependency_level(consumer)
        );

        let producer_pos = test
            .graph
            .order
            .sorted
            .iter()
            .position(|&h| h == producer)
            .unwrap();
        let consumer_pos = test
            .graph
            .order
            .sorted
            .iter()
            .position(|&h| h == consumer)
            .unwrap();
        assert!(producer_pos < consumer_pos);
    }

    /// Property 2: two writers of one version fail the build.
    #[test]
    fn double_writer_is_rejected() {
        let mut test = TestGraph::new();
        let buffer = test.declare();

        test.node(
            "first",
            vec![],
            vec![(buffer, ResourceState::STORAGE_BUFFER_WRITE)],
        );
        test.node(
            "second",
            vec![],
            vec![(buffer, ResourceState::STORAGE_BUFFER_WRITE)],
        );

        assert_eq!(
            test.compile().unwrap_err(),
            RenderGraphError::DoubleWriter(buffer)
        );
    }

    #[test]
    fn dangling_read_is_rejected() {
        let mut test = TestGraph::new();
        test.node("read", vec![(99, ResourceState::UNIFORM_BUFFER)], vec![]);

        assert_eq!(
            test.compile().unwrap_err(),
            RenderGraphError::DanglingRead(99)
        );
    }

    #[test]
    fn cycles_are_rejected() {
        let mut test = TestGraph::new();
        let a = test.declare();
        let b = test.declare();

        test.node(
            "ping",
            vec![(b, ResourceState::STORAGE_BUFFER_READ)],
            vec![(a, ResourceState::STORAGE_BUFFER_WRITE)],
        );
        test.node(
            "pong",
            vec![(a, ResourceState::STORAGE_BUFFER_READ)],
            vec![(b, ResourceState::STORAGE_BUFFER_WRITE)],
        );

        assert_eq!(test.compile().unwrap_err(), RenderGraphError::Cycle);
    }

    /// Usage spans record the earliest and latest usage by dependency level.
    #[test]
    fn usage_spans_track_first_and_last_use() {
        let mut test = TestGraph::new();
        let buffer = test.declare();
        let id = test.graph.registry.resource_id(buffer);
        let produced = test.bump(buffer);
        let reduced = test.bump(produced);

        let producer = test.node(
            "produce",
            vec![],
            vec![(produced, ResourceState::STORAGE_BUFFER_WRITE)],
        );
        test.node(
            "reduce",
            vec![(produced, ResourceState::STORAGE_BUFFER_READ)],
            vec![(reduced, ResourceState::STORAGE_BUFFER_WRITE)],
        );
        let consumer = test.node(
            "consume",
            vec![(reduced, ResourceState::UNIFORM_BUFFER)],
            vec![],
        );

        test.compile().unwrap();

        let span = test.graph.usage_spans[&id];
        assert_eq!(span.first_node, Some(producer));
        assert_eq!(span.first_state, ResourceState::STORAGE_BUFFER_WRITE);
        assert_eq!(span.last_node, Some(consumer));
        assert_eq!(span.last_state, ResourceState::UNIFORM_BUFFER);
    }

    /// Property 8: compiling an unchanged graph twice yields the same order,
    /// schedule and barrier plan.
    #[test]
    fn compile_is_idempotent() {
        let mut test = TestGraph::new();
        let buffer = test.declare();
        let produced = test.bump(buffer);

        test.node(
            "produce",
            vec![],
            vec![(produced, ResourceState::STORAGE_BUFFER_WRITE)],
        );
        test.node(
            "consume",
            vec![(produced, ResourceState::UNIFORM_BUFFER)],
            vec![],
        );

        test.compile().unwrap();
        let first_order = test.graph.order.clone();
        let first_schedule = test.graph.schedule.clone();
        let first_barriers = test.graph.barriers.clone();

        test.compile().unwrap();
        assert_eq!(test.graph.order, first_order);
        assert_eq!(test.graph.schedule, first_schedule);
        assert_eq!(test.graph.barriers, first_barriers);
    }
}
