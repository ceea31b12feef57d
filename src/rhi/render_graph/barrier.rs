//! Derives image and buffer barriers from per-node resource accesses.
//!
//! The planner walks submissions in dependency-level order across queues and
//! tracks the last usage of every resource. Barriers are planned at the flag
//! level only; binding them to concrete images and buffers is deferred to
//! the link phase so that transient re-creation and late re-imports never
//! invalidate the plan itself.

use super::super::dag::{Dag, NodeHandle};
use super::super::rhi_enums::ResourceState;
use super::super::version_registry::{ResourceId, ResourceVersion};
use super::super::vulkan::vulkan_utils::{vk_access_flags, vk_image_layout, vk_pipeline_stage};
use super::schedule::SchedulePlan;
use super::{ImportedUsage, Node, ResourceKind, UsageSpan};
use ash::vk;
use std::collections::HashMap;

/// Lookup of resource identities and kinds, satisfied by the render graph's
/// registry.
pub(crate) trait ResourceQuery {
    fn resource_id(&self, version: ResourceVersion) -> ResourceId;
    fn kind(&self, id: ResourceId) -> ResourceKind;
}

/// A planned image barrier; the image and subresource range are bound later.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct ImageBarrier {
    pub resource: ResourceId,
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub old_layout: vk::ImageLayout,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
    pub new_layout: vk::ImageLayout,
}

/// A planned buffer (or buffer-pack) barrier; buffers are bound later, and
/// pack barriers expand over the pack membership at execution time.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct BufferBarrier {
    pub resource: ResourceId,
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

/// `begin`/`count` range into one of the shared barrier arrays.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub(crate) struct BarrierRange {
    pub begin: u32,
    pub count: u32,
}

/// Barrier ranges of one node.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub(crate) struct NodeBarriers {
    pub in_image: BarrierRange,
    pub out_image: BarrierRange,
    pub in_buffer: BarrierRange,
    pub in_pack: BarrierRange,
}

/// The complete barrier plan of a compiled graph.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub(crate) struct BarrierPlan {
    pub image_barriers: Vec<ImageBarrier>,
    pub buffer_barriers: Vec<BufferBarrier>,
    pub pack_barriers: Vec<BufferBarrier>,
    /// Indexed by node handle.
    pub per_node: Vec<NodeBarriers>,
}

#[derive(Debug, Clone, Copy)]
struct Usage {
    layout: vk::ImageLayout,
    access: vk::AccessFlags2,
    stages: vk::PipelineStageFlags2,
    node: Option<NodeHandle>,
}

struct Planner<'a, Q: ResourceQuery> {
    dag: &'a Dag<Node>,
    query: &'a Q,
    imported: &'a HashMap<ResourceId, ImportedUsage>,
    spans: &'a HashMap<ResourceId, UsageSpan>,
    last_usages: HashMap<ResourceId, Usage>,
    plan: BarrierPlan,
}

/// Plans every barrier of the graph given its schedule.
pub(crate) fn plan_barriers<Q: ResourceQuery>(
    dag: &Dag<Node>,
    depths: &[u32],
    schedule: &SchedulePlan,
    query: &Q,
    imported: &HashMap<ResourceId, ImportedUsage>,
    spans: &HashMap<ResourceId, UsageSpan>,
) -> BarrierPlan {
    let mut planner = Planner {
        dag,
        query,
        imported,
        spans,
        last_usages: HashMap::new(),
        plan: BarrierPlan {
            image_barriers: Vec::new(),
            buffer_barriers: Vec::new(),
            pack_barriers: Vec::new(),
            per_node: vec![NodeBarriers::default(); dag.len()],
        },
    };

    /* Imported textures enter the frame in their declared initial state. */
    for (&id, usage) in imported {
        if planner.query.kind(id) != ResourceKind::Texture {
            continue;
        }

        planner.last_usages.insert(
            id,
            Usage {
                layout: vk_image_layout(usage.initial),
                access: vk_access_flags(usage.initial),
                stages: vk::PipelineStageFlags2::TOP_OF_PIPE,
                node: None,
            },
        );
    }

    /* Walk submissions monotonically across queues: always advance the queue
     * whose next submission has the lowest dependency level. */
    let queue_count = schedule.queue_count as usize;
    let mut cur_submit = vec![0usize; queue_count];
    let mut cur_node = vec![0usize; queue_count];

    loop {
        let mut next_queue = None;
        for queue in 0..queue_count {
            if cur_submit[queue] >= schedule.submissions_per_queue[queue].len() {
                continue;
            }

            let level = schedule.submissions_per_queue[queue][cur_submit[queue]].level;
            match next_queue {
                Some((_, best_level)) if best_level <= level => {}
                _ => next_queue = Some((queue, level)),
            }
        }

        let (queue, submission_level) = match next_queue {
            Some((queue, level)) => (queue, level),
            None => break,
        };

        while cur_node[queue] < schedule.nodes_per_queue[queue].len() {
            let handle = schedule.nodes_per_queue[queue][cur_node[queue]];
            if depths[handle as usize] > submission_level {
                break;
            }

            planner.plan_node(handle);
            cur_node[queue] += 1;
        }

        cur_submit[queue] += 1;
    }

    planner.plan
}

impl<'a, Q: ResourceQuery> Planner<'a, Q> {
    fn plan_node(&mut self, handle: NodeHandle) {
        let node = self.dag.node(handle);

        let in_image_begin = self.plan.image_barriers.len() as u32;
        let in_buffer_begin = self.plan.buffer_barriers.len() as u32;
        let in_pack_begin = self.plan.pack_barriers.len() as u32;

        for read in &node.read {
            self.add_in_barriers(handle, read.version, read.state);
        }
        for write in &node.write {
            self.add_in_barriers(handle, write.version, write.state);
        }

        self.plan.per_node[handle as usize].in_image = BarrierRange {
            begin: in_image_begin,
            count: self.plan.image_barriers.len() as u32 - in_image_begin,
        };
        self.plan.per_node[handle as usize].in_buffer = BarrierRange {
            begin: in_buffer_begin,
            count: self.plan.buffer_barriers.len() as u32 - in_buffer_begin,
        };
        self.plan.per_node[handle as usize].in_pack = BarrierRange {
            begin: in_pack_begin,
            count: self.plan.pack_barriers.len() as u32 - in_pack_begin,
        };

        let out_image_begin = self.plan.image_barriers.len() as u32;

        for write in &node.write {
            self.add_out_image_barrier(handle, write.version);
        }

        self.plan.per_node[handle as usize].out_image = BarrierRange {
            begin: out_image_begin,
            count: self.plan.image_barriers.len() as u32 - out_image_begin,
        };
    }

    fn add_in_barriers(
        &mut self,
        handle: NodeHandle,
        version: ResourceVersion,
        state: ResourceState,
    ) {
        let id = self.query.resource_id(version);
        match self.query.kind(id) {
            ResourceKind::Texture => self.add_in_image_barrier(handle, id, state),
            ResourceKind::Buffer => self.add_in_buffer_barrier(handle, id, state, false),
            ResourceKind::BufferPack => self.add_in_buffer_barrier(handle, id, state, true),
            ResourceKind::Null => {}
        }
    }

    fn add_in_image_barrier(
        &mut self,
        handle: NodeHandle,
        id: ResourceId,
        state: ResourceState,
    ) {
        let node = self.dag.node(handle);

        let new_layout = vk_image_layout(state);
        let dst_access = vk_access_flags(state);
        let dst_stage = vk_pipeline_stage(node.job_type, state);

        /* Pure layout-preserving accesses need no barrier. */
        if let Some(usage) = self.last_usages.get(&id) {
            if usage.layout == new_layout {
                return;
            }
        }

        let mut src_stage = vk::PipelineStageFlags2::BOTTOM_OF_PIPE;
        let mut src_access = vk::AccessFlags2::NONE;
        let mut old_layout = new_layout;

        let span = self.spans.get(&id).copied().unwrap_or_default();
        let is_first_node = span.first_node == Some(handle);
        let import = self.imported.get(&id);

        if is_first_node {
            if let Some(import) = import {
                src_stage = vk::PipelineStageFlags2::BOTTOM_OF_PIPE;
                src_access = vk_access_flags(import.initial);
                old_layout = vk_image_layout(import.initial);
            } else if let Some(last_node) = span.last_node {
                // The span wraps around within the frame: the first use of a
                // transient sources from its state at the end of the previous
                // execution, gated by the in-flight fence.
                src_stage =
                    vk_pipeline_stage(self.dag.node(last_node).job_type, span.last_state);
                src_access = vk_access_flags(span.last_state);
                old_layout = vk_image_layout(span.last_state);
            }
        }

        if let Some(usage) = self.last_usages.get(&id) {
            src_stage = usage.stages;
            src_access = usage.access;
            old_layout = usage.layout;
        }

        self.last_usages.insert(
            id,
            Usage {
                layout: new_layout,
                access: dst_access,
                stages: dst_stage,
                node: Some(handle),
            },
        );

        self.plan.image_barriers.push(ImageBarrier {
            resource: id,
            src_stage,
            src_access,
            old_layout,
            dst_stage,
            dst_access,
            new_layout,
        });
    }

    fn add_in_buffer_barrier(
        &mut self,
        handle: NodeHandle,
        id: ResourceId,
        state: ResourceState,
        is_pack: bool,
    ) {
        let node = self.dag.node(handle);

        let dst_stage = vk_pipeline_stage(node.job_type, state);
        let dst_access = vk_access_flags(state);

        let last = match self.last_usages.get(&id) {
            Some(last) => *last,
            None => {
                self.last_usages.insert(
                    id,
                    Usage {
                        layout: vk::ImageLayout::UNDEFINED,
                        access: dst_access,
                        stages: dst_stage,
                        node: Some(handle),
                    },
                );
                return;
            }
        };

        if last.node == Some(handle) {
            return;
        }

        // A plain buffer only needs a barrier when the access set changes; a
        // pack is always barriered since its membership is dynamic.
        if !is_pack && last.access == dst_access {
            return;
        }

        self.last_usages.insert(
            id,
            Usage {
                layout: vk::ImageLayout::UNDEFINED,
                access: dst_access,
                stages: dst_stage,
                node: Some(handle),
            },
        );

        let barrier = BufferBarrier {
            resource: id,
            src_stage: last.stages,
            src_access: last.access,
            dst_stage,
            dst_access,
        };

        if is_pack {
            self.plan.pack_barriers.push(barrier);
        } else {
            self.plan.buffer_barriers.push(barrier);
        }
    }

    fn add_out_image_barrier(&mut self, handle: NodeHandle, version: ResourceVersion) {
        let id = self.query.resource_id(version);
        if self.query.kind(id) != ResourceKind::Texture {
            return;
        }

        let import = match self.imported.get(&id) {
            Some(import) => *import,
            None => return,
        };

        let span = self.spans.get(&id).copied().unwrap_or_default();
        if span.last_node != Some(handle) || import.final_state == ResourceState::UNDEFINED {
            return;
        }

        let last = match self.last_usages.get(&id) {
            Some(last) => *last,
            None => return,
        };

        self.plan.image_barriers.push(ImageBarrier {
            resource: id,
            src_stage: last.stages,
            src_access: last.access,
            old_layout: last.layout,
            dst_stage: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            dst_access: vk_access_flags(import.final_state),
            new_layout: vk_image_layout(import.final_state),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::super::super::rhi_enums::*;
    use super::super::schedule::{schedule_to_queues, QueueLayout};
    use super::super::{Node, ResourceRead, ResourceWrite};
    use super::*;

    struct StubQuery {
        kinds: HashMap<ResourceId, ResourceKind>,
        version_to_id: HashMap<ResourceVersion, ResourceId>,
    }

    impl ResourceQuery for StubQuery {
        fn resource_id(&self, version: ResourceVersion) -> ResourceId {
            self.version_to_id[&version]
        }

        fn kind(&self, id: ResourceId) -> ResourceKind {
            self.kinds[&id]
        }
    }

    struct Fixture {
        dag: Dag<Node>,
        query: StubQuery,
        imported: HashMap<ResourceId, ImportedUsage>,
        spans: HashMap<ResourceId, UsageSpan>,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                dag: Dag::new(),
                query: StubQuery {
                    kinds: HashMap::new(),
                    version_to_id: HashMap::new(),
                },
                imported: HashMap::new(),
                spans: HashMap::new(),
            }
        }

        fn resource(&mut self, id: ResourceId, kind: ResourceKind, versions: &[ResourceVersion]) {
            self.query.kinds.insert(id, kind);
            for &version in versions {
                self.query.version_to_id.insert(version, id);
            }
        }

        fn node(&mut self, job_type: JobType, is_async: bool) -> NodeHandle {
            self.dag.add_node(Node {
                job_type,
                capabilities: Capability::all(),
                is_async,
                name: String::new(),
                read: Vec::new(),
                write: Vec::new(),
            })
        }

        fn read(&mut self, node: NodeHandle, version: ResourceVersion, state: ResourceState) {
            self.dag
                .node_mut(node)
                .read
                .push(ResourceRead { version, state });
        }

        fn write(&mut self, node: NodeHandle, version: ResourceVersion, state: ResourceState) {
            self.dag.node_mut(node).write.push(ResourceWrite {
                version,
                state,
                load: AttachmentLoad::DontCare,
                store: AttachmentStore::Store,
            });
        }

        fn span(
            &mut self,
            id: ResourceId,
            first: NodeHandle,
            first_state: ResourceState,
            last: NodeHandle,
            last_state: ResourceState,
        ) {
            self.spans.insert(
                id,
                UsageSpan {
                    first_node: Some(first),
                    first_state,
                    last_node: Some(last),
                    last_state,
                },
            );
        }

        fn plan(&self, layout: &QueueLayout) -> BarrierPlan {
            let order = self.dag.topological_sort().unwrap();
            let schedule = schedule_to_queues(&self.dag, &order, layout);
            plan_barriers(
                &self.dag,
                &order.depths,
                &schedule,
                &self.query,
                &self.imported,
                &self.spans,
            )
        }
    }

    /// S1: a single pass clearing an imported color target. One in-barrier
    /// `UNDEFINED -> COLOR_ATTACHMENT_OPTIMAL`, one out-barrier to
    /// `PRESENT_SRC_KHR`.
    #[test]
    fn single_pass_clear_barriers() {
        let mut fx = Fixture::new();
        let pass = fx.node(JobType::RenderPass, false);
        fx.resource(1, ResourceKind::Texture, &[1]);
        fx.write(pass, 1, ResourceState::COLOR_TARGET);
        fx.imported.insert(
            1,
            ImportedUsage {
                initial: ResourceState::UNDEFINED,
                final_state: ResourceState::PRESENT_TEXTURE,
            },
        );
        fx.span(
            1,
            pass,
            ResourceState::COLOR_TARGET,
            pass,
            ResourceState::COLOR_TARGET,
        );

        let plan = fx.plan(&QueueLayout::single_queue());

        assert_eq!(plan.image_barriers.len(), 2);

        let node_barriers = plan.per_node[pass as usize];
        assert_eq!(node_barriers.in_image.count, 1);
        assert_eq!(node_barriers.out_image.count, 1);

        let in_barrier = plan.image_barriers[node_barriers.in_image.begin as usize];
        assert_eq!(in_barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(in_barrier.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(
            in_barrier.dst_stage,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT
        );

        let out_barrier = plan.image_barriers[node_barriers.out_image.begin as usize];
        assert_eq!(out_barrier.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(out_barrier.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    /// Property 4: equal-state successive accesses emit no barrier.
    #[test]
    fn equal_layout_accesses_are_skipped() {
        let mut fx = Fixture::new();
        let first = fx.node(JobType::RenderPass, false);
        let second = fx.node(JobType::RenderPass, false);
        fx.dag.add_edge(first, second);

        fx.resource(1, ResourceKind::Texture, &[1]);
        fx.resource(2, ResourceKind::Buffer, &[2, 3]);
        fx.read(first, 1, ResourceState::SHADER_SAMPLED);
        fx.read(second, 1, ResourceState::SHADER_SAMPLED);
        // An unrelated buffer chain produces the edge between the nodes.
        fx.write(first, 2, ResourceState::STORAGE_BUFFER_WRITE);
        fx.read(second, 2, ResourceState::STORAGE_BUFFER_READ);

        fx.imported.insert(
            1,
            ImportedUsage {
                initial: ResourceState::SHADER_SAMPLED,
                final_state: ResourceState::UNDEFINED,
            },
        );
        fx.span(
            1,
            first,
            ResourceState::SHADER_SAMPLED,
            second,
            ResourceState::SHADER_SAMPLED,
        );
        fx.span(
            2,
            first,
            ResourceState::STORAGE_BUFFER_WRITE,
            second,
            ResourceState::STORAGE_BUFFER_READ,
        );

        let plan = fx.plan(&QueueLayout::single_queue());

        // The sampled texture never changes layout: no image barriers at all.
        assert!(plan.image_barriers.is_empty());
        // The buffer changes access: exactly one barrier, at the consumer.
        assert_eq!(plan.buffer_barriers.len(), 1);
        assert_eq!(plan.per_node[second as usize].in_buffer.count, 1);
    }

    /// S2: async compute writes a storage buffer, the render pass reads it
    /// as a uniform buffer. One buffer barrier at the consumer with compute
    /// source stage and vertex/fragment destination stages.
    #[test]
    fn async_compute_buffer_handoff() {
        let mut fx = Fixture::new();
        let compute = fx.node(JobType::Compute, true);
        let pass = fx.node(JobType::RenderPass, false);
        fx.dag.add_edge(compute, pass);

        fx.resource(1, ResourceKind::Buffer, &[1, 2]);
        fx.write(compute, 2, ResourceState::STORAGE_BUFFER_WRITE);
        fx.read(pass, 2, ResourceState::UNIFORM_BUFFER);
        fx.span(
            1,
            compute,
            ResourceState::STORAGE_BUFFER_WRITE,
            pass,
            ResourceState::UNIFORM_BUFFER,
        );

        let plan = fx.plan(&QueueLayout::full());

        assert_eq!(plan.buffer_barriers.len(), 1);
        let barrier = plan.buffer_barriers[0];
        assert_eq!(barrier.src_stage, vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert_eq!(barrier.src_access, vk::AccessFlags2::SHADER_STORAGE_WRITE);
        assert_eq!(
            barrier.dst_stage,
            vk::PipelineStageFlags2::VERTEX_SHADER | vk::PipelineStageFlags2::FRAGMENT_SHADER
        );
        assert_eq!(plan.per_node[pass as usize].in_buffer.count, 1);
    }

    /// A transient's first use sources from the span's last state, never
    /// from an assumed `UNDEFINED` layout: the frame-boundary transition is
    /// fence-gated, not layout-discarding.
    #[test]
    fn transient_first_use_wraps_span() {
        let mut fx = Fixture::new();
        let producer = fx.node(JobType::Compute, false);
        let consumer = fx.node(JobType::RenderPass, false);
        fx.dag.add_edge(producer, consumer);

        fx.resource(1, ResourceKind::Texture, &[1, 2]);
        fx.write(producer, 1, ResourceState::STORAGE_TEXTURE_WRITE);
        fx.read(consumer, 1, ResourceState::SHADER_SAMPLED);
        fx.span(
            1,
            producer,
            ResourceState::STORAGE_TEXTURE_WRITE,
            consumer,
            ResourceState::SHADER_SAMPLED,
        );

        let plan = fx.plan(&QueueLayout::single_queue());

        let first = plan.image_barriers[plan.per_node[producer as usize].in_image.begin as usize];
        assert_eq!(
            first.old_layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            "first use must wrap around to the span's last state"
        );
        assert_eq!(first.new_layout, vk::ImageLayout::GENERAL);
    }

    /// Buffer packs are barriered on every cross-node access, even when the
    /// access flags do not change.
    #[test]
    fn packs_are_always_barriered() {
        let mut fx = Fixture::new();
        let first = fx.node(JobType::Compute, false);
        let second = fx.node(JobType::Compute, false);
        fx.dag.add_edge(first, second);

        fx.resource(1, ResourceKind::BufferPack, &[1, 2, 3]);
        fx.write(first, 2, ResourceState::STORAGE_BUFFER_WRITE);
        fx.write(second, 3, ResourceState::STORAGE_BUFFER_WRITE);
        fx.read(second, 2, ResourceState::STORAGE_BUFFER_WRITE);
        fx.span(
            1,
            first,
            ResourceState::STORAGE_BUFFER_WRITE,
            second,
            ResourceState::STORAGE_BUFFER_WRITE,
        );

        let plan = fx.plan(&QueueLayout::single_queue());

        assert_eq!(plan.pack_barriers.len(), 1);
        assert_eq!(plan.per_node[second as usize].in_pack.count, 1);
    }
}
