//! Cross-queue scheduling.
//!
//! Nodes are placed on up to three hardware queues and partitioned into
//! submissions. The minimal set of cross-queue waits is derived through a
//! Sufficient Synchronization Index Set (SSIS): per node, the per-queue
//! maximum sync index of its predecessors. A predecessor whose SSIS entry
//! for a queue does not exceed ours already synchronizes us against that
//! queue, so a small number of chosen edges covers every dependency.

use super::super::dag::{Dag, NodeHandle, TopologicalOrder};
use super::super::rhi_enums::JobType;
use super::Node;
use ash::vk;

/// Upper bound on hardware queues the scheduler distinguishes.
pub(crate) const MAX_QUEUES: usize = 3;

/// Which scheduler queue indices exist on the device.
///
/// Queue 0 is always the `main` graphics-compute-transfer queue; the async
/// compute and dedicated transfer queues are present only when the physical
/// device exposes suitable families.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct QueueLayout {
    pub queue_count: u32,
    pub compute: Option<u32>,
    pub transfer: Option<u32>,
}

impl QueueLayout {
    /// A device with only the main queue.
    #[cfg(test)]
    pub fn single_queue() -> Self {
        QueueLayout {
            queue_count: 1,
            compute: None,
            transfer: None,
        }
    }

    /// A device with all three queues.
    #[cfg(test)]
    pub fn full() -> Self {
        QueueLayout {
            queue_count: 3,
            compute: Some(1),
            transfer: Some(2),
        }
    }

    /// The queue a node runs on. Async nodes fall back to `main` when their
    /// preferred queue is absent.
    pub fn queue_for(&self, job_type: JobType, is_async: bool) -> u32 {
        if !is_async {
            return 0;
        }

        match job_type {
            JobType::Compute => self.compute.unwrap_or(0),
            JobType::Transfer => self.transfer.unwrap_or(0),
            JobType::RenderPass => 0,
        }
    }
}

/// A timeline-semaphore wait or signal, in frame-local base values.
///
/// `base_value` 0 means "no operation"; runtime values are biased by the
/// absolute frame so they increase monotonically across frames.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub(crate) struct SemaphoreOp {
    pub base_value: u64,
    pub stages: vk::PipelineStageFlags2,
}

/// A contiguous run of nodes on one queue, recorded into one command buffer
/// and dispatched with one submit.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct Submission {
    /// Dependency level of the boundary node that opened the submission.
    pub level: u32,

    /// Waits indexed by source queue.
    pub waits: [SemaphoreOp; MAX_QUEUES],

    /// Signal on this queue's semaphore.
    pub signal: SemaphoreOp,
}

impl Submission {
    fn at_level(level: u32) -> Self {
        Submission {
            level,
            waits: [SemaphoreOp::default(); MAX_QUEUES],
            signal: SemaphoreOp::default(),
        }
    }
}

/// The complete queue schedule of a compiled graph.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub(crate) struct SchedulePlan {
    pub queue_count: u32,

    /// Queue index per node, indexed by node handle.
    pub node_queue: Vec<u32>,

    /// Node handles per queue, in topological order.
    pub nodes_per_queue: Vec<Vec<NodeHandle>>,

    pub submissions_per_queue: Vec<Vec<Submission>>,
}

impl SchedulePlan {
    /// Index of the submission on `queue` containing nodes of `level`: the
    /// first submission whose boundary level is not below it.
    pub fn submission_index(&self, queue: u32, level: u32) -> usize {
        let submissions = &self.submissions_per_queue[queue as usize];
        submissions
            .iter()
            .position(|submission| submission.level >= level)
            .unwrap_or(0)
    }

    /// Largest per-queue submission count, used to size timeline semaphores.
    pub fn max_submission_count(&self) -> u64 {
        self.submissions_per_queue
            .iter()
            .map(|submissions| submissions.len() as u64)
            .max()
            .unwrap_or(0)
    }
}

fn sync_index(sort_idx: u32, queue_idx: u32, node_count: u32) -> u32 {
    sort_idx + queue_idx * node_count + 1
}

/// Places every node on a queue and derives submissions with the minimal
/// cross-queue wait/signal edges.
pub(crate) fn schedule_to_queues(
    dag: &Dag<Node>,
    order: &TopologicalOrder,
    layout: &QueueLayout,
) -> SchedulePlan {
    let node_count = dag.len() as u32;
    let queue_count = layout.queue_count;

    let mut plan = SchedulePlan {
        queue_count,
        node_queue: vec![0; node_count as usize],
        nodes_per_queue: vec![Vec::new(); queue_count as usize],
        submissions_per_queue: vec![Vec::new(); queue_count as usize],
    };

    for handle in dag.handles() {
        let node = dag.node(handle);
        plan.node_queue[handle as usize] = layout.queue_for(node.job_type, node.is_async);
    }

    /* Order nodes monotonically through dependency levels; needed to
     * construct the SSIS. */
    let mut sync_from_handle = vec![0u32; node_count as usize];

    for (sort_idx, &handle) in order.sorted.iter().enumerate() {
        let queue = plan.node_queue[handle as usize];
        sync_from_handle[handle as usize] = sync_index(sort_idx as u32, queue, node_count);

        plan.nodes_per_queue[queue as usize].push(handle);
    }

    /* Calculate the SSIS and covered mask per node. */
    let reverse_dag = dag.reverse();

    let mut ssis_per_node = vec![[0u32; MAX_QUEUES]; node_count as usize];
    let mut covered_per_node = vec![[true; MAX_QUEUES]; node_count as usize];

    for (sort_idx, &handle) in order.sorted.iter().enumerate() {
        let queue = plan.node_queue[handle as usize];
        ssis_per_node[handle as usize][queue as usize] =
            sync_index(sort_idx as u32, queue, node_count);

        for &dependency in reverse_dag.adjacency(handle) {
            let dependency_queue = plan.node_queue[dependency as usize];
            if dependency_queue != queue {
                let entry = &mut ssis_per_node[handle as usize][dependency_queue as usize];
                *entry = (*entry).max(sync_from_handle[dependency as usize]);
                covered_per_node[handle as usize][dependency_queue as usize] = false;
            }
        }
    }

    /* Construct a dependency graph without redundant cross-queue edges:
     * iteratively pick the predecessor covering the most uncovered queues,
     * ties broken by the later predecessor since it subsumes earlier ones on
     * its queue. */
    let mut cross_queue_graph: Dag<()> = Dag::new();
    for _ in 0..node_count {
        cross_queue_graph.add_node(());
    }

    let mut covered_all = false;
    while !covered_all {
        covered_all = true;

        for handle in dag.handles() {
            let mut best_dependency: Option<NodeHandle> = None;
            let mut best_cover = covered_per_node[handle as usize];
            let mut best_cover_score = 0u32;

            for &dependency in reverse_dag.adjacency(handle) {
                let mut cover = covered_per_node[handle as usize];
                let mut cover_score = 0u32;

                for queue in 0..queue_count as usize {
                    if !cover[queue] {
                        cover[queue] = ssis_per_node[dependency as usize][queue]
                            <= ssis_per_node[handle as usize][queue];

                        if cover[queue] {
                            cover_score += 1;
                        }
                    }
                }

                let better = cover_score > best_cover_score
                    || (best_dependency.is_some()
                        && cover_score == best_cover_score
                        && sync_from_handle[dependency as usize]
                            > sync_from_handle[best_dependency.unwrap() as usize]);

                if better {
                    best_dependency = Some(dependency);
                    best_cover = cover;
                    best_cover_score = cover_score;
                }
            }

            if let Some(dependency) = best_dependency {
                covered_per_node[handle as usize] = best_cover;
                cross_queue_graph.add_edge(dependency, handle);
            }

            if covered_per_node[handle as usize][..queue_count as usize]
                .iter()
                .any(|&covered| !covered)
            {
                covered_all = false;
            }
        }
    }

    /* Carve nodes into submissions: boundaries at the last node of a queue
     * and at every node another submission synchronizes against. */
    for queue in 0..queue_count as usize {
        for (idx, &handle) in plan.nodes_per_queue[queue].iter().enumerate() {
            let is_last = idx + 1 == plan.nodes_per_queue[queue].len();
            if !is_last && cross_queue_graph.adjacency(handle).is_empty() {
                continue;
            }

            let level = order.depths[handle as usize];
            let submissions = &mut plan.submissions_per_queue[queue];

            if submissions.last().map_or(true, |last| last.level < level) {
                submissions.push(Submission::at_level(level));
            }
        }
    }

    /* Wire up semaphore waits and signals along the original edges. */
    for &handle in &order.sorted {
        let queue = plan.node_queue[handle as usize];
        let level = order.depths[handle as usize];
        let submit_idx = plan.submission_index(queue, level) as u64;

        for &dependent in dag.adjacency(handle) {
            let dependent_queue = plan.node_queue[dependent as usize];
            let dependent_level = order.depths[dependent as usize];
            let dependent_submit_idx =
                plan.submission_index(dependent_queue, dependent_level) as u64;

            if queue != dependent_queue || dependent_submit_idx > submit_idx {
                let wait = &mut plan.submissions_per_queue[dependent_queue as usize]
                    [dependent_submit_idx as usize]
                    .waits[queue as usize];
                wait.base_value = wait.base_value.max(submit_idx + 1);
                wait.stages = vk::PipelineStageFlags2::ALL_COMMANDS;

                let signal =
                    &mut plan.submissions_per_queue[queue as usize][submit_idx as usize].signal;
                signal.base_value = submit_idx + 1;
                signal.stages = vk::PipelineStageFlags2::ALL_COMMANDS;
            }
        }
    }

    /* The last submission of every queue signals its full submission count,
     * the value later submissions and the frame end wait for. */
    for queue in 0..queue_count as usize {
        let count = plan.submissions_per_queue[queue].len() as u64;
        if let Some(last) = plan.submissions_per_queue[queue].last_mut() {
            last.signal.base_value = count;
            last.signal.stages = vk::PipelineStageFlags2::ALL_COMMANDS;
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::super::super::rhi_enums::{AttachmentLoad, AttachmentStore, Capability, ResourceState};
    use super::super::{Node, ResourceRead, ResourceWrite};
    use super::*;

    fn node(job_type: JobType, is_async: bool, name: &str) -> Node {
        Node {
            job_type,
            capabilities: Capability::all(),
            is_async,
            name: name.to_owned(),
            read: Vec::new(),
            write: Vec::new(),
        }
    }

    fn read(version: u32) -> ResourceRead {
        ResourceRead {
            version,
            state: ResourceState::UNIFORM_BUFFER,
        }
    }

    fn write(version: u32) -> ResourceWrite {
        ResourceWrite {
            version,
            state: ResourceState::STORAGE_BUFFER_WRITE,
            load: AttachmentLoad::DontCare,
            store: AttachmentStore::Store,
        }
    }

    fn schedule(dag: &Dag<Node>, layout: &QueueLayout) -> (SchedulePlan, TopologicalOrder) {
        let order = dag.topological_sort().unwrap();
        (schedule_to_queues(dag, &order, layout), order)
    }

    /// S1: one render pass on the main queue, one submission, no waits.
    #[test]
    fn single_pass_single_submission() {
        let mut dag = Dag::new();
        dag.add_node(node(JobType::RenderPass, false, "forward"));

        let (plan, _) = schedule(&dag, &QueueLayout::full());

        assert_eq!(plan.nodes_per_queue[0], vec![0]);
        assert!(plan.nodes_per_queue[1].is_empty());
        assert!(plan.nodes_per_queue[2].is_empty());

        let submissions = &plan.submissions_per_queue[0];
        assert_eq!(submissions.len(), 1);
        assert!(submissions[0].waits.iter().all(|w| w.base_value == 0));
        assert_eq!(submissions[0].signal.base_value, 1);
    }

    /// S2: async compute writes a buffer which a render pass consumes. The
    /// main queue submission must wait on the compute semaphore at value 1.
    #[test]
    fn async_compute_handoff() {
        let mut dag = Dag::new();
        let compute = dag.add_node(node(JobType::Compute, true, "particles"));
        let pass = dag.add_node(node(JobType::RenderPass, false, "forward"));
        dag.node_mut(compute).write.push(write(1));
        dag.node_mut(pass).read.push(read(1));
        dag.add_edge(compute, pass);

        let (plan, _) = schedule(&dag, &QueueLayout::full());

        assert_eq!(plan.node_queue[compute as usize], 1);
        assert_eq!(plan.node_queue[pass as usize], 0);

        let compute_submissions = &plan.submissions_per_queue[1];
        assert_eq!(compute_submissions.len(), 1);
        assert_eq!(compute_submissions[0].signal.base_value, 1);

        let main_submissions = &plan.submissions_per_queue[0];
        assert_eq!(main_submissions.len(), 1);
        assert_eq!(main_submissions[0].waits[1].base_value, 1);
    }

    /// Async nodes fall back to the main queue when the queue is absent.
    #[test]
    fn async_falls_back_to_main() {
        let mut dag = Dag::new();
        let compute = dag.add_node(node(JobType::Compute, true, "cull"));
        let transfer = dag.add_node(node(JobType::Transfer, true, "upload"));

        let (plan, _) = schedule(&dag, &QueueLayout::single_queue());

        assert_eq!(plan.node_queue[compute as usize], 0);
        assert_eq!(plan.node_queue[transfer as usize], 0);
        assert_eq!(plan.submissions_per_queue[0].len(), 1);
        assert!(plan.submissions_per_queue[0][0]
            .waits
            .iter()
            .all(|w| w.base_value == 0));
    }

    /// Property 3: for every edge, either both ends share a queue with the
    /// source preceding the destination, or the destination's submission
    /// waits on the source queue's semaphore with a sufficient value.
    #[test]
    fn schedule_covers_every_edge() {
        // main: a -> c -> e, compute: b -> d, cross edges b -> c, a -> d,
        // d -> e, transfer: f -> a.
        let mut dag = Dag::new();
        let f = dag.add_node(node(JobType::Transfer, true, "f"));
        let a = dag.add_node(node(JobType::RenderPass, false, "a"));
        let b = dag.add_node(node(JobType::Compute, true, "b"));
        let c = dag.add_node(node(JobType::RenderPass, false, "c"));
        let d = dag.add_node(node(JobType::Compute, true, "d"));
        let e = dag.add_node(node(JobType::RenderPass, false, "e"));
        dag.add_edge(f, a);
        dag.add_edge(a, c);
        dag.add_edge(b, c);
        dag.add_edge(a, d);
        dag.add_edge(c, e);
        dag.add_edge(d, e);

        let (plan, order) = schedule(&dag, &QueueLayout::full());

        for from in dag.handles() {
            for &to in dag.adjacency(from) {
                let from_queue = plan.node_queue[from as usize];
                let to_queue = plan.node_queue[to as usize];
                let from_submit =
                    plan.submission_index(from_queue, order.depths[from as usize]) as u64;
                let to_submit = plan.submission_index(to_queue, order.depths[to as usize]);

                if from_queue == to_queue && !(to_submit as u64 > from_submit) {
                    let nodes = &plan.nodes_per_queue[from_queue as usize];
                    let from_pos = nodes.iter().position(|&h| h == from).unwrap();
                    let to_pos = nodes.iter().position(|&h| h == to).unwrap();
                    assert!(from_pos < to_pos);
                    continue;
                }

                let wait = plan.submissions_per_queue[to_queue as usize][to_submit].waits
                    [from_queue as usize];
                assert!(
                    wait.base_value >= from_submit + 1,
                    "edge {} -> {} is not covered by a wait",
                    from,
                    to
                );
            }
        }
    }

    /// Property 8: scheduling an unchanged graph twice is identical.
    #[test]
    fn schedule_is_idempotent() {
        let mut dag = Dag::new();
        let a = dag.add_node(node(JobType::Compute, true, "a"));
        let b = dag.add_node(node(JobType::RenderPass, false, "b"));
        dag.add_edge(a, b);

        let order = dag.topological_sort().unwrap();
        let first = schedule_to_queues(&dag, &order, &QueueLayout::full());
        let second = schedule_to_queues(&dag, &order, &QueueLayout::full());
        assert_eq!(first, second);
    }
}
