//! The frame-scoped render graph.
//!
//! A render graph is a DAG of GPU jobs with typed read and write sets over
//! [`ResourceVersion`]s. Building happens once through
//! [`RenderGraphBuilder`]; the compiled graph is then executed every frame,
//! recompiling lazily when a dependent resource attribute changes or an
//! import is rebound.

mod attachments;
mod barrier;
mod builder;
mod compile;
mod execute;
mod graphviz;
mod schedule;

pub use self::builder::RenderGraphBuilder;

pub(crate) use self::attachments::RenderPassPlan;
pub(crate) use self::barrier::BarrierPlan;
pub(crate) use self::execute::LinkedResources;
pub(crate) use self::schedule::{QueueLayout, SchedulePlan};

use super::context::Context;
use super::dag::{Dag, NodeHandle, TopologicalOrder};
use super::rhi_enums::*;
use super::rhi_structs::*;
use super::version_registry::{ResourceId, ResourceVersion, ResourceVersionRegistry};
use super::vulkan::{
    Buffer, BufferPack, CommandBuffer, CommandPool, DeviceShared, Texture, TimelineSemaphore,
};
use log::error;
use std::collections::HashMap;
use std::sync::Arc;

/// A texture and the view index a version refers to.
#[derive(Clone)]
pub struct TextureSlot {
    pub texture: Arc<Texture>,
    /// Index into the texture's view list; 0 is the default view.
    pub view: u32,
}

/// A concrete resource bound to a registry slot.
#[derive(Clone)]
pub enum RenderResource {
    /// Declared but not bound yet (transients before creation, late imports).
    Null,
    Buffer(Arc<Buffer>),
    BufferPack(Arc<BufferPack>),
    Texture(TextureSlot),
}

impl Default for RenderResource {
    fn default() -> Self {
        RenderResource::Null
    }
}

/// Coarse kind of a registry slot, used by the compile passes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum ResourceKind {
    Null,
    Buffer,
    BufferPack,
    Texture,
}

impl RenderResource {
    pub(crate) fn kind(&self) -> ResourceKind {
        match self {
            RenderResource::Null => ResourceKind::Null,
            RenderResource::Buffer(_) => ResourceKind::Buffer,
            RenderResource::BufferPack(_) => ResourceKind::BufferPack,
            RenderResource::Texture(_) => ResourceKind::Texture,
        }
    }
}

/// A read access of a node.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResourceRead {
    pub version: ResourceVersion,
    /// The consuming device state.
    pub state: ResourceState,
}

/// A write access of a node.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResourceWrite {
    pub version: ResourceVersion,
    pub state: ResourceState,

    /// Only meaningful for render-pass attachment writes.
    pub load: AttachmentLoad,
    pub store: AttachmentStore,
}

/// Initial and final states of an imported resource.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ImportedUsage {
    pub initial: ResourceState,
    pub final_state: ResourceState,
}

/// First and last graph usage of a resource, ordered by dependency level.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct UsageSpan {
    pub first_node: Option<NodeHandle>,
    pub first_state: ResourceState,
    pub last_node: Option<NodeHandle>,
    pub last_state: ResourceState,
}

/// The closure a node records its commands with.
pub type Job = Box<dyn FnMut(&RenderGraph, &mut Context, &mut CommandBuffer)>;

/// One GPU job in the graph. Immutable once its `end_*` call returns.
pub(crate) struct Node {
    pub job_type: JobType,
    pub capabilities: Capability,
    /// Whether the node prefers the async compute / dedicated transfer queue.
    pub is_async: bool,
    pub name: String,
    pub read: Vec<ResourceRead>,
    pub write: Vec<ResourceWrite>,
}

/// A compiled, executable render graph.
pub struct RenderGraph {
    pub(crate) name: String,
    pub(crate) dag: Dag<Node>,
    /// Jobs live beside the DAG so that execution can temporarily take one
    /// out while handing the job a shared reference to the graph.
    pub(crate) jobs: Vec<Option<Job>>,

    pub(crate) order: TopologicalOrder,
    pub(crate) registry: ResourceVersionRegistry<RenderResource>,

    pub(crate) transient_texture_infos: HashMap<ResourceId, DependentTextureInfo>,
    pub(crate) transient_texture_views: HashMap<ResourceId, Vec<TextureViewInfo>>,
    pub(crate) transient_buffer_infos: HashMap<ResourceId, BufferInfo>,
    pub(crate) imported_usages: HashMap<ResourceId, ImportedUsage>,
    pub(crate) usage_spans: HashMap<ResourceId, UsageSpan>,

    pub(crate) transient_textures: HashMap<ResourceId, Arc<Texture>>,
    pub(crate) transient_buffers: HashMap<ResourceId, Arc<Buffer>>,

    pub(crate) schedule: SchedulePlan,
    pub(crate) barriers: BarrierPlan,
    pub(crate) render_passes: Vec<RenderPassPlan>,
    /// Per-node index into `render_passes`, `None` for non-render-pass nodes.
    pub(crate) node_render_pass: Vec<Option<u32>>,

    pub(crate) linked: LinkedResources,
    pub(crate) semaphores: Vec<TimelineSemaphore>,
    pub(crate) command_pool: Option<CommandPool>,
    pub(crate) shared: Option<Arc<DeviceShared>>,

    pub(crate) dirty: bool,
    pub(crate) force_recreate_resources: bool,
    pub(crate) first_execute: bool,
}

impl RenderGraph {
    pub(crate) fn new() -> Self {
        RenderGraph {
            name: String::new(),
            dag: Dag::new(),
            jobs: Vec::new(),
            order: TopologicalOrder::default(),
            registry: ResourceVersionRegistry::new(),
            transient_texture_infos: HashMap::new(),
            transient_texture_views: HashMap::new(),
            transient_buffer_infos: HashMap::new(),
            imported_usages: HashMap::new(),
            usage_spans: HashMap::new(),
            transient_textures: HashMap::new(),
            transient_buffers: HashMap::new(),
            schedule: SchedulePlan::default(),
            barriers: BarrierPlan::default(),
            render_passes: Vec::new(),
            node_render_pass: Vec::new(),
            linked: LinkedResources::default(),
            semaphores: Vec::new(),
            command_pool: None,
            shared: None,
            dirty: false,
            force_recreate_resources: false,
            first_execute: true,
        }
    }

    /// Name the graph was built with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The texture a version refers to.
    ///
    /// Panics if the version is bound to something other than a texture;
    /// asking for the wrong resource kind is a programmer error.
    pub fn texture(&self, version: ResourceVersion) -> TextureSlot {
        match self.registry.resource_by_version(version) {
            RenderResource::Texture(slot) => slot.clone(),
            _ => panic!("resource version {} is not bound to a texture", version),
        }
    }

    /// The texture a version refers to, or `None` when the slot holds no
    /// texture (yet).
    pub fn try_texture(&self, version: ResourceVersion) -> Option<TextureSlot> {
        match self.registry.resource_by_version(version) {
            RenderResource::Texture(slot) => Some(slot.clone()),
            _ => None,
        }
    }

    /// The buffer a version refers to.
    ///
    /// Panics if the version is bound to something other than a buffer.
    pub fn buffer(&self, version: ResourceVersion) -> Arc<Buffer> {
        match self.registry.resource_by_version(version) {
            RenderResource::Buffer(buffer) => Arc::clone(buffer),
            _ => panic!("resource version {} is not bound to a buffer", version),
        }
    }

    pub fn try_buffer(&self, version: ResourceVersion) -> Option<Arc<Buffer>> {
        match self.registry.resource_by_version(version) {
            RenderResource::Buffer(buffer) => Some(Arc::clone(buffer)),
            _ => None,
        }
    }

    /// The buffer pack a version refers to.
    ///
    /// Panics if the version is bound to something other than a buffer pack.
    pub fn buffer_pack(&self, version: ResourceVersion) -> Arc<BufferPack> {
        match self.registry.resource_by_version(version) {
            RenderResource::BufferPack(pack) => Arc::clone(pack),
            _ => panic!("resource version {} is not bound to a buffer pack", version),
        }
    }

    /// Rebinds an imported texture slot to a new texture. Barrier and
    /// attachment links are refreshed before the next execution.
    pub fn reimport_texture(&mut self, version: ResourceVersion, texture: TextureSlot) {
        let id = self.registry.resource_id(version);
        self.registry
            .update_resource(id, RenderResource::Texture(texture));
        self.dirty = true;
    }

    /// Rebinds an imported buffer slot to a new buffer.
    pub fn reimport_buffer(&mut self, version: ResourceVersion, buffer: Arc<Buffer>) {
        let id = self.registry.resource_id(version);
        self.registry
            .update_resource(id, RenderResource::Buffer(buffer));
        self.dirty = true;
    }

    /// Changes the declared sample count of a transient texture. The texture
    /// is recreated before the next execution if the value differs.
    pub fn update_transient_texture_samples(&mut self, version: ResourceVersion, samples: u8) {
        let id = self.registry.resource_id(version);
        match self.transient_texture_infos.get_mut(&id) {
            Some(info) if info.samples.get() != samples => {
                info.samples.set(samples);
                self.force_recreate_resources = true;
                self.dirty = true;
            }
            Some(_) => {}
            None => error!(
                "update_transient_texture_samples: version {} is not a transient texture",
                version
            ),
        }
    }

    /// Changes the declared size of a transient buffer. The buffer is
    /// recreated before the next execution if the value differs.
    pub fn update_transient_buffer_size(&mut self, version: ResourceVersion, size: u64) {
        let id = self.registry.resource_id(version);
        match self.transient_buffer_infos.get_mut(&id) {
            Some(info) if info.size != size => {
                info.size = size;
                self.force_recreate_resources = true;
                self.dirty = true;
            }
            Some(_) => {}
            None => error!(
                "update_transient_buffer_size: version {} is not a transient buffer",
                version
            ),
        }
    }

    /// Attaches the execution closure to the first node called `node_name`.
    pub fn set_job(
        &mut self,
        node_name: &str,
        job: impl FnMut(&RenderGraph, &mut Context, &mut CommandBuffer) + 'static,
    ) {
        let mut job = Some(Box::new(job) as Job);
        for handle in self.dag.handles() {
            if self.dag.node(handle).name == node_name {
                self.jobs[handle as usize] = job.take();
                break;
            }
        }

        if job.is_some() {
            error!("set_job: no node named '{}' in graph '{}'", node_name, self.name);
        }
    }

    /// Number of nodes in the compiled graph.
    pub fn node_count(&self) -> usize {
        self.dag.len()
    }

    /// Handle of the node at the given position of the sorted order.
    pub fn sorted_node(&self, sorted_idx: usize) -> NodeHandle {
        self.order.sorted[sorted_idx]
    }

    /// Longest path from any source to the node.
    pub fn dependency_level(&self, handle: NodeHandle) -> u32 {
        self.order.depths[handle as usize]
    }
}
