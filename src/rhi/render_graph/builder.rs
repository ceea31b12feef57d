//! Scoped construction of render-graph nodes.

use super::super::context::Context;
use super::super::dag::NodeHandle;
use super::super::rhi_enums::*;
use super::super::rhi_structs::*;
use super::super::version_registry::ResourceVersion;
use super::super::vulkan::{Buffer, BufferPack, CommandBuffer, Device};
use super::{
    compile, ImportedUsage, Job, Node, RenderGraph, RenderResource, ResourceRead, ResourceWrite,
    TextureSlot,
};
use std::sync::Arc;

/// Builds a [`RenderGraph`] node by node.
///
/// `begin_*` opens exactly one node and the matching `end_*` closes it; no
/// two nodes may be open at the same time. Opening or accessing resources
/// outside of a `begin`/`end` scope is a programmer error and panics.
pub struct RenderGraphBuilder {
    graph: RenderGraph,
    current_node: Option<NodeHandle>,
}

impl Default for RenderGraphBuilder {
    fn default() -> Self {
        RenderGraphBuilder::new()
    }
}

impl RenderGraphBuilder {
    /// An empty builder. Equivalent to
    /// [`Device::new_render_graph_builder`](crate::rhi::vulkan::Device::new_render_graph_builder);
    /// the device is only needed at [`build`](RenderGraphBuilder::build) time.
    pub fn new() -> Self {
        RenderGraphBuilder {
            graph: RenderGraph::new(),
            current_node: None,
        }
    }

    /// Declares a graph-owned texture, created (and re-created) by the graph
    /// itself. Attributes may depend on other resource versions.
    pub fn declare_transient_texture(&mut self, info: DependentTextureInfo) -> ResourceVersion {
        let version = self.graph.registry.declare_resource();
        let id = self.graph.registry.resource_id(version);
        self.graph.transient_texture_infos.insert(id, info);
        version
    }

    /// Declares an extra view created over a transient texture whenever the
    /// texture itself is (re)created. View 0 always exists.
    pub fn declare_texture_view(&mut self, texture: ResourceVersion, view: TextureViewInfo) {
        let id = self.graph.registry.resource_id(texture);
        self.graph
            .transient_texture_views
            .entry(id)
            .or_insert_with(Vec::new)
            .push(view);
    }

    /// Declares a graph-owned buffer, recreated on compile and whenever its
    /// declared size changes.
    pub fn declare_transient_buffer(&mut self, info: BufferInfo) -> ResourceVersion {
        let version = self.graph.registry.declare_resource();
        let id = self.graph.registry.resource_id(version);
        self.graph.transient_buffer_infos.insert(id, info);
        version
    }

    /// Declares an imported texture whose concrete resource is bound later
    /// via [`RenderGraph::reimport_texture`].
    pub fn declare_import_texture(
        &mut self,
        initial_state: ResourceState,
        final_state: ResourceState,
    ) -> ResourceVersion {
        let version = self.graph.registry.declare_resource();
        let id = self.graph.registry.resource_id(version);
        self.graph.imported_usages.insert(
            id,
            ImportedUsage {
                initial: initial_state,
                final_state,
            },
        );
        version
    }

    /// Declares an imported buffer bound later via
    /// [`RenderGraph::reimport_buffer`].
    pub fn declare_import_buffer(
        &mut self,
        initial_state: ResourceState,
        final_state: ResourceState,
    ) -> ResourceVersion {
        let version = self.graph.registry.declare_resource();
        let id = self.graph.registry.resource_id(version);
        self.graph.imported_usages.insert(
            id,
            ImportedUsage {
                initial: initial_state,
                final_state,
            },
        );
        version
    }

    /// Declares a named dynamic set of identically laid out buffers which is
    /// barriered as a group. Members are registered at execution time.
    pub fn declare_import_buffer_pack(
        &mut self,
        name: &str,
        initial_state: ResourceState,
        final_state: ResourceState,
    ) -> ResourceVersion {
        let pack = Arc::new(BufferPack::new(name));
        let version = self
            .graph
            .registry
            .add_resource(RenderResource::BufferPack(pack));
        let id = self.graph.registry.resource_id(version);
        self.graph.imported_usages.insert(
            id,
            ImportedUsage {
                initial: initial_state,
                final_state,
            },
        );
        version
    }

    /// Imports an externally owned texture with known initial/final states.
    pub fn import_texture(
        &mut self,
        texture: TextureSlot,
        initial_state: ResourceState,
        final_state: ResourceState,
    ) -> ResourceVersion {
        let version = self
            .graph
            .registry
            .add_resource(RenderResource::Texture(texture));
        let id = self.graph.registry.resource_id(version);
        self.graph.imported_usages.insert(
            id,
            ImportedUsage {
                initial: initial_state,
                final_state,
            },
        );
        version
    }

    /// Imports an externally owned buffer with known initial/final states.
    pub fn import_buffer(
        &mut self,
        buffer: Arc<Buffer>,
        initial_state: ResourceState,
        final_state: ResourceState,
    ) -> ResourceVersion {
        let version = self
            .graph
            .registry
            .add_resource(RenderResource::Buffer(buffer));
        let id = self.graph.registry.resource_id(version);
        self.graph.imported_usages.insert(
            id,
            ImportedUsage {
                initial: initial_state,
                final_state,
            },
        );
        version
    }

    /// The newest version sharing `resource`'s underlying resource.
    pub fn last_resource_version(&self, resource: ResourceVersion) -> ResourceVersion {
        let id = self.graph.registry.resource_id(resource);
        let mut last = resource;
        for version in 0..self.graph.registry.version_count() {
            if self.graph.registry.resource_id(version) == id {
                last = version;
            }
        }
        last
    }

    /// Opens a render-pass node. Graphics capability by default.
    pub fn begin_render_pass(&mut self, name: &str, capabilities: Capability) {
        self.begin_node(JobType::RenderPass, false, capabilities, name);
    }

    pub fn end_render_pass(&mut self) {
        self.end_node(JobType::RenderPass);
    }

    /// Opens a compute node; `is_async` schedules it onto the async compute
    /// queue when one exists.
    pub fn begin_compute(&mut self, name: &str, is_async: bool, capabilities: Capability) {
        self.begin_node(JobType::Compute, is_async, capabilities, name);
    }

    pub fn end_compute(&mut self) {
        self.end_node(JobType::Compute);
    }

    /// Opens a transfer node; `is_async` schedules it onto the dedicated
    /// transfer queue when one exists.
    pub fn begin_transfer(&mut self, name: &str, is_async: bool, capabilities: Capability) {
        self.begin_node(JobType::Transfer, is_async, capabilities, name);
    }

    pub fn end_transfer(&mut self) {
        self.end_node(JobType::Transfer);
    }

    /// Attaches the execution closure to the currently open node.
    pub fn set_job(
        &mut self,
        job: impl FnMut(&RenderGraph, &mut Context, &mut CommandBuffer) + 'static,
    ) {
        let node = self.expect_node("set_job");
        self.graph.jobs[node as usize] = Some(Box::new(job) as Job);
    }

    /// Adds a color attachment to the open render pass.
    ///
    /// With [`AttachmentLoad::Load`] the node reads the incoming version at
    /// `COLOR_TARGET` and the write produces a fresh version; with `Clear` or
    /// `DontCare` the previous contents are irrelevant and the write reuses
    /// the incoming version number.
    pub fn add_color_target(
        &mut self,
        texture: ResourceVersion,
        load: AttachmentLoad,
        store: AttachmentStore,
    ) -> ResourceVersion {
        self.add_attachment(texture, ResourceState::COLOR_TARGET, load, store)
    }

    /// Attaches a multisample-resolve target, paired positionally with the
    /// node's color targets.
    pub fn add_color_multisample_resolve(&mut self, texture: ResourceVersion) -> ResourceVersion {
        let node = self.expect_node("add_color_multisample_resolve");
        assert_eq!(
            self.graph.dag.node(node).job_type,
            JobType::RenderPass,
            "multisample resolves are only valid in render pass nodes"
        );

        self.graph.dag.node_mut(node).write.push(ResourceWrite {
            version: texture,
            state: ResourceState::COLOR_MULTISAMPLE_RESOLVE,
            load: AttachmentLoad::DontCare,
            store: AttachmentStore::Store,
        });

        texture
    }

    /// Sets the depth/stencil attachment of the open render pass. A node may
    /// have at most one; a second call fails the build.
    pub fn set_depth_stencil(
        &mut self,
        texture: ResourceVersion,
        load: AttachmentLoad,
        store: AttachmentStore,
    ) -> ResourceVersion {
        self.add_attachment(texture, ResourceState::DEPTH_STENCIL_TARGET, load, store)
    }

    /// Reads a texture through a sampler.
    pub fn sample_texture(&mut self, texture: ResourceVersion) {
        let node = self.expect_node("sample_texture");
        self.graph.dag.node_mut(node).read.push(ResourceRead {
            version: texture,
            state: ResourceState::SHADER_SAMPLED,
        });
    }

    /// Writes a storage texture in place, keeping the version number.
    pub fn write_texture(&mut self, texture: ResourceVersion) {
        let node = self.expect_node("write_texture");
        self.graph.dag.node_mut(node).write.push(ResourceWrite {
            version: texture,
            state: ResourceState::STORAGE_TEXTURE_WRITE,
            load: AttachmentLoad::DontCare,
            store: AttachmentStore::Store,
        });
    }

    /// Reads and writes a storage texture, producing a fresh version.
    pub fn read_write_texture(&mut self, texture: ResourceVersion) -> ResourceVersion {
        self.add_read_write(
            "read_write_texture",
            texture,
            ResourceState::STORAGE_TEXTURE_READ_WRITE,
        )
    }

    /// Reads a buffer in the given state.
    pub fn read_buffer(&mut self, buffer: ResourceVersion, state: ResourceState) {
        let node = self.expect_node("read_buffer");
        self.graph.dag.node_mut(node).read.push(ResourceRead {
            version: buffer,
            state,
        });
    }

    /// Writes a buffer in place, keeping the version number.
    pub fn write_buffer(&mut self, buffer: ResourceVersion, state: ResourceState) {
        let node = self.expect_node("write_buffer");
        self.graph.dag.node_mut(node).write.push(ResourceWrite {
            version: buffer,
            state,
            load: AttachmentLoad::DontCare,
            store: AttachmentStore::Store,
        });
    }

    /// Reads and writes a buffer, producing a fresh version.
    pub fn read_write_buffer(
        &mut self,
        buffer: ResourceVersion,
        state: ResourceState,
    ) -> ResourceVersion {
        self.add_read_write("read_write_buffer", buffer, state)
    }

    /// Freezes the builder and compiles the graph for `device`.
    pub fn build(mut self, device: &Device, name: &str) -> Result<RenderGraph, RenderGraphError> {
        assert!(
            self.current_node.is_none(),
            "cannot build a render graph with an open node"
        );

        self.graph.name = name.to_owned();
        compile::compile(&mut self.graph, &device.queue_layout())?;
        compile::init_gpu_state(&mut self.graph, device);

        Ok(self.graph)
    }

    fn begin_node(&mut self, job_type: JobType, is_async: bool, capabilities: Capability, name: &str) {
        assert!(
            self.current_node.is_none(),
            "cannot begin a render graph node without ending the previous one"
        );

        let handle = self.graph.dag.add_node(Node {
            job_type,
            capabilities,
            is_async,
            name: name.to_owned(),
            read: Vec::new(),
            write: Vec::new(),
        });
        self.graph.jobs.push(None);

        self.current_node = Some(handle);
    }

    fn end_node(&mut self, job_type: JobType) {
        let node = self.expect_node("end");
        assert_eq!(
            self.graph.dag.node(node).job_type,
            job_type,
            "end call type does not match the begin call type"
        );

        self.current_node = None;
    }

    fn add_attachment(
        &mut self,
        texture: ResourceVersion,
        state: ResourceState,
        load: AttachmentLoad,
        store: AttachmentStore,
    ) -> ResourceVersion {
        let node = self.expect_node("attachment access");
        assert_eq!(
            self.graph.dag.node(node).job_type,
            JobType::RenderPass,
            "attachments are only valid in render pass nodes"
        );

        let mut new_version = texture;

        if load == AttachmentLoad::Load {
            self.graph.dag.node_mut(node).read.push(ResourceRead {
                version: texture,
                state,
            });

            new_version = self.graph.registry.next_version(texture);
        }

        self.graph.dag.node_mut(node).write.push(ResourceWrite {
            version: new_version,
            state,
            load,
            store,
        });

        new_version
    }

    fn add_read_write(
        &mut self,
        what: &str,
        resource: ResourceVersion,
        state: ResourceState,
    ) -> ResourceVersion {
        let node = self.expect_node(what);

        self.graph.dag.node_mut(node).read.push(ResourceRead {
            version: resource,
            state,
        });

        let new_version = self.graph.registry.next_version(resource);
        self.graph.dag.node_mut(node).write.push(ResourceWrite {
            version: new_version,
            state,
            load: AttachmentLoad::DontCare,
            store: AttachmentStore::Store,
        });

        new_version
    }

    fn expect_node(&self, what: &str) -> NodeHandle {
        match self.current_node {
            Some(node) => node,
            None => panic!("{} outside of a begin/end node scope", what),
        }
    }
}
