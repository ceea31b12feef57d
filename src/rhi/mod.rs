//! The Render Hardware Interface.
//!
//! The RHI is split into two halves. This module holds the backend-agnostic
//! data model: resource descriptions, resource states, the resource-version
//! registry, the dependency graph container and the render-graph core. The
//! [`vulkan`] submodule holds the Vulkan implementation of devices, queues,
//! resources and command recording.
//!
//! Shaders address resources through integer handles handed out by the
//! bindless descriptor manager; the CPU side addresses them through
//! [`ResourceVersion`] labels that name a logical state of a resource at a
//! particular point of a render graph.

pub mod context;
pub mod dag;
pub mod render_graph;
pub mod rhi_enums;
pub mod rhi_structs;
pub mod version_registry;
pub mod vulkan;

pub use self::context::Context;
pub use self::dag::{Dag, GraphCycleError, NodeHandle, TopologicalOrder};
pub use self::render_graph::{Job, RenderGraph, RenderGraphBuilder, RenderResource, TextureSlot};
pub use self::rhi_enums::*;
pub use self::rhi_structs::*;
pub use self::version_registry::{ResourceId, ResourceVersion, ResourceVersionRegistry};
