//! Attachment layout of render-pass nodes.
//!
//! Per node the attachment array is ordered: color targets in write order,
//! multisample resolves paired positionally with their color targets, then
//! at most one depth/stencil attachment. The node's render area and sample
//! count are inherited from its first attachment.

use super::super::dag::{Dag, NodeHandle};
use super::super::rhi_enums::*;
use super::super::rhi_structs::TextureInfo;
use super::super::version_registry::ResourceVersion;
use super::Node;

/// One attachment slot of a render pass.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct AttachmentRef {
    pub version: ResourceVersion,
    pub load: AttachmentLoad,
    pub store: AttachmentStore,
}

/// Pre-baked attachment layout of one render-pass node.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub(crate) struct RenderPassPlan {
    pub node: NodeHandle,
    pub colors: Vec<AttachmentRef>,
    /// Resolve target per color attachment, aligned with `colors`.
    pub resolves: Vec<Option<ResourceVersion>>,
    pub depth_stencil: Option<AttachmentRef>,
}

impl Default for AttachmentRef {
    fn default() -> Self {
        AttachmentRef {
            version: 0,
            load: AttachmentLoad::DontCare,
            store: AttachmentStore::Discard,
        }
    }
}

/// Builds the attachment plan for every render-pass node and validates
/// attachment structure.
///
/// `texture_desc` resolves a version to the currently known description of
/// its texture; transients with unresolved dependent attributes return
/// `None` and their extent/sample checks are deferred to the link phase.
pub(crate) fn plan_attachments(
    dag: &Dag<Node>,
    is_attachable: &dyn Fn(ResourceVersion) -> bool,
    texture_desc: &dyn Fn(ResourceVersion) -> Option<TextureInfo>,
) -> Result<(Vec<RenderPassPlan>, Vec<Option<u32>>), RenderGraphError> {
    let mut plans = Vec::new();
    let mut node_plan = vec![None; dag.len()];

    for handle in dag.handles() {
        let node = dag.node(handle);
        if node.job_type != JobType::RenderPass {
            continue;
        }

        let mut plan = RenderPassPlan {
            node: handle,
            ..Default::default()
        };

        for write in &node.write {
            let is_attachment = write.state == ResourceState::COLOR_TARGET
                || write.state == ResourceState::COLOR_MULTISAMPLE_RESOLVE
                || write.state == ResourceState::DEPTH_STENCIL_TARGET;
            if is_attachment && !is_attachable(write.version) {
                return Err(RenderGraphError::AttachmentNotTexture(write.version));
            }

            match write.state {
                ResourceState::COLOR_TARGET => {
                    plan.colors.push(AttachmentRef {
                        version: write.version,
                        load: write.load,
                        store: write.store,
                    });
                    plan.resolves.push(None);
                }
                ResourceState::DEPTH_STENCIL_TARGET => {
                    if plan.depth_stencil.is_some() {
                        return Err(RenderGraphError::MultipleDepthStencil(node.name.clone()));
                    }
                    plan.depth_stencil = Some(AttachmentRef {
                        version: write.version,
                        load: write.load,
                        store: write.store,
                    });
                }
                _ => {}
            }
        }

        /* Pair resolves positionally with the color targets. */
        let mut resolve_idx = 0;
        for write in &node.write {
            if write.state != ResourceState::COLOR_MULTISAMPLE_RESOLVE {
                continue;
            }

            if resolve_idx >= plan.colors.len() {
                return Err(RenderGraphError::ResolveWithoutColorTarget(node.name.clone()));
            }

            if let Some(desc) = texture_desc(plan.colors[resolve_idx].version) {
                if desc.samples == 1 {
                    return Err(RenderGraphError::ResolveWithoutMultisample(node.name.clone()));
                }
            }

            plan.resolves[resolve_idx] = Some(write.version);
            resolve_idx += 1;
        }

        /* Attachments with known descriptions must agree on extent and
         * sample count; resolve targets only share the extent. */
        let mut expected: Option<(u32, u32, u8)> = None;
        let attachments = plan
            .colors
            .iter()
            .chain(plan.depth_stencil.iter())
            .map(|attachment| attachment.version);

        for version in attachments {
            if let Some(desc) = texture_desc(version) {
                let current = (desc.extent.x, desc.extent.y, desc.samples);
                match expected {
                    None => expected = Some(current),
                    Some(first) if first != current => {
                        return Err(RenderGraphError::AttachmentMismatch(node.name.clone()));
                    }
                    Some(_) => {}
                }
            }
        }

        node_plan[handle as usize] = Some(plans.len() as u32);
        plans.push(plan);
    }

    Ok((plans, node_plan))
}

#[cfg(test)]
mod tests {
    use super::super::super::rhi_structs::Extent3D;
    use super::super::ResourceWrite;
    use super::*;
    use std::collections::HashMap;

    fn render_pass(writes: Vec<ResourceWrite>) -> Dag<Node> {
        let mut dag = Dag::new();
        dag.add_node(Node {
            job_type: JobType::RenderPass,
            capabilities: Capability::GRAPHICS,
            is_async: false,
            name: "pass".to_owned(),
            read: Vec::new(),
            write: writes,
        });
        dag
    }

    fn write(version: ResourceVersion, state: ResourceState) -> ResourceWrite {
        ResourceWrite {
            version,
            state,
            load: AttachmentLoad::Clear,
            store: AttachmentStore::Store,
        }
    }

    fn desc(samples: u8, extent: (u32, u32)) -> TextureInfo {
        TextureInfo {
            samples,
            extent: Extent3D::new(extent.0, extent.1, 1),
            ..Default::default()
        }
    }

    #[test]
    fn resolves_pair_positionally() {
        let dag = render_pass(vec![
            write(1, ResourceState::COLOR_TARGET),
            write(2, ResourceState::COLOR_TARGET),
            write(3, ResourceState::COLOR_MULTISAMPLE_RESOLVE),
            write(4, ResourceState::COLOR_MULTISAMPLE_RESOLVE),
            write(5, ResourceState::DEPTH_STENCIL_TARGET),
        ]);

        let descs: HashMap<ResourceVersion, TextureInfo> = vec![
            (1, desc(4, (1920, 1080))),
            (2, desc(4, (1920, 1080))),
            (5, desc(4, (1920, 1080))),
        ]
        .into_iter()
        .collect();

        let (plans, node_plan) = plan_attachments(
            &dag,
            &|_| true,
            &|version| descs.get(&version).cloned(),
        )
        .unwrap();

        assert_eq!(plans.len(), 1);
        assert_eq!(node_plan[0], Some(0));

        let plan = &plans[0];
        assert_eq!(plan.colors.len(), 2);
        assert_eq!(plan.resolves, vec![Some(3), Some(4)]);
        assert_eq!(plan.depth_stencil.map(|a| a.version), Some(5));
    }

    #[test]
    fn second_depth_stencil_is_rejected() {
        let dag = render_pass(vec![
            write(1, ResourceState::DEPTH_STENCIL_TARGET),
            write(2, ResourceState::DEPTH_STENCIL_TARGET),
        ]);

        let result = plan_attachments(&dag, &|_| true, &|_| None);
        assert_eq!(
            result.unwrap_err(),
            RenderGraphError::MultipleDepthStencil("pass".to_owned())
        );
    }

    #[test]
    fn resolve_on_single_sampled_target_is_rejected() {
        let dag = render_pass(vec![
            write(1, ResourceState::COLOR_TARGET),
            write(2, ResourceState::COLOR_MULTISAMPLE_RESOLVE),
        ]);

        let result = plan_attachments(&dag, &|_| true, &|_| Some(desc(1, (64, 64))));
        assert_eq!(
            result.unwrap_err(),
            RenderGraphError::ResolveWithoutMultisample("pass".to_owned())
        );
    }

    #[test]
    fn resolve_without_color_target_is_rejected() {
        let dag = render_pass(vec![write(1, ResourceState::COLOR_MULTISAMPLE_RESOLVE)]);

        let result = plan_attachments(&dag, &|_| true, &|_| None);
        assert_eq!(
            result.unwrap_err(),
            RenderGraphError::ResolveWithoutColorTarget("pass".to_owned())
        );
    }

    #[test]
    fn mismatched_extents_are_rejected() {
        let dag = render_pass(vec![
            write(1, ResourceState::COLOR_TARGET),
            write(2, ResourceState::DEPTH_STENCIL_TARGET),
        ]);

        let descs: HashMap<ResourceVersion, TextureInfo> =
            vec![(1, desc(1, (1920, 1080))), (2, desc(1, (1280, 720)))]
                .into_iter()
                .collect();

        let result = plan_attachments(&dag, &|_| true, &|version| descs.get(&version).cloned());
        assert_eq!(
            result.unwrap_err(),
            RenderGraphError::AttachmentMismatch("pass".to_owned())
        );
    }

    #[test]
    fn non_texture_attachment_is_rejected() {
        let dag = render_pass(vec![write(7, ResourceState::COLOR_TARGET)]);

        let result = plan_attachments(&dag, &|_| false, &|_| None);
        assert_eq!(result.unwrap_err(), RenderGraphError::AttachmentNotTexture(7));
    }
}
