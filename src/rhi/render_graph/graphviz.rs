//! Deterministic dot output for debugging compiled graphs.

use super::{RenderGraph, RenderResource};
use crate::rhi::rhi_enums::JobType;
use log::error;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

fn fill_color(job_type: JobType) -> &'static str {
    match job_type {
        JobType::RenderPass => "goldenrod1",
        JobType::Compute => "chartreuse3",
        JobType::Transfer => "darkturquoise",
    }
}

const FILL_COLOR_BUFFER: &str = "gainsboro";
const FILL_COLOR_TEXTURE: &str = "slategray1";

impl RenderGraph {
    /// Writes the compiled graph as a dot file: nodes ranked by dependency
    /// level, resources as records, read/write edges. `detailed` adds
    /// barrier tables and resource attributes.
    ///
    /// The output is deterministic for an unchanged graph, so dumps diff
    /// cleanly across runs.
    pub fn dump_graphviz(&self, path: impl AsRef<Path>, detailed: bool) {
        let mut out = String::new();

        let _ = writeln!(
            out,
            "digraph {{\nlabelloc=\"t\";\nlabel=\"RenderGraph ({})\";\nfontname=\"helvetica\";\nfontsize=24;\nrankdir=LR;\nnode [shape=record, fontname=\"helvetica\", fontsize=14, margin=\"0.2,0.15\"]\n",
            self.name
        );

        /* Nodes, one rank per dependency level. */
        for level in 0..=self.order.max_depth {
            let _ = writeln!(out, "{{\nrank=same;");

            for (sort_idx, &handle) in self.order.sorted.iter().enumerate() {
                if self.order.depths[handle as usize] != level {
                    continue;
                }

                let node = self.dag.node(handle);
                let queue = self
                    .schedule
                    .node_queue
                    .get(handle as usize)
                    .copied()
                    .unwrap_or(0);

                let _ = writeln!(
                    out,
                    "\tN{} [shape=plaintext, label=<\n\t\t<table border=\"3\" cellborder=\"1\" cellspacing=\"0\" cellpadding=\"5\">",
                    handle
                );

                let async_note = if queue != 0 { "<BR/><BR/><U>Async</U>" } else { "" };
                let _ = writeln!(
                    out,
                    "\t\t\t<tr><td align=\"center\"><B>[{}] {}</B> <BR/><BR/> Dependency level: {} {}</td></tr>",
                    sort_idx, node.name, level, async_note
                );

                if detailed {
                    let ranges = self
                        .barriers
                        .per_node
                        .get(handle as usize)
                        .copied()
                        .unwrap_or_default();

                    let image_ranges = [("In", ranges.in_image), ("Out", ranges.out_image)];
                    for (kind, range) in image_ranges.iter() {
                        for idx in range.begin..range.begin + range.count {
                            let barrier = self.barriers.image_barriers[idx as usize];
                            let _ = writeln!(
                                out,
                                "\t\t\t<tr><td align=\"left\">[{}] {} image barrier for <B>R{}</B> <BR align=\"left\"/>- src: {:?}, {:?}, {:?} <BR align=\"left\"/>- dst: {:?}, {:?}, {:?}<BR align=\"left\"/></td></tr>",
                                idx, kind, barrier.resource,
                                barrier.src_stage, barrier.src_access, barrier.old_layout,
                                barrier.dst_stage, barrier.dst_access, barrier.new_layout
                            );
                        }
                    }

                    for idx in ranges.in_buffer.begin..ranges.in_buffer.begin + ranges.in_buffer.count
                    {
                        let barrier = self.barriers.buffer_barriers[idx as usize];
                        let _ = writeln!(
                            out,
                            "\t\t\t<tr><td align=\"left\">[{}] In buffer barrier for <B>R{}</B> <BR align=\"left\"/>- src: {:?}, {:?} <BR align=\"left\"/>- dst: {:?}, {:?}<BR align=\"left\"/></td></tr>",
                            idx, barrier.resource,
                            barrier.src_stage, barrier.src_access,
                            barrier.dst_stage, barrier.dst_access
                        );
                    }

                    for idx in ranges.in_pack.begin..ranges.in_pack.begin + ranges.in_pack.count {
                        let barrier = self.barriers.pack_barriers[idx as usize];
                        let _ = writeln!(
                            out,
                            "\t\t\t<tr><td align=\"left\">[{}] In buffer-pack barrier for <B>R{}</B> <BR align=\"left\"/>- src: {:?}, {:?} <BR align=\"left\"/>- dst: {:?}, {:?}<BR align=\"left\"/></td></tr>",
                            idx, barrier.resource,
                            barrier.src_stage, barrier.src_access,
                            barrier.dst_stage, barrier.dst_access
                        );
                    }
                }

                let _ = writeln!(out, "\t\t</table>");
                let _ = writeln!(
                    out,
                    "\t> style=\"bold, filled\", fillcolor={}, fontsize=16, margin=\"0.0,0.0\"]",
                    fill_color(node.job_type)
                );
            }

            let _ = writeln!(out, "}}\n");
        }

        /* Resources, one record per version. */
        for version in 1..self.registry.version_count() {
            let id = self.registry.resource_id(version);

            match self.registry.resource_by_id(id) {
                RenderResource::Buffer(buffer) => {
                    let info = buffer.info();
                    if detailed {
                        let _ = writeln!(
                            out,
                            "R{} [label=<{{ <B>{}</B> <BR align=\"left\"/><BR align=\"left\"/> Size: {} bytes <BR align=\"left\"/> Cpu visible: {} <BR align=\"left\"/><BR align=\"left\"/> Usage: {:?} <BR align=\"left\"/> | Version: {} <BR/> ID: {} }}> style=\"rounded, filled\", fillcolor={}, fontsize=14]",
                            version, info.name, info.size, info.cpu_visible, info.usage, version, id, FILL_COLOR_BUFFER
                        );
                    } else {
                        let _ = writeln!(
                            out,
                            "R{} [label=<{{ <B>{}</B> }}> style=\"rounded, filled\", fillcolor={}, fontsize=14]",
                            version, info.name, FILL_COLOR_BUFFER
                        );
                    }
                }
                RenderResource::BufferPack(pack) => {
                    let _ = writeln!(
                        out,
                        "R{} [label=<{{ <B>{}</B> <BR/><BR/> [Buffer Pack] <BR/> Buffers: {} }}> style=\"dashed, rounded, filled\", fillcolor={}, fontsize=14]",
                        version,
                        pack.name(),
                        pack.len(),
                        FILL_COLOR_BUFFER
                    );
                }
                RenderResource::Texture(slot) => {
                    let info = slot.texture.info();
                    if detailed {
                        let _ = writeln!(
                            out,
                            "R{} [label=<{{ <B>{}</B> <BR align=\"left\"/><BR align=\"left\"/>Extent: {} x {} x {} <BR align=\"left\"/>Samples: {} <BR align=\"left\"/>Mip levels: {} <BR align=\"left\"/>Format: {:?} <BR align=\"left\"/><BR align=\"left\"/>Usage: {:?} <BR align=\"left\"/> | Version: {} <BR/> ID: {} <BR/><BR/> View: {} }}> style=\"rounded, filled\", fillcolor={}, fontsize=14]",
                            version, info.name, info.extent.x, info.extent.y, info.extent.z,
                            info.samples, info.mip_levels, info.format, info.usage,
                            version, id, slot.view, FILL_COLOR_TEXTURE
                        );
                    } else {
                        let _ = writeln!(
                            out,
                            "R{} [label=<{{ <B>{}</B> }}> style=\"rounded, filled\", fillcolor={}, fontsize=14]",
                            version, info.name, FILL_COLOR_TEXTURE
                        );
                    }
                }
                RenderResource::Null => {
                    let _ = writeln!(
                        out,
                        "R{} [label=<{{ <B>unbound</B> }}> style=\"dotted, rounded\", fontsize=14]",
                        version
                    );
                }
            }
        }

        /* Read and write edges. */
        for handle in self.dag.handles() {
            let node = self.dag.node(handle);

            for read in &node.read {
                if detailed {
                    let _ = writeln!(
                        out,
                        "R{} -> N{} [label=\"{:?}\", fontcolor=gray, color=gray]",
                        read.version, handle, read.state
                    );
                } else {
                    let _ = writeln!(
                        out,
                        "R{} -> N{} [fontcolor=gray, color=gray]",
                        read.version, handle
                    );
                }
            }

            for write in &node.write {
                if detailed {
                    let _ = writeln!(
                        out,
                        "N{} -> R{} [label=\"{:?}\", fontcolor=black, color=black]",
                        handle, write.version, write.state
                    );
                } else {
                    let _ = writeln!(
                        out,
                        "N{} -> R{} [fontcolor=black, color=black]",
                        handle, write.version
                    );
                }
            }
        }

        let _ = writeln!(out, "\n}}");

        if let Err(err) = fs::write(path.as_ref(), out) {
            error!(
                "failed to write the graphviz dump to '{}': {}",
                path.as_ref().display(),
                err
            );
        }
    }
}
