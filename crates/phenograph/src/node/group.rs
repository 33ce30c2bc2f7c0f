use image::{DynamicImage, GrayImage};
use tracing::{debug, trace};

use super::{NodeClass, NodeId, SourceRef};
use crate::{
    context::ProcessingContext,
    mosaic::{build_mosaic, build_row},
    run::{EventPayload, RunState},
    tree::NodeTree,
    types::{IoKind, MergeMode, NodeResult, Roi, Severity, draw_rois},
};

/// Ordered container combining its children's outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupNode {
    pub merge_mode: MergeMode,
    pub name: String,
    pub source: SourceRef,
    pub children: Vec<NodeId>,
    /// Template groups that cannot be removed.
    pub no_delete: bool,
}

impl GroupNode {
    pub fn new(name: impl Into<String>, merge_mode: MergeMode, source: SourceRef) -> Self {
        Self {
            merge_mode,
            name: name.into(),
            source,
            children: Vec::new(),
            no_delete: false,
        }
    }

    pub fn with_no_delete(mut self, no_delete: bool) -> Self {
        self.no_delete = no_delete;
        self
    }
}

/// Binary view of an image or mask: non-zero luma becomes 255.
fn binarize(image: &GrayImage) -> GrayImage {
    let mut out = image.clone();
    for p in out.pixels_mut() {
        p.0[0] = if p.0[0] > 0 { 255 } else { 0 };
    }
    out
}

/// Pixel-wise AND or OR of same-sized binary layers.
fn combine_layers(mode: MergeMode, layers: &[GrayImage]) -> Option<GrayImage> {
    let (first, rest) = layers.split_first()?;
    let mut combined = binarize(first);
    for layer in rest {
        for (acc, p) in combined.pixels_mut().zip(layer.pixels()) {
            let on = p.0[0] > 0;
            let keep = match mode {
                MergeMode::Or => acc.0[0] > 0 || on,
                _ => acc.0[0] > 0 && on,
            };
            acc.0[0] = if keep { 255 } else { 0 };
        }
    }
    Some(combined)
}

impl NodeTree {
    /// Run a node of either kind.
    pub(crate) fn execute_node(
        &mut self,
        id: NodeId,
        ctx: &mut ProcessingContext,
        run: &mut RunState<'_>,
    ) -> Option<NodeResult> {
        match self.get(id)?.class() {
            NodeClass::Module => self.execute_module(id, ctx, run),
            NodeClass::Group => self.execute_group(id, ctx, run),
        }
    }

    /// Image of the closest enabled node before `id` in depth-first order
    /// that outputs an image and has one stored. Ancestors of `id` are skipped.
    fn nearest_prior_image(&self, id: NodeId) -> Option<DynamicImage> {
        let order = self.dfs_order();
        let position = order.iter().position(|n| *n == id)?;
        let mut ancestors = Vec::new();
        let mut current = self.parent_of(id);
        while let Some(parent) = current {
            ancestors.push(parent);
            current = self.parent_of(parent);
        }

        order[..position]
            .iter()
            .rev()
            .filter(|n| !ancestors.contains(n))
            .filter_map(|n| self.get(*n))
            .filter(|node| node.is_enabled() && self.output_kind(node.id()) == IoKind::Image)
            .find_map(|node| node.last_result().and_then(|r| r.image.clone()))
    }

    /// Resolve where a group reads its input image from. Never fails: a
    /// dangling node reference warns once and falls back to the nearest prior output.
    fn resolve_source(
        &self,
        id: NodeId,
        source: SourceRef,
        ctx: &ProcessingContext,
        run: &mut RunState<'_>,
    ) -> DynamicImage {
        let nearest = |tree: &Self| tree.nearest_prior_image(id).unwrap_or_else(|| ctx.image.clone());
        match source {
            SourceRef::OriginalInput => ctx.source_image().clone(),
            SourceRef::NearestPriorOutput => nearest(self),
            SourceRef::NodeRef(target) => {
                let stored = self
                    .get(target)
                    .filter(|node| node.is_enabled())
                    .and_then(|node| node.last_result())
                    .and_then(|result| result.image.clone());
                match stored {
                    Some(image) => image,
                    None => {
                        let name = self.get(id).map(|n| n.name().to_string()).unwrap_or_default();
                        run.notify(
                            Severity::Warning,
                            &name,
                            format!("source node {target} has no image, using the last output"),
                            None,
                            -1,
                            -1,
                        );
                        nearest(self)
                    }
                }
            }
        }
    }

    /// Execute a group: resolve its source, run its enabled children and merge
    /// their outputs according to the merge mode.
    pub(crate) fn execute_group(
        &mut self,
        id: NodeId,
        ctx: &mut ProcessingContext,
        run: &mut RunState<'_>,
    ) -> Option<NodeResult> {
        if run.should_stop() {
            return self.get(id)?.last_result().cloned();
        }

        let group = self.group(id).ok()?.clone();
        let is_root = id == self.root_id();
        let output_kind = self.output_kind(id);
        let only_rois = self.only_rois(id);
        let children = self.enabled_children(id);
        trace!(group = %group.name, children = children.len(), "executing group");

        if is_root && run.settings.show_source_image {
            let image = ctx.source_image().clone();
            run.notify(
                Severity::Ok,
                &group.name,
                "source image",
                Some(EventPayload::Image { name: "source".to_string(), image }),
                -1,
                -1,
            );
        }

        let start_image = self.resolve_source(id, group.source, ctx, run);
        ctx.image = start_image.clone();
        let start_mask = ctx.mask.clone();
        let mut image_changed = false;
        let mut collected_rois: Vec<Roi> = Vec::new();
        let mut layers: Vec<GrayImage> = Vec::new();
        let mut previews: Vec<DynamicImage> = Vec::new();

        for child in children {
            if run.should_stop() {
                debug!(group = %group.name, "stop requested");
                break;
            }
            if group.merge_mode != MergeMode::Chain {
                ctx.image = start_image.clone();
                ctx.mask = start_mask.clone();
            }

            let is_module = self.get(child).is_some_and(|n| n.class() == NodeClass::Module);
            let child_kind = self.output_kind(child);
            let Some(result) = self.execute_node(child, ctx, run) else {
                continue;
            };

            if run.target_reached || run.target_node == Some(child) {
                run.target_reached = true;
                if group.merge_mode != MergeMode::Chain {
                    ctx.image = start_image;
                    ctx.mask = start_mask;
                }
                if is_root {
                    run.notify(
                        Severity::Ok,
                        &group.name,
                        "stopped at target node",
                        Some(EventPayload::Node { id: child, name: group.name.clone(), result: result.clone() }),
                        -1,
                        -1,
                    );
                }
                return Some(result);
            }

            if run.settings.allow_step_mosaics {
                if let Some(preview) = result.preview() {
                    previews.push(preview);
                }
            }
            if result.is_failure() {
                continue;
            }

            collected_rois.extend(result.rois.iter().cloned());
            if is_module {
                for roi in &result.rois {
                    ctx.add_roi(roi.clone(), Some(child));
                }
            }
            ctx.merge_features(&result.data);

            match group.merge_mode {
                MergeMode::Chain => match child_kind {
                    IoKind::Image => {
                        if let Some(image) = &result.image {
                            ctx.image = image.clone();
                            image_changed = true;
                        }
                    }
                    IoKind::Mask => {
                        if let Some(mask) = &result.mask {
                            ctx.mask = Some(mask.clone());
                        }
                    }
                    _ => {}
                },
                MergeMode::And | MergeMode::Or => {
                    let layer = match child_kind {
                        IoKind::Mask => result.mask.clone(),
                        IoKind::Image => result.image.as_ref().map(DynamicImage::to_luma8),
                        _ => None,
                    };
                    if let Some(layer) = layer {
                        let size_matches = layers
                            .first()
                            .is_none_or(|first| first.dimensions() == layer.dimensions());
                        if size_matches {
                            layers.push(layer);
                        } else {
                            run.notify(
                                Severity::Warning,
                                &group.name,
                                "child output size differs, skipped from merge",
                                None,
                                -1,
                                -1,
                            );
                        }
                    }
                }
                MergeMode::None => {}
            }
        }

        if group.merge_mode != MergeMode::Chain {
            ctx.image = start_image.clone();
            ctx.mask = start_mask;
        }
        if matches!(group.merge_mode, MergeMode::And | MergeMode::Or) {
            if let Some(combined) = combine_layers(group.merge_mode, &layers) {
                match output_kind {
                    IoKind::Image => {
                        ctx.image = DynamicImage::ImageLuma8(combined);
                        image_changed = true;
                    }
                    _ => ctx.mask = Some(combined),
                }
            }
        }

        let image = if only_rois {
            Some(draw_rois(&ctx.image, &collected_rois))
        } else if image_changed || ctx.last_named_image().is_none() {
            Some(ctx.image.clone())
        } else {
            ctx.last_named_image().cloned()
        };
        let result = NodeResult {
            image,
            mask: ctx.mask.clone(),
            rois: collected_rois,
            data: ctx.features.clone(),
            demo_image: None,
            error: None,
        };
        if let Some(node) = self.get_mut(id) {
            node.last_result = Some(result.clone());
        }

        if is_root {
            let payload = if run.settings.mosaic.enabled && !run.settings.mosaic.layout.is_empty() {
                run.mosaic = build_mosaic(&run.settings.mosaic.layout, run.mosaic_cache(), ctx);
                run.mosaic.clone().map(EventPayload::Mosaic)
            } else {
                None
            };
            let payload = payload.or_else(|| {
                Some(EventPayload::Node { id, name: group.name.clone(), result: result.clone() })
            });
            run.notify(Severity::Ok, &group.name, "pipeline completed", payload, -1, -1);
        } else {
            let step = self.absolute_index(id).map(|i| i as i64).unwrap_or(-1);
            let total = self.absolute_count(NodeClass::Group) as i64;
            let payload = match build_row(&previews) {
                Some(image) if run.settings.allow_step_mosaics => EventPayload::Image { name: group.name.clone(), image },
                _ => EventPayload::Node { id, name: group.name.clone(), result: result.clone() },
            };
            run.notify(
                Severity::Ok,
                &group.name,
                format!("{} completed", group.name),
                Some(payload),
                step,
                total,
            );
        }

        Some(result)
    }
}
