use std::str::FromStr;

use image::{DynamicImage, GrayImage};

use crate::{
    context::ProcessingContext,
    error::ToolError,
    params::ToolParams,
    traits::{Operator, ToolOutput},
    types::{draw_rois, IoKind, Roi, RoiShape, RoiType},
};

fn roi_type(tool: &str, params: &ToolParams) -> Result<RoiType, ToolError> {
    let raw = params.get_str("roi_type").unwrap_or_default();
    if raw.is_empty() {
        return Ok(RoiType::Keep);
    }
    RoiType::from_str(&raw).map_err(|_| ToolError::InvalidParameter {
        tool: tool.to_string(),
        name: "roi_type".to_string(),
        reason: format!("unknown ROI type '{raw}'"),
    })
}

fn roi_name(params: &ToolParams, fallback: &str) -> String {
    params
        .get_str("roi_name")
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// Parse a comma separated ROI name list; empty means every ROI.
fn selected_names(params: &ToolParams) -> Vec<String> {
    params
        .get_str("roi_names")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn select_rois(ctx: &ProcessingContext, names: &[String]) -> Vec<Roi> {
    ctx.rois()
        .iter()
        .map(|r| &r.roi)
        .filter(|roi| names.is_empty() || names.iter().any(|n| *n == roi.name))
        .cloned()
        .collect()
}

fn union_mask(rois: &[Roi], width: u32, height: u32) -> GrayImage {
    let mut union = GrayImage::new(width, height);
    for roi in rois {
        let mask = roi.to_mask(width, height);
        for (dst, src) in union.pixels_mut().zip(mask.pixels()) {
            dst[0] = dst[0].max(src[0]);
        }
    }
    union
}

fn require_mask<'a>(tool: &str, ctx: &'a ProcessingContext) -> Result<&'a GrayImage, ToolError> {
    ctx.mask.as_ref().ok_or_else(|| ToolError::MissingMask {
        tool: tool.to_string(),
    })
}

fn roi_output(rois: Vec<Roi>, ctx: &ProcessingContext) -> ToolOutput {
    let demo = draw_rois(&ctx.image, &rois);
    ToolOutput::rois(rois).with_demo(demo)
}

/// Axis aligned rectangular region.
#[derive(Debug, Clone)]
pub struct RectangleRoi {
    params: ToolParams,
}

impl Default for RectangleRoi {
    fn default() -> Self {
        Self {
            params: ToolParams::new()
                .with("roi_name", "rectangle", "Name of the region")
                .with("left", 0, "Left edge")
                .with("top", 0, "Top edge")
                .with("width", 0, "Width, 0 means the whole image")
                .with("height", 0, "Height, 0 means the whole image")
                .with("roi_type", "keep", "keep, delete, safe or enforce"),
        }
    }
}

impl RectangleRoi {
    fn build(&self, ctx: &ProcessingContext) -> Result<Roi, ToolError> {
        let left = self.params.get_i64("left").unwrap_or(0) as i32;
        let top = self.params.get_i64("top").unwrap_or(0) as i32;
        let mut width = self.params.get_i64("width").unwrap_or(0).max(0) as u32;
        let mut height = self.params.get_i64("height").unwrap_or(0).max(0) as u32;
        if width == 0 {
            width = ctx.image.width().saturating_sub(left.max(0) as u32);
        }
        if height == 0 {
            height = ctx.image.height().saturating_sub(top.max(0) as u32);
        }
        Ok(Roi::new(
            roi_name(&self.params, "rectangle"),
            RoiShape::Rectangle { left, top, width, height },
            roi_type(self.name(), &self.params)?,
        ))
    }
}

impl Operator for RectangleRoi {
    fn name(&self) -> &str {
        "Rectangle ROI"
    }

    fn class_name(&self) -> &'static str {
        "RectangleRoi"
    }

    fn input_kind(&self) -> IoKind {
        IoKind::None
    }

    fn output_kind(&self) -> IoKind {
        IoKind::Roi
    }

    fn params(&self) -> &ToolParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ToolParams {
        &mut self.params
    }

    fn execute(&mut self, ctx: &ProcessingContext) -> Result<ToolOutput, ToolError> {
        Ok(roi_output(vec![self.build(ctx)?], ctx))
    }

    fn generate_rois(&mut self, ctx: &ProcessingContext) -> Result<Vec<Roi>, ToolError> {
        Ok(vec![self.build(ctx)?])
    }
}

/// Circular region.
#[derive(Debug, Clone)]
pub struct CircleRoi {
    params: ToolParams,
}

impl Default for CircleRoi {
    fn default() -> Self {
        Self {
            params: ToolParams::new()
                .with("roi_name", "circle", "Name of the region")
                .with("cx", 0, "Center column")
                .with("cy", 0, "Center row")
                .with("radius", 0, "Radius in pixels")
                .with("roi_type", "keep", "keep, delete, safe or enforce"),
        }
    }
}

impl CircleRoi {
    fn build(&self) -> Result<Roi, ToolError> {
        let radius = self.params.get_i64("radius").unwrap_or(0);
        if radius <= 0 {
            return Err(ToolError::InvalidParameter {
                tool: self.name().to_string(),
                name: "radius".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(Roi::new(
            roi_name(&self.params, "circle"),
            RoiShape::Circle {
                cx: self.params.get_i64("cx").unwrap_or(0) as i32,
                cy: self.params.get_i64("cy").unwrap_or(0) as i32,
                radius: radius as u32,
            },
            roi_type(self.name(), &self.params)?,
        ))
    }
}

impl Operator for CircleRoi {
    fn name(&self) -> &str {
        "Circle ROI"
    }

    fn class_name(&self) -> &'static str {
        "CircleRoi"
    }

    fn input_kind(&self) -> IoKind {
        IoKind::None
    }

    fn output_kind(&self) -> IoKind {
        IoKind::Roi
    }

    fn params(&self) -> &ToolParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ToolParams {
        &mut self.params
    }

    fn execute(&mut self, ctx: &ProcessingContext) -> Result<ToolOutput, ToolError> {
        Ok(roi_output(vec![self.build()?], ctx))
    }

    fn generate_rois(&mut self, _ctx: &ProcessingContext) -> Result<Vec<Roi>, ToolError> {
        Ok(vec![self.build()?])
    }
}

/// Keep or delete the mask pixels covered by registered ROIs.
#[derive(Debug, Clone)]
pub struct ApplyRoi {
    params: ToolParams,
}

impl Default for ApplyRoi {
    fn default() -> Self {
        Self {
            params: ToolParams::new()
                .with("roi_names", "", "Comma separated ROI names, empty for all")
                .with("action", "keep", "keep or delete"),
        }
    }
}

impl Operator for ApplyRoi {
    fn name(&self) -> &str {
        "Apply ROI"
    }

    fn class_name(&self) -> &'static str {
        "ApplyRoi"
    }

    fn input_kind(&self) -> IoKind {
        IoKind::Mask
    }

    fn output_kind(&self) -> IoKind {
        IoKind::Mask
    }

    fn params(&self) -> &ToolParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ToolParams {
        &mut self.params
    }

    fn execute(&mut self, ctx: &ProcessingContext) -> Result<ToolOutput, ToolError> {
        let mask = require_mask(self.name(), ctx)?;
        let action = self.params.get_str("action").unwrap_or_default();
        let keep = match action.trim().to_ascii_lowercase().as_str() {
            "" | "keep" => true,
            "delete" => false,
            other => {
                return Err(ToolError::InvalidParameter {
                    tool: self.name().to_string(),
                    name: "action".to_string(),
                    reason: format!("unknown action '{other}'"),
                });
            }
        };

        let rois = select_rois(ctx, &selected_names(&self.params));
        if rois.is_empty() {
            return Err(ToolError::Failed {
                tool: self.name().to_string(),
                message: "no matching ROI registered".to_string(),
            });
        }

        let union = union_mask(&rois, mask.width(), mask.height());
        let mut out = mask.clone();
        for (px, inside) in out.pixels_mut().zip(union.pixels()) {
            let covered = inside[0] > 0;
            if covered != keep {
                px[0] = 0;
            }
        }

        let demo = draw_rois(&DynamicImage::ImageLuma8(out.clone()), &rois);
        Ok(ToolOutput::mask(out).with_demo(demo))
    }
}

/// Check the mask against registered ROIs.
///
/// In `safe` mode the mask must touch every selected region; in `enforce`
/// mode no foreground pixel may lie outside their union.
#[derive(Debug, Clone)]
pub struct AssertMaskPosition {
    params: ToolParams,
}

impl Default for AssertMaskPosition {
    fn default() -> Self {
        Self {
            params: ToolParams::new()
                .with("roi_names", "", "Comma separated ROI names, empty for all")
                .with("mode", "safe", "safe or enforce"),
        }
    }
}

impl Operator for AssertMaskPosition {
    fn name(&self) -> &str {
        "Assert mask position"
    }

    fn class_name(&self) -> &'static str {
        "AssertMaskPosition"
    }

    fn input_kind(&self) -> IoKind {
        IoKind::Mask
    }

    fn output_kind(&self) -> IoKind {
        IoKind::Mask
    }

    fn params(&self) -> &ToolParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ToolParams {
        &mut self.params
    }

    fn execute(&mut self, ctx: &ProcessingContext) -> Result<ToolOutput, ToolError> {
        let mask = require_mask(self.name(), ctx)?;
        let mode = self.params.get_str("mode").unwrap_or_default();
        let mode = RoiType::from_str(mode.trim()).unwrap_or(RoiType::Safe);
        let rois = select_rois(ctx, &selected_names(&self.params));
        if rois.is_empty() {
            return Err(ToolError::Failed {
                tool: self.name().to_string(),
                message: "no matching ROI registered".to_string(),
            });
        }

        let failure = match mode {
            RoiType::Enforce => {
                let union = union_mask(&rois, mask.width(), mask.height());
                let outside = mask
                    .pixels()
                    .zip(union.pixels())
                    .filter(|(m, u)| m[0] > 0 && u[0] == 0)
                    .count();
                (outside > 0).then(|| format!("{outside} mask pixels lie outside the ROIs"))
            }
            _ => rois
                .iter()
                .find(|roi| {
                    let area = roi.to_mask(mask.width(), mask.height());
                    !mask
                        .pixels()
                        .zip(area.pixels())
                        .any(|(m, a)| m[0] > 0 && a[0] > 0)
                })
                .map(|roi| format!("mask does not touch ROI '{}'", roi.name)),
        };

        if let Some(message) = failure {
            return Err(ToolError::Failed {
                tool: self.name().to_string(),
                message,
            });
        }

        Ok(ToolOutput::mask(mask.clone()).with_data("mask_position_ok", true))
    }
}
