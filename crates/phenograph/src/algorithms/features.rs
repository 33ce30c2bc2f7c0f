use image::{DynamicImage, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde_json::json;

use super::{detection::detect_holes, extraction::extract_contours, shape::ComplexShape, simplification::simplify_shapes};
use crate::{
    context::ProcessingContext,
    error::ToolError,
    params::ToolParams,
    traits::{Operator, ToolOutput},
    types::{FeatureData, IoKind},
};

/// Shape measurements of the working mask.
#[derive(Debug, Clone)]
pub struct MaskFeatures {
    params: ToolParams,
}

impl Default for MaskFeatures {
    fn default() -> Self {
        Self {
            params: ToolParams::new()
                .with("simplify", 0.0, "Douglas-Peucker tolerance applied before measuring, 0 to skip")
                .with("prefix", "", "Prefix added to every feature name"),
        }
    }
}

impl MaskFeatures {
    fn measure(&self, mask: &image::GrayImage) -> (FeatureData, Vec<ComplexShape>) {
        let mut shapes = detect_holes(extract_contours(mask));
        let tolerance = self.params.get_f64("simplify").unwrap_or(0.0) as f32;
        if tolerance > 0.0 {
            simplify_shapes(&mut shapes, tolerance);
        }
        shapes.retain(|shape| !shape.exterior.is_empty());

        let prefix = self.params.get_str("prefix").unwrap_or_default();
        let key = |name: &str| format!("{prefix}{name}");

        let mut data = FeatureData::new();
        let pixel_area = mask.pixels().filter(|p| p[0] > 0).count();
        data.insert(key("area"), json!(pixel_area));
        data.insert(key("shape_count"), json!(shapes.len()));
        data.insert(
            key("hole_count"),
            json!(shapes.iter().map(|s| s.holes.len()).sum::<usize>()),
        );
        data.insert(
            key("perimeter"),
            json!(shapes.iter().map(ComplexShape::perimeter).sum::<f32>()),
        );

        if let Some(largest) = shapes.iter().max_by(|a, b| {
            a.area()
                .partial_cmp(&b.area())
                .unwrap_or(std::cmp::Ordering::Equal)
        }) {
            let [cx, cy] = largest.centroid();
            let (min, max) = largest.bounding_box();
            data.insert(key("centroid_x"), json!(cx));
            data.insert(key("centroid_y"), json!(cy));
            data.insert(key("bbox_left"), json!(min[0]));
            data.insert(key("bbox_top"), json!(min[1]));
            data.insert(key("bbox_width"), json!(max[0] - min[0] + 1.0));
            data.insert(key("bbox_height"), json!(max[1] - min[1] + 1.0));
        }

        (data, shapes)
    }
}

impl Operator for MaskFeatures {
    fn name(&self) -> &str {
        "Mask features"
    }

    fn class_name(&self) -> &'static str {
        "MaskFeatures"
    }

    fn description(&self) -> &str {
        "Area, perimeter, centroid and bounding box of the mask"
    }

    fn input_kind(&self) -> IoKind {
        IoKind::Mask
    }

    fn output_kind(&self) -> IoKind {
        IoKind::Data
    }

    fn params(&self) -> &ToolParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ToolParams {
        &mut self.params
    }

    fn execute(&mut self, ctx: &ProcessingContext) -> Result<ToolOutput, ToolError> {
        let mask = ctx.mask.as_ref().ok_or_else(|| ToolError::MissingMask {
            tool: self.name().to_string(),
        })?;
        let (data, shapes) = self.measure(mask);

        let mut demo = DynamicImage::ImageLuma8(mask.clone()).to_rgb8();
        for shape in &shapes {
            let (min, max) = shape.bounding_box();
            let width = (max[0] - min[0]) as u32 + 1;
            let height = (max[1] - min[1]) as u32 + 1;
            draw_hollow_rect_mut(
                &mut demo,
                Rect::at(min[0] as i32, min[1] as i32).of_size(width, height),
                Rgb([255, 0, 255]),
            );
        }

        Ok(ToolOutput::data(data).with_demo(DynamicImage::ImageRgb8(demo)))
    }
}
