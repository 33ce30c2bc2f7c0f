use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Ordered key to value mapping produced by feature extraction.
pub type FeatureData = serde_json::Map<String, serde_json::Value>;

/// What a node consumes or produces.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, EnumIter, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IoKind {
    #[default]
    None,
    Image,
    Mask,
    Roi,
    Data,
}

/// How a group combines the outputs of its children.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, EnumIter, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MergeMode {
    /// Children run side by side against the same input.
    None,
    /// Each child feeds the next one.
    #[default]
    Chain,
    /// Pixel-wise logical AND of the children's images or masks.
    And,
    /// Pixel-wise logical OR of the children's images or masks.
    Or,
}

/// Event severity, ordered from harmless to fatal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, EnumIter, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Ok = 1,
    Warning = 2,
    Error = 3,
    Exception = 4,
}

impl Severity {
    pub fn level(self) -> u8 {
        self as u8
    }
}

/// What happens to the mask inside a region of interest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, EnumIter, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum RoiType {
    /// Keep only the mask pixels inside the region.
    #[default]
    Keep,
    /// Erase the mask pixels inside the region.
    Delete,
    /// The mask must touch the region.
    Safe,
    /// The mask must lie entirely inside the region.
    Enforce,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RoiShape {
    Rectangle {
        left: i32,
        top: i32,
        width: u32,
        height: u32,
    },
    Circle {
        cx: i32,
        cy: i32,
        radius: u32,
    },
}

/// Intersect a rectangle with a canvas, in i64 so far-off regions cannot overflow.
fn clip_rect(left: i32, top: i32, width: u32, height: u32, canvas_w: u32, canvas_h: u32) -> Option<Rect> {
    let x0 = i64::from(left).max(0);
    let y0 = i64::from(top).max(0);
    let x1 = (i64::from(left) + i64::from(width)).min(i64::from(canvas_w));
    let y1 = (i64::from(top) + i64::from(height)).min(i64::from(canvas_h));
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(Rect::at(x0 as i32, y0 as i32).of_size((x1 - x0) as u32, (y1 - y0) as u32))
}

/// A named region of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Roi {
    pub name: String,
    pub shape: RoiShape,
    pub roi_type: RoiType,
}

impl Roi {
    pub fn new(name: impl Into<String>, shape: RoiShape, roi_type: RoiType) -> Self {
        Self {
            name: name.into(),
            shape,
            roi_type,
        }
    }

    /// Rasterize the region into a binary mask of the given size.
    pub fn to_mask(&self, width: u32, height: u32) -> GrayImage {
        let mut mask = GrayImage::new(width, height);
        let white = Luma([255u8]);
        match self.shape {
            RoiShape::Rectangle { left, top, width: w, height: h } => {
                if let Some(rect) = clip_rect(left, top, w, h, width, height) {
                    draw_filled_rect_mut(&mut mask, rect, white);
                }
            }
            RoiShape::Circle { cx, cy, radius } => {
                draw_filled_circle_mut(&mut mask, (cx, cy), radius as i32, white);
            }
        }
        mask
    }

    /// Draw the region outline on top of an image.
    pub fn draw_on(&self, canvas: &mut RgbImage) {
        let color = match self.roi_type {
            RoiType::Keep => Rgb([0u8, 255, 0]),
            RoiType::Delete => Rgb([255u8, 0, 0]),
            RoiType::Safe => Rgb([0u8, 128, 255]),
            RoiType::Enforce => Rgb([255u8, 255, 0]),
        };
        match self.shape {
            RoiShape::Rectangle { left, top, width, height } => {
                if width > 0 && height > 0 {
                    draw_hollow_rect_mut(canvas, Rect::at(left, top).of_size(width, height), color);
                }
            }
            RoiShape::Circle { cx, cy, radius } => {
                draw_hollow_circle_mut(canvas, (cx, cy), radius as i32, color);
            }
        }
    }
}

/// Draw every ROI on a copy of `image`.
pub fn draw_rois(image: &DynamicImage, rois: &[Roi]) -> DynamicImage {
    let mut canvas = image.to_rgb8();
    for roi in rois {
        roi.draw_on(&mut canvas);
    }
    DynamicImage::ImageRgb8(canvas)
}

/// Structured output of one node execution.
///
/// Which fields are filled depends on the output kind of the node that
/// produced it. `error` is set when the result records a failure.
#[derive(Debug, Clone, Default)]
pub struct NodeResult {
    pub image: Option<DynamicImage>,
    pub mask: Option<GrayImage>,
    pub rois: Vec<Roi>,
    pub data: FeatureData,
    pub demo_image: Option<DynamicImage>,
    pub error: Option<String>,
}

impl NodeResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    /// Best image for previews: the image, else the demo image, else the mask.
    pub fn preview(&self) -> Option<DynamicImage> {
        self.image
            .clone()
            .or_else(|| self.demo_image.clone())
            .or_else(|| self.mask.clone().map(DynamicImage::ImageLuma8))
    }
}

/// One line of the pipeline error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub severity: Severity,
    pub source: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Ok < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Exception);
        assert_eq!(Severity::Error.level(), 3);
    }

    #[test]
    fn test_merge_mode_names() {
        assert_eq!(MergeMode::Chain.to_string(), "chain");
        assert_eq!(MergeMode::from_str("or").unwrap(), MergeMode::Or);
        assert_eq!(serde_json::to_string(&MergeMode::And).unwrap(), "\"and\"");
    }

    #[test]
    fn test_roi_mask_covers_the_rectangle() {
        let roi = Roi::new(
            "plant",
            RoiShape::Rectangle { left: 2, top: 3, width: 4, height: 5 },
            RoiType::Keep,
        );
        let mask = roi.to_mask(10, 10);
        for (x, y, px) in mask.enumerate_pixels() {
            let inside = (2..6).contains(&x) && (3..8).contains(&y);
            assert_eq!(px[0] == 255, inside, "at {x},{y}");
        }
    }

    #[test]
    fn test_roi_mask_clips_regions_near_the_i32_limit() {
        let roi = Roi::new(
            "far",
            RoiShape::Rectangle { left: i32::MAX - 1, top: 0, width: u32::MAX, height: 4 },
            RoiType::Keep,
        );
        let mask = roi.to_mask(8, 8);
        assert!(mask.pixels().all(|p| p[0] == 0));

        let wide = Roi::new(
            "wide",
            RoiShape::Rectangle { left: -4, top: 6, width: u32::MAX, height: 10 },
            RoiType::Keep,
        );
        let mask = wide.to_mask(8, 8);
        assert_eq!(mask.pixels().filter(|p| p[0] == 255).count(), 16);
    }

    #[test]
    fn test_roi_type_parses_case_insensitive() {
        assert_eq!(RoiType::from_str("Enforce").unwrap(), RoiType::Enforce);
    }
}
