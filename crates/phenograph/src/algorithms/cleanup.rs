use image::DynamicImage;
use imageproc::distance_transform::Norm;
use imageproc::morphology;

use crate::{
    context::ProcessingContext,
    error::ToolError,
    params::ToolParams,
    traits::{Operator, ToolOutput},
    types::IoKind,
};

/// Morphological opening, closing, erosion or dilation of the working mask.
#[derive(Debug, Clone)]
pub struct MorphologyCleanup {
    params: ToolParams,
}

impl Default for MorphologyCleanup {
    fn default() -> Self {
        Self {
            params: ToolParams::new()
                .with("operation", "open", "open, close, erode or dilate")
                .with("kernel_size", 1, "Structuring element radius in pixels"),
        }
    }
}

impl Operator for MorphologyCleanup {
    fn name(&self) -> &str {
        "Morphology cleanup"
    }

    fn class_name(&self) -> &'static str {
        "MorphologyCleanup"
    }

    fn description(&self) -> &str {
        "Remove speckles or fill gaps in the mask"
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
        let mask = ctx.mask.as_ref().ok_or_else(|| ToolError::MissingMask {
            tool: self.name().to_string(),
        })?;
        let k = self.params.get_i64("kernel_size").unwrap_or(1).clamp(0, 255) as u8;
        let operation = self.params.get_str("operation").unwrap_or_default();

        let cleaned = match operation.trim().to_ascii_lowercase().as_str() {
            "open" => morphology::open(mask, Norm::LInf, k),
            "close" => morphology::close(mask, Norm::LInf, k),
            "erode" => morphology::erode(mask, Norm::LInf, k),
            "dilate" => morphology::dilate(mask, Norm::LInf, k),
            other => {
                return Err(ToolError::InvalidParameter {
                    tool: self.name().to_string(),
                    name: "operation".to_string(),
                    reason: format!("unknown operation '{other}'"),
                });
            }
        };

        let preview = DynamicImage::ImageLuma8(cleaned.clone());
        Ok(ToolOutput::mask(cleaned).with_intermediate("mask_cleanup", preview))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ToolValue;
    use image::{GrayImage, Luma};

    #[test]
    fn test_open_removes_isolated_pixel() {
        let mut mask = GrayImage::new(12, 12);
        for y in 2..8 {
            for x in 2..8 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        mask.put_pixel(10, 10, Luma([255]));
        let mut ctx = ProcessingContext::new("speckle", DynamicImage::new_rgb8(12, 12));
        ctx.mask = Some(mask);

        let output = MorphologyCleanup::default().execute(&ctx).unwrap();
        let Some(ToolValue::Mask(cleaned)) = output.result else {
            panic!("expected a mask");
        };
        assert_eq!(cleaned.get_pixel(10, 10)[0], 0);
        assert_eq!(cleaned.get_pixel(4, 4)[0], 255);
    }

    #[test]
    fn test_unknown_operation() {
        let mut ctx = ProcessingContext::new("speckle", DynamicImage::new_rgb8(4, 4));
        ctx.mask = Some(GrayImage::new(4, 4));
        let mut tool = MorphologyCleanup::default();
        tool.params_mut().set("operation", "skeletonize").unwrap();
        assert!(tool.execute(&ctx).is_err());
    }
}
