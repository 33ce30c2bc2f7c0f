use image::{DynamicImage, GrayImage};

use crate::{
    context::ProcessingContext,
    error::ToolError,
    params::ToolParams,
    traits::{Operator, ToolOutput},
    types::IoKind,
};

/// Shift every channel by a constant.
#[derive(Debug, Clone)]
pub struct Brightness {
    params: ToolParams,
}

impl Default for Brightness {
    fn default() -> Self {
        Self {
            params: ToolParams::new().with("delta", 0, "Value added to every channel (-255..255)"),
        }
    }
}

impl Operator for Brightness {
    fn name(&self) -> &str {
        "Brightness"
    }

    fn class_name(&self) -> &'static str {
        "Brightness"
    }

    fn description(&self) -> &str {
        "Brighten or darken the image"
    }

    fn input_kind(&self) -> IoKind {
        IoKind::Image
    }

    fn output_kind(&self) -> IoKind {
        IoKind::Image
    }

    fn params(&self) -> &ToolParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ToolParams {
        &mut self.params
    }

    fn execute(&mut self, ctx: &ProcessingContext) -> Result<ToolOutput, ToolError> {
        let delta = self.params.get_i64("delta").unwrap_or(0).clamp(-255, 255);
        Ok(ToolOutput::image(ctx.image.brighten(delta as i32)))
    }
}

/// Gaussian blur for noise reduction
#[derive(Debug, Clone)]
pub struct GaussianBlur {
    params: ToolParams,
}

impl Default for GaussianBlur {
    fn default() -> Self {
        Self {
            params: ToolParams::new().with("sigma", 1.0, "Standard deviation of the kernel"),
        }
    }
}

impl Operator for GaussianBlur {
    fn name(&self) -> &str {
        "Gaussian blur"
    }

    fn class_name(&self) -> &'static str {
        "GaussianBlur"
    }

    fn input_kind(&self) -> IoKind {
        IoKind::Image
    }

    fn output_kind(&self) -> IoKind {
        IoKind::Image
    }

    fn params(&self) -> &ToolParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ToolParams {
        &mut self.params
    }

    fn execute(&mut self, ctx: &ProcessingContext) -> Result<ToolOutput, ToolError> {
        let sigma = self.params.get_f64("sigma").unwrap_or(1.0);
        if sigma < 0.0 {
            return Err(ToolError::InvalidParameter {
                tool: self.name().to_string(),
                name: "sigma".to_string(),
                reason: "must not be negative".to_string(),
            });
        }
        if sigma == 0.0 {
            return Ok(ToolOutput::image(ctx.image.clone()));
        }
        Ok(ToolOutput::image(ctx.image.blur(sigma as f32)))
    }
}

/// Binary threshold on the luma channel, producing a 0/255 mask.
#[derive(Debug, Clone)]
pub struct Threshold {
    params: ToolParams,
}

impl Default for Threshold {
    fn default() -> Self {
        Self {
            params: ToolParams::new()
                .with("threshold", 128, "Pixels above this level become foreground")
                .with("invert", false, "Swap foreground and background")
                .with("otsu", false, "Pick the level automatically with Otsu's method"),
        }
    }
}

impl Operator for Threshold {
    fn name(&self) -> &str {
        "Threshold"
    }

    fn class_name(&self) -> &'static str {
        "Threshold"
    }

    fn description(&self) -> &str {
        "Build a binary mask from the luma channel"
    }

    fn input_kind(&self) -> IoKind {
        IoKind::Image
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
        let luma = ctx.image.to_luma8();
        let level = if self.params.get_bool("otsu").unwrap_or(false) {
            imageproc::contrast::otsu_level(&luma)
        } else {
            self.params.get_i64("threshold").unwrap_or(128).clamp(0, 255) as u8
        };

        let mut mask: GrayImage = imageproc::contrast::threshold(&luma, level);
        if self.params.get_bool("invert").unwrap_or(false) {
            for px in mask.pixels_mut() {
                px[0] = 255 - px[0];
            }
        }

        let preview = DynamicImage::ImageLuma8(mask.clone());
        Ok(ToolOutput::mask(mask)
            .with_data("threshold_level", level)
            .with_intermediate("threshold", preview))
    }
}
