use std::path::{Path, PathBuf};

use image::{DynamicImage, Rgb};

use crate::{
    context::ProcessingContext,
    error::ToolError,
    params::ToolParams,
    traits::{Operator, ToolOutput},
    types::IoKind,
};

/// Black out everything outside the working mask.
///
/// When `path` is set the result is also written there as
/// `<image stem>_masked.png`.
#[derive(Debug, Clone)]
pub struct MaskedImage {
    params: ToolParams,
}

impl Default for MaskedImage {
    fn default() -> Self {
        Self {
            params: ToolParams::new().with("path", "", "Output folder, empty to keep the image in memory"),
        }
    }
}

impl MaskedImage {
    fn output_file(&self, ctx: &ProcessingContext) -> Option<PathBuf> {
        let folder = self.params.get_str("path")?;
        if folder.trim().is_empty() {
            return None;
        }
        let stem = Path::new(ctx.identity())
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        Some(Path::new(folder.trim()).join(format!("{stem}_masked.png")))
    }
}

impl Operator for MaskedImage {
    fn name(&self) -> &str {
        "Masked image"
    }

    fn class_name(&self) -> &'static str {
        "MaskedImage"
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
        let mask = ctx.mask.as_ref().ok_or_else(|| ToolError::MissingMask {
            tool: self.name().to_string(),
        })?;
        let mut rgb = ctx.image.to_rgb8();
        if rgb.dimensions() != mask.dimensions() {
            return Err(ToolError::Failed {
                tool: self.name().to_string(),
                message: format!(
                    "mask is {:?} but image is {:?}",
                    mask.dimensions(),
                    rgb.dimensions()
                ),
            });
        }
        for (px, m) in rgb.pixels_mut().zip(mask.pixels()) {
            if m[0] == 0 {
                *px = Rgb([0, 0, 0]);
            }
        }
        let masked = DynamicImage::ImageRgb8(rgb);

        if let Some(file) = self.output_file(ctx) {
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent).map_err(|e| ToolError::Failed {
                    tool: self.name().to_string(),
                    message: e.to_string(),
                })?;
            }
            masked.save(&file).map_err(|e| ToolError::Failed {
                tool: self.name().to_string(),
                message: format!("cannot write {}: {e}", file.display()),
            })?;
        }

        Ok(ToolOutput::image(masked.clone()).with_intermediate("masked_image", masked))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ToolValue;
    use image::{GrayImage, Luma, RgbImage};

    #[test]
    fn test_masked_image_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ProcessingContext::new(
            "/data/plant_7.png",
            DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([200, 100, 50]))),
        );
        let mut mask = GrayImage::new(4, 4);
        mask.put_pixel(1, 1, Luma([255]));
        ctx.mask = Some(mask);

        let mut tool = MaskedImage::default();
        tool.params_mut().set("path", dir.path().display().to_string()).unwrap();
        let output = tool.execute(&ctx).unwrap();

        let Some(ToolValue::Image(image)) = output.result else {
            panic!("expected an image");
        };
        let rgb = image.to_rgb8();
        assert_eq!(*rgb.get_pixel(1, 1), Rgb([200, 100, 50]));
        assert_eq!(*rgb.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert!(dir.path().join("plant_7_masked.png").exists());
    }
}
