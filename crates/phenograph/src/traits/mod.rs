use image::{DynamicImage, GrayImage};

use crate::{
    context::ProcessingContext,
    error::ToolError,
    params::ToolParams,
    types::{FeatureData, IoKind, Roi},
};

/// Primary value produced by an operator.
#[derive(Debug, Clone)]
pub enum ToolValue {
    Image(DynamicImage),
    Mask(GrayImage),
    Rois(Vec<Roi>),
    Data(FeatureData),
}

/// Everything an operator hands back after processing one image.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub result: Option<ToolValue>,
    pub demo_image: Option<DynamicImage>,
    pub data: FeatureData,
    /// Named intermediate images, oldest first.
    pub images: Vec<(String, DynamicImage)>,
}

impl ToolOutput {
    pub fn image(image: DynamicImage) -> Self {
        Self {
            result: Some(ToolValue::Image(image)),
            ..Default::default()
        }
    }

    pub fn mask(mask: GrayImage) -> Self {
        Self {
            result: Some(ToolValue::Mask(mask)),
            ..Default::default()
        }
    }

    pub fn rois(rois: Vec<Roi>) -> Self {
        Self {
            result: Some(ToolValue::Rois(rois)),
            ..Default::default()
        }
    }

    pub fn data(data: FeatureData) -> Self {
        Self {
            result: Some(ToolValue::Data(data.clone())),
            data,
            ..Default::default()
        }
    }

    pub fn with_demo(mut self, demo: DynamicImage) -> Self {
        self.demo_image = Some(demo);
        self
    }

    pub fn with_data(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn with_intermediate(mut self, name: impl Into<String>, image: DynamicImage) -> Self {
        self.images.push((name.into(), image));
        self
    }

    /// The most detailed preview available: last intermediate, else the result.
    pub fn preview(&self) -> Option<DynamicImage> {
        if let Some((_, image)) = self.images.last() {
            return Some(image.clone());
        }
        match &self.result {
            Some(ToolValue::Image(image)) => Some(image.clone()),
            Some(ToolValue::Mask(mask)) => Some(DynamicImage::ImageLuma8(mask.clone())),
            _ => self.demo_image.clone(),
        }
    }
}

/// Object-safe cloning for operators.
pub trait OperatorClone {
    fn boxed_clone(&self) -> Box<dyn Operator>;
}

impl<T> OperatorClone for T
where
    T: Operator + Clone + 'static,
{
    fn boxed_clone(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn Operator> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

/// A named, parameterized image transformation wrapped by a module node.
pub trait Operator: OperatorClone + Send + Sync {
    /// Human readable name, also used to tag previews.
    fn name(&self) -> &str;

    /// Stable identifier used by the tool registry and the JSON format.
    fn class_name(&self) -> &'static str;

    fn package(&self) -> &str {
        env!("CARGO_PKG_NAME")
    }

    fn module_name(&self) -> &str {
        "phenograph::algorithms"
    }

    fn description(&self) -> &str {
        ""
    }

    fn input_kind(&self) -> IoKind;

    fn output_kind(&self) -> IoKind;

    fn params(&self) -> &ToolParams;

    fn params_mut(&mut self) -> &mut ToolParams;

    /// Process the context's working image and mask.
    fn execute(&mut self, ctx: &ProcessingContext) -> Result<ToolOutput, ToolError>;

    /// ROI entry point, only meaningful for operators with [`IoKind::Roi`] output.
    fn generate_rois(&mut self, _ctx: &ProcessingContext) -> Result<Vec<Roi>, ToolError> {
        Err(ToolError::NoRoiSupport {
            tool: self.name().to_string(),
        })
    }
}

impl std::fmt::Debug for dyn Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operator")
            .field("class", &self.class_name())
            .field("params", &self.params().values())
            .finish()
    }
}
