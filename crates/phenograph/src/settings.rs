use std::fs;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Mosaic preview configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MosaicSettings {
    #[serde(rename = "mosaic_enabled", default)]
    pub enabled: bool,
    /// Rows of image names; `"source"` stands for the input image.
    #[serde(rename = "mosaic_images", default)]
    pub layout: Vec<Vec<String>>,
}

/// Pipeline-wide settings, persisted flattened into the document's `settings` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PipelineSettings {
    /// Store every module preview in the named-image store.
    pub debug_mode: bool,
    /// Emit the source image before running the tree.
    pub show_source_image: bool,
    /// Attach a mosaic of the children's previews to each group's progress event.
    pub allow_step_mosaics: bool,
    /// Halt once an event reaches this severity (1..=5, 5 never halts).
    #[serde(rename = "stop_on")]
    #[schemars(range(min = 1, max = 5))]
    pub stop_on_severity: u8,
    /// Injected into every operator exposing a `path` parameter.
    pub image_output_path: String,
    #[serde(flatten)]
    pub mosaic: MosaicSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            debug_mode: false,
            show_source_image: false,
            allow_step_mosaics: false,
            stop_on_severity: 3,
            image_output_path: String::new(),
            mosaic: MosaicSettings::default(),
        }
    }
}

impl PipelineSettings {
    /// Whether `name` appears in an enabled mosaic layout.
    pub fn mosaic_references(&self, name: &str) -> bool {
        self.mosaic.enabled && self.mosaic.layout.iter().flatten().any(|cell| cell == name)
    }

    /// Clamp out-of-range values into their valid domain.
    pub fn normalized(mut self) -> Self {
        self.stop_on_severity = self.stop_on_severity.clamp(1, 5);
        self
    }

    pub fn schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(PipelineSettings)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: PipelineSettings = toml::from_str(content)?;
        Ok(settings.normalized())
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let settings: PipelineSettings = serde_json::from_str(content)?;
        Ok(settings.normalized())
    }

    /// Auto-detect the file format from the extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml(&content),
            Some("json") => Self::from_json(&content),
            _ => Err(PipelineError::UnsupportedFileFormat),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => self.to_toml()?,
            Some("json") => serde_json::to_string_pretty(self)?,
            _ => return Err(PipelineError::UnsupportedFileFormat),
        };
        fs::write(path, content)?;
        Ok(())
    }
}
