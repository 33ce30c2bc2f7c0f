use std::path::Path;

use image::{DynamicImage, GrayImage};

use crate::{
    error::{PipelineError, Result},
    node::NodeId,
    types::{FeatureData, Roi},
};

/// A region registered on the context, remembering which node produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredRoi {
    pub roi: Roi,
    pub linked_node: Option<NodeId>,
}

/// Per-image processing state shared by every node of one run.
///
/// The `locked` flag is advisory: it only stops callers from swapping the
/// source image while a pipeline is executing.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    identity: String,
    source: DynamicImage,
    pub image: DynamicImage,
    pub mask: Option<GrayImage>,
    rois: Vec<RegisteredRoi>,
    pub features: FeatureData,
    named_images: Vec<(String, DynamicImage)>,
    locked: bool,
}

impl ProcessingContext {
    /// Wrap an image. `identity` decides whether memoized results are reused.
    pub fn new(identity: impl Into<String>, image: DynamicImage) -> Self {
        Self {
            identity: identity.into(),
            image: image.clone(),
            source: image,
            mask: None,
            rois: Vec::new(),
            features: FeatureData::new(),
            named_images: Vec::new(),
            locked: false,
        }
    }

    /// Load an image from disk, using its path as identity.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)?;
        Ok(Self::new(path.display().to_string(), image))
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn source_image(&self) -> &DynamicImage {
        &self.source
    }

    /// Replace the input image, resetting all derived state.
    pub fn set_source_image(&mut self, identity: impl Into<String>, image: DynamicImage) -> Result<()> {
        if self.locked {
            return Err(PipelineError::ContextLocked);
        }
        *self = Self::new(identity, image);
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub(crate) fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    /// Clear everything a previous run left behind, keeping the source.
    pub(crate) fn reset(&mut self) {
        self.image = self.source.clone();
        self.mask = None;
        self.rois.clear();
        self.features.clear();
        self.named_images.clear();
    }

    pub fn add_roi(&mut self, roi: Roi, linked_node: Option<NodeId>) {
        self.rois.push(RegisteredRoi { roi, linked_node });
    }

    pub fn rois(&self) -> &[RegisteredRoi] {
        &self.rois
    }

    pub fn rois_by_name<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Roi> + 'a {
        self.rois.iter().filter(move |r| r.roi.name == name).map(|r| &r.roi)
    }

    pub fn rois_linked_to(&self, node: NodeId) -> impl Iterator<Item = &Roi> + '_ {
        self.rois
            .iter()
            .filter(move |r| r.linked_node == Some(node))
            .map(|r| &r.roi)
    }

    pub fn merge_features(&mut self, data: &FeatureData) {
        for (key, value) in data {
            self.features.insert(key.clone(), value.clone());
        }
    }

    /// Store a named intermediate image; a name stored twice keeps the newest image.
    pub fn store_image(&mut self, name: impl Into<String>, image: DynamicImage) {
        let name = name.into();
        self.named_images.retain(|(n, _)| *n != name);
        self.named_images.push((name, image));
    }

    pub fn named_image(&self, name: &str) -> Option<&DynamicImage> {
        self.named_images
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, image)| image)
    }

    pub fn last_named_image(&self) -> Option<&DynamicImage> {
        self.named_images.last().map(|(_, image)| image)
    }

    pub fn named_images(&self) -> impl Iterator<Item = (&str, &DynamicImage)> {
        self.named_images.iter().map(|(n, image)| (n.as_str(), image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RoiShape, RoiType};

    fn context() -> ProcessingContext {
        ProcessingContext::new("plant_001", DynamicImage::new_rgb8(8, 8))
    }

    #[test]
    fn test_locked_context_rejects_new_source() {
        let mut ctx = context();
        ctx.set_locked(true);
        let err = ctx
            .set_source_image("plant_002", DynamicImage::new_rgb8(4, 4))
            .unwrap_err();
        assert!(matches!(err, PipelineError::ContextLocked));
        assert_eq!(ctx.identity(), "plant_001");

        ctx.set_locked(false);
        ctx.set_source_image("plant_002", DynamicImage::new_rgb8(4, 4))
            .expect("unlocked context accepts a new image");
        assert_eq!(ctx.identity(), "plant_002");
        assert_eq!(ctx.source_image().width(), 4);
    }

    #[test]
    fn test_store_image_replaces_same_name() {
        let mut ctx = context();
        ctx.store_image("blur", DynamicImage::new_rgb8(1, 1));
        ctx.store_image("threshold", DynamicImage::new_rgb8(2, 2));
        ctx.store_image("blur", DynamicImage::new_rgb8(3, 3));
        assert_eq!(ctx.named_images().count(), 2);
        assert_eq!(ctx.last_named_image().map(|i| i.width()), Some(3));
    }

    #[test]
    fn test_roi_registry_queries() {
        let mut ctx = context();
        let node = NodeId::new();
        let shape = RoiShape::Circle { cx: 4, cy: 4, radius: 2 };
        ctx.add_roi(Roi::new("pot", shape.clone(), RoiType::Keep), Some(node));
        ctx.add_roi(Roi::new("tray", shape, RoiType::Delete), None);
        assert_eq!(ctx.rois_by_name("pot").count(), 1);
        assert_eq!(ctx.rois_linked_to(node).count(), 1);
        assert_eq!(ctx.rois().len(), 2);
    }
}
