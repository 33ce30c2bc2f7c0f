use std::collections::BTreeMap;

use crate::{
    algorithms::*,
    error::{PipelineError, Result},
    traits::Operator,
};

type Factory = fn() -> Box<dyn Operator>;

fn make<T>() -> Box<dyn Operator>
where
    T: Operator + Default + Clone + 'static,
{
    Box::new(T::default())
}

/// Maps tool class names to constructors, used when loading pipelines.
#[derive(Clone)]
pub struct ToolRegistry {
    factories: BTreeMap<String, Factory>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry holding every operator shipped with the crate.
    pub fn with_builtins() -> Self {
        Self::new()
            .register::<Brightness>()
            .register::<GaussianBlur>()
            .register::<Threshold>()
            .register::<RectangleRoi>()
            .register::<CircleRoi>()
            .register::<ApplyRoi>()
            .register::<AssertMaskPosition>()
            .register::<MorphologyCleanup>()
            .register::<MaskFeatures>()
            .register::<MaskedImage>()
    }

    pub fn register<T>(mut self) -> Self
    where
        T: Operator + Default + Clone + 'static,
    {
        let class_name = T::default().class_name().to_string();
        self.factories.insert(class_name, make::<T>);
        self
    }

    /// Instantiate a tool with default parameters.
    pub fn create(&self, class_name: &str) -> Result<Box<dyn Operator>> {
        self.factories
            .get(class_name)
            .map(|factory| factory())
            .ok_or_else(|| PipelineError::UnknownTool(class_name.to_string()))
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.factories.contains_key(class_name)
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_are_registered_by_class_name() {
        let registry = ToolRegistry::with_builtins();
        for name in registry.class_names() {
            let tool = registry.create(name).expect("registered tool");
            assert_eq!(tool.class_name(), name);
        }
        assert_eq!(registry.class_names().count(), 10);
    }

    #[test]
    fn test_unknown_class() {
        let registry = ToolRegistry::with_builtins();
        assert!(matches!(
            registry.create("WatershedSegmentation"),
            Err(PipelineError::UnknownTool(_))
        ));
    }
}
