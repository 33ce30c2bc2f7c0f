use crate::{
    error::Result,
    node::{GroupNode, ModuleNode, NodeId, SourceRef},
    pipeline::Pipeline,
    settings::PipelineSettings,
    traits::Operator,
    tree::NodeTree,
    types::MergeMode,
};

pub const FIX_IMAGE: &str = "Fix image";
pub const PRE_PROCESS_IMAGE: &str = "Pre process image";
pub const BUILD_MASK: &str = "Build mask";
pub const APPLY_ROIS: &str = "Apply ROIs";
pub const CLEAN_MASK: &str = "Clean mask";
pub const ASSERT_MASK_POSITION: &str = "Assert mask position";
pub const EXTRACT_FEATURES: &str = "Extract features";
pub const BUILD_IMAGES: &str = "Build images";

/// A top-level group waiting to be built, with its modules.
struct GroupSpec {
    group: GroupNode,
    modules: Vec<Box<dyn Operator>>,
}

/// Builder for creating pipelines with a fluent API
pub struct PipelineBuilder {
    name: String,
    description: String,
    settings: PipelineSettings,
    groups: Vec<GroupSpec>,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new() -> Self {
        Self {
            name: "Pipeline".to_string(),
            description: String::new(),
            settings: PipelineSettings::default(),
            groups: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Replace all settings at once
    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.settings.debug_mode = enabled;
        self
    }

    /// Severity level (1..=5) at which execution halts
    pub fn stop_on(mut self, level: u8) -> Self {
        self.settings.stop_on_severity = level;
        self
    }

    pub fn image_output_path(mut self, path: impl Into<String>) -> Self {
        self.settings.image_output_path = path.into();
        self
    }

    /// Enable the final mosaic with the given rows of image names
    pub fn with_mosaic(mut self, layout: Vec<Vec<String>>) -> Self {
        self.settings.mosaic.enabled = true;
        self.settings.mosaic.layout = layout;
        self
    }

    /// Append a top-level group; following [`Self::module`] calls fill it
    pub fn group(mut self, name: impl Into<String>, merge_mode: MergeMode, source: SourceRef) -> Self {
        self.groups.push(GroupSpec {
            group: GroupNode::new(name, merge_mode, source),
            modules: Vec::new(),
        });
        self
    }

    /// Add a module to the most recent group, or to the root when no group was added yet
    pub fn module<O>(mut self, operator: O) -> Self
    where
        O: Operator + 'static,
    {
        match self.groups.last_mut() {
            Some(spec) => spec.modules.push(Box::new(operator)),
            None => self.groups.push(GroupSpec {
                group: GroupNode::new("Steps", MergeMode::Chain, SourceRef::NearestPriorOutput),
                modules: vec![Box::new(operator)],
            }),
        }
        self
    }

    /// Lay out the fixed group template used for imported legacy pipelines.
    ///
    /// `Assert mask position` is only added when `with_assert` is set.
    pub fn legacy_template(mut self, mask_merge: MergeMode, with_assert: bool) -> Self {
        let mut layout = vec![
            (FIX_IMAGE, MergeMode::Chain, SourceRef::OriginalInput),
            (PRE_PROCESS_IMAGE, MergeMode::Chain, SourceRef::NearestPriorOutput),
            (BUILD_MASK, mask_merge, SourceRef::NearestPriorOutput),
            (APPLY_ROIS, MergeMode::Chain, SourceRef::NearestPriorOutput),
            (CLEAN_MASK, MergeMode::Chain, SourceRef::NearestPriorOutput),
        ];
        if with_assert {
            layout.push((ASSERT_MASK_POSITION, MergeMode::Chain, SourceRef::NearestPriorOutput));
        }
        layout.push((EXTRACT_FEATURES, MergeMode::None, SourceRef::NearestPriorOutput));
        layout.push((BUILD_IMAGES, MergeMode::None, SourceRef::OriginalInput));

        for (name, merge_mode, source) in layout {
            self.groups.push(GroupSpec {
                group: GroupNode::new(name, merge_mode, source).with_no_delete(true),
                modules: Vec::new(),
            });
        }
        self
    }

    /// Build the pipeline
    pub fn build(self) -> Result<Pipeline> {
        let mut tree = NodeTree::new();
        let root = tree.root_id();
        for spec in self.groups {
            let group = tree.insert_group(root, NodeId::new(), spec.group)?;
            for operator in spec.modules {
                tree.insert_module(group, NodeId::new(), ModuleNode::new(operator))?;
            }
        }

        let mut pipeline = Pipeline::from_tree(tree, self.settings.normalized(), self.name);
        pipeline.description = self.description;
        Ok(pipeline)
    }

    /// Build a two-group pipeline: brightness correction then a fixed threshold
    pub fn build_simple(threshold: u8) -> Result<Pipeline> {
        use crate::algorithms::{Brightness, Threshold};

        let mut mask = Threshold::default();
        mask.params_mut().set("threshold", threshold)?;
        Self::new()
            .name("Simple threshold")
            .group(FIX_IMAGE, MergeMode::Chain, SourceRef::OriginalInput)
            .module(Brightness::default())
            .group(BUILD_MASK, MergeMode::Chain, SourceRef::NearestPriorOutput)
            .module(mask)
            .build()
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
