//! Static checks over a pipeline tree. Purely advisory: nothing here blocks execution.

use std::collections::HashSet;
use std::fmt;

use crate::{node::NodeId, pipeline::Pipeline, types::IoKind};

/// A module whose input is not produced by anything running before it.
#[derive(Debug, Clone, PartialEq)]
pub struct InputIssue {
    pub node: NodeId,
    pub name: String,
    pub expected: IoKind,
}

impl fmt::Display for InputIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) expects a {} input but nothing before it produces one", self.name, self.node, self.expected)
    }
}

/// Walk enabled modules in execution order and report every `Mask`, `Data`
/// or `Roi` input with no earlier enabled producer.
pub fn check_inputs(pipeline: &Pipeline) -> Vec<InputIssue> {
    let tree = pipeline.tree();
    let mut produced: HashSet<IoKind> = HashSet::new();
    let mut issues = Vec::new();

    for id in tree.dfs_order() {
        let Some(module) = tree.get(id).and_then(|n| n.as_module()) else {
            continue;
        };
        if !module.enabled {
            continue;
        }
        let expected = module.operator.input_kind();
        if matches!(expected, IoKind::Mask | IoKind::Data | IoKind::Roi) && !produced.contains(&expected) {
            issues.push(InputIssue {
                node: id,
                name: module.operator.name().to_string(),
                expected,
            });
        }
        produced.insert(module.operator.output_kind());
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        algorithms::{MaskFeatures, MorphologyCleanup, Threshold},
        node::SourceRef,
        types::MergeMode,
    };

    #[test]
    fn test_missing_mask_producer_is_reported() {
        let mut pipeline = Pipeline::new("check");
        let root = pipeline.root_id();
        let group = pipeline.add_group(root, "Clean", MergeMode::Chain, SourceRef::default()).unwrap();
        let cleanup = pipeline.add_module(group, Box::new(MorphologyCleanup::default())).unwrap();
        pipeline.add_module(group, Box::new(Threshold::default())).unwrap();
        pipeline.add_module(group, Box::new(MaskFeatures::default())).unwrap();

        let issues = check_inputs(&pipeline);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].node, cleanup);
        assert_eq!(issues[0].expected, IoKind::Mask);
    }

    #[test]
    fn test_disabled_producer_does_not_count() {
        let mut pipeline = Pipeline::new("check");
        let root = pipeline.root_id();
        let thresh = pipeline.add_module(root, Box::new(Threshold::default())).unwrap();
        pipeline.add_module(root, Box::new(MaskFeatures::default())).unwrap();
        assert!(check_inputs(&pipeline).is_empty());

        pipeline.set_enabled(thresh, false).unwrap();
        assert_eq!(check_inputs(&pipeline).len(), 1);
    }
}
