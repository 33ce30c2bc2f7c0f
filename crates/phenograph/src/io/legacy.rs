//! Conversion of legacy flat pipeline documents into the group template.
//!
//! A legacy document lists its tools in a single array, each tagged with a
//! `kind`. Every kind maps to one group of the fixed template built by
//! [`PipelineBuilder::legacy_template`]. ROI tools are split by behaviour:
//! keep/delete regions end up in `Apply ROIs` followed by one `ApplyRoi`
//! per behaviour, safe/enforce regions in `Assert mask position` followed by
//! one `AssertMaskPosition` per mode.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    algorithms::{ApplyRoi, AssertMaskPosition},
    error::Result,
    io::json::{LoadIssue, ToolDocument, enabled_flag, operator_from_document},
    node::{ModuleNode, NodeId},
    pipeline::{Pipeline, builder::*},
    registry::ToolRegistry,
    settings::PipelineSettings,
    traits::Operator,
    types::{MergeMode, RoiType},
};

pub const LEGACY_TITLE: &str = "Phenograph pipeline v1";

/// Result of converting a legacy document.
#[derive(Debug)]
pub struct LegacyConversion {
    pub pipeline: Pipeline,
    pub issues: Vec<LoadIssue>,
}

#[derive(Debug, Deserialize)]
struct LegacyTool {
    kind: String,
    #[serde(default = "enabled", with = "enabled_flag")]
    enabled: bool,
    tool: ToolDocument,
}

fn enabled() -> bool {
    true
}

/// Merge mode of the `Build mask` group from the legacy `merge_method`.
fn mask_merge(method: Option<&str>, issues: &mut Vec<LoadIssue>) -> MergeMode {
    match method.map(str::to_ascii_lowercase).as_deref() {
        None | Some("and") | Some("multiply") => MergeMode::And,
        Some("or") | Some("add") => MergeMode::Or,
        Some(other) => {
            issues.push(LoadIssue::new("settings/merge_method", format!("unknown merge method '{other}', using and")));
            MergeMode::And
        }
    }
}

/// Template group receiving a tool of the given legacy kind.
fn destination(kind: &str, operator: &dyn Operator) -> Option<&'static str> {
    let group = match kind {
        "white_balance" | "exposure_fixing" => FIX_IMAGE,
        "pre_processing" => PRE_PROCESS_IMAGE,
        "threshold" => BUILD_MASK,
        "roi_static" | "roi_dynamic" => match roi_type(operator) {
            RoiType::Keep | RoiType::Delete => APPLY_ROIS,
            RoiType::Safe | RoiType::Enforce => ASSERT_MASK_POSITION,
        },
        "mask_cleanup" => CLEAN_MASK,
        "feature_extraction" => EXTRACT_FEATURES,
        "image_generator" => BUILD_IMAGES,
        _ => return None,
    };
    Some(group)
}

fn roi_type(operator: &dyn Operator) -> RoiType {
    operator
        .params()
        .get_str("roi_type")
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}

fn roi_name(operator: &dyn Operator) -> String {
    operator
        .params()
        .get_str("roi_name")
        .unwrap_or_else(|| operator.name().to_string())
}

/// A converted legacy tool waiting for insertion.
struct Placed {
    group: &'static str,
    module: ModuleNode,
    roi: Option<(RoiType, String)>,
}

/// Convert a legacy document into the current group template.
///
/// Never fails on individual tools: unknown kinds, unknown classes and
/// malformed entries become issues.
pub fn convert(document: &Value, registry: &ToolRegistry) -> Result<LegacyConversion> {
    let mut issues = Vec::new();
    let settings_value = document.get("settings").cloned().unwrap_or(Value::Null);
    let settings = match &settings_value {
        Value::Null => PipelineSettings::default(),
        value => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            issues.push(LoadIssue::new("settings", format!("unreadable settings: {e}")));
            PipelineSettings::default()
        }),
    };
    let merge = mask_merge(settings_value.get("merge_method").and_then(Value::as_str), &mut issues);

    let tools: &[Value] = match document.get("tools").and_then(Value::as_array) {
        Some(tools) => tools.as_slice(),
        None => {
            issues.push(LoadIssue::new("tools", "no tool list"));
            &[]
        }
    };

    let mut placed = Vec::new();
    for (index, value) in tools.iter().enumerate() {
        let location = format!("tools/{index}");
        let entry: LegacyTool = match serde_json::from_value(value.clone()) {
            Ok(entry) => entry,
            Err(e) => {
                issues.push(LoadIssue::new(&location, format!("malformed entry: {e}")));
                continue;
            }
        };
        let Some(operator) = operator_from_document(&entry.tool, registry, &location, &mut issues) else {
            continue;
        };
        let Some(group) = destination(&entry.kind, operator.as_ref()) else {
            issues.push(LoadIssue::new(&location, format!("unknown tool kind '{}'", entry.kind)));
            continue;
        };
        let roi = matches!(entry.kind.as_str(), "roi_static" | "roi_dynamic")
            .then(|| (roi_type(operator.as_ref()), roi_name(operator.as_ref())));
        placed.push(Placed {
            group,
            module: ModuleNode::new(operator).with_enabled(entry.enabled),
            roi,
        });
    }

    let with_assert = placed
        .iter()
        .any(|p| matches!(p.roi, Some((RoiType::Safe | RoiType::Enforce, _))));
    let name = document
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("Imported pipeline");
    let mut pipeline = Pipeline::builder()
        .name(name)
        .description(document.get("description").and_then(Value::as_str).unwrap_or_default())
        .settings(settings)
        .legacy_template(merge, with_assert)
        .build()?;

    // ROI behaviours in insertion order, per behaviour the names it covers
    let mut behaviours: Vec<(RoiType, Vec<String>)> = Vec::new();
    for p in &placed {
        if let Some((roi_type, name)) = &p.roi {
            match behaviours.iter_mut().find(|(t, _)| t == roi_type) {
                Some((_, names)) => names.push(name.clone()),
                None => behaviours.push((*roi_type, vec![name.clone()])),
            }
        }
    }

    let tree = pipeline.tree_mut();
    for p in placed {
        let Some(group) = tree.find_group(p.group) else {
            continue;
        };
        tree.insert_module(group, NodeId::new(), p.module)?;
    }

    behaviours.sort_by_key(|(roi_type, _)| *roi_type as u8);
    for (roi_type, names) in behaviours {
        let roi_names = names.join(",");
        let (group, mut operator): (&str, Box<dyn Operator>) = match roi_type {
            RoiType::Keep | RoiType::Delete => {
                let mut op = ApplyRoi::default();
                op.params_mut().set("action", roi_type.to_string())?;
                (APPLY_ROIS, Box::new(op))
            }
            RoiType::Safe | RoiType::Enforce => {
                let mut op = AssertMaskPosition::default();
                op.params_mut().set("mode", roi_type.to_string())?;
                (ASSERT_MASK_POSITION, Box::new(op))
            }
        };
        operator.params_mut().set("roi_names", roi_names)?;
        if let Some(group) = tree.find_group(group) {
            tree.insert_module(group, NodeId::new(), ModuleNode::new(operator))?;
        }
    }

    for issue in &issues {
        warn!(%issue, "legacy import issue");
    }
    debug!(modules = tree.len(), issues = issues.len(), "legacy pipeline converted");
    Ok(LegacyConversion { pipeline, issues })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(class: &str, params: Value) -> Value {
        json!({ "class__name__": class, "params": params })
    }

    fn document() -> Value {
        json!({
            "title": LEGACY_TITLE,
            "name": "Arabidopsis top view",
            "settings": { "merge_method": "multiply", "debug_mode": true },
            "tools": [
                { "kind": "exposure_fixing", "enabled": 1, "tool": tool("Brightness", json!({ "delta": 12 })) },
                { "kind": "pre_processing", "enabled": false, "tool": tool("GaussianBlur", json!({ "sigma": 2.0 })) },
                { "kind": "threshold", "enabled": true, "tool": tool("Threshold", json!({ "threshold": 90 })) },
                { "kind": "threshold", "enabled": true, "tool": tool("Threshold", json!({ "otsu": true })) },
                { "kind": "roi_static", "tool": tool("RectangleRoi", json!({ "roi_name": "pot", "roi_type": "keep" })) },
                { "kind": "roi_static", "tool": tool("CircleRoi", json!({ "roi_name": "label", "radius": 4, "roi_type": "delete" })) },
                { "kind": "roi_dynamic", "tool": tool("CircleRoi", json!({ "roi_name": "core", "radius": 9, "roi_type": "safe" })) },
                { "kind": "mask_cleanup", "tool": tool("MorphologyCleanup", json!({})) },
                { "kind": "feature_extraction", "tool": tool("MaskFeatures", json!({})) },
                { "kind": "image_generator", "tool": tool("MaskedImage", json!({})) },
                { "kind": "visualization", "tool": tool("MaskedImage", json!({})) },
                { "kind": "threshold", "tool": tool("Canny", json!({})) },
                { "enabled": true }
            ]
        })
    }

    fn class_names(pipeline: &Pipeline, group: &str) -> Vec<String> {
        let tree = pipeline.tree();
        let id = tree.find_group(group).unwrap();
        tree.children(id)
            .iter()
            .map(|c| tree.module(*c).unwrap().operator.class_name().to_string())
            .collect()
    }

    #[test]
    fn test_every_tool_is_placed_or_reported() {
        let conversion = convert(&document(), &ToolRegistry::with_builtins()).unwrap();
        let pipeline = &conversion.pipeline;

        assert_eq!(pipeline.name, "Arabidopsis top view");
        assert!(pipeline.settings.debug_mode);
        assert_eq!(class_names(pipeline, FIX_IMAGE), ["Brightness"]);
        assert_eq!(class_names(pipeline, PRE_PROCESS_IMAGE), ["GaussianBlur"]);
        assert_eq!(class_names(pipeline, BUILD_MASK), ["Threshold", "Threshold"]);
        assert_eq!(class_names(pipeline, APPLY_ROIS), ["RectangleRoi", "CircleRoi", "ApplyRoi", "ApplyRoi"]);
        assert_eq!(class_names(pipeline, ASSERT_MASK_POSITION), ["CircleRoi", "AssertMaskPosition"]);
        assert_eq!(class_names(pipeline, CLEAN_MASK), ["MorphologyCleanup"]);
        assert_eq!(class_names(pipeline, EXTRACT_FEATURES), ["MaskFeatures"]);
        assert_eq!(class_names(pipeline, BUILD_IMAGES), ["MaskedImage"]);

        // Unknown kind, unknown class, malformed entry
        assert_eq!(conversion.issues.len(), 3, "{:?}", conversion.issues);
    }

    #[test]
    fn test_merge_method_and_flags() {
        let conversion = convert(&document(), &ToolRegistry::with_builtins()).unwrap();
        let tree = conversion.pipeline.tree();
        let mask = tree.find_group(BUILD_MASK).unwrap();
        assert_eq!(tree.group(mask).unwrap().merge_mode, MergeMode::And);

        let pre = tree.find_group(PRE_PROCESS_IMAGE).unwrap();
        assert!(!tree.module(tree.children(pre)[0]).unwrap().enabled);

        let rois = tree.find_group(APPLY_ROIS).unwrap();
        let keep = tree.module(tree.children(rois)[2]).unwrap();
        assert_eq!(keep.operator.params().get_str("action").as_deref(), Some("keep"));
        assert_eq!(keep.operator.params().get_str("roi_names").as_deref(), Some("pot"));
        let delete = tree.module(tree.children(rois)[3]).unwrap();
        assert_eq!(delete.operator.params().get_str("action").as_deref(), Some("delete"));
        assert_eq!(delete.operator.params().get_str("roi_names").as_deref(), Some("label"));
    }

    #[test]
    fn test_without_safe_rois_there_is_no_assert_group() {
        let document = json!({
            "title": LEGACY_TITLE,
            "settings": { "merge_method": "add" },
            "tools": [{ "kind": "threshold", "tool": tool("Threshold", json!({})) }]
        });
        let conversion = convert(&document, &ToolRegistry::with_builtins()).unwrap();
        let tree = conversion.pipeline.tree();
        assert!(conversion.issues.is_empty());
        assert!(tree.find_group(ASSERT_MASK_POSITION).is_none());
        assert_eq!(tree.children(tree.root_id()).len(), 7);
        let mask = tree.find_group(BUILD_MASK).unwrap();
        assert_eq!(tree.group(mask).unwrap().merge_mode, MergeMode::Or);
    }
}
