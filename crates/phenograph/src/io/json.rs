use std::collections::HashSet;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    error::{self, PipelineError},
    io::legacy::{self, LEGACY_TITLE},
    node::{GroupNode, ModuleNode, NodeId, NodeKind, SourceRef},
    pipeline::Pipeline,
    registry::ToolRegistry,
    settings::PipelineSettings,
    traits::Operator,
    tree::NodeTree,
    types::{FeatureData, MergeMode},
};

pub const DOCUMENT_TITLE: &str = "Phenograph pipeline v2";

/// Top-level pipeline document.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineDocument {
    pub title: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub settings: PipelineSettings,
    /// Root group, kept as raw JSON so broken nodes can be skipped one by one.
    #[serde(rename = "Pipeline")]
    pub pipeline: Value,
}

/// Serialized operator: class, identity and parameter values.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolDocument {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub package: String,
    #[serde(rename = "class__name__")]
    pub class_name: String,
    #[serde(rename = "module__name__", default)]
    pub module_name: String,
    #[serde(default)]
    pub params: FeatureData,
    #[serde(default)]
    pub grid_search_params: FeatureData,
}

impl ToolDocument {
    pub fn from_operator(operator: &dyn Operator) -> Self {
        Self {
            name: operator.name().to_string(),
            package: operator.package().to_string(),
            class_name: operator.class_name().to_string(),
            module_name: operator.module_name().to_string(),
            params: operator.params().values(),
            grid_search_params: operator.params().grid_search_specs(),
        }
    }
}

/// One serialized node, discriminated by `node_type`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "node_type", rename_all = "snake_case")]
pub enum NodeDocument {
    Group {
        #[serde(default)]
        merge_mode: MergeMode,
        name: String,
        #[serde(default)]
        uuid: String,
        #[serde(default = "default_source")]
        source: String,
        #[serde(default)]
        no_delete: bool,
        #[serde(default)]
        nodes: Vec<Value>,
    },
    Module {
        #[serde(default = "default_enabled", with = "enabled_flag")]
        #[schemars(with = "u8")]
        enabled: bool,
        #[serde(default)]
        uuid: String,
        tool: ToolDocument,
    },
}

fn default_source() -> String {
    SourceRef::NEAREST_PRIOR_OUTPUT.to_string()
}

fn default_enabled() -> bool {
    true
}

/// `enabled` is written as `0`/`1` and read from either an integer or a boolean.
pub(crate) mod enabled_flag {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(enabled: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*enabled))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Flag {
            Bool(bool),
            Int(i64),
        }
        Ok(match Flag::deserialize(deserializer)? {
            Flag::Bool(b) => b,
            Flag::Int(i) => i != 0,
        })
    }
}

/// Something that went wrong while loading, without aborting the load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadIssue {
    /// Where in the document, e.g. `Pipeline/Build mask/2`.
    pub location: String,
    pub message: String,
}

impl LoadIssue {
    pub fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for LoadIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// A loaded pipeline and everything that had to be skipped or repaired.
#[derive(Debug)]
pub struct LoadedPipeline {
    pub pipeline: Pipeline,
    pub issues: Vec<LoadIssue>,
}

impl LoadedPipeline {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Serialize the tree below `id`.
fn node_to_value(tree: &NodeTree, id: NodeId) -> error::Result<Value> {
    let node = tree.node(id)?;
    let document = match node.kind() {
        NodeKind::Group(group) => NodeDocument::Group {
            merge_mode: group.merge_mode,
            name: group.name.clone(),
            uuid: id.to_string(),
            source: group.source.to_string(),
            no_delete: group.no_delete,
            nodes: group
                .children
                .iter()
                .map(|child| node_to_value(tree, *child))
                .collect::<error::Result<_>>()?,
        },
        NodeKind::Module(module) => NodeDocument::Module {
            enabled: module.enabled,
            uuid: id.to_string(),
            tool: ToolDocument::from_operator(module.operator.as_ref()),
        },
    };
    Ok(serde_json::to_value(document)?)
}

pub fn to_document(pipeline: &Pipeline) -> error::Result<PipelineDocument> {
    let tree = pipeline.tree();
    Ok(PipelineDocument {
        title: DOCUMENT_TITLE.to_string(),
        name: pipeline.name.clone(),
        description: pipeline.description.clone(),
        date: pipeline.date.clone(),
        version: pipeline.version.clone(),
        settings: pipeline.settings.clone(),
        pipeline: node_to_value(tree, tree.root_id())?,
    })
}

/// Instantiate an operator from its serialized form, applying every known
/// parameter. Unknown parameters are reported and skipped.
pub(crate) fn operator_from_document(
    tool: &ToolDocument,
    registry: &ToolRegistry,
    location: &str,
    issues: &mut Vec<LoadIssue>,
) -> Option<Box<dyn Operator>> {
    let mut operator = match registry.create(&tool.class_name) {
        Ok(operator) => operator,
        Err(e) => {
            issues.push(LoadIssue::new(location, e.to_string()));
            return None;
        }
    };
    for (name, value) in &tool.params {
        if let Err(e) = operator.params_mut().set(name, value.clone()) {
            issues.push(LoadIssue::new(location, e.to_string()));
        }
    }
    for (name, spec) in &tool.grid_search_params {
        let spec = match spec {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if let Err(e) = operator.params_mut().set_grid_search(name, spec) {
            issues.push(LoadIssue::new(location, e.to_string()));
        }
    }
    Some(operator)
}

/// Tracks node ids while loading so duplicates get fresh ones.
struct Loader<'a> {
    registry: &'a ToolRegistry,
    seen: HashSet<NodeId>,
    issues: Vec<LoadIssue>,
}

impl Loader<'_> {
    fn node_id(&mut self, uuid: &str, location: &str) -> NodeId {
        let id = match NodeId::parse(uuid) {
            Some(id) if !self.seen.contains(&id) => id,
            Some(_) => {
                self.issues.push(LoadIssue::new(location, format!("duplicate uuid {uuid}, assigned a new one")));
                NodeId::new()
            }
            None => {
                self.issues.push(LoadIssue::new(location, format!("invalid uuid '{uuid}', assigned a new one")));
                NodeId::new()
            }
        };
        self.seen.insert(id);
        id
    }

    fn source(&mut self, source: &str, location: &str) -> SourceRef {
        source.parse().unwrap_or_else(|e: String| {
            self.issues.push(LoadIssue::new(location, format!("{e}, using the last output")));
            SourceRef::NearestPriorOutput
        })
    }

    fn load_children(&mut self, tree: &mut NodeTree, parent: NodeId, nodes: &[Value], location: &str) {
        for (index, value) in nodes.iter().enumerate() {
            let here = format!("{location}/{index}");
            let document: NodeDocument = match serde_json::from_value(value.clone()) {
                Ok(document) => document,
                Err(e) => {
                    self.issues.push(LoadIssue::new(&here, format!("unreadable node: {e}")));
                    continue;
                }
            };
            match document {
                NodeDocument::Group { merge_mode, name, uuid, source, no_delete, nodes } => {
                    let id = self.node_id(&uuid, &here);
                    let source = self.source(&source, &here);
                    let group = GroupNode::new(name.clone(), merge_mode, source).with_no_delete(no_delete);
                    match tree.insert_group(parent, id, group) {
                        Ok(id) => self.load_children(tree, id, &nodes, &format!("{location}/{name}")),
                        Err(e) => self.issues.push(LoadIssue::new(&here, e.to_string())),
                    }
                }
                NodeDocument::Module { enabled, uuid, tool } => {
                    let id = self.node_id(&uuid, &here);
                    let Some(operator) = operator_from_document(&tool, self.registry, &here, &mut self.issues) else {
                        continue;
                    };
                    let module = ModuleNode::new(operator).with_enabled(enabled);
                    if let Err(e) = tree.insert_module(parent, id, module) {
                        self.issues.push(LoadIssue::new(&here, e.to_string()));
                    }
                }
            }
        }
    }
}

/// Read a pipeline document, dispatching legacy documents to the converter.
pub fn from_value(value: &Value, registry: &ToolRegistry) -> error::Result<LoadedPipeline> {
    let title = value.get("title").and_then(Value::as_str).unwrap_or_default();
    if title == LEGACY_TITLE || (value.get("Pipeline").is_none() && value.get("tools").is_some()) {
        debug!("converting legacy pipeline document");
        let conversion = legacy::convert(value, registry)?;
        return Ok(LoadedPipeline {
            pipeline: conversion.pipeline,
            issues: conversion.issues,
        });
    }
    if title != DOCUMENT_TITLE {
        return Err(PipelineError::UnsupportedDocument(title.to_string()));
    }

    let mut document: PipelineDocument = serde_json::from_value(value.clone())?;
    let root: NodeDocument = serde_json::from_value(std::mem::take(&mut document.pipeline))?;
    let NodeDocument::Group { merge_mode, name, uuid, source, no_delete, nodes } = root else {
        return Err(PipelineError::UnsupportedDocument("root node is not a group".to_string()));
    };

    let mut loader = Loader {
        registry,
        seen: HashSet::new(),
        issues: Vec::new(),
    };
    let root_id = loader.node_id(&uuid, "Pipeline");
    let source = loader.source(&source, "Pipeline");
    let mut tree = NodeTree::with_root_id(root_id);
    {
        let root = tree.group_mut(root_id)?;
        root.name = name;
        root.merge_mode = merge_mode;
        root.source = source;
        root.no_delete = no_delete;
    }
    loader.load_children(&mut tree, root_id, &nodes, "Pipeline");

    for issue in &loader.issues {
        warn!(%issue, "pipeline load issue");
    }

    let mut pipeline = Pipeline::from_tree(tree, document.settings.normalized(), document.name);
    pipeline.description = document.description;
    if !document.date.is_empty() {
        pipeline.date = document.date;
    }
    if !document.version.is_empty() {
        pipeline.version = document.version;
    }
    Ok(LoadedPipeline {
        pipeline,
        issues: loader.issues,
    })
}
