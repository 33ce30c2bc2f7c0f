//! Pipeline nodes.
//!
//! A node is either a [`ModuleNode`] wrapping one operator or a
//! [`GroupNode`] combining the outputs of its children. Nodes live in a
//! [`crate::tree::NodeTree`] arena and refer to each other by [`NodeId`].

pub mod group;
pub mod module;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use group::GroupNode;
pub use module::ModuleNode;

use crate::types::NodeResult;

/// Stable node identity, persisted as the node's `uuid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where a group takes its input image from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceRef {
    /// The unmodified input image (`"source"`).
    OriginalInput,
    /// The closest earlier node that produced an image (`"last_output"`).
    #[default]
    NearestPriorOutput,
    /// The stored image of a specific node.
    NodeRef(NodeId),
}

impl SourceRef {
    pub const ORIGINAL_INPUT: &'static str = "source";
    pub const NEAREST_PRIOR_OUTPUT: &'static str = "last_output";
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::OriginalInput => f.write_str(Self::ORIGINAL_INPUT),
            SourceRef::NearestPriorOutput => f.write_str(Self::NEAREST_PRIOR_OUTPUT),
            SourceRef::NodeRef(id) => id.fmt(f),
        }
    }
}

impl FromStr for SourceRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            Self::ORIGINAL_INPUT => Ok(SourceRef::OriginalInput),
            Self::NEAREST_PRIOR_OUTPUT | "" => Ok(SourceRef::NearestPriorOutput),
            other => NodeId::parse(other)
                .map(SourceRef::NodeRef)
                .ok_or_else(|| format!("'{other}' is neither a source keyword nor a node id")),
        }
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Module(ModuleNode),
    Group(GroupNode),
}

/// Which kind of node, for counting and indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    Module,
    Group,
}

/// A node of the pipeline tree with its memoized result.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    parent: Option<NodeId>,
    pub(crate) last_result: Option<NodeResult>,
    pub(crate) kind: NodeKind,
}

impl Node {
    pub(crate) fn new(id: NodeId, parent: Option<NodeId>, kind: NodeKind) -> Self {
        Self {
            id,
            parent,
            last_result: None,
            kind,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Owning group, `None` for the root group.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn class(&self) -> NodeClass {
        match self.kind {
            NodeKind::Module(_) => NodeClass::Module,
            NodeKind::Group(_) => NodeClass::Group,
        }
    }

    pub fn last_result(&self) -> Option<&NodeResult> {
        self.last_result.as_ref()
    }

    pub fn is_computed(&self) -> bool {
        self.last_result.is_some()
    }

    pub fn invalidate(&mut self) {
        self.last_result = None;
    }

    /// Groups are always enabled.
    pub fn is_enabled(&self) -> bool {
        match &self.kind {
            NodeKind::Module(module) => module.enabled,
            NodeKind::Group(_) => true,
        }
    }

    pub fn name(&self) -> &str {
        match &self.kind {
            NodeKind::Module(module) => module.operator.name(),
            NodeKind::Group(group) => &group.name,
        }
    }

    pub fn as_group(&self) -> Option<&GroupNode> {
        match &self.kind {
            NodeKind::Group(group) => Some(group),
            NodeKind::Module(_) => None,
        }
    }

    pub fn as_module(&self) -> Option<&ModuleNode> {
        match &self.kind {
            NodeKind::Module(module) => Some(module),
            NodeKind::Group(_) => None,
        }
    }

    pub(crate) fn as_group_mut(&mut self) -> Option<&mut GroupNode> {
        match &mut self.kind {
            NodeKind::Group(group) => Some(group),
            NodeKind::Module(_) => None,
        }
    }

    pub(crate) fn as_module_mut(&mut self) -> Option<&mut ModuleNode> {
        match &mut self.kind {
            NodeKind::Module(module) => Some(module),
            NodeKind::Group(_) => None,
        }
    }
}
