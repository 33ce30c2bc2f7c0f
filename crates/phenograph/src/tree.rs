//! Arena holding every node of a pipeline.

use std::collections::HashMap;

use tracing::debug;

use crate::{
    error::{PipelineError, Result},
    node::{GroupNode, ModuleNode, Node, NodeClass, NodeId, NodeKind, SourceRef},
    traits::Operator,
    types::{IoKind, MergeMode},
};

pub const ROOT_GROUP_NAME: &str = "Pipeline";

#[derive(Debug, Clone)]
pub struct NodeTree {
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTree {
    /// A tree holding only the root `Chain` group.
    pub fn new() -> Self {
        Self::with_root_id(NodeId::new())
    }

    pub(crate) fn with_root_id(root: NodeId) -> Self {
        let group = GroupNode::new(ROOT_GROUP_NAME, MergeMode::Chain, SourceRef::OriginalInput);
        let mut nodes = HashMap::new();
        nodes.insert(root, Node::new(root, None, NodeKind::Group(group)));
        Self { nodes, root }
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.get(id).ok_or(PipelineError::UnknownNode(id))
    }

    pub fn group(&self, id: NodeId) -> Result<&GroupNode> {
        self.node(id)?.as_group().ok_or(PipelineError::NotAGroup(id))
    }

    pub(crate) fn group_mut(&mut self, id: NodeId) -> Result<&mut GroupNode> {
        self.get_mut(id)
            .ok_or(PipelineError::UnknownNode(id))?
            .as_group_mut()
            .ok_or(PipelineError::NotAGroup(id))
    }

    pub fn module(&self, id: NodeId) -> Result<&ModuleNode> {
        self.node(id)?.as_module().ok_or(PipelineError::NotAModule(id))
    }

    pub(crate) fn module_mut(&mut self, id: NodeId) -> Result<&mut ModuleNode> {
        self.get_mut(id)
            .ok_or(PipelineError::UnknownNode(id))?
            .as_module_mut()
            .ok_or(PipelineError::NotAModule(id))
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(Node::parent)
    }

    /// Walk parent links up to the root group.
    pub fn root_of(&self, id: NodeId) -> Option<NodeId> {
        let mut current = self.get(id)?.id();
        while let Some(parent) = self.parent_of(current) {
            current = parent;
        }
        Some(current)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id)
            .and_then(Node::as_group)
            .map(|g| g.children.as_slice())
            .unwrap_or(&[])
    }

    /// Find a group by name anywhere in the tree.
    pub fn find_group(&self, name: &str) -> Option<NodeId> {
        self.dfs_order()
            .into_iter()
            .find(|id| self.get(*id).and_then(Node::as_group).is_some_and(|g| g.name == name))
    }

    pub fn add_module(&mut self, parent: NodeId, operator: Box<dyn Operator>) -> Result<NodeId> {
        self.insert_module(parent, NodeId::new(), ModuleNode::new(operator))
    }

    /// Append a group; a name already used by a sibling group gets a numeric suffix.
    pub fn add_group(
        &mut self,
        parent: NodeId,
        name: &str,
        merge_mode: MergeMode,
        source: SourceRef,
    ) -> Result<NodeId> {
        let name = self.unique_group_name(parent, name)?;
        self.insert_group(parent, NodeId::new(), GroupNode::new(name, merge_mode, source))
    }

    pub(crate) fn insert_module(&mut self, parent: NodeId, id: NodeId, module: ModuleNode) -> Result<NodeId> {
        self.attach(parent, Node::new(id, Some(parent), NodeKind::Module(module)))
    }

    pub(crate) fn insert_group(&mut self, parent: NodeId, id: NodeId, group: GroupNode) -> Result<NodeId> {
        self.attach(parent, Node::new(id, Some(parent), NodeKind::Group(group)))
    }

    fn attach(&mut self, parent: NodeId, node: Node) -> Result<NodeId> {
        let id = node.id();
        self.group_mut(parent)?.children.push(id);
        self.nodes.insert(id, node);
        Ok(id)
    }

    fn unique_group_name(&self, parent: NodeId, requested: &str) -> Result<String> {
        let taken: Vec<&str> = self
            .group(parent)?
            .children
            .iter()
            .filter_map(|id| self.get(*id).and_then(Node::as_group))
            .map(|g| g.name.as_str())
            .collect();
        if !taken.contains(&requested) {
            return Ok(requested.to_string());
        }
        let name = (1..)
            .map(|i| format!("{requested} {i}"))
            .find(|candidate| !taken.contains(&candidate.as_str()))
            .unwrap_or_else(|| requested.to_string());
        Ok(name)
    }

    /// Detach a node and its subtree, invalidating everything downstream first.
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        let node = self.node(id)?;
        if id == self.root || node.as_group().is_some_and(|g| g.no_delete) {
            return Err(PipelineError::ProtectedNode(id));
        }
        let parent = node.parent();
        self.invalidate(id);

        if let Some(parent) = parent {
            self.group_mut(parent)?.children.retain(|child| *child != id);
        }
        for removed in self.subtree(id) {
            self.nodes.remove(&removed);
        }
        debug!(node = %id, "removed node");
        Ok(())
    }

    /// Every node in depth-first pre-order, root first.
    pub fn dfs_order(&self) -> Vec<NodeId> {
        self.subtree(self.root)
    }

    /// `id` followed by all its descendants in depth-first pre-order.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !self.contains(current) {
                continue;
            }
            order.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        order
    }

    /// Position of a node among all nodes of its own class, in depth-first order.
    pub fn absolute_index(&self, id: NodeId) -> Option<usize> {
        let class = self.get(id)?.class();
        self.dfs_order()
            .into_iter()
            .filter(|n| self.get(*n).is_some_and(|node| node.class() == class))
            .position(|n| n == id)
    }

    pub fn absolute_count(&self, class: NodeClass) -> usize {
        self.nodes.values().filter(|n| n.class() == class).count()
    }

    /// Clear the cached result of `id` and of every node after it in depth-first order.
    pub fn invalidate(&mut self, id: NodeId) {
        let order = self.dfs_order();
        let Some(pivot) = order.iter().position(|n| *n == id) else {
            return;
        };
        for node in &order[pivot..] {
            if let Some(node) = self.nodes.get_mut(node) {
                node.invalidate();
            }
        }
    }

    pub fn invalidate_all(&mut self) {
        for node in self.nodes.values_mut() {
            node.invalidate();
        }
    }

    /// Enabled children of a group, in order.
    pub fn enabled_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| self.get(*c).is_some_and(Node::is_enabled))
            .collect()
    }

    /// True when the group has enabled children and all of them output ROIs.
    pub fn only_rois(&self, id: NodeId) -> bool {
        let children = self.enabled_children(id);
        !children.is_empty() && children.iter().all(|c| self.output_kind(*c) == IoKind::Roi)
    }

    /// What a node produces; for groups this follows from the merge mode and the children.
    pub fn output_kind(&self, id: NodeId) -> IoKind {
        let Some(node) = self.get(id) else {
            return IoKind::None;
        };
        match &node.kind {
            NodeKind::Module(module) => module.operator.output_kind(),
            NodeKind::Group(group) => {
                let children = self.enabled_children(id);
                match group.merge_mode {
                    MergeMode::Chain => children
                        .last()
                        .map(|c| self.output_kind(*c))
                        .unwrap_or(IoKind::None),
                    MergeMode::And | MergeMode::Or => children
                        .first()
                        .map(|c| self.output_kind(*c))
                        .unwrap_or(IoKind::None),
                    MergeMode::None => {
                        if self.only_rois(id) {
                            IoKind::Roi
                        } else if !children.is_empty()
                            && children.iter().all(|c| self.output_kind(*c) == IoKind::Data)
                        {
                            IoKind::Data
                        } else {
                            IoKind::None
                        }
                    }
                }
            }
        }
    }

    /// What a node consumes; a group consumes what its first enabled child does.
    pub fn input_kind(&self, id: NodeId) -> IoKind {
        match self.get(id).map(Node::kind) {
            Some(NodeKind::Module(module)) => module.operator.input_kind(),
            Some(NodeKind::Group(_)) => self
                .enabled_children(id)
                .first()
                .map(|c| self.input_kind(*c))
                .unwrap_or(IoKind::None),
            None => IoKind::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::{Brightness, MaskFeatures, RectangleRoi, Threshold};

    fn sample() -> (NodeTree, Vec<NodeId>) {
        let mut tree = NodeTree::new();
        let root = tree.root_id();
        let g1 = tree
            .add_group(root, "Pre process", MergeMode::Chain, SourceRef::OriginalInput)
            .unwrap();
        let m1 = tree.add_module(g1, Box::new(Brightness::default())).unwrap();
        let m2 = tree.add_module(g1, Box::new(Threshold::default())).unwrap();
        let g2 = tree
            .add_group(root, "Features", MergeMode::None, SourceRef::NearestPriorOutput)
            .unwrap();
        let m3 = tree.add_module(g2, Box::new(MaskFeatures::default())).unwrap();
        (tree, vec![root, g1, m1, m2, g2, m3])
    }

    #[test]
    fn test_dfs_order_is_preorder() {
        let (tree, ids) = sample();
        assert_eq!(tree.dfs_order(), ids);
    }

    #[test]
    fn test_sibling_group_names_are_unique() {
        let mut tree = NodeTree::new();
        let root = tree.root_id();
        let a = tree.add_group(root, "X", MergeMode::Chain, SourceRef::default()).unwrap();
        let b = tree.add_group(root, "X", MergeMode::Chain, SourceRef::default()).unwrap();
        let c = tree.add_group(root, "X", MergeMode::Chain, SourceRef::default()).unwrap();
        assert_eq!(tree.group(a).unwrap().name, "X");
        assert_eq!(tree.group(b).unwrap().name, "X 1");
        assert_eq!(tree.group(c).unwrap().name, "X 2");

        // Same name under another parent is fine
        let nested = tree.add_group(a, "X", MergeMode::Chain, SourceRef::default()).unwrap();
        assert_eq!(tree.group(nested).unwrap().name, "X");
    }

    #[test]
    fn test_absolute_index_per_class() {
        let (tree, ids) = sample();
        assert_eq!(tree.absolute_index(ids[0]), Some(0));
        assert_eq!(tree.absolute_index(ids[4]), Some(2));
        assert_eq!(tree.absolute_index(ids[5]), Some(2));
        assert_eq!(tree.absolute_count(NodeClass::Module), 3);
        assert_eq!(tree.absolute_count(NodeClass::Group), 3);
    }

    #[test]
    fn test_root_lookup_walks_parents() {
        let (tree, ids) = sample();
        assert_eq!(tree.root_of(ids[5]), Some(ids[0]));
        assert_eq!(tree.parent_of(ids[5]), Some(ids[4]));
        assert_eq!(tree.parent_of(ids[0]), None);
    }

    #[test]
    fn test_output_kinds() {
        let (mut tree, ids) = sample();
        assert_eq!(tree.output_kind(ids[1]), IoKind::Mask);
        assert_eq!(tree.output_kind(ids[4]), IoKind::Data);
        assert_eq!(tree.input_kind(ids[1]), IoKind::Image);

        let rois = tree
            .add_group(ids[0], "ROIs", MergeMode::None, SourceRef::default())
            .unwrap();
        tree.add_module(rois, Box::new(RectangleRoi::default())).unwrap();
        assert!(tree.only_rois(rois));
        assert_eq!(tree.output_kind(rois), IoKind::Roi);
    }

    #[test]
    fn test_remove_protected_and_root() {
        let (mut tree, ids) = sample();
        tree.group_mut(ids[1]).unwrap().no_delete = true;
        assert!(matches!(tree.remove_node(ids[1]), Err(PipelineError::ProtectedNode(_))));
        assert!(matches!(tree.remove_node(ids[0]), Err(PipelineError::ProtectedNode(_))));
    }

    #[test]
    fn test_remove_detaches_subtree() {
        let (mut tree, ids) = sample();
        tree.remove_node(ids[1]).unwrap();
        assert!(!tree.contains(ids[2]));
        assert!(!tree.contains(ids[3]));
        assert_eq!(tree.children(ids[0]), &[ids[4]]);
        assert_eq!(tree.len(), 3);
    }
}
