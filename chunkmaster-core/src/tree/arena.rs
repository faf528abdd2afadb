use super::{FragmentNode, MarkupFragment, MarkupTree, MarkupTreeMut, NodeId, NodeKind};

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    classes: Vec<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            classes: Vec::new(),
            parent: None,
            children: Vec::new(),
        }
    }
}

/// Arena-backed markup tree.
///
/// Nodes live in a flat `Vec` and refer to each other by `NodeId`, so the
/// tree has no reference cycles and can be cloned and compared as plain data.
/// Detached nodes stay in the arena but are no longer reachable from the root.
#[derive(Debug, Clone)]
pub struct DocTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for DocTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DocTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(NodeKind::Root)],
            root: NodeId(0),
        }
    }

    /// Rebuild a tree whose root holds the fragment's nodes.
    pub fn from_fragment(fragment: &MarkupFragment) -> Self {
        let mut tree = Self::new();
        let root = tree.root;
        for node in &fragment.nodes {
            tree.graft(root, node);
        }
        tree
    }

    /// Copy subtrees of another tree under a fresh root.
    pub fn from_subtrees(source: &dyn MarkupTree, ids: &[NodeId]) -> Self {
        Self::from_fragment(&source.to_fragment(ids))
    }

    /// Append a copy of a fragment node (and its subtree) under `parent`.
    pub fn graft(&mut self, parent: NodeId, node: &FragmentNode) -> NodeId {
        let id = self.create_node(node.kind.clone());
        self.nodes[id.0].classes = node.classes.clone();
        self.append_child(parent, id);
        for child in &node.children {
            self.graft(id, child);
        }
        id
    }

    /// Create an element and append it to `parent`.
    pub fn element(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = self.create_node(kind);
        self.append_child(parent, id);
        id
    }

    /// Create a text node and append it to `parent`.
    pub fn text(&mut self, parent: NodeId, text: &str) -> NodeId {
        self.element(parent, NodeKind::Text(text.to_string()))
    }

    /// Number of nodes reachable from the root, root included.
    pub fn reachable_count(&self) -> usize {
        1 + self.descendants(self.root).len()
    }

    pub fn to_html(&self) -> String {
        self.to_fragment(self.children(self.root)).to_html()
    }
}

impl MarkupTree for DocTree {
    fn root(&self) -> NodeId {
        self.root
    }

    fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    fn classes(&self, id: NodeId) -> &[String] {
        &self.nodes[id.0].classes
    }
}

impl MarkupTreeMut for DocTree {
    fn create_node(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(Node::new(kind));
        NodeId(self.nodes.len() - 1)
    }

    fn append_child(&mut self, parent: NodeId, child: NodeId) {
        let index = self.nodes[parent.0].children.len();
        self.insert_child(parent, index, child);
    }

    fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        // Refuse moves that would create a cycle.
        if parent == child || self.is_ancestor_of(child, parent) {
            return;
        }
        let mut index = index;
        if self.nodes[child.0].parent == Some(parent) {
            if let Some(pos) = self.nodes[parent.0].children.iter().position(|&c| c == child) {
                if pos < index {
                    index -= 1;
                }
            }
        }
        self.detach(child);
        let children = &mut self.nodes[parent.0].children;
        let index = index.min(children.len());
        children.insert(index, child);
        self.nodes[child.0].parent = Some(parent);
    }

    fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|&c| c != id);
        }
    }

    fn add_class(&mut self, id: NodeId, class: &str) {
        let classes = &mut self.nodes[id.0].classes;
        if !classes.iter().any(|c| c == class) {
            classes.push(class.to_string());
        }
    }

    fn set_text(&mut self, id: NodeId, text: String) {
        if let NodeKind::Text(current) = &mut self.nodes[id.0].kind {
            *current = text;
        }
    }

    fn unwrap_node(&mut self, id: NodeId) {
        let Some(parent) = self.nodes[id.0].parent else {
            return;
        };
        let Some(pos) = self.nodes[parent.0].children.iter().position(|&c| c == id) else {
            return;
        };
        let children = std::mem::take(&mut self.nodes[id.0].children);
        self.detach(id);
        for (offset, child) in children.into_iter().enumerate() {
            self.nodes[child.0].parent = None;
            self.insert_child(parent, pos + offset, child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_with_items(tree: &mut DocTree, items: &[&str]) -> (NodeId, Vec<NodeId>) {
        let root = tree.root();
        let list = tree.element(root, NodeKind::List { ordered: false });
        let ids = items
            .iter()
            .map(|text| {
                let li = tree.element(list, NodeKind::ListItem);
                tree.text(li, text);
                li
            })
            .collect();
        (list, ids)
    }

    #[test]
    fn test_sibling_navigation() {
        let mut tree = DocTree::new();
        let (_, items) = list_with_items(&mut tree, &["a", "b", "c"]);
        assert_eq!(tree.next_sibling(items[0]), Some(items[1]));
        assert_eq!(tree.prev_sibling(items[0]), None);
        assert_eq!(tree.preceding_siblings(items[2]), vec![items[1], items[0]]);
        assert_eq!(tree.following_siblings(items[0]), vec![items[1], items[2]]);
    }

    #[test]
    fn test_append_moves_node() {
        let mut tree = DocTree::new();
        let (list, items) = list_with_items(&mut tree, &["a", "b"]);
        let sub = tree.element(items[0], NodeKind::List { ordered: false });
        tree.append_child(sub, items[1]);
        assert_eq!(tree.children(list), &[items[0]]);
        assert_eq!(tree.parent(items[1]), Some(sub));
    }

    #[test]
    fn test_append_refuses_cycles() {
        let mut tree = DocTree::new();
        let (list, items) = list_with_items(&mut tree, &["a"]);
        tree.append_child(items[0], list);
        assert_eq!(tree.parent(list), Some(tree.root()));
    }

    #[test]
    fn test_unwrap_keeps_child_order() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let p = tree.element(root, NodeKind::Paragraph);
        tree.text(p, "x ");
        let span = tree.element(p, NodeKind::Span);
        tree.text(span, "y");
        tree.text(span, "z");
        tree.text(p, " w");
        tree.unwrap_node(span);
        assert_eq!(tree.children(p).len(), 4);
        assert_eq!(tree.text_content(p), "x yz w");
    }

    #[test]
    fn test_text_content_separates_blocks() {
        let mut tree = DocTree::new();
        let (list, _) = list_with_items(&mut tree, &["first", "second"]);
        assert_eq!(tree.text_content(list), "first\nsecond");
        assert_eq!(tree.normalized_text(list), "first second");
    }

    #[test]
    fn test_fragment_rebuild_is_equal() {
        let mut tree = DocTree::new();
        list_with_items(&mut tree, &["a", "b"]);
        let fragment = tree.to_fragment(tree.children(tree.root()));
        let rebuilt = DocTree::from_fragment(&fragment);
        assert_eq!(rebuilt.to_fragment(rebuilt.children(rebuilt.root())), fragment);
    }
}
