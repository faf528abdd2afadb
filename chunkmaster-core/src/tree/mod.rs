//! Markup tree abstraction
//!
//! The restructuring engine needs only a small set of tree capabilities:
//! node kind, text content, child lists, parent/sibling links and cloning.
//! They are expressed as two traits so extraction code can run over any
//! tree that provides them.
//!
//! ```text
//! raw Markdown / HTML
//!     ↓
//! [Preprocessor]
//!     ↓
//! DocTree (arena, NodeId links)  ── implements ──  MarkupTree + MarkupTreeMut
//!     ↓
//! [RestructureEngine]
//!     ↓
//! Document (MarkupFragment bodies)
//! ```

pub mod arena;
pub mod fragment;

pub use arena::DocTree;
pub use fragment::{FragmentNode, MarkupFragment};

use serde::{Deserialize, Serialize};

/// Index of a node inside a `DocTree` arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Root,
    Heading(u8),
    Paragraph,
    List { ordered: bool },
    ListItem,
    /// `<strong>` / `**run**`
    Strong,
    /// `<b>`: bold without strong semantics
    Bold,
    Emphasis,
    Span,
    Code,
    /// Generic block container (div, section, blockquote, ...)
    Block,
    Text(String),
    SoftBreak,
    LineBreak,
    Rule,
    Other(String),
}

impl NodeKind {
    /// Map an HTML tag name to a node kind.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "h1" => NodeKind::Heading(1),
            "h2" => NodeKind::Heading(2),
            "h3" => NodeKind::Heading(3),
            "h4" => NodeKind::Heading(4),
            "h5" => NodeKind::Heading(5),
            "h6" => NodeKind::Heading(6),
            "p" => NodeKind::Paragraph,
            "ul" => NodeKind::List { ordered: false },
            "ol" => NodeKind::List { ordered: true },
            "li" => NodeKind::ListItem,
            "strong" => NodeKind::Strong,
            "b" => NodeKind::Bold,
            "em" | "i" => NodeKind::Emphasis,
            "span" | "a" | "u" | "mark" | "small" | "del" | "s" => NodeKind::Span,
            "code" | "kbd" | "samp" => NodeKind::Code,
            "div" | "section" | "article" | "blockquote" | "main" | "header" | "footer"
            | "aside" | "nav" | "pre" | "body" | "html" | "details" | "figure" => NodeKind::Block,
            "br" => NodeKind::LineBreak,
            "hr" => NodeKind::Rule,
            other => NodeKind::Other(other.to_string()),
        }
    }

    /// HTML tag used when rendering. `None` for nodes without a tag.
    pub fn tag_name(&self) -> Option<String> {
        let tag = match self {
            NodeKind::Heading(level) => return Some(format!("h{}", (*level).clamp(1, 6))),
            NodeKind::Paragraph => "p",
            NodeKind::List { ordered: true } => "ol",
            NodeKind::List { ordered: false } => "ul",
            NodeKind::ListItem => "li",
            NodeKind::Strong => "strong",
            NodeKind::Bold => "b",
            NodeKind::Emphasis => "em",
            NodeKind::Span => "span",
            NodeKind::Code => "code",
            NodeKind::Block => "div",
            NodeKind::LineBreak => "br",
            NodeKind::Rule => "hr",
            NodeKind::Other(tag) => return Some(tag.clone()),
            NodeKind::Root | NodeKind::Text(_) | NodeKind::SoftBreak => return None,
        };
        Some(tag.to_string())
    }

    pub fn is_block(&self) -> bool {
        matches!(
            self,
            NodeKind::Root
                | NodeKind::Heading(_)
                | NodeKind::Paragraph
                | NodeKind::List { .. }
                | NodeKind::ListItem
                | NodeKind::Block
                | NodeKind::Rule
        )
    }

    pub fn heading_level(&self) -> Option<u8> {
        match self {
            NodeKind::Heading(level) => Some(*level),
            _ => None,
        }
    }

    pub fn is_heading(&self) -> bool {
        matches!(self, NodeKind::Heading(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, NodeKind::List { .. })
    }

    /// Strong or plain bold run.
    pub fn is_bold(&self) -> bool {
        matches!(self, NodeKind::Strong | NodeKind::Bold)
    }

    /// Any inline run that can carry a label (bold, emphasis, marker span).
    pub fn is_run(&self) -> bool {
        matches!(
            self,
            NodeKind::Strong | NodeKind::Bold | NodeKind::Emphasis | NodeKind::Span
        )
    }

    pub fn is_line_break(&self) -> bool {
        matches!(self, NodeKind::SoftBreak | NodeKind::LineBreak)
    }
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Read capabilities the engine needs from a markup tree.
pub trait MarkupTree {
    fn root(&self) -> NodeId;
    fn kind(&self, id: NodeId) -> &NodeKind;
    fn children(&self, id: NodeId) -> &[NodeId];
    fn parent(&self, id: NodeId) -> Option<NodeId>;
    fn classes(&self, id: NodeId) -> &[String];

    fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.classes(id).iter().any(|c| c == class)
    }

    fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let siblings = self.children(self.parent(id)?);
        let pos = siblings.iter().position(|&c| c == id)?;
        siblings.get(pos + 1).copied()
    }

    fn prev_sibling(&self, id: NodeId) -> Option<NodeId> {
        let siblings = self.children(self.parent(id)?);
        let pos = siblings.iter().position(|&c| c == id)?;
        pos.checked_sub(1).map(|p| siblings[p])
    }

    /// Siblings after `id`, in document order.
    fn following_siblings(&self, id: NodeId) -> Vec<NodeId> {
        let Some(parent) = self.parent(id) else {
            return Vec::new();
        };
        let siblings = self.children(parent);
        match siblings.iter().position(|&c| c == id) {
            Some(pos) => siblings[pos + 1..].to_vec(),
            None => Vec::new(),
        }
    }

    /// Siblings before `id`, nearest first.
    fn preceding_siblings(&self, id: NodeId) -> Vec<NodeId> {
        let Some(parent) = self.parent(id) else {
            return Vec::new();
        };
        let siblings = self.children(parent);
        match siblings.iter().position(|&c| c == id) {
            Some(pos) => siblings[..pos].iter().rev().copied().collect(),
            None => Vec::new(),
        }
    }

    /// All descendants of `id` in pre-order, excluding `id` itself.
    fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Ancestors of `id`, nearest first.
    fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(node) = current {
            out.push(node);
            current = self.parent(node);
        }
        out
    }

    fn is_ancestor_of(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = self.parent(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    /// Text of the subtree. Block boundaries and line breaks become newlines.
    fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out.trim().to_string()
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match self.kind(id) {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::SoftBreak | NodeKind::LineBreak => out.push('\n'),
            kind => {
                let block = kind.is_block();
                if block && !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
                for &child in self.children(id) {
                    self.collect_text(child, out);
                }
                if block && !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
        }
    }

    /// Whitespace-normalized text of the subtree.
    fn normalized_text(&self, id: NodeId) -> String {
        normalize_whitespace(&self.text_content(id))
    }

    /// Text of a block's own inline content, skipping nested blocks.
    /// Line breaks count as spaces.
    fn inline_text(&self, id: NodeId) -> String {
        let mut out = String::new();
        for &child in self.children(id) {
            match self.kind(child) {
                kind if kind.is_block() => {}
                NodeKind::SoftBreak | NodeKind::LineBreak => out.push(' '),
                _ => self.collect_text(child, &mut out),
            }
        }
        normalize_whitespace(&out)
    }

    /// True when the subtree carries no visible text and no rule.
    fn is_blank(&self, id: NodeId) -> bool {
        match self.kind(id) {
            NodeKind::Rule => false,
            NodeKind::Text(text) => text.trim().is_empty(),
            NodeKind::SoftBreak | NodeKind::LineBreak => true,
            _ => self.children(id).iter().all(|&c| self.is_blank(c)),
        }
    }

    /// Clone the given subtrees into an owned fragment.
    fn to_fragment(&self, ids: &[NodeId]) -> MarkupFragment {
        MarkupFragment::new(ids.iter().map(|&id| self.clone_subtree(id)).collect())
    }

    fn clone_subtree(&self, id: NodeId) -> FragmentNode {
        FragmentNode {
            kind: self.kind(id).clone(),
            classes: self.classes(id).to_vec(),
            children: self
                .children(id)
                .iter()
                .map(|&child| self.clone_subtree(child))
                .collect(),
        }
    }
}

/// Write capabilities used by the hierarchy repair and the sanitizer.
pub trait MarkupTreeMut: MarkupTree {
    fn create_node(&mut self, kind: NodeKind) -> NodeId;
    /// Move `child` (detaching it first) to the end of `parent`'s children.
    fn append_child(&mut self, parent: NodeId, child: NodeId);
    /// Move `child` to position `index` among `parent`'s children.
    fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId);
    fn detach(&mut self, id: NodeId);
    fn add_class(&mut self, id: NodeId, class: &str);
    /// Replace the text of a text node. No-op for other kinds.
    fn set_text(&mut self, id: NodeId, text: String);
    /// Replace a node with its own children, in place.
    fn unwrap_node(&mut self, id: NodeId);
}
