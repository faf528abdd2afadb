use super::{normalize_whitespace, NodeKind};
use serde::{Deserialize, Serialize};

/// Owned copy of a sequence of subtrees.
///
/// Every markup-valued field of the document model (part bodies, route
/// descriptions, pitfall problems and solutions, intro and conclusion) is a
/// fragment, so the model compares by value and serializes without any
/// reference back into the source tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkupFragment {
    pub nodes: Vec<FragmentNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentNode {
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FragmentNode>,
}

impl FragmentNode {
    pub fn new(kind: NodeKind, children: Vec<FragmentNode>) -> Self {
        Self {
            kind,
            classes: Vec::new(),
            children,
        }
    }

    pub fn text(text: &str) -> Self {
        Self::new(NodeKind::Text(text.to_string()), Vec::new())
    }

    fn is_blank(&self) -> bool {
        match &self.kind {
            NodeKind::Rule => false,
            NodeKind::Text(text) => text.trim().is_empty(),
            _ => self.children.iter().all(FragmentNode::is_blank),
        }
    }

    fn collect_text(&self, out: &mut String) {
        match &self.kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::SoftBreak | NodeKind::LineBreak => out.push(' '),
            kind => {
                if kind.is_block() {
                    out.push(' ');
                }
                for child in &self.children {
                    child.collect_text(out);
                }
                if kind.is_block() {
                    out.push(' ');
                }
            }
        }
    }

    fn write_html(&self, out: &mut String) {
        match &self.kind {
            NodeKind::Text(text) => out.push_str(&escape_html(text)),
            NodeKind::SoftBreak => out.push('\n'),
            NodeKind::Root => {
                for child in &self.children {
                    child.write_html(out);
                }
            }
            kind => {
                let Some(tag) = kind.tag_name() else {
                    return;
                };
                out.push('<');
                out.push_str(&tag);
                if !self.classes.is_empty() {
                    out.push_str(" class=\"");
                    out.push_str(&escape_html(&self.classes.join(" ")));
                    out.push('"');
                }
                if matches!(kind, NodeKind::LineBreak | NodeKind::Rule) {
                    out.push_str(" />");
                    return;
                }
                out.push('>');
                for child in &self.children {
                    child.write_html(out);
                }
                out.push_str("</");
                out.push_str(&tag);
                out.push('>');
                if kind.is_block() {
                    out.push('\n');
                }
            }
        }
    }
}

impl MarkupFragment {
    pub fn new(nodes: Vec<FragmentNode>) -> Self {
        Self { nodes }
    }

    /// A fragment holding a single paragraph of text.
    pub fn paragraph(text: &str) -> Self {
        Self::new(vec![FragmentNode::new(
            NodeKind::Paragraph,
            vec![FragmentNode::text(text)],
        )])
    }

    /// True when the fragment has no visible content.
    pub fn is_empty(&self) -> bool {
        self.nodes.iter().all(FragmentNode::is_blank)
    }

    /// Whitespace-normalized text of the whole fragment.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            node.collect_text(&mut out);
        }
        normalize_whitespace(&out)
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            node.write_html(&mut out);
        }
        out
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_nested_list_with_classes() {
        let mut item = FragmentNode::new(
            NodeKind::ListItem,
            vec![FragmentNode::new(
                NodeKind::Strong,
                vec![FragmentNode::text("Conquista:")],
            )],
        );
        item.classes.push("conquest-item".to_string());
        let fragment = MarkupFragment::new(vec![FragmentNode::new(
            NodeKind::List { ordered: false },
            vec![item],
        )]);
        assert_eq!(
            fragment.to_html(),
            "<ul><li class=\"conquest-item\"><strong>Conquista:</strong></li>\n</ul>\n"
        );
    }

    #[test]
    fn test_escapes_text() {
        let fragment = MarkupFragment::paragraph("a < b & c");
        assert_eq!(fragment.to_html(), "<p>a &lt; b &amp; c</p>\n");
        assert_eq!(fragment.plain_text(), "a < b & c");
    }

    #[test]
    fn test_blank_fragment_is_empty() {
        let fragment = MarkupFragment::new(vec![FragmentNode::new(
            NodeKind::Paragraph,
            vec![FragmentNode::text("  ")],
        )]);
        assert!(fragment.is_empty());
        assert!(MarkupFragment::default().is_empty());
    }
}
