// Label matching and line-level text helpers shared by the extraction rules.
//
// A "label" is a short marker such as "Objetivo:" that precedes a value on
// the same line. Values never run past the end of the line that holds the
// label, so a paragraph with several soft-broken label lines yields one value
// per line.

use crate::config::LabelSpec;
use crate::tree::{normalize_whitespace, MarkupTree, NodeId, NodeKind};

#[derive(Debug, Clone)]
pub struct Label {
    text: String,
    case_insensitive: bool,
}

impl Label {
    pub fn new(spec: &LabelSpec) -> Self {
        Self {
            text: spec.text.trim().to_string(),
            case_insensitive: spec.case_insensitive,
        }
    }

    /// The label without its trailing colon.
    pub fn stem(&self) -> &str {
        self.text.trim_end_matches(':').trim_end()
    }

    /// Byte range of the first occurrence of the label in `haystack`.
    pub fn find(&self, haystack: &str) -> Option<(usize, usize)> {
        if self.text.is_empty() {
            return None;
        }
        if self.case_insensitive {
            find_case_insensitive(haystack, &self.text)
        } else {
            haystack
                .find(&self.text)
                .map(|start| (start, start + self.text.len()))
        }
    }

    /// Text after the label on `line`, trimmed. `Some("")` when the label
    /// is present but nothing follows it.
    pub fn value_after(&self, line: &str) -> Option<String> {
        let (_, end) = self.find(line)?;
        Some(clean_value(&line[end..]))
    }

    /// True when a run's own text is the label, with or without the colon.
    pub fn matches_run(&self, run_text: &str) -> bool {
        let run = normalize_whitespace(run_text);
        let run = run.trim_end_matches(':').trim_end();
        if run.is_empty() {
            return false;
        }
        if self.case_insensitive {
            run.to_lowercase() == self.stem().to_lowercase()
        } else {
            run == self.stem()
        }
    }

    /// True when `text` starts with the label stem, colon optional.
    pub fn starts_run(&self, run_text: &str) -> bool {
        let run = normalize_whitespace(run_text);
        let stem = self.stem();
        if self.case_insensitive {
            run.to_lowercase().starts_with(&stem.to_lowercase())
        } else {
            run.starts_with(stem)
        }
    }
}

/// Ordered label variants of one field.
#[derive(Debug, Clone, Default)]
pub struct LabelSet {
    labels: Vec<Label>,
}

impl LabelSet {
    pub fn new(specs: &[LabelSpec]) -> Self {
        Self {
            labels: specs.iter().map(Label::new).collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter()
    }

    /// First label (in priority order) present in `text`, with its range.
    pub fn find(&self, text: &str) -> Option<(&Label, (usize, usize))> {
        self.labels
            .iter()
            .find_map(|label| label.find(text).map(|range| (label, range)))
    }

    pub fn contains(&self, text: &str) -> bool {
        self.find(text).is_some()
    }

    pub fn value_after(&self, line: &str) -> Option<String> {
        self.labels.iter().find_map(|label| label.value_after(line))
    }

    pub fn matches_run(&self, run_text: &str) -> bool {
        self.labels.iter().any(|label| label.matches_run(run_text))
    }

    /// True when a heading's text is one of the labels.
    pub fn matches_heading(&self, heading_text: &str) -> bool {
        self.labels.iter().any(|label| {
            let heading = normalize_whitespace(heading_text).to_lowercase();
            let heading = heading.trim_end_matches(':').trim_end();
            heading == label.stem().to_lowercase()
        })
    }
}

fn find_case_insensitive(haystack: &str, needle: &str) -> Option<(usize, usize)> {
    let needle: Vec<char> = needle.chars().flat_map(char::to_lowercase).collect();
    for (start, _) in haystack.char_indices() {
        let mut lowered = haystack[start..]
            .char_indices()
            .flat_map(|(i, c)| c.to_lowercase().map(move |l| (i, c, l)));
        let mut end = start;
        let matched = needle.iter().all(|&wanted| match lowered.next() {
            Some((i, c, l)) if l == wanted => {
                end = start + i + c.len_utf8();
                true
            }
            _ => false,
        });
        if matched {
            return Some((start, end));
        }
    }
    None
}

/// Trim a raw label value: whitespace, a stray leading colon or dash.
pub fn clean_value(raw: &str) -> String {
    let value = normalize_whitespace(raw);
    value
        .trim_start_matches([':', '-', '–', '—'])
        .trim()
        .to_string()
}

/// Case-insensitive substring test.
pub fn contains_ci(text: &str, keyword: &str) -> bool {
    text.to_lowercase().contains(&keyword.to_lowercase())
}

/// Nodes whose own inline text can carry a label: paragraphs, headings,
/// list items and generic blocks, in document order.
pub fn label_blocks(tree: &dyn MarkupTree, roots: &[NodeId]) -> Vec<NodeId> {
    let mut out = Vec::new();
    for &root in roots {
        if is_label_block(tree.kind(root)) {
            out.push(root);
        }
        out.extend(
            tree.descendants(root)
                .into_iter()
                .filter(|&id| is_label_block(tree.kind(id))),
        );
    }
    out
}

fn is_label_block(kind: &NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::Paragraph | NodeKind::Heading(_) | NodeKind::ListItem | NodeKind::Block
    )
}

/// Inline content of a block grouped into lines.
///
/// Lines break at soft and hard breaks and at paragraph boundaries inside
/// list items. Nested lists and other blocks are skipped.
pub fn block_lines(tree: &dyn MarkupTree, block: NodeId) -> Vec<Vec<NodeId>> {
    let mut lines = vec![Vec::new()];
    collect_lines(tree, block, &mut lines);
    lines.retain(|line| !line.iter().all(|&id| tree.is_blank(id)));
    lines
}

fn collect_lines(tree: &dyn MarkupTree, block: NodeId, lines: &mut Vec<Vec<NodeId>>) {
    for &child in tree.children(block) {
        match tree.kind(child) {
            NodeKind::SoftBreak | NodeKind::LineBreak => lines.push(Vec::new()),
            NodeKind::Paragraph => {
                lines.push(Vec::new());
                collect_lines(tree, child, lines);
                lines.push(Vec::new());
            }
            kind if kind.is_block() => {}
            _ => {
                if let Some(line) = lines.last_mut() {
                    line.push(child);
                }
            }
        }
    }
}

/// Normalized text of one line of inline nodes.
pub fn line_text(tree: &dyn MarkupTree, line: &[NodeId]) -> String {
    let mut out = String::new();
    for &id in line {
        tree.collect_text(id, &mut out);
    }
    normalize_whitespace(&out)
}

/// Text lines of a block, normalized.
pub fn text_lines(tree: &dyn MarkupTree, block: NodeId) -> Vec<String> {
    block_lines(tree, block)
        .iter()
        .map(|line| line_text(tree, line))
        .filter(|text| !text.is_empty())
        .collect()
}

/// The leading bold run of a line, skipping blank text before it.
pub fn leading_bold_run(tree: &dyn MarkupTree, line: &[NodeId]) -> Option<NodeId> {
    let first = line.iter().copied().find(|&id| !tree.is_blank(id))?;
    tree.kind(first).is_bold().then_some(first)
}

/// Locate the list that belongs to a label block: a list nested inside the
/// block itself, else the first list among the following siblings. When the
/// block is the last of its parent the walk continues after the parent.
/// Headings and new label lines end the search.
pub fn locate_list(tree: &dyn MarkupTree, block: NodeId) -> Option<NodeId> {
    if let Some(nested) = tree
        .descendants(block)
        .into_iter()
        .find(|&id| tree.kind(id).is_list())
    {
        return Some(nested);
    }
    let mut current = block;
    loop {
        for sibling in tree.following_siblings(current) {
            let kind = tree.kind(sibling);
            if kind.is_list() {
                return Some(sibling);
            }
            if kind.is_heading() || opens_new_label(tree, sibling) {
                return None;
            }
        }
        let parent = tree.parent(current)?;
        if parent == tree.root() || tree.kind(parent).is_heading() {
            return None;
        }
        current = parent;
    }
}

fn opens_new_label(tree: &dyn MarkupTree, id: NodeId) -> bool {
    matches!(tree.kind(id), NodeKind::Paragraph | NodeKind::Block)
        && tree.normalized_text(id).ends_with(':')
}

/// Direct list-item children of a list.
pub fn list_items(tree: &dyn MarkupTree, list: NodeId) -> Vec<NodeId> {
    tree.children(list)
        .iter()
        .copied()
        .filter(|&id| matches!(tree.kind(id), NodeKind::ListItem))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::DocTree;

    #[test]
    fn test_case_insensitive_find_keeps_byte_offsets() {
        let label = Label::new(&LabelSpec::any_case("Pergunta de Reflexão:"));
        let line = "Ótimo. PERGUNTA DE REFLEXÃO: por quê?";
        let (start, end) = label.find(line).unwrap();
        assert_eq!(&line[start..end], "PERGUNTA DE REFLEXÃO:");
        assert_eq!(label.value_after(line).as_deref(), Some("por quê?"));
    }

    #[test]
    fn test_exact_label_respects_case() {
        let label = Label::new(&LabelSpec::exact("Objetivo:"));
        assert!(label.find("objetivo: x").is_none());
        assert_eq!(label.value_after("Objetivo:   x  y").as_deref(), Some("x y"));
    }

    #[test]
    fn test_run_matching_ignores_colon() {
        let labels = LabelSet::new(&[LabelSpec::any_case("Conceitos-chave:")]);
        assert!(labels.matches_run("Conceitos-chave"));
        assert!(labels.matches_run(" conceitos-chave: "));
        assert!(!labels.matches_run("Conceitos"));
    }

    #[test]
    fn test_block_lines_split_on_breaks() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let p = tree.element(root, NodeKind::Paragraph);
        let strong = tree.element(p, NodeKind::Strong);
        tree.text(strong, "Objetivo:");
        tree.text(p, " aprender");
        tree.element(p, NodeKind::SoftBreak);
        tree.text(p, "segunda linha");
        assert_eq!(
            text_lines(&tree, p),
            vec!["Objetivo: aprender".to_string(), "segunda linha".to_string()]
        );
    }

    #[test]
    fn test_locate_list_walks_siblings_until_heading() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let label = tree.element(root, NodeKind::Paragraph);
        tree.text(label, "Rotas Alternativas:");
        let note = tree.element(root, NodeKind::Paragraph);
        tree.text(note, "Escolha uma.");
        let list = tree.element(root, NodeKind::List { ordered: false });
        assert_eq!(locate_list(&tree, label), Some(list));

        let mut tree = DocTree::new();
        let root = tree.root();
        let label = tree.element(root, NodeKind::Paragraph);
        tree.text(label, "Rotas Alternativas:");
        let heading = tree.element(root, NodeKind::Heading(2));
        tree.text(heading, "Outra seção");
        tree.element(root, NodeKind::List { ordered: false });
        assert_eq!(locate_list(&tree, label), None);
    }
}
