use super::engine::{PartContext, PartDraft, PartRule};
use super::fragment_ops::{detach_with_blank_ancestors, root_fragment, tidy};
use super::labels::{block_lines, clean_value, contains_ci, line_text, LabelSet};
use crate::config::EngineConfig;
use crate::error::RestructureError;
use crate::tree::{normalize_whitespace, DocTree, MarkupFragment, MarkupTree, MarkupTreeMut, NodeId, NodeKind};

/// What the sanitizer needs to know about the part being cleaned.
pub struct SanitizeContext<'a> {
    pub part_title: &'a str,
    pub document_title: &'a str,
    pub is_first_part: bool,
    /// Values already extracted from label lines (objective, reflection, ...)
    pub extracted: Vec<&'a str>,
}

/// Strips consumed label fragments from a part span, leaving the content
/// that is displayed as the part body.
pub struct ContentSanitizer {
    field_labels: Vec<LabelSet>,
    concept_labels: LabelSet,
    intro_keywords: Vec<String>,
}

impl ContentSanitizer {
    pub fn new(config: &EngineConfig) -> Self {
        let fields = &config.fields;
        Self {
            field_labels: vec![
                LabelSet::new(&fields.objective.labels),
                LabelSet::new(&fields.concepts.labels),
                LabelSet::new(&fields.reflection.labels),
                LabelSet::new(&fields.instruction.labels),
            ],
            concept_labels: LabelSet::new(&fields.concepts.labels),
            intro_keywords: config.segmentation.intro_keywords.clone(),
        }
    }

    pub fn sanitize(&self, source: &dyn MarkupTree, roots: &[NodeId], ctx: &SanitizeContext) -> MarkupFragment {
        let mut tree = DocTree::from_subtrees(source, roots);
        self.drop_title_heading(&mut tree, ctx.part_title);
        if ctx.is_first_part {
            self.drop_document_preamble(&mut tree, ctx.document_title);
        }
        self.drop_concept_paragraphs(&mut tree);
        self.drop_label_runs(&mut tree, &ctx.extracted);
        self.drop_plain_label_lines(&mut tree, &ctx.extracted);
        tidy(&mut tree);
        root_fragment(&tree)
    }

    fn drop_title_heading(&self, tree: &mut DocTree, part_title: &str) {
        let root = tree.root();
        let first_heading = tree
            .children(root)
            .iter()
            .copied()
            .find(|&id| tree.kind(id).is_heading());
        if let Some(heading) = first_heading {
            if same_text(&tree.normalized_text(heading), part_title) {
                tree.detach(heading);
            }
        }
    }

    /// The first part must not repeat the document title or the
    /// introduction sections.
    fn drop_document_preamble(&self, tree: &mut DocTree, document_title: &str) {
        let root = tree.root();
        let mut dropping: Option<u8> = None;
        for id in tree.children(root).to_vec() {
            let level = tree.kind(id).heading_level();
            if let (Some(section_level), Some(level)) = (dropping, level) {
                if level <= section_level {
                    dropping = None;
                }
            }
            if let Some(level) = level {
                let text = tree.normalized_text(id);
                if same_text(&text, document_title) {
                    tree.detach(id);
                    continue;
                }
                if self.intro_keywords.iter().any(|k| contains_ci(&text, k)) {
                    dropping = Some(level);
                }
            }
            if dropping.is_some() {
                tree.detach(id);
            }
        }
    }

    fn drop_concept_paragraphs(&self, tree: &mut DocTree) {
        let root = tree.root();
        for id in tree.descendants(root) {
            if matches!(tree.kind(id), NodeKind::Paragraph)
                && is_attached(tree, id)
                && self.concept_labels.contains(&tree.normalized_text(id))
            {
                detach_with_blank_ancestors(tree, id);
            }
        }
    }

    /// Remove bold/emphasis runs that carry a field label. When the rest of
    /// the run's line is a value that was already extracted, it goes too.
    fn drop_label_runs(&self, tree: &mut DocTree, extracted: &[&str]) {
        let root = tree.root();
        for run in tree.descendants(root) {
            if !tree.kind(run).is_run() || !is_attached(tree, run) {
                continue;
            }
            let text = tree.normalized_text(run);
            let is_label = self
                .field_labels
                .iter()
                .any(|labels| labels.iter().any(|label| label.starts_run(&text)));
            if !is_label {
                continue;
            }

            let trailing: Vec<NodeId> = tree
                .following_siblings(run)
                .into_iter()
                .take_while(|&id| !tree.kind(id).is_line_break() && !tree.kind(id).is_block())
                .collect();
            let trailing_value = clean_value(&line_text(tree, &trailing));
            let inside_value = text.split_once(':').map(|(_, v)| clean_value(v)).unwrap_or_default();
            let consumed = |value: &str| {
                !value.is_empty() && extracted.iter().any(|e| same_text(e, value))
            };

            if consumed(&trailing_value) {
                let line_break = trailing
                    .last()
                    .and_then(|&last| tree.next_sibling(last))
                    .or_else(|| tree.next_sibling(run))
                    .filter(|&id| tree.kind(id).is_line_break());
                for id in trailing {
                    tree.detach(id);
                }
                if let Some(line_break) = line_break {
                    tree.detach(line_break);
                }
            } else if !inside_value.is_empty() && !consumed(&inside_value) {
                // The run holds more than the label; keep it.
                continue;
            }
            detach_with_blank_ancestors(tree, run);
        }
    }

    /// Remove unformatted label lines ("Objetivo: aprender") whose value was
    /// already extracted, then the paragraph if nothing else is left.
    fn drop_plain_label_lines(&self, tree: &mut DocTree, extracted: &[&str]) {
        let root = tree.root();
        for block in tree.descendants(root) {
            if !matches!(tree.kind(block), NodeKind::Paragraph) || !is_attached(tree, block) {
                continue;
            }
            for line in block_lines(tree, block) {
                let text = line_text(tree, &line);
                let value = self.field_labels.iter().find_map(|labels| {
                    let (_, (start, end)) = labels.find(&text)?;
                    text[..start].trim().is_empty().then(|| clean_value(&text[end..]))
                });
                let consumed = value.is_some_and(|value| {
                    !value.is_empty() && extracted.iter().any(|e| same_text(e, &value))
                });
                if !consumed {
                    continue;
                }

                let line_break = line
                    .last()
                    .and_then(|&last| tree.next_sibling(last))
                    .or_else(|| line.first().and_then(|&first| tree.prev_sibling(first)))
                    .filter(|&id| tree.kind(id).is_line_break());
                for id in line {
                    tree.detach(id);
                }
                if let Some(line_break) = line_break {
                    tree.detach(line_break);
                }
            }
            if is_attached(tree, block) && tree.is_blank(block) {
                detach_with_blank_ancestors(tree, block);
            }
        }
    }
}

fn same_text(a: &str, b: &str) -> bool {
    let a = normalize_whitespace(a).to_lowercase();
    let b = normalize_whitespace(b).to_lowercase();
    a.trim_end_matches(['.', ':']) == b.trim_end_matches(['.', ':'])
}

fn is_attached(tree: &DocTree, id: NodeId) -> bool {
    id == tree.root() || tree.is_ancestor_of(tree.root(), id)
}

impl PartRule for ContentSanitizer {
    fn apply(&self, ctx: &PartContext, draft: &mut PartDraft) -> Result<(), RestructureError> {
        let extracted: Vec<&str> = draft
            .fields
            .iter()
            .flat_map(|f| [&f.objective, &f.reflection, &f.instruction_prompt])
            .filter_map(|value| value.as_deref())
            .collect();
        let body = self.sanitize(
            ctx.tree,
            ctx.roots,
            &SanitizeContext {
                part_title: ctx.part_title,
                document_title: ctx.document_title,
                is_first_part: ctx.index == 0,
                extracted,
            },
        );
        draft.body = Some(body);
        Ok(())
    }

    fn name(&self) -> &str {
        "ContentSanitizer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labelled(tree: &mut DocTree, label: &str, value: &str) -> NodeId {
        let root = tree.root();
        let p = tree.element(root, NodeKind::Paragraph);
        let strong = tree.element(p, NodeKind::Strong);
        tree.text(strong, label);
        tree.text(p, value);
        p
    }

    fn sanitize(tree: &DocTree, extracted: Vec<&str>, first: bool) -> MarkupFragment {
        let sanitizer = ContentSanitizer::new(&EngineConfig::default());
        let ctx = SanitizeContext {
            part_title: "Parte 1: Base",
            document_title: "Guia",
            is_first_part: first,
            extracted,
        };
        sanitizer.sanitize(tree, tree.children(tree.root()), &ctx)
    }

    #[test]
    fn test_strips_heading_and_consumed_labels() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let h = tree.element(root, NodeKind::Heading(2));
        tree.text(h, "Parte 1: Base");
        labelled(&mut tree, "Objetivo:", " entender a base");
        labelled(&mut tree, "Conceitos-chave:", " A, B");
        let p = tree.element(root, NodeKind::Paragraph);
        tree.text(p, "Texto que fica.");
        let body = sanitize(&tree, vec!["entender a base"], false);
        assert_eq!(body.plain_text(), "Texto que fica.");
    }

    #[test]
    fn test_keeps_unconsumed_text_after_label() {
        let mut tree = DocTree::new();
        labelled(&mut tree, "Pergunta de Reflexão:", " por quê?");
        let body = sanitize(&tree, vec![], false);
        assert_eq!(body.plain_text(), "por quê?");
    }

    #[test]
    fn test_strips_plain_text_label_lines() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let p = tree.element(root, NodeKind::Paragraph);
        tree.text(p, "Objetivo: aprender");
        tree.element(p, NodeKind::SoftBreak);
        tree.text(p, "Pergunta de Reflexão: por quê?");
        let p = tree.element(root, NodeKind::Paragraph);
        tree.text(p, "Texto.");
        let body = sanitize(&tree, vec!["aprender", "por quê?"], false);
        assert_eq!(body.plain_text(), "Texto.");
    }

    #[test]
    fn test_keeps_plain_label_line_with_other_value() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let p = tree.element(root, NodeKind::Paragraph);
        tree.text(p, "Objetivo: outra coisa");
        tree.element(p, NodeKind::SoftBreak);
        tree.text(p, "Pergunta de Reflexão: por quê?");
        let body = sanitize(&tree, vec!["por quê?"], false);
        assert_eq!(body.plain_text(), "Objetivo: outra coisa");
    }

    #[test]
    fn test_first_part_drops_intro_sections() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let h = tree.element(root, NodeKind::Heading(2));
        tree.text(h, "Contextualização");
        let p = tree.element(root, NodeKind::Paragraph);
        tree.text(p, "contexto");
        let h = tree.element(root, NodeKind::Heading(2));
        tree.text(h, "Conteúdo");
        let body = sanitize(&tree, vec![], true);
        assert_eq!(body.plain_text(), "Conteúdo");
    }
}
