use crate::config::SegmentationConfig;
use crate::error::RestructureError;
use crate::rules::labels::contains_ci;
use crate::tree::{normalize_whitespace, MarkupFragment, MarkupTree, NodeId, NodeKind};
use tracing::debug;

/// One part: its title and the owned copy of its span (heading included).
#[derive(Debug, Clone)]
pub struct PartSpan {
    pub title: String,
    pub content: MarkupFragment,
}

#[derive(Debug, Clone)]
pub struct Segmentation {
    pub title: String,
    pub intro: Option<MarkupFragment>,
    pub parts: Vec<PartSpan>,
    pub conclusion: MarkupFragment,
    pub conclusion_synthesized: bool,
    /// No part heading existed; the single part covers the whole document
    pub implicit_part: bool,
    /// Every part heading was filtered out; the single part is a placeholder
    pub placeholder_part: bool,
}

/// Splits a document into introduction, parts and conclusion using
/// heading-text keywords.
pub struct SectionSegmenter<'a> {
    config: &'a SegmentationConfig,
}

impl<'a> SectionSegmenter<'a> {
    pub fn new(config: &'a SegmentationConfig) -> Self {
        Self { config }
    }

    pub fn segment(&self, tree: &dyn MarkupTree) -> Result<Segmentation, RestructureError> {
        let container = content_root(tree);
        if tree.is_blank(container) {
            return Err(RestructureError::EmptyDocument);
        }
        let nodes: Vec<NodeId> = tree
            .children(container)
            .iter()
            .copied()
            .filter(|&id| !matches!(tree.kind(id), NodeKind::Text(t) if t.trim().is_empty()))
            .collect();

        let heading_text = |i: usize| tree.normalized_text(nodes[i]);
        let level = |i: usize| tree.kind(nodes[i]).heading_level().unwrap_or(u8::MAX);
        let headings: Vec<usize> = (0..nodes.len())
            .filter(|&i| tree.kind(nodes[i]).is_heading())
            .collect();

        let is_part_candidate = |i: usize| self.matches_any(&heading_text(i), &self.config.part_keywords);
        let title_idx = headings
            .iter()
            .copied()
            .find(|&i| level(i) == 1)
            .or_else(|| {
                headings.iter().copied().find(|&i| {
                    !is_part_candidate(i)
                        && !self.matches_any(&heading_text(i), &self.config.conclusion_keywords)
                })
            });
        let title = title_idx
            .map(|i| heading_text(i))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.config.default_title.clone());

        let candidates: Vec<usize> = headings
            .iter()
            .copied()
            .filter(|&i| Some(i) != title_idx && is_part_candidate(i))
            .collect();
        let part_level = candidates.iter().map(|&i| level(i)).min();
        let part_heads: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&i| Some(level(i)) == part_level)
            .collect();

        let conclusion_idx = headings
            .iter()
            .copied()
            .find(|&i| {
                Some(i) != title_idx
                    && !part_heads.contains(&i)
                    && part_level.map_or(true, |l| level(i) <= l)
                    && self.matches_any(&heading_text(i), &self.config.conclusion_keywords)
            })
            .or_else(|| {
                let first = part_heads.first().copied();
                headings.iter().copied().find(|&i| {
                    first.map_or(true, |f| i > f)
                        && Some(i) != title_idx
                        && !part_heads.contains(&i)
                        && self.matches_any(
                            &heading_text(i),
                            &self.config.secondary_conclusion_keywords,
                        )
                })
            });

        // Span ends: the next part heading or the conclusion heading
        let next_boundary = |from: usize| {
            part_heads
                .iter()
                .copied()
                .chain(conclusion_idx)
                .filter(|&b| b > from)
                .min()
                .unwrap_or(nodes.len())
        };
        let span = |start: usize, end: usize| -> Vec<NodeId> {
            (start..end)
                .filter(|&i| Some(i) != title_idx)
                .map(|i| nodes[i])
                .collect()
        };

        let first_part = part_heads.first().copied();
        let intro_limit = first_part.unwrap_or(nodes.len());
        let mut intro_nodes = Vec::new();
        for &i in &headings {
            if i >= intro_limit
                || Some(i) == title_idx
                || Some(i) == conclusion_idx
                || part_heads.contains(&i)
                || !self.matches_any(&heading_text(i), &self.config.intro_keywords)
            {
                continue;
            }
            let end = (i + 1..nodes.len())
                .find(|&j| {
                    (tree.kind(nodes[j]).is_heading() && level(j) <= level(i))
                        || part_heads.contains(&j)
                        || Some(j) == conclusion_idx
                })
                .unwrap_or(nodes.len());
            for id in span(i, end) {
                if !intro_nodes.contains(&id) {
                    intro_nodes.push(id);
                }
            }
        }
        if intro_nodes.is_empty() && first_part.is_some() {
            let start = title_idx.map_or(0, |t| t + 1);
            let end = candidates
                .iter()
                .copied()
                .chain(conclusion_idx)
                .min()
                .unwrap_or(nodes.len());
            if start < end {
                intro_nodes = span(start, end);
            }
        }
        let intro = Some(tree.to_fragment(&intro_nodes)).filter(|f| !f.is_empty());

        let conclusion_nodes = conclusion_idx
            .map(|c| span(c, next_part_after(&part_heads, c).unwrap_or(nodes.len())))
            .unwrap_or_default();

        let mut parts = Vec::new();
        for &p in &part_heads {
            let part_title = heading_text(p);
            if self.is_excluded_title(&part_title, &title) {
                debug!("skipping excluded part heading {part_title:?}");
                continue;
            }
            parts.push(PartSpan {
                title: part_title,
                content: tree.to_fragment(&span(p, next_boundary(p))),
            });
        }

        let implicit_part = candidates.is_empty();
        let placeholder_part = !implicit_part && parts.is_empty();
        if implicit_part {
            let rest: Vec<NodeId> = nodes
                .iter()
                .copied()
                .enumerate()
                .filter(|&(i, id)| {
                    Some(i) != title_idx && !intro_nodes.contains(&id) && !conclusion_nodes.contains(&id)
                })
                .map(|(_, id)| id)
                .collect();
            parts.push(PartSpan {
                title: self.fill(&self.config.implicit_part_title, &title),
                content: tree.to_fragment(&rest),
            });
        } else if placeholder_part {
            parts.push(PartSpan {
                title: self.fill(&self.config.implicit_part_title, &title),
                content: MarkupFragment::paragraph(&self.fill(&self.config.placeholder_text, &title)),
            });
        }

        let conclusion_synthesized = conclusion_idx.is_none();
        let conclusion = if conclusion_synthesized {
            MarkupFragment::paragraph(&self.fill(&self.config.conclusion_template, &title))
        } else {
            tree.to_fragment(&conclusion_nodes)
        };

        debug!(
            "segmented {:?}: {} part(s), intro={}, conclusion synthesized={}",
            title,
            parts.len(),
            intro.is_some(),
            conclusion_synthesized
        );

        Ok(Segmentation {
            title,
            intro,
            parts,
            conclusion,
            conclusion_synthesized,
            implicit_part,
            placeholder_part,
        })
    }

    fn matches_any(&self, text: &str, keywords: &[String]) -> bool {
        keywords.iter().any(|k| contains_ci(text, k))
    }

    fn is_excluded_title(&self, part_title: &str, document_title: &str) -> bool {
        let normalized = normalize_title(part_title);
        normalized.is_empty()
            || normalized == normalize_title(document_title)
            || self
                .config
                .excluded_part_titles
                .iter()
                .any(|excluded| normalized == normalize_title(excluded))
    }

    fn fill(&self, template: &str, title: &str) -> String {
        template.replace("{title}", title)
    }
}

fn next_part_after(part_heads: &[usize], index: usize) -> Option<usize> {
    part_heads.iter().copied().find(|&p| p > index)
}

/// Lowercased, whitespace-collapsed, without trailing punctuation.
fn normalize_title(text: &str) -> String {
    normalize_whitespace(text)
        .to_lowercase()
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_string()
}

/// The node whose children are the document's top-level blocks: descend
/// through single wrapper containers such as `<html><body><div>`.
pub fn content_root(tree: &dyn MarkupTree) -> NodeId {
    let mut current = tree.root();
    loop {
        let non_blank: Vec<NodeId> = tree
            .children(current)
            .iter()
            .copied()
            .filter(|&id| !tree.is_blank(id))
            .collect();
        match non_blank.as_slice() {
            [only] if matches!(tree.kind(*only), NodeKind::Block | NodeKind::Other(_)) => {
                current = *only;
            }
            _ => return current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::DocTree;

    fn doc(blocks: &[(&str, &str)]) -> DocTree {
        let mut tree = DocTree::new();
        let root = tree.root();
        let body = tree.element(root, NodeKind::Block);
        for (kind, text) in blocks {
            let kind = match *kind {
                "h1" => NodeKind::Heading(1),
                "h2" => NodeKind::Heading(2),
                "h3" => NodeKind::Heading(3),
                _ => NodeKind::Paragraph,
            };
            let id = tree.element(body, kind);
            tree.text(id, text);
        }
        tree
    }

    #[test]
    fn test_unwraps_single_container() {
        let tree = doc(&[("h1", "Guia"), ("p", "texto")]);
        let container = content_root(&tree);
        assert_eq!(tree.kind(container), &NodeKind::Block);
    }

    #[test]
    fn test_title_heading_never_becomes_part() {
        let tree = doc(&[
            ("h1", "Guia de Partes"),
            ("h2", "Parte 1: Base"),
            ("p", "a"),
            ("h2", "Parte 2: Prática"),
            ("p", "b"),
        ]);
        let config = SegmentationConfig::default();
        let seg = SectionSegmenter::new(&config).segment(&tree).unwrap();
        assert_eq!(seg.title, "Guia de Partes");
        let titles: Vec<_> = seg.parts.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Parte 1: Base", "Parte 2: Prática"]);
    }

    #[test]
    fn test_deeper_part_keyword_stays_inside_part() {
        let tree = doc(&[
            ("h1", "Guia"),
            ("h2", "Parte 1: Base"),
            ("h3", "A parte difícil"),
            ("p", "a"),
        ]);
        let config = SegmentationConfig::default();
        let seg = SectionSegmenter::new(&config).segment(&tree).unwrap();
        assert_eq!(seg.parts.len(), 1);
        assert!(seg.parts[0].content.plain_text().contains("A parte difícil"));
    }

    #[test]
    fn test_blank_document_is_an_error() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let p = tree.element(root, NodeKind::Paragraph);
        tree.text(p, "   ");
        let config = SegmentationConfig::default();
        assert!(matches!(
            SectionSegmenter::new(&config).segment(&tree),
            Err(RestructureError::EmptyDocument)
        ));
    }
}
