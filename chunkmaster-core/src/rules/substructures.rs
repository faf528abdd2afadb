use super::engine::{PartContext, PartDraft, PartRule};
use super::fragment_ops::{detach_with_blank_ancestors, root_fragment, split_at_label, strip_label, tidy, tidy_fragment};
use super::labels::{block_lines, contains_ci, label_blocks, leading_bold_run, line_text, list_items, locate_list, text_lines, LabelSet};
use crate::config::SubstructureConfig;
use crate::error::RestructureError;
use crate::tree::{normalize_whitespace, DocTree, MarkupTree, NodeId};
use crate::types::{NucleusStep, Pitfall, Route, Severity, Subtopic};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;

static LEADING_SEGMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.+?):(?:\s|$)").unwrap());

static BULLET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-•*·–]\s+").unwrap());

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substructures {
    pub nucleus_steps: Vec<NucleusStep>,
    pub routes: Vec<Route>,
    pub pitfalls: Vec<Pitfall>,
}

/// Decomposes a part span into learning steps, alternative routes and
/// common pitfalls. A missing label or list yields an empty collection.
pub struct SubstructureExtractor {
    nucleus_labels: LabelSet,
    route_labels: LabelSet,
    pitfall_labels: LabelSet,
    problem_labels: LabelSet,
    solution_labels: LabelSet,
    gentle_keywords: Vec<String>,
    step_prefixes: Vec<Regex>,
    palette_size: usize,
}

impl SubstructureExtractor {
    pub fn new(config: &SubstructureConfig) -> Result<Self, RestructureError> {
        let step_prefixes = config
            .step_prefix_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| RestructureError::Config(format!("bad step prefix {p:?}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            nucleus_labels: LabelSet::new(&config.nucleus_labels),
            route_labels: LabelSet::new(&config.route_labels),
            pitfall_labels: LabelSet::new(&config.pitfall_labels),
            problem_labels: LabelSet::new(&config.problem_labels),
            solution_labels: LabelSet::new(&config.solution_labels),
            gentle_keywords: config.gentle_keywords.clone(),
            step_prefixes,
            palette_size: config.palette_size.max(1),
        })
    }

    pub fn extract(&self, tree: &dyn MarkupTree, roots: &[NodeId]) -> Substructures {
        let found = Substructures {
            nucleus_steps: self
                .labelled_list(tree, roots, &self.nucleus_labels)
                .map(|list| self.nucleus_steps(tree, list))
                .unwrap_or_default(),
            routes: self
                .labelled_list(tree, roots, &self.route_labels)
                .map(|list| self.routes(tree, list))
                .unwrap_or_default(),
            pitfalls: self
                .labelled_list(tree, roots, &self.pitfall_labels)
                .map(|list| self.pitfalls(tree, list))
                .unwrap_or_default(),
        };
        debug!(
            "substructures: {} step(s), {} route(s), {} pitfall(s)",
            found.nucleus_steps.len(),
            found.routes.len(),
            found.pitfalls.len()
        );
        found
    }

    /// The list belonging to the innermost block that carries the label.
    fn labelled_list(&self, tree: &dyn MarkupTree, roots: &[NodeId], labels: &LabelSet) -> Option<NodeId> {
        let holders: Vec<NodeId> = label_blocks(tree, roots)
            .into_iter()
            .filter(|&block| text_lines(tree, block).iter().any(|line| labels.contains(line)))
            .collect();
        let innermost = holders
            .iter()
            .copied()
            .find(|&block| !holders.iter().any(|&other| tree.is_ancestor_of(block, other)))?;
        locate_list(tree, innermost)
    }

    fn nucleus_steps(&self, tree: &dyn MarkupTree, list: NodeId) -> Vec<NucleusStep> {
        // Dedup set is local to this part
        let mut seen: HashSet<String> = HashSet::new();
        let mut steps = Vec::new();
        for item in list_items(tree, list) {
            let lines = block_lines(tree, item);
            let Some(first) = lines.first() else {
                continue;
            };
            let title = match leading_bold_run(tree, first) {
                Some(run) => self.clean_step_title(&tree.normalized_text(run)),
                None => {
                    let text = line_text(tree, first);
                    let segment = LEADING_SEGMENT
                        .captures(&text)
                        .and_then(|c| c.get(1))
                        .map(|m| m.as_str().to_string())
                        .unwrap_or(text);
                    self.clean_step_title(&segment)
                }
            };
            if title.is_empty() {
                continue;
            }

            let nested = tree
                .children(item)
                .iter()
                .copied()
                .find(|&id| tree.kind(id).is_list());
            let candidates: Vec<String> = match nested {
                Some(sub) => list_items(tree, sub)
                    .into_iter()
                    .map(|li| {
                        block_lines(tree, li)
                            .iter()
                            .map(|line| line_text(tree, line))
                            .collect::<Vec<_>>()
                            .join(" ")
                    })
                    .collect(),
                None => lines[1..]
                    .iter()
                    .filter(|line| leading_bold_run(tree, line).is_none())
                    .map(|line| line_text(tree, line))
                    .collect(),
            };

            let mut subtopics = Vec::new();
            for raw in candidates {
                let text = BULLET.replace(raw.trim(), "").to_string();
                if text.is_empty() || !seen.insert(normalize_whitespace(&text).to_lowercase()) {
                    continue;
                }
                subtopics.push(match text.split_once(": ") {
                    Some((title, description)) => Subtopic {
                        title: title.trim().to_string(),
                        description: Some(description.trim().to_string()).filter(|d| !d.is_empty()),
                    },
                    None => Subtopic {
                        title: text,
                        description: None,
                    },
                });
            }

            steps.push(NucleusStep {
                title,
                color_index: steps.len() % self.palette_size,
                subtopics,
            });
        }
        steps
    }

    fn clean_step_title(&self, raw: &str) -> String {
        let mut title = normalize_whitespace(raw);
        for prefix in &self.step_prefixes {
            title = prefix.replace(&title, "").to_string();
        }
        title.trim().trim_end_matches(':').trim().to_string()
    }

    fn routes(&self, tree: &dyn MarkupTree, list: NodeId) -> Vec<Route> {
        list_items(tree, list)
            .into_iter()
            .filter_map(|item| {
                let lines = block_lines(tree, item);
                let run = leading_bold_run(tree, lines.first()?)?;
                let label = normalize_whitespace(&tree.normalized_text(run))
                    .trim_end_matches(':')
                    .trim()
                    .to_string();
                if label.is_empty() {
                    return None;
                }
                let severity = if self.gentle_keywords.iter().any(|k| contains_ci(&label, k)) {
                    Severity::Gentle
                } else {
                    Severity::Intense
                };

                let mut scratch = DocTree::from_subtrees(tree, tree.children(item));
                let root = scratch.root();
                if let Some(leading) = scratch
                    .descendants(root)
                    .into_iter()
                    .find(|&id| scratch.kind(id).is_bold())
                {
                    detach_with_blank_ancestors(&mut scratch, leading);
                }
                tidy(&mut scratch);

                Some(Route {
                    label,
                    description: root_fragment(&scratch),
                    severity,
                })
            })
            .collect()
    }

    fn pitfalls(&self, tree: &dyn MarkupTree, list: NodeId) -> Vec<Pitfall> {
        list_items(tree, list)
            .into_iter()
            .filter_map(|item| {
                let content = tree.children(item);
                let (problem, solution) = match split_at_label(tree, content, &self.solution_labels) {
                    Some((before, after)) => {
                        let solution = tidy_fragment(&after);
                        (before, Some(solution).filter(|s| !s.is_empty()))
                    }
                    None => (tree.to_fragment(content), None),
                };
                let problem = strip_label(&problem, &self.problem_labels);
                if problem.is_empty() {
                    return None;
                }
                Some(Pitfall { problem, solution })
            })
            .collect()
    }
}

impl PartRule for SubstructureExtractor {
    fn apply(&self, ctx: &PartContext, draft: &mut PartDraft) -> Result<(), RestructureError> {
        draft.substructures = Some(self.extract(ctx.tree, ctx.roots));
        Ok(())
    }

    fn name(&self) -> &str {
        "SubstructureExtraction"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubstructureConfig;
    use crate::tree::NodeKind;

    fn extractor() -> SubstructureExtractor {
        SubstructureExtractor::new(&SubstructureConfig::default()).unwrap()
    }

    fn labelled_list(tree: &mut DocTree, label: &str) -> NodeId {
        let root = tree.root();
        let p = tree.element(root, NodeKind::Paragraph);
        let strong = tree.element(p, NodeKind::Strong);
        tree.text(strong, label);
        tree.element(root, NodeKind::List { ordered: true })
    }

    fn bold_item(tree: &mut DocTree, list: NodeId, bold: &str, rest: &str) -> NodeId {
        let li = tree.element(list, NodeKind::ListItem);
        let strong = tree.element(li, NodeKind::Strong);
        tree.text(strong, bold);
        if !rest.is_empty() {
            tree.text(li, rest);
        }
        li
    }

    #[test]
    fn test_nucleus_titles_and_subtopics() {
        let mut tree = DocTree::new();
        let list = labelled_list(&mut tree, "Tópicos Nucleares:");
        let li = bold_item(&mut tree, list, "1.2. Núcleo 1: Variáveis", "");
        let sub = tree.element(li, NodeKind::List { ordered: false });
        for text in ["Declaração: como criar", "Escopo", "Escopo"] {
            let item = tree.element(sub, NodeKind::ListItem);
            tree.text(item, text);
        }
        let li = tree.element(list, NodeKind::ListItem);
        tree.text(li, "Funções: blocos reutilizáveis");
        tree.element(li, NodeKind::SoftBreak);
        tree.text(li, "Parâmetros: entradas");

        let found = extractor().extract(&tree, tree.children(tree.root()));
        let steps = found.nucleus_steps;
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].title, "Variáveis");
        assert_eq!(steps[0].color_index, 0);
        assert_eq!(steps[0].subtopics.len(), 2);
        assert_eq!(steps[0].subtopics[0].description.as_deref(), Some("como criar"));
        assert_eq!(steps[1].title, "Funções");
        assert_eq!(steps[1].color_index, 1);
        assert_eq!(steps[1].subtopics[0].title, "Parâmetros");
    }

    #[test]
    fn test_routes_need_bold_label() {
        let mut tree = DocTree::new();
        let list = labelled_list(&mut tree, "Rotas Alternativas:");
        bold_item(&mut tree, list, "Rota Simples:", " vídeos curtos");
        bold_item(&mut tree, list, "Rota Profunda:", " livro-texto");
        let li = tree.element(list, NodeKind::ListItem);
        tree.text(li, "sem rótulo");

        let routes = extractor().extract(&tree, tree.children(tree.root())).routes;
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].label, "Rota Simples");
        assert_eq!(routes[0].severity, Severity::Gentle);
        assert_eq!(routes[0].description.plain_text(), "vídeos curtos");
        assert_eq!(routes[1].severity, Severity::Intense);
    }

    #[test]
    fn test_pitfalls_split_on_solution() {
        let mut tree = DocTree::new();
        let list = labelled_list(&mut tree, "Armadilhas Comuns:");
        let li = bold_item(&mut tree, list, "Problema:", " decorar fórmulas. ");
        let strong = tree.element(li, NodeKind::Strong);
        tree.text(strong, "Solução:");
        tree.text(li, " derive-as.");
        let li = tree.element(list, NodeKind::ListItem);
        tree.text(li, "Pular exercícios.");

        let pitfalls = extractor().extract(&tree, tree.children(tree.root())).pitfalls;
        assert_eq!(pitfalls.len(), 2);
        assert_eq!(pitfalls[0].problem.plain_text(), "decorar fórmulas.");
        assert_eq!(
            pitfalls[0].solution.as_ref().map(|s| s.plain_text()).as_deref(),
            Some("derive-as.")
        );
        assert_eq!(pitfalls[1].problem.plain_text(), "Pular exercícios.");
        assert!(pitfalls[1].solution.is_none());
    }

    #[test]
    fn test_missing_label_gives_empty_collections() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let p = tree.element(root, NodeKind::Paragraph);
        tree.text(p, "nada aqui");
        let found = extractor().extract(&tree, tree.children(root));
        assert_eq!(found, Substructures::default());
    }
}
