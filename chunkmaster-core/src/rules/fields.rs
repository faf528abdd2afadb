use super::engine::{PartContext, PartDraft, PartRule};
use super::labels::{
    block_lines, clean_value, contains_ci, label_blocks, leading_bold_run, line_text, list_items,
    locate_list, text_lines, LabelSet,
};
use crate::config::{
    EngineConfig, ExtractionStrategy, FieldFallback, FieldSpec, HarvestConfig, PromptTemplateConfig,
};
use crate::error::RestructureError;
use crate::tree::{normalize_whitespace, MarkupTree, NodeId, NodeKind};
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFields {
    pub objective: Option<String>,
    pub concepts: Vec<String>,
    pub reflection: Option<String>,
    pub instruction_prompt: Option<String>,
    /// Concepts came from the bold-run harvest rather than a label
    pub concepts_harvested: bool,
}

struct CompiledField {
    labels: LabelSet,
    strategies: Vec<ExtractionStrategy>,
    fallback: FieldFallback,
}

impl CompiledField {
    fn new(spec: &FieldSpec) -> Self {
        Self {
            labels: LabelSet::new(&spec.labels),
            strategies: spec.strategies.clone(),
            fallback: spec.fallback,
        }
    }
}

/// Table-driven field extraction: for each field, try every strategy in
/// order over the part's blocks and keep the first value found.
pub struct FieldExtractor {
    objective: CompiledField,
    concepts: CompiledField,
    reflection: CompiledField,
    instruction: CompiledField,
    concept_separator: Regex,
    max_concepts: usize,
    harvest: HarvestConfig,
    synthesizer: PromptSynthesizer,
}

impl FieldExtractor {
    pub fn new(config: &EngineConfig) -> Result<Self, RestructureError> {
        let fields = &config.fields;
        Ok(Self {
            objective: CompiledField::new(&fields.objective),
            concepts: CompiledField::new(&fields.concepts),
            reflection: CompiledField::new(&fields.reflection),
            instruction: CompiledField::new(&fields.instruction),
            concept_separator: compile(&fields.concept_separator)?,
            max_concepts: fields.max_concepts,
            harvest: config.harvest.clone(),
            synthesizer: PromptSynthesizer::new(&config.prompt)?,
        })
    }

    pub fn extract(&self, tree: &dyn MarkupTree, roots: &[NodeId], part_title: &str) -> ExtractedFields {
        let blocks = label_blocks(tree, roots);

        let objective = self.scalar(&self.objective, tree, roots, &blocks);
        let reflection = self.scalar(&self.reflection, tree, roots, &blocks);

        let mut concepts = self.labelled_concepts(tree, roots, &blocks);
        let mut concepts_harvested = false;
        if concepts.is_empty() && self.concepts.fallback == FieldFallback::BoldHarvest {
            concepts = self.harvest_concepts(tree, roots);
            concepts_harvested = !concepts.is_empty();
        }

        let mut instruction_prompt = self.scalar(&self.instruction, tree, roots, &blocks);
        if instruction_prompt.is_none() && self.instruction.fallback == FieldFallback::Synthesize {
            instruction_prompt =
                Some(self.synthesizer.synthesize(part_title, &concepts, objective.as_deref()));
        }

        debug!(
            "fields for {part_title:?}: objective={}, concepts={}, reflection={}, harvested={}",
            objective.is_some(),
            concepts.len(),
            reflection.is_some(),
            concepts_harvested
        );

        ExtractedFields {
            objective,
            concepts,
            reflection,
            instruction_prompt,
            concepts_harvested,
        }
    }

    fn scalar(
        &self,
        field: &CompiledField,
        tree: &dyn MarkupTree,
        roots: &[NodeId],
        blocks: &[NodeId],
    ) -> Option<String> {
        field.strategies.iter().find_map(|strategy| match strategy {
            ExtractionStrategy::InlineSplit => inline_value(tree, blocks, &field.labels),
            ExtractionStrategy::EmphasisRun => {
                run_value(tree, roots, &field.labels).filter(|v| !v.is_empty())
            }
            ExtractionStrategy::NextBlock => next_block_value(tree, blocks, &field.labels),
            ExtractionStrategy::AdjacentList | ExtractionStrategy::HeadingList => {
                let items = list_strategy(*strategy, tree, blocks, &field.labels)?;
                Some(items.join(", ")).filter(|v| !v.is_empty())
            }
        })
    }

    fn labelled_concepts(&self, tree: &dyn MarkupTree, roots: &[NodeId], blocks: &[NodeId]) -> Vec<String> {
        let labels = &self.concepts.labels;
        for strategy in &self.concepts.strategies {
            let raw: Vec<String> = match strategy {
                ExtractionStrategy::InlineSplit => inline_value(tree, blocks, labels)
                    .map(|v| self.split_concepts(&v))
                    .unwrap_or_default(),
                ExtractionStrategy::AdjacentList | ExtractionStrategy::HeadingList => {
                    list_strategy(*strategy, tree, blocks, labels).unwrap_or_default()
                }
                ExtractionStrategy::EmphasisRun => match run_value(tree, roots, labels) {
                    Some(value) if !value.is_empty() => self.split_concepts(&value),
                    Some(_) => run_list(tree, roots, labels).unwrap_or_default(),
                    None => Vec::new(),
                },
                ExtractionStrategy::NextBlock => next_block_value(tree, blocks, labels)
                    .map(|v| self.split_concepts(&v))
                    .unwrap_or_default(),
            };
            let concepts = dedupe_capped(raw, self.max_concepts);
            if !concepts.is_empty() {
                debug!("concepts found via {strategy:?}");
                return concepts;
            }
        }
        Vec::new()
    }

    fn split_concepts(&self, value: &str) -> Vec<String> {
        self.concept_separator
            .split(value)
            .map(clean_concept)
            .filter(|c| !c.is_empty())
            .collect()
    }

    /// Short bold runs from the body, strong runs first, then plain bold.
    fn harvest_concepts(&self, tree: &dyn MarkupTree, roots: &[NodeId]) -> Vec<String> {
        let runs_of = |wanted: NodeKind| -> Vec<String> {
            roots
                .iter()
                .flat_map(|&root| std::iter::once(root).chain(tree.descendants(root)))
                .filter(|&id| *tree.kind(id) == wanted)
                .map(|id| tree.normalized_text(id))
                .filter(|text| self.accepts_harvest(text))
                .collect()
        };
        let strong = dedupe_capped(runs_of(NodeKind::Strong), self.harvest.max_items);
        if !strong.is_empty() {
            return strong;
        }
        dedupe_capped(runs_of(NodeKind::Bold), self.harvest.max_items)
    }

    fn accepts_harvest(&self, text: &str) -> bool {
        let len = text.chars().count();
        len >= self.harvest.min_chars
            && len <= self.harvest.max_chars
            && !text.contains(':')
            && !text.starts_with(|c: char| c.is_ascii_digit())
            && !self
                .harvest
                .excluded_keywords
                .iter()
                .any(|keyword| contains_ci(text, keyword))
    }
}

fn compile(pattern: &str) -> Result<Regex, RestructureError> {
    Regex::new(pattern).map_err(|e| RestructureError::Config(format!("bad pattern {pattern:?}: {e}")))
}

/// Value after the label on the line that holds it.
fn inline_value(tree: &dyn MarkupTree, blocks: &[NodeId], labels: &LabelSet) -> Option<String> {
    blocks.iter().find_map(|&block| {
        text_lines(tree, block)
            .iter()
            .find_map(|line| labels.value_after(line).filter(|v| !v.is_empty()))
    })
}

/// True when a block holds the label with nothing after it.
fn bare_label(tree: &dyn MarkupTree, block: NodeId, labels: &LabelSet) -> bool {
    text_lines(tree, block)
        .iter()
        .any(|line| labels.value_after(line).is_some_and(|v| v.is_empty()))
}

/// Text of the next non-blank sibling block after a bare label.
fn next_block_value(tree: &dyn MarkupTree, blocks: &[NodeId], labels: &LabelSet) -> Option<String> {
    blocks
        .iter()
        .filter(|&&block| bare_label(tree, block, labels))
        .find_map(|&block| {
            let next = tree
                .following_siblings(block)
                .into_iter()
                .find(|&id| !tree.is_blank(id))?;
            let kind = tree.kind(next);
            if kind.is_heading() || kind.is_list() {
                return None;
            }
            Some(tree.normalized_text(next)).filter(|v| !v.is_empty())
        })
}

fn list_strategy(
    strategy: ExtractionStrategy,
    tree: &dyn MarkupTree,
    blocks: &[NodeId],
    labels: &LabelSet,
) -> Option<Vec<String>> {
    blocks.iter().find_map(|&block| {
        let list = match strategy {
            ExtractionStrategy::AdjacentList if bare_label(tree, block, labels) => {
                adjacent_list(tree, block)
            }
            ExtractionStrategy::HeadingList
                if tree.kind(block).is_heading()
                    && labels.matches_heading(&tree.normalized_text(block)) =>
            {
                locate_list(tree, block)
            }
            _ => None,
        }?;
        Some(list_values(tree, list)).filter(|items| !items.is_empty())
    })
}

/// A list nested in the block, or the block's next non-blank sibling.
fn adjacent_list(tree: &dyn MarkupTree, block: NodeId) -> Option<NodeId> {
    if let Some(nested) = tree
        .descendants(block)
        .into_iter()
        .find(|&id| tree.kind(id).is_list())
    {
        return Some(nested);
    }
    let next = tree
        .following_siblings(block)
        .into_iter()
        .find(|&id| !tree.is_blank(id))?;
    tree.kind(next).is_list().then_some(next)
}

/// One value per list item: the item's leading bold term, else the text
/// before ": ", else the whole item.
fn list_values(tree: &dyn MarkupTree, list: NodeId) -> Vec<String> {
    list_items(tree, list)
        .into_iter()
        .filter_map(|item| {
            let lines = block_lines(tree, item);
            let first = lines.first()?;
            let value = match leading_bold_run(tree, first) {
                Some(run) => tree.normalized_text(run),
                None => {
                    let text = line_text(tree, first);
                    match text.split_once(": ") {
                        Some((term, _)) => term.to_string(),
                        None => text,
                    }
                }
            };
            Some(clean_concept(&value)).filter(|v| !v.is_empty())
        })
        .collect()
}

/// Runs (bold or emphasized) whose own text starts with a label.
fn label_runs(tree: &dyn MarkupTree, roots: &[NodeId], labels: &LabelSet) -> Vec<NodeId> {
    roots
        .iter()
        .flat_map(|&root| std::iter::once(root).chain(tree.descendants(root)))
        .filter(|&id| tree.kind(id).is_run())
        .filter(|&id| {
            let text = tree.normalized_text(id);
            labels.iter().any(|label| label.starts_run(&text))
        })
        .collect()
}

/// Text that follows a label run: the trailing inline text up to the next
/// line break, else the part of the run after its colon. `Some("")` when a
/// label run exists but carries no value.
fn run_value(tree: &dyn MarkupTree, roots: &[NodeId], labels: &LabelSet) -> Option<String> {
    let runs = label_runs(tree, roots, labels);
    if runs.is_empty() {
        return None;
    }
    for &run in &runs {
        let trailing: Vec<NodeId> = tree
            .following_siblings(run)
            .into_iter()
            .take_while(|&id| !tree.kind(id).is_line_break() && !tree.kind(id).is_block())
            .collect();
        let value = clean_value(&line_text(tree, &trailing));
        if !value.is_empty() {
            return Some(value);
        }
        let text = tree.normalized_text(run);
        if let Some((_, inside)) = text.split_once(':') {
            let value = clean_value(inside);
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    Some(String::new())
}

/// List right after the block that owns a label run.
fn run_list(tree: &dyn MarkupTree, roots: &[NodeId], labels: &LabelSet) -> Option<Vec<String>> {
    label_runs(tree, roots, labels).into_iter().find_map(|run| {
        let parent = tree.parent(run)?;
        let list = locate_list(tree, parent)?;
        Some(list_values(tree, list)).filter(|items| !items.is_empty())
    })
}

fn clean_concept(raw: &str) -> String {
    let text = normalize_whitespace(raw);
    text.trim()
        .trim_end_matches('.')
        .trim_matches(|c: char| c == '*' || c == '"' || c == '“' || c == '”')
        .trim()
        .to_string()
}

/// Deduplicate by normalized text, keep first-seen order, cap the count.
pub fn dedupe_capped(items: Vec<String>, cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| !item.is_empty() && seen.insert(normalize_whitespace(item).to_lowercase()))
        .take(cap)
        .collect()
}

/// Builds the instruction prompt of parts that do not carry one.
pub struct PromptSynthesizer {
    config: PromptTemplateConfig,
    part_prefix: Regex,
}

impl PromptSynthesizer {
    pub fn new(config: &PromptTemplateConfig) -> Result<Self, RestructureError> {
        Ok(Self {
            config: config.clone(),
            part_prefix: compile(&config.part_prefix_pattern)?,
        })
    }

    pub fn synthesize(&self, part_title: &str, concepts: &[String], objective: Option<&str>) -> String {
        let topic = self.part_prefix.replace(part_title.trim(), "");
        let topic = if topic.trim().is_empty() {
            part_title.trim().to_string()
        } else {
            topic.trim().to_string()
        };

        let mut lines = vec![self.config.opening.replace("{part}", &topic)];
        lines.extend(
            concepts
                .iter()
                .take(self.config.max_questions)
                .map(|concept| self.config.concept_question.replace("{concept}", concept)),
        );
        if let Some(objective) = objective.filter(|o| !o.trim().is_empty()) {
            lines.push(self.config.objective.replace("{objective}", objective.trim()));
        }
        lines.push(self.config.closing.clone());
        lines.join("\n")
    }
}

impl PartRule for FieldExtractor {
    fn apply(&self, ctx: &PartContext, draft: &mut PartDraft) -> Result<(), RestructureError> {
        draft.fields = Some(self.extract(ctx.tree, ctx.roots, ctx.part_title));
        Ok(())
    }

    fn name(&self) -> &str {
        "FieldExtraction"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::DocTree;

    fn paragraphs(lines: &[&str]) -> DocTree {
        let mut tree = DocTree::new();
        let root = tree.root();
        for line in lines {
            let p = tree.element(root, NodeKind::Paragraph);
            tree.text(p, line);
        }
        tree
    }

    fn extract(tree: &DocTree) -> ExtractedFields {
        let extractor = FieldExtractor::new(&EngineConfig::default()).unwrap();
        extractor.extract(tree, tree.children(tree.root()), "Parte 1: Fundamentos")
    }

    #[test]
    fn test_inline_concepts_split_and_trimmed() {
        let tree = paragraphs(&["Conceitos-chave: A, B; C."]);
        assert_eq!(extract(&tree).concepts, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_objective_label_priority() {
        let tree = paragraphs(&["Objetivo: curto", "Objetivo de Aprendizagem: longo"]);
        // Blocks are scanned in order; the first block wins.
        assert_eq!(extract(&tree).objective.as_deref(), Some("curto"));
    }

    #[test]
    fn test_third_objective_label_is_case_insensitive() {
        let tree = paragraphs(&["OBJETIVO TRANSFORMADOR: mudar"]);
        assert_eq!(extract(&tree).objective.as_deref(), Some("mudar"));
    }

    #[test]
    fn test_adjacent_list_concepts() {
        let mut tree = paragraphs(&["Conceitos-chave:"]);
        let root = tree.root();
        let list = tree.element(root, NodeKind::List { ordered: false });
        for term in ["Variável: guarda valores", "Tipo", "Tipo"] {
            let li = tree.element(list, NodeKind::ListItem);
            tree.text(li, term);
        }
        assert_eq!(extract(&tree).concepts, vec!["Variável", "Tipo"]);
    }

    fn push_list(tree: &mut DocTree, items: &[&str]) -> NodeId {
        let root = tree.root();
        let list = tree.element(root, NodeKind::List { ordered: false });
        for item in items {
            let li = tree.element(list, NodeKind::ListItem);
            tree.text(li, item);
        }
        list
    }

    #[test]
    fn test_heading_list_concepts() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let h = tree.element(root, NodeKind::Heading(3));
        tree.text(h, "Conceitos-chave");
        push_list(&mut tree, &["Ownership", "Borrowing: empréstimo"]);
        let fields = extract(&tree);
        assert_eq!(fields.concepts, vec!["Ownership", "Borrowing"]);
        assert!(!fields.concepts_harvested);
    }

    #[test]
    fn test_label_run_without_colon_takes_following_list() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let p = tree.element(root, NodeKind::Paragraph);
        let strong = tree.element(p, NodeKind::Strong);
        tree.text(strong, "Conceitos-chave");
        let list = tree.element(root, NodeKind::List { ordered: false });
        for (term, rest) in [("Lifetime", " quanto vive"), ("Trait", " comportamento")] {
            let li = tree.element(list, NodeKind::ListItem);
            let b = tree.element(li, NodeKind::Strong);
            tree.text(b, term);
            tree.text(li, rest);
        }
        let fields = extract(&tree);
        assert_eq!(fields.concepts, vec!["Lifetime", "Trait"]);
        assert!(!fields.concepts_harvested);
    }

    #[test]
    fn test_harvest_falls_back_to_plain_bold() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let p = tree.element(root, NodeKind::Paragraph);
        for run in ["Pilha", "Heap"] {
            let b = tree.element(p, NodeKind::Bold);
            tree.text(b, run);
            tree.text(p, " e ");
        }
        let fields = extract(&tree);
        assert_eq!(fields.concepts, vec!["Pilha", "Heap"]);
        assert!(fields.concepts_harvested);
    }

    #[test]
    fn test_harvest_filters_bold_runs() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let p = tree.element(root, NodeKind::Paragraph);
        for run in ["Recursão", "Objetivo", "1 passo", "Caso base", "ab", "Nota: x"] {
            let strong = tree.element(p, NodeKind::Strong);
            tree.text(strong, run);
            tree.text(p, " ");
        }
        let fields = extract(&tree);
        assert_eq!(fields.concepts, vec!["Recursão", "Caso base"]);
        assert!(fields.concepts_harvested);
    }

    #[test]
    fn test_synthesized_prompt_names_part_and_concepts() {
        let tree = paragraphs(&["Conceitos: X, Y", "Objetivo: entender X"]);
        let prompt = extract(&tree).instruction_prompt.unwrap();
        assert!(prompt.contains("\"Fundamentos\""));
        assert!(prompt.contains("O que é X e por que é importante?"));
        assert!(prompt.contains("O que é Y e por que é importante?"));
        assert!(prompt.contains("entender X"));
    }

    #[test]
    fn test_explicit_instruction_prompt_wins() {
        let tree = paragraphs(&["Prompt de Instrução: Explique tudo."]);
        assert_eq!(
            extract(&tree).instruction_prompt.as_deref(),
            Some("Explique tudo.")
        );
    }
}
