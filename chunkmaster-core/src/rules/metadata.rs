use super::engine::{PartContext, PartDraft, PartRule};
use super::labels::{clean_value, label_blocks, list_items, locate_list, text_lines, LabelSet};
use crate::config::MetadataConfig;
use crate::error::RestructureError;
use crate::tree::{normalize_whitespace, MarkupTree, NodeId};
use crate::types::Metadata;
use regex::Regex;
use tracing::debug;

/// Derives difficulty, cognitive level, learning style and progress from a
/// part's position, letting explicit annotations in the text override them.
pub struct MetadataSynthesizer {
    cognitive_levels: Vec<String>,
    learning_styles: Vec<String>,
    difficulty: Regex,
    cognitive: Regex,
    style: Regex,
    progress: Regex,
    challenge: Regex,
    time_annotation: Regex,
    connections_labels: LabelSet,
    ai_prompt_labels: LabelSet,
    real_case_labels: LabelSet,
    checklist_labels: LabelSet,
}

fn compile(pattern: &str) -> Result<Regex, RestructureError> {
    Regex::new(pattern).map_err(|e| RestructureError::Config(format!("bad pattern {pattern:?}: {e}")))
}

impl MetadataSynthesizer {
    pub fn new(config: &MetadataConfig) -> Result<Self, RestructureError> {
        if config.cognitive_levels.is_empty() || config.learning_styles.is_empty() {
            return Err(RestructureError::Config(
                "cognitive_levels and learning_styles must not be empty".to_string(),
            ));
        }
        Ok(Self {
            cognitive_levels: config.cognitive_levels.clone(),
            learning_styles: config.learning_styles.clone(),
            difficulty: compile(&config.difficulty_pattern)?,
            cognitive: compile(&config.cognitive_pattern)?,
            style: compile(&config.style_pattern)?,
            progress: compile(&config.progress_pattern)?,
            challenge: compile(&config.challenge_pattern)?,
            time_annotation: compile(&config.time_annotation_pattern)?,
            connections_labels: LabelSet::new(&config.connections_labels),
            ai_prompt_labels: LabelSet::new(&config.ai_prompt_labels),
            real_case_labels: LabelSet::new(&config.real_case_labels),
            checklist_labels: LabelSet::new(&config.checklist_labels),
        })
    }

    /// Metadata from position alone.
    pub fn positional(&self, index: usize, total: usize) -> Metadata {
        let total = total.max(1);
        let difficulty = ((index + 1).div_ceil(2)).min(5);
        let cognitive = index.min(self.cognitive_levels.len() - 1);
        Metadata {
            difficulty: format!("{difficulty}/5"),
            cognitive_level: self.cognitive_levels[cognitive].clone(),
            learning_style: self.learning_styles[index % self.learning_styles.len()].clone(),
            progress_percent: positional_progress(index, total),
            ..Metadata::default()
        }
    }

    pub fn synthesize(
        &self,
        tree: &dyn MarkupTree,
        roots: &[NodeId],
        index: usize,
        total: usize,
    ) -> Metadata {
        let mut metadata = self.positional(index, total);
        let blocks = label_blocks(tree, roots);
        let lines: Vec<String> = blocks
            .iter()
            .flat_map(|&block| text_lines(tree, block))
            .collect();
        let text = lines.join("\n");

        if let Some(k) = capture(&self.difficulty, &text).and_then(|d| d.parse::<u8>().ok()) {
            if (1..=5).contains(&k) {
                metadata.difficulty = format!("{k}/5");
            }
        }
        if let Some(level) = capture(&self.cognitive, &text) {
            metadata.cognitive_level = level;
        }
        if let Some(style) = capture(&self.style, &text) {
            metadata.learning_style = style;
        }
        let mut progress_explicit = false;
        if let Some(p) = capture(&self.progress, &text).and_then(|p| p.parse::<u8>().ok()) {
            metadata.progress_percent = p.min(100);
            progress_explicit = true;
        }

        metadata.connections = first_value(&lines, &self.connections_labels);
        metadata.ai_prompt = first_value(&lines, &self.ai_prompt_labels);
        metadata.real_case = first_value(&lines, &self.real_case_labels);
        metadata.challenge = lines.iter().find_map(|line| {
            let raw = capture(&self.challenge, line)?;
            let cleaned = clean_value(&self.time_annotation.replace_all(&raw, " "));
            (!cleaned.is_empty()).then_some(cleaned)
        });
        metadata.checklist = self.checklist(tree, &blocks);

        debug!(
            "metadata for part {}: difficulty={}, progress={}{}",
            index + 1,
            metadata.difficulty,
            metadata.progress_percent,
            if progress_explicit { " (explicit)" } else { "" }
        );
        metadata
    }

    fn checklist(&self, tree: &dyn MarkupTree, blocks: &[NodeId]) -> Option<Vec<String>> {
        for &block in blocks {
            let Some(line) = text_lines(tree, block)
                .into_iter()
                .find(|line| self.checklist_labels.contains(line))
            else {
                continue;
            };
            if let Some(list) = locate_list(tree, block) {
                let items: Vec<String> = list_items(tree, list)
                    .into_iter()
                    .map(|li| normalize_whitespace(&tree.inline_text(li)))
                    .filter(|item| !item.is_empty())
                    .collect();
                if !items.is_empty() {
                    return Some(items);
                }
            }
            let inline: Vec<String> = self
                .checklist_labels
                .value_after(&line)
                .unwrap_or_default()
                .split([',', ';'])
                .map(clean_value)
                .filter(|item| !item.is_empty())
                .collect();
            return Some(inline).filter(|items| !items.is_empty());
        }
        None
    }
}

fn positional_progress(index: usize, total: usize) -> u8 {
    if index + 1 >= total {
        return 100;
    }
    let ratio = (index + 1) as f64 / total as f64;
    (5.0 + ratio * 95.0).round().min(100.0) as u8
}

fn capture(pattern: &Regex, text: &str) -> Option<String> {
    let value = pattern.captures(text)?.get(1)?.as_str();
    Some(normalize_whitespace(value)).filter(|v| !v.is_empty())
}

fn first_value(lines: &[String], labels: &LabelSet) -> Option<String> {
    lines
        .iter()
        .find_map(|line| labels.value_after(line))
        .filter(|v| !v.is_empty())
}

/// Make progress non-decreasing across parts and pin the last one to 100.
pub fn enforce_progress(progress: &mut [u8]) {
    let mut floor = 0u8;
    for value in progress.iter_mut() {
        if *value < floor {
            *value = floor;
        }
        floor = *value;
    }
    if let Some(last) = progress.last_mut() {
        *last = 100;
    }
}

impl PartRule for MetadataSynthesizer {
    fn apply(&self, ctx: &PartContext, draft: &mut PartDraft) -> Result<(), RestructureError> {
        draft.metadata = Some(self.synthesize(ctx.tree, ctx.roots, ctx.index, ctx.total));
        Ok(())
    }

    fn name(&self) -> &str {
        "MetadataSynthesis"
    }
}
