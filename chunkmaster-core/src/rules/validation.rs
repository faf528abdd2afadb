use super::labels::contains_ci;
use crate::config::EngineConfig;
use crate::error::RestructureError;
use crate::tree::{MarkupTree, NodeId, NodeKind};
use crate::types::Document;
use regex::Regex;
use std::collections::HashSet;

// ModelValidator - read-only consistency checks over a built document or a
// repaired tree
pub struct ModelValidator {
    max_concepts: usize,
    excluded_part_titles: Vec<String>,
    achievement_label: String,
    sub_challenge_label: String,
    sub_list_class: String,
    repeated_glyph: Regex,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
    pub quality_score: f32,
    /// Parts (document checks) or marker items (tree checks) examined
    pub total_checked: usize,
}

impl ValidationReport {
    fn new(issues: Vec<ValidationIssue>, total_checked: usize) -> Self {
        let errors = issues.iter().filter(|issue| !issue.is_warning()).count();
        // 1.0 = clean, 0.0 = an error for every checked item
        let quality_score = if total_checked == 0 {
            1.0
        } else {
            (1.0 - (errors as f32 / total_checked as f32)).max(0.0)
        };
        Self {
            issues,
            quality_score,
            total_checked,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|issue| !issue.is_warning())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationIssue {
    ProgressRegression {
        part: usize,
        previous: u8,
        current: u8,
    },
    FinalProgressNot100 {
        actual: u8,
    },
    ConceptOverflow {
        part: usize,
        count: usize,
    },
    DuplicateConcept {
        part: usize,
        concept: String,
    },
    EmptyInstructionPrompt {
        part: usize,
    },
    ExcludedPartTitle {
        part: usize,
        title: String,
    },
    DuplicateArrows {
        text: String,
    },
    MultipleOwners {
        text: String,
        owners: usize,
    },
    UnattachedSubChallenge {
        text: String,
    },
}

impl ValidationIssue {
    pub fn is_warning(&self) -> bool {
        matches!(self, ValidationIssue::UnattachedSubChallenge { .. })
    }
}

impl ModelValidator {
    pub fn new(config: &EngineConfig) -> Result<Self, RestructureError> {
        let glyph = regex::escape(&config.repair.arrow_glyph);
        let repeated_glyph = Regex::new(&format!(r"{glyph}\s*{glyph}"))
            .map_err(|e| RestructureError::Config(format!("bad arrow glyph: {e}")))?;
        Ok(Self {
            max_concepts: config.fields.max_concepts,
            excluded_part_titles: config.segmentation.excluded_part_titles.clone(),
            achievement_label: config.repair.achievement_label.clone(),
            sub_challenge_label: config.repair.sub_challenge_label.clone(),
            sub_list_class: config.repair.sub_list_class.clone(),
            repeated_glyph,
        })
    }

    pub fn validate_document(&self, document: &Document) -> ValidationReport {
        let mut issues = Vec::new();

        // 1. Progress never decreases and ends at 100
        for (i, pair) in document.parts.windows(2).enumerate() {
            let previous = pair[0].metadata.progress_percent;
            let current = pair[1].metadata.progress_percent;
            if current < previous {
                issues.push(ValidationIssue::ProgressRegression {
                    part: i + 1,
                    previous,
                    current,
                });
            }
        }
        if let Some(last) = document.parts.last() {
            if last.metadata.progress_percent != 100 {
                issues.push(ValidationIssue::FinalProgressNot100 {
                    actual: last.metadata.progress_percent,
                });
            }
        }

        for (i, part) in document.parts.iter().enumerate() {
            // 2. Concepts are capped and unique
            if part.concepts.len() > self.max_concepts {
                issues.push(ValidationIssue::ConceptOverflow {
                    part: i,
                    count: part.concepts.len(),
                });
            }
            let mut seen = HashSet::new();
            for concept in &part.concepts {
                if !seen.insert(concept.trim().to_lowercase()) {
                    issues.push(ValidationIssue::DuplicateConcept {
                        part: i,
                        concept: concept.clone(),
                    });
                }
            }

            // 3. Every part carries a prompt
            if part.instruction_prompt.trim().is_empty() {
                issues.push(ValidationIssue::EmptyInstructionPrompt { part: i });
            }

            // 4. Aggregate headings never become parts
            let title = part.title.trim().trim_end_matches(':').to_lowercase();
            if self
                .excluded_part_titles
                .iter()
                .any(|excluded| excluded.to_lowercase() == title)
            {
                issues.push(ValidationIssue::ExcludedPartTitle {
                    part: i,
                    title: part.title.clone(),
                });
            }

            let body = part.body.plain_text();
            if self.repeated_glyph.is_match(&body) {
                issues.push(ValidationIssue::DuplicateArrows { text: preview(&body) });
            }
        }

        ValidationReport::new(issues, document.parts.len())
    }

    pub fn validate_repaired_tree(&self, tree: &dyn MarkupTree) -> ValidationReport {
        let mut issues = Vec::new();
        let mut checked = 0;
        let root = tree.root();

        for id in tree.descendants(root) {
            if !matches!(tree.kind(id), NodeKind::ListItem) {
                continue;
            }
            let text = tree.inline_text(id);
            let is_achievement = contains_ci(&text, &self.achievement_label);
            let is_sub_challenge = !is_achievement && contains_ci(&text, &self.sub_challenge_label);
            if !is_achievement && !is_sub_challenge {
                continue;
            }
            checked += 1;

            if self.repeated_glyph.is_match(&text) {
                issues.push(ValidationIssue::DuplicateArrows { text: preview(&text) });
            }
            if is_sub_challenge {
                let owners = self.owning_lists(tree, id);
                if owners == 0 {
                    issues.push(ValidationIssue::UnattachedSubChallenge { text: preview(&text) });
                } else if owners > 1 {
                    issues.push(ValidationIssue::MultipleOwners {
                        text: preview(&text),
                        owners,
                    });
                }
            }
        }

        ValidationReport::new(issues, checked)
    }

    fn owning_lists(&self, tree: &dyn MarkupTree, item: NodeId) -> usize {
        tree.ancestors(item)
            .into_iter()
            .filter(|&a| tree.kind(a).is_list() && tree.has_class(a, &self.sub_list_class))
            .count()
    }
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(50).collect();
    if text.chars().count() > 50 {
        out.push_str("...");
    }
    out
}

/// Print validation report to console
pub fn print_validation_report(report: &ValidationReport) {
    println!("   📊 Validation Report:");
    println!("      📈 Quality Score: {:.2}/1.00", report.quality_score);
    println!("      🔍 Issues Found: {}", report.issues.len());

    if report.issues.is_empty() {
        println!("      ✅ No structural issues detected!");
        return;
    }

    println!("      ⚠️  Issues detected:");
    for issue in &report.issues {
        match issue {
            ValidationIssue::ProgressRegression {
                part,
                previous,
                current,
            } => {
                println!(
                    "         📉 Progress regression at part {}: {}% → {}%",
                    part + 1,
                    previous,
                    current
                );
            }
            ValidationIssue::FinalProgressNot100 { actual } => {
                println!("         🏁 Last part ends at {actual}% instead of 100%");
            }
            ValidationIssue::ConceptOverflow { part, count } => {
                println!("         📚 Part {} lists {} concepts", part + 1, count);
            }
            ValidationIssue::DuplicateConcept { part, concept } => {
                println!("         🔁 Part {} repeats concept \"{}\"", part + 1, concept);
            }
            ValidationIssue::EmptyInstructionPrompt { part } => {
                println!("         💬 Part {} has an empty instruction prompt", part + 1);
            }
            ValidationIssue::ExcludedPartTitle { part, title } => {
                println!("         🚫 Part {} uses an excluded title: \"{}\"", part + 1, title);
            }
            ValidationIssue::DuplicateArrows { text } => {
                println!("         ↳  Repeated arrow marker: \"{text}\"");
            }
            ValidationIssue::MultipleOwners { text, owners } => {
                println!("         👥 Sub-challenge under {owners} achievements: \"{text}\"");
            }
            ValidationIssue::UnattachedSubChallenge { text } => {
                println!("         🏝️  Unattached sub-challenge (warning): \"{text}\"");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{DocTree, MarkupFragment, MarkupTreeMut};
    use crate::types::{Metadata, Part};

    fn part(title: &str, progress: u8, concepts: &[&str]) -> Part {
        Part {
            title: title.to_string(),
            body: MarkupFragment::paragraph("texto"),
            objective: None,
            concepts: concepts.iter().map(|c| c.to_string()).collect(),
            reflection: None,
            instruction_prompt: "prompt".to_string(),
            nucleus_steps: Vec::new(),
            routes: Vec::new(),
            pitfalls: Vec::new(),
            metadata: Metadata {
                progress_percent: progress,
                ..Metadata::default()
            },
        }
    }

    fn validator() -> ModelValidator {
        ModelValidator::new(&EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_clean_document_scores_one() {
        let doc = Document {
            title: "Guia".to_string(),
            intro: None,
            parts: vec![part("Parte 1", 50, &["A", "B"]), part("Parte 2", 100, &[])],
            conclusion: None,
        };
        let report = validator().validate_document(&doc);
        assert!(report.issues.is_empty());
        assert_eq!(report.quality_score, 1.0);
        assert_eq!(report.total_checked, 2);
    }

    #[test]
    fn test_document_issues_are_reported() {
        let doc = Document {
            title: "Guia".to_string(),
            intro: None,
            parts: vec![part("Partes", 60, &["A", "a"]), part("Parte 2", 40, &[])],
            conclusion: None,
        };
        let report = validator().validate_document(&doc);
        assert!(report.issues.contains(&ValidationIssue::ProgressRegression {
            part: 1,
            previous: 60,
            current: 40
        }));
        assert!(report
            .issues
            .contains(&ValidationIssue::FinalProgressNot100 { actual: 40 }));
        assert!(report.issues.iter().any(|i| matches!(i, ValidationIssue::DuplicateConcept { .. })));
        assert!(report.issues.iter().any(|i| matches!(i, ValidationIssue::ExcludedPartTitle { .. })));
        assert!(report.has_errors());
    }

    #[test]
    fn test_unattached_sub_challenge_is_only_a_warning() {
        let mut tree = DocTree::new();
        let root = tree.root();
        let list = tree.element(root, NodeKind::List { ordered: false });
        let li = tree.element(list, NodeKind::ListItem);
        tree.text(li, "↳ Mini-desafio: sozinho");

        let report = validator().validate_repaired_tree(&tree);
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].is_warning());
        assert!(!report.has_errors());

        tree.add_class(list, "mini-challenges-list");
        let report = validator().validate_repaired_tree(&tree);
        assert!(report.issues.is_empty());
    }
}
