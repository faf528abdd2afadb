use super::fields::{ExtractedFields, FieldExtractor, PromptSynthesizer};
use super::fragment_ops::tidy_fragment;
use super::hierarchy_repair::HierarchyRepair;
use super::metadata::{enforce_progress, MetadataSynthesizer};
use super::sanitizer::ContentSanitizer;
use super::segmenter::SectionSegmenter;
use super::substructures::{SubstructureExtractor, Substructures};
use crate::config::EngineConfig;
use crate::error::RestructureError;
use crate::tree::{DocTree, MarkupFragment, MarkupTree, MarkupTreeMut, NodeId};
use crate::types::{Document, Metadata, Part, RepairReport};
use std::cell::RefCell;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What a per-part rule sees: the part's own scratch tree and its place in
/// the document.
pub struct PartContext<'a> {
    pub tree: &'a dyn MarkupTree,
    pub roots: &'a [NodeId],
    pub index: usize,
    pub total: usize,
    pub document_title: &'a str,
    pub part_title: &'a str,
}

/// Results accumulated by the rules for one part. Anything left empty is
/// filled in during assembly.
#[derive(Debug, Default)]
pub struct PartDraft {
    pub fields: Option<ExtractedFields>,
    pub substructures: Option<Substructures>,
    pub metadata: Option<Metadata>,
    pub body: Option<MarkupFragment>,
}

// Per-part rule pipeline infrastructure
pub trait PartRule {
    fn apply(&self, ctx: &PartContext, draft: &mut PartDraft) -> Result<(), RestructureError>;
    fn name(&self) -> &str;
}

pub struct RestructureEngine {
    config: EngineConfig,
    rules: Vec<Box<dyn PartRule>>,
    prompts: PromptSynthesizer,
    metadata: MetadataSynthesizer,
    repair: HierarchyRepair,
    pub rule_timings: RefCell<Vec<(String, Duration)>>,
}

impl RestructureEngine {
    pub fn new(config: EngineConfig) -> Result<Self, RestructureError> {
        let mut rules: Vec<Box<dyn PartRule>> = Vec::new();
        for rule_config in &config.pipeline.rules {
            if !rule_config.enabled {
                debug!("skipping disabled rule: {}", rule_config.name);
                continue;
            }
            match build_rule(&rule_config.name, &config)? {
                Some(rule) => rules.push(rule),
                None => warn!("unknown rule: {}. Skipping...", rule_config.name),
            }
        }

        Ok(Self {
            prompts: PromptSynthesizer::new(&config.prompt)?,
            metadata: MetadataSynthesizer::new(&config.metadata)?,
            repair: HierarchyRepair::new(&config.repair)?,
            rules,
            config,
            rule_timings: RefCell::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Names of the rules that will run for every part, in order.
    pub fn active_rules(&self) -> Vec<&str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    /// Re-parent sub-challenges under their achievements in place.
    pub fn repair<T: MarkupTreeMut + ?Sized>(&self, tree: &mut T) -> RepairReport {
        let start = Instant::now();
        let report = self.repair.repair(tree);
        self.record("HierarchyRepair", start.elapsed());
        report
    }

    pub fn restructure(&self, tree: &dyn MarkupTree) -> Result<Document, RestructureError> {
        let start = Instant::now();
        let segmentation = SectionSegmenter::new(&self.config.segmentation).segment(tree)?;
        self.record("Segmentation", start.elapsed());

        let total = segmentation.parts.len();
        info!(
            "⚙️  Restructuring {:?}: {} part(s), rules: {:?}",
            segmentation.title,
            total,
            self.active_rules()
        );

        let mut parts = Vec::with_capacity(total);
        for (index, span) in segmentation.parts.iter().enumerate() {
            let scratch = DocTree::from_fragment(&span.content);
            let ctx = PartContext {
                tree: &scratch,
                roots: scratch.children(scratch.root()),
                index,
                total,
                document_title: &segmentation.title,
                part_title: &span.title,
            };

            let mut draft = PartDraft::default();
            for rule in &self.rules {
                let rule_start = Instant::now();
                rule.apply(&ctx, &mut draft)?;
                self.record(rule.name(), rule_start.elapsed());
            }
            parts.push(self.assemble(&ctx, &span.content, draft));
        }

        let mut progress: Vec<u8> = parts.iter().map(|p| p.metadata.progress_percent).collect();
        enforce_progress(&mut progress);
        for (part, value) in parts.iter_mut().zip(progress) {
            part.metadata.progress_percent = value;
        }

        Ok(Document {
            title: segmentation.title,
            intro: segmentation.intro,
            parts,
            conclusion: Some(segmentation.conclusion),
        })
    }

    /// Like `restructure`, but a hard failure yields the minimal document.
    pub fn restructure_or_degraded(&self, tree: &dyn MarkupTree) -> Document {
        self.restructure(tree).unwrap_or_else(|e| {
            warn!("restructuring failed ({e}); returning a degraded document");
            Document::degraded(&self.config.segmentation.default_title)
        })
    }

    /// Total time per rule name, in first-run order.
    pub fn timing_totals(&self) -> Vec<(String, Duration)> {
        let mut totals: Vec<(String, Duration)> = Vec::new();
        for (name, duration) in self.rule_timings.borrow().iter() {
            match totals.iter_mut().find(|(n, _)| n == name) {
                Some((_, total)) => *total += *duration,
                None => totals.push((name.clone(), *duration)),
            }
        }
        totals
    }

    pub fn clear_timings(&self) {
        self.rule_timings.borrow_mut().clear();
    }

    fn record(&self, name: &str, duration: Duration) {
        self.rule_timings.borrow_mut().push((name.to_string(), duration));
    }

    /// Fill whatever the enabled rules left open, so every part carries a
    /// prompt and positional metadata.
    fn assemble(&self, ctx: &PartContext, span: &MarkupFragment, draft: PartDraft) -> Part {
        let fields = draft.fields.unwrap_or_default();
        let instruction_prompt = fields
            .instruction_prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| {
                self.prompts
                    .synthesize(ctx.part_title, &fields.concepts, fields.objective.as_deref())
            });
        let substructures = draft.substructures.unwrap_or_default();

        Part {
            title: ctx.part_title.to_string(),
            body: draft.body.unwrap_or_else(|| tidy_fragment(span)),
            objective: fields.objective,
            concepts: fields.concepts,
            reflection: fields.reflection,
            instruction_prompt,
            nucleus_steps: substructures.nucleus_steps,
            routes: substructures.routes,
            pitfalls: substructures.pitfalls,
            metadata: draft
                .metadata
                .unwrap_or_else(|| self.metadata.positional(ctx.index, ctx.total)),
        }
    }
}

fn build_rule(name: &str, config: &EngineConfig) -> Result<Option<Box<dyn PartRule>>, RestructureError> {
    let rule: Box<dyn PartRule> = match name {
        "FieldExtraction" => Box::new(FieldExtractor::new(config)?),
        "SubstructureExtraction" => Box::new(SubstructureExtractor::new(&config.substructures)?),
        "MetadataSynthesis" => Box::new(MetadataSynthesizer::new(&config.metadata)?),
        "ContentSanitizer" => Box::new(ContentSanitizer::new(config)),
        _ => return Ok(None),
    };
    Ok(Some(rule))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfig;
    use crate::tree::NodeKind;

    fn sample() -> DocTree {
        let mut tree = DocTree::new();
        let root = tree.root();
        let blocks = [
            (NodeKind::Heading(1), "Guia"),
            (NodeKind::Heading(2), "Parte 1: Base"),
            (NodeKind::Paragraph, "Objetivo: aprender"),
            (NodeKind::Heading(2), "Parte 2: Prática"),
            (NodeKind::Paragraph, "Progresso: 10%"),
        ];
        for (kind, text) in blocks {
            let id = tree.element(root, kind);
            tree.text(id, text);
        }
        tree
    }

    #[test]
    fn test_disabled_rules_still_produce_complete_parts() {
        let mut config = EngineConfig::default();
        config.pipeline.rules = vec![RuleConfig {
            name: "FieldExtraction".to_string(),
            enabled: false,
        }];
        let engine = RestructureEngine::new(config).unwrap();
        assert!(engine.active_rules().is_empty());

        let doc = engine.restructure(&sample()).unwrap();
        assert_eq!(doc.parts.len(), 2);
        assert!(doc.parts.iter().all(|p| !p.instruction_prompt.is_empty()));
        assert_eq!(doc.parts[0].metadata.difficulty, "1/5");
        assert_eq!(doc.parts[1].metadata.progress_percent, 100);
    }

    #[test]
    fn test_unknown_rule_is_skipped() {
        let mut config = EngineConfig::default();
        config.pipeline.rules.push(RuleConfig {
            name: "NoSuchRule".to_string(),
            enabled: true,
        });
        let engine = RestructureEngine::new(config).unwrap();
        assert_eq!(engine.active_rules().len(), 4);
    }

    #[test]
    fn test_explicit_progress_is_clamped() {
        let engine = RestructureEngine::new(EngineConfig::default()).unwrap();
        let doc = engine.restructure(&sample()).unwrap();
        assert_eq!(doc.parts[0].objective.as_deref(), Some("aprender"));
        assert_eq!(doc.parts[0].metadata.progress_percent, 53);
        assert_eq!(doc.parts[1].metadata.progress_percent, 100);

        let totals = engine.timing_totals();
        assert_eq!(totals[0].0, "Segmentation");
        assert!(totals.iter().any(|(name, _)| name == "ContentSanitizer"));

        engine.clear_timings();
        assert!(engine.timing_totals().is_empty());
    }

    #[test]
    fn test_degraded_document_on_empty_input() {
        let engine = RestructureEngine::new(EngineConfig::default()).unwrap();
        let doc = engine.restructure_or_degraded(&DocTree::new());
        assert_eq!(doc.title, "ChunkMaster");
        assert!(doc.parts.is_empty());
        assert!(doc.conclusion.is_none());
    }
}
