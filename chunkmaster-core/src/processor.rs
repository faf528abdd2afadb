use crate::classifier::InputClassifier;
use crate::config::EngineConfig;
use crate::preprocessors::preprocessor_for;
use crate::rules::segmenter::SectionSegmenter;
use crate::rules::RestructureEngine;
use crate::tree::DocTree;
use crate::types::*;
use anyhow::Result;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Captured intermediate outputs from each pipeline stage
/// Used for testing and diagnostics: lets you inspect/compare each boundary
#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineStages {
    pub input_format: InputFormat,
    pub confidence: f32,
    /// The parsed tree rendered back to HTML, before any repair
    pub parsed_html: String,
    /// `None` when the repair pre-pass is disabled
    pub repaired_html: Option<String>,
    pub repair_report: Option<RepairReport>,
    pub document_title: String,
    pub part_titles: Vec<String>,
    pub conclusion_synthesized: bool,
    pub document: Document,
}

/// Wall-clock timings of the restructuring stages, in run order
pub struct StepProfiler {
    enabled: bool,
    timings: Vec<(String, Duration)>,
}

impl StepProfiler {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            timings: Vec::new(),
        }
    }

    pub fn time_step<F, R>(&mut self, stage: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        if !self.enabled {
            return f();
        }

        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();

        println!("⏱️  [{}] {}: {:.3}ms", self.timings.len() + 1, stage, elapsed.as_secs_f64() * 1000.0);
        self.timings.push((stage.to_string(), elapsed));

        result
    }

    pub fn timings(&self) -> &[(String, Duration)] {
        &self.timings
    }

    pub fn total(&self) -> Duration {
        self.timings.iter().map(|(_, d)| *d).sum()
    }

    /// Name of the stage that took longest.
    pub fn slowest(&self) -> Option<&str> {
        self.timings
            .iter()
            .max_by_key(|(_, d)| *d)
            .map(|(stage, _)| stage.as_str())
    }

    pub fn print_summary(&self) {
        if !self.enabled || self.timings.is_empty() {
            return;
        }

        let total = self.total();
        let slowest = self.slowest();
        println!("\n📊 Restructuring stages ({} run):", self.timings.len());
        for (stage, duration) in &self.timings {
            let share = if total.is_zero() {
                0.0
            } else {
                duration.as_secs_f64() / total.as_secs_f64() * 100.0
            };
            let marker = if slowest == Some(stage.as_str()) { " ◀ slowest" } else { "" };
            println!(
                "   {:.<35} {:>9.3}ms {:>5.1}%{}",
                stage,
                duration.as_secs_f64() * 1000.0,
                share,
                marker
            );
        }
        println!("   {:.<35} {:>9.3}ms", "all stages", total.as_secs_f64() * 1000.0);
    }
}

/// SHA-256 of the raw input, hex encoded.
pub fn source_hash(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Classify → parse → optional repair pre-pass → restructure → envelope.
pub struct DocumentProcessor {
    classifier: InputClassifier,
    engine: RestructureEngine,
    repair_pre_pass: bool,
}

impl DocumentProcessor {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let repair_pre_pass = config.repair.pre_pass;
        Ok(Self {
            classifier: InputClassifier::new(),
            engine: RestructureEngine::new(config)?,
            repair_pre_pass,
        })
    }

    /// Processor with the built-in configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(EngineConfig::default())
    }

    /// Override `repair.pre_pass` from the configuration.
    pub fn set_repair_pre_pass(&mut self, enabled: bool) {
        self.repair_pre_pass = enabled;
    }

    pub fn engine(&self) -> &RestructureEngine {
        &self.engine
    }

    /// Process raw text. `format` skips classification when given.
    pub fn process_str(&self, raw: &str, format: Option<InputFormat>) -> Result<DocumentOutput> {
        self.process_with_profiler(raw, format, None, &mut StepProfiler::new(false))
    }

    pub fn process_file(&self, path: &Path, format: Option<InputFormat>) -> Result<DocumentOutput> {
        let raw = std::fs::read_to_string(path)?;
        info!("📄 Processing document: {}", path.display());
        self.process_with_profiler(&raw, format, Some(path), &mut StepProfiler::new(false))
    }

    /// Full pipeline with every stage timed by `profiler`.
    pub fn process_with_profiler(
        &self,
        raw: &str,
        format: Option<InputFormat>,
        path: Option<&Path>,
        profiler: &mut StepProfiler,
    ) -> Result<DocumentOutput> {
        let start_time = Instant::now();

        let input_format = profiler.time_step("classification", || self.input_format(raw, format, path));
        let preprocessor = preprocessor_for(input_format);
        debug!("parsing with the {} preprocessor", preprocessor.name());
        let mut tree = profiler.time_step("markup parse", || preprocessor.parse(raw))?;

        let repair_report = if self.repair_pre_pass {
            Some(profiler.time_step("hierarchy repair", || self.engine.repair(&mut tree)))
        } else {
            debug!("repair pre-pass disabled");
            None
        };

        let document = profiler.time_step("restructuring", || {
            self.engine.restructure_or_degraded(&tree)
        });

        info!(
            "✅ {:?}: {} part(s) in {:.0}ms",
            document.title,
            document.parts.len(),
            start_time.elapsed().as_millis()
        );

        Ok(DocumentOutput {
            schema_version: SCHEMA_VERSION.to_string(),
            source_hash: source_hash(raw),
            created_at: Utc::now(),
            input_format,
            document,
            repair_report,
        })
    }

    /// Run only the hierarchy repair and return the repaired markup as HTML.
    pub fn repair_str(&self, raw: &str, format: Option<InputFormat>) -> Result<(String, RepairReport)> {
        let input_format = self.input_format(raw, format, None);
        let mut tree = preprocessor_for(input_format).parse(raw)?;
        let report = self.engine.repair(&mut tree);
        Ok((tree.to_html(), report))
    }

    /// Process raw text and capture all intermediate stage outputs
    pub fn process_capture_stages(
        &self,
        raw: &str,
        format: Option<InputFormat>,
    ) -> Result<PipelineStages> {
        let classification = match format {
            Some(input_format) => ClassificationResult {
                input_format,
                confidence: 1.0,
            },
            None => self.classifier.classify(raw, None),
        };

        let mut tree: DocTree = preprocessor_for(classification.input_format).parse(raw)?;
        let parsed_html = tree.to_html();
        println!("📋 Stage 1: parsed tree captured ({} nodes)", tree.reachable_count());

        let (repaired_html, repair_report) = if self.repair_pre_pass {
            let report = self.engine.repair(&mut tree);
            println!(
                "📋 Stage 2: repair attached {} sub-challenge(s), {} unattached",
                report.attached, report.unattached
            );
            (Some(tree.to_html()), Some(report))
        } else {
            (None, None)
        };

        let (document_title, part_titles, conclusion_synthesized) =
            match SectionSegmenter::new(&self.engine.config().segmentation).segment(&tree) {
                Ok(segmentation) => (
                    segmentation.title,
                    segmentation.parts.into_iter().map(|p| p.title).collect(),
                    segmentation.conclusion_synthesized,
                ),
                Err(_) => (
                    self.engine.config().segmentation.default_title.clone(),
                    Vec::new(),
                    false,
                ),
            };
        println!("📋 Stage 3: {} part span(s) captured", part_titles.len());

        let document = self.engine.restructure_or_degraded(&tree);
        println!("📋 Stage 4: document captured ({} parts)", document.parts.len());

        Ok(PipelineStages {
            input_format: classification.input_format,
            confidence: classification.confidence,
            parsed_html,
            repaired_html,
            repair_report,
            document_title,
            part_titles,
            conclusion_synthesized,
            document,
        })
    }

    fn input_format(&self, raw: &str, format: Option<InputFormat>, path: Option<&Path>) -> InputFormat {
        match format {
            Some(input_format) => input_format,
            None => self.classifier.classify(raw, path).input_format,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUIDE: &str = "# Guia de Rust\n\n## Parte 1: Base\n\n**Objetivo:** entender ownership\n\n## Parte 2: Prática\n\nTexto.\n";

    #[test]
    fn test_envelope_fields() {
        let processor = DocumentProcessor::with_defaults().unwrap();
        let output = processor.process_str(GUIDE, None).unwrap();
        assert_eq!(output.schema_version, SCHEMA_VERSION);
        assert_eq!(output.input_format, InputFormat::Markdown);
        assert_eq!(output.source_hash, source_hash(GUIDE));
        assert_eq!(output.source_hash.len(), 64);
        assert_eq!(output.document.title, "Guia de Rust");
        assert_eq!(output.document.parts.len(), 2);
        assert!(output.repair_report.is_some());
    }

    #[test]
    fn test_repair_pre_pass_can_be_disabled() {
        let mut processor = DocumentProcessor::with_defaults().unwrap();
        processor.set_repair_pre_pass(false);
        let output = processor.process_str(GUIDE, Some(InputFormat::Markdown)).unwrap();
        assert!(output.repair_report.is_none());
    }

    #[test]
    fn test_empty_input_degrades() {
        let processor = DocumentProcessor::with_defaults().unwrap();
        let output = processor.process_str("   ", Some(InputFormat::Markdown)).unwrap();
        assert!(output.document.parts.is_empty());
        assert_eq!(output.document.title, "ChunkMaster");
    }

    #[test]
    fn test_capture_stages() {
        let processor = DocumentProcessor::with_defaults().unwrap();
        let stages = processor.process_capture_stages(GUIDE, None).unwrap();
        assert_eq!(stages.part_titles, vec!["Parte 1: Base", "Parte 2: Prática"]);
        assert!(stages.conclusion_synthesized);
        assert!(stages.parsed_html.contains("<h1>Guia de Rust</h1>"));
        assert!(stages.repaired_html.is_some());
    }

    #[test]
    fn test_profiler_records_steps() {
        let processor = DocumentProcessor::with_defaults().unwrap();
        let mut profiler = StepProfiler::new(true);
        processor
            .process_with_profiler(GUIDE, None, None, &mut profiler)
            .unwrap();
        let stages: Vec<&str> = profiler.timings().iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(
            stages,
            vec!["classification", "markup parse", "hierarchy repair", "restructuring"]
        );
        assert!(profiler.slowest().is_some());
        assert_eq!(profiler.total(), profiler.timings().iter().map(|(_, d)| *d).sum::<Duration>());
    }

    #[test]
    fn test_disabled_profiler_records_nothing() {
        let processor = DocumentProcessor::with_defaults().unwrap();
        let mut profiler = StepProfiler::new(false);
        processor
            .process_with_profiler(GUIDE, None, None, &mut profiler)
            .unwrap();
        assert!(profiler.timings().is_empty());
        assert!(profiler.slowest().is_none());
    }

    #[test]
    fn test_process_file_uses_extension() {
        let path = std::env::temp_dir().join("chunkmaster_processor_test.html");
        std::fs::write(&path, "<h1>Guia</h1><h2>Parte 1: A</h2><p>um</p>").unwrap();
        let processor = DocumentProcessor::with_defaults().unwrap();
        let output = processor.process_file(&path, None).unwrap();
        assert_eq!(output.input_format, InputFormat::Html);
        assert_eq!(output.document.parts[0].title, "Parte 1: A");
        std::fs::remove_file(&path).ok();
    }
}
