use crate::tree::MarkupFragment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The schema version stamped on every document output.
/// Bump this when the output shape changes.
pub const SCHEMA_VERSION: &str = "0.1.0";

// ===== DOCUMENT MODEL =====
// Every entity below is a derived projection of the raw input. They are
// rebuilt on each run and compare by value, which is what the idempotence
// checks rely on.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub title: String,
    pub intro: Option<MarkupFragment>,
    pub parts: Vec<Part>,
    pub conclusion: Option<MarkupFragment>,
}

impl Document {
    /// Minimal document returned when the input has nothing to segment.
    pub fn degraded(title: &str) -> Self {
        Self {
            title: title.to_string(),
            intro: None,
            parts: Vec::new(),
            conclusion: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub title: String,
    pub body: MarkupFragment,
    pub objective: Option<String>,
    /// Deduplicated by normalized text, first-seen order, at most five.
    pub concepts: Vec<String>,
    pub reflection: Option<String>,
    /// Always populated; synthesized when the part has no explicit prompt.
    pub instruction_prompt: String,
    pub nucleus_steps: Vec<NucleusStep>,
    pub routes: Vec<Route>,
    pub pitfalls: Vec<Pitfall>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NucleusStep {
    pub title: String,
    /// Cyclic index into the renderer's palette.
    pub color_index: usize,
    pub subtopics: Vec<Subtopic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtopic {
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Gentle,
    Intense,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub label: String,
    pub description: MarkupFragment,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pitfall {
    pub problem: MarkupFragment,
    pub solution: Option<MarkupFragment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Rendered as "k/5".
    pub difficulty: String,
    pub cognitive_level: String,
    pub learning_style: String,
    pub progress_percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connections: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub real_case: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checklist: Option<Vec<String>>,
}

// ===== INPUT CLASSIFICATION =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    Markdown,
    Html,
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputFormat::Markdown => write!(f, "markdown"),
            InputFormat::Html => write!(f, "html"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassificationResult {
    pub input_format: InputFormat,
    pub confidence: f32,
}

// ===== HIERARCHY REPAIR =====

/// Outcome counts of one hierarchy repair pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    pub achievements: usize,
    /// Sub-challenges moved under an achievement during this pass.
    pub attached: usize,
    /// Sub-challenges that were already nested and left untouched.
    pub already_nested: usize,
    /// Sub-challenges with no owning achievement, left in place and flagged.
    pub unattached: usize,
    pub duplicate_markers_collapsed: usize,
}

// ===== OUTPUT ENVELOPE =====

/// The serialization-ready output. Carries a schema version and a
/// fingerprint of the raw input so consumers can detect stale results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentOutput {
    pub schema_version: String,
    pub source_hash: String,
    pub created_at: DateTime<Utc>,
    pub input_format: InputFormat,
    pub document: Document,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair_report: Option<RepairReport>,
}

/// Flat, ordered view of a document: title, parts and their steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineDocument {
    pub title: String,
    pub entries: Vec<OutlineEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineEntry {
    pub depth: u32,
    pub kind: OutlineKind,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlineKind {
    Intro,
    Part,
    Step,
    Subtopic,
    Conclusion,
}
