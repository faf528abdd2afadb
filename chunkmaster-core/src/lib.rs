// ChunkMaster Core Library
//
// Restructures loosely-labelled study guides (Markdown or HTML) into a typed
// document model, and repairs achievement / mini-challenge nesting.
// Main interface for converting raw guides to documents.

pub mod classifier;
pub mod config;
pub mod error;
pub mod output;
pub mod preprocessors;
pub mod processor;
pub mod rules;
pub mod tree;
pub mod types;

// Re-export main types and functions for easy use
pub use classifier::InputClassifier;
pub use config::EngineConfig;
pub use error::RestructureError;
pub use preprocessors::{HtmlPreprocessor, MarkdownPreprocessor, Preprocessor};
pub use processor::{DocumentProcessor, PipelineStages, StepProfiler};
pub use rules::validation::{print_validation_report, ModelValidator, ValidationIssue, ValidationReport};
pub use rules::RestructureEngine;
pub use tree::{DocTree, MarkupFragment, MarkupTree, MarkupTreeMut, NodeId, NodeKind};
pub use types::*;

/// Restructure a parsed tree with the built-in configuration.
pub fn restructure(tree: &dyn MarkupTree) -> Result<Document, RestructureError> {
    RestructureEngine::new(EngineConfig::default())?.restructure(tree)
}
