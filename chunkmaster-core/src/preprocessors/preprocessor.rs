// Preprocessor abstraction for document ingestion
//
// This module defines the boundary between raw input (Markdown or HTML text)
// and the restructuring engine (DocTree). Everything after this point works
// with the markup tree and is format-agnostic.

use crate::tree::DocTree;
use anyhow::Result;
use std::path::Path;

/// Preprocessor trait - converts raw markup text into a `DocTree`
pub trait Preprocessor {
    /// Parse markup text into a tree.
    fn parse(&self, input: &str) -> Result<DocTree>;

    /// Convenience method: read the file and parse it.
    fn parse_file(&self, path: &Path) -> Result<DocTree> {
        let raw = std::fs::read_to_string(path)?;
        self.parse(&raw)
    }

    /// Get preprocessor name for debugging/logging
    fn name(&self) -> &str;

    /// Check if preprocessor supports the given file type
    fn supports_file_type(&self, path: &Path) -> bool;
}

pub(crate) fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}
