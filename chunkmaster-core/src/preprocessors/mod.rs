//! Document Preprocessors
//!
//! This module provides the ingestion layer for converting raw study-guide
//! text into a `DocTree` that feeds the restructuring engine.
//!
//! ## Architecture
//!
//! ```text
//! Document (Markdown, HTML)
//!     ↓
//! [Format-specific Preprocessor]
//!     ↓
//! DocTree (unified markup tree)
//!     ↓
//! [RestructureEngine]
//!     ↓
//! Document model
//! ```
//!
//! ## Available Preprocessors
//!
//! - `MarkdownPreprocessor` - Markdown via pulldown-cmark
//! - `HtmlPreprocessor` - HTML / XHTML via quick-xml

pub mod html;
pub mod markdown;
pub mod preprocessor;

// Re-export main types
pub use html::HtmlPreprocessor;
pub use markdown::MarkdownPreprocessor;
pub use preprocessor::Preprocessor;

use crate::types::InputFormat;

/// The preprocessor for a classified input format.
pub fn preprocessor_for(format: InputFormat) -> Box<dyn Preprocessor> {
    match format {
        InputFormat::Markdown => Box::new(MarkdownPreprocessor::new()),
        InputFormat::Html => Box::new(HtmlPreprocessor::new()),
    }
}
