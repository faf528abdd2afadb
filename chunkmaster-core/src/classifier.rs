use crate::types::*;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info};

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(?:html|body|div|p|ul|ol|li|h[1-6]|strong|em|span|br)\b[^>]*>").unwrap()
});

static MARKDOWN_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s{0,3}(?:#{1,6}\s|[-*+]\s|\d+\.\s|>\s)|\*\*[^*]+\*\*").unwrap());

/// Decides whether raw input is Markdown or HTML.
pub struct InputClassifier;

impl Default for InputClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl InputClassifier {
    pub fn new() -> Self {
        Self
    }

    /// File extension wins when it is conclusive; otherwise the content is sniffed.
    pub fn classify(&self, raw: &str, path: Option<&Path>) -> ClassificationResult {
        let result = path
            .and_then(Self::from_extension)
            .unwrap_or_else(|| self.sniff(raw));

        info!(
            "📋 Classified input as: {} (confidence: {:.2})",
            result.input_format, result.confidence
        );
        result
    }

    fn from_extension(path: &Path) -> Option<ClassificationResult> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        let input_format = match ext.as_str() {
            "html" | "htm" | "xhtml" => InputFormat::Html,
            "md" | "markdown" | "mdown" => InputFormat::Markdown,
            _ => return None,
        };
        Some(ClassificationResult {
            input_format,
            confidence: 1.0,
        })
    }

    fn sniff(&self, raw: &str) -> ClassificationResult {
        let trimmed = raw.trim_start();
        let lowered: String = trimmed.chars().take(15).collect::<String>().to_ascii_lowercase();
        if lowered.starts_with("<!doctype html") || lowered.starts_with("<html") {
            return ClassificationResult {
                input_format: InputFormat::Html,
                confidence: 0.95,
            };
        }

        let tags = HTML_TAG.find_iter(raw).count();
        let markers = MARKDOWN_MARKER.find_iter(raw).count();
        debug!("classifier: {tags} html tag(s), {markers} markdown marker(s)");

        if tags == 0 && markers == 0 {
            // Plain text reads fine as Markdown
            return ClassificationResult {
                input_format: InputFormat::Markdown,
                confidence: 0.5,
            };
        }

        let total = (tags + markers) as f32;
        if tags > markers || (trimmed.starts_with('<') && tags >= markers) {
            ClassificationResult {
                input_format: InputFormat::Html,
                confidence: (tags as f32 / total).max(0.6),
            }
        } else {
            ClassificationResult {
                input_format: InputFormat::Markdown,
                confidence: (markers as f32 / total).max(0.6),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_wins() {
        let classifier = InputClassifier::new();
        let result = classifier.classify("# Título", Some(Path::new("guia.html")));
        assert_eq!(result.input_format, InputFormat::Html);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_sniffs_html() {
        let classifier = InputClassifier::new();
        let result = classifier.classify(
            "<h1>Guia</h1>\n<ul><li><strong>Conquista:</strong> A</li></ul>",
            Some(Path::new("guia.txt")),
        );
        assert_eq!(result.input_format, InputFormat::Html);
        assert!(result.confidence >= 0.6);
    }

    #[test]
    fn test_sniffs_markdown() {
        let classifier = InputClassifier::new();
        let result = classifier.classify("# Guia\n\n## Parte 1\n\n- **Objetivo:** x\n", None);
        assert_eq!(result.input_format, InputFormat::Markdown);
    }

    #[test]
    fn test_doctype_is_html() {
        let classifier = InputClassifier::new();
        let result = classifier.classify("  <!DOCTYPE html><html><body>x</body></html>", None);
        assert_eq!(result.input_format, InputFormat::Html);
        assert_eq!(result.confidence, 0.95);
    }
}
