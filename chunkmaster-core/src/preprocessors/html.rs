use super::preprocessor::{has_extension, Preprocessor};
use crate::error::RestructureError;
use crate::tree::{DocTree, MarkupTree, MarkupTreeMut, NodeId, NodeKind};
use anyhow::Result;
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::Reader;
use std::path::Path;
use tracing::debug;

const VOID_TAGS: &[&str] = &[
    "br", "hr", "img", "input", "meta", "link", "wbr", "col", "area", "base", "source",
];

const SKIPPED_TAGS: &[&str] = &["script", "style", "head", "template"];

/// Start tags that close an open `<p>`.
const CLOSES_PARAGRAPH: &[&str] = &[
    "p", "div", "ul", "ol", "li", "h1", "h2", "h3", "h4", "h5", "h6", "table", "blockquote",
    "pre", "section", "article", "header", "footer", "aside", "nav", "main", "hr", "dl",
    "figure", "details",
];

/// Elements a `<p>` is never closed across.
const PARAGRAPH_SCOPE: &[&str] = &["table", "td", "th", "caption", "button"];

/// Tolerant HTML reader. Generated study guides are close to XHTML but
/// not always well formed, so mismatched end tags are repaired by popping
/// to the nearest open element of the same name, or ignored. Omitted
/// `</li>` and `</p>` are implied the way browsers imply them.
pub struct HtmlPreprocessor;

impl HtmlPreprocessor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HtmlPreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Preprocessor for HtmlPreprocessor {
    fn parse(&self, input: &str) -> Result<DocTree> {
        let mut reader = Reader::from_str(input);
        reader.trim_text(false);
        reader.check_end_names(false);

        let mut tree = DocTree::new();
        let mut open: Vec<(NodeId, String)> = vec![(tree.root(), String::new())];
        let mut skipping: Option<(String, usize)> = None;

        loop {
            let event = reader.read_event().map_err(|e| RestructureError::Markup {
                position: reader.buffer_position(),
                message: e.to_string(),
            })?;

            if let Some((tag, depth)) = skipping.as_mut() {
                match &event {
                    Event::Start(e) if tag_name(e) == *tag => *depth += 1,
                    Event::End(e) if lowercase(e.name().as_ref()) == *tag => {
                        *depth -= 1;
                        if *depth == 0 {
                            skipping = None;
                        }
                    }
                    Event::Eof => break,
                    _ => {}
                }
                continue;
            }

            let parent = open.last().map_or(tree.root(), |(id, _)| *id);
            match event {
                Event::Start(e) => {
                    let name = tag_name(&e);
                    if SKIPPED_TAGS.contains(&name.as_str()) {
                        skipping = Some((name, 1));
                        continue;
                    }
                    let parent = close_implied(&mut open, &name).unwrap_or(parent);
                    let id = add_element(&mut tree, parent, &e, &name);
                    if !VOID_TAGS.contains(&name.as_str()) {
                        open.push((id, name));
                    }
                }
                Event::Empty(e) => {
                    let name = tag_name(&e);
                    if !SKIPPED_TAGS.contains(&name.as_str()) {
                        let parent = close_implied(&mut open, &name).unwrap_or(parent);
                        add_element(&mut tree, parent, &e, &name);
                    }
                }
                Event::End(e) => {
                    let name = lowercase(e.name().as_ref());
                    if let Some(pos) = open.iter().skip(1).rposition(|(_, open_name)| *open_name == name) {
                        open.truncate(pos + 1);
                    }
                }
                Event::Text(e) => {
                    let text = decode_text(&e);
                    push_text(&mut tree, parent, &text);
                }
                Event::CData(e) => {
                    let text = String::from_utf8_lossy(&e).into_owned();
                    push_text(&mut tree, parent, &text);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        debug!("html: parsed {} reachable node(s)", tree.reachable_count());
        Ok(tree)
    }

    fn name(&self) -> &str {
        "html"
    }

    fn supports_file_type(&self, path: &Path) -> bool {
        has_extension(path, &["html", "htm", "xhtml"])
    }
}

/// Pop elements whose end tag is implied by the start tag `name`. Returns
/// the new parent when anything was closed.
fn close_implied(open: &mut Vec<(NodeId, String)>, name: &str) -> Option<NodeId> {
    let before = open.len();
    if name == "li" {
        let list = open.iter().rposition(|(_, n)| n == "ul" || n == "ol");
        let item = open.iter().rposition(|(_, n)| n == "li");
        if let Some(item) = item {
            if list.map_or(true, |list| item > list) {
                open.truncate(item);
            }
        }
    }
    if CLOSES_PARAGRAPH.contains(&name) {
        if let Some(p) = open.iter().skip(1).rposition(|(_, n)| n == "p").map(|pos| pos + 1) {
            if !open[p..].iter().any(|(_, n)| PARAGRAPH_SCOPE.contains(&n.as_str())) {
                open.truncate(p);
            }
        }
    }
    (open.len() != before).then(|| open.last().map(|(id, _)| *id)).flatten()
}

fn lowercase(name: &[u8]) -> String {
    String::from_utf8_lossy(name).to_ascii_lowercase()
}

fn tag_name(e: &BytesStart) -> String {
    lowercase(e.name().as_ref())
}

fn add_element(tree: &mut DocTree, parent: NodeId, e: &BytesStart, name: &str) -> NodeId {
    let id = tree.element(parent, NodeKind::from_tag(name));
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == b"class" {
            let value = String::from_utf8_lossy(&attr.value).into_owned();
            for class in value.split_whitespace() {
                tree.add_class(id, class);
            }
        }
    }
    id
}

/// Whitespace between block containers, or right after a closed block,
/// is layout, not content.
fn push_text(tree: &mut DocTree, parent: NodeId, text: &str) {
    if text.is_empty() {
        return;
    }
    if text.trim().is_empty() {
        let container = matches!(
            tree.kind(parent),
            NodeKind::Root | NodeKind::List { .. } | NodeKind::Block
        );
        let after_block = tree
            .children(parent)
            .last()
            .is_some_and(|&last| tree.kind(last).is_block());
        if container || after_block {
            return;
        }
    }
    tree.text(parent, text);
}

fn decode_text(e: &BytesText) -> String {
    match e.unescape_with(resolve_entity) {
        Ok(text) => text.into_owned(),
        // Stray ampersands and unknown entities are kept verbatim
        Err(_) => String::from_utf8_lossy(e).into_owned(),
    }
}

fn resolve_entity(name: &str) -> Option<&'static str> {
    let value = match name {
        "lt" => "<",
        "gt" => ">",
        "amp" => "&",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => "\u{a0}",
        "ndash" => "–",
        "mdash" => "—",
        "hellip" => "…",
        "laquo" => "«",
        "raquo" => "»",
        "ldquo" => "“",
        "rdquo" => "”",
        "lsquo" => "‘",
        "rsquo" => "’",
        "middot" => "·",
        "bull" => "•",
        "rarr" => "→",
        "larr" => "←",
        "copy" => "©",
        "deg" => "°",
        "aacute" => "á",
        "Aacute" => "Á",
        "agrave" => "à",
        "acirc" => "â",
        "atilde" => "ã",
        "Atilde" => "Ã",
        "ccedil" => "ç",
        "Ccedil" => "Ç",
        "eacute" => "é",
        "Eacute" => "É",
        "ecirc" => "ê",
        "iacute" => "í",
        "oacute" => "ó",
        "Oacute" => "Ó",
        "ocirc" => "ô",
        "otilde" => "õ",
        "uacute" => "ú",
        "Uacute" => "Ú",
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(html: &str) -> DocTree {
        HtmlPreprocessor::new().parse(html).unwrap()
    }

    #[test]
    fn test_keeps_classes_and_structure() {
        let tree = parse(r#"<ul class="x"><li class="conquest-item a"><strong>Conquista:</strong> feito</li></ul>"#);
        let root = tree.root();
        let ul = tree.children(root)[0];
        assert!(tree.kind(ul).is_list());
        assert!(tree.has_class(ul, "x"));
        let li = tree.children(ul)[0];
        assert!(tree.has_class(li, "conquest-item"));
        assert!(tree.has_class(li, "a"));
        assert_eq!(tree.normalized_text(li), "Conquista: feito");
    }

    #[test]
    fn test_tolerates_void_and_mismatched_tags() {
        let tree = parse("<body><p>um<br>dois</b></p><p>três</p></body>");
        let body = tree.children(tree.root())[0];
        let paragraphs = tree.children(body);
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(tree.kind(tree.children(paragraphs[0])[1]), &NodeKind::LineBreak);
        assert_eq!(tree.text_content(paragraphs[1]), "três");
    }

    #[test]
    fn test_implied_list_item_end() {
        let tree = parse("<ul><li><strong>Conquista:</strong> A1<li><em>Mini-desafio:</em> S1<li><strong>Conquista:</strong> A2</ul><p>depois");
        let ul = tree.children(tree.root())[0];
        let items = tree.children(ul);
        assert_eq!(items.len(), 3);
        assert_eq!(tree.normalized_text(items[0]), "Conquista: A1");
        assert_eq!(tree.normalized_text(items[1]), "Mini-desafio: S1");
        assert_eq!(tree.children(tree.root()).len(), 2);
    }

    #[test]
    fn test_implied_paragraph_end() {
        let tree = parse("<div><p>um<p>dois<ul><li>três</ul></div>");
        let div = tree.children(tree.root())[0];
        let children = tree.children(div);
        assert_eq!(children.len(), 3);
        assert_eq!(tree.text_content(children[0]), "um");
        assert_eq!(tree.text_content(children[1]), "dois");
        assert!(tree.kind(children[2]).is_list());
    }

    #[test]
    fn test_nested_list_item_stays_nested() {
        let tree = parse("<ul><li>A<ul><li>B</li><li>C</li></ul></li><li>D</li></ul>");
        let ul = tree.children(tree.root())[0];
        assert_eq!(tree.children(ul).len(), 2);
        let nested = tree.children(tree.children(ul)[0])[1];
        assert_eq!(tree.children(nested).len(), 2);
    }

    #[test]
    fn test_entities_and_skipped_content() {
        let tree = parse("<head><title>x</title></head><script>var a = 1;</script><p>a &amp; b &mdash; c&nbsp;d</p>");
        let root = tree.root();
        assert_eq!(tree.children(root).len(), 1);
        assert_eq!(tree.text_content(tree.children(root)[0]), "a & b — c\u{a0}d");
    }

    #[test]
    fn test_drops_layout_whitespace() {
        let tree = parse("<div>\n  <p>a</p>\n  <p>b</p>\n</div>");
        let div = tree.children(tree.root())[0];
        assert_eq!(tree.children(div).len(), 2);
    }

    #[test]
    fn test_parse_file() {
        let path = std::env::temp_dir().join("chunkmaster_html_preprocessor_test.html");
        std::fs::write(&path, "<h1>Guia</h1><p>texto</p>").unwrap();
        let preprocessor = HtmlPreprocessor::new();
        assert!(preprocessor.supports_file_type(&path));
        let tree = preprocessor.parse_file(&path).unwrap();
        assert_eq!(tree.children(tree.root()).len(), 2);
        std::fs::remove_file(&path).ok();
    }
}
