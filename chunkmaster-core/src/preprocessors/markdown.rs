use super::preprocessor::{has_extension, Preprocessor};
use crate::tree::{DocTree, MarkupTree, MarkupTreeMut, NodeId, NodeKind};
use anyhow::Result;
use pulldown_cmark::{Event, Options, Parser, Tag};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

static OPEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<\s*([a-zA-Z][a-zA-Z0-9-]*)([^>]*?)/?>$").unwrap());
static CLOSE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^</\s*([a-zA-Z][a-zA-Z0-9-]*)\s*>$").unwrap());
static CLASS_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bclass\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).unwrap());

const INLINE_TAGS: &[&str] = &["span", "em", "i", "strong", "b", "mark", "small"];

/// Markdown reader. Every start tag opens exactly one tree node and every
/// end tag closes it; breaks and rules become leaf nodes.
///
/// Inline HTML is kept only for `<br>` and simple inline elements
/// (`<span class="mini-desafio">`, `<em>`, ...), which become nodes with
/// their classes. HTML blocks are skipped.
pub struct MarkdownPreprocessor {
    options: Options,
}

impl MarkdownPreprocessor {
    pub fn new() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        Self { options }
    }
}

impl Default for MarkdownPreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Preprocessor for MarkdownPreprocessor {
    fn parse(&self, input: &str) -> Result<DocTree> {
        let mut tree = DocTree::new();
        // Open nodes; the tag name is set for nodes opened by inline HTML.
        let mut open: Vec<(NodeId, Option<String>)> = vec![(tree.root(), None)];

        for event in Parser::new_ext(input, self.options) {
            let parent = open.last().map_or(tree.root(), |(id, _)| *id);
            match event {
                Event::Start(tag) => {
                    let id = tree.element(parent, kind_for(&tag));
                    open.push((id, None));
                }
                Event::End(_) => {
                    // Inline HTML left open inside the block closes with it.
                    while open.len() > 1 {
                        if let Some((_, None)) = open.pop() {
                            break;
                        }
                    }
                }
                Event::Text(text) => {
                    tree.text(parent, &text);
                }
                Event::Code(code) => {
                    let id = tree.element(parent, NodeKind::Code);
                    tree.text(id, &code);
                }
                Event::InlineHtml(html) => inline_html(&mut tree, &mut open, parent, &html),
                Event::Html(html) => {
                    if html.trim().to_ascii_lowercase().starts_with("<br") {
                        tree.element(parent, NodeKind::LineBreak);
                    }
                }
                Event::SoftBreak => {
                    tree.element(parent, NodeKind::SoftBreak);
                }
                Event::HardBreak => {
                    tree.element(parent, NodeKind::LineBreak);
                }
                Event::Rule => {
                    tree.element(parent, NodeKind::Rule);
                }
                Event::TaskListMarker(checked) => {
                    tree.text(parent, if checked { "[x] " } else { "[ ] " });
                }
                _ => {}
            }
        }

        debug!("markdown: parsed {} reachable node(s)", tree.reachable_count());
        Ok(tree)
    }

    fn name(&self) -> &str {
        "markdown"
    }

    fn supports_file_type(&self, path: &Path) -> bool {
        has_extension(path, &["md", "markdown", "mdown", "txt"])
    }
}

fn inline_html(tree: &mut DocTree, open: &mut Vec<(NodeId, Option<String>)>, parent: NodeId, html: &str) {
    let html = html.trim();
    if let Some(caps) = CLOSE_TAG.captures(html) {
        let name = caps[1].to_ascii_lowercase();
        // Only nodes opened by inline HTML above the innermost Markdown node
        let pos = open
            .iter()
            .rposition(|(_, tag)| tag.as_deref() == Some(name.as_str()))
            .filter(|&pos| open[pos..].iter().all(|(_, tag)| tag.is_some()));
        if let Some(pos) = pos {
            open.truncate(pos);
        }
        return;
    }
    let Some(caps) = OPEN_TAG.captures(html) else {
        return;
    };
    let name = caps[1].to_ascii_lowercase();
    if name == "br" {
        tree.element(parent, NodeKind::LineBreak);
        return;
    }
    if !INLINE_TAGS.contains(&name.as_str()) {
        return;
    }
    let id = tree.element(parent, NodeKind::from_tag(&name));
    if let Some(class) = CLASS_ATTR.captures(&caps[2]) {
        let value = class.get(1).or(class.get(2)).or(class.get(3)).map_or("", |m| m.as_str());
        for class in value.split_whitespace() {
            tree.add_class(id, class);
        }
    }
    if !html.ends_with("/>") {
        open.push((id, Some(name)));
    }
}

fn kind_for(tag: &Tag) -> NodeKind {
    match tag {
        Tag::Paragraph => NodeKind::Paragraph,
        Tag::Heading { level, .. } => NodeKind::Heading(*level as u8),
        Tag::List(start) => NodeKind::List {
            ordered: start.is_some(),
        },
        Tag::Item => NodeKind::ListItem,
        Tag::Strong => NodeKind::Strong,
        Tag::Emphasis => NodeKind::Emphasis,
        Tag::Strikethrough => NodeKind::from_tag("del"),
        Tag::Link { .. } => NodeKind::Span,
        Tag::BlockQuote(_) | Tag::CodeBlock(_) | Tag::HtmlBlock | Tag::FootnoteDefinition(_) => {
            NodeKind::Block
        }
        Tag::Image { .. } => NodeKind::Other("img".to_string()),
        Tag::Table(_) => NodeKind::Other("table".to_string()),
        Tag::TableHead => NodeKind::Other("thead".to_string()),
        Tag::TableRow => NodeKind::Other("tr".to_string()),
        Tag::TableCell => NodeKind::Other("td".to_string()),
        _ => NodeKind::Other("div".to_string()),
    }
}
