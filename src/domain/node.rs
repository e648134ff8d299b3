//! Node kinds and the named fields plugins may request from them.
//!
//! Plugins declare the node kind they intercept as a string in their discovery payload and name
//! the node fields they want forwarded. Both are resolved here against a closed set of kinds so
//! that matching and extraction never depend on runtime type introspection.

use std::{fmt, str::FromStr};

use comrak::nodes::{ListType, NodeValue};
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Closed enumeration of the document node kinds a plugin can bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    FrontMatter,
    BlockQuote,
    List,
    Item,
    TaskItem,
    DescriptionList,
    DescriptionItem,
    DescriptionTerm,
    DescriptionDetails,
    CodeBlock,
    HtmlBlock,
    Paragraph,
    Heading,
    ThematicBreak,
    FootnoteDefinition,
    Table,
    TableRow,
    TableCell,
    Alert,
    Text,
    SoftBreak,
    LineBreak,
    Code,
    HtmlInline,
    Emph,
    Strong,
    Strikethrough,
    Superscript,
    Subscript,
    Underline,
    Link,
    Image,
    WikiLink,
    FootnoteReference,
    Math,
    Other,
}

const KIND_NAMES: &[(NodeKind, &str)] = &[
    (NodeKind::Document, "document"),
    (NodeKind::FrontMatter, "front_matter"),
    (NodeKind::BlockQuote, "block_quote"),
    (NodeKind::List, "list"),
    (NodeKind::Item, "item"),
    (NodeKind::TaskItem, "task_item"),
    (NodeKind::DescriptionList, "description_list"),
    (NodeKind::DescriptionItem, "description_item"),
    (NodeKind::DescriptionTerm, "description_term"),
    (NodeKind::DescriptionDetails, "description_details"),
    (NodeKind::CodeBlock, "code_block"),
    (NodeKind::HtmlBlock, "html_block"),
    (NodeKind::Paragraph, "paragraph"),
    (NodeKind::Heading, "heading"),
    (NodeKind::ThematicBreak, "thematic_break"),
    (NodeKind::FootnoteDefinition, "footnote_definition"),
    (NodeKind::Table, "table"),
    (NodeKind::TableRow, "table_row"),
    (NodeKind::TableCell, "table_cell"),
    (NodeKind::Alert, "alert"),
    (NodeKind::Text, "text"),
    (NodeKind::SoftBreak, "soft_break"),
    (NodeKind::LineBreak, "line_break"),
    (NodeKind::Code, "code"),
    (NodeKind::HtmlInline, "html_inline"),
    (NodeKind::Emph, "emph"),
    (NodeKind::Strong, "strong"),
    (NodeKind::Strikethrough, "strikethrough"),
    (NodeKind::Superscript, "superscript"),
    (NodeKind::Subscript, "subscript"),
    (NodeKind::Underline, "underline"),
    (NodeKind::Link, "link"),
    (NodeKind::Image, "image"),
    (NodeKind::WikiLink, "wiki_link"),
    (NodeKind::FootnoteReference, "footnote_reference"),
    (NodeKind::Math, "math"),
];

// Names used by existing plugins that differ from ours.
const KIND_ALIASES: &[(&str, NodeKind)] = &[
    ("listitem", NodeKind::Item),
    ("del", NodeKind::Strikethrough),
    ("horizontalrule", NodeKind::ThematicBreak),
    ("htmlspan", NodeKind::HtmlInline),
    ("hardbreak", NodeKind::LineBreak),
    ("softbreak", NodeKind::SoftBreak),
    ("mathblock", NodeKind::Math),
    ("emphasis", NodeKind::Emph),
];

impl NodeKind {
    pub fn of(value: &NodeValue) -> Self {
        match value {
            NodeValue::Document => NodeKind::Document,
            NodeValue::FrontMatter(_) => NodeKind::FrontMatter,
            NodeValue::BlockQuote => NodeKind::BlockQuote,
            NodeValue::List(_) => NodeKind::List,
            NodeValue::Item(_) => NodeKind::Item,
            NodeValue::TaskItem(..) => NodeKind::TaskItem,
            NodeValue::DescriptionList => NodeKind::DescriptionList,
            NodeValue::DescriptionItem(_) => NodeKind::DescriptionItem,
            NodeValue::DescriptionTerm => NodeKind::DescriptionTerm,
            NodeValue::DescriptionDetails => NodeKind::DescriptionDetails,
            NodeValue::CodeBlock(_) => NodeKind::CodeBlock,
            NodeValue::HtmlBlock(_) => NodeKind::HtmlBlock,
            NodeValue::Paragraph => NodeKind::Paragraph,
            NodeValue::Heading(_) => NodeKind::Heading,
            NodeValue::ThematicBreak => NodeKind::ThematicBreak,
            NodeValue::FootnoteDefinition(_) => NodeKind::FootnoteDefinition,
            NodeValue::Table(_) => NodeKind::Table,
            NodeValue::TableRow(_) => NodeKind::TableRow,
            NodeValue::TableCell => NodeKind::TableCell,
            NodeValue::Alert(_) => NodeKind::Alert,
            NodeValue::Text(_) => NodeKind::Text,
            NodeValue::SoftBreak => NodeKind::SoftBreak,
            NodeValue::LineBreak => NodeKind::LineBreak,
            NodeValue::Code(_) => NodeKind::Code,
            NodeValue::HtmlInline(_) => NodeKind::HtmlInline,
            NodeValue::Emph => NodeKind::Emph,
            NodeValue::Strong => NodeKind::Strong,
            NodeValue::Strikethrough => NodeKind::Strikethrough,
            NodeValue::Superscript => NodeKind::Superscript,
            NodeValue::Subscript => NodeKind::Subscript,
            NodeValue::Underline => NodeKind::Underline,
            NodeValue::Link(_) => NodeKind::Link,
            NodeValue::Image(_) => NodeKind::Image,
            NodeValue::WikiLink(_) => NodeKind::WikiLink,
            NodeValue::FootnoteReference(_) => NodeKind::FootnoteReference,
            NodeValue::Math(_) => NodeKind::Math,
            _ => NodeKind::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        KIND_NAMES
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, name)| *name)
            .unwrap_or("other")
    }

    /// Whether a replacement for this node must be emitted as block-level HTML.
    pub fn is_block(self) -> bool {
        matches!(
            self,
            NodeKind::Document
                | NodeKind::FrontMatter
                | NodeKind::BlockQuote
                | NodeKind::List
                | NodeKind::Item
                | NodeKind::TaskItem
                | NodeKind::DescriptionList
                | NodeKind::DescriptionItem
                | NodeKind::DescriptionTerm
                | NodeKind::DescriptionDetails
                | NodeKind::CodeBlock
                | NodeKind::HtmlBlock
                | NodeKind::Paragraph
                | NodeKind::Heading
                | NodeKind::ThematicBreak
                | NodeKind::FootnoteDefinition
                | NodeKind::Table
                | NodeKind::TableRow
                | NodeKind::TableCell
                | NodeKind::Alert
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for NodeKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported node kind `{0}`")]
pub struct UnknownNodeKind(pub String);

impl FromStr for NodeKind {
    type Err = UnknownNodeKind;

    /// Accepts `code_block`, `CodeBlock` and qualified spellings such as `*ast.CodeBlock`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let unqualified = raw.trim().rsplit('.').next().unwrap_or_default();
        let normalized = normalize_name(unqualified.trim_start_matches('*'));
        if normalized.is_empty() || normalized == "other" {
            return Err(UnknownNodeKind(raw.to_string()));
        }

        KIND_NAMES
            .iter()
            .find(|(_, name)| normalize_name(name) == normalized)
            .map(|(kind, _)| *kind)
            .or_else(|| {
                KIND_ALIASES
                    .iter()
                    .find(|(alias, _)| *alias == normalized)
                    .map(|(_, kind)| *kind)
            })
            .ok_or_else(|| UnknownNodeKind(raw.to_string()))
    }
}

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|ch| *ch != '_' && *ch != '-')
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttributeError {
    #[error("node kind `{kind}` has no field `{field}`")]
    UnknownField { kind: NodeKind, field: String },
}

/// Look up a named field on a node and canonicalize it to a string.
///
/// Field names match case-insensitively with `_` ignored. A single layer of surrounding double
/// quotes is removed from the result.
pub fn node_field(value: &NodeValue, field: &str) -> Result<String, AttributeError> {
    let name = normalize_name(field);
    raw_field(value, name.as_str())
        .map(|raw| strip_quotes(&raw).to_string())
        .ok_or_else(|| AttributeError::UnknownField {
            kind: NodeKind::of(value),
            field: field.to_string(),
        })
}

fn raw_field(value: &NodeValue, name: &str) -> Option<String> {
    match (value, name) {
        (NodeValue::CodeBlock(block), "info") => Some(block.info.clone()),
        (NodeValue::CodeBlock(block), "language") => Some(
            block
                .info
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string(),
        ),
        (NodeValue::CodeBlock(block), "literal") => Some(block.literal.clone()),
        (NodeValue::CodeBlock(block), "fenced") => Some(block.fenced.to_string()),
        (NodeValue::CodeBlock(block), "fencechar") => Some(char::from(block.fence_char).to_string()),
        (NodeValue::CodeBlock(block), "fencelength") => Some(block.fence_length.to_string()),
        (NodeValue::Heading(heading), "level") => Some(heading.level.to_string()),
        (NodeValue::Heading(heading), "setext") => Some(heading.setext.to_string()),
        (NodeValue::Link(link) | NodeValue::Image(link), "url" | "destination") => {
            Some(link.url.clone())
        }
        (NodeValue::Link(link) | NodeValue::Image(link), "title") => Some(link.title.clone()),
        (NodeValue::WikiLink(link), "url" | "destination") => Some(link.url.clone()),
        (NodeValue::List(list) | NodeValue::Item(list), "listtype") => Some(
            match list.list_type {
                ListType::Bullet => "bullet",
                ListType::Ordered => "ordered",
            }
            .to_string(),
        ),
        (NodeValue::List(list) | NodeValue::Item(list), "start") => Some(list.start.to_string()),
        (NodeValue::List(list) | NodeValue::Item(list), "tight") => Some(list.tight.to_string()),
        (NodeValue::List(list) | NodeValue::Item(list), "bulletchar") => {
            Some(char::from(list.bullet_char).to_string())
        }
        (NodeValue::Code(code), "literal") => Some(code.literal.clone()),
        (NodeValue::Math(math), "literal") => Some(math.literal.clone()),
        (NodeValue::Math(math), "displaymath" | "display") => Some(math.display_math.to_string()),
        (NodeValue::HtmlBlock(block), "literal") => Some(block.literal.clone()),
        (NodeValue::HtmlBlock(block), "blocktype") => Some(block.block_type.to_string()),
        (NodeValue::HtmlInline(html), "literal") => Some(html.clone()),
        (NodeValue::Text(text), "literal") => Some(text.to_string()),
        (NodeValue::FrontMatter(raw), "literal") => Some(raw.clone()),
        (NodeValue::FootnoteDefinition(def), "name") => Some(def.name.clone()),
        (NodeValue::FootnoteReference(reference), "name") => Some(reference.name.clone()),
        (_, "kind" | "type") => Some(NodeKind::of(value).as_str().to_string()),
        _ => None,
    }
}

/// Literal text carried by a node, empty for nodes without content of their own.
pub fn node_content(value: &NodeValue) -> String {
    match value {
        NodeValue::Text(text) => text.to_string(),
        NodeValue::Code(code) => code.literal.clone(),
        NodeValue::CodeBlock(block) => block.literal.clone(),
        NodeValue::HtmlBlock(block) => block.literal.clone(),
        NodeValue::HtmlInline(html) => html.clone(),
        NodeValue::Math(math) => math.literal.clone(),
        NodeValue::FrontMatter(raw) => raw.clone(),
        _ => String::new(),
    }
}

/// Remove one leading and one trailing double quote, if present.
pub fn strip_quotes(value: &str) -> &str {
    let value = value.strip_prefix('"').unwrap_or(value);
    value.strip_suffix('"').unwrap_or(value)
}
