use std::collections::BTreeMap;

use comrak::{
    Arena, format_html,
    nodes::{AstNode, NodeHtmlBlock, NodeValue},
    options::Options,
    parse_document,
};
use tracing::warn;
use uuid::Uuid;

use crate::{
    application::render::types::RenderError,
    domain::{
        node::{NodeKind, node_content, node_field},
        plugin::{PluginDescriptor, PluginList},
    },
};

/// A plugin that matched a leaf, with the parameters extracted from its matched ancestor.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub(crate) plugin: usize,
    pub(crate) params: BTreeMap<String, String>,
}

/// Everything the dispatch stage needs to resolve one leaf without touching the AST.
#[derive(Debug, Clone)]
pub(crate) struct LeafPlan {
    /// Text left in the formatted document where this leaf's output belongs.
    pub(crate) token: String,
    pub(crate) kind: NodeKind,
    pub(crate) content: String,
    pub(crate) default_html: String,
    pub(crate) candidates: Vec<Candidate>,
}

impl LeafPlan {
    /// Fragment emitted in place of the leaf when a plugin produced `body`.
    pub(crate) fn replacement(&self, body: String) -> String {
        if self.kind.is_block() && self.kind != NodeKind::Document && !body.ends_with('\n') {
            let mut body = body;
            body.push('\n');
            body
        } else {
            body
        }
    }
}

#[derive(Debug)]
pub(crate) struct RenderPlan {
    pub(crate) html: String,
    /// Prefix shared by every placeholder in `html`; the leaf index follows it.
    pub(crate) marker: String,
    pub(crate) leaves: Vec<LeafPlan>,
}

/// Parse `markdown`, record which plugins apply to each leaf and format the document with a
/// placeholder standing in for every matched leaf.
pub(crate) fn plan_document(
    markdown: &str,
    plugins: &PluginList,
    options: &Options<'static>,
) -> Result<RenderPlan, RenderError> {
    let arena = Arena::new();
    let root = parse_document(&arena, markdown, options);

    let mut matched = Vec::new();
    if !plugins.is_empty() {
        // An empty document's root is itself the only leaf.
        for leaf in root.descendants() {
            if leaf.first_child().is_some() {
                continue;
            }
            let candidates = match_plugins(leaf, plugins);
            if candidates.is_empty() {
                continue;
            }
            let default_html = render_node(leaf, options)?;
            matched.push((leaf, candidates, default_html));
        }
    }

    let marker = format!("__MDRELAY_{}_", Uuid::new_v4().simple());
    let mut leaves = Vec::with_capacity(matched.len());
    let mut root_is_leaf = false;
    for (index, (leaf, candidates, default_html)) in matched.into_iter().enumerate() {
        let placeholder = format!("{marker}{index}__");
        let mut data = leaf.data.borrow_mut();
        let kind = NodeKind::of(&data.value);
        let content = node_content(&data.value);
        let token = if leaf.same_node(root) {
            root_is_leaf = true;
            placeholder
        } else {
            swap_for_placeholder(&mut data.value, kind, placeholder)
        };
        leaves.push(LeafPlan {
            token,
            kind,
            content,
            default_html,
            candidates,
        });
    }

    let html = match leaves.first() {
        Some(leaf) if root_is_leaf => leaf.token.clone(),
        _ => render_node(root, options)?,
    };
    Ok(RenderPlan {
        html,
        marker,
        leaves,
    })
}

/// Walk from `node` up through its ancestors and return the first one of `kind`, the node itself
/// included. Nodes with children never match.
pub(crate) fn match_ancestor<'a>(node: &'a AstNode<'a>, kind: NodeKind) -> Option<&'a AstNode<'a>> {
    if node.first_child().is_some() {
        return None;
    }

    let mut current = Some(node);
    while let Some(candidate) = current {
        if NodeKind::of(&candidate.data.borrow().value) == kind {
            return Some(candidate);
        }
        current = candidate.parent();
    }
    None
}

fn match_plugins<'a>(leaf: &'a AstNode<'a>, plugins: &PluginList) -> Vec<Candidate> {
    plugins
        .iter()
        .enumerate()
        .filter_map(|(index, plugin)| {
            let ancestor = match_ancestor(leaf, plugin.node_kind)?;
            let params = extract_params(ancestor, plugin)?;
            Some(Candidate {
                plugin: index,
                params,
            })
        })
        .collect()
}

/// `None` when any declared attribute is missing from the ancestor; the plugin then does not
/// apply to this leaf.
fn extract_params<'a>(
    ancestor: &'a AstNode<'a>,
    plugin: &PluginDescriptor,
) -> Option<BTreeMap<String, String>> {
    let data = ancestor.data.borrow();
    let mut params = BTreeMap::new();
    for (param, field) in &plugin.attrs {
        match node_field(&data.value, field) {
            Ok(value) => {
                params.insert(param.clone(), value);
            }
            Err(err) => {
                warn!(
                    target = "mdrelay::render",
                    plugin = %plugin.name,
                    route = %plugin.route,
                    param = %param,
                    error = %err,
                    "attribute extraction failed, plugin skipped for node"
                );
                return None;
            }
        }
    }
    Some(params)
}

/// Text nodes keep their kind so the placeholder survives plain-text contexts such as image alt
/// attributes; other inline leaves become raw inline HTML and block leaves raw HTML blocks.
fn swap_for_placeholder(value: &mut NodeValue, kind: NodeKind, placeholder: String) -> String {
    if kind.is_block() {
        let token = format!("{placeholder}\n");
        *value = NodeValue::HtmlBlock(NodeHtmlBlock {
            block_type: 0,
            literal: token.clone(),
        });
        token
    } else if kind == NodeKind::Text {
        *value = NodeValue::Text(placeholder.clone().into());
        placeholder
    } else {
        *value = NodeValue::HtmlInline(placeholder.clone());
        placeholder
    }
}

fn render_node<'a>(node: &'a AstNode<'a>, options: &Options<'static>) -> Result<String, RenderError> {
    let mut html = String::new();
    format_html(node, options, &mut html).map_err(|err| RenderError::Markdown {
        message: err.to_string(),
    })?;
    Ok(html)
}
