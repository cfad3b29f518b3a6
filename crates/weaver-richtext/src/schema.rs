//! Schema adapter.
//!
//! A fixed table of tree node types with their content rules, plus the
//! registry mapping domain block types and mark names onto tree node and
//! mark types. Everything here is immutable once built; lookups are pure.

use serde_json::{Map, Value};
use smol_str::SmolStr;

use crate::content::{ContentExpr, ContentMatch, EMPTY_EXPR};
use crate::error::{Result, RichTextError};
use crate::span::{Attrs, BlockMarker, Marks, is_mark_active};
use crate::tree::{Element, Fragment, Mark, Node};

// === Reserved attribute names ===

/// Set on nodes that correspond to a stored block marker.
pub const IS_AMG_BLOCK: &str = "isAmgBlock";
/// Raw block type of an unrecognized block.
pub const UNKNOWN_BLOCK: &str = "unknownBlock";
/// Block attributes the mapping does not consume, kept verbatim.
pub const UNKNOWN_ATTRS: &str = "unknownAttrs";
/// Raw block type of an unrecognized parent wrapper.
pub const UNKNOWN_PARENT_BLOCK: &str = "unknownParentBlock";
/// Mapped attributes the marker left out. They hold the node default
/// and are not written back while they still do.
pub const DEFAULTED_ATTRS: &str = "defaultedAttrs";

pub const DOC: &str = "doc";
pub const TEXT: &str = "text";
pub const UNKNOWN_BLOCK_NODE: &str = "unknown_block";
pub const UNKNOWN_LEAF_NODE: &str = "unknown_leaf";
pub const UNKNOWN_MARK: &str = "unknown_mark";

/// An attribute declared by a node type. `default: None` means required.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrSpec {
    pub name: SmolStr,
    pub default: Option<Value>,
}

impl AttrSpec {
    pub fn optional(name: &str, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            default: Some(default.into()),
        }
    }

    pub fn required(name: &str) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub name: SmolStr,
    pub content: ContentExpr,
    pub groups: Vec<SmolStr>,
    pub inline: bool,
    /// Whether inline content of this node may carry marks.
    pub marks: bool,
    pub attrs: Vec<AttrSpec>,
}

/// Node definition before content expressions are resolved.
struct NodeDef {
    name: &'static str,
    content: &'static str,
    groups: &'static [&'static str],
    inline: bool,
    marks: bool,
    attrs: Vec<AttrSpec>,
}

/// Maps one domain block type onto a tree node type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMapping {
    pub block_type: SmolStr,
    pub node_type: SmolStr,
    /// Node type that must directly contain the mapped node.
    pub outer: Option<SmolStr>,
    pub is_embed: bool,
    /// Block attributes carried over to node attributes and back.
    pub attrs: Vec<SmolStr>,
}

impl BlockMapping {
    pub fn new(block_type: &str, node_type: &str) -> Self {
        Self {
            block_type: block_type.into(),
            node_type: node_type.into(),
            outer: None,
            is_embed: false,
            attrs: Vec::new(),
        }
    }

    pub fn outer(mut self, outer: &str) -> Self {
        self.outer = Some(outer.into());
        self
    }

    pub fn embed(mut self) -> Self {
        self.is_embed = true;
        self
    }

    pub fn attrs(mut self, names: &[&str]) -> Self {
        self.attrs = names.iter().map(|n| SmolStr::new(n)).collect();
        self
    }
}

/// How a mark's span value is represented on the tree mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkValue {
    /// Presence only, the span value is `true`.
    Flag,
    /// The span value is an object whose fields become mark attributes.
    Object,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkMapping {
    pub name: SmolStr,
    pub mark_type: SmolStr,
    pub value: MarkValue,
}

impl MarkMapping {
    pub fn flag(name: &str) -> Self {
        Self {
            name: name.into(),
            mark_type: name.into(),
            value: MarkValue::Flag,
        }
    }

    pub fn object(name: &str) -> Self {
        Self {
            name: name.into(),
            mark_type: name.into(),
            value: MarkValue::Object,
        }
    }
}

/// The node/mark table and the block/mark registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    nodes: Vec<NodeSpec>,
    blocks: Vec<BlockMapping>,
    marks: Vec<MarkMapping>,
}

impl Default for Schema {
    fn default() -> Self {
        Self::basic()
    }
}

impl Schema {
    /// The rich-text schema used by the editor.
    pub fn basic() -> Self {
        let reserved = || {
            vec![
                AttrSpec::optional(IS_AMG_BLOCK, false),
                AttrSpec::optional(UNKNOWN_ATTRS, Value::Null),
                AttrSpec::optional(DEFAULTED_ATTRS, Value::Null),
            ]
        };
        let with = |extra: Vec<AttrSpec>| {
            let mut attrs = reserved();
            attrs.extend(extra);
            attrs
        };
        let defs = vec![
            NodeDef {
                name: DOC,
                content: "block+",
                groups: &[],
                inline: false,
                marks: false,
                attrs: Vec::new(),
            },
            NodeDef {
                name: "paragraph",
                content: "inline*",
                groups: &["block"],
                inline: false,
                marks: true,
                attrs: reserved(),
            },
            NodeDef {
                name: "heading",
                content: "inline*",
                groups: &["block"],
                inline: false,
                marks: true,
                attrs: with(vec![AttrSpec::optional("level", 1)]),
            },
            NodeDef {
                name: "code_block",
                content: "text*",
                groups: &["block"],
                inline: false,
                marks: false,
                attrs: reserved(),
            },
            NodeDef {
                name: "blockquote",
                content: "block+",
                groups: &["block"],
                inline: false,
                marks: false,
                attrs: reserved(),
            },
            NodeDef {
                name: "aside",
                content: "block+",
                groups: &["block"],
                inline: false,
                marks: false,
                attrs: reserved(),
            },
            NodeDef {
                name: "ordered_list",
                content: "list_item+",
                groups: &["block"],
                inline: false,
                marks: false,
                attrs: reserved(),
            },
            NodeDef {
                name: "bullet_list",
                content: "list_item+",
                groups: &["block"],
                inline: false,
                marks: false,
                attrs: reserved(),
            },
            NodeDef {
                name: "list_item",
                content: "paragraph block*",
                groups: &[],
                inline: false,
                marks: false,
                attrs: reserved(),
            },
            NodeDef {
                name: UNKNOWN_BLOCK_NODE,
                content: "block+",
                groups: &["block"],
                inline: false,
                marks: false,
                attrs: with(vec![
                    AttrSpec::optional(UNKNOWN_BLOCK, Value::Null),
                    AttrSpec::optional(UNKNOWN_PARENT_BLOCK, Value::Null),
                ]),
            },
            NodeDef {
                name: "image",
                content: "",
                groups: &["inline"],
                inline: true,
                marks: false,
                attrs: with(vec![
                    AttrSpec::required("src"),
                    AttrSpec::optional("alt", Value::Null),
                    AttrSpec::optional("title", Value::Null),
                ]),
            },
            NodeDef {
                name: UNKNOWN_LEAF_NODE,
                content: "",
                groups: &["inline"],
                inline: true,
                marks: false,
                attrs: with(vec![AttrSpec::required(UNKNOWN_BLOCK)]),
            },
            NodeDef {
                name: TEXT,
                content: "",
                groups: &["inline"],
                inline: true,
                marks: false,
                attrs: Vec::new(),
            },
        ];
        let blocks = vec![
            BlockMapping::new("paragraph", "paragraph"),
            BlockMapping::new("heading", "heading").attrs(&["level"]),
            BlockMapping::new("code-block", "code_block"),
            BlockMapping::new("blockquote", "blockquote"),
            BlockMapping::new("aside", "aside"),
            BlockMapping::new("ordered-list-item", "list_item").outer("ordered_list"),
            BlockMapping::new("unordered-list-item", "list_item").outer("bullet_list"),
            BlockMapping::new("image", "image")
                .embed()
                .attrs(&["src", "alt", "title"]),
        ];
        let marks = vec![
            MarkMapping::flag("strong"),
            MarkMapping::flag("em"),
            MarkMapping::flag("code"),
            MarkMapping::object("link"),
        ];
        Self::build(defs, blocks, marks)
    }

    fn build(defs: Vec<NodeDef>, blocks: Vec<BlockMapping>, marks: Vec<MarkMapping>) -> Self {
        let resolve = |name: &str| -> Vec<SmolStr> {
            if defs.iter().any(|d| d.name == name) {
                return vec![SmolStr::new(name)];
            }
            defs.iter()
                .filter(|d| d.groups.contains(&name))
                .map(|d| SmolStr::new(d.name))
                .collect()
        };
        let nodes = defs
            .iter()
            .map(|d| NodeSpec {
                name: d.name.into(),
                content: ContentExpr::parse(d.content, &resolve),
                groups: d.groups.iter().map(|g| SmolStr::new(g)).collect(),
                inline: d.inline,
                marks: d.marks,
                attrs: d.attrs.clone(),
            })
            .collect();
        Self {
            nodes,
            blocks,
            marks,
        }
    }

    // === Node types ===

    pub fn node(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn node_spec(&self, name: &str) -> Result<&NodeSpec> {
        self.node(name)
            .ok_or_else(|| RichTextError::UnknownNodeType(name.into()))
    }

    pub fn content_expr(&self, name: &str) -> Option<&ContentExpr> {
        self.node(name).map(|n| &n.content)
    }

    pub fn start_match(&self, name: &str) -> Option<ContentMatch<'_>> {
        self.content_expr(name).map(ContentExpr::start)
    }

    /// Start of a type's content expression; unknown types accept nothing.
    pub fn content_match(&self, name: &str) -> ContentMatch<'_> {
        self.content_expr(name).unwrap_or(&EMPTY_EXPR).start()
    }

    pub fn is_text(&self, name: &str) -> bool {
        name == TEXT
    }

    pub fn is_inline(&self, name: &str) -> bool {
        self.node(name).is_some_and(|n| n.inline)
    }

    pub fn is_leaf(&self, name: &str) -> bool {
        !self.is_text(name) && self.node(name).is_none_or(|n| n.content.is_empty())
    }

    /// Block nodes whose content is inline.
    pub fn is_textblock(&self, name: &str) -> bool {
        self.node(name)
            .is_some_and(|n| !n.inline && n.content.mentions(TEXT))
    }

    pub fn allows_marks(&self, name: &str) -> bool {
        self.node(name).is_some_and(|n| n.marks)
    }

    fn has_required_attrs(&self, name: &str) -> bool {
        self.node(name)
            .is_some_and(|n| n.attrs.iter().any(|a| a.default.is_none()))
    }

    /// Types that fill and default placement may create out of nothing.
    pub fn is_creatable(&self, name: &str) -> bool {
        !self.is_text(name) && self.node(name).is_some() && !self.has_required_attrs(name)
    }

    pub(crate) fn is_wrapper_candidate(&self, name: &str) -> bool {
        self.is_creatable(name) && !self.is_leaf(name) && !self.is_inline(name)
    }

    /// Compatible content means two nodes of these types may be joined.
    pub fn compatible_content(&self, a: &str, b: &str) -> bool {
        a == b || (self.is_textblock(a) && self.is_textblock(b))
    }

    pub fn default_attrs(&self, name: &str) -> Attrs {
        self.node(name)
            .map(|n| {
                n.attrs
                    .iter()
                    .filter_map(|a| a.default.clone().map(|d| (a.name.clone(), d)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether every declared attribute other than `isAmgBlock` is at its default.
    pub fn has_default_attrs(&self, name: &str, attrs: &Attrs) -> bool {
        let Some(spec) = self.node(name) else {
            return false;
        };
        spec.attrs
            .iter()
            .filter(|a| a.name != IS_AMG_BLOCK)
            .all(|a| match &a.default {
                Some(default) => attrs.get(&a.name).unwrap_or(&Value::Null) == default,
                None => false,
            })
    }

    /// Builds an element node, normalizing its content.
    pub fn element(&self, name: &str, attrs: Attrs, content: Vec<Node>) -> Node {
        Node::Element(Element {
            node_type: name.into(),
            attrs,
            content: Fragment::from_nodes(content),
            leaf: self.is_leaf(name),
        })
    }

    /// Creates a node with default attributes and the minimal valid content.
    pub fn create_and_fill(&self, name: &str) -> Option<Node> {
        if !self.is_creatable(name) {
            return None;
        }
        let spec = self.node(name)?;
        let mut content = Vec::new();
        if !spec.content.is_empty() {
            let fill = spec.content.start().fill_before(self, &[], true)?;
            for ty in fill {
                content.push(self.create_and_fill(&ty)?);
            }
        }
        Some(self.element(name, self.default_attrs(name), content))
    }

    /// Checks a node's content against its content expression.
    pub fn check_content(&self, name: &str, content: &Fragment) -> bool {
        let Some(start) = self.start_match(name) else {
            return false;
        };
        let allow_marks = self.allows_marks(name);
        let mut m = start;
        for child in content.iter() {
            if !allow_marks && !child.marks().is_empty() {
                return false;
            }
            match m.match_type(child.node_type()) {
                Some(next) => m = next,
                None => return false,
            }
        }
        m.valid_end()
    }

    // === Block mappings ===

    pub fn block_mappings(&self) -> &[BlockMapping] {
        &self.blocks
    }

    pub fn mapping_for_block(&self, block_type: &str) -> Option<&BlockMapping> {
        self.blocks.iter().find(|m| m.block_type == block_type)
    }

    pub fn has_mapping(&self, node_type: &str) -> bool {
        self.blocks.iter().any(|m| m.node_type == node_type)
    }

    /// Picks the mapping for a node, preferring the one whose outer type
    /// matches the node's actual parent. Falls back to the first registered.
    pub fn resolve_mapping(&self, node_type: &str, outer: Option<&str>) -> Option<&BlockMapping> {
        let mut candidates = self.blocks.iter().filter(|m| m.node_type == node_type);
        let first = candidates.next()?;
        if first.outer.as_deref() == outer {
            return Some(first);
        }
        candidates
            .find(|m| m.outer.as_deref() == outer)
            .or(Some(first))
    }

    /// Node type and attributes for the content node of a block marker.
    ///
    /// The returned attributes flag the node as an explicit block.
    pub fn node_for_block(&self, marker: &BlockMarker) -> (SmolStr, Attrs) {
        let Some(mapping) = self.mapping_for_block(&marker.block_type) else {
            let node_type = if marker.is_embed {
                UNKNOWN_LEAF_NODE
            } else {
                UNKNOWN_BLOCK_NODE
            };
            let mut attrs = self.default_attrs(node_type);
            attrs.insert(IS_AMG_BLOCK.into(), Value::Bool(true));
            attrs.insert(
                UNKNOWN_BLOCK.into(),
                Value::String(marker.block_type.to_string()),
            );
            attrs.insert(UNKNOWN_ATTRS.into(), attrs_to_value(&marker.attrs));
            return (node_type.into(), attrs);
        };
        let mut attrs = self.default_attrs(&mapping.node_type);
        let defaulted: Vec<Value> = mapping
            .attrs
            .iter()
            .filter(|name| !marker.attrs.contains_key(*name))
            .filter(|name| attrs.get(*name).is_some_and(|v| !v.is_null()))
            .map(|name| Value::String(name.to_string()))
            .collect();
        let mut leftover = Map::new();
        for (key, value) in &marker.attrs {
            if mapping.attrs.contains(key) {
                attrs.insert(key.clone(), value.clone());
            } else {
                leftover.insert(key.to_string(), value.clone());
            }
        }
        if !leftover.is_empty() {
            attrs.insert(UNKNOWN_ATTRS.into(), Value::Object(leftover));
        }
        if !defaulted.is_empty() {
            attrs.insert(DEFAULTED_ATTRS.into(), Value::Array(defaulted));
        }
        attrs.insert(IS_AMG_BLOCK.into(), Value::Bool(true));
        (mapping.node_type.clone(), attrs)
    }

    /// Attributes for a render-only node standing in for an unrecognized parent.
    pub fn unknown_parent_attrs(&self, block_type: &str) -> Attrs {
        let mut attrs = self.default_attrs(UNKNOWN_BLOCK_NODE);
        attrs.insert(
            UNKNOWN_PARENT_BLOCK.into(),
            Value::String(block_type.to_string()),
        );
        attrs
    }

    /// Rebuilds the block marker for an explicit node.
    pub fn block_for_node(
        &self,
        node_type: &str,
        attrs: &Attrs,
        outer: Option<&str>,
        parents: Vec<SmolStr>,
    ) -> Result<BlockMarker> {
        if node_type == UNKNOWN_BLOCK_NODE || node_type == UNKNOWN_LEAF_NODE {
            let block_type = attrs
                .get(UNKNOWN_BLOCK)
                .and_then(Value::as_str)
                .ok_or_else(|| RichTextError::SchemaMapping {
                    node_type: node_type.into(),
                })?;
            return Ok(BlockMarker {
                block_type: block_type.into(),
                parents,
                attrs: value_to_attrs(attrs.get(UNKNOWN_ATTRS)),
                is_embed: node_type == UNKNOWN_LEAF_NODE,
            });
        }
        let mapping =
            self.resolve_mapping(node_type, outer)
                .ok_or_else(|| RichTextError::SchemaMapping {
                    node_type: node_type.into(),
                })?;
        let defaults = self.default_attrs(node_type);
        let defaulted = |name: &str| {
            attrs
                .get(DEFAULTED_ATTRS)
                .and_then(Value::as_array)
                .is_some_and(|list| list.iter().any(|n| n.as_str() == Some(name)))
        };
        let mut out = Attrs::new();
        for name in &mapping.attrs {
            match attrs.get(name) {
                Some(Value::Null) | None => {}
                Some(value) if defaulted(name.as_str()) && defaults.get(name) == Some(value) => {}
                Some(value) => {
                    out.insert(name.clone(), value.clone());
                }
            }
        }
        out.extend(value_to_attrs(attrs.get(UNKNOWN_ATTRS)));
        Ok(BlockMarker {
            block_type: mapping.block_type.clone(),
            parents,
            attrs: out,
            is_embed: mapping.is_embed,
        })
    }

    // === Marks ===

    pub fn mark_mapping(&self, name: &str) -> Option<&MarkMapping> {
        self.marks.iter().find(|m| m.name == name)
    }

    /// Tree mark for a span mark entry. Unrecognized names become `unknown_mark`.
    pub fn mark_for_span(&self, name: &str, value: &Value) -> Mark {
        match self.mark_mapping(name) {
            Some(MarkMapping {
                mark_type,
                value: MarkValue::Flag,
                ..
            }) => Mark::new(mark_type.clone()),
            Some(MarkMapping {
                mark_type,
                value: MarkValue::Object,
                ..
            }) => Mark::new(mark_type.clone()).with_attrs(value_to_attrs(Some(value))),
            None => Mark::new(UNKNOWN_MARK)
                .with_attr("name", Value::String(name.to_string()))
                .with_attr("value", value.clone()),
        }
    }

    pub fn marks_from_span(&self, marks: &Marks) -> Vec<Mark> {
        let mut out: Vec<Mark> = Vec::new();
        for (name, value) in marks {
            if is_mark_active(value) {
                out = self.mark_for_span(name, value).add_to_set(&out);
            }
        }
        out
    }

    /// Span name and value for a tree mark.
    pub fn mark_to_span(&self, mark: &Mark) -> (SmolStr, Value) {
        if mark.mark_type == UNKNOWN_MARK {
            let name = mark
                .attrs
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(UNKNOWN_MARK);
            let value = mark.attrs.get("value").cloned().unwrap_or(Value::Bool(true));
            return (name.into(), value);
        }
        match self.marks.iter().find(|m| m.mark_type == mark.mark_type) {
            Some(MarkMapping {
                name,
                value: MarkValue::Object,
                ..
            }) => (name.clone(), attrs_to_value(&mark.attrs)),
            Some(MarkMapping { name, .. }) => (name.clone(), Value::Bool(true)),
            None => (mark.mark_type.clone(), Value::Bool(true)),
        }
    }

    pub fn marks_to_span(&self, marks: &[Mark]) -> Marks {
        marks.iter().map(|m| self.mark_to_span(m)).collect()
    }
}

fn attrs_to_value(attrs: &Attrs) -> Value {
    Value::Object(
        attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    )
}

fn value_to_attrs(value: Option<&Value>) -> Attrs {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| (SmolStr::new(k), v.clone()))
            .collect(),
        _ => Attrs::new(),
    }
}
