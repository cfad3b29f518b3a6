//! Tree nodes, fragments, marks and slices.
//!
//! Positions follow the usual convention: a text node has size equal to its
//! character count, a leaf has size 1, any other element has size of its
//! content plus 2 for the open and close boundaries.

use std::fmt;

use serde_json::Value;
use smol_str::SmolStr;

use crate::error::{Result, RichTextError};
use crate::schema::{DEFAULTED_ATTRS, IS_AMG_BLOCK, UNKNOWN_MARK};
use crate::span::Attrs;

/// An inline mark on a text node.
#[derive(Debug, Clone, PartialEq)]
pub struct Mark {
    pub mark_type: SmolStr,
    pub attrs: Attrs,
}

impl Mark {
    pub fn new(mark_type: impl Into<SmolStr>) -> Self {
        Self {
            mark_type: mark_type.into(),
            attrs: Attrs::new(),
        }
    }

    pub fn with_attrs(mut self, attrs: Attrs) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn with_attr(mut self, key: impl Into<SmolStr>, value: Value) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    /// Unknown marks are distinguished by their `name` attribute, every
    /// other mark type occupies a single slot in a set.
    fn slot(&self) -> (&str, &str) {
        let name = if self.mark_type == UNKNOWN_MARK {
            self.attrs.get("name").and_then(Value::as_str).unwrap_or("")
        } else {
            ""
        };
        (self.mark_type.as_str(), name)
    }

    /// Adds this mark to a sorted set, replacing a mark in the same slot.
    pub fn add_to_set(&self, set: &[Mark]) -> Vec<Mark> {
        let mut out: Vec<Mark> = set
            .iter()
            .filter(|m| m.slot() != self.slot())
            .cloned()
            .collect();
        let at = out
            .iter()
            .position(|m| m.slot() > self.slot())
            .unwrap_or(out.len());
        out.insert(at, self.clone());
        out
    }

    /// Removes whatever mark occupies this mark's slot.
    pub fn remove_from_set(&self, set: &[Mark]) -> Vec<Mark> {
        set.iter()
            .filter(|m| m.slot() != self.slot())
            .cloned()
            .collect()
    }

    pub fn is_in_set(&self, set: &[Mark]) -> bool {
        set.iter().any(|m| m == self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub node_type: SmolStr,
    pub attrs: Attrs,
    pub content: Fragment,
    pub leaf: bool,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    /// Whether the node carries `isAmgBlock: true`.
    pub fn is_amg_block(&self) -> bool {
        matches!(self.attrs.get(IS_AMG_BLOCK), Some(Value::Bool(true)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextNode {
    pub text: String,
    pub marks: Vec<Mark>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(TextNode),
}

static EMPTY: Fragment = Fragment {
    nodes: Vec::new(),
    size: 0,
};

impl Node {
    pub fn text(text: impl Into<String>, marks: Vec<Mark>) -> Self {
        Node::Text(TextNode {
            text: text.into(),
            marks,
        })
    }

    pub fn node_type(&self) -> &str {
        match self {
            Node::Element(e) => &e.node_type,
            Node::Text(_) => crate::schema::TEXT,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Node::Text(_))
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        }
    }

    pub fn text_str(&self) -> Option<&str> {
        match self {
            Node::Text(t) => Some(&t.text),
            Node::Element(_) => None,
        }
    }

    pub fn attrs(&self) -> Option<&Attrs> {
        self.as_element().map(|e| &e.attrs)
    }

    pub fn marks(&self) -> &[Mark] {
        match self {
            Node::Text(t) => &t.marks,
            Node::Element(_) => &[],
        }
    }

    pub fn content(&self) -> &Fragment {
        match self {
            Node::Element(e) => &e.content,
            Node::Text(_) => &EMPTY,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Element(e) if e.leaf)
    }

    pub fn node_size(&self) -> usize {
        match self {
            Node::Text(t) => t.text.chars().count(),
            Node::Element(e) if e.leaf => 1,
            Node::Element(e) => e.content.size() + 2,
        }
    }

    pub fn content_size(&self) -> usize {
        self.content().size()
    }

    pub fn child_count(&self) -> usize {
        self.content().child_count()
    }

    pub fn child(&self, index: usize) -> Option<&Node> {
        self.content().child(index)
    }

    /// Concatenated text of all descendants.
    pub fn text_content(&self) -> String {
        match self {
            Node::Text(t) => t.text.clone(),
            Node::Element(e) => e.content.iter().map(Node::text_content).collect(),
        }
    }

    /// Same type, attributes and marks.
    pub fn same_markup(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Text(a), Node::Text(b)) => a.marks == b.marks,
            (Node::Element(a), Node::Element(b)) => {
                a.node_type == b.node_type && a.attrs == b.attrs
            }
            _ => false,
        }
    }

    /// A copy of this element with different content. Text nodes are returned unchanged.
    pub fn copy(&self, content: Fragment) -> Node {
        match self {
            Node::Element(e) => Node::Element(Element {
                node_type: e.node_type.clone(),
                attrs: e.attrs.clone(),
                content,
                leaf: e.leaf,
            }),
            Node::Text(_) => self.clone(),
        }
    }

    pub(crate) fn with_text(&self, text: String) -> Node {
        Node::text(text, self.marks().to_vec())
    }

    /// The part of this node between two offsets inside it.
    pub fn cut(&self, from: usize, to: usize) -> Node {
        match self {
            Node::Text(t) => {
                let text: String = t.text.chars().skip(from).take(to.saturating_sub(from)).collect();
                Node::text(text, t.marks.clone())
            }
            Node::Element(e) => self.copy(e.content.cut(from, to)),
        }
    }

    /// Text between two positions inside this node.
    pub fn text_between(&self, from: usize, to: usize) -> String {
        let mut out = String::new();
        let mut pos = 0;
        for child in self.content().iter() {
            let end = pos + child.node_size();
            if end > from && pos < to {
                match child {
                    Node::Text(t) => {
                        let start = from.saturating_sub(pos);
                        let stop = to.min(end) - pos;
                        out.extend(t.text.chars().skip(start).take(stop - start));
                    }
                    Node::Element(e) if !e.leaf => {
                        out.push_str(&child.text_between(
                            from.saturating_sub(pos + 1),
                            (to - pos - 1).min(e.content.size()),
                        ));
                    }
                    Node::Element(_) => {}
                }
            }
            pos = end;
        }
        out
    }

    pub(crate) fn check_pos(&self, pos: usize) -> Result<()> {
        let size = self.content_size();
        if pos > size {
            return Err(RichTextError::PositionOutOfRange { pos, size });
        }
        Ok(())
    }
}

/// A normalized sequence of sibling nodes.
///
/// Adjacent text nodes with equal marks are merged and empty text nodes are
/// dropped on construction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fragment {
    nodes: Vec<Node>,
    size: usize,
}

impl Fragment {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        let mut out = Fragment::empty();
        for node in nodes {
            out.push(node);
        }
        out
    }

    /// Appends a node, merging it into a trailing text node with equal marks.
    pub(crate) fn push(&mut self, node: Node) {
        if let Node::Text(t) = &node {
            if t.text.is_empty() {
                return;
            }
            if let Some(Node::Text(last)) = self.nodes.last_mut() {
                if last.marks == t.marks {
                    last.text.push_str(&t.text);
                    self.size += node.node_size();
                    return;
                }
            }
        }
        self.size += node.node_size();
        self.nodes.push(node);
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn child_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn child(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    pub fn first_child(&self) -> Option<&Node> {
        self.nodes.first()
    }

    pub fn last_child(&self) -> Option<&Node> {
        self.nodes.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Node> {
        self.nodes.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn into_nodes(self) -> Vec<Node> {
        self.nodes
    }

    /// Child index and its start offset for a position in this fragment.
    ///
    /// A position on a child boundary resolves to the child after it.
    pub fn find_index(&self, pos: usize) -> (usize, usize) {
        if pos == 0 {
            return (0, 0);
        }
        if pos >= self.size {
            return (self.nodes.len(), self.size);
        }
        let mut cur = 0;
        for (i, child) in self.nodes.iter().enumerate() {
            let end = cur + child.node_size();
            if end >= pos {
                if end == pos {
                    return (i + 1, end);
                }
                return (i, cur);
            }
            cur = end;
        }
        (self.nodes.len(), self.size)
    }

    pub fn cut(&self, from: usize, to: usize) -> Fragment {
        if from == 0 && to >= self.size {
            return self.clone();
        }
        let mut out = Fragment::empty();
        if to <= from {
            return out;
        }
        let mut pos = 0;
        for child in &self.nodes {
            if pos >= to {
                break;
            }
            let end = pos + child.node_size();
            if end > from {
                let piece = if pos < from || end > to {
                    match child {
                        Node::Text(_) => {
                            child.cut(from.saturating_sub(pos), (to - pos).min(child.node_size()))
                        }
                        Node::Element(e) => child.cut(
                            from.saturating_sub(pos + 1),
                            (to.saturating_sub(pos + 1)).min(e.content.size()),
                        ),
                    }
                } else {
                    child.clone()
                };
                out.push(piece);
            }
            pos = end;
        }
        out
    }

    pub fn append(&self, other: &Fragment) -> Fragment {
        let mut out = self.clone();
        for node in other.iter() {
            out.push(node.clone());
        }
        out
    }

    pub fn replace_child(&self, index: usize, node: Node) -> Fragment {
        let mut nodes = self.nodes.clone();
        if index < nodes.len() {
            nodes[index] = node;
        }
        Fragment::from_nodes(nodes)
    }

    /// First position at which the two fragments differ.
    pub fn find_diff_start(&self, other: &Fragment, pos: usize) -> Option<usize> {
        let mut pos = pos;
        let mut i = 0;
        loop {
            if i == self.child_count() || i == other.child_count() {
                return (self.child_count() != other.child_count()).then_some(pos);
            }
            let a = &self.nodes[i];
            let b = &other.nodes[i];
            if a == b {
                pos += a.node_size();
                i += 1;
                continue;
            }
            if !a.same_markup(b) {
                return Some(pos);
            }
            if let (Node::Text(ta), Node::Text(tb)) = (a, b) {
                let common = ta
                    .text
                    .chars()
                    .zip(tb.text.chars())
                    .take_while(|(x, y)| x == y)
                    .count();
                return Some(pos + common);
            }
            if let Some(inner) = a.content().find_diff_start(b.content(), pos + 1) {
                return Some(inner);
            }
            pos += a.node_size();
            i += 1;
        }
    }

    /// Last positions (in self and other) at which the fragments differ,
    /// scanning from the end.
    pub fn find_diff_end(
        &self,
        other: &Fragment,
        pos_a: usize,
        pos_b: usize,
    ) -> Option<(usize, usize)> {
        let mut i_a = self.child_count();
        let mut i_b = other.child_count();
        let mut pos_a = pos_a;
        let mut pos_b = pos_b;
        loop {
            if i_a == 0 || i_b == 0 {
                return (i_a != i_b).then_some((pos_a, pos_b));
            }
            i_a -= 1;
            i_b -= 1;
            let a = &self.nodes[i_a];
            let b = &other.nodes[i_b];
            let size = a.node_size();
            if a == b {
                pos_a -= size;
                pos_b -= size;
                continue;
            }
            if !a.same_markup(b) {
                return Some((pos_a, pos_b));
            }
            if let (Node::Text(ta), Node::Text(tb)) = (a, b) {
                let common = ta
                    .text
                    .chars()
                    .rev()
                    .zip(tb.text.chars().rev())
                    .take_while(|(x, y)| x == y)
                    .count();
                return Some((pos_a - common, pos_b - common));
            }
            if let Some(inner) =
                a.content()
                    .find_diff_end(b.content(), pos_a - 1, pos_b - 1)
            {
                return Some(inner);
            }
            pos_a -= size;
            pos_b -= b.node_size();
        }
    }
}

/// A piece of document, possibly open on either side.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Slice {
    pub content: Fragment,
    pub open_start: usize,
    pub open_end: usize,
}

impl Slice {
    pub fn new(content: Fragment, open_start: usize, open_end: usize) -> Self {
        Self {
            content,
            open_start,
            open_end,
        }
    }

    pub fn closed(nodes: Vec<Node>) -> Self {
        Self::new(Fragment::from_nodes(nodes), 0, 0)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Size the slice adds when inserted.
    pub fn size(&self) -> usize {
        self.content
            .size()
            .saturating_sub(self.open_start + self.open_end)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Text(t) => {
                write!(f, "{:?}", t.text)?;
                if !t.marks.is_empty() {
                    let names: Vec<String> = t
                        .marks
                        .iter()
                        .map(|m| match m.attrs.get("name").and_then(Value::as_str) {
                            Some(name) if m.mark_type == UNKNOWN_MARK => format!("?{name}"),
                            _ => m.mark_type.to_string(),
                        })
                        .collect();
                    write!(f, "[{}]", names.join(","))?;
                }
                Ok(())
            }
            Node::Element(e) => {
                f.write_str(&e.node_type)?;
                if e.is_amg_block() {
                    f.write_str("*")?;
                }
                let shown: Vec<String> = e
                    .attrs
                    .iter()
                    .filter(|(k, v)| {
                        k.as_str() != IS_AMG_BLOCK
                            && k.as_str() != DEFAULTED_ATTRS
                            && !matches!(v, Value::Null | Value::Bool(false))
                    })
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();
                if !shown.is_empty() {
                    write!(f, "{{{}}}", shown.join(","))?;
                }
                if !e.leaf {
                    f.write_str("(")?;
                    for (i, child) in e.content.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{child}")?;
                    }
                    f.write_str(")")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    fn para(schema: &Schema, text: &str) -> Node {
        schema.element("paragraph", schema.default_attrs("paragraph"), vec![Node::text(text, vec![])])
    }

    #[test]
    fn test_sizes() {
        let schema = Schema::basic();
        let doc = schema.element("doc", Attrs::new(), vec![para(&schema, "héllo"), para(&schema, "")]);
        assert_eq!(doc.content_size(), 7 + 2);
        assert_eq!(doc.text_between(1, 4), "hél");
        assert_eq!(doc.text_content(), "héllo");
    }

    #[test]
    fn test_fragment_merges_text() {
        let strong = vec![Mark::new("strong")];
        let frag = Fragment::from_nodes(vec![
            Node::text("a", vec![]),
            Node::text("b", vec![]),
            Node::text("", strong.clone()),
            Node::text("c", strong),
        ]);
        assert_eq!(frag.child_count(), 2);
        assert_eq!(frag.size(), 3);
    }

    #[test]
    fn test_cut_and_find_index() {
        let schema = Schema::basic();
        let doc = schema.element("doc", Attrs::new(), vec![para(&schema, "ab"), para(&schema, "cd")]);
        assert_eq!(doc.content().find_index(4), (1, 4));
        assert_eq!(doc.content().find_index(5), (1, 4));
        let cut = doc.content().cut(2, 6);
        assert_eq!(
            cut.iter().map(|n| n.to_string()).collect::<Vec<_>>(),
            vec!["paragraph(\"b\")", "paragraph(\"c\")"]
        );
    }

    #[test]
    fn test_mark_set_slots() {
        let unknown = |name: &str| {
            Mark::new(UNKNOWN_MARK).with_attr("name", Value::String(name.into()))
        };
        let set = Mark::new("strong").add_to_set(&[]);
        let set = unknown("underline").add_to_set(&set);
        let set = unknown("spoiler").add_to_set(&set);
        let set = Mark::new("em").add_to_set(&set);
        assert_eq!(set.len(), 4);
        assert_eq!(set[0].mark_type, "em");
        let set = unknown("underline").remove_from_set(&set);
        assert_eq!(set.len(), 3);
        assert!(Mark::new("strong").is_in_set(&set));
    }

    #[test]
    fn test_display() {
        let schema = Schema::basic();
        let mut attrs = schema.default_attrs("heading");
        attrs.insert(IS_AMG_BLOCK.into(), Value::Bool(true));
        let heading = schema.element(
            "heading",
            attrs,
            vec![Node::text("Hi", vec![Mark::new("strong")])],
        );
        assert_eq!(heading.to_string(), "heading*{level=1}(\"Hi\"[strong])");
    }
}
