//! Traversal between spans and trees.
//!
//! Both directions produce the same flat event stream: open and close tags,
//! leaves, text runs and block markers. Every tag is tagged with a [`Role`]
//! telling whether it corresponds to a stored block marker or exists only to
//! satisfy the schema. A tree is built by folding events, spans are recovered
//! by keeping only the text and block events.

use smol_str::SmolStr;

use crate::content::ContentMatch;
use crate::error::{Result, RichTextError};
use crate::schema::{
    DOC, Schema, TEXT, UNKNOWN_BLOCK, UNKNOWN_BLOCK_NODE, UNKNOWN_LEAF_NODE, UNKNOWN_PARENT_BLOCK,
};
use crate::span::{Attrs, BlockMarker, Marks, Span, is_mark_active, normalize};
use crate::tree::{Element, Node};

/// Whether a tag corresponds to a stored block marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Backed by a block marker in the span sequence.
    Explicit,
    /// Synthesized to make the tree valid; invisible in spans.
    RenderOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TraversalEvent {
    OpenTag {
        tag: SmolStr,
        role: Role,
        attrs: Attrs,
    },
    CloseTag {
        tag: SmolStr,
        role: Role,
    },
    LeafNode {
        tag: SmolStr,
        role: Role,
        attrs: Attrs,
    },
    Text {
        value: String,
        marks: Marks,
    },
    Block {
        block: BlockMarker,
        /// The block type has no mapping in the schema.
        is_unknown: bool,
    },
}

// === Spans to events ===

/// An open node on the walker's stack.
#[derive(Debug, Clone)]
struct Frame<'s> {
    tag: SmolStr,
    /// Block type the frame stands for; `None` for pure wrappers.
    key: Option<SmolStr>,
    role: Role,
    matcher: ContentMatch<'s>,
}

/// A node a block needs around it.
#[derive(Debug, Clone)]
struct Wrapper {
    tag: SmolStr,
    key: Option<SmolStr>,
    attrs: Attrs,
}

impl Wrapper {
    fn plain(schema: &Schema, tag: &str) -> Self {
        Self {
            tag: tag.into(),
            key: None,
            attrs: schema.default_attrs(tag),
        }
    }

    fn matches(&self, frame: &Frame<'_>) -> bool {
        self.tag == frame.tag && self.key == frame.key
    }
}

struct SpanWalker<'s> {
    schema: &'s Schema,
    /// Matcher of the document root, which never appears on the stack.
    doc: ContentMatch<'s>,
    stack: Vec<Frame<'s>>,
    events: Vec<TraversalEvent>,
}

impl<'s> SpanWalker<'s> {
    fn new(schema: &'s Schema) -> Self {
        Self {
            schema,
            doc: schema.content_match(DOC),
            stack: Vec::new(),
            events: Vec::new(),
        }
    }

    fn matcher(&self) -> ContentMatch<'s> {
        self.stack.last().map_or(self.doc, |f| f.matcher)
    }

    fn advance(&mut self, node_type: &str) {
        let Some(next) = self.matcher().match_type(node_type) else {
            return;
        };
        match self.stack.last_mut() {
            Some(frame) => frame.matcher = next,
            None => self.doc = next,
        }
    }

    /// Nodes the block's ancestry requires, outermost first.
    fn chain_for(&self, marker: &BlockMarker) -> Vec<Wrapper> {
        let schema = self.schema;
        let mut chain = Vec::new();
        for parent in &marker.parents {
            match schema.mapping_for_block(parent) {
                Some(mapping) if mapping.is_embed => {
                    tracing::debug!(target: "weaver::traversal", %parent, "embed listed as a parent, skipping");
                }
                Some(mapping) => {
                    if let Some(outer) = &mapping.outer {
                        chain.push(Wrapper::plain(schema, outer));
                    }
                    chain.push(Wrapper {
                        tag: mapping.node_type.clone(),
                        key: Some(parent.clone()),
                        attrs: schema.default_attrs(&mapping.node_type),
                    });
                }
                None => chain.push(Wrapper {
                    tag: UNKNOWN_BLOCK_NODE.into(),
                    key: Some(parent.clone()),
                    attrs: schema.unknown_parent_attrs(parent),
                }),
            }
        }
        if let Some(outer) = schema
            .mapping_for_block(&marker.block_type)
            .and_then(|m| m.outer.as_ref())
        {
            chain.push(Wrapper::plain(schema, outer));
        }
        chain
    }

    fn block(&mut self, marker: &BlockMarker) {
        let schema = self.schema;
        let mapping = schema.mapping_for_block(&marker.block_type);
        let is_embed = mapping.map_or(marker.is_embed, |m| m.is_embed || marker.is_embed);
        let chain = self.chain_for(marker);

        let matched = self
            .stack
            .iter()
            .zip(&chain)
            .take_while(|(frame, wrapper)| wrapper.matches(frame))
            .count();
        let mut keep = matched;
        // An embed continues the textblock it follows.
        if is_embed
            && matched == chain.len()
            && self.stack.len() == matched + 1
            && self
                .stack
                .last()
                .is_some_and(|f| schema.is_textblock(&f.tag))
        {
            keep += 1;
        }
        self.close_to(keep);
        for wrapper in &chain[matched..] {
            self.open(
                wrapper.tag.clone(),
                wrapper.key.clone(),
                Role::RenderOnly,
                wrapper.attrs.clone(),
            );
        }

        let (node_type, attrs) = schema.node_for_block(marker);
        self.events.push(TraversalEvent::Block {
            block: marker.clone(),
            is_unknown: mapping.is_none(),
        });
        if is_embed {
            self.make_room(&node_type);
            self.events.push(TraversalEvent::LeafNode {
                tag: node_type,
                role: Role::Explicit,
                attrs,
            });
        } else {
            self.open(
                node_type,
                Some(marker.block_type.clone()),
                Role::Explicit,
                attrs,
            );
        }
    }

    fn text(&mut self, value: &str, marks: &Marks) {
        if value.is_empty() {
            return;
        }
        self.make_room(TEXT);
        let marks = marks
            .iter()
            .filter(|(_, v)| is_mark_active(v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.events.push(TraversalEvent::Text {
            value: value.to_string(),
            marks,
        });
    }

    /// Makes the innermost open node ready to accept `node_type` next.
    ///
    /// Tries filler nodes first, then wrapper nodes, then closes the
    /// innermost node and tries again one level up.
    fn make_room(&mut self, node_type: &str) {
        loop {
            let m = self.matcher();
            if let Some(fill) = m.fill_before(self.schema, &[node_type], false) {
                for ty in &fill {
                    self.emit_filled(ty);
                }
                self.advance(node_type);
                return;
            }
            if let Some(wrapping) = m.find_wrapping(self.schema, node_type) {
                for ty in wrapping {
                    let attrs = self.schema.default_attrs(&ty);
                    self.open(ty, None, Role::RenderOnly, attrs);
                }
                self.advance(node_type);
                return;
            }
            if self.stack.is_empty() {
                tracing::warn!(
                    target: "weaver::traversal",
                    node_type,
                    "no valid place for node, emitting it unchecked"
                );
                return;
            }
            self.close_top();
        }
    }

    fn open(&mut self, tag: SmolStr, key: Option<SmolStr>, role: Role, attrs: Attrs) {
        self.make_room(&tag);
        self.events.push(TraversalEvent::OpenTag {
            tag: tag.clone(),
            role,
            attrs,
        });
        self.stack.push(Frame {
            matcher: self.schema.content_match(&tag),
            tag,
            key,
            role,
        });
    }

    /// Emits a filler node with its minimal content.
    fn emit_filled(&mut self, node_type: &str) {
        let Some(node) = self.schema.create_and_fill(node_type) else {
            return;
        };
        self.advance(node_type);
        emit_render_only(self.schema, &node, &mut self.events);
    }

    fn close_top(&mut self) {
        let Some(frame) = self.stack.pop() else {
            return;
        };
        self.fill_end(frame.matcher);
        self.events.push(TraversalEvent::CloseTag {
            tag: frame.tag,
            role: frame.role,
        });
    }

    fn fill_end(&mut self, matcher: ContentMatch<'s>) {
        let fill = matcher.fill_before(self.schema, &[], true).unwrap_or_default();
        for ty in &fill {
            if let Some(node) = self.schema.create_and_fill(ty) {
                emit_render_only(self.schema, &node, &mut self.events);
            }
        }
    }

    fn close_to(&mut self, depth: usize) {
        while self.stack.len() > depth {
            self.close_top();
        }
    }

    fn finish(mut self) -> Vec<TraversalEvent> {
        self.close_to(0);
        self.fill_end(self.doc);
        self.events
    }
}

fn emit_render_only(schema: &Schema, node: &Node, events: &mut Vec<TraversalEvent>) {
    match node {
        Node::Text(t) => events.push(TraversalEvent::Text {
            value: t.text.clone(),
            marks: schema.marks_to_span(&t.marks),
        }),
        Node::Element(e) if e.leaf => events.push(TraversalEvent::LeafNode {
            tag: e.node_type.clone(),
            role: Role::RenderOnly,
            attrs: e.attrs.clone(),
        }),
        Node::Element(e) => {
            events.push(TraversalEvent::OpenTag {
                tag: e.node_type.clone(),
                role: Role::RenderOnly,
                attrs: e.attrs.clone(),
            });
            for child in e.content.iter() {
                emit_render_only(schema, child, events);
            }
            events.push(TraversalEvent::CloseTag {
                tag: e.node_type.clone(),
                role: Role::RenderOnly,
            });
        }
    }
}

/// Events for a span sequence, with every node the schema requires.
///
/// An empty sequence yields a single empty render-only paragraph.
pub fn traverse_spans(schema: &Schema, spans: &[Span]) -> Vec<TraversalEvent> {
    let mut walker = SpanWalker::new(schema);
    for span in spans {
        match span {
            Span::Text { value, marks } => walker.text(value, marks),
            Span::Block(marker) => walker.block(marker),
        }
    }
    walker.finish()
}

// === Tree to events ===

/// What the first content of a container turns out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FirstContent {
    Explicit,
    TextWrapper,
    Nothing,
}

struct Ancestor {
    node_type: SmolStr,
    block_type: Option<SmolStr>,
}

enum Work<'a> {
    Enter { parent: &'a Element, index: usize },
    Exit { tag: SmolStr, role: Role },
}

struct NodeWalker<'s> {
    schema: &'s Schema,
}

impl NodeWalker<'_> {
    fn walk(&self, doc: &Element) -> Result<Vec<TraversalEvent>> {
        let schema = self.schema;
        let mut events = Vec::new();
        let mut ancestors: Vec<Ancestor> = Vec::new();
        let mut work: Vec<Work<'_>> = (0..doc.content.child_count())
            .rev()
            .map(|index| Work::Enter { parent: doc, index })
            .collect();

        while let Some(item) = work.pop() {
            let (parent, index) = match item {
                Work::Exit { tag, role } => {
                    events.push(TraversalEvent::CloseTag { tag, role });
                    ancestors.pop();
                    continue;
                }
                Work::Enter { parent, index } => (parent, index),
            };
            let Some(node) = parent.content.child(index) else {
                continue;
            };
            let element = match node {
                Node::Text(t) => {
                    events.push(TraversalEvent::Text {
                        value: t.text.clone(),
                        marks: schema.marks_to_span(&t.marks),
                    });
                    continue;
                }
                Node::Element(e) => e,
            };

            let role = self.classify(parent, index, element)?;
            if role == Role::Explicit {
                let parents = self.parents_for(&ancestors, element);
                let block = schema.block_for_node(
                    &element.node_type,
                    &element.attrs,
                    Some(&parent.node_type),
                    parents,
                )?;
                events.push(TraversalEvent::Block {
                    is_unknown: schema.mapping_for_block(&block.block_type).is_none(),
                    block,
                });
            }
            if element.leaf {
                events.push(TraversalEvent::LeafNode {
                    tag: element.node_type.clone(),
                    role,
                    attrs: element.attrs.clone(),
                });
                continue;
            }
            events.push(TraversalEvent::OpenTag {
                tag: element.node_type.clone(),
                role,
                attrs: element.attrs.clone(),
            });
            ancestors.push(Ancestor {
                node_type: element.node_type.clone(),
                block_type: self.block_type_of(parent, element, role),
            });
            work.push(Work::Exit {
                tag: element.node_type.clone(),
                role,
            });
            for i in (0..element.content.child_count()).rev() {
                work.push(Work::Enter {
                    parent: element,
                    index: i,
                });
            }
        }
        Ok(events)
    }

    /// Decides whether a node stands for a block marker.
    fn classify(&self, parent: &Element, index: usize, node: &Element) -> Result<Role> {
        let schema = self.schema;
        let is_unknown_type =
            node.node_type == UNKNOWN_BLOCK_NODE || node.node_type == UNKNOWN_LEAF_NODE;
        if node.is_amg_block() {
            if !is_unknown_type && !schema.has_mapping(&node.node_type) {
                return Err(RichTextError::SchemaMapping {
                    node_type: node.node_type.clone(),
                });
            }
            return Ok(Role::Explicit);
        }
        if node.node_type == UNKNOWN_LEAF_NODE {
            return Ok(Role::Explicit);
        }
        if node.node_type == UNKNOWN_BLOCK_NODE {
            let named = node.attr(UNKNOWN_BLOCK).is_some_and(|v| !v.is_null());
            let parent_named = node.attr(UNKNOWN_PARENT_BLOCK).is_some_and(|v| !v.is_null());
            return Ok(if named && !parent_named {
                Role::Explicit
            } else {
                Role::RenderOnly
            });
        }
        let Some(mapping) = schema.resolve_mapping(&node.node_type, Some(&parent.node_type))
        else {
            return Ok(Role::RenderOnly);
        };
        if mapping.is_embed {
            return Ok(Role::Explicit);
        }
        if schema.is_textblock(&node.node_type) {
            return Ok(if self.inferable_textblock(parent, index, node) {
                Role::RenderOnly
            } else {
                Role::Explicit
            });
        }
        if index > 0 {
            if let Some(Node::Element(prev)) = parent.content.child(index - 1) {
                if prev.node_type == node.node_type {
                    return Ok(Role::Explicit);
                }
            }
        }
        Ok(match self.first_explicit(node)? {
            FirstContent::Explicit => Role::RenderOnly,
            FirstContent::TextWrapper | FirstContent::Nothing => Role::Explicit,
        })
    }

    /// A textblock without a marker is one the forward direction would have
    /// synthesized in the same place.
    fn inferable_textblock(&self, parent: &Element, index: usize, node: &Element) -> bool {
        let schema = self.schema;
        let start = schema.content_match(&parent.node_type);
        let is_default = start
            .default_type(schema)
            .is_some_and(|t| *t == node.node_type);
        if !is_default || !schema.has_default_attrs(&node.node_type, &node.attrs) {
            return false;
        }
        // Wrapping around an embed.
        if matches!(node.content.first_child(), Some(Node::Element(leaf)) if leaf.leaf) {
            return true;
        }
        if index != 0 {
            return false;
        }
        if !node.content.is_empty() {
            return true;
        }
        match parent.content.child(1) {
            Some(next) => start.match_type(next.node_type()).is_none(),
            None => !start.valid_end(),
        }
    }

    /// Finds the first content of a container that decides its role.
    /// Empty render-only textblocks are fillers and are skipped.
    fn first_explicit(&self, node: &Element) -> Result<FirstContent> {
        let schema = self.schema;
        let mut current = node;
        'descend: loop {
            for (index, child) in current.content.iter().enumerate() {
                let Node::Element(child) = child else {
                    return Ok(FirstContent::TextWrapper);
                };
                match self.classify(current, index, child)? {
                    Role::Explicit => return Ok(FirstContent::Explicit),
                    Role::RenderOnly if schema.is_textblock(&child.node_type) => {
                        match child.content.first_child() {
                            None => continue,
                            Some(Node::Element(leaf)) if leaf.leaf => {
                                return Ok(FirstContent::Explicit);
                            }
                            Some(_) => return Ok(FirstContent::TextWrapper),
                        }
                    }
                    Role::RenderOnly => {
                        current = child;
                        continue 'descend;
                    }
                }
            }
            return Ok(FirstContent::Nothing);
        }
    }

    fn block_type_of(&self, parent: &Element, node: &Element, role: Role) -> Option<SmolStr> {
        if node.node_type == UNKNOWN_BLOCK_NODE {
            let own = node.attr(UNKNOWN_BLOCK).and_then(|v| v.as_str());
            let inherited = node.attr(UNKNOWN_PARENT_BLOCK).and_then(|v| v.as_str());
            let name = if role == Role::Explicit {
                own.or(inherited)
            } else {
                inherited.or(own)
            };
            return name.map(SmolStr::new);
        }
        self.schema
            .resolve_mapping(&node.node_type, Some(&parent.node_type))
            .map(|m| m.block_type.clone())
    }

    fn parents_for(&self, ancestors: &[Ancestor], node: &Element) -> Vec<SmolStr> {
        let mut scope = ancestors;
        if node.leaf {
            if let Some((last, rest)) = ancestors.split_last() {
                if self.schema.is_textblock(&last.node_type) {
                    scope = rest;
                }
            }
        }
        scope.iter().filter_map(|a| a.block_type.clone()).collect()
    }
}

/// Events for a document tree.
///
/// Fails with [`RichTextError::SchemaMapping`] when a node flagged as an
/// explicit block has no mapping.
pub fn traverse_node(schema: &Schema, doc: &Node) -> Result<Vec<TraversalEvent>> {
    match doc.as_element() {
        Some(root) => NodeWalker { schema }.walk(root),
        None => Ok(Vec::new()),
    }
}

// === Folding events ===

/// Builds a document from an event stream.
pub fn tree_from_events(schema: &Schema, events: &[TraversalEvent]) -> Node {
    let mut stack: Vec<(SmolStr, Attrs, Vec<Node>)> = vec![(DOC.into(), Attrs::new(), Vec::new())];
    let close = |stack: &mut Vec<(SmolStr, Attrs, Vec<Node>)>| {
        if stack.len() < 2 {
            return;
        }
        if let Some((tag, attrs, content)) = stack.pop() {
            let node = schema.element(&tag, attrs, content);
            if let Some(top) = stack.last_mut() {
                top.2.push(node);
            }
        }
    };
    for event in events {
        match event {
            TraversalEvent::OpenTag { tag, attrs, .. } => {
                stack.push((tag.clone(), attrs.clone(), Vec::new()));
            }
            TraversalEvent::CloseTag { .. } => close(&mut stack),
            TraversalEvent::LeafNode { tag, attrs, .. } => {
                if let Some(top) = stack.last_mut() {
                    top.2.push(schema.element(tag, attrs.clone(), Vec::new()));
                }
            }
            TraversalEvent::Text { value, marks } => {
                if let Some(top) = stack.last_mut() {
                    let marks = if schema.allows_marks(&top.0) {
                        schema.marks_from_span(marks)
                    } else {
                        Vec::new()
                    };
                    top.2.push(Node::text(value.clone(), marks));
                }
            }
            TraversalEvent::Block { .. } => {}
        }
    }
    while stack.len() > 1 {
        close(&mut stack);
    }
    let content = stack.pop().map(|(_, _, c)| c).unwrap_or_default();
    schema.element(DOC, Attrs::new(), content)
}

/// Spans carried by an event stream, in canonical form.
pub fn spans_from_events(events: &[TraversalEvent]) -> Vec<Span> {
    let mut spans: Vec<Span> = events
        .iter()
        .filter_map(|event| match event {
            TraversalEvent::Text { value, marks } => Some(Span::Text {
                value: value.clone(),
                marks: marks.clone(),
            }),
            TraversalEvent::Block { block, .. } => Some(Span::Block(block.clone())),
            _ => None,
        })
        .collect();
    normalize(&mut spans);
    spans
}

pub fn tree_from_spans(schema: &Schema, spans: &[Span]) -> Node {
    tree_from_events(schema, &traverse_spans(schema, spans))
}

pub fn spans_from_tree(schema: &Schema, doc: &Node) -> Result<Vec<Span>> {
    Ok(spans_from_events(&traverse_node(schema, doc)?))
}
