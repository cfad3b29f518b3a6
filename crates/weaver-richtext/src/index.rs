//! Translation between linear indices and tree positions.
//!
//! Both coordinate systems are derived from one traversal event stream:
//! text advances both, block markers advance only the linear index and tree
//! tags advance only the tree position.

use crate::error::Result;
use crate::schema::Schema;
use crate::span::Span;
use crate::traversal::{TraversalEvent, traverse_node, traverse_spans};
use crate::tree::Node;

/// A linear index and a tree position taken at the same point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexPair {
    pub lin: usize,
    pub tree: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexedEvent {
    pub event: TraversalEvent,
    pub before: IndexPair,
    pub after: IndexPair,
}

/// Annotates events with the indices before and after each one.
pub fn events_with_index_changes<I>(events: I) -> Vec<IndexedEvent>
where
    I: IntoIterator<Item = TraversalEvent>,
{
    let mut at = IndexPair::default();
    events
        .into_iter()
        .map(|event| {
            let before = at;
            match &event {
                TraversalEvent::Text { value, .. } => {
                    let len = value.chars().count();
                    at.lin += len;
                    at.tree += len;
                }
                TraversalEvent::Block { .. } => at.lin += 1,
                TraversalEvent::OpenTag { .. }
                | TraversalEvent::CloseTag { .. }
                | TraversalEvent::LeafNode { .. } => at.tree += 1,
            }
            IndexedEvent {
                event,
                before,
                after: at,
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct IndexTranslator {
    events: Vec<IndexedEvent>,
    /// Whether the point after each event lies directly inside a textblock.
    inside: Vec<bool>,
}

impl IndexTranslator {
    pub fn new(schema: &Schema, events: Vec<TraversalEvent>) -> Self {
        let events = events_with_index_changes(events);
        let mut open: Vec<bool> = Vec::new();
        let inside = events
            .iter()
            .map(|e| {
                match &e.event {
                    TraversalEvent::OpenTag { tag, .. } => open.push(schema.is_textblock(tag)),
                    TraversalEvent::CloseTag { .. } => {
                        open.pop();
                    }
                    _ => {}
                }
                open.last().copied().unwrap_or(false)
            })
            .collect();
        Self { events, inside }
    }

    pub fn from_spans(schema: &Schema, spans: &[Span]) -> Self {
        Self::new(schema, traverse_spans(schema, spans))
    }

    pub fn from_tree(schema: &Schema, doc: &Node) -> Result<Self> {
        Ok(Self::new(schema, traverse_node(schema, doc)?))
    }

    pub fn events(&self) -> &[IndexedEvent] {
        &self.events
    }

    /// Total linear length covered by the events.
    pub fn linear_len(&self) -> usize {
        self.events.last().map_or(0, |e| e.after.lin)
    }

    /// Tree position for a linear index, preferring positions inside text.
    ///
    /// Indices past the end are clamped.
    pub fn lin_to_tree(&self, lin: usize) -> usize {
        let mut best = None;
        let mut fallback = 0;
        for (e, inside) in self.events.iter().zip(&self.inside) {
            if is_text(e) && e.before.lin <= lin && lin < e.after.lin {
                return e.before.tree + (lin - e.before.lin);
            }
            if e.after.lin > lin {
                break;
            }
            fallback = e.after.tree;
            if *inside {
                best = Some(e.after.tree);
            }
        }
        if lin > self.linear_len() {
            tracing::trace!(target: "weaver::index", lin, "linear index past end, clamping");
        }
        best.unwrap_or(fallback)
    }

    /// The exact tree position where text at `lin` would go, if there is one.
    pub fn text_position(&self, lin: usize) -> Option<usize> {
        let mut found = None;
        for (e, inside) in self.events.iter().zip(&self.inside) {
            if e.before.lin > lin {
                break;
            }
            if is_text(e) && e.before.lin <= lin && lin <= e.after.lin {
                found = Some(e.before.tree + (lin - e.before.lin));
            } else if *inside && e.after.lin == lin {
                found = Some(e.after.tree);
            }
        }
        found
    }

    /// Linear index for a tree position.
    pub fn tree_to_lin(&self, pos: usize) -> usize {
        for e in &self.events {
            if e.before.tree == pos {
                return e.before.lin;
            }
            if is_text(e) && e.before.tree < pos && pos < e.after.tree {
                return e.before.lin + (pos - e.before.tree);
            }
        }
        self.linear_len()
    }

    /// Linear range for a tree range. The end never precedes the start.
    pub fn tree_range_to_lin(&self, from: usize, to: usize) -> (usize, usize) {
        let mut start = None;
        let mut end = None;
        for e in &self.events {
            for (pos, slot) in [(from, &mut start), (to, &mut end)] {
                if slot.is_some() {
                    continue;
                }
                if e.before.tree == pos {
                    *slot = Some(e.before.lin);
                } else if is_text(e) && e.before.tree < pos && pos < e.after.tree {
                    *slot = Some(e.before.lin + (pos - e.before.tree));
                }
            }
            if start.is_some() && end.is_some() {
                break;
            }
        }
        let total = self.linear_len();
        let start = start.unwrap_or(total);
        (start, end.unwrap_or(total).max(start))
    }

    /// Tree position at the start of the content of the block whose marker
    /// sits at `lin`.
    pub fn lin_to_tree_block_start(&self, lin: usize) -> usize {
        let marker = self
            .events
            .iter()
            .position(|e| matches!(e.event, TraversalEvent::Block { .. }) && e.before.lin == lin);
        if let Some(at) = marker {
            for (e, inside) in self.events[at..].iter().zip(&self.inside[at..]).skip(1) {
                if matches!(e.event, TraversalEvent::Block { .. }) {
                    break;
                }
                if *inside {
                    return e.after.tree;
                }
            }
        }
        self.lin_to_tree(lin + 1)
    }

    /// Tree range for a linear range that spans only text in one textblock.
    pub fn text_range(&self, start: usize, end: usize) -> Option<(usize, usize)> {
        let from = self.text_position(start)?;
        let to = self.text_position(end)?;
        let structural = self.events.iter().any(|e| match e.event {
            TraversalEvent::Text { .. } => false,
            TraversalEvent::Block { .. } => e.before.lin >= start && e.before.lin < end,
            _ => e.before.lin > start && e.before.lin < end,
        });
        (!structural && to >= from && to - from == end - start).then_some((from, to))
    }
}

fn is_text(e: &IndexedEvent) -> bool {
    matches!(e.event, TraversalEvent::Text { .. })
}
