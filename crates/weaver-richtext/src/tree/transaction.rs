//! Editor state, selections and transactions.

use super::node::{Mark, Node, Slice};
use super::resolved::ResolvedPos;
use super::step::Step;
use crate::error::Result;
use crate::schema::Schema;

/// A text selection between two document positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    pub anchor: usize,
    pub head: usize,
}

impl Selection {
    pub fn new(anchor: usize, head: usize) -> Self {
        Self { anchor, head }
    }

    pub fn cursor(pos: usize) -> Self {
        Self::new(pos, pos)
    }

    pub fn from(&self) -> usize {
        self.anchor.min(self.head)
    }

    pub fn to(&self) -> usize {
        self.anchor.max(self.head)
    }

    pub fn is_empty(&self) -> bool {
        self.anchor == self.head
    }

    pub fn map(&self, step: &Step) -> Self {
        if self.is_empty() {
            return Self::cursor(step.map(self.head, 1));
        }
        Self::new(step.map(self.anchor, 1), step.map(self.head, -1))
    }

    /// Whether both ends resolve to positions inside inline content.
    pub fn fits(&self, schema: &Schema, doc: &Node) -> bool {
        [self.anchor, self.head].into_iter().all(|pos| {
            ResolvedPos::resolve(doc, pos)
                .is_ok_and(|r| schema.is_textblock(r.parent().node_type()))
        })
    }

    /// A cursor at the start of the first textblock.
    pub fn at_start(schema: &Schema, doc: &Node) -> Self {
        let mut pos = 0;
        let mut node = doc;
        while !schema.is_textblock(node.node_type()) {
            match node.child(0) {
                Some(child) if !child.is_text() && !child.is_leaf() => {
                    pos += 1;
                    node = child;
                }
                _ => break,
            }
        }
        Self::cursor(pos)
    }
}

/// Where a transaction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Origin {
    #[default]
    Local,
    /// Derived from replicated-document patches.
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionMeta {
    /// Whether undo history should record this transaction.
    pub add_to_history: bool,
    pub origin: Origin,
}

impl Default for TransactionMeta {
    fn default() -> Self {
        Self {
            add_to_history: true,
            origin: Origin::Local,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditorState {
    pub doc: Node,
    pub selection: Selection,
}

impl EditorState {
    pub fn new(doc: Node) -> Self {
        Self {
            doc,
            selection: Selection::default(),
        }
    }

    pub fn apply(&self, tr: &Transaction) -> EditorState {
        EditorState {
            doc: tr.doc().clone(),
            selection: tr.selection(),
        }
    }
}

/// A batch of steps applied on top of an editor state.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    /// `docs[0]` is the starting document, `docs[i + 1]` the result of step `i`.
    docs: Vec<Node>,
    steps: Vec<Step>,
    selection: Selection,
    pub meta: TransactionMeta,
}

impl Transaction {
    pub fn new(state: &EditorState) -> Self {
        Self {
            docs: vec![state.doc.clone()],
            steps: Vec::new(),
            selection: state.selection,
            meta: TransactionMeta::default(),
        }
    }

    pub fn before(&self) -> &Node {
        &self.docs[0]
    }

    pub fn doc(&self) -> &Node {
        &self.docs[self.docs.len() - 1]
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Document the step at `index` was applied to.
    pub fn doc_before_step(&self, index: usize) -> &Node {
        &self.docs[index.min(self.docs.len() - 1)]
    }

    /// Document produced by the step at `index`.
    pub fn doc_after_step(&self, index: usize) -> &Node {
        &self.docs[(index + 1).min(self.docs.len() - 1)]
    }

    pub fn doc_changed(&self) -> bool {
        !self.steps.is_empty()
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn set_selection(&mut self, selection: Selection) -> &mut Self {
        self.selection = selection;
        self
    }

    pub fn set_add_to_history(&mut self, add: bool) -> &mut Self {
        self.meta.add_to_history = add;
        self
    }

    pub fn step(&mut self, schema: &Schema, step: Step) -> Result<&mut Self> {
        let doc = step.apply(schema, self.doc())?;
        self.selection = self.selection.map(&step);
        self.docs.push(doc);
        self.steps.push(step);
        Ok(self)
    }

    pub fn replace(
        &mut self,
        schema: &Schema,
        from: usize,
        to: usize,
        slice: Slice,
    ) -> Result<&mut Self> {
        self.step(schema, Step::Replace { from, to, slice })
    }

    pub fn insert_text(
        &mut self,
        schema: &Schema,
        pos: usize,
        text: &str,
        marks: Vec<Mark>,
    ) -> Result<&mut Self> {
        self.replace(schema, pos, pos, Slice::closed(vec![Node::text(text, marks)]))
    }

    pub fn delete(&mut self, schema: &Schema, from: usize, to: usize) -> Result<&mut Self> {
        self.replace(schema, from, to, Slice::empty())
    }

    pub fn add_mark(
        &mut self,
        schema: &Schema,
        from: usize,
        to: usize,
        mark: Mark,
    ) -> Result<&mut Self> {
        self.step(schema, Step::AddMark { from, to, mark })
    }

    pub fn remove_mark(
        &mut self,
        schema: &Schema,
        from: usize,
        to: usize,
        mark: Mark,
    ) -> Result<&mut Self> {
        self.step(schema, Step::RemoveMark { from, to, mark })
    }

    /// Adds a replace step turning the current document into `target`.
    ///
    /// Returns false when the documents are already equal.
    pub fn replace_with(&mut self, schema: &Schema, target: &Node) -> Result<bool> {
        match diff_step(schema, self.doc(), target)? {
            Some(step) => {
                self.step(schema, step)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Transaction {
    /// Replays this transaction's steps on `state`, whose document is this
    /// transaction's starting document changed by `over`.
    ///
    /// Returns `None` when a step's range was touched by `over` or no longer
    /// applies.
    pub fn rebase(&self, schema: &Schema, state: &EditorState, over: &[Step]) -> Option<Transaction> {
        let mut out = Transaction::new(state);
        out.meta = self.meta.clone();
        let map = |pos: usize, assoc: i8, upto: usize, rebased: &[Step]| {
            let pos = self.steps[..upto].iter().rev().fold(pos, |p, s| s.unmap(p, assoc));
            let pos = over.iter().fold(pos, |p, s| s.map(p, assoc));
            rebased.iter().fold(pos, |p, s| s.map(p, assoc))
        };
        for (i, step) in self.steps.iter().enumerate() {
            let moved = step.mapped(|pos, assoc| map(pos, assoc, i, out.steps()));
            let (from, to) = step.range();
            let (mfrom, mto) = moved.range();
            if mfrom > mto || mto - mfrom != to - from {
                tracing::debug!(target: "weaver::tree", ?step, "step range changed underneath");
                return None;
            }
            if let Err(err) = out.step(schema, moved) {
                tracing::debug!(target: "weaver::tree", %err, "rebased step no longer applies");
                return None;
            }
        }
        let selection = self.selection;
        let n = self.steps.len();
        let rebased = out.steps().to_vec();
        out.set_selection(Selection::new(
            map(selection.anchor, 1, n, &rebased),
            map(selection.head, 1, n, &rebased),
        ));
        Some(out)
    }
}

/// A single replace step turning `a` into `b`, covering only the part of
/// the documents that differs.
pub fn diff_step(schema: &Schema, a: &Node, b: &Node) -> Result<Option<Step>> {
    let Some(start) = a.content().find_diff_start(b.content(), 0) else {
        return Ok(None);
    };
    let (mut end_a, mut end_b) = a
        .content()
        .find_diff_end(b.content(), a.content_size(), b.content_size())
        .unwrap_or((a.content_size(), b.content_size()));
    let overlap = start.saturating_sub(end_a.min(end_b));
    if overlap > 0 {
        end_a += overlap;
        end_b += overlap;
    }
    let candidate = b.slice(start, end_b).map(|slice| Step::Replace {
        from: start,
        to: end_a,
        slice,
    });
    if let Ok(step) = candidate {
        if step.apply(schema, a).is_ok_and(|out| out == *b) {
            return Ok(Some(step));
        }
    }
    tracing::debug!(
        target: "weaver::tree",
        start,
        "narrow replace did not reproduce the target, replacing whole document content"
    );
    Ok(Some(Step::Replace {
        from: 0,
        to: a.content_size(),
        slice: Slice::new(b.content().clone(), 0, 0),
    }))
}

impl Node {
    /// The content between two positions as an open slice.
    pub fn slice(&self, from: usize, to: usize) -> Result<Slice> {
        if from >= to {
            return Ok(Slice::empty());
        }
        let rfrom = super::ResolvedPos::resolve(self, from)?;
        let rto = super::ResolvedPos::resolve(self, to)?;
        let depth = rfrom.shared_depth(to);
        let start = rfrom.start(depth);
        let node = rfrom.node(depth);
        let content = node.content().cut(from - start, to - start);
        Ok(Slice::new(
            content,
            rfrom.depth() - depth,
            rto.depth() - depth,
        ))
    }
}
