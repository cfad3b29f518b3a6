//! Turns tree transactions into linear operations.
//!
//! Mark steps and plain text replacements inside one textblock translate
//! directly. Every other step is handled by diffing the spans of the
//! document before and after it.

use smol_str::SmolStr;

use crate::error::Result;
use crate::index::IndexTranslator;
use crate::patch::LinearOp;
use crate::schema::Schema;
use crate::span::{BlockMarker, Marks, Span, normalize};
use crate::span_patcher::splice_text;
use crate::traversal::spans_from_tree;
use crate::tree::{Node, ResolvedPos, Slice, Step, Transaction};

/// Above this many cells the diff falls back to replacing the whole
/// changed middle.
const MAX_DIFF_CELLS: usize = 1 << 22;

/// Linear operations equivalent to the steps of `tr`.
///
/// `before` must be the spans of `tr`'s starting document.
pub fn transaction_to_ops(
    schema: &Schema,
    before: &[Span],
    tr: &Transaction,
) -> Result<Vec<LinearOp>> {
    let mut spans = before.to_vec();
    let mut ops = Vec::new();
    for (i, step) in tr.steps().iter().enumerate() {
        let doc_before = tr.doc_before_step(i);
        let doc_after = tr.doc_after_step(i);
        let after = spans_from_tree(schema, doc_after)?;
        match step {
            Step::AddMark { from, to, mark } | Step::RemoveMark { from, to, mark } => {
                if doc_before == doc_after {
                    continue;
                }
                let translator = IndexTranslator::from_tree(schema, doc_before)?;
                let (start, end) = translator.tree_range_to_lin(*from, *to);
                if start < end {
                    let (name, value) = schema.mark_to_span(mark);
                    ops.push(match step {
                        Step::AddMark { .. } => LinearOp::Mark {
                            start,
                            end,
                            name,
                            value,
                        },
                        _ => LinearOp::Unmark { start, end, name },
                    });
                }
            }
            Step::Replace { from, to, slice } => {
                match text_replace(schema, doc_before, *from, *to, slice)? {
                    Some(direct) if reaches(&spans, &direct, &after) => ops.extend(direct),
                    _ => ops.extend(diff_spans(&spans, &after)),
                }
            }
        }
        spans = after;
    }
    tracing::debug!(target: "weaver::linear", steps = tr.steps().len(), ops = ops.len(), "converted transaction");
    Ok(ops)
}

/// Splices for a closed slice of text replacing text inside one textblock.
fn text_replace(
    schema: &Schema,
    doc: &Node,
    from: usize,
    to: usize,
    slice: &Slice,
) -> Result<Option<Vec<LinearOp>>> {
    if slice.open_start != 0 || slice.open_end != 0 || !slice.content.iter().all(Node::is_text) {
        return Ok(None);
    }
    let rfrom = ResolvedPos::resolve(doc, from)?;
    let rto = ResolvedPos::resolve(doc, to)?;
    let depth = rfrom.depth();
    if depth == 0
        || rto.depth() != depth
        || rfrom.start(depth) != rto.start(depth)
        || !schema.is_textblock(rfrom.parent().node_type())
    {
        return Ok(None);
    }
    let start = rfrom.start(depth);
    let removed = rfrom.parent().content().cut(from - start, to - start);
    if !removed.iter().all(Node::is_text) {
        return Ok(None);
    }

    let translator = IndexTranslator::from_tree(schema, doc)?;
    let index = translator.tree_to_lin(from);
    let mut ops = Vec::new();
    let mut at = index;
    let mut delete = to - from;
    for node in slice.content.iter() {
        let text = node.text_str().unwrap_or_default();
        ops.push(LinearOp::Splice {
            index: at,
            delete,
            insert: text.to_string(),
            marks: schema.marks_to_span(node.marks()),
        });
        at += text.chars().count();
        delete = 0;
    }
    if ops.is_empty() && delete > 0 {
        ops.push(LinearOp::Splice {
            index,
            delete,
            insert: String::new(),
            marks: Marks::new(),
        });
    }
    Ok(Some(ops))
}

/// Whether splicing `ops` into `spans` gives `after`. Text typed into or
/// removed from an inferred textblock can change which blocks the tree
/// implies, and then a plain splice is not enough.
fn reaches(spans: &[Span], ops: &[LinearOp], after: &[Span]) -> bool {
    let mut out = spans.to_vec();
    for op in ops {
        let LinearOp::Splice {
            index,
            delete,
            insert,
            marks,
        } = op
        else {
            return false;
        };
        if splice_text(&mut out, *index, *delete, insert, marks).is_err() {
            return false;
        }
    }
    normalize(&mut out);
    out == after
}

// === Span diff ===

#[derive(Debug, Clone, Copy, PartialEq)]
enum Unit<'a> {
    Char(char, &'a Marks),
    Block(&'a BlockMarker),
}

impl Unit<'_> {
    /// Chars match when the characters agree, blocks match any block.
    fn matches(&self, other: &Unit<'_>) -> bool {
        match (self, other) {
            (Unit::Char(a, _), Unit::Char(b, _)) => a == b,
            (Unit::Block(_), Unit::Block(_)) => true,
            _ => false,
        }
    }
}

fn units(spans: &[Span]) -> Vec<Unit<'_>> {
    let mut out = Vec::new();
    for span in spans {
        match span {
            Span::Text { value, marks } => out.extend(value.chars().map(|c| Unit::Char(c, marks))),
            Span::Block(block) => out.push(Unit::Block(block)),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edit {
    Keep(usize, usize),
    Delete(usize),
    Insert(usize),
}

/// Edit script turning `old` into `new`. Within each run of changes all
/// deletions come before all insertions.
fn edit_script(old: &[Unit<'_>], new: &[Unit<'_>]) -> Vec<Edit> {
    let (n, m) = (old.len(), new.len());
    if (n + 1).saturating_mul(m + 1) > MAX_DIFF_CELLS {
        tracing::debug!(target: "weaver::linear", n, m, "diff too large, replacing the whole range");
        return (0..n).map(Edit::Delete).chain((0..m).map(Edit::Insert)).collect();
    }
    // lcs[i][j] is the LCS length of old[i..] and new[j..].
    let width = m + 1;
    let mut lcs = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i * width + j] = if old[i].matches(&new[j]) {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }
    let mut script = Vec::with_capacity(n.max(m));
    let mut deletes = Vec::new();
    let mut inserts = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n || j < m {
        if i < n && j < m && old[i].matches(&new[j]) {
            script.append(&mut deletes);
            script.append(&mut inserts);
            script.push(Edit::Keep(i, j));
            i += 1;
            j += 1;
        } else if j >= m || (i < n && lcs[(i + 1) * width + j] >= lcs[i * width + j + 1]) {
            deletes.push(Edit::Delete(i));
            i += 1;
        } else {
            inserts.push(Edit::Insert(j));
            j += 1;
        }
    }
    script.append(&mut deletes);
    script.append(&mut inserts);
    script
}

/// A mark change waiting to be extended over following characters.
struct PendingMark {
    start: usize,
    end: usize,
    value: Option<serde_json::Value>,
}

/// Collects edits into linear operations, tracking the index in the
/// document as it is after the operations emitted so far.
struct OpBuilder {
    ops: Vec<LinearOp>,
    index: usize,
    splice: Option<(usize, usize, String, Marks)>,
    marks: Vec<(SmolStr, PendingMark)>,
}

impl OpBuilder {
    fn new(index: usize) -> Self {
        Self {
            ops: Vec::new(),
            index,
            splice: None,
            marks: Vec::new(),
        }
    }

    fn flush_splice(&mut self) {
        if let Some((index, delete, insert, marks)) = self.splice.take() {
            self.ops.push(LinearOp::Splice {
                index,
                delete,
                insert,
                marks,
            });
        }
    }

    fn flush_marks(&mut self) {
        for (name, pending) in self.marks.drain(..) {
            self.ops.push(match pending.value {
                Some(value) => LinearOp::Mark {
                    start: pending.start,
                    end: pending.end,
                    name,
                    value,
                },
                None => LinearOp::Unmark {
                    start: pending.start,
                    end: pending.end,
                    name,
                },
            });
        }
    }

    fn flush(&mut self) {
        self.flush_marks();
        self.flush_splice();
    }

    fn delete_char(&mut self) {
        self.flush_marks();
        let here = self.index;
        if let Some((index, delete, insert, _)) = &mut self.splice {
            if *index == here && insert.is_empty() {
                *delete += 1;
                return;
            }
        }
        self.flush_splice();
        self.splice = Some((here, 1, String::new(), Marks::new()));
    }

    fn insert_char(&mut self, ch: char, marks: &Marks) {
        self.flush_marks();
        let here = self.index;
        self.index += 1;
        if let Some((index, _, insert, pending)) = &mut self.splice {
            let contiguous = *index + insert.chars().count() == here;
            if contiguous && (insert.is_empty() || *pending == *marks) {
                if insert.is_empty() {
                    *pending = marks.clone();
                }
                insert.push(ch);
                return;
            }
        }
        self.flush_splice();
        self.splice = Some((here, 0, ch.to_string(), marks.clone()));
    }

    fn delete_block(&mut self) {
        self.flush();
        self.ops.push(LinearOp::JoinBlock { index: self.index });
    }

    fn insert_block(&mut self, block: &BlockMarker) {
        self.flush();
        self.ops.push(LinearOp::SplitBlock {
            index: self.index,
            block: block.clone(),
        });
        self.index += 1;
    }

    fn keep(&mut self, old: Unit<'_>, new: Unit<'_>) {
        self.flush_splice();
        match (old, new) {
            (Unit::Block(a), Unit::Block(b)) => {
                self.flush_marks();
                if a != b {
                    self.ops.push(LinearOp::UpdateBlock {
                        index: self.index,
                        block: b.clone(),
                    });
                }
            }
            (Unit::Char(_, a), Unit::Char(_, b)) => self.mark_changes(a, b),
            _ => {}
        }
        self.index += 1;
    }

    fn mark_changes(&mut self, old: &Marks, new: &Marks) {
        let at = self.index;
        let mut changed: Vec<(SmolStr, Option<serde_json::Value>)> = Vec::new();
        for (name, value) in new {
            if old.get(name) != Some(value) {
                changed.push((name.clone(), Some(value.clone())));
            }
        }
        for name in old.keys() {
            if !new.contains_key(name) {
                changed.push((name.clone(), None));
            }
        }
        let mut open = Vec::new();
        for (name, mut pending) in std::mem::take(&mut self.marks) {
            let continues = changed
                .iter()
                .position(|(n, v)| *n == name && *v == pending.value && pending.end == at);
            match continues {
                Some(i) => {
                    changed.remove(i);
                    pending.end = at + 1;
                    open.push((name, pending));
                }
                None => self.marks.push((name, pending)),
            }
        }
        // Whatever did not continue is complete.
        self.flush_marks();
        for (name, value) in changed {
            open.push((
                name,
                PendingMark {
                    start: at,
                    end: at + 1,
                    value,
                },
            ));
        }
        self.marks = open;
    }

    fn finish(mut self) -> Vec<LinearOp> {
        self.flush();
        self.ops
    }
}

/// Linear operations turning `old` into `new`.
pub fn diff_spans(old: &[Span], new: &[Span]) -> Vec<LinearOp> {
    let old_units = units(old);
    let new_units = units(new);
    let prefix = old_units
        .iter()
        .zip(&new_units)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old_units[prefix..]
        .iter()
        .rev()
        .zip(new_units[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let old_mid = &old_units[prefix..old_units.len() - suffix];
    let new_mid = &new_units[prefix..new_units.len() - suffix];

    let mut builder = OpBuilder::new(prefix);
    for edit in edit_script(old_mid, new_mid) {
        match edit {
            Edit::Keep(i, j) => builder.keep(old_mid[i], new_mid[j]),
            Edit::Delete(i) => match old_mid[i] {
                Unit::Char(..) => builder.delete_char(),
                Unit::Block(_) => builder.delete_block(),
            },
            Edit::Insert(j) => match new_mid[j] {
                Unit::Char(ch, marks) => builder.insert_char(ch, marks),
                Unit::Block(block) => builder.insert_block(block),
            },
        }
    }
    builder.finish()
}
