//! The replicated document collaborator and a Loro-backed implementation.

use std::collections::BTreeSet;
use std::ops::Range;

use loro::{ExpandType, Frontiers, LoroDoc, LoroText, LoroValue, StyleConfig, TextDelta};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use weaver_richtext::span::is_mark_active;
use weaver_richtext::{
    BlockMarker, LinearOp, MarkRange, Marks, Patch, PatchAction, Prop, SmolStr, Span, linear_len,
    normalize, patch_spans,
};

use crate::error::{Result, SyncError};

/// Stands in for a block marker in the text.
const BLOCK_CHAR: char = '\u{FFFC}';
/// Style on a `BLOCK_CHAR` holding the marker as JSON.
const BLOCK_KEY: &str = "weaver:block";

/// A point in a replica's change history.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Heads(pub u64);

/// A replicated document holding one rich-text field.
///
/// Implementors own the authoritative span sequence and describe every
/// committed change as a list of patches.
pub trait ReplicatedDoc {
    /// Current spans of the text field.
    fn spans(&self) -> Result<Vec<Span>>;

    /// Patches that turn the document at `before` into the one at `after`.
    fn diff(&self, before: Heads, after: Heads) -> Result<Vec<Patch>>;

    /// Current heads.
    fn heads(&self) -> Heads;

    /// Spans of the text field as they were at `heads`.
    fn view(&self, heads: Heads) -> Result<Vec<Span>>;

    /// Commits a batch of operations atomically and returns the new heads.
    fn change(&mut self, ops: &[LinearOp]) -> Result<Heads>;
}

struct Change {
    patches: Vec<Patch>,
    /// Document version right after the change.
    frontiers: Frontiers,
}

/// A replica over a Loro rich-text container.
///
/// Text is stored as is with span marks as Loro styles. Each block marker
/// is one `BLOCK_CHAR` styled with the marker. Every committed change keeps
/// its patches and the document version it produced, so any two heads can
/// be diffed and any heads checked out.
pub struct LoroReplica {
    text_path: Vec<Prop>,
    doc: LoroDoc,
    text: LoroText,
    /// Style keys written so far. Fresh text is cleared of all of them.
    styles: BTreeSet<SmolStr>,
    initial: Frontiers,
    log: Vec<Change>,
}

impl LoroReplica {
    /// A replica whose text lives at `["text"]`.
    pub fn new(spans: &[Span]) -> Result<Self> {
        Self::with_path(vec![Prop::from("text")], spans)
    }

    pub fn with_path(text_path: Vec<Prop>, spans: &[Span]) -> Result<Self> {
        let doc = LoroDoc::new();
        doc.config_default_text_style(Some(StyleConfig {
            expand: ExpandType::None,
        }));
        let text = doc.get_text("text");
        let mut replica = Self {
            text_path,
            doc,
            text,
            styles: BTreeSet::from([SmolStr::new(BLOCK_KEY)]),
            initial: Frontiers::default(),
            log: Vec::new(),
        };
        let mut at = 0;
        for span in spans {
            match span {
                Span::Text { value, marks } => replica.write_text(at, value, marks)?,
                Span::Block(block) => replica.write_block(at, block)?,
            }
            at += span.len();
        }
        replica.doc.commit();
        replica.initial = replica.doc.oplog_frontiers();
        Ok(replica)
    }

    pub fn text_path(&self) -> &[Prop] {
        &self.text_path
    }

    /// The underlying Loro document, for exporting and importing updates.
    pub fn doc(&self) -> &LoroDoc {
        &self.doc
    }

    pub fn len(&self) -> usize {
        self.text.len_unicode()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write_text(&mut self, index: usize, value: &str, marks: &Marks) -> Result<()> {
        if value.is_empty() {
            return Ok(());
        }
        self.text.insert(index, value)?;
        let range = index..index + value.chars().count();
        let marks = active(marks);
        for name in self.styles.iter().filter(|n| !marks.contains_key(*n)) {
            self.text.unmark(range.clone(), name)?;
        }
        for (name, value) in &marks {
            self.style(range.clone(), name, value)?;
        }
        Ok(())
    }

    fn write_block(&mut self, index: usize, block: &BlockMarker) -> Result<()> {
        self.text.insert(index, BLOCK_CHAR.encode_utf8(&mut [0; 4]))?;
        self.set_block(index, block)
    }

    fn set_block(&mut self, index: usize, block: &BlockMarker) -> Result<()> {
        let json = serde_json::to_string(block)
            .map_err(|e| SyncError::Replica(format!("block marker does not serialize: {e}")))?;
        self.text.mark(index..index + 1, BLOCK_KEY, json)?;
        Ok(())
    }

    fn style(&mut self, range: Range<usize>, name: &SmolStr, value: &Value) -> Result<()> {
        self.styles.insert(name.clone());
        self.text.mark(range, name, value.to_string())?;
        Ok(())
    }

    /// Writes an operation that has already been checked against the spans.
    fn write(&mut self, op: &LinearOp) -> Result<()> {
        match op {
            LinearOp::Splice {
                index,
                delete,
                insert,
                marks,
            } => {
                if *delete > 0 {
                    self.text.delete(*index, *delete)?;
                }
                self.write_text(*index, insert, marks)?;
            }
            LinearOp::Mark {
                start,
                end,
                name,
                value,
            } if start < end => {
                if is_mark_active(value) {
                    self.style(*start..*end, name, value)?;
                } else {
                    self.text.unmark(*start..*end, name)?;
                }
            }
            LinearOp::Unmark { start, end, name } if start < end => {
                self.text.unmark(*start..*end, name)?;
            }
            LinearOp::Mark { .. } | LinearOp::Unmark { .. } => {}
            LinearOp::SplitBlock { index, block } => self.write_block(*index, block)?,
            LinearOp::JoinBlock { index } => self.text.delete(*index, 1)?,
            LinearOp::UpdateBlock { index, block } => self.set_block(*index, block)?,
        }
        Ok(())
    }

    /// Spans of the document as Loro currently shows it.
    fn read(&self) -> Result<Vec<Span>> {
        let mut spans = Vec::new();
        for delta in self.text.to_delta() {
            let TextDelta::Insert { insert, attributes } = delta else {
                continue;
            };
            let mut block = None;
            let mut marks = Marks::new();
            for (key, value) in attributes.iter().flatten() {
                let value = decode(value)?;
                if key == BLOCK_KEY {
                    block = Some(value);
                } else if is_mark_active(&value) {
                    marks.insert(SmolStr::new(key), value);
                }
            }
            let block = block
                .map(serde_json::from_value::<BlockMarker>)
                .transpose()
                .map_err(|e| SyncError::Replica(format!("malformed block marker: {e}")))?;
            let mut run = String::new();
            for c in insert.chars() {
                match &block {
                    Some(block) if c == BLOCK_CHAR => {
                        if !run.is_empty() {
                            spans.push(Span::Text {
                                value: std::mem::take(&mut run),
                                marks: marks.clone(),
                            });
                        }
                        spans.push(Span::Block(block.clone()));
                    }
                    _ => run.push(c),
                }
            }
            if !run.is_empty() {
                spans.push(Span::Text { value: run, marks });
            }
        }
        normalize(&mut spans);
        Ok(spans)
    }

    fn frontiers(&self, heads: Heads) -> Result<&Frontiers> {
        match usize::try_from(heads.0) {
            Ok(0) => Ok(&self.initial),
            Ok(i) if i <= self.log.len() => Ok(&self.log[i - 1].frontiers),
            _ => Err(SyncError::UnknownHeads(heads)),
        }
    }

    fn index_of(&self, heads: Heads) -> Result<usize> {
        usize::try_from(heads.0)
            .ok()
            .filter(|&i| i <= self.log.len())
            .ok_or(SyncError::UnknownHeads(heads))
    }
}

/// Mark and block values are stored as JSON text.
fn decode(value: &LoroValue) -> Result<Value> {
    match value {
        LoroValue::Null => Ok(Value::Null),
        LoroValue::String(json) => serde_json::from_str(json)
            .map_err(|e| SyncError::Replica(format!("malformed style value: {e}"))),
        other => Err(SyncError::Replica(format!("unexpected style value {other:?}"))),
    }
}

fn active(marks: &Marks) -> Marks {
    marks
        .iter()
        .filter(|(_, v)| is_mark_active(v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Checks `op` against `spans`, describes it as patches and applies those
/// to `spans`.
fn plan(text_path: &[Prop], spans: &mut Vec<Span>, op: &LinearOp) -> Result<Vec<Patch>> {
    let len = linear_len(spans);
    let check_range = |end: usize| {
        if end > len {
            return Err(SyncError::Replica(format!(
                "index {end} past end of text (length {len})"
            )));
        }
        Ok(())
    };
    let block_at = |index: usize| -> Result<BlockMarker> {
        let mut at = 0;
        for span in spans.iter() {
            if at == index {
                if let Span::Block(block) = span {
                    return Ok(block.clone());
                }
            }
            if at + span.len() > index {
                break;
            }
            at += span.len();
        }
        Err(SyncError::Replica(format!("no block marker at index {index}")))
    };
    let mut patches = Vec::new();
    match op {
        LinearOp::Splice {
            index,
            delete,
            insert,
            marks,
        } => {
            check_range(index + delete)?;
            if *delete > 0 {
                patches.push(Patch::at(
                    text_path,
                    *index,
                    PatchAction::Del {
                        length: (*delete > 1).then_some(*delete),
                    },
                ));
            }
            if !insert.is_empty() {
                let marks = active(marks);
                patches.push(Patch::at(
                    text_path,
                    *index,
                    PatchAction::Splice {
                        value: insert.clone(),
                        marks: (!marks.is_empty()).then_some(marks),
                    },
                ));
            }
        }
        LinearOp::Mark {
            start,
            end,
            name,
            value,
        } if start < end => {
            check_range(*end)?;
            patches.push(mark_patch(text_path, *start, *end, name, value.clone()));
        }
        LinearOp::Unmark { start, end, name } if start < end => {
            check_range(*end)?;
            patches.push(mark_patch(text_path, *start, *end, name, Value::Null));
        }
        LinearOp::Mark { .. } | LinearOp::Unmark { .. } => {}
        LinearOp::SplitBlock { index, block } => {
            check_range(*index)?;
            patches.push(Patch::at(
                text_path,
                *index,
                PatchAction::SplitBlock {
                    value: block.clone(),
                },
            ));
        }
        LinearOp::JoinBlock { index } => {
            block_at(*index)?;
            patches.push(Patch::at(text_path, *index, PatchAction::Del { length: None }));
        }
        LinearOp::UpdateBlock { index, block } => {
            let old = block_at(*index)?;
            patches.extend(block_field_patches(text_path, *index, &old, block));
        }
    }
    for patch in &patches {
        patch_spans(text_path, spans, patch)?;
    }
    Ok(patches)
}

fn mark_patch(text_path: &[Prop], start: usize, end: usize, name: &SmolStr, value: Value) -> Patch {
    Patch::new(
        text_path.to_vec(),
        PatchAction::Mark {
            marks: vec![MarkRange {
                name: name.clone(),
                value,
                start,
                end,
            }],
        },
    )
}

/// Patches describing a block marker update. A changed type replaces the
/// whole marker, otherwise each changed field is put on its own.
fn block_field_patches(
    text_path: &[Prop],
    index: usize,
    old: &BlockMarker,
    new: &BlockMarker,
) -> Vec<Patch> {
    if old.block_type != new.block_type {
        return vec![Patch::at(
            text_path,
            index,
            PatchAction::UpdateBlock { value: new.clone() },
        )];
    }
    let field = |rest: &[Prop], action| {
        let mut path = text_path.to_vec();
        path.push(Prop::Index(index));
        path.extend_from_slice(rest);
        Patch::new(path, action)
    };
    let mut patches = Vec::new();
    if old.parents != new.parents {
        let parents = new.parents.iter().map(|p| Value::from(p.as_str())).collect();
        patches.push(field(
            &[Prop::from("parents")],
            PatchAction::Put {
                value: Value::Array(parents),
            },
        ));
    }
    for (key, value) in &new.attrs {
        if old.attrs.get(key) != Some(value) {
            patches.push(field(
                &[Prop::from("attrs"), Prop::Key(key.clone())],
                PatchAction::Put {
                    value: value.clone(),
                },
            ));
        }
    }
    for key in old.attrs.keys().filter(|k| !new.attrs.contains_key(*k)) {
        patches.push(field(
            &[Prop::from("attrs"), Prop::Key(key.clone())],
            PatchAction::Del { length: None },
        ));
    }
    if old.is_embed != new.is_embed {
        patches.push(field(
            &[Prop::from("isEmbed")],
            PatchAction::Put {
                value: Value::Bool(new.is_embed),
            },
        ));
    }
    patches
}

impl ReplicatedDoc for LoroReplica {
    fn spans(&self) -> Result<Vec<Span>> {
        self.read()
    }

    fn diff(&self, before: Heads, after: Heads) -> Result<Vec<Patch>> {
        let from = self.index_of(before)?;
        let to = self.index_of(after)?;
        if from > to {
            return Err(SyncError::Replica(format!(
                "cannot diff backwards from {before:?} to {after:?}"
            )));
        }
        Ok(self.log[from..to]
            .iter()
            .flat_map(|change| change.patches.iter().cloned())
            .collect())
    }

    fn heads(&self) -> Heads {
        Heads(self.log.len() as u64)
    }

    fn view(&self, heads: Heads) -> Result<Vec<Span>> {
        let frontiers = self.frontiers(heads)?;
        self.doc.checkout(frontiers)?;
        let spans = self.read();
        self.doc.checkout_to_latest();
        spans
    }

    fn change(&mut self, ops: &[LinearOp]) -> Result<Heads> {
        // Every op is checked on a copy of the spans before Loro sees any.
        let mut spans = self.read()?;
        let mut patches = Vec::new();
        for op in ops {
            patches.extend(plan(&self.text_path, &mut spans, op)?);
        }
        if patches.is_empty() {
            return Ok(self.heads());
        }
        for op in ops {
            self.write(op)?;
        }
        self.doc.commit();
        tracing::debug!(
            target: "weaver::sync",
            ops = ops.len(),
            patches = patches.len(),
            "committed change"
        );
        self.log.push(Change {
            patches,
            frontiers: self.doc.oplog_frontiers(),
        });
        Ok(self.heads())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weaver_richtext::apply_patches;

    fn paragraphs() -> Vec<Span> {
        vec![
            Span::block(BlockMarker::new("paragraph")),
            Span::text("ab"),
            Span::block(BlockMarker::new("heading").with_attr("level", 1)),
            Span::text("cd"),
        ]
    }

    #[test]
    fn test_spans_round_trip() {
        let replica = LoroReplica::new(&paragraphs()).unwrap();
        assert_eq!(replica.spans().unwrap(), paragraphs());
        assert_eq!(replica.len(), 6);
        assert_eq!(replica.heads(), Heads(0));
    }

    #[test]
    fn test_adjacent_equal_blocks_stay_apart() {
        let spans = vec![
            Span::block(BlockMarker::new("paragraph")),
            Span::block(BlockMarker::new("paragraph")),
            Span::text("a"),
        ];
        let replica = LoroReplica::new(&spans).unwrap();
        assert_eq!(replica.spans().unwrap(), spans);
    }

    #[test]
    fn test_inserted_text_takes_only_its_own_marks() {
        let mut replica =
            LoroReplica::new(&[Span::marked("abcd", [("strong", json!(true))])]).unwrap();
        replica
            .change(&[
                LinearOp::Splice {
                    index: 2,
                    delete: 0,
                    insert: "x".into(),
                    marks: Marks::new(),
                },
                LinearOp::Splice {
                    index: 5,
                    delete: 0,
                    insert: "y".into(),
                    marks: [("em".into(), json!(true))].into_iter().collect(),
                },
            ])
            .unwrap();
        assert_eq!(
            replica.spans().unwrap(),
            vec![
                Span::marked("ab", [("strong", json!(true))]),
                Span::text("x"),
                Span::marked("cd", [("strong", json!(true))]),
                Span::marked("y", [("em", json!(true))]),
            ]
        );
    }

    #[test]
    fn test_change_emits_patches() {
        let mut replica = LoroReplica::new(&paragraphs()).unwrap();
        let heads = replica
            .change(&[
                LinearOp::Splice {
                    index: 1,
                    delete: 2,
                    insert: "xyz".into(),
                    marks: [("em".into(), json!(true))].into_iter().collect(),
                },
                LinearOp::JoinBlock { index: 4 },
            ])
            .unwrap();
        assert_eq!(heads, Heads(1));
        let patches = replica.diff(Heads(0), heads).unwrap();
        let wire = serde_json::to_string(&patches).unwrap();
        insta::assert_snapshot!(
            wire,
            @r#"[{"path":["text",1],"action":"del","length":2},{"path":["text",1],"action":"splice","value":"xyz","marks":{"em":true}},{"path":["text",4],"action":"del"}]"#
        );
        assert_eq!(
            replica.spans().unwrap(),
            vec![
                Span::block(BlockMarker::new("paragraph")),
                Span::marked("xyz", [("em", json!(true))]),
                Span::text("cd"),
            ]
        );
        assert_eq!(
            apply_patches(replica.text_path(), &paragraphs(), &patches).unwrap(),
            replica.spans().unwrap()
        );
    }

    #[test]
    fn test_update_block_puts_fields() {
        let mut replica = LoroReplica::new(&paragraphs()).unwrap();
        let level = BlockMarker::new("heading")
            .with_parents(["blockquote"])
            .with_attr("level", 3);
        replica
            .change(&[LinearOp::UpdateBlock {
                index: 3,
                block: level,
            }])
            .unwrap();
        let patches = replica.diff(Heads(0), replica.heads()).unwrap();
        assert_eq!(patches.len(), 2);
        assert_eq!(
            patches[0].path,
            vec![Prop::from("text"), Prop::Index(3), Prop::from("parents")]
        );
        assert_eq!(
            patches[1].path,
            vec![
                Prop::from("text"),
                Prop::Index(3),
                Prop::from("attrs"),
                Prop::from("level")
            ]
        );
        assert_eq!(
            apply_patches(replica.text_path(), &paragraphs(), &patches).unwrap(),
            replica.spans().unwrap()
        );

        replica
            .change(&[LinearOp::UpdateBlock {
                index: 0,
                block: BlockMarker::new("code-block"),
            }])
            .unwrap();
        let patches = replica.diff(Heads(1), Heads(2)).unwrap();
        assert!(matches!(
            &patches[..],
            [Patch {
                action: PatchAction::UpdateBlock { .. },
                ..
            }]
        ));
    }

    #[test]
    fn test_marks_and_views() {
        let mut replica = LoroReplica::new(&[Span::text("world")]).unwrap();
        replica
            .change(&[LinearOp::Mark {
                start: 1,
                end: 3,
                name: "strong".into(),
                value: json!(true),
            }])
            .unwrap();
        replica
            .change(&[LinearOp::Unmark {
                start: 0,
                end: 2,
                name: "strong".into(),
            }])
            .unwrap();
        assert_eq!(
            replica.view(Heads(1)).unwrap(),
            vec![
                Span::text("w"),
                Span::marked("or", [("strong", json!(true))]),
                Span::text("ld"),
            ]
        );
        assert_eq!(
            replica.spans().unwrap(),
            vec![
                Span::text("wo"),
                Span::marked("r", [("strong", json!(true))]),
                Span::text("ld"),
            ]
        );
        assert_eq!(replica.view(Heads(0)).unwrap(), vec![Span::text("world")]);
        assert_eq!(replica.diff(Heads(0), Heads(2)).unwrap().len(), 2);
        assert!(matches!(
            replica.view(Heads(3)),
            Err(SyncError::UnknownHeads(Heads(3)))
        ));
    }

    #[test]
    fn test_failed_change_is_atomic() {
        let mut replica = LoroReplica::new(&paragraphs()).unwrap();
        let err = replica.change(&[
            LinearOp::Splice {
                index: 0,
                delete: 0,
                insert: "x".into(),
                marks: Marks::new(),
            },
            LinearOp::JoinBlock { index: 2 },
        ]);
        assert!(matches!(err, Err(SyncError::Replica(_))));
        assert_eq!(replica.spans().unwrap(), paragraphs());
        assert_eq!(replica.heads(), Heads(0));
    }
}
