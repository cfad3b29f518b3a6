//! Turns replicated-document patches into tree steps.
//!
//! Text splices, text deletions and mark changes map to small steps at the
//! matching tree positions. Anything structural is applied to a working copy
//! of the spans and the affected part of the tree is rebuilt from them.

use crate::error::Result;
use crate::index::IndexTranslator;
use crate::patch::{Patch, PatchAction, PatchTarget, Prop};
use crate::schema::Schema;
use crate::span::{Span, is_mark_active};
use crate::span_patcher::patch_spans;
use crate::traversal::tree_from_spans;
use crate::tree::{ResolvedPos, Transaction};

/// Adds steps to `tr` that bring its document in line with `before` after
/// `patches`, and returns the patched spans.
///
/// `tr`'s current document must be the tree for `before`.
pub fn patches_to_transaction(
    schema: &Schema,
    text_path: &[Prop],
    before: &[Span],
    patches: &[Patch],
    tr: &mut Transaction,
) -> Result<Vec<Span>> {
    let mut working = before.to_vec();
    let mut dirty = false;
    for patch in patches {
        let target = patch.target(text_path)?;
        let mut applied = false;
        if is_incremental(target, &patch.action) {
            if dirty {
                rebuild(schema, &working, tr)?;
                dirty = false;
            }
            applied = apply_incremental(schema, target, &patch.action, tr)?;
            if !applied {
                tracing::trace!(target: "weaver::patch", ?patch, "no direct tree position, rebuilding");
            }
        }
        patch_spans(text_path, &mut working, patch)?;
        // Emptying or filling an inferred textblock changes what the spans imply.
        if applied && *tr.doc() != tree_from_spans(schema, &working) {
            tracing::trace!(target: "weaver::patch", ?patch, "inferred structure changed, rebuilding");
            applied = false;
        }
        dirty |= !applied;
    }
    if dirty {
        rebuild(schema, &working, tr)?;
    }
    Ok(working)
}

fn is_incremental(target: PatchTarget<'_>, action: &PatchAction) -> bool {
    matches!(
        (target, action),
        (PatchTarget::Index(_), PatchAction::Splice { .. })
            | (PatchTarget::Index(_), PatchAction::Del { .. })
            | (PatchTarget::Text | PatchTarget::Index(_), PatchAction::Mark { .. })
    )
}

/// Applies a text-level patch straight to the tree. Returns false, leaving
/// `tr` untouched, when the patch does not land on plain text.
fn apply_incremental(
    schema: &Schema,
    target: PatchTarget<'_>,
    action: &PatchAction,
    tr: &mut Transaction,
) -> Result<bool> {
    let translator = IndexTranslator::from_tree(schema, tr.doc())?;
    match (target, action) {
        (PatchTarget::Index(index), PatchAction::Splice { value, marks }) => {
            if value.is_empty() {
                return Ok(true);
            }
            let Some(pos) = translator.text_position(index) else {
                return Ok(false);
            };
            let marks = marks.clone().unwrap_or_default();
            let has_marks = marks.values().any(is_mark_active);
            let parent = ResolvedPos::resolve(tr.doc(), pos)?.parent().node_type().to_owned();
            if has_marks && !schema.allows_marks(&parent) {
                return Ok(false);
            }
            let marks = if schema.allows_marks(&parent) {
                schema.marks_from_span(&marks)
            } else {
                Vec::new()
            };
            tr.insert_text(schema, pos, value, marks)?;
            Ok(true)
        }
        (PatchTarget::Index(index), PatchAction::Del { length }) => {
            let end = index + length.unwrap_or(1);
            let Some((from, to)) = translator.text_range(index, end) else {
                return Ok(false);
            };
            tr.delete(schema, from, to)?;
            Ok(true)
        }
        (_, PatchAction::Mark { marks }) => {
            for range in marks {
                let from = translator.lin_to_tree(range.start);
                let to = translator.lin_to_tree(range.end);
                if from >= to {
                    continue;
                }
                let mark = schema.mark_for_span(&range.name, &range.value);
                if is_mark_active(&range.value) {
                    tr.add_mark(schema, from, to, mark)?;
                } else {
                    tr.remove_mark(schema, from, to, mark)?;
                }
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Replaces the differing part of the tree with the tree built from `spans`.
fn rebuild(schema: &Schema, spans: &[Span], tr: &mut Transaction) -> Result<()> {
    let target = tree_from_spans(schema, spans);
    let changed = tr.replace_with(schema, &target)?;
    tracing::debug!(target: "weaver::patch", changed, "rebuilt tree from spans");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::MarkRange;
    use crate::span::BlockMarker;
    use crate::traversal::spans_from_tree;
    use crate::tree::{EditorState, Step};
    use serde_json::json;

    fn tp() -> Vec<Prop> {
        vec![Prop::from("text")]
    }

    fn run(spans: &[Span], patches: &[Patch]) -> (Transaction, Vec<Span>) {
        let schema = Schema::basic();
        let state = EditorState::new(tree_from_spans(&schema, spans));
        let mut tr = Transaction::new(&state);
        let out = patches_to_transaction(&schema, &tp(), spans, patches, &mut tr).unwrap();
        assert_eq!(*tr.doc(), tree_from_spans(&schema, &out));
        assert_eq!(spans_from_tree(&schema, tr.doc()).unwrap(), out);
        (tr, out)
    }

    #[test]
    fn test_splice_is_incremental() {
        let spans = vec![Span::text("hello world")];
        let (tr, _) = run(
            &spans,
            &[Patch::at(
                &tp(),
                11,
                PatchAction::Splice {
                    value: "!".into(),
                    marks: None,
                },
            )],
        );
        assert_eq!(tr.doc().to_string(), "doc(paragraph(\"hello world!\"))");
        assert!(matches!(
            tr.steps(),
            [Step::Replace { from: 12, to: 12, .. }]
        ));
    }

    #[test]
    fn test_block_delete_rebuilds() {
        let spans = vec![
            Span::block(BlockMarker::new("paragraph")),
            Span::text("a"),
            Span::block(BlockMarker::new("paragraph")),
            Span::text("b"),
        ];
        let (tr, out) = run(
            &spans,
            &[Patch::at(&tp(), 2, PatchAction::Del { length: None })],
        );
        assert_eq!(
            out,
            vec![Span::block(BlockMarker::new("paragraph")), Span::text("ab")]
        );
        assert_eq!(tr.doc().to_string(), "doc(paragraph*(\"ab\"))");
    }

    #[test]
    fn test_text_delete_is_incremental() {
        let spans = vec![
            Span::block(BlockMarker::new("paragraph")),
            Span::text("abcd"),
        ];
        let (tr, _) = run(
            &spans,
            &[Patch::at(&tp(), 2, PatchAction::Del { length: Some(2) })],
        );
        assert!(matches!(tr.steps(), [Step::Replace { from: 2, to: 4, .. }]));
    }

    #[test]
    fn test_emptied_filler_is_dropped() {
        let spans = vec![Span::text("a"), Span::block(BlockMarker::new("paragraph"))];
        let (tr, out) = run(
            &spans,
            &[
                Patch::at(
                    &tp(),
                    2,
                    PatchAction::Splice {
                        value: "aaa".into(),
                        marks: None,
                    },
                ),
                Patch::at(&tp(), 0, PatchAction::Del { length: None }),
            ],
        );
        assert_eq!(
            out,
            vec![Span::block(BlockMarker::new("paragraph")), Span::text("aaa")]
        );
        assert_eq!(tr.doc().to_string(), "doc(paragraph*(\"aaa\"))");
    }

    #[test]
    fn test_mark_patch() {
        let spans = vec![Span::text("world")];
        let (tr, out) = run(
            &spans,
            &[Patch::new(
                tp(),
                PatchAction::Mark {
                    marks: vec![MarkRange {
                        name: "strong".into(),
                        value: json!(true),
                        start: 1,
                        end: 3,
                    }],
                },
            )],
        );
        assert_eq!(
            tr.doc().to_string(),
            "doc(paragraph(\"w\", \"or\"[strong], \"ld\"))"
        );
        assert_eq!(out[1], Span::marked("or", [("strong", json!(true))]));
    }

    #[test]
    fn test_mixed_batch() {
        let spans = vec![Span::block(BlockMarker::new("paragraph")), Span::text("ab")];
        let patches = vec![
            Patch::at(
                &tp(),
                2,
                PatchAction::SplitBlock {
                    value: BlockMarker::new("ordered-list-item"),
                },
            ),
            Patch::at(
                &tp(),
                4,
                PatchAction::Splice {
                    value: "c".into(),
                    marks: Some([("em".into(), json!(true))].into_iter().collect()),
                },
            ),
            Patch::new(
                vec![Prop::from("text"), Prop::Index(2), Prop::from("type")],
                PatchAction::Put {
                    value: json!("unordered-list-item"),
                },
            ),
        ];
        let (tr, out) = run(&spans, &patches);
        assert_eq!(
            out,
            vec![
                Span::block(BlockMarker::new("paragraph")),
                Span::text("a"),
                Span::block(BlockMarker::new("unordered-list-item")),
                Span::text("b"),
                Span::marked("c", [("em", json!(true))]),
            ]
        );
        assert_eq!(
            tr.doc().to_string(),
            "doc(paragraph*(\"a\"), bullet_list(list_item*(paragraph(\"b\", \"c\"[em]))))"
        );
    }
}
