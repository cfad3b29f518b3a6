//! Both edit directions must agree with the replica for any sequence of
//! changes: patches applied to spans or to the tree, and tree edits turned
//! into linear operations.

use proptest::prelude::*;
use serde_json::{Value, json};
use weaver_richtext::tree::{Fragment, Mark, Slice};
use weaver_richtext::{
    BlockMarker, EditorState, LinearOp, Marks, Schema, Selection, Span, Transaction,
    apply_patches, patches_to_transaction, spans_from_tree, transaction_to_ops, tree_from_spans,
};
use weaver_richtext_sync::{LoroReplica, ReplicatedDoc};

const BLOCK_TYPES: &[&str] = &["paragraph", "heading", "ordered-list-item", "blockquote", "image"];
const MARKS: &[&str] = &["strong", "em", "link"];

/// An operation described relative to the document it will apply to.
#[derive(Debug, Clone)]
enum Seed {
    Insert { at: usize, text: String, mark: Option<usize> },
    Delete { at: usize, len: usize },
    Mark { at: usize, len: usize, mark: usize, on: bool },
    Split { at: usize, block: usize },
    Join { nth: usize },
    Update { nth: usize, block: usize, level: u8 },
}

fn seed() -> impl Strategy<Value = Seed> {
    prop_oneof![
        (any::<usize>(), "[a-zé ]{1,4}", prop::option::of(0..MARKS.len()))
            .prop_map(|(at, text, mark)| Seed::Insert { at, text, mark }),
        (any::<usize>(), 1..4usize).prop_map(|(at, len)| Seed::Delete { at, len }),
        (any::<usize>(), 1..6usize, 0..MARKS.len(), any::<bool>())
            .prop_map(|(at, len, mark, on)| Seed::Mark { at, len, mark, on }),
        (any::<usize>(), 0..BLOCK_TYPES.len()).prop_map(|(at, block)| Seed::Split { at, block }),
        any::<usize>().prop_map(|nth| Seed::Join { nth }),
        (any::<usize>(), 0..BLOCK_TYPES.len(), 1..4u8)
            .prop_map(|(nth, block, level)| Seed::Update { nth, block, level }),
    ]
}

fn mark_value(mark: usize) -> Value {
    match MARKS[mark] {
        "link" => json!({"href": "https://example.com", "title": null}),
        _ => json!(true),
    }
}

fn block(kind: usize, level: u8) -> BlockMarker {
    let marker = BlockMarker::new(BLOCK_TYPES[kind]);
    match BLOCK_TYPES[kind] {
        "heading" => marker.with_attr("level", level),
        "ordered-list-item" if level % 2 == 0 => marker.with_parents(["blockquote"]),
        "image" => marker.with_attr("src", format!("{level}.png")).embed(),
        _ => marker,
    }
}

fn block_indices(spans: &[Span]) -> Vec<usize> {
    let mut at = 0;
    let mut out = Vec::new();
    for span in spans {
        if span.is_block() {
            out.push(at);
        }
        at += span.len();
    }
    out
}

/// Turns a seed into an operation valid for a document of `spans`.
fn resolve(seed: &Seed, spans: &[Span], len: usize) -> Option<LinearOp> {
    let blocks = block_indices(spans);
    match seed {
        Seed::Insert { at, text, mark } => {
            let mut marks = Marks::new();
            if let Some(mark) = mark {
                marks.insert(MARKS[*mark].into(), mark_value(*mark));
            }
            Some(LinearOp::Splice {
                index: at % (len + 1),
                delete: 0,
                insert: text.clone(),
                marks,
            })
        }
        Seed::Delete { at, len: n } if len > 0 => {
            let index = at % len;
            Some(LinearOp::Splice {
                index,
                delete: (*n).min(len - index),
                insert: String::new(),
                marks: Marks::new(),
            })
        }
        Seed::Mark { at, len: n, mark, on } if len > 0 => {
            let start = at % len;
            let end = (start + n).min(len);
            Some(if *on {
                LinearOp::Mark {
                    start,
                    end,
                    name: MARKS[*mark].into(),
                    value: mark_value(*mark),
                }
            } else {
                LinearOp::Unmark {
                    start,
                    end,
                    name: MARKS[*mark].into(),
                }
            })
        }
        Seed::Split { at, block: kind } => Some(LinearOp::SplitBlock {
            index: at % (len + 1),
            block: block(*kind, 1),
        }),
        Seed::Join { nth } if !blocks.is_empty() => Some(LinearOp::JoinBlock {
            index: blocks[nth % blocks.len()],
        }),
        Seed::Update { nth, block: kind, level } if !blocks.is_empty() => {
            Some(LinearOp::UpdateBlock {
                index: blocks[nth % blocks.len()],
                block: block(*kind, *level),
            })
        }
        _ => None,
    }
}

fn initial() -> impl Strategy<Value = Vec<Span>> {
    prop::collection::vec(
        prop_oneof![
            "[a-z]{1,5}".prop_map(Span::text),
            (0..BLOCK_TYPES.len(), 1..4u8).prop_map(|(kind, level)| Span::block(block(kind, level))),
        ],
        0..6,
    )
}

fn batches() -> impl Strategy<Value = Vec<Vec<Seed>>> {
    prop::collection::vec(prop::collection::vec(seed(), 1..4), 1..8)
}

/// Resolves a batch of seeds one after another against `spans`.
fn ops_for(batch: &[Seed], spans: &[Span]) -> Vec<LinearOp> {
    let mut ops = Vec::new();
    let mut scratch = LoroReplica::new(spans).unwrap();
    for seed in batch {
        let current = scratch.spans().unwrap();
        if let Some(op) = resolve(seed, &current, scratch.len()) {
            scratch.change(std::slice::from_ref(&op)).unwrap();
            ops.push(op);
        }
    }
    ops
}

/// An edit made in the editor, described relative to the tree it applies to.
#[derive(Debug, Clone)]
enum Edit {
    Type { at: usize, text: String },
    Delete { at: usize, len: usize },
    Split { at: usize },
    Mark { at: usize, len: usize, on: bool },
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (any::<usize>(), "[a-z ]{1,3}").prop_map(|(at, text)| Edit::Type { at, text }),
        (any::<usize>(), 1..5usize).prop_map(|(at, len)| Edit::Delete { at, len }),
        any::<usize>().prop_map(|at| Edit::Split { at }),
        (any::<usize>(), 1..6usize, any::<bool>()).prop_map(|(at, len, on)| Edit::Mark { at, len, on }),
    ]
}

/// Adds the edit to `tr`. Returns false when it does not apply there.
fn apply_edit(schema: &Schema, tr: &mut Transaction, edit: &Edit) -> bool {
    let size = tr.doc().content_size();
    let wrap = |n: usize| n % (size + 1);
    let in_text = |tr: &Transaction, pos: usize| Selection::cursor(pos).fits(schema, tr.doc());
    match edit {
        Edit::Type { at, text } => {
            let pos = wrap(*at);
            in_text(tr, pos) && tr.insert_text(schema, pos, text, vec![]).is_ok()
        }
        Edit::Delete { at, len } => {
            let from = wrap(*at);
            let to = (from + len).min(size);
            from < to && tr.delete(schema, from, to).is_ok()
        }
        Edit::Split { at } => {
            let pos = wrap(*at);
            if !in_text(tr, pos) {
                return false;
            }
            let paragraph = || schema.element("paragraph", schema.default_attrs("paragraph"), vec![]);
            let slice = Slice::new(Fragment::from_nodes(vec![paragraph(), paragraph()]), 1, 1);
            tr.replace(schema, pos, pos, slice).is_ok()
        }
        Edit::Mark { at, len, on } => {
            let from = wrap(*at);
            let to = (from + len).min(size);
            let mark = Mark::new("strong");
            from < to
                && if *on {
                    tr.add_mark(schema, from, to, mark).is_ok()
                } else {
                    tr.remove_mark(schema, from, to, mark).is_ok()
                }
        }
    }
}

proptest! {
    #[test]
    fn patches_reproduce_replica_spans(start in initial(), seeds in batches()) {
        let mut replica = LoroReplica::new(&start).unwrap();
        let mut spans = replica.spans().unwrap();
        for batch in &seeds {
            let ops = ops_for(batch, &spans);
            let before = replica.heads();
            let after = replica.change(&ops).unwrap();
            let patches = replica.diff(before, after).unwrap();
            let patched = apply_patches(replica.text_path(), &spans, &patches).unwrap();
            prop_assert_eq!(&patched, &replica.spans().unwrap());
            prop_assert_eq!(&replica.view(after).unwrap(), &patched);
            spans = patched;
        }
    }

    #[test]
    fn remote_patches_reproduce_the_rebuilt_tree(start in initial(), seeds in batches()) {
        let schema = Schema::basic();
        let mut replica = LoroReplica::new(&start).unwrap();
        let mut spans = replica.spans().unwrap();
        let mut state = EditorState::new(tree_from_spans(&schema, &spans));
        for batch in &seeds {
            let ops = ops_for(batch, &spans);
            let before = replica.heads();
            let after = replica.change(&ops).unwrap();
            let patches = replica.diff(before, after).unwrap();
            let mut tr = Transaction::new(&state);
            let patched =
                patches_to_transaction(&schema, replica.text_path(), &spans, &patches, &mut tr).unwrap();
            let actual = replica.spans().unwrap();
            prop_assert_eq!(&patched, &actual);
            prop_assert_eq!(tr.doc(), &tree_from_spans(&schema, &actual));
            state = state.apply(&tr);
            spans = actual;
        }
    }

    #[test]
    fn tree_edits_reach_the_replica(start in initial(), edits in prop::collection::vec(edit(), 1..10)) {
        let schema = Schema::basic();
        let mut replica = LoroReplica::new(&start).unwrap();
        let mut spans = replica.spans().unwrap();
        let mut state = EditorState::new(tree_from_spans(&schema, &spans));
        for edit in &edits {
            let mut tr = Transaction::new(&state);
            if !apply_edit(&schema, &mut tr, edit) {
                continue;
            }
            let Ok(expected) = spans_from_tree(&schema, tr.doc()) else {
                continue;
            };
            let ops = transaction_to_ops(&schema, &spans, &tr).unwrap();
            replica.change(&ops).unwrap();
            let actual = replica.spans().unwrap();
            prop_assert_eq!(&actual, &expected, "edit {:?} gave ops {:?}", edit, ops);
            state = state.apply(&tr);
            spans = actual;
        }
    }
}
