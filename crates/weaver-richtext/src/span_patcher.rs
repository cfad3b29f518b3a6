//! Applies replicated-document patches directly to a span sequence.
//!
//! This mirrors what the replica itself does with the same patches, so the
//! result is what the replica's spans will look like afterwards.

use serde_json::Value;
use smol_str::SmolStr;

use crate::error::{Result, RichTextError};
use crate::patch::{MarkRange, Patch, PatchAction, PatchTarget, Prop};
use crate::span::{BlockMarker, Marks, Span, is_mark_active, linear_len, normalize};

/// Applies a batch of patches to a copy of `spans`.
pub fn apply_patches(text_path: &[Prop], spans: &[Span], patches: &[Patch]) -> Result<Vec<Span>> {
    let mut out = spans.to_vec();
    for patch in patches {
        patch_spans(text_path, &mut out, patch)?;
    }
    Ok(out)
}

/// Applies one patch in place. The spans are normalized afterwards.
pub fn patch_spans(text_path: &[Prop], spans: &mut Vec<Span>, patch: &Patch) -> Result<()> {
    match patch.target(text_path)? {
        PatchTarget::Text => patch_text(spans, patch)?,
        PatchTarget::Index(index) => patch_index(spans, index, patch)?,
        PatchTarget::Field { index, field } => patch_field(spans, index, field, patch)?,
    }
    normalize(spans);
    Ok(())
}

fn patch_text(spans: &mut Vec<Span>, patch: &Patch) -> Result<()> {
    match &patch.action {
        PatchAction::Mark { marks } => {
            for range in marks {
                mark_range(spans, range)?;
            }
            Ok(())
        }
        PatchAction::Put {
            value: Value::String(text),
        } => {
            *spans = vec![Span::text(text.as_str())];
            Ok(())
        }
        _ => Err(RichTextError::malformed(
            &patch.path,
            "only mark and put apply to the whole text",
        )),
    }
}

fn patch_index(spans: &mut Vec<Span>, index: usize, patch: &Patch) -> Result<()> {
    match &patch.action {
        PatchAction::Splice { value, marks } => {
            let at = split_at(spans, index)?;
            spans.insert(
                at,
                Span::Text {
                    value: value.clone(),
                    marks: marks.clone().unwrap_or_default(),
                },
            );
        }
        PatchAction::Insert { values } => {
            let mut at = split_at(spans, index)?;
            for value in values {
                spans.insert(at, span_from_value(&patch.path, value)?);
                at += 1;
            }
        }
        PatchAction::Del { length } => delete_range(spans, index, length.unwrap_or(1))?,
        PatchAction::Mark { marks } => {
            for range in marks {
                mark_range(spans, range)?;
            }
        }
        PatchAction::SplitBlock { value } => {
            let at = split_at(spans, index)?;
            spans.insert(at, Span::Block(value.clone()));
        }
        PatchAction::UpdateBlock { value } => {
            *block_at_mut(spans, index, &patch.path)? = value.clone();
        }
        PatchAction::Put { value } => {
            let block = block_from_value(&patch.path, value)?;
            *block_at_mut(spans, index, &patch.path)? = block;
        }
    }
    Ok(())
}

fn patch_field(spans: &mut [Span], index: usize, field: &[Prop], patch: &Patch) -> Result<()> {
    let path = &patch.path;
    let block = block_at_mut(spans, index, path)?;
    match &patch.action {
        PatchAction::Put { value } => put_field(block, field, value.clone(), path),
        PatchAction::Del { .. } => del_field(block, field, path),
        PatchAction::Insert { values } => match field {
            [Prop::Key(k), Prop::Index(at)] if k == "parents" => {
                let mut at = *at;
                if at > block.parents.len() {
                    return Err(RichTextError::malformed(path, "parent index past end"));
                }
                for value in values {
                    block.parents.insert(at, parent_from_value(path, value)?);
                    at += 1;
                }
                Ok(())
            }
            _ => Err(RichTextError::malformed(path, "insert into a non-list field")),
        },
        _ => Err(RichTextError::malformed(
            path,
            "unsupported action on a block field",
        )),
    }
}

fn put_field(block: &mut BlockMarker, field: &[Prop], value: Value, path: &[Prop]) -> Result<()> {
    let [Prop::Key(name), rest @ ..] = field else {
        return Err(RichTextError::malformed(path, "block field must be named"));
    };
    match (name.as_str(), rest) {
        ("type", []) => {
            block.block_type = value
                .as_str()
                .map(SmolStr::new)
                .ok_or_else(|| RichTextError::malformed(path, "block type must be a string"))?;
        }
        ("parents", []) => {
            let Value::Array(items) = value else {
                return Err(RichTextError::malformed(path, "parents must be an array"));
            };
            block.parents = items
                .iter()
                .map(|v| parent_from_value(path, v))
                .collect::<Result<_>>()?;
        }
        ("parents", [Prop::Index(i)]) => {
            let parent = parent_from_value(path, &value)?;
            match block.parents.len() {
                len if *i < len => block.parents[*i] = parent,
                len if *i == len => block.parents.push(parent),
                _ => return Err(RichTextError::malformed(path, "parent index past end")),
            }
        }
        ("attrs", []) => {
            let Value::Object(map) = value else {
                return Err(RichTextError::malformed(path, "attrs must be an object"));
            };
            block.attrs = map.into_iter().map(|(k, v)| (k.into(), v)).collect();
        }
        ("attrs", [Prop::Key(key), nested @ ..]) => {
            let slot = block.attrs.entry(key.clone()).or_insert(Value::Null);
            put_nested(slot, nested, value, path)?;
        }
        ("isEmbed", []) => {
            block.is_embed = value
                .as_bool()
                .ok_or_else(|| RichTextError::malformed(path, "isEmbed must be a boolean"))?;
        }
        _ => return Err(RichTextError::malformed(path, "unknown block field")),
    }
    Ok(())
}

/// Writes into a JSON value, creating objects along the way.
fn put_nested(target: &mut Value, path: &[Prop], value: Value, full: &[Prop]) -> Result<()> {
    let Some((head, rest)) = path.split_first() else {
        *target = value;
        return Ok(());
    };
    match head {
        Prop::Key(key) => {
            if !target.is_object() {
                *target = Value::Object(Default::default());
            }
            let Value::Object(map) = target else {
                return Ok(());
            };
            let slot = map.entry(key.to_string()).or_insert(Value::Null);
            put_nested(slot, rest, value, full)
        }
        Prop::Index(i) => {
            let Value::Array(items) = target else {
                return Err(RichTextError::malformed(full, "index into a non-array value"));
            };
            if *i == items.len() && rest.is_empty() {
                items.push(value);
                return Ok(());
            }
            let slot = items
                .get_mut(*i)
                .ok_or_else(|| RichTextError::malformed(full, "array index past end"))?;
            put_nested(slot, rest, value, full)
        }
    }
}

fn del_field(block: &mut BlockMarker, field: &[Prop], path: &[Prop]) -> Result<()> {
    match field {
        [Prop::Key(k), Prop::Key(key)] if k == "attrs" => {
            block.attrs.remove(key);
            Ok(())
        }
        [Prop::Key(k), Prop::Index(i)] if k == "parents" => {
            if *i >= block.parents.len() {
                return Err(RichTextError::malformed(path, "parent index past end"));
            }
            block.parents.remove(*i);
            Ok(())
        }
        _ => Err(RichTextError::malformed(path, "field cannot be deleted")),
    }
}

fn mark_range(spans: &mut Vec<Span>, range: &MarkRange) -> Result<()> {
    if range.start >= range.end {
        return Ok(());
    }
    let size = linear_len(spans);
    if range.end > size {
        return Err(RichTextError::PositionOutOfRange {
            pos: range.end,
            size,
        });
    }
    let from = split_at(spans, range.start)?;
    let to = split_at(spans, range.end)?;
    let active = is_mark_active(&range.value);
    for span in &mut spans[from..to] {
        if let Span::Text { marks, .. } = span {
            if active {
                marks.insert(range.name.clone(), range.value.clone());
            } else {
                marks.remove(&range.name);
            }
        }
    }
    Ok(())
}

/// Returns the offset in `spans` of the element starting at linear
/// `index`, splitting a text run if the index falls inside it.
/// Replaces `delete` units at `index` with a run of text, then normalizes.
pub(crate) fn splice_text(
    spans: &mut Vec<Span>,
    index: usize,
    delete: usize,
    insert: &str,
    marks: &Marks,
) -> Result<()> {
    delete_range(spans, index, delete)?;
    if !insert.is_empty() {
        let at = split_at(spans, index)?;
        spans.insert(
            at,
            Span::Text {
                value: insert.to_string(),
                marks: marks.clone(),
            },
        );
    }
    normalize(spans);
    Ok(())
}

fn delete_range(spans: &mut Vec<Span>, index: usize, length: usize) -> Result<()> {
    let end = index + length;
    let size = linear_len(spans);
    if end > size {
        return Err(RichTextError::PositionOutOfRange { pos: end, size });
    }
    let from = split_at(spans, index)?;
    let to = split_at(spans, end)?;
    spans.drain(from..to);
    Ok(())
}

fn split_at(spans: &mut Vec<Span>, index: usize) -> Result<usize> {
    let mut pos = 0;
    for i in 0..spans.len() {
        if pos == index {
            return Ok(i);
        }
        let len = spans[i].len();
        if index < pos + len {
            if let Span::Text { value, marks } = &mut spans[i] {
                let offset = index - pos;
                let byte = value
                    .char_indices()
                    .nth(offset)
                    .map_or(value.len(), |(b, _)| b);
                let tail = value.split_off(byte);
                let marks = marks.clone();
                spans.insert(i + 1, Span::Text { value: tail, marks });
            }
            return Ok(i + 1);
        }
        pos += len;
    }
    if pos == index {
        Ok(spans.len())
    } else {
        Err(RichTextError::PositionOutOfRange { pos: index, size: pos })
    }
}

fn block_at_mut<'a>(
    spans: &'a mut [Span],
    index: usize,
    path: &[Prop],
) -> Result<&'a mut BlockMarker> {
    let mut pos = 0;
    for span in spans.iter_mut() {
        let len = span.len();
        if pos == index {
            if let Span::Block(block) = span {
                return Ok(block);
            }
        }
        if index < pos + len {
            break;
        }
        pos += len;
    }
    Err(RichTextError::malformed(path, "no block marker at index"))
}

fn span_from_value(path: &[Prop], value: &Value) -> Result<Span> {
    match value {
        Value::String(text) => Ok(Span::text(text.as_str())),
        Value::Object(_) => Ok(Span::Block(block_from_value(path, value)?)),
        _ => Err(RichTextError::malformed(
            path,
            "inserted value must be text or a block",
        )),
    }
}

fn block_from_value(path: &[Prop], value: &Value) -> Result<BlockMarker> {
    serde_json::from_value(value.clone())
        .map_err(|e| RichTextError::malformed(path, format!("invalid block marker: {e}")))
}

fn parent_from_value(path: &[Prop], value: &Value) -> Result<SmolStr> {
    value
        .as_str()
        .map(SmolStr::new)
        .ok_or_else(|| RichTextError::malformed(path, "parent must be a string"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tp() -> Vec<Prop> {
        vec![Prop::from("text")]
    }

    fn field(index: usize, rest: &[Prop]) -> Vec<Prop> {
        let mut path = vec![Prop::from("text"), Prop::Index(index)];
        path.extend_from_slice(rest);
        path
    }

    #[test]
    fn test_splice_at_end() {
        let spans = vec![Span::text("hello world")];
        let out = apply_patches(
            &tp(),
            &spans,
            &[Patch::at(
                &tp(),
                11,
                PatchAction::Splice {
                    value: "!".into(),
                    marks: None,
                },
            )],
        )
        .unwrap();
        assert_eq!(out, vec![Span::text("hello world!")]);
    }

    #[test]
    fn test_delete_block_joins_paragraphs() {
        let spans = vec![
            Span::block(BlockMarker::new("paragraph")),
            Span::text("a"),
            Span::block(BlockMarker::new("paragraph")),
            Span::text("b"),
        ];
        let out = apply_patches(
            &tp(),
            &spans,
            &[Patch::at(&tp(), 2, PatchAction::Del { length: None })],
        )
        .unwrap();
        assert_eq!(
            out,
            vec![Span::block(BlockMarker::new("paragraph")), Span::text("ab")]
        );
    }

    #[test]
    fn test_mark_range() {
        let spans = vec![Span::text("world")];
        let mark = Patch::new(
            tp(),
            PatchAction::Mark {
                marks: vec![MarkRange {
                    name: "bold".into(),
                    value: json!(true),
                    start: 1,
                    end: 3,
                }],
            },
        );
        let out = apply_patches(&tp(), &spans, &[mark]).unwrap();
        assert_eq!(
            out,
            vec![
                Span::text("w"),
                Span::marked("or", [("bold", json!(true))]),
                Span::text("ld"),
            ]
        );
        let unmark = Patch::new(
            tp(),
            PatchAction::Mark {
                marks: vec![MarkRange {
                    name: "bold".into(),
                    value: Value::Null,
                    start: 0,
                    end: 5,
                }],
            },
        );
        let back = apply_patches(&tp(), &out, &[unmark]).unwrap();
        assert_eq!(back, spans);
    }

    #[test]
    fn test_multibyte_split() {
        let spans = vec![Span::text("héllo")];
        let out = apply_patches(
            &tp(),
            &spans,
            &[Patch::at(
                &tp(),
                2,
                PatchAction::SplitBlock {
                    value: BlockMarker::new("paragraph"),
                },
            )],
        )
        .unwrap();
        assert_eq!(
            out,
            vec![
                Span::text("hé"),
                Span::block(BlockMarker::new("paragraph")),
                Span::text("llo"),
            ]
        );
    }

    #[test]
    fn test_insert_values() {
        let spans = vec![Span::text("ab")];
        let out = apply_patches(
            &tp(),
            &spans,
            &[Patch::at(
                &tp(),
                1,
                PatchAction::Insert {
                    values: vec![json!({"type": "heading", "attrs": {"level": 1}}), json!("x")],
                },
            )],
        )
        .unwrap();
        assert_eq!(
            out,
            vec![
                Span::text("a"),
                Span::block(BlockMarker::new("heading").with_attr("level", 1)),
                Span::text("xb"),
            ]
        );
    }

    #[test]
    fn test_block_fields() {
        let spans = vec![Span::block(
            BlockMarker::new("paragraph").with_parents(["blockquote"]),
        )];
        let patches = vec![
            Patch::new(
                field(0, &[Prop::from("type")]),
                PatchAction::Put {
                    value: json!("heading"),
                },
            ),
            Patch::new(
                field(0, &[Prop::from("attrs"), Prop::from("level")]),
                PatchAction::Put { value: json!(3) },
            ),
            Patch::new(
                field(0, &[Prop::from("parents"), Prop::Index(1)]),
                PatchAction::Put {
                    value: json!("aside"),
                },
            ),
            Patch::new(
                field(0, &[Prop::from("parents"), Prop::Index(0)]),
                PatchAction::Del { length: None },
            ),
        ];
        let out = apply_patches(&tp(), &spans, &patches).unwrap();
        assert_eq!(
            out,
            vec![Span::block(
                BlockMarker::new("heading")
                    .with_parents(["aside"])
                    .with_attr("level", 3)
            )]
        );
    }

    #[test]
    fn test_errors() {
        let spans = vec![Span::text("ab")];
        let past_end = Patch::at(&tp(), 1, PatchAction::Del { length: Some(5) });
        assert!(matches!(
            apply_patches(&tp(), &spans, &[past_end]),
            Err(RichTextError::PositionOutOfRange { pos: 6, size: 2 })
        ));
        let not_block = Patch::new(
            field(0, &[Prop::from("type")]),
            PatchAction::Put {
                value: json!("heading"),
            },
        );
        assert!(matches!(
            apply_patches(&tp(), &spans, &[not_block]),
            Err(RichTextError::MalformedPath { .. })
        ));
    }
}
