//! The linear span model.
//!
//! A document is an ordered sequence of text runs and block markers. Text
//! counts one linear unit per character, a block marker counts one unit.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;

/// Attribute map carried by block markers and tree nodes.
pub type Attrs = BTreeMap<SmolStr, Value>;

/// Mark name to mark value, as stored on text spans.
pub type Marks = BTreeMap<SmolStr, Value>;

/// Whether a mark value means the mark is present.
///
/// `null` and `false` both mean "not marked".
pub fn is_mark_active(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

/// A block marker: the stored boundary of a block in the linear model.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMarker {
    /// Domain block type, e.g. `paragraph` or `ordered-list-item`.
    #[serde(rename = "type")]
    pub block_type: SmolStr,
    /// Ancestor block types, outermost first.
    #[serde(default)]
    pub parents: Vec<SmolStr>,
    #[serde(default)]
    pub attrs: Attrs,
    #[serde(default)]
    pub is_embed: bool,
}

impl BlockMarker {
    pub fn new(block_type: impl Into<SmolStr>) -> Self {
        Self {
            block_type: block_type.into(),
            ..Default::default()
        }
    }

    pub fn with_parents<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        self.parents = parents.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_attr(mut self, key: impl Into<SmolStr>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn embed(mut self) -> Self {
        self.is_embed = true;
        self
    }
}

/// One element of the linear model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "SpanRepr", from = "SpanRepr")]
pub enum Span {
    Text { value: String, marks: Marks },
    Block(BlockMarker),
}

impl Span {
    pub fn text(value: impl Into<String>) -> Self {
        Span::Text {
            value: value.into(),
            marks: Marks::new(),
        }
    }

    pub fn marked<I, K>(value: impl Into<String>, marks: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<SmolStr>,
    {
        Span::Text {
            value: value.into(),
            marks: marks.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn block(marker: BlockMarker) -> Self {
        Span::Block(marker)
    }

    /// Length in linear units.
    pub fn len(&self) -> usize {
        match self {
            Span::Text { value, .. } => value.chars().count(),
            Span::Block(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_block(&self) -> bool {
        matches!(self, Span::Block(_))
    }
}

/// Wire shape: `{"type":"text","value":..}` or `{"type":"block","value":{..}}`.
#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum SpanRepr {
    Text {
        value: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        marks: Marks,
    },
    Block {
        value: BlockMarker,
    },
}

impl From<Span> for SpanRepr {
    fn from(span: Span) -> Self {
        match span {
            Span::Text { value, marks } => SpanRepr::Text { value, marks },
            Span::Block(value) => SpanRepr::Block { value },
        }
    }
}

impl From<SpanRepr> for Span {
    fn from(repr: SpanRepr) -> Self {
        match repr {
            SpanRepr::Text { value, marks } => Span::Text { value, marks },
            SpanRepr::Block { value } => Span::Block(value),
        }
    }
}

/// Total linear length of a span sequence.
pub fn linear_len(spans: &[Span]) -> usize {
    spans.iter().map(Span::len).sum()
}

/// Puts a span sequence into canonical form.
///
/// Inactive mark values are dropped, empty text runs removed and adjacent
/// runs with equal marks merged. Runs merge strictly left to right.
pub fn normalize(spans: &mut Vec<Span>) {
    let mut out: Vec<Span> = Vec::with_capacity(spans.len());
    for span in spans.drain(..) {
        match span {
            Span::Text { value, mut marks } => {
                if value.is_empty() {
                    continue;
                }
                marks.retain(|_, v| is_mark_active(v));
                if let Some(Span::Text {
                    value: prev,
                    marks: prev_marks,
                }) = out.last_mut()
                {
                    if *prev_marks == marks {
                        prev.push_str(&value);
                        continue;
                    }
                }
                out.push(Span::Text { value, marks });
            }
            block => out.push(block),
        }
    }
    *spans = out;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_merges_equal_marks() {
        let mut spans = vec![
            Span::text("ab"),
            Span::text(""),
            Span::text("c"),
            Span::marked("d", [("strong", json!(true))]),
            Span::marked("e", [("strong", json!(true)), ("em", json!(false))]),
        ];
        normalize(&mut spans);
        assert_eq!(
            spans,
            vec![Span::text("abc"), Span::marked("de", [("strong", json!(true))])]
        );
    }

    #[test]
    fn test_blocks_stop_merging() {
        let mut spans = vec![
            Span::text("a"),
            Span::block(BlockMarker::new("paragraph")),
            Span::text("b"),
        ];
        normalize(&mut spans);
        assert_eq!(spans.len(), 3);
        assert_eq!(linear_len(&spans), 3);
    }

    #[test]
    fn test_wire_shape() {
        let spans = vec![
            Span::block(
                BlockMarker::new("ordered-list-item").with_parents(["unordered-list-item"]),
            ),
            Span::marked("hi", [("em", json!(true))]),
        ];
        let value = serde_json::to_value(&spans).unwrap();
        assert_eq!(
            value,
            json!([
                {"type": "block", "value": {
                    "type": "ordered-list-item",
                    "parents": ["unordered-list-item"],
                    "attrs": {},
                    "isEmbed": false
                }},
                {"type": "text", "value": "hi", "marks": {"em": true}}
            ])
        );
        let back: Vec<Span> = serde_json::from_value(value).unwrap();
        assert_eq!(back, spans);
    }

    #[test]
    fn test_length_counts_chars() {
        assert_eq!(Span::text("héllo").len(), 5);
        assert_eq!(Span::block(BlockMarker::new("paragraph")).len(), 1);
    }
}
