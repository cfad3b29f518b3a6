//! Patches emitted by the replicated document, and the linear operations
//! sent back to it.
//!
//! Patch paths are rooted at the document; a path addresses the text field
//! when it equals the configured text path, a linear index when it has one
//! more index element, and a block marker field when it continues past that.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;

use crate::error::{Result, RichTextError};
use crate::span::{BlockMarker, Marks};

/// One element of a patch path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prop {
    Index(usize),
    Key(SmolStr),
}

impl From<usize> for Prop {
    fn from(index: usize) -> Self {
        Prop::Index(index)
    }
}

impl From<&str> for Prop {
    fn from(key: &str) -> Self {
        Prop::Key(key.into())
    }
}

/// A mark applied over a linear range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkRange {
    pub name: SmolStr,
    /// `null` or `false` removes the mark.
    pub value: Value,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum PatchAction {
    /// Insert text at the addressed index.
    Splice {
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        marks: Option<Marks>,
    },
    /// Insert values at the addressed index. Objects are block markers,
    /// strings are text.
    Insert { values: Vec<Value> },
    /// Delete elements at the addressed index, or a block field.
    Del {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        length: Option<usize>,
    },
    /// Overwrite a block marker field.
    Put { value: Value },
    Mark { marks: Vec<MarkRange> },
    /// Insert a new block marker at the addressed index.
    SplitBlock { value: BlockMarker },
    /// Replace the block marker at the addressed index.
    UpdateBlock { value: BlockMarker },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub path: Vec<Prop>,
    #[serde(flatten)]
    pub action: PatchAction,
}

impl Patch {
    pub fn new(path: Vec<Prop>, action: PatchAction) -> Self {
        Self { path, action }
    }

    /// A patch addressing `index` inside the text at `text_path`.
    pub fn at(text_path: &[Prop], index: usize, action: PatchAction) -> Self {
        let mut path = text_path.to_vec();
        path.push(Prop::Index(index));
        Self { path, action }
    }
}

/// Where a patch path points relative to the text field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchTarget<'a> {
    /// The text field itself.
    Text,
    /// A linear index.
    Index(usize),
    /// A field inside the block marker at `index`.
    Field { index: usize, field: &'a [Prop] },
}

/// Resolves a patch path against the text path.
pub fn resolve_path<'a>(text_path: &[Prop], path: &'a [Prop]) -> Result<PatchTarget<'a>> {
    let Some(rest) = path.strip_prefix(text_path) else {
        return Err(RichTextError::malformed(path, "not under the text path"));
    };
    match rest {
        [] => Ok(PatchTarget::Text),
        [Prop::Index(index)] => Ok(PatchTarget::Index(*index)),
        [Prop::Index(index), field @ ..] => Ok(PatchTarget::Field {
            index: *index,
            field,
        }),
        [Prop::Key(_), ..] => Err(RichTextError::malformed(
            path,
            "expected a linear index after the text path",
        )),
    }
}

impl Patch {
    pub fn target<'a>(&'a self, text_path: &[Prop]) -> Result<PatchTarget<'a>> {
        resolve_path(text_path, &self.path)
    }
}

/// A change expressed in the linear model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum LinearOp {
    /// Delete `delete` units at `index`, then insert text.
    Splice {
        index: usize,
        delete: usize,
        insert: String,
        #[serde(default)]
        marks: Marks,
    },
    Mark {
        start: usize,
        end: usize,
        name: SmolStr,
        value: Value,
    },
    Unmark {
        start: usize,
        end: usize,
        name: SmolStr,
    },
    /// Insert a block marker at `index`.
    SplitBlock { index: usize, block: BlockMarker },
    /// Remove the block marker at `index`.
    JoinBlock { index: usize },
    /// Replace the block marker at `index`.
    UpdateBlock { index: usize, block: BlockMarker },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_path() -> Vec<Prop> {
        vec![Prop::from("text")]
    }

    #[test]
    fn test_resolve_path() {
        let tp = text_path();
        assert_eq!(resolve_path(&tp, &tp).unwrap(), PatchTarget::Text);
        let idx = vec![Prop::from("text"), Prop::from(4)];
        assert_eq!(resolve_path(&tp, &idx).unwrap(), PatchTarget::Index(4));
        let field = vec![Prop::from("text"), Prop::from(2), Prop::from("attrs"), Prop::from("level")];
        assert_eq!(
            resolve_path(&tp, &field).unwrap(),
            PatchTarget::Field {
                index: 2,
                field: &[Prop::from("attrs"), Prop::from("level")],
            }
        );
        let elsewhere = vec![Prop::from("title"), Prop::from(0)];
        assert!(matches!(
            resolve_path(&tp, &elsewhere),
            Err(RichTextError::MalformedPath { .. })
        ));
    }

    #[test]
    fn test_patch_wire_format() {
        let patch: Patch = serde_json::from_value(json!({
            "path": ["text", 3],
            "action": "splice",
            "value": "hi",
            "marks": {"strong": true}
        }))
        .unwrap();
        assert_eq!(patch.path, vec![Prop::from("text"), Prop::from(3)]);
        assert!(matches!(&patch.action, PatchAction::Splice { value, marks: Some(m) } if value == "hi" && m.len() == 1));

        let del: Patch = serde_json::from_value(json!({"path": ["text", 0], "action": "del"})).unwrap();
        assert_eq!(del.action, PatchAction::Del { length: None });

        let split = Patch::at(
            &text_path(),
            5,
            PatchAction::SplitBlock {
                value: BlockMarker::new("heading").with_attr("level", 2),
            },
        );
        insta::assert_snapshot!(
            serde_json::to_string(&split).unwrap(),
            @r#"{"path":["text",5],"action":"splitBlock","value":{"type":"heading","parents":[],"attrs":{"level":2},"isEmbed":false}}"#
        );
    }

    #[test]
    fn test_linear_op_wire_format() {
        let op = LinearOp::JoinBlock { index: 3 };
        assert_eq!(
            serde_json::to_value(&op).unwrap(),
            json!({"op": "joinBlock", "index": 3})
        );
    }
}
