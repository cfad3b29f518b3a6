//! Error types for span and tree conversion.

use smol_str::SmolStr;
use thiserror::Error;

use crate::patch::Prop;

/// Errors raised while fitting a slice into a document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReplaceError {
    /// The slice is opened deeper than the position it is inserted at.
    #[error("inserted content deeper than insertion position")]
    TooDeep,

    /// The open depths of the slice do not line up with the replaced range.
    #[error("inconsistent open depths")]
    InconsistentOpenDepths,

    /// Two nodes with incompatible content were joined.
    #[error("cannot join {sub} onto {main}")]
    CannotJoin { main: SmolStr, sub: SmolStr },

    /// The resulting content does not satisfy the node's content expression.
    #[error("invalid content for node {0}")]
    InvalidContent(SmolStr),
}

/// Errors that can occur while converting between spans, patches and trees.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum RichTextError {
    /// A node flagged as an explicit block has no block mapping.
    #[error("no block mapping for node type {node_type}")]
    SchemaMapping { node_type: SmolStr },

    /// A patch path does not resolve to the expected location.
    #[error("malformed patch path {path:?}: {reason}")]
    MalformedPath { path: Vec<Prop>, reason: String },

    /// A node type that the schema does not define.
    #[error("unknown node type {0}")]
    UnknownNodeType(SmolStr),

    /// A tree position outside the document.
    #[error("position {pos} out of range (document size {size})")]
    PositionOutOfRange { pos: usize, size: usize },

    /// Replace failed.
    #[error(transparent)]
    Replace(#[from] ReplaceError),
}

impl RichTextError {
    pub(crate) fn malformed(path: &[Prop], reason: impl Into<String>) -> Self {
        RichTextError::MalformedPath {
            path: path.to_vec(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = RichTextError> = std::result::Result<T, E>;
