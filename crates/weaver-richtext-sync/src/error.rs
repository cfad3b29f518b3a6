//! Error types for editor/replica synchronization.

use thiserror::Error;
use weaver_richtext::RichTextError;

use crate::Heads;

/// Errors that can occur while keeping the editor and the replica in step.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum SyncError {
    /// Converting between spans, patches and the tree failed.
    #[error(transparent)]
    RichText(#[from] RichTextError),

    /// The replicated document rejected a change.
    #[error("replica error: {0}")]
    Replica(String),

    /// The CRDT backing the replica failed.
    #[error("loro error: {0}")]
    Loro(String),

    /// A local transaction was built on a document the editor no longer
    /// shows and could not be replayed on the current one.
    #[error("transaction is stale and was not applied")]
    StaleTransaction,

    /// A selection could not be carried over a repaired range.
    #[error("selection {anchor}..{head} does not fit the repaired document")]
    SelectionMapping { anchor: usize, head: usize },

    /// Heads that the replica has never produced.
    #[error("unknown heads {0:?}")]
    UnknownHeads(Heads),

    /// Invalid controller configuration.
    #[error("invalid sync configuration: {0}")]
    Config(String),
}

impl From<loro::LoroError> for SyncError {
    fn from(e: loro::LoroError) -> Self {
        SyncError::Loro(e.to_string())
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
