//! weaver-richtext: mapping between a linear span model and a document tree.
//!
//! This crate provides:
//! - `Span` / `BlockMarker` - the flat model stored in a replicated text field
//! - `Schema` - node types, content rules and the block/mark registry
//! - `tree` - nodes, positions, steps and transactions over the tree
//! - `traversal` - span and tree walks producing a shared event stream
//! - `IndexTranslator` - linear index to tree position translation
//! - `patches_to_transaction` / `transaction_to_ops` - edit translation both ways

pub mod content;
pub mod error;
pub mod index;
pub mod patch;
pub mod patch_to_tree;
pub mod schema;
pub mod span;
pub mod span_patcher;
pub mod traversal;
pub mod tree;
pub mod tree_to_linear;

pub use error::{ReplaceError, Result, RichTextError};
pub use index::{IndexPair, IndexTranslator, IndexedEvent, events_with_index_changes};
pub use patch::{LinearOp, MarkRange, Patch, PatchAction, PatchTarget, Prop, resolve_path};
pub use patch_to_tree::patches_to_transaction;
pub use schema::{BlockMapping, MarkMapping, MarkValue, Schema};
pub use smol_str::SmolStr;
pub use span::{Attrs, BlockMarker, Marks, Span, linear_len, normalize};
pub use span_patcher::{apply_patches, patch_spans};
pub use traversal::{
    Role, TraversalEvent, spans_from_tree, traverse_node, traverse_spans, tree_from_spans,
};
pub use tree::{EditorState, Node, Origin, Selection, Step, Transaction};
pub use tree_to_linear::{diff_spans, transaction_to_ops};
