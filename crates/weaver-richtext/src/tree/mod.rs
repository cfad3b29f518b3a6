//! Schema-constrained document tree and the steps that edit it.

mod node;
mod replace;
mod resolved;
mod step;
mod transaction;

pub use node::{Element, Fragment, Mark, Node, Slice, TextNode};
pub use replace::replace;
pub use resolved::ResolvedPos;
pub use step::Step;
pub use transaction::{
    EditorState, Origin, Selection, Transaction, TransactionMeta, diff_step,
};
