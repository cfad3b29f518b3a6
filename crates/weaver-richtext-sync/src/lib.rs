//! weaver-richtext-sync: keeps an editor tree and a replicated span document in step.
//!
//! This crate provides:
//! - `ReplicatedDoc`: Trait for the replicated document holding the spans
//! - `LoroReplica`: Replica over a Loro text container with a change log
//! - `EditorHost`: Trait for the editor the controller drives
//! - `SyncController`: Local edit dispatch, remote reconciliation and divergence repair
//! - `SyncConfig`: Controller settings

mod config;
mod controller;
mod error;
mod replica;

pub use config::SyncConfig;
pub use controller::{EditorHost, SyncController, SyncState};
pub use error::{Result, SyncError};
pub use replica::{Heads, LoroReplica, ReplicatedDoc};
