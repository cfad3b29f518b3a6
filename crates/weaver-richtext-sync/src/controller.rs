//! Keeps an editor tree and a replicated span document in step.

use weaver_richtext::{
    EditorState, Origin, Schema, Selection, Span, Step, Transaction, apply_patches,
    patches_to_transaction, transaction_to_ops, tree_from_spans,
};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::replica::{Heads, ReplicatedDoc};

/// The editor side of the bridge.
pub trait EditorHost {
    /// Current editor state.
    fn state(&self) -> &EditorState;

    /// Applies a transaction and returns the transactions the host
    /// dispatched in reaction to it.
    fn apply(&mut self, tr: Transaction) -> Vec<Transaction>;
}

/// Controller state. While `Applying`, transactions coming back from the
/// editor are the controller's own echo and are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Idle,
    Applying,
}

impl SyncState {
    pub fn is_applying(&self) -> bool {
        matches!(self, Self::Applying)
    }
}

/// Drives one editor and one replica.
///
/// Local edits go through [`dispatch`](Self::dispatch), remote changes are
/// picked up by [`reconcile`](Self::reconcile). Both keep track of the heads
/// last reconciled with the editor.
pub struct SyncController<R> {
    schema: Schema,
    config: SyncConfig,
    replica: R,
    heads: Heads,
    spans: Vec<Span>,
    state: SyncState,
}

impl<R: ReplicatedDoc> SyncController<R> {
    pub fn new(schema: Schema, config: SyncConfig, replica: R) -> Result<Self> {
        let heads = replica.heads();
        let spans = replica.spans()?;
        Ok(Self {
            schema,
            config,
            replica,
            heads,
            spans,
            state: SyncState::Idle,
        })
    }

    /// Editor state for the replica's current content.
    pub fn init_state(&self) -> EditorState {
        EditorState::new(tree_from_spans(&self.schema, &self.spans))
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn heads(&self) -> Heads {
        self.heads
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn replica(&self) -> &R {
        &self.replica
    }

    /// Mutable access for changes made outside the editor, such as merging
    /// in a peer's edits. They reach the editor on the next reconcile.
    pub fn replica_mut(&mut self) -> &mut R {
        &mut self.replica
    }

    /// Handles a transaction made in the editor.
    ///
    /// The edit is written to the replica, then applied to the editor. Any
    /// transactions the editor dispatches in reaction are dropped.
    ///
    /// When the replica has moved on since the editor last saw it, remote
    /// changes are applied first and the transaction is replayed on top of
    /// them. A transaction that cannot be replayed, or that was built on a
    /// document the editor no longer shows, is rejected with
    /// [`SyncError::StaleTransaction`] and nothing is written.
    pub fn dispatch<H: EditorHost>(&mut self, host: &mut H, tr: Transaction) -> Result<()> {
        if self.state.is_applying() {
            tracing::debug!(target: "weaver::sync", "dropping re-entrant dispatch");
            return Ok(());
        }
        if !tr.doc_changed() {
            self.apply_guarded(host, tr);
            return Ok(());
        }
        if *tr.before() != host.state().doc {
            return Err(SyncError::StaleTransaction);
        }
        let mut tr = tr;
        if self.replica.heads() != self.heads {
            tracing::debug!(target: "weaver::sync", "replica moved ahead, reconciling first");
            if let Some(remote) = self.pull(host)? {
                tr = tr
                    .rebase(&self.schema, host.state(), &remote)
                    .ok_or(SyncError::StaleTransaction)?;
                tracing::debug!(target: "weaver::sync", steps = tr.steps().len(), "replayed local edit over remote changes");
            }
        }

        let ops = transaction_to_ops(&self.schema, &self.spans, &tr)?;
        let heads = self.replica.change(&ops)?;
        let echo = self.replica.diff(self.heads, heads)?;
        tracing::debug!(
            target: "weaver::sync",
            ops = ops.len(),
            patches = echo.len(),
            "local edit committed"
        );
        self.apply_guarded(host, tr);

        let actual = self.replica.spans()?;
        let predicted = apply_patches(&self.config.text_path, &self.spans, &echo)?;
        if predicted != actual {
            tracing::warn!(target: "weaver::sync", "patched spans disagree with the replica");
        }
        self.spans = actual;
        self.heads = heads;

        if self.config.verify_after_local {
            self.repair(host)?;
        }
        Ok(())
    }

    /// Brings the editor up to date with changes the replica has gained
    /// since the last reconcile. Returns whether the editor was changed.
    ///
    /// Reconciling twice with no new changes leaves the editor untouched.
    pub fn reconcile<H: EditorHost>(&mut self, host: &mut H) -> Result<bool> {
        Ok(self.pull(host)?.is_some())
    }

    /// Applies the replica's new changes to the editor and returns the steps
    /// the editor document went through, if any.
    fn pull<H: EditorHost>(&mut self, host: &mut H) -> Result<Option<Vec<Step>>> {
        if self.state.is_applying() {
            tracing::debug!(target: "weaver::sync", "dropping re-entrant reconcile");
            return Ok(None);
        }
        let heads = self.replica.heads();
        if heads == self.heads {
            return Ok(None);
        }
        let patches = self.replica.diff(self.heads, heads)?;
        let mut tr = remote_transaction(host.state());
        let patched =
            patches_to_transaction(&self.schema, &self.config.text_path, &self.spans, &patches, &mut tr)?;
        tracing::debug!(
            target: "weaver::sync",
            from = ?self.heads,
            to = ?heads,
            patches = patches.len(),
            steps = tr.steps().len(),
            "applying remote patches"
        );

        let actual = self.replica.spans()?;
        if patched != actual {
            tracing::warn!(target: "weaver::sync", "patched spans disagree with the replica");
        }
        if self.config.verify_remote {
            let expected = tree_from_spans(&self.schema, &actual);
            if *tr.doc() != expected {
                tracing::warn!(target: "weaver::sync", "remote update diverged from rebuild, repairing");
                tr.replace_with(&self.schema, &expected)?;
            }
        }
        self.spans = actual;
        self.heads = heads;
        if !tr.doc_changed() {
            return Ok(None);
        }
        restore_selection(&self.schema, &mut tr);
        let steps = tr.steps().to_vec();
        self.apply_guarded(host, tr);
        Ok(Some(steps))
    }

    /// Replaces the editor document with a rebuild from the spans when the
    /// two disagree.
    fn repair<H: EditorHost>(&mut self, host: &mut H) -> Result<()> {
        let expected = tree_from_spans(&self.schema, &self.spans);
        if host.state().doc == expected {
            return Ok(());
        }
        tracing::warn!(target: "weaver::sync", "editor diverged from replica, repairing");
        let mut tr = remote_transaction(host.state());
        tr.replace_with(&self.schema, &expected)?;
        restore_selection(&self.schema, &mut tr);
        self.apply_guarded(host, tr);
        Ok(())
    }

    fn apply_guarded<H: EditorHost>(&mut self, host: &mut H, tr: Transaction) {
        self.state = SyncState::Applying;
        let reactions = host.apply(tr);
        if !reactions.is_empty() {
            tracing::debug!(
                target: "weaver::sync",
                count = reactions.len(),
                "dropping transactions dispatched while applying"
            );
        }
        self.state = SyncState::Idle;
    }
}

fn remote_transaction(state: &EditorState) -> Transaction {
    let mut tr = Transaction::new(state);
    tr.set_add_to_history(false);
    tr.meta.origin = Origin::Remote;
    tr
}

/// Keeps the mapped selection if it still lands in text, otherwise moves
/// it to the start of the document.
fn restore_selection(schema: &Schema, tr: &mut Transaction) {
    let selection = tr.selection();
    if !selection.fits(schema, tr.doc()) {
        let err = SyncError::SelectionMapping {
            anchor: selection.anchor,
            head: selection.head,
        };
        tracing::warn!(target: "weaver::sync", %err, "dropping selection");
        let start = Selection::at_start(schema, tr.doc());
        tr.set_selection(start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::LoroReplica;
    use serde_json::json;
    use weaver_richtext::{BlockMarker, LinearOp, Marks, Node, spans_from_tree};

    struct TestHost {
        state: EditorState,
        applied: Vec<Transaction>,
        /// Transaction to dispatch in reaction to every apply.
        react: Option<fn(&EditorState) -> Transaction>,
    }

    impl TestHost {
        fn new(state: EditorState) -> Self {
            Self {
                state,
                applied: Vec::new(),
                react: None,
            }
        }
    }

    impl EditorHost for TestHost {
        fn state(&self) -> &EditorState {
            &self.state
        }

        fn apply(&mut self, tr: Transaction) -> Vec<Transaction> {
            self.state = self.state.apply(&tr);
            self.applied.push(tr);
            self.react.map(|react| react(&self.state)).into_iter().collect()
        }
    }

    fn setup(spans: &[Span]) -> (SyncController<LoroReplica>, TestHost) {
        let controller = SyncController::new(
            Schema::basic(),
            SyncConfig::default(),
            LoroReplica::new(spans).unwrap(),
        )
        .unwrap();
        let host = TestHost::new(controller.init_state());
        (controller, host)
    }

    #[test]
    fn test_local_edit_reaches_replica() {
        let (mut controller, mut host) = setup(&[Span::text("hello world")]);
        let schema = Schema::basic();
        let mut tr = Transaction::new(host.state());
        tr.insert_text(&schema, 12, "!", vec![]).unwrap();
        controller.dispatch(&mut host, tr).unwrap();

        assert_eq!(controller.replica().spans().unwrap(), vec![Span::text("hello world!")]);
        assert_eq!(controller.heads(), Heads(1));
        assert_eq!(controller.state(), SyncState::Idle);
        assert_eq!(host.applied.len(), 1);
        assert_eq!(host.state.doc.to_string(), "doc(paragraph(\"hello world!\"))");
    }

    #[test]
    fn test_remote_change_reconciles_once() {
        let (mut controller, mut host) = setup(&[Span::text("hello world")]);
        controller
            .replica_mut()
            .change(&[LinearOp::Splice {
                index: 0,
                delete: 0,
                insert: "oh, ".into(),
                marks: [("em".into(), json!(true))].into_iter().collect(),
            }])
            .unwrap();

        assert!(controller.reconcile(&mut host).unwrap());
        assert!(!controller.reconcile(&mut host).unwrap());
        assert_eq!(host.applied.len(), 1);
        let tr = &host.applied[0];
        assert!(!tr.meta.add_to_history);
        assert_eq!(tr.meta.origin, Origin::Remote);
        assert_eq!(
            host.state.doc.to_string(),
            "doc(paragraph(\"oh, \"[em], \"hello world\"))"
        );
    }

    #[test]
    fn test_reactions_are_dropped() {
        let (mut controller, mut host) = setup(&[Span::text("ab")]);
        host.react = Some(|state| {
            let mut tr = Transaction::new(state);
            tr.insert_text(&Schema::basic(), 1, "x", vec![]).unwrap();
            tr
        });
        let schema = Schema::basic();
        let mut tr = Transaction::new(host.state());
        tr.insert_text(&schema, 3, "c", vec![]).unwrap();
        controller.dispatch(&mut host, tr).unwrap();

        assert_eq!(host.applied.len(), 1);
        assert_eq!(host.state.doc.to_string(), "doc(paragraph(\"abc\"))");
        assert_eq!(controller.replica().spans().unwrap(), vec![Span::text("abc")]);
    }

    #[test]
    fn test_divergent_local_edit_is_repaired() {
        let (mut controller, mut host) = setup(&[Span::text("ab")]);
        let schema = Schema::basic();
        let paragraph = |text: &str| {
            schema.element(
                "paragraph",
                schema.default_attrs("paragraph"),
                vec![Node::text(text, vec![])],
            )
        };
        let target = schema.element(
            "doc",
            schema.default_attrs("doc"),
            vec![paragraph("ab"), paragraph("cd")],
        );
        let mut tr = Transaction::new(host.state());
        tr.replace_with(&schema, &target).unwrap();
        controller.dispatch(&mut host, tr).unwrap();

        assert_eq!(
            controller.replica().spans().unwrap(),
            vec![
                Span::text("ab"),
                Span::block(BlockMarker::new("paragraph")),
                Span::text("cd"),
            ]
        );
        assert_eq!(host.applied.len(), 2);
        assert_eq!(
            host.state.doc.to_string(),
            "doc(paragraph(\"ab\"), paragraph*(\"cd\"))"
        );
        assert_eq!(host.state.doc, tree_from_spans(&schema, controller.spans()));
        assert_eq!(
            spans_from_tree(&schema, &host.state.doc).unwrap(),
            controller.replica().spans().unwrap()
        );
    }

    fn remote_insert(controller: &mut SyncController<LoroReplica>, text: &str) {
        controller
            .replica_mut()
            .change(&[LinearOp::Splice {
                index: 0,
                delete: 0,
                insert: text.into(),
                marks: Marks::new(),
            }])
            .unwrap();
    }

    #[test]
    fn test_stale_transaction_is_replayed() {
        let (mut controller, mut host) = setup(&[Span::text("ab")]);
        remote_insert(&mut controller, "zz");
        let schema = Schema::basic();
        let mut tr = Transaction::new(host.state());
        tr.insert_text(&schema, 3, "c", vec![]).unwrap();
        controller.dispatch(&mut host, tr).unwrap();

        assert_eq!(controller.heads(), Heads(2));
        assert_eq!(host.applied.len(), 2);
        assert_eq!(host.applied[0].meta.origin, Origin::Remote);
        assert_eq!(host.applied[1].meta.origin, Origin::Local);
        assert_eq!(controller.replica().spans().unwrap(), vec![Span::text("zzabc")]);
        assert_eq!(host.state.doc.to_string(), "doc(paragraph(\"zzabc\"))");
    }

    #[test]
    fn test_conflicting_stale_transaction_is_rejected() {
        let (mut controller, mut host) = setup(&[Span::text("ab")]);
        controller
            .replica_mut()
            .change(&[LinearOp::Splice {
                index: 0,
                delete: 2,
                insert: String::new(),
                marks: Marks::new(),
            }])
            .unwrap();
        let schema = Schema::basic();
        let mut tr = Transaction::new(host.state());
        tr.delete(&schema, 2, 3).unwrap();
        let err = controller.dispatch(&mut host, tr).unwrap_err();

        assert_eq!(err, SyncError::StaleTransaction);
        assert_eq!(controller.heads(), Heads(1));
        assert!(controller.replica().spans().unwrap().is_empty());
        assert_eq!(host.applied.len(), 1);
        assert_eq!(host.state.doc.to_string(), "doc(paragraph())");

        let mut old = Transaction::new(&EditorState::new(tree_from_spans(&schema, &[Span::text("ab")])));
        old.insert_text(&schema, 1, "x", vec![]).unwrap();
        assert_eq!(
            controller.dispatch(&mut host, old).unwrap_err(),
            SyncError::StaleTransaction
        );
    }

    #[test]
    fn test_remote_delete_moves_selection_into_text() {
        let (mut controller, mut host) = setup(&[
            Span::block(BlockMarker::new("paragraph")),
            Span::text("ab"),
            Span::block(BlockMarker::new("paragraph")),
            Span::text("cd"),
        ]);
        host.state.selection = Selection::cursor(6);
        controller
            .replica_mut()
            .change(&[LinearOp::Splice {
                index: 3,
                delete: 3,
                insert: String::new(),
                marks: Marks::new(),
            }])
            .unwrap();
        assert!(controller.reconcile(&mut host).unwrap());

        assert_eq!(host.state.doc.to_string(), "doc(paragraph*(\"ab\"))");
        assert_eq!(host.state.selection, Selection::cursor(1));
    }
}
