//! pdk-reconcile
//!
//! Resolves UNKNOWN orders and divergent positions by treating the broker
//! as the source of truth.
//!
//! The idempotency guarantee of this crate: reconciliation only READS
//! from the broker and WRITES to local substrates. It never places and
//! never cancels, so any number of passes leaves the broker's side-effect
//! count unchanged.

mod engine;

pub use engine::{
    resolution_from_view, ReconcileConfig, ReconcileOutcome, Reconciler, SweepReport,
};
