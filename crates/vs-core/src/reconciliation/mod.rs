//! Reconciliation protocol: message model, wire codec and the pure planner.

mod message;
mod plan;
mod types;
pub mod wire;

pub use message::{
    Command, ManualSyncDataRequest, ManualSyncSolve, ReconciliationMessage, SyncRequest,
    SyncResponse, UnknownMessage,
};
pub use plan::{plan, Fallback, IgnoreReason, Lookup, PushKind, ReconcileAction, ReconcilePlan};
pub use types::{AppliedDiffs, Credential, Diff, Digest, VaultSnapshot};
pub use wire::{WireError, WireMessage};
