//! Pure reconciliation planner.
//!
//! Maps an inbound message and the local digest onto one of a small closed
//! set of actions. The only input that needs a collaborator round trip is
//! "diffs since the peer's digest"; that case is returned as a [`Lookup`]
//! which the executor resolves once it has the diffs.
//!
//! ```text
//! (command,        hash,  diffs)      → action
//! SyncRequest      == H   *           → Converged + SyncResponse{H}
//! SyncRequest      != H   non-empty   → CommitAndAck
//! SyncRequest      != H   empty       → Lookup → PushDiffs(Response) | Reply{H}
//! SyncResponse     none   non-empty   → ManualMergeNeeded
//! SyncResponse     == H   *           → Converged
//! SyncResponse     != H   empty       → Lookup → PushDiffs(Request) | RequestManualMerge
//! SyncResponse     != H   non-empty   → CommitAndAck
//! ManualSyncDataRequest               → SendFullState
//! ManualSyncSolve                     → CommitAndAck
//! unknown                             → Ignore
//! ```

use crate::ids::MessageId;

use super::message::{ReconciliationMessage, SyncResponse};
use super::types::{Diff, Digest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Both replicas hold the same digest. `reply` is sent when the peer asked.
    Converged {
        reply: Option<ReconciliationMessage>,
    },
    /// Verify that `diffs` take the local set to `target`, commit, then
    /// acknowledge with a `SyncRequest` carrying the new digest.
    CommitAndAck {
        id: MessageId,
        target: Digest,
        diffs: Vec<Diff>,
    },
    /// Local side is ahead: send these diffs.
    PushDiffs { message: ReconciliationMessage },
    /// Peer's digest is unknown and nothing newer exists locally.
    Reply { message: ReconciliationMessage },
    /// No hash-chain link between the replicas: ask for the full state.
    RequestManualMerge { id: MessageId },
    /// Peer asked for the full state.
    SendFullState { id: MessageId },
    /// A full-state payload arrived; a caller has to decide the merge.
    ManualMergeNeeded { id: MessageId, diffs: Vec<Diff> },
    Ignore { reason: IgnoreReason },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownCommand(u32),
    EmptyResponse,
}

/// How found diffs are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushKind {
    Response,
    Request,
}

/// What to do when no diffs since the peer's digest exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    ReplyWithoutDiffs,
    RequestManualMerge,
}

/// Pending "diffs since" lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub id: MessageId,
    pub local_hash: Digest,
    pub push_as: PushKind,
    pub fallback: Fallback,
}

impl Lookup {
    pub fn resolve(self, diffs: Vec<Diff>) -> ReconcileAction {
        if !diffs.is_empty() {
            let message = match self.push_as {
                PushKind::Response => {
                    ReconciliationMessage::sync_response(self.id, Some(self.local_hash), diffs)
                }
                PushKind::Request => {
                    ReconciliationMessage::sync_request(self.id, self.local_hash, diffs)
                }
            };
            return ReconcileAction::PushDiffs { message };
        }

        match self.fallback {
            Fallback::ReplyWithoutDiffs => ReconcileAction::Reply {
                message: ReconciliationMessage::sync_response(
                    self.id,
                    Some(self.local_hash),
                    Vec::new(),
                ),
            },
            Fallback::RequestManualMerge => ReconcileAction::RequestManualMerge { id: self.id },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcilePlan {
    Ready(ReconcileAction),
    LookupDiffsSince { since: Digest, then: Lookup },
}

pub fn plan(message: ReconciliationMessage, local_hash: &Digest) -> ReconcilePlan {
    use ReconcileAction::*;

    let action = match message {
        ReconciliationMessage::SyncRequest(req) => {
            if req.hash == *local_hash {
                Converged {
                    reply: Some(ReconciliationMessage::sync_response(
                        req.id,
                        Some(local_hash.clone()),
                        Vec::new(),
                    )),
                }
            } else if !req.diffs.is_empty() {
                CommitAndAck {
                    id: req.id,
                    target: req.hash,
                    diffs: req.diffs,
                }
            } else {
                return ReconcilePlan::LookupDiffsSince {
                    since: req.hash,
                    then: Lookup {
                        id: req.id,
                        local_hash: local_hash.clone(),
                        push_as: PushKind::Response,
                        fallback: Fallback::ReplyWithoutDiffs,
                    },
                };
            }
        }
        ReconciliationMessage::SyncResponse(SyncResponse {
            id,
            hash: None,
            diffs,
        }) => {
            if diffs.is_empty() {
                Ignore {
                    reason: IgnoreReason::EmptyResponse,
                }
            } else {
                ManualMergeNeeded { id, diffs }
            }
        }
        ReconciliationMessage::SyncResponse(SyncResponse {
            id,
            hash: Some(hash),
            diffs,
        }) => {
            if hash == *local_hash {
                Converged { reply: None }
            } else if diffs.is_empty() {
                return ReconcilePlan::LookupDiffsSince {
                    since: hash,
                    then: Lookup {
                        id,
                        local_hash: local_hash.clone(),
                        push_as: PushKind::Request,
                        fallback: Fallback::RequestManualMerge,
                    },
                };
            } else {
                CommitAndAck {
                    id,
                    target: hash,
                    diffs,
                }
            }
        }
        ReconciliationMessage::ManualSyncDataRequest(req) => SendFullState { id: req.id },
        ReconciliationMessage::ManualSyncSolve(solve) => CommitAndAck {
            id: solve.id,
            target: solve.hash,
            diffs: solve.diffs,
        },
        ReconciliationMessage::Unknown(unknown) => Ignore {
            reason: IgnoreReason::UnknownCommand(unknown.command_code()),
        },
    };

    ReconcilePlan::Ready(action)
}
