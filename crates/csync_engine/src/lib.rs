//! # csync engine
//!
//! Bidirectional synchronization of two directory trees ("replicas").
//!
//! This crate provides:
//! - The [`Replica`] capability and its backends: local disk
//!   ([`LocalReplica`]), in-memory ([`MemoryReplica`]) and authenticated
//!   remote modules ([`RemoteReplica`])
//! - Update detection against the journal ([`detect`])
//! - Reconciliation of both replicas' changes into an [`ActionPlan`]
//! - Propagation of the plan with retries and per-path error isolation
//! - The [`SyncContext`] lifecycle that ties it together
//!
//! ## Architecture
//!
//! A run is a three-way merge: each replica is compared with the journal
//! (the base version of every path as of the last successful sync), the
//! two classifications are merged, and the resulting actions are applied.
//!
//! ```text
//! local ──detect──┐
//!                 ├──reconcile──> ActionPlan ──propagate──> replicas + journal
//! remote ─detect──┘
//! ```
//!
//! ## Key Invariants
//!
//! - A path changed on both replicas is never overwritten silently; both
//!   versions are kept
//! - A path is only written to the journal after its action succeeded
//! - A failed path does not stop the run; it is reported and retried next
//!   time
//! - Running twice without changes in between does nothing the second time

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod detect;
mod error;
mod propagate;
mod reconcile;
mod replica;
mod report;

pub use config::{DetectOptions, RetryConfig, SyncConfig};
pub use context::{CancelHandle, ContextState, SyncContext};
pub use detect::detect;
pub use error::{ReplicaError, ReplicaResult, SyncError, SyncResult};
pub use propagate::{PropagationOutcome, Propagator};
pub use reconcile::{
    merge, reconcile, Action, ActionKind, ActionPlan, Change, ConflictKind, Phase, Verdict,
};
pub use replica::{
    content_checksum, AuthCallback, Connector, Credentials, DirectoryConnector, FaultOp, ListItem,
    LocalReplica, MemoryReplica, RemoteReplica, Replica, ReplicaCapabilities,
};
pub use report::{ConflictReport, PathError, RunReport, RunStats, RunStatus};
