//! The seam between the scheduler and its deployment environment.
//!
//! The environment owns all authoritative state: target snapshots, the
//! actor, the worker fleet, and the remote processes themselves. The
//! scheduler only reads state, dispatches operations with a start delay,
//! and polls for completion. Once dispatched, an operation runs to
//! completion on its own; the scheduler controls nothing but its start
//! time.

use anyhow::Result;
use async_trait::async_trait;
use reap_model::{Actor, OpKind, TargetState, WorkerNode};

/// Opaque handle to a dispatched remote operation.
pub type ProcessHandle = u64;

#[async_trait]
pub trait Environment: Send + Sync {
    /// Authoritative snapshot of one target.
    async fn target_state(&self, name: &str) -> Result<TargetState>;

    /// Authoritative actor state.
    async fn actor_state(&self) -> Result<Actor>;

    /// The worker fleet with current memory usage.
    async fn worker_nodes(&self) -> Result<Vec<WorkerNode>>;

    /// Launch `threads` of `kind` against `target` on `node`, starting
    /// after `delay_ms`. The node's memory is committed immediately.
    async fn dispatch(
        &self,
        kind: OpKind,
        node: &str,
        threads: u32,
        target: &str,
        delay_ms: f64,
    ) -> Result<ProcessHandle>;

    /// Whether a dispatched operation has completed.
    async fn poll_complete(&self, handle: ProcessHandle) -> Result<bool>;

    /// Cooperative suspension for `duration_ms`.
    async fn sleep(&self, duration_ms: f64);
}
