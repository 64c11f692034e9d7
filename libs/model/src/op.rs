use serde::{Deserialize, Serialize};

/// The three remote operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    /// Removes resource, raises instability.
    Extract,
    /// Compounds resource back toward the cap, raises instability.
    Replenish,
    /// Lowers instability toward the floor.
    Stabilize,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OpKind::Extract => "extract",
            OpKind::Replenish => "replenish",
            OpKind::Stabilize => "stabilize",
        };
        write!(f, "{s}")
    }
}

/// Per-thread memory cost of each operation kind, in GB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryCosts {
    pub extract: f64,
    pub replenish: f64,
    pub stabilize: f64,
}

impl Default for MemoryCosts {
    fn default() -> Self {
        Self {
            extract: 1.70,
            replenish: 1.75,
            stabilize: 1.75,
        }
    }
}

impl MemoryCosts {
    pub fn cost_of(&self, kind: OpKind) -> f64 {
        match kind {
            OpKind::Extract => self.extract,
            OpKind::Replenish => self.replenish,
            OpKind::Stabilize => self.stabilize,
        }
    }
}

/// One planned remote operation.
///
/// Ephemeral: created during a planning pass, dispatched (or discarded in
/// dry runs), never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OpKind,
    pub threads: u32,
    pub duration_ms: f64,
    /// `threads * per-thread cost` for this kind.
    pub memory: f64,
}

impl Operation {
    pub fn new(kind: OpKind, threads: u32, duration_ms: f64, costs: &MemoryCosts) -> Self {
        Self {
            kind,
            threads,
            duration_ms,
            memory: f64::from(threads) * costs.cost_of(kind),
        }
    }
}

/// One ordered four-operation sequence against a single target:
/// Extract, Stabilize, Replenish, Stabilize.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub extract: Operation,
    pub stabilize_first: Operation,
    pub replenish: Operation,
    pub stabilize_second: Operation,
}

impl Batch {
    /// Operations in completion order.
    pub fn operations(&self) -> [&Operation; 4] {
        [
            &self.extract,
            &self.stabilize_first,
            &self.replenish,
            &self.stabilize_second,
        ]
    }

    /// Total memory footprint of the batch.
    pub fn memory(&self) -> f64 {
        self.operations().iter().map(|op| op.memory).sum()
    }

    pub fn total_threads(&self) -> u32 {
        self.operations().iter().map(|op| op.threads).sum()
    }
}
