use serde::{Deserialize, Serialize};

/// A unit of remote execution capacity.
///
/// Worker nodes are owned by the deployment environment; the scheduler only
/// reads their free memory and decides where operations land.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerNode {
    pub name: String,
    /// Total memory in GB.
    pub total_memory: f64,
    /// Memory already in use, `0 <= used <= total`.
    pub used_memory: f64,
}

impl WorkerNode {
    pub fn new(name: impl Into<String>, total_memory: f64, used_memory: f64) -> Self {
        Self {
            name: name.into(),
            total_memory,
            used_memory,
        }
    }

    /// Free memory, clamped at zero for defensively reported over-use.
    pub fn available_memory(&self) -> f64 {
        (self.total_memory - self.used_memory).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_memory_clamps_at_zero() {
        let node = WorkerNode::new("w0", 32.0, 40.0);
        assert_eq!(node.available_memory(), 0.0);

        let node = WorkerNode::new("w1", 64.0, 16.0);
        assert_eq!(node.available_memory(), 48.0);
    }
}
