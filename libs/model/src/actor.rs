use serde::{Deserialize, Serialize};

/// Snapshot of the operator's capability.
///
/// Experience only grows, and power is a nondecreasing function of
/// cumulative experience. Planning passes carry a simulated copy forward
/// (recomputing power through the model after each predicted operation),
/// distinct from the authoritative state the environment reports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub power: f64,
    pub experience: f64,
}

impl Actor {
    pub fn new(power: f64, experience: f64) -> Self {
        Self { power, experience }
    }
}
