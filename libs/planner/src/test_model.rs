//! Deterministic reference model for unit and property tests.

use reap_model::{Actor, OpKind, TargetModel, TargetState};

/// Simple target model with linear extract, compounding replenish, and
/// fixed duration ratios (replenish 3.2x, stabilize 4x the extract time).
#[derive(Debug, Clone)]
pub struct TestModel {
    pub extract_fraction: f64,
    pub replenish_rate: f64,
    pub extract_instability_per_thread: f64,
    pub replenish_instability_per_thread: f64,
    pub extract_duration_ms: f64,
    pub experience_per_thread: f64,
}

impl Default for TestModel {
    fn default() -> Self {
        Self {
            extract_fraction: 1e-4,
            replenish_rate: 5e-4,
            extract_instability_per_thread: 0.002,
            replenish_instability_per_thread: 0.004,
            extract_duration_ms: 1_000.0,
            experience_per_thread: 3.0,
        }
    }
}

impl TestModel {
    pub fn with_extract_fraction(fraction: f64) -> Self {
        Self {
            extract_fraction: fraction,
            ..Self::default()
        }
    }
}

impl TargetModel for TestModel {
    fn duration_ms(&self, kind: OpKind, _target: &TargetState, _actor: &Actor) -> f64 {
        match kind {
            OpKind::Extract => self.extract_duration_ms,
            OpKind::Replenish => self.extract_duration_ms * 3.2,
            OpKind::Stabilize => self.extract_duration_ms * 4.0,
        }
    }

    fn extract_fraction(&self, _target: &TargetState, _actor: &Actor) -> f64 {
        self.extract_fraction
    }

    fn replenish_rate(&self, _target: &TargetState, _actor: &Actor, _cores: u32) -> f64 {
        self.replenish_rate
    }

    fn instability_added(&self, kind: OpKind, threads: u32, _cores: u32) -> f64 {
        match kind {
            OpKind::Extract => self.extract_instability_per_thread * f64::from(threads),
            OpKind::Replenish => self.replenish_instability_per_thread * f64::from(threads),
            OpKind::Stabilize => 0.0,
        }
    }

    fn stabilize_power(&self, cores: u32) -> f64 {
        0.05 * (1.0 + f64::from(cores.saturating_sub(1)) / 16.0)
    }

    fn experience_gain(&self, _target: &TargetState, _actor: &Actor, threads: u32) -> f64 {
        self.experience_per_thread * f64::from(threads)
    }

    fn power_for_experience(&self, experience: f64) -> f64 {
        experience.max(0.0).sqrt()
    }
}
