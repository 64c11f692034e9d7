use std::str::FromStr;

use anyhow::{Context, Result};
use reap_planner::PlanConfig;

/// Scheduler configuration, read from `REAP_*` environment variables with
/// defaults suitable for the reference model. Every empirically tuned
/// constant lives here rather than at a call site.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub log_level: String,

    /// Minimum gap between operation completions, in ms.
    pub safety_gap_ms: f64,
    /// Extra Extract threads beyond the exact inversion.
    pub extract_margin: u32,
    /// Replenish top-up: values in (1, 2) multiply, others add.
    pub replenish_top_up: f64,
    /// Fraction of fleet memory batching may plan against.
    pub memory_headroom: f64,
    /// Resource fraction counting as prepared.
    pub resource_tolerance: f64,
    /// Instability above floor counting as prepared.
    pub instability_tolerance: f64,
    /// Preparation iteration ceiling.
    pub max_prep_iterations: u32,
    /// Cycles the preparation cost is amortized over when ranking.
    pub amortize_cycles: u32,
    /// Threshold sweep sample count.
    pub threshold_steps: u32,
    /// Concurrency depth cap, 0 meaning uncapped.
    pub max_depth: u32,
    /// Worker CPU cores (fleet assumed homogeneous).
    pub cores: u32,

    /// Sleep before retrying after an unplaceable or stalled cycle, in ms.
    pub backoff_ms: f64,
    /// Interval between completion polls, in ms.
    pub poll_interval_ms: f64,
    /// Relative resource drift (predicted vs actual) worth a warning.
    pub drift_tolerance: f64,
    /// Absolute instability drift worth a warning.
    pub instability_drift_tolerance: f64,
    /// Keep multiple batches in flight instead of one at a time.
    pub high_throughput: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            safety_gap_ms: 50.0,
            extract_margin: 1,
            replenish_top_up: 1.1,
            memory_headroom: 0.9,
            resource_tolerance: 1.0,
            instability_tolerance: 0.0,
            max_prep_iterations: 100,
            amortize_cycles: 3,
            threshold_steps: 200,
            max_depth: 0,
            cores: 1,
            backoff_ms: 500.0,
            poll_interval_ms: 100.0,
            drift_tolerance: 0.02,
            instability_drift_tolerance: 1.0,
            high_throughput: false,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            log_level: std::env::var("REAP_LOG_LEVEL").unwrap_or(defaults.log_level),
            safety_gap_ms: var_or("REAP_SAFETY_GAP_MS", defaults.safety_gap_ms)?,
            extract_margin: var_or("REAP_EXTRACT_MARGIN", defaults.extract_margin)?,
            replenish_top_up: var_or("REAP_REPLENISH_TOP_UP", defaults.replenish_top_up)?,
            memory_headroom: var_or("REAP_MEMORY_HEADROOM", defaults.memory_headroom)?,
            resource_tolerance: var_or("REAP_RESOURCE_TOLERANCE", defaults.resource_tolerance)?,
            instability_tolerance: var_or(
                "REAP_INSTABILITY_TOLERANCE",
                defaults.instability_tolerance,
            )?,
            max_prep_iterations: var_or("REAP_MAX_PREP_ITERATIONS", defaults.max_prep_iterations)?,
            amortize_cycles: var_or("REAP_AMORTIZE_CYCLES", defaults.amortize_cycles)?,
            threshold_steps: var_or("REAP_THRESHOLD_STEPS", defaults.threshold_steps)?,
            max_depth: var_or("REAP_MAX_DEPTH", defaults.max_depth)?,
            cores: var_or("REAP_CORES", defaults.cores)?,
            backoff_ms: var_or("REAP_BACKOFF_MS", defaults.backoff_ms)?,
            poll_interval_ms: var_or("REAP_POLL_INTERVAL_MS", defaults.poll_interval_ms)?,
            drift_tolerance: var_or("REAP_DRIFT_TOLERANCE", defaults.drift_tolerance)?,
            instability_drift_tolerance: var_or(
                "REAP_INSTABILITY_DRIFT_TOLERANCE",
                defaults.instability_drift_tolerance,
            )?,
            high_throughput: var_or("REAP_HIGH_THROUGHPUT", defaults.high_throughput)?,
        })
    }

    /// The planning-parameter subset handed to `reap-planner`.
    pub fn plan(&self) -> PlanConfig {
        PlanConfig {
            safety_gap_ms: self.safety_gap_ms,
            extract_margin: self.extract_margin,
            replenish_top_up: self.replenish_top_up,
            memory_costs: Default::default(),
            memory_headroom: self.memory_headroom,
            resource_tolerance: self.resource_tolerance,
            instability_tolerance: self.instability_tolerance,
            max_prep_iterations: self.max_prep_iterations,
            amortize_cycles: self.amortize_cycles,
            threshold_steps: self.threshold_steps,
            max_depth: (self.max_depth > 0).then_some(self.max_depth),
            cores: self.cores,
        }
    }
}

fn var_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse().with_context(|| format!("invalid {name}: {raw}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_produce_a_plan_config() {
        let cfg = SchedulerConfig::default();
        let plan = cfg.plan();
        assert_eq!(plan.safety_gap_ms, 50.0);
        assert_eq!(plan.max_depth, None);
        assert_eq!(plan.max_prep_iterations, 100);
    }

    #[test]
    fn test_depth_cap_zero_means_uncapped() {
        let mut cfg = SchedulerConfig::default();
        cfg.max_depth = 4;
        assert_eq!(cfg.plan().max_depth, Some(4));
        cfg.max_depth = 0;
        assert_eq!(cfg.plan().max_depth, None);
    }
}
