use reap_model::MemoryCosts;

/// Tunable planning parameters.
///
/// The gap, margin, and top-up values are tuned against a specific target
/// model's rounding behavior; a different model needs different values, so
/// none of them are hard-coded at call sites.
#[derive(Debug, Clone)]
pub struct PlanConfig {
    /// Minimum gap between consecutive operation completions, in ms.
    pub safety_gap_ms: f64,

    /// Extra Extract threads beyond the exact inversion. The model is only
    /// piecewise-exact; under-shooting leaves resource behind.
    pub extract_margin: u32,

    /// Replenish top-up absorbing rounding error. Values in `(1, 2)`
    /// multiply the computed thread count; other values are added to it.
    /// Under-shooting here makes the preparation loop fail to converge.
    pub replenish_top_up: f64,

    /// Per-thread memory cost of each operation kind.
    pub memory_costs: MemoryCosts,

    /// Fraction of fleet memory steady-state batching may plan against.
    pub memory_headroom: f64,

    /// Resource fraction counting as "at cap" for preparation.
    pub resource_tolerance: f64,

    /// Absolute instability above the floor counting as "at floor".
    pub instability_tolerance: f64,

    /// Hard ceiling on preparation iterations before giving up.
    pub max_prep_iterations: u32,

    /// Steady-state cycles the preparation cost is amortized over when
    /// scoring targets.
    pub amortize_cycles: u32,

    /// Sample count for the extraction-threshold sweep.
    pub threshold_steps: u32,

    /// Cap on concurrency depth for continuous batching, if any.
    pub max_depth: Option<u32>,

    /// CPU cores per worker node (the fleet is assumed homogeneous).
    pub cores: u32,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            safety_gap_ms: 50.0,
            extract_margin: 1,
            replenish_top_up: 1.1,
            memory_costs: MemoryCosts::default(),
            memory_headroom: 0.9,
            resource_tolerance: 1.0,
            instability_tolerance: 0.0,
            max_prep_iterations: 100,
            amortize_cycles: 3,
            threshold_steps: 200,
            max_depth: None,
            cores: 1,
        }
    }
}
