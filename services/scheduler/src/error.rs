use reap_planner::PlanError;
use thiserror::Error;

/// Scheduler-level errors.
///
/// Transient conditions (an unplaceable cycle, tolerable drift) are logged
/// and retried inside the loops; only conditions the caller must act on
/// surface here.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No feasible period/depth within search bounds. Callers fall back to
    /// a lower depth or single-batch mode before giving up.
    #[error("infeasible schedule")]
    Infeasible(#[source] PlanError),

    /// Preparation hit its iteration ceiling without reaching baseline.
    /// Fatal for this target: steady-state batching must not start against
    /// an unprepared target.
    #[error("target {target} failed to converge within {iterations} preparation rounds")]
    NonConvergence { target: String, iterations: u32 },

    /// The model returned values no plan can be built from.
    #[error("model anomaly for {target}: {detail}")]
    ModelAnomaly { target: String, detail: String },

    /// Batching was requested against a target that is not at baseline.
    #[error("target {target} is not prepared")]
    NotPrepared { target: String },

    /// The fleet cannot host a single batch for this target at any
    /// threshold.
    #[error("no batch for {target} fits the worker fleet")]
    Unplaceable { target: String },

    /// The environment failed to answer a read, dispatch, or poll.
    #[error("environment error")]
    Environment(#[from] anyhow::Error),
}

impl SchedulerError {
    pub(crate) fn from_plan(target: &str, err: PlanError) -> Self {
        match err {
            PlanError::Unschedulable { target, detail } => {
                SchedulerError::ModelAnomaly { target, detail }
            }
            PlanError::InfeasibleSchedule { .. } => SchedulerError::Infeasible(err),
            PlanError::NoProgress { .. } => SchedulerError::Unplaceable {
                target: target.to_string(),
            },
        }
    }
}
