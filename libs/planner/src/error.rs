use thiserror::Error;

/// Planning errors.
///
/// `Unschedulable` is a sentinel, not a crash: the model returned values
/// that cannot be inverted into a sane plan (non-finite, negative, or
/// zero-effect), and the caller must treat the batch as infeasible for
/// this cycle.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The target model produced values no valid plan can be built from.
    #[error("unschedulable: {target}: {detail}")]
    Unschedulable { target: String, detail: String },

    /// No dispatch-delay assignment satisfies the completion ordering
    /// within the requested period/depth bounds.
    #[error("infeasible schedule: {detail}")]
    InfeasibleSchedule { detail: String },

    /// A preparation pass cannot place a single operation, so the target
    /// cannot make progress toward baseline with the current fleet.
    #[error("no progress possible for {target}: insufficient fleet memory")]
    NoProgress { target: String },
}

impl PlanError {
    pub(crate) fn unschedulable(target: &str, detail: impl Into<String>) -> Self {
        PlanError::Unschedulable {
            target: target.to_string(),
            detail: detail.into(),
        }
    }
}
