//! Target ranking entry point for external selection tooling.

use reap_model::{TargetModel, TargetState};
use reap_planner::profit::{self, TargetEvaluation};
use tracing::warn;

use crate::{Environment, SchedulerConfig, SchedulerError};

/// Rank candidate targets by best amortized yield rate against the current
/// actor and fleet. Unreadable candidates are skipped with a warning;
/// ineligible ones are silently dropped by the search itself.
pub async fn rank_targets<E, M>(
    env: &E,
    model: &M,
    cfg: &SchedulerConfig,
    candidates: &[String],
) -> Result<Vec<TargetEvaluation>, SchedulerError>
where
    E: Environment,
    M: TargetModel,
{
    let actor = env.actor_state().await?;
    let nodes = env.worker_nodes().await?;

    let mut targets: Vec<TargetState> = Vec::with_capacity(candidates.len());
    for name in candidates {
        match env.target_state(name).await {
            Ok(state) => targets.push(state),
            Err(e) => warn!(target = %name, error = %e, "Skipping unreadable candidate"),
        }
    }

    Ok(profit::rank_targets(
        &targets,
        &actor,
        &nodes,
        &cfg.plan(),
        model,
    ))
}
