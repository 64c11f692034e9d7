//! Execute-mode preparation driver.
//!
//! Re-reads authoritative state each round, plans a Replenish/Stabilize
//! pair through the pure step planner, dispatches it, waits out the round,
//! then compares what actually happened against the prediction. Drift
//! within tolerance is expected (the next round re-reads and
//! self-corrects); drift beyond it is logged, never fatal. Only hitting
//! the iteration ceiling is fatal: batching must not start against an
//! unprepared target.

use reap_model::{KahanAccumulator, OpKind, TargetModel, TargetState};
use reap_planner::alloc::place;
use reap_planner::prep::{self, PrepPlan, PrepStep};
use tracing::{debug, info, warn};

use crate::{Environment, SchedulerConfig, SchedulerError};

/// Result of driving a target to baseline.
#[derive(Debug, Clone, Copy)]
pub struct PrepOutcome {
    pub iterations: u32,
    /// Total time spent waiting on rounds, in ms of environment time.
    pub elapsed_ms: f64,
}

/// Drive `target` to baseline, blocking until it converges.
pub async fn prepare<E, M>(
    env: &E,
    model: &M,
    cfg: &SchedulerConfig,
    target: &str,
) -> Result<PrepOutcome, SchedulerError>
where
    E: Environment,
    M: TargetModel,
{
    let plan_cfg = cfg.plan();
    let mut elapsed_ms = 0.0;

    for iteration in 0..cfg.max_prep_iterations {
        let snapshot = env.target_state(target).await?;
        let actor = env.actor_state().await?;
        let nodes = env.worker_nodes().await?;

        let step = match prep::plan_step(&snapshot, &actor, &nodes, &plan_cfg, model) {
            Ok(PrepPlan::Converged) => {
                info!(
                    target,
                    iterations = iteration,
                    elapsed_ms,
                    "Target prepared"
                );
                return Ok(PrepOutcome {
                    iterations: iteration,
                    elapsed_ms,
                });
            }
            Ok(PrepPlan::Stalled) => {
                // Fleet memory is externally owned and may free up.
                warn!(target, "No preparation operation fits the fleet; backing off");
                env.sleep(cfg.backoff_ms).await;
                elapsed_ms += cfg.backoff_ms;
                continue;
            }
            Ok(PrepPlan::Step(step)) => step,
            Err(e) => return Err(SchedulerError::from_plan(target, e)),
        };

        // Predict the round's outcome before dispatching, for drift checks.
        let mut predicted = snapshot.clone();
        let mut predicted_actor = actor;
        let mut experience = KahanAccumulator::new(actor.experience);
        prep::apply_step(
            &mut predicted,
            &mut predicted_actor,
            &mut experience,
            &step,
            &plan_cfg,
            model,
        );

        let Some(last_handle) = dispatch_round(env, &plan_cfg, target, &snapshot, &step).await? else {
            // The fleet shifted between read and dispatch; re-plan.
            warn!(target, "Preparation round no longer fits; backing off");
            env.sleep(cfg.backoff_ms).await;
            elapsed_ms += cfg.backoff_ms;
            continue;
        };

        // The duration wait covers the round; polling mops up jitter.
        env.sleep(step.wait_ms).await;
        elapsed_ms += step.wait_ms;
        wait_complete(env, cfg, last_handle).await?;

        let observed = env.target_state(target).await?;
        report_drift(cfg, &predicted, &observed);

        debug!(
            target,
            iteration,
            resource = observed.resource_available,
            instability = observed.instability,
            "Preparation round complete"
        );
    }

    Err(SchedulerError::NonConvergence {
        target: target.to_string(),
        iterations: cfg.max_prep_iterations,
    })
}

/// Place and dispatch one round's operations. Returns the last handle, or
/// `None` when placement no longer fits the live fleet.
async fn dispatch_round<E>(
    env: &E,
    plan_cfg: &reap_planner::PlanConfig,
    target: &str,
    snapshot: &TargetState,
    step: &PrepStep,
) -> Result<Option<crate::ProcessHandle>, SchedulerError>
where
    E: Environment,
{
    let mut ops: Vec<(OpKind, u32, f64)> = Vec::with_capacity(2);
    if step.replenish_threads > 0 {
        ops.push((
            OpKind::Replenish,
            step.replenish_threads,
            f64::from(step.replenish_threads) * plan_cfg.memory_costs.replenish,
        ));
    }
    if step.stabilize_threads > 0 {
        ops.push((
            OpKind::Stabilize,
            step.stabilize_threads,
            f64::from(step.stabilize_threads) * plan_cfg.memory_costs.stabilize,
        ));
    }

    let nodes = env.worker_nodes().await?;
    let costs: Vec<f64> = ops.iter().map(|(_, _, memory)| *memory).collect();
    let placement = place(&costs, &nodes);
    if !placement.all_placed(ops.len()) {
        return Ok(None);
    }

    let mut last = None;
    for assignment in &placement.assignments {
        let (kind, threads, _) = ops[assignment.op_index];
        let handle = env
            .dispatch(kind, &assignment.node, threads, &snapshot.name, 0.0)
            .await?;
        last = Some(handle);
    }

    info!(
        target,
        replenish = step.replenish_threads,
        stabilize = step.stabilize_threads,
        wait_ms = step.wait_ms,
        "Dispatched preparation round"
    );

    Ok(last)
}

pub(crate) async fn wait_complete<E>(
    env: &E,
    cfg: &SchedulerConfig,
    handle: crate::ProcessHandle,
) -> Result<(), SchedulerError>
where
    E: Environment,
{
    while !env.poll_complete(handle).await? {
        env.sleep(cfg.poll_interval_ms).await;
    }
    Ok(())
}

fn report_drift(cfg: &SchedulerConfig, predicted: &TargetState, observed: &TargetState) {
    let resource_drift = if observed.resource_max > 0.0 {
        (observed.resource_available - predicted.resource_available).abs() / observed.resource_max
    } else {
        0.0
    };
    let instability_drift = (observed.instability - predicted.instability).abs();

    if resource_drift > cfg.drift_tolerance
        || instability_drift > cfg.instability_drift_tolerance
    {
        warn!(
            target = %observed.name,
            resource_drift,
            instability_drift,
            predicted_resource = predicted.resource_available,
            observed_resource = observed.resource_available,
            "Observed state drifted beyond tolerance; next round re-reads and corrects"
        );
    }
}
