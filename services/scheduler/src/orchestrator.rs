//! Steady-state batch orchestrator.
//!
//! One cooperative loop: recompute thread counts and timings against the
//! current target/actor snapshot (never a stale one — actor power and
//! target instability drift between cycles), place and dispatch a wave of
//! batches, wait for the wave's last operation, repeat. Low-throughput
//! mode keeps one batch in flight; high-throughput mode staggers batches
//! at the searched period up to the memory-bounded concurrency depth.
//!
//! An unplaceable cycle is zero throughput, not an error: it is logged and
//! retried after a backoff. A model anomaly skips the cycle entirely
//! rather than dispatching garbage thread counts.

use reap_model::{KahanAccumulator, TargetModel, WorkerNode};
use reap_planner::alloc::{fleet_capacity, place};
use reap_planner::threads::{plan_batch, plan_batch_fitting};
use reap_planner::timing::{BatchTimings, KindDurations, ScheduleConfig};
use reap_planner::{profit, PlanError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::prepare::wait_complete;
use crate::{Environment, SchedulerConfig, SchedulerError};

/// Counters from a batching run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    /// Completed dispatch cycles.
    pub cycles: u32,
    /// Cycles skipped for anomalies or placement failures.
    pub skipped_cycles: u32,
    pub batches_dispatched: u64,
    /// Yield the dispatched batches should produce if the model holds.
    pub predicted_yield: f64,
}

/// Run batch cycles against a prepared target until the stop signal flips,
/// or for `cycle_limit` planning passes when given.
///
/// `threshold_override` skips the profitability sweep and batches at the
/// given extraction threshold.
pub async fn run_batches<E, M>(
    env: &E,
    model: &M,
    cfg: &SchedulerConfig,
    target_name: &str,
    threshold_override: Option<f64>,
    cycle_limit: Option<u32>,
    shutdown: watch::Receiver<bool>,
) -> Result<RunStats, SchedulerError>
where
    E: Environment,
    M: TargetModel,
{
    let plan_cfg = cfg.plan();

    let entry = env.target_state(target_name).await?;
    if !entry.is_baseline(cfg.resource_tolerance, cfg.instability_tolerance) {
        return Err(SchedulerError::NotPrepared {
            target: target_name.to_string(),
        });
    }

    let base_threshold = match threshold_override {
        Some(threshold) => threshold,
        None => {
            let actor = env.actor_state().await?;
            let nodes = env.worker_nodes().await?;
            let eval = profit::evaluate_target(&entry, &actor, &nodes, &plan_cfg, model).ok_or(
                SchedulerError::Unplaceable {
                    target: target_name.to_string(),
                },
            )?;
            info!(
                target = target_name,
                threshold = eval.threshold,
                rate_per_sec = eval.rate_per_sec,
                "Selected extraction threshold"
            );
            eval.threshold
        }
    };

    let mut stats = RunStats::default();

    loop {
        if *shutdown.borrow() {
            info!(target = target_name, "Stop signal received");
            break;
        }
        if let Some(limit) = cycle_limit {
            if stats.cycles + stats.skipped_cycles >= limit {
                break;
            }
        }

        let target = env.target_state(target_name).await?;
        let actor = env.actor_state().await?;
        let nodes = env.worker_nodes().await?;

        if !target.is_baseline(cfg.resource_tolerance, cfg.instability_tolerance) {
            warn!(
                target = target_name,
                resource_ratio = target.resource_ratio(),
                excess_instability = target.excess_instability(),
                "Target drifted off baseline; planning against observed state"
            );
        }

        // A batch's four operations can land on different nodes, but each
        // one must fit somewhere.
        let node_limit = nodes
            .iter()
            .map(WorkerNode::available_memory)
            .fold(0.0f64, f64::max);

        let (reference, threshold) =
            match plan_batch_fitting(&target, &actor, base_threshold, node_limit, &plan_cfg, model)
            {
                Ok(planned) => planned,
                Err(e) => {
                    warn!(target = target_name, error = %e, "Skipping cycle");
                    stats.skipped_cycles += 1;
                    env.sleep(cfg.backoff_ms).await;
                    continue;
                }
            };

        let durations = KindDurations {
            extract_ms: reference.extract.duration_ms,
            replenish_ms: reference.replenish.duration_ms,
            stabilize_ms: reference.stabilize_first.duration_ms,
        };

        let Some((delays, period_ms, depth_cap, span_ms)) =
            cycle_timings(cfg, &plan_cfg, &durations)
        else {
            stats.skipped_cycles += 1;
            env.sleep(cfg.backoff_ms).await;
            continue;
        };

        let memory_cap =
            (fleet_capacity(&nodes, plan_cfg.memory_headroom) / reference.memory()).floor() as u32;
        let wave_size = depth_cap.min(memory_cap);
        if wave_size == 0 {
            warn!(
                target = target_name,
                batch_memory = reference.memory(),
                "No batch fits the fleet this cycle; backing off"
            );
            stats.skipped_cycles += 1;
            env.sleep(cfg.backoff_ms).await;
            continue;
        }

        // Dispatch the wave, carrying a simulated actor forward so later
        // batches are sized for the power the earlier ones will have earned.
        let mut remaining = nodes.clone();
        let mut sim_actor = actor;
        let mut experience = KahanAccumulator::new(actor.experience);
        let mut launched: u32 = 0;
        let mut last_handle = None;

        for index in 0..wave_size {
            let batch = if index == 0 {
                reference.clone()
            } else {
                match plan_batch(&target, &sim_actor, threshold, &plan_cfg, model) {
                    Ok(batch) => batch,
                    Err(e) => {
                        warn!(target = target_name, error = %e, "Stopping wave early");
                        break;
                    }
                }
            };

            let ops = batch.operations();
            let costs: Vec<f64> = ops.iter().map(|op| op.memory).collect();
            let placement = place(&costs, &remaining);
            if !placement.all_placed(ops.len()) {
                break;
            }

            for assignment in &placement.assignments {
                if let Some(node) = remaining.iter_mut().find(|n| n.name == assignment.node) {
                    node.used_memory += costs[assignment.op_index];
                }
            }

            let offset_ms = f64::from(index) * period_ms;
            for assignment in &placement.assignments {
                let op = ops[assignment.op_index];
                let handle = env
                    .dispatch(
                        op.kind,
                        &assignment.node,
                        op.threads,
                        &target.name,
                        offset_ms + delays[assignment.op_index],
                    )
                    .await?;
                last_handle = Some(handle);

                experience.add(model.experience_gain(&target, &sim_actor, op.threads));
                sim_actor.experience = experience.sum();
                sim_actor.power = model.power_for_experience(experience.sum());
            }
            launched += 1;
        }

        if launched == 0 {
            warn!(target = target_name, "Wave placed no batches; backing off");
            stats.skipped_cycles += 1;
            env.sleep(cfg.backoff_ms).await;
            continue;
        }

        debug!(
            target = target_name,
            launched,
            threshold,
            period_ms,
            span_ms,
            "Wave dispatched"
        );

        // Sleep out the wave, then poll the last-dispatched operation so
        // the cycle only advances once the whole wave is done.
        let wave_ms = f64::from(launched - 1) * period_ms + span_ms;
        env.sleep(wave_ms).await;
        if let Some(handle) = last_handle {
            wait_complete(env, cfg, handle).await?;
        }

        let observed = env.target_state(target_name).await?;
        let resource_drift = (observed.resource_max - observed.resource_available).abs()
            / observed.resource_max.max(1.0);
        if resource_drift > cfg.drift_tolerance
            || observed.excess_instability() > cfg.instability_drift_tolerance
        {
            warn!(
                target = target_name,
                resource_drift,
                excess_instability = observed.excess_instability(),
                "Post-cycle state drifted beyond tolerance"
            );
        }

        stats.cycles += 1;
        stats.batches_dispatched += u64::from(launched);
        stats.predicted_yield +=
            f64::from(launched) * (1.0 - threshold) * target.resource_max;

        info!(
            target = target_name,
            cycle = stats.cycles,
            batches = launched,
            predicted_yield = stats.predicted_yield,
            "Cycle complete"
        );
    }

    Ok(stats)
}

/// Resolve this cycle's timing: delays, stagger period, depth cap, and the
/// dispatch-to-last-completion span for one batch's pipeline. Falls back
/// from depth search to single-batch timing before skipping the cycle.
fn cycle_timings(
    cfg: &SchedulerConfig,
    plan_cfg: &reap_planner::PlanConfig,
    durations: &KindDurations,
) -> Option<([f64; 4], f64, u32, f64)> {
    if cfg.high_throughput {
        match ScheduleConfig::search(durations, plan_cfg.safety_gap_ms, plan_cfg.max_depth) {
            Ok(schedule) => {
                return Some((
                    schedule.delays_ms,
                    schedule.period_ms,
                    schedule.depth,
                    schedule.cycle_ms(),
                ));
            }
            Err(PlanError::InfeasibleSchedule { detail }) => {
                warn!(detail, "Depth search infeasible; falling back to single-batch timing");
            }
            Err(e) => {
                warn!(error = %e, "Depth search failed; falling back to single-batch timing");
            }
        }
    }

    match BatchTimings::single(durations, plan_cfg.safety_gap_ms) {
        Ok(timings) => Some((timings.delays_ms, timings.window_ms, 1, timings.window_ms)),
        Err(e) => {
            warn!(error = %e, "Single-batch timing infeasible; skipping cycle");
            None
        }
    }
}
