//! Preparation planning: drive a target from arbitrary state to baseline
//! (resource at cap, instability at floor).
//!
//! Replenish and Stabilize thread counts are coupled: more Replenish adds
//! more instability, which needs more Stabilize, which leaves less memory
//! for Replenish. The coupling is expressed as a `feasible(n) -> bool`
//! closure handed to [`search::max_satisfying`], keeping it independent of
//! the search mechanics.
//!
//! The same step planner backs both modes: simulation applies predicted
//! effects to snapshot copies, execution dispatches and re-reads live
//! state. Neither path ever mutates the other's state.

use reap_model::{Actor, KahanAccumulator, OpKind, TargetModel, TargetState, WorkerNode};
use tracing::debug;

use crate::alloc::place;
use crate::search::max_satisfying;
use crate::{threads, PlanConfig, PlanError};

/// One preparation round: thread counts to dispatch and how long the round
/// takes. Every round carries at least one Stabilize thread, because a
/// Replenish whose instability cannot be fully offset is rejected outright.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrepStep {
    pub replenish_threads: u32,
    pub stabilize_threads: u32,
    pub wait_ms: f64,
}

/// Outcome of planning one preparation round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrepPlan {
    /// Target is at baseline within tolerance; nothing to dispatch.
    Converged,
    /// Dispatch these thread counts, wait, re-read, repeat.
    Step(PrepStep),
    /// Not a single useful operation fits the fleet right now.
    Stalled,
}

/// Predicted result of a full preparation run.
#[derive(Debug, Clone)]
pub struct PrepForecast {
    pub converged: bool,
    pub iterations: u32,
    pub total_ms: f64,
    pub final_target: TargetState,
    pub final_actor: Actor,
}

/// Plan the next preparation round against a fresh snapshot.
pub fn plan_step<M: TargetModel>(
    target: &TargetState,
    actor: &Actor,
    nodes: &[WorkerNode],
    cfg: &PlanConfig,
    model: &M,
) -> Result<PrepPlan, PlanError> {
    target
        .validate()
        .map_err(|e| PlanError::unschedulable(&target.name, e.to_string()))?;

    let needs_resource = target.resource_available < target.resource_max * cfg.resource_tolerance;
    let needs_stability = target.excess_instability() > cfg.instability_tolerance;
    if !needs_resource && !needs_stability {
        return Ok(PrepPlan::Converged);
    }

    let stabilize_power = model.stabilize_power(cfg.cores);
    if !stabilize_power.is_finite() || stabilize_power <= 0.0 {
        return Err(PlanError::unschedulable(
            &target.name,
            format!("stabilize power {stabilize_power} is not invertible"),
        ));
    }
    let stabilize_for = |delta: f64| -> u32 {
        if delta <= 0.0 {
            0
        } else {
            ((delta / stabilize_power).ceil() as u32).max(1)
        }
    };

    let replenish_cost = cfg.memory_costs.replenish;
    let stabilize_cost = cfg.memory_costs.stabilize;
    let fits = |replenish_n: u32, stabilize_n: u32| -> bool {
        let mut costs = Vec::with_capacity(2);
        if replenish_n > 0 {
            costs.push(f64::from(replenish_n) * replenish_cost);
        }
        if stabilize_n > 0 {
            costs.push(f64::from(stabilize_n) * stabilize_cost);
        }
        let requested = costs.len();
        place(&costs, nodes).all_placed(requested)
    };

    let excess = target.excess_instability();

    let step = if needs_resource {
        let needed = threads::replenish_threads(target, actor, cfg, model)?;
        // Pre-existing excess is folded into the offset only when stability
        // also needs correction; a replenish-only round still must cancel
        // the instability it adds itself, in full.
        let base_delta = if needs_stability { excess } else { 0.0 };
        let feasible = |n: u32| -> bool {
            let delta = base_delta + model.instability_added(OpKind::Replenish, n, cfg.cores);
            fits(n, stabilize_for(delta))
        };

        match max_satisfying(1, needed, feasible) {
            Some(n) => {
                let delta = base_delta + model.instability_added(OpKind::Replenish, n, cfg.cores);
                Some(PrepStep {
                    replenish_threads: n,
                    stabilize_threads: stabilize_for(delta),
                    wait_ms: 0.0,
                })
            }
            // No replenish amount can be fully offset; fall back to pure
            // stabilization when instability needs work, else stall.
            None if needs_stability => plan_pure_stabilize(excess, &stabilize_for, &fits),
            None => None,
        }
    } else {
        plan_pure_stabilize(excess, &stabilize_for, &fits)
    };

    let Some(mut step) = step else {
        return Ok(PrepPlan::Stalled);
    };

    step.wait_ms = step_wait_ms(target, actor, &step, model)?;
    debug!(
        target = %target.name,
        replenish = step.replenish_threads,
        stabilize = step.stabilize_threads,
        wait_ms = step.wait_ms,
        "Planned preparation round"
    );
    Ok(PrepPlan::Step(step))
}

fn plan_pure_stabilize(
    excess: f64,
    stabilize_for: &dyn Fn(f64) -> u32,
    fits: &dyn Fn(u32, u32) -> bool,
) -> Option<PrepStep> {
    let needed = stabilize_for(excess);
    if needed == 0 {
        return None;
    }
    let placeable = max_satisfying(1, needed, |m| fits(0, m))?;
    Some(PrepStep {
        replenish_threads: 0,
        stabilize_threads: placeable,
        wait_ms: 0.0,
    })
}

fn step_wait_ms<M: TargetModel>(
    target: &TargetState,
    actor: &Actor,
    step: &PrepStep,
    model: &M,
) -> Result<f64, PlanError> {
    let mut wait: f64 = 0.0;
    if step.replenish_threads > 0 {
        wait = wait.max(model.duration_ms(OpKind::Replenish, target, actor));
    }
    if step.stabilize_threads > 0 {
        wait = wait.max(model.duration_ms(OpKind::Stabilize, target, actor));
    }
    if !wait.is_finite() || wait <= 0.0 {
        return Err(PlanError::unschedulable(
            &target.name,
            format!("preparation round duration {wait} from model"),
        ));
    }
    Ok(wait)
}

/// Apply a step's predicted effects to snapshot copies, carrying actor
/// experience through the compensated accumulator.
pub fn apply_step<M: TargetModel>(
    target: &mut TargetState,
    actor: &mut Actor,
    experience: &mut KahanAccumulator,
    step: &PrepStep,
    cfg: &PlanConfig,
    model: &M,
) {
    if step.replenish_threads > 0 {
        experience.add(model.experience_gain(target, actor, step.replenish_threads));
        target.resource_available =
            model.replenish_result(target, actor, step.replenish_threads, cfg.cores);
        target.instability +=
            model.instability_added(OpKind::Replenish, step.replenish_threads, cfg.cores);
        actor.experience = experience.sum();
        actor.power = model.power_for_experience(experience.sum());
    }
    if step.stabilize_threads > 0 {
        experience.add(model.experience_gain(target, actor, step.stabilize_threads));
        target.instability = model.stabilize_result(target, step.stabilize_threads, cfg.cores);
        actor.experience = experience.sum();
        actor.power = model.power_for_experience(experience.sum());
    }
}

/// Simulate a full preparation run without dispatching anything.
///
/// Fleet memory is constant across simulated rounds (each round's
/// operations finish before the next begins), so a stalled round can never
/// unstall: it is reported as `NoProgress` immediately. Exhausting the
/// iteration ceiling returns a forecast with `converged == false`.
pub fn simulate<M: TargetModel>(
    target: &TargetState,
    actor: &Actor,
    nodes: &[WorkerNode],
    cfg: &PlanConfig,
    model: &M,
) -> Result<PrepForecast, PlanError> {
    let mut sim_target = target.clone();
    let mut sim_actor = *actor;
    let mut experience = KahanAccumulator::new(actor.experience);
    let mut total_ms = 0.0;

    for iteration in 0..cfg.max_prep_iterations {
        match plan_step(&sim_target, &sim_actor, nodes, cfg, model)? {
            PrepPlan::Converged => {
                return Ok(PrepForecast {
                    converged: true,
                    iterations: iteration,
                    total_ms,
                    final_target: sim_target,
                    final_actor: sim_actor,
                });
            }
            PrepPlan::Stalled => {
                return Err(PlanError::NoProgress {
                    target: target.name.clone(),
                });
            }
            PrepPlan::Step(step) => {
                total_ms += step.wait_ms;
                apply_step(
                    &mut sim_target,
                    &mut sim_actor,
                    &mut experience,
                    &step,
                    cfg,
                    model,
                );
            }
        }
    }

    Ok(PrepForecast {
        converged: false,
        iterations: cfg.max_prep_iterations,
        total_ms,
        final_target: sim_target,
        final_actor: sim_actor,
    })
}
