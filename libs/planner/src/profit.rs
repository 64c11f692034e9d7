//! Profitability search: find the extraction threshold maximizing
//! time-amortized yield for each eligible target, then rank targets.
//!
//! Thresholds are swept over a log-weighted grid, denser near 1.0 where
//! marginal yield-per-batch differences are largest. Preparation cost is
//! simulated once per target and amortized over a configured number of
//! steady-state cycles. For fixed inputs the whole search is deterministic.

use reap_model::{Actor, OpKind, TargetModel, TargetState, WorkerNode};
use tracing::debug;

use crate::alloc::{allocate_batches, fleet_capacity};
use crate::{prep, threads, PlanConfig};

/// Best threshold found for one target, with the data behind the score.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetEvaluation {
    pub name: String,
    pub threshold: f64,
    /// Time-amortized yield per second, preparation included.
    pub rate_per_sec: f64,
    /// Concurrent batches the fleet sustains at this threshold.
    pub batches: u32,
    pub batch_memory: f64,
    pub prep_ms: f64,
    pub cycle_ms: f64,
}

/// Evaluate one target, or `None` when it is ineligible (uncontrolled,
/// beyond the actor's power, resourceless), cannot be prepared with this
/// fleet, or admits no feasible threshold.
pub fn evaluate_target<M: TargetModel>(
    target: &TargetState,
    actor: &Actor,
    nodes: &[WorkerNode],
    cfg: &PlanConfig,
    model: &M,
) -> Option<TargetEvaluation> {
    if !target.controlled || target.required_power > actor.power || target.resource_max <= 0.0 {
        return None;
    }

    let forecast = match prep::simulate(target, actor, nodes, cfg, model) {
        Ok(forecast) if forecast.converged => forecast,
        Ok(_) => {
            debug!(target = %target.name, "Preparation does not converge; skipping");
            return None;
        }
        Err(e) => {
            debug!(target = %target.name, error = %e, "Preparation simulation failed; skipping");
            return None;
        }
    };

    let prepared = target.at_baseline();
    let window_ms =
        model.duration_ms(OpKind::Stabilize, &prepared, actor) + 2.0 * cfg.safety_gap_ms;
    if !window_ms.is_finite() || window_ms <= 0.0 {
        return None;
    }

    let capacity = fleet_capacity(nodes, cfg.memory_headroom);
    let steps = cfg.threshold_steps.max(2);
    let mut best: Option<TargetEvaluation> = None;

    for i in 1..steps {
        // threshold = 1 - 10^(-3x): samples crowd toward full retention.
        let x = f64::from(i) / f64::from(steps);
        let threshold = 1.0 - 10f64.powf(-3.0 * x);

        let Ok(batch) = threads::plan_batch(&prepared, actor, threshold, cfg, model) else {
            continue;
        };
        let batch_memory = batch.memory();
        if batch_memory <= 0.0 {
            continue;
        }

        let estimated = (capacity / batch_memory).floor() as usize;
        if estimated == 0 {
            continue;
        }

        let per_batch: [f64; 4] = [
            batch.extract.memory,
            batch.stabilize_first.memory,
            batch.replenish.memory,
            batch.stabilize_second.memory,
        ];
        let costs: Vec<f64> = std::iter::repeat(per_batch)
            .take(estimated)
            .flatten()
            .collect();
        let batches = allocate_batches(&costs, nodes).complete_batches;
        if batches == 0 {
            continue;
        }

        let yield_per_cycle =
            target.resource_max * (1.0 - threshold) * f64::from(batches);
        // Batches launch 4·gap apart; the cycle ends when the last one's
        // final operation completes.
        let cycle_ms = window_ms + f64::from(batches - 1) * 4.0 * cfg.safety_gap_ms;

        let cycles = f64::from(cfg.amortize_cycles.max(1));
        let total_ms = forecast.total_ms + cycle_ms * cycles;
        if total_ms <= 0.0 {
            continue;
        }
        let rate_per_sec = yield_per_cycle * cycles / total_ms * 1_000.0;

        if best.as_ref().is_none_or(|b| rate_per_sec > b.rate_per_sec) {
            best = Some(TargetEvaluation {
                name: target.name.clone(),
                threshold,
                rate_per_sec,
                batches,
                batch_memory,
                prep_ms: forecast.total_ms,
                cycle_ms,
            });
        }
    }

    best
}

/// Rank candidate targets by their best amortized yield rate, descending.
/// Ineligible and infeasible targets are dropped. Ties break on name so the
/// ordering is stable across runs.
pub fn rank_targets<M: TargetModel>(
    targets: &[TargetState],
    actor: &Actor,
    nodes: &[WorkerNode],
    cfg: &PlanConfig,
    model: &M,
) -> Vec<TargetEvaluation> {
    let mut evaluations: Vec<TargetEvaluation> = targets
        .iter()
        .filter_map(|t| evaluate_target(t, actor, nodes, cfg, model))
        .collect();

    evaluations.sort_by(|a, b| {
        b.rate_per_sec
            .partial_cmp(&a.rate_per_sec)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });

    evaluations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_model::TestModel;

    fn target(name: &str, resource_max: f64) -> TargetState {
        TargetState {
            name: name.to_string(),
            resource_available: resource_max * 0.4,
            resource_max,
            instability: 12.0,
            instability_floor: 5.0,
            required_power: 100.0,
            controlled: true,
        }
    }

    fn actor() -> Actor {
        Actor::new(250.0, 62_500.0)
    }

    fn fleet() -> Vec<WorkerNode> {
        (0..4)
            .map(|i| WorkerNode::new(format!("w{i:02}"), 16_384.0, 0.0))
            .collect()
    }

    #[test]
    fn test_evaluation_finds_a_positive_rate() {
        let cfg = PlanConfig::default();
        let eval = evaluate_target(
            &target("alpha", 1_000_000.0),
            &actor(),
            &fleet(),
            &cfg,
            &TestModel::default(),
        )
        .expect("target should be viable");

        assert!(eval.rate_per_sec > 0.0);
        assert!(eval.threshold > 0.0 && eval.threshold < 1.0);
        assert!(eval.batches >= 1);
        assert!(eval.prep_ms > 0.0);
        assert!(eval.cycle_ms > 0.0);
    }

    #[test]
    fn test_uncontrolled_and_overpowered_targets_are_ineligible() {
        let cfg = PlanConfig::default();
        let model = TestModel::default();

        let mut uncontrolled = target("alpha", 1_000_000.0);
        uncontrolled.controlled = false;
        assert!(evaluate_target(&uncontrolled, &actor(), &fleet(), &cfg, &model).is_none());

        let mut hardened = target("beta", 1_000_000.0);
        hardened.required_power = 1e9;
        assert!(evaluate_target(&hardened, &actor(), &fleet(), &cfg, &model).is_none());

        let empty = target("gamma", 0.0);
        assert!(evaluate_target(&empty, &actor(), &fleet(), &cfg, &model).is_none());
    }

    #[test]
    fn test_ranking_prefers_richer_target_and_is_deterministic() {
        let cfg = PlanConfig::default();
        let model = TestModel::default();
        let candidates = vec![
            target("small", 200_000.0),
            target("large", 2_000_000.0),
            target("medium", 800_000.0),
        ];

        let first = rank_targets(&candidates, &actor(), &fleet(), &cfg, &model);
        let second = rank_targets(&candidates, &actor(), &fleet(), &cfg, &model);
        assert_eq!(first, second);

        assert_eq!(first[0].name, "large");
        let rates: Vec<f64> = first.iter().map(|e| e.rate_per_sec).collect();
        let mut sorted = rates.clone();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
        assert_eq!(rates, sorted);
    }

    #[test]
    fn test_target_too_big_for_fleet_is_dropped() {
        let cfg = PlanConfig::default();
        // One tiny node: not even the cheapest batch fits.
        let nodes = vec![WorkerNode::new("w00", 4.0, 0.0)];
        let eval = evaluate_target(
            &target("alpha", 1_000_000.0),
            &actor(),
            &nodes,
            &cfg,
            &TestModel::default(),
        );
        assert!(eval.is_none());
    }
}
