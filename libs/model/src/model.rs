use crate::{Actor, OpKind, TargetState};

/// The external target-state model.
///
/// The host environment supplies a deterministic formula library mapping
/// (target state, actor power, thread count) to operation durations, effect
/// magnitudes, and instability deltas. The scheduler queries it repeatedly
/// and treats every method as a pure function of its arguments.
///
/// Implementations may return non-finite or negative values for malformed
/// snapshots; callers must detect that and treat the affected plan as
/// unschedulable rather than dispatching garbage.
pub trait TargetModel {
    /// Wall-clock duration of one operation, in milliseconds. Duration is a
    /// function of kind and target/actor state only, not of thread count.
    fn duration_ms(&self, kind: OpKind, target: &TargetState, actor: &Actor) -> f64;

    /// Fraction of the resource cap removed by a single Extract thread.
    /// Extraction is near-linear in thread count: `n` threads remove
    /// `n * extract_fraction * resource_max`.
    fn extract_fraction(&self, target: &TargetState, actor: &Actor) -> f64;

    /// Per-thread logarithmic replenish rate `r`. Running `n` Replenish
    /// threads moves the resource to
    /// `min(resource_max, (resource_available + n) * exp(r * n))`:
    /// each thread seeds one unit and the total then compounds.
    fn replenish_rate(&self, target: &TargetState, actor: &Actor, cores: u32) -> f64;

    /// Instability added by `threads` of Extract or Replenish.
    /// Returns 0 for Stabilize.
    fn instability_added(&self, kind: OpKind, threads: u32, cores: u32) -> f64;

    /// Instability removed per Stabilize thread.
    fn stabilize_power(&self, cores: u32) -> f64;

    /// Experience gained by the actor from `threads` of any operation
    /// against `target`.
    fn experience_gain(&self, target: &TargetState, actor: &Actor, threads: u32) -> f64;

    /// Actor power implied by cumulative experience. Nondecreasing.
    fn power_for_experience(&self, experience: f64) -> f64;

    /// Predicted resource level after `threads` of Replenish, derived from
    /// [`replenish_rate`](Self::replenish_rate). Provided so simulation and
    /// inversion share one formula.
    fn replenish_result(
        &self,
        target: &TargetState,
        actor: &Actor,
        threads: u32,
        cores: u32,
    ) -> f64 {
        let rate = self.replenish_rate(target, actor, cores);
        let seeded = target.resource_available + f64::from(threads);
        (seeded * (rate * f64::from(threads)).exp()).min(target.resource_max)
    }

    /// Predicted resource level after `threads` of Extract.
    fn extract_result(&self, target: &TargetState, actor: &Actor, threads: u32) -> f64 {
        let removed =
            f64::from(threads) * self.extract_fraction(target, actor) * target.resource_max;
        (target.resource_available - removed).max(0.0)
    }

    /// Predicted instability after `threads` of Stabilize.
    fn stabilize_result(&self, target: &TargetState, threads: u32, cores: u32) -> f64 {
        (target.instability - f64::from(threads) * self.stabilize_power(cores))
            .max(target.instability_floor)
    }
}
