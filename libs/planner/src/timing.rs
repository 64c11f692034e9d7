//! Timing synchronizer: dispatch delays that make four differently-timed
//! operations complete in a fixed order with a minimum gap.
//!
//! Ordering is a purely temporal contract. Nothing synchronizes the remote
//! operations after dispatch; the delays are chosen so completions land
//! `gap` apart in the order Extract, Stabilize, Replenish, Stabilize.
//!
//! For continuous batching the search also picks a concurrency depth `k`
//! and period so `k` batches stay in flight. The three operation kinds'
//! timing windows interact multiplicatively, so this is a feasibility
//! search over small integer window counts, not a closed-form solve.

use crate::PlanError;

/// Per-kind durations for one batch, in ms. The two Stabilize operations
/// share a duration: duration depends on kind and target state only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KindDurations {
    pub extract_ms: f64,
    pub replenish_ms: f64,
    pub stabilize_ms: f64,
}

impl KindDurations {
    fn validate(&self) -> Result<(), PlanError> {
        for (name, value) in [
            ("extract", self.extract_ms),
            ("replenish", self.replenish_ms),
            ("stabilize", self.stabilize_ms),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(PlanError::InfeasibleSchedule {
                    detail: format!("{name} duration {value} is not schedulable"),
                });
            }
        }
        Ok(())
    }

    /// Durations in completion order (Extract, Stabilize, Replenish,
    /// Stabilize).
    pub fn in_order(&self) -> [f64; 4] {
        [
            self.extract_ms,
            self.stabilize_ms,
            self.replenish_ms,
            self.stabilize_ms,
        ]
    }
}

/// Dispatch delays for a single batch.
///
/// With window `T = stabilize + 2·gap`, completions land at
/// `T − 3g, T − 2g, T − g, T`; each delay is `T − offset·g − duration`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchTimings {
    /// Delays in completion order (Extract, Stabilize, Replenish,
    /// Stabilize).
    pub delays_ms: [f64; 4],
    /// Dispatch-to-last-completion span.
    pub window_ms: f64,
    pub gap_ms: f64,
}

impl BatchTimings {
    /// Compute single-batch delays, or report the schedule infeasible when
    /// an operation's duration exceeds its allotted slot (durations are
    /// fixed by kind and target, so the caller's only recourse is a lower
    /// concurrency depth or a different target).
    pub fn single(durations: &KindDurations, gap_ms: f64) -> Result<Self, PlanError> {
        durations.validate()?;
        if !gap_ms.is_finite() || gap_ms <= 0.0 {
            return Err(PlanError::InfeasibleSchedule {
                detail: format!("safety gap {gap_ms} must be positive"),
            });
        }

        let window = durations.stabilize_ms + 2.0 * gap_ms;
        let in_order = durations.in_order();
        let mut delays = [0.0; 4];
        for (slot, (duration, offset)) in in_order.iter().zip([3.0, 2.0, 1.0, 0.0]).enumerate() {
            let delay = window - offset * gap_ms - duration;
            if delay < 0.0 {
                return Err(PlanError::InfeasibleSchedule {
                    detail: format!(
                        "operation {slot} duration {duration} ms exceeds its slot \
                         (window {window} ms, gap {gap_ms} ms)"
                    ),
                });
            }
            delays[slot] = delay;
        }

        Ok(Self {
            delays_ms: delays,
            window_ms: window,
            gap_ms,
        })
    }
}

/// An immutable continuous-batching schedule: depth, period, and per-batch
/// dispatch delays. Threaded explicitly through orchestrator calls, never
/// cached as shared state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleConfig {
    /// Batches kept in flight simultaneously.
    pub depth: u32,
    /// Dispatch interval between consecutive batches.
    pub period_ms: f64,
    /// Delays in completion order (Extract, Stabilize, Replenish,
    /// Stabilize), relative to each batch's dispatch instant.
    pub delays_ms: [f64; 4],
    pub gap_ms: f64,
}

impl ScheduleConfig {
    /// One full rotation of the pipeline.
    pub fn cycle_ms(&self) -> f64 {
        f64::from(self.depth) * self.period_ms
    }

    /// Find the deepest feasible schedule, searching window configurations
    /// downward from a ceiling derived from the stabilize duration. Larger
    /// depth wins ties because it means a shorter period and higher
    /// throughput.
    pub fn search(
        durations: &KindDurations,
        gap_ms: f64,
        max_depth: Option<u32>,
    ) -> Result<Self, PlanError> {
        durations.validate()?;
        if !gap_ms.is_finite() || gap_ms <= 0.0 {
            return Err(PlanError::InfeasibleSchedule {
                detail: format!("safety gap {gap_ms} must be positive"),
            });
        }

        let th = durations.extract_ms;
        let tg = durations.replenish_ms;
        let tw = durations.stabilize_ms;

        let ceiling = (1.0 + (tw - 4.0 * gap_ms) / (8.0 * gap_ms)).floor();
        if ceiling < 1.0 {
            return Err(PlanError::InfeasibleSchedule {
                detail: format!("stabilize duration {tw} ms too short for gap {gap_ms} ms"),
            });
        }
        let k_max = max_depth.map_or(ceiling as u32, |cap| cap.min(ceiling as u32));

        // Window-count ratios between kinds, fixed by their durations.
        let rg = tg / tw;
        let rh_w = th / tw;
        let rh_g = th / tg;

        for k_s in (1..=k_max).rev() {
            let t_min_s = (tw + 4.0 * gap_ms) / f64::from(k_s);
            let t_max_s = if k_s > 1 {
                (tw - 4.0 * gap_ms) / f64::from(k_s - 1)
            } else {
                f64::INFINITY
            };

            let kg_lo = (f64::from(k_s - 1) * rg).max(1.0).ceil() as u32;
            let kg_hi = (1.0 + f64::from(k_s) * rg).floor() as u32;
            for k_g in (kg_lo..=kg_hi).rev() {
                let t_min_g = (tg + 3.0 * gap_ms) / f64::from(k_g);
                let t_max_g = if k_g > 1 {
                    (tg - 3.0 * gap_ms) / f64::from(k_g - 1)
                } else {
                    f64::INFINITY
                };

                let kh_lo = (f64::from(k_s - 1) * rh_w)
                    .max(f64::from(k_g - 1) * rh_g)
                    .max(1.0)
                    .ceil() as u32;
                let kh_hi = (1.0 + f64::from(k_s) * rh_w)
                    .min(1.0 + f64::from(k_g) * rh_g)
                    .floor() as u32;
                for k_h in (kh_lo..=kh_hi).rev() {
                    let t_min_h = (th + 5.0 * gap_ms) / f64::from(k_h);
                    let t_max_h = if k_h > 1 {
                        (th - gap_ms) / f64::from(k_h - 1)
                    } else {
                        f64::INFINITY
                    };

                    let t_lo = t_min_s.max(t_min_g).max(t_min_h);
                    let t_hi = t_max_s.min(t_max_g).min(t_max_h);
                    if t_lo > t_hi {
                        continue;
                    }

                    if let Some(schedule) = Self::build(k_s, t_lo, durations, gap_ms) {
                        return Ok(schedule);
                    }
                }
            }
        }

        Err(PlanError::InfeasibleSchedule {
            detail: format!(
                "no feasible period for durations ({th}, {tg}, {tw}) ms with gap {gap_ms} ms"
            ),
        })
    }

    /// Schedule for an exact requested depth, or infeasible.
    pub fn with_depth(
        durations: &KindDurations,
        gap_ms: f64,
        depth: u32,
    ) -> Result<Self, PlanError> {
        let found = Self::search(durations, gap_ms, Some(depth))?;
        if found.depth != depth {
            return Err(PlanError::InfeasibleSchedule {
                detail: format!("depth {depth} not feasible; deepest is {}", found.depth),
            });
        }
        Ok(found)
    }

    fn build(depth: u32, period_ms: f64, durations: &KindDurations, gap_ms: f64) -> Option<Self> {
        let span = f64::from(depth) * period_ms;
        let in_order = durations.in_order();
        let mut delays = [0.0; 4];
        for (slot, (duration, offset)) in in_order.iter().zip([4.0, 3.0, 2.0, 1.0]).enumerate() {
            let delay = span - offset * gap_ms - duration;
            if delay < 0.0 {
                return None;
            }
            delays[slot] = delay;
        }
        Some(Self {
            depth,
            period_ms,
            delays_ms: delays,
            gap_ms,
        })
    }
}
