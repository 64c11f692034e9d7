//! Thread calculator: inverts the target model to answer "how many threads
//! of operation X reach state Y".
//!
//! Extraction is near-linear per thread, so its inversion is a division
//! with ceiling rounding plus a configured margin. Replenishment compounds
//! multiplicatively per thread, so its inversion is closed-form through a
//! log-domain Lambert-W evaluation. Stabilization is a plain ratio.

use reap_model::{Actor, Batch, OpKind, Operation, TargetModel, TargetState};

use crate::{PlanConfig, PlanError};

/// Extract threads removing `(1 - threshold)` of the resource cap from a
/// target at baseline.
///
/// Returns 0 when the threshold leaves nothing to remove.
pub fn extract_threads<M: TargetModel>(
    target: &TargetState,
    actor: &Actor,
    threshold: f64,
    cfg: &PlanConfig,
    model: &M,
) -> Result<u32, PlanError> {
    let per_thread = model.extract_fraction(target, actor);
    if !per_thread.is_finite() || per_thread <= 0.0 {
        return Err(PlanError::unschedulable(
            &target.name,
            format!("extract fraction {per_thread} is not invertible"),
        ));
    }

    let desired_fraction = (1.0 - threshold).clamp(0.0, 1.0);
    if desired_fraction <= 0.0 {
        return Ok(0);
    }

    let base = (desired_fraction / per_thread).ceil();
    if !base.is_finite() || base < 0.0 {
        return Err(PlanError::unschedulable(
            &target.name,
            "extract inversion produced a non-finite thread count",
        ));
    }

    Ok(base as u32 + cfg.extract_margin)
}

/// Minimum Replenish threads driving `resource_available` back to the cap,
/// with the configured top-up applied.
///
/// The model's replenish effect is `(avail + n) * exp(rate * n)`, so the
/// exact inversion is `n = W(rate * cap * e^(rate * avail)) / rate - avail`,
/// evaluated entirely in the log domain.
pub fn replenish_threads<M: TargetModel>(
    target: &TargetState,
    actor: &Actor,
    cfg: &PlanConfig,
    model: &M,
) -> Result<u32, PlanError> {
    if target.resource_available >= target.resource_max {
        return Ok(0);
    }

    let rate = model.replenish_rate(target, actor, cfg.cores);
    if !rate.is_finite() || rate <= 0.0 {
        return Err(PlanError::unschedulable(
            &target.name,
            format!("replenish rate {rate} is not invertible"),
        ));
    }
    if target.resource_max <= 0.0 {
        return Err(PlanError::unschedulable(
            &target.name,
            "resource cap is not positive",
        ));
    }

    let log_x = (target.resource_max * rate).ln() + target.resource_available * rate;
    let base = (lambert_w_log(log_x) / rate - target.resource_available).max(0.0);
    if !base.is_finite() {
        return Err(PlanError::unschedulable(
            &target.name,
            "replenish inversion diverged",
        ));
    }

    // Top-up in (1, 2) is multiplicative; anything else is additive.
    let topped = if cfg.replenish_top_up > 1.0 && cfg.replenish_top_up < 2.0 {
        (base * cfg.replenish_top_up).ceil()
    } else {
        (base + cfg.replenish_top_up).ceil()
    };

    Ok(topped.max(1.0) as u32)
}

/// Stabilize threads canceling `delta` instability: zero for a zero delta,
/// otherwise at least one.
pub fn stabilize_threads<M: TargetModel>(
    target_name: &str,
    delta: f64,
    cfg: &PlanConfig,
    model: &M,
) -> Result<u32, PlanError> {
    if delta <= 0.0 {
        return Ok(0);
    }

    let per_thread = model.stabilize_power(cfg.cores);
    if !per_thread.is_finite() || per_thread <= 0.0 {
        return Err(PlanError::unschedulable(
            target_name,
            format!("stabilize power {per_thread} is not invertible"),
        ));
    }

    Ok(((delta / per_thread).ceil() as u32).max(1))
}

/// Plan one full batch against a target assumed at baseline.
///
/// Each operation's threads are computed against the state the previous
/// operations leave behind: the first Stabilize offsets what Extract adds,
/// Replenish starts from the post-extract resource level, and the second
/// Stabilize offsets what Replenish adds.
pub fn plan_batch<M: TargetModel>(
    target: &TargetState,
    actor: &Actor,
    threshold: f64,
    cfg: &PlanConfig,
    model: &M,
) -> Result<Batch, PlanError> {
    let base = target.at_baseline();

    let dur_extract = model.duration_ms(OpKind::Extract, &base, actor);
    let dur_replenish = model.duration_ms(OpKind::Replenish, &base, actor);
    let dur_stabilize = model.duration_ms(OpKind::Stabilize, &base, actor);
    for (kind, dur) in [
        (OpKind::Extract, dur_extract),
        (OpKind::Replenish, dur_replenish),
        (OpKind::Stabilize, dur_stabilize),
    ] {
        if !dur.is_finite() || dur <= 0.0 {
            return Err(PlanError::unschedulable(
                &target.name,
                format!("{kind} duration {dur} from model"),
            ));
        }
    }

    let n_extract = extract_threads(&base, actor, threshold, cfg, model)?;
    if n_extract == 0 {
        return Err(PlanError::unschedulable(
            &target.name,
            format!("threshold {threshold} extracts nothing"),
        ));
    }

    let first_delta = model.instability_added(OpKind::Extract, n_extract, cfg.cores);
    let n_stabilize_first = stabilize_threads(&target.name, first_delta, cfg, model)?;

    let mut drained = base.clone();
    drained.resource_available = drained.resource_max * threshold.clamp(0.0, 1.0);
    let n_replenish = replenish_threads(&drained, actor, cfg, model)?;

    let second_delta = model.instability_added(OpKind::Replenish, n_replenish, cfg.cores);
    let n_stabilize_second = stabilize_threads(&target.name, second_delta, cfg, model)?;

    let costs = &cfg.memory_costs;
    Ok(Batch {
        extract: Operation::new(OpKind::Extract, n_extract, dur_extract, costs),
        stabilize_first: Operation::new(OpKind::Stabilize, n_stabilize_first, dur_stabilize, costs),
        replenish: Operation::new(OpKind::Replenish, n_replenish, dur_replenish, costs),
        stabilize_second: Operation::new(
            OpKind::Stabilize,
            n_stabilize_second,
            dur_stabilize,
            costs,
        ),
    })
}

/// Plan a batch that fits within `memory_limit`, escalating the threshold
/// (extracting less per batch) when the requested one is too hungry.
///
/// Each escalation moves the threshold halfway toward 1.0, matching how
/// thread counts shrink super-linearly near full retention.
pub fn plan_batch_fitting<M: TargetModel>(
    target: &TargetState,
    actor: &Actor,
    threshold: f64,
    memory_limit: f64,
    cfg: &PlanConfig,
    model: &M,
) -> Result<(Batch, f64), PlanError> {
    let mut current = threshold;
    loop {
        let batch = plan_batch(target, actor, current, cfg, model)?;
        if batch.memory() <= memory_limit {
            return Ok((batch, current));
        }

        let remaining = 1.0 - current;
        if remaining < 1e-5 {
            return Err(PlanError::unschedulable(
                &target.name,
                format!("no threshold fits a batch into {memory_limit} GB"),
            ));
        }
        current += remaining * 0.5;
    }
}

/// Lambert W in the log domain: solves `w * e^w = x` given `ln(x)`,
/// via a seeded estimate and three Halley refinement steps.
fn lambert_w_log(log_x: f64) -> f64 {
    if log_x.is_nan() {
        return f64::NAN;
    }
    let log_xe = log_x + 1.0;
    let log_y = 0.5 * log1_exp(log_xe);
    let log_z = log1_exp(log_y).ln();
    let log_n = log1_exp(0.139_380_401_213_005_27 + log_y);
    let log_d = log1_exp(-0.787_551_489_545_180_5 + log_z);
    let mut w = -1.0 + 2.036 * (log_n - log_d);
    for _ in 0..3 {
        w *= (log_xe - w.ln()) / (1.0 + w);
    }
    if w.is_nan() {
        if log_xe < 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        w
    }
}

/// `ln(1 + e^x)` without overflow for large `x`.
fn log1_exp(x: f64) -> f64 {
    if x <= 0.0 {
        x.exp().ln_1p()
    } else {
        x + (-x).exp().ln_1p()
    }
}
