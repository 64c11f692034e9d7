use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Snapshot of a remote target's observable state.
///
/// Read fresh from the environment at the start of each planning pass.
/// The scheduler never writes these fields; only completed remote
/// operations move them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    pub name: String,
    pub resource_available: f64,
    pub resource_max: f64,
    pub instability: f64,
    pub instability_floor: f64,
    /// Minimum actor power required to operate against this target.
    pub required_power: f64,
    /// Whether the operator currently controls the target. Uncontrolled
    /// targets are ineligible for ranking and batching.
    #[serde(default)]
    pub controlled: bool,
}

impl TargetState {
    /// Check the snapshot's structural invariants.
    pub fn validate(&self) -> Result<(), ModelError> {
        for (field, value) in [
            ("resource_available", self.resource_available),
            ("resource_max", self.resource_max),
            ("instability", self.instability),
            ("instability_floor", self.instability_floor),
            ("required_power", self.required_power),
        ] {
            if !value.is_finite() {
                return Err(ModelError::NonFinite {
                    target: self.name.clone(),
                    field,
                });
            }
        }
        if self.resource_available < 0.0 || self.resource_available > self.resource_max {
            return Err(ModelError::ResourceOutOfBounds {
                target: self.name.clone(),
                available: self.resource_available,
                max: self.resource_max,
            });
        }
        if self.instability < self.instability_floor {
            return Err(ModelError::InstabilityBelowFloor {
                target: self.name.clone(),
                instability: self.instability,
                floor: self.instability_floor,
            });
        }
        Ok(())
    }

    /// Fraction of the resource cap currently available, in `[0, 1]`.
    pub fn resource_ratio(&self) -> f64 {
        if self.resource_max <= 0.0 {
            return 0.0;
        }
        self.resource_available / self.resource_max
    }

    /// Instability above the floor, always `>= 0` for a valid snapshot.
    pub fn excess_instability(&self) -> f64 {
        (self.instability - self.instability_floor).max(0.0)
    }

    /// Whether the target is at baseline: resource at (or within tolerance
    /// of) cap and instability at (or within tolerance of) floor.
    pub fn is_baseline(&self, resource_tolerance: f64, instability_tolerance: f64) -> bool {
        self.resource_available >= self.resource_max * resource_tolerance
            && self.instability <= self.instability_floor + instability_tolerance
    }

    /// Copy of this snapshot with resource at cap and instability at floor,
    /// used when planning steady-state batches against a prepared target.
    pub fn at_baseline(&self) -> TargetState {
        TargetState {
            resource_available: self.resource_max,
            instability: self.instability_floor,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> TargetState {
        TargetState {
            name: "alpha".to_string(),
            resource_available: 400_000.0,
            resource_max: 1_000_000.0,
            instability: 12.0,
            instability_floor: 5.0,
            required_power: 100.0,
            controlled: true,
        }
    }

    #[test]
    fn test_validate_accepts_well_formed_snapshot() {
        assert!(target().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_non_finite() {
        let mut t = target();
        t.instability = f64::NAN;
        assert!(matches!(
            t.validate(),
            Err(ModelError::NonFinite { field: "instability", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_resource_above_max() {
        let mut t = target();
        t.resource_available = 2_000_000.0;
        assert!(matches!(t.validate(), Err(ModelError::ResourceOutOfBounds { .. })));
    }

    #[test]
    fn test_baseline_checks_and_projection() {
        let t = target();
        assert!(!t.is_baseline(1.0, 0.0));

        let prepared = t.at_baseline();
        assert!(prepared.is_baseline(1.0, 0.0));
        assert_eq!(prepared.resource_available, prepared.resource_max);
        assert_eq!(prepared.instability, prepared.instability_floor);
    }

    #[test]
    fn test_excess_instability_never_negative() {
        let mut t = target();
        t.instability = t.instability_floor;
        assert_eq!(t.excess_instability(), 0.0);
    }
}
