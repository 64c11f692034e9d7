use thiserror::Error;

/// Validation errors for model snapshots.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A numeric field is NaN or infinite.
    #[error("non-finite value in {field} for target {target}")]
    NonFinite { target: String, field: &'static str },

    /// Resource bounds violated (`0 <= available <= max`).
    #[error("target {target} resource out of bounds: {available} not in [0, {max}]")]
    ResourceOutOfBounds {
        target: String,
        available: f64,
        max: f64,
    },

    /// Instability below its floor.
    #[error("target {target} instability {instability} below floor {floor}")]
    InstabilityBelowFloor {
        target: String,
        instability: f64,
        floor: f64,
    },
}
