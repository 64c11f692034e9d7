//! # reap-model
//!
//! Core data model for the reap batch scheduler.
//!
//! ## Design Principles
//!
//! - Snapshots are plain values: planning code receives copies of target,
//!   actor, and worker-node state and never mutates live state
//! - Resource and instability on a target change only through completed
//!   remote operations; the planner only predicts their evolution
//! - The target model (durations, effect magnitudes, instability deltas)
//!   is an external formula library consumed through the [`TargetModel`]
//!   trait, never reimplemented by the planner
//!
//! ## Units
//!
//! Durations are milliseconds, memory is gigabytes, resource amounts use
//! whatever unit the environment reports. All quantities are `f64` because
//! the upstream model is floating-point throughout.

mod actor;
mod error;
mod kahan;
mod model;
mod node;
mod op;
mod target;

pub use actor::Actor;
pub use error::ModelError;
pub use kahan::KahanAccumulator;
pub use model::TargetModel;
pub use node::WorkerNode;
pub use op::{Batch, MemoryCosts, OpKind, Operation};
pub use target::TargetState;
