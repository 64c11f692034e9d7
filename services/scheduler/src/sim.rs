//! Deterministic in-memory environment for tests and dry runs.
//!
//! Time is virtual: `sleep` advances a clock and applies every operation
//! whose completion falls inside the window, in completion order. Nothing
//! here touches wall-clock time, so a full prepare-and-batch run executes
//! in microseconds and two runs from the same scenario agree bit for bit.
//!
//! [`SimModel`] is a reference formula library implementing the same trait
//! the production model is consumed through. It stands in for that model;
//! it does not claim to reproduce it.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reap_model::{Actor, MemoryCosts, OpKind, TargetModel, TargetState, WorkerNode};
use serde::Deserialize;

use crate::{Environment, ProcessHandle};

/// Reference target model with state-dependent durations, near-linear
/// extraction, and compounding replenishment.
#[derive(Debug, Clone)]
pub struct SimModel {
    /// Extract duration at unit slowdown; replenish runs 3.2x and
    /// stabilize 4x this.
    pub base_extract_ms: f64,
}

impl Default for SimModel {
    fn default() -> Self {
        Self {
            base_extract_ms: 2_000.0,
        }
    }
}

impl SimModel {
    /// Slowdown factor: higher instability and required power slow every
    /// operation, higher actor power speeds them up.
    fn slowdown(&self, target: &TargetState, actor: &Actor) -> f64 {
        (1.0 + target.instability / 10.0) * (target.required_power + 100.0)
            / (actor.power + 100.0)
    }
}

impl TargetModel for SimModel {
    fn duration_ms(&self, kind: OpKind, target: &TargetState, actor: &Actor) -> f64 {
        let base = self.base_extract_ms * self.slowdown(target, actor);
        match kind {
            OpKind::Extract => base,
            OpKind::Replenish => base * 3.2,
            OpKind::Stabilize => base * 4.0,
        }
    }

    fn extract_fraction(&self, target: &TargetState, actor: &Actor) -> f64 {
        0.002 * actor.power / (actor.power + target.required_power)
    }

    fn replenish_rate(&self, target: &TargetState, _actor: &Actor, cores: u32) -> f64 {
        let base = (1.0 + 0.03 / target.instability.max(1.0)).min(1.0035);
        base.ln() * (f64::from(cores) + 15.0) / 16.0
    }

    fn instability_added(&self, kind: OpKind, threads: u32, _cores: u32) -> f64 {
        match kind {
            OpKind::Extract => 0.002 * f64::from(threads),
            OpKind::Replenish => 0.004 * f64::from(threads),
            OpKind::Stabilize => 0.0,
        }
    }

    fn stabilize_power(&self, cores: u32) -> f64 {
        0.05 * (1.0 + f64::from(cores.saturating_sub(1)) / 16.0)
    }

    fn experience_gain(&self, target: &TargetState, _actor: &Actor, threads: u32) -> f64 {
        (3.0 + target.instability_floor * 0.3) * f64::from(threads)
    }

    fn power_for_experience(&self, experience: f64) -> f64 {
        (32.0 * (experience.max(0.0) + 534.6).ln() - 200.0).max(1.0)
    }
}

/// Scenario file: the world a dry run operates in.
#[derive(Debug, Clone, Deserialize)]
pub struct SimScenario {
    #[serde(default = "default_cores")]
    pub cores: u32,
    pub actor: Actor,
    pub targets: Vec<TargetState>,
    pub nodes: Vec<WorkerNode>,
}

fn default_cores() -> u32 {
    1
}

struct SimProcess {
    handle: ProcessHandle,
    kind: OpKind,
    target: String,
    node: String,
    threads: u32,
    memory: f64,
    end_ms: f64,
}

struct SimState {
    now_ms: f64,
    experience: f64,
    targets: HashMap<String, TargetState>,
    nodes: Vec<WorkerNode>,
    in_flight: Vec<SimProcess>,
    next_handle: ProcessHandle,
}

/// Virtual-clock environment over a scenario.
pub struct SimEnvironment {
    model: SimModel,
    cores: u32,
    costs: MemoryCosts,
    state: Mutex<SimState>,
}

impl SimEnvironment {
    pub fn new(scenario: SimScenario) -> Self {
        Self::with_model(scenario, SimModel::default())
    }

    pub fn with_model(scenario: SimScenario, model: SimModel) -> Self {
        // Experience is the authoritative actor state; derive it from the
        // configured power when the scenario leaves it unset.
        let experience = if scenario.actor.experience > 0.0 {
            scenario.actor.experience
        } else {
            ((scenario.actor.power + 200.0) / 32.0).exp() - 534.6
        };

        let targets = scenario
            .targets
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();

        Self {
            model,
            cores: scenario.cores,
            costs: MemoryCosts::default(),
            state: Mutex::new(SimState {
                now_ms: 0.0,
                experience,
                targets,
                nodes: scenario.nodes,
                in_flight: Vec::new(),
                next_handle: 1,
            }),
        }
    }

    pub fn model(&self) -> &SimModel {
        &self.model
    }

    pub fn now_ms(&self) -> f64 {
        self.state.lock().expect("sim state poisoned").now_ms
    }

    fn actor_of(&self, experience: f64) -> Actor {
        Actor {
            power: self.model.power_for_experience(experience),
            experience,
        }
    }

    /// Advance the clock, applying completions in completion order.
    fn advance(&self, state: &mut SimState, to_ms: f64) {
        state.now_ms = state.now_ms.max(to_ms);

        loop {
            let due = state
                .in_flight
                .iter()
                .enumerate()
                .filter(|(_, p)| p.end_ms <= state.now_ms)
                .min_by(|(_, a), (_, b)| {
                    a.end_ms
                        .partial_cmp(&b.end_ms)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.handle.cmp(&b.handle))
                })
                .map(|(i, _)| i);
            let Some(index) = due else {
                break;
            };
            let process = state.in_flight.swap_remove(index);

            let actor = self.actor_of(state.experience);
            if let Some(target) = state.targets.get_mut(&process.target) {
                state.experience += self
                    .model
                    .experience_gain(target, &actor, process.threads);
                match process.kind {
                    OpKind::Extract => {
                        target.resource_available =
                            self.model.extract_result(target, &actor, process.threads);
                        target.instability += self.model.instability_added(
                            OpKind::Extract,
                            process.threads,
                            self.cores,
                        );
                    }
                    OpKind::Replenish => {
                        target.resource_available = self.model.replenish_result(
                            target,
                            &actor,
                            process.threads,
                            self.cores,
                        );
                        target.instability += self.model.instability_added(
                            OpKind::Replenish,
                            process.threads,
                            self.cores,
                        );
                    }
                    OpKind::Stabilize => {
                        target.instability =
                            self.model
                                .stabilize_result(target, process.threads, self.cores);
                    }
                }
            }

            if let Some(node) = state.nodes.iter_mut().find(|n| n.name == process.node) {
                node.used_memory = (node.used_memory - process.memory).max(0.0);
            }
        }
    }
}

#[async_trait]
impl Environment for SimEnvironment {
    async fn target_state(&self, name: &str) -> Result<TargetState> {
        let mut state = self.state.lock().expect("sim state poisoned");
        let now = state.now_ms;
        self.advance(&mut state, now);
        state
            .targets
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("unknown target {name}"))
    }

    async fn actor_state(&self) -> Result<Actor> {
        let state = self.state.lock().expect("sim state poisoned");
        Ok(self.actor_of(state.experience))
    }

    async fn worker_nodes(&self) -> Result<Vec<WorkerNode>> {
        let state = self.state.lock().expect("sim state poisoned");
        Ok(state.nodes.clone())
    }

    async fn dispatch(
        &self,
        kind: OpKind,
        node: &str,
        threads: u32,
        target: &str,
        delay_ms: f64,
    ) -> Result<ProcessHandle> {
        let mut state = self.state.lock().expect("sim state poisoned");
        let now = state.now_ms;
        self.advance(&mut state, now);

        let memory = f64::from(threads) * self.costs.cost_of(kind);
        let actor = self.actor_of(state.experience);
        let duration = {
            let snapshot = state
                .targets
                .get(target)
                .ok_or_else(|| anyhow!("unknown target {target}"))?;
            self.model.duration_ms(kind, snapshot, &actor)
        };

        let slot = state
            .nodes
            .iter_mut()
            .find(|n| n.name == node)
            .ok_or_else(|| anyhow!("unknown node {node}"))?;
        if slot.available_memory() < memory {
            bail!(
                "node {node} has {:.2} GB free, {memory:.2} GB requested",
                slot.available_memory()
            );
        }
        slot.used_memory += memory;

        let handle = state.next_handle;
        state.next_handle += 1;
        let end_ms = state.now_ms + delay_ms + duration;
        state.in_flight.push(SimProcess {
            handle,
            kind,
            target: target.to_string(),
            node: node.to_string(),
            threads,
            memory,
            end_ms,
        });
        Ok(handle)
    }

    async fn poll_complete(&self, handle: ProcessHandle) -> Result<bool> {
        let mut state = self.state.lock().expect("sim state poisoned");
        let now = state.now_ms;
        self.advance(&mut state, now);
        if handle >= state.next_handle {
            bail!("unknown process handle {handle}");
        }
        Ok(!state.in_flight.iter().any(|p| p.handle == handle))
    }

    async fn sleep(&self, duration_ms: f64) {
        let mut state = self.state.lock().expect("sim state poisoned");
        let to = state.now_ms + duration_ms.max(0.0);
        self.advance(&mut state, to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> SimScenario {
        SimScenario {
            cores: 1,
            actor: Actor::new(250.0, 0.0),
            targets: vec![TargetState {
                name: "alpha".to_string(),
                resource_available: 1_000_000.0,
                resource_max: 1_000_000.0,
                instability: 5.0,
                instability_floor: 5.0,
                required_power: 100.0,
                controlled: true,
            }],
            nodes: vec![WorkerNode::new("w00", 1_024.0, 0.0)],
        }
    }

    #[tokio::test]
    async fn test_dispatch_reserves_and_completion_frees_memory() {
        let env = SimEnvironment::new(scenario());
        let actor = env.actor_state().await.unwrap();
        let target = env.target_state("alpha").await.unwrap();
        let duration = env.model().duration_ms(OpKind::Stabilize, &target, &actor);

        let handle = env
            .dispatch(OpKind::Stabilize, "w00", 10, "alpha", 0.0)
            .await
            .unwrap();
        let nodes = env.worker_nodes().await.unwrap();
        assert!((nodes[0].used_memory - 17.5).abs() < 1e-9);
        assert!(!env.poll_complete(handle).await.unwrap());

        env.sleep(duration + 1.0).await;
        assert!(env.poll_complete(handle).await.unwrap());
        let nodes = env.worker_nodes().await.unwrap();
        assert_eq!(nodes[0].used_memory, 0.0);
    }

    #[tokio::test]
    async fn test_extract_effect_applies_at_completion() {
        let env = SimEnvironment::new(scenario());
        let actor = env.actor_state().await.unwrap();
        let before = env.target_state("alpha").await.unwrap();
        let expected = env.model().extract_result(&before, &actor, 100);

        env.dispatch(OpKind::Extract, "w00", 100, "alpha", 0.0)
            .await
            .unwrap();
        env.sleep(1.0).await;
        let mid = env.target_state("alpha").await.unwrap();
        assert_eq!(mid.resource_available, before.resource_available);

        env.sleep(1e9).await;
        let after = env.target_state("alpha").await.unwrap();
        assert!((after.resource_available - expected).abs() < 1e-6);
        assert!(after.instability > before.instability);
    }

    #[tokio::test]
    async fn test_completions_apply_in_end_time_order() {
        let env = SimEnvironment::new(scenario());
        // Stabilize dispatched first but delayed to land after the extract,
        // canceling the instability the extract adds.
        env.dispatch(OpKind::Stabilize, "w00", 100, "alpha", 50_000.0)
            .await
            .unwrap();
        env.dispatch(OpKind::Extract, "w00", 100, "alpha", 0.0)
            .await
            .unwrap();
        env.sleep(1e9).await;

        let after = env.target_state("alpha").await.unwrap();
        assert_eq!(after.instability, after.instability_floor);
    }

    #[tokio::test]
    async fn test_over_committing_a_node_fails() {
        let env = SimEnvironment::new(scenario());
        let err = env
            .dispatch(OpKind::Stabilize, "w00", 100_000, "alpha", 0.0)
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_actor_power_grows_with_completed_work() {
        let env = SimEnvironment::new(scenario());
        let before = env.actor_state().await.unwrap();
        env.dispatch(OpKind::Stabilize, "w00", 50, "alpha", 0.0)
            .await
            .unwrap();
        env.sleep(1e9).await;
        let after = env.actor_state().await.unwrap();
        assert!(after.experience > before.experience);
        assert!(after.power >= before.power);
    }

    #[rstest::rstest]
    #[case(OpKind::Extract, 1.0)]
    #[case(OpKind::Replenish, 3.2)]
    #[case(OpKind::Stabilize, 4.0)]
    fn test_duration_ratios_are_fixed_per_kind(#[case] kind: OpKind, #[case] ratio: f64) {
        let model = SimModel::default();
        let actor = Actor::new(250.0, 0.0);
        let target = scenario().targets.remove(0);
        let extract = model.duration_ms(OpKind::Extract, &target, &actor);
        let duration = model.duration_ms(kind, &target, &actor);
        assert!((duration / extract - ratio).abs() < 1e-9);
    }

    #[test]
    fn test_scenario_parses_from_toml() {
        let raw = r#"
            cores = 2

            [actor]
            power = 250.0
            experience = 0.0

            [[targets]]
            name = "alpha"
            resource_available = 400000.0
            resource_max = 1000000.0
            instability = 12.0
            instability_floor = 5.0
            required_power = 100.0
            controlled = true

            [[nodes]]
            name = "w00"
            total_memory = 16384.0
            used_memory = 0.0
        "#;
        let scenario: SimScenario = toml::from_str(raw).unwrap();
        assert_eq!(scenario.cores, 2);
        assert_eq!(scenario.targets.len(), 1);
        assert_eq!(scenario.nodes[0].total_memory, 16_384.0);
    }
}
