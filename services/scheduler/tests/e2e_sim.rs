//! End-to-end scheduler tests against the simulation environment.
//!
//! These drive the real entry points — prepare, run_batches, rank_targets —
//! through the virtual-clock environment: full preparation convergence,
//! batch waves with completion ordering, and ranking determinism.

use reap_model::{Actor, TargetState, WorkerNode};
use reap_scheduler::sim::{SimEnvironment, SimScenario};
use reap_scheduler::{orchestrator, prepare, rank, Environment, SchedulerConfig, SchedulerError};
use tokio::sync::watch;

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

fn scenario() -> SimScenario {
    SimScenario {
        cores: 1,
        actor: Actor::new(250.0, 0.0),
        targets: vec![target("alpha", 1_000_000.0), target("beta", 4_000_000.0)],
        nodes: (0..4)
            .map(|i| WorkerNode::new(format!("w{i:02}"), 16_384.0, 0.0))
            .collect(),
    }
}

fn config() -> SchedulerConfig {
    SchedulerConfig::default()
}

#[tokio::test]
async fn prepare_drives_target_to_baseline() {
    let env = SimEnvironment::new(scenario());
    let model = env.model().clone();
    let cfg = config();

    let outcome = prepare::prepare(&env, &model, &cfg, "alpha")
        .await
        .expect("preparation should converge");

    assert!(outcome.iterations >= 1);
    assert!(outcome.elapsed_ms > 0.0);
    assert!(env.now_ms() > 0.0);

    let state = env.target_state("alpha").await.unwrap();
    assert!(state.is_baseline(cfg.resource_tolerance, cfg.instability_tolerance));
}

#[tokio::test]
async fn batching_rejects_unprepared_target() {
    let env = SimEnvironment::new(scenario());
    let model = env.model().clone();
    let cfg = config();
    let (_tx, rx) = watch::channel(false);

    let err = orchestrator::run_batches(&env, &model, &cfg, "alpha", Some(0.5), Some(1), rx)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NotPrepared { .. }));
}

#[tokio::test]
async fn batch_cycles_extract_and_restore_baseline() {
    let env = SimEnvironment::new(scenario());
    let model = env.model().clone();
    let cfg = config();

    prepare::prepare(&env, &model, &cfg, "alpha").await.unwrap();

    let (_tx, rx) = watch::channel(false);
    let stats = orchestrator::run_batches(&env, &model, &cfg, "alpha", Some(0.5), Some(2), rx)
        .await
        .unwrap();

    assert_eq!(stats.cycles, 2);
    assert_eq!(stats.skipped_cycles, 0);
    assert!(stats.batches_dispatched >= 2);
    assert!(stats.predicted_yield > 0.0);

    // Each batch restores what it removed; after the last wave completes
    // the target should sit back near baseline.
    let state = env.target_state("alpha").await.unwrap();
    assert!(state.resource_ratio() > 0.99, "ratio {}", state.resource_ratio());
    assert!(state.excess_instability() < 1.0);
}

#[tokio::test]
async fn high_throughput_waves_launch_multiple_batches() {
    let env = SimEnvironment::new(scenario());
    let model = env.model().clone();
    let mut cfg = config();
    cfg.high_throughput = true;

    prepare::prepare(&env, &model, &cfg, "alpha").await.unwrap();

    let (_tx, rx) = watch::channel(false);
    let stats = orchestrator::run_batches(&env, &model, &cfg, "alpha", Some(0.5), Some(1), rx)
        .await
        .unwrap();

    assert_eq!(stats.cycles, 1);
    assert!(
        stats.batches_dispatched >= 2,
        "expected a deep wave, got {}",
        stats.batches_dispatched
    );
}

#[tokio::test]
async fn searched_threshold_runs_without_override() {
    let env = SimEnvironment::new(scenario());
    let model = env.model().clone();
    let cfg = config();

    prepare::prepare(&env, &model, &cfg, "alpha").await.unwrap();

    let (_tx, rx) = watch::channel(false);
    let stats = orchestrator::run_batches(&env, &model, &cfg, "alpha", None, Some(1), rx)
        .await
        .unwrap();
    assert_eq!(stats.cycles, 1);
    assert!(stats.batches_dispatched >= 1);
}

#[tokio::test]
async fn stop_signal_ends_the_run() {
    let env = SimEnvironment::new(scenario());
    let model = env.model().clone();
    let cfg = config();

    prepare::prepare(&env, &model, &cfg, "alpha").await.unwrap();

    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();
    let stats = orchestrator::run_batches(&env, &model, &cfg, "alpha", Some(0.5), None, rx)
        .await
        .unwrap();
    assert_eq!(stats.cycles, 0);
    assert_eq!(stats.batches_dispatched, 0);
}

#[tokio::test]
async fn ranking_orders_by_amortized_rate() {
    let env = SimEnvironment::new(scenario());
    let model = env.model().clone();
    let cfg = config();

    let evaluations = rank::rank_targets(
        &env,
        &model,
        &cfg,
        &["alpha".to_string(), "beta".to_string(), "ghost".to_string()],
    )
    .await
    .unwrap();

    // The unreadable candidate is skipped, the richer target wins.
    assert_eq!(evaluations.len(), 2);
    assert_eq!(evaluations[0].name, "beta");
    assert!(evaluations[0].rate_per_sec >= evaluations[1].rate_per_sec);
}

#[tokio::test]
async fn preparation_non_convergence_is_fatal() {
    let mut scenario = scenario();
    // An enormous backlog of instability against a fleet that fits exactly
    // one stabilize thread per round.
    scenario.targets[0].instability = 1_005.0;
    scenario.nodes = vec![WorkerNode::new("w00", 1.75, 0.0)];

    let env = SimEnvironment::new(scenario);
    let model = env.model().clone();
    let cfg = config();

    let err = prepare::prepare(&env, &model, &cfg, "alpha")
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NonConvergence { .. }));
}

#[tokio::test]
async fn malformed_snapshot_is_a_model_anomaly() {
    let mut scenario = scenario();
    scenario.targets[0].resource_available = scenario.targets[0].resource_max * 2.0;

    let env = SimEnvironment::new(scenario);
    let model = env.model().clone();
    let cfg = config();

    let err = prepare::prepare(&env, &model, &cfg, "alpha")
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::ModelAnomaly { .. }));
}
