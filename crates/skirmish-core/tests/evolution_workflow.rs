//! Evolution engine workflow tests: evaluation, target selection,
//! mutation invariants, and the audit trail.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use skirmish_core::{
    CapsuleRecord, CapsuleRegistry, EvolutionEngine, MemoryCapsuleRegistry, MutationStrategy,
    Role, RunState, RunStatus, RunStore, SkirmishError,
};

fn store() -> (TempDir, Arc<RunStore>) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RunStore::new(dir.path().join("battles")).unwrap());
    (dir, store)
}

/// Persist a finished run with the given aggregates.
fn seed_run(store: &RunStore, run_id: &str, total_rounds: u64, breaches: u64, errors: u64) {
    store.create(RunState::new(run_id)).unwrap();
    store
        .update(run_id, |state| {
            state.status = RunStatus::Completed;
            state.total_rounds = total_rounds;
            state.breaches = breaches;
            state.recompute_breach_rate();
            for round in 1..=errors {
                state.errors.push(skirmish_core::RoundError {
                    round,
                    error: "boom".to_string(),
                });
            }
        })
        .unwrap();
}

async fn seed_capsule(
    registry: &MemoryCapsuleRegistry,
    name: &str,
    role: Role,
    temp: Option<f64>,
) -> String {
    let mut record = CapsuleRecord::new(name, role, "img:latest");
    record.description = Some(format!("baseline {name}"));
    if let Some(temp) = temp {
        record.config.insert("temp".into(), json!(temp));
    }
    registry.create(record).await.unwrap().id
}

#[tokio::test]
async fn test_evaluate_scores_breaches_and_errors() {
    let (_dir, store) = store();
    seed_run(&store, "run-1", 4, 2, 1);

    let registry = Arc::new(MemoryCapsuleRegistry::new());
    let engine = EvolutionEngine::new(Arc::clone(&store), registry);

    let evaluation = engine.evaluate("run-1").unwrap();
    assert_eq!(evaluation.rounds, 4);
    assert_eq!(evaluation.breaches, 2);
    assert_eq!(evaluation.breach_rate, 0.5);
    assert_eq!(evaluation.errors, 1);
    assert!((evaluation.score - 0.49).abs() < 1e-9);
}

#[tokio::test]
async fn test_evaluate_unknown_run_is_not_found() {
    let (_dir, store) = store();
    let engine = EvolutionEngine::new(store, Arc::new(MemoryCapsuleRegistry::new()));
    assert!(matches!(
        engine.evaluate("ghost"),
        Err(SkirmishError::RunNotFound(_))
    ));
}

#[tokio::test]
async fn test_breachy_run_hardens_the_defender() {
    let (_dir, store) = store();
    let registry = Arc::new(MemoryCapsuleRegistry::new());
    let defender_id = seed_capsule(&registry, "guard", Role::Defense, Some(0.7)).await;
    let attacker_id = seed_capsule(&registry, "probe", Role::Attack, None).await;

    seed_run(&store, "run-1", 4, 2, 0);
    store
        .update("run-1", |state| {
            state.meta.insert("defender_id".into(), defender_id.clone());
            state.meta.insert("attacker_id".into(), attacker_id.clone());
        })
        .unwrap();

    let engine = EvolutionEngine::new(Arc::clone(&store), Arc::clone(&registry) as Arc<dyn CapsuleRegistry>);
    let outcome = engine
        .evaluate_and_mutate("run-1", None, None, None)
        .await
        .unwrap();

    let mutated = outcome.mutated.expect("mutation performed");
    assert_ne!(mutated.id, defender_id);
    assert_eq!(mutated.name, "guard-mutant");
    assert_eq!(mutated.role, Role::Defense);
    assert_eq!(mutated.version, "v2");
    assert!(mutated.tags.iter().any(|tag| tag == "mutant"));
    assert!(mutated.enabled);
    assert_eq!(mutated.config["temp"].as_f64(), Some(0.6));
    assert!(mutated
        .description
        .as_deref()
        .unwrap()
        .contains("mutated: auto-evolved from run run-1"));

    // The original record is untouched.
    let original = registry.get(&defender_id).await.unwrap();
    assert_eq!(original.version, "v1");
    assert_eq!(original.config["temp"].as_f64(), Some(0.7));
    assert!(!original.tags.iter().any(|tag| tag == "mutant"));

    // An audit entry landed on the run's persisted state.
    let state = store.state("run-1").unwrap();
    assert_eq!(state.evolutions.len(), 1);
    assert_eq!(state.evolutions[0].target_capsule_id, defender_id);
    assert_eq!(
        state.evolutions[0].new_capsule_id.as_deref(),
        Some(mutated.id.as_str())
    );
    assert_eq!(state.evolutions[0].strategy, "defense_harden");
}

#[tokio::test]
async fn test_breach_free_run_explores_with_the_attacker() {
    let (_dir, store) = store();
    let registry = Arc::new(MemoryCapsuleRegistry::new());
    let attacker_id = seed_capsule(&registry, "probe", Role::Attack, None).await;

    seed_run(&store, "run-2", 3, 0, 0);
    store
        .update("run-2", |state| {
            state.meta.insert("attacker_id".into(), attacker_id.clone());
        })
        .unwrap();

    let engine = EvolutionEngine::new(Arc::clone(&store), Arc::clone(&registry) as Arc<dyn CapsuleRegistry>);
    let outcome = engine
        .evaluate_and_mutate("run-2", None, None, None)
        .await
        .unwrap();

    let mutated = outcome.mutated.expect("mutation performed");
    assert_eq!(mutated.role, Role::Attack);
    // attack_explore seeds the exploratory temperature when absent.
    assert_eq!(mutated.config["temp"].as_f64(), Some(0.9));
}

#[tokio::test]
async fn test_registry_fallback_picks_oldest_enabled() {
    let (_dir, store) = store();
    let registry = Arc::new(MemoryCapsuleRegistry::new());
    let oldest_id = seed_capsule(&registry, "guard-old", Role::Defense, Some(0.5)).await;
    seed_capsule(&registry, "guard-new", Role::Defense, Some(0.5)).await;

    // Breachy run with no recorded capsule ids.
    seed_run(&store, "run-3", 2, 1, 0);

    let engine = EvolutionEngine::new(Arc::clone(&store), Arc::clone(&registry) as Arc<dyn CapsuleRegistry>);
    let outcome = engine
        .evaluate_and_mutate("run-3", None, None, None)
        .await
        .unwrap();

    let state = store.state("run-3").unwrap();
    assert_eq!(state.evolutions[0].target_capsule_id, oldest_id);
    assert!(outcome.mutated.is_some());
}

#[tokio::test]
async fn test_no_resolvable_target_returns_note_without_mutation() {
    let (_dir, store) = store();
    let registry = Arc::new(MemoryCapsuleRegistry::new());
    seed_run(&store, "run-4", 2, 1, 0);

    let engine = EvolutionEngine::new(Arc::clone(&store), registry);
    let outcome = engine
        .evaluate_and_mutate("run-4", None, None, None)
        .await
        .unwrap();

    assert!(outcome.mutated.is_none());
    assert_eq!(
        outcome.note.as_deref(),
        Some("no target capsule found to mutate")
    );
    assert!(store.state("run-4").unwrap().evolutions.is_empty());
}

#[tokio::test]
async fn test_explicit_target_and_strategy_win() {
    let (_dir, store) = store();
    let registry = Arc::new(MemoryCapsuleRegistry::new());
    let attacker_id = seed_capsule(&registry, "probe", Role::Attack, Some(1.0)).await;

    // Breachy run would normally pick the defender; the explicit id wins.
    seed_run(&store, "run-5", 2, 2, 0);

    let engine = EvolutionEngine::new(Arc::clone(&store), Arc::clone(&registry) as Arc<dyn CapsuleRegistry>);
    let outcome = engine
        .evaluate_and_mutate(
            "run-5",
            Some(&attacker_id),
            Some(Role::Attack),
            Some(MutationStrategy::AttackExplore),
        )
        .await
        .unwrap();

    let mutated = outcome.mutated.unwrap();
    assert_eq!(mutated.role, Role::Attack);
    assert_eq!(mutated.config["temp"].as_f64(), Some(1.1));
}

#[tokio::test]
async fn test_mutating_a_mutant_does_not_duplicate_the_tag() {
    let (_dir, store) = store();
    let registry = Arc::new(MemoryCapsuleRegistry::new());
    let engine = EvolutionEngine::new(store, Arc::clone(&registry) as Arc<dyn CapsuleRegistry>);

    let mut record = CapsuleRecord::new("guard", Role::Defense, "img");
    record.tags.push("mutant".to_string());
    record.version = "v1.2".to_string();
    let id = registry.create(record).await.unwrap().id;

    let mutated = engine
        .mutate_and_register(&id, Role::Defense, MutationStrategy::GenericNudge, None)
        .await
        .unwrap();

    assert_eq!(
        mutated.tags.iter().filter(|tag| *tag == "mutant").count(),
        1
    );
    assert_eq!(mutated.version, "v1.2.m1");
    assert_eq!(mutated.config["mutations"].as_i64(), Some(1));
}

#[tokio::test]
async fn test_mutate_unknown_capsule_is_not_found() {
    let (_dir, store) = store();
    let engine = EvolutionEngine::new(store, Arc::new(MemoryCapsuleRegistry::new()));
    assert!(matches!(
        engine
            .mutate_and_register("ghost", Role::Defense, MutationStrategy::DefenseHarden, None)
            .await,
        Err(SkirmishError::CapsuleNotFound(_))
    ));
}
