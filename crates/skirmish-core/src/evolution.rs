//! Evolution engine: score finished runs and mutate capsule configs.
//!
//! Closes the loop from battle outcome back to configuration. A run with
//! breaches selects its defender for hardening; a breach-free run selects
//! its attacker for exploration. Mutation never rewrites an existing
//! record: it registers a new versioned record carrying a `mutant` tag,
//! and appends an audit entry onto the run's persisted state.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{CapsuleRecord, EvolutionAudit, Result, Role, SkirmishError};
use crate::registry::CapsuleRegistry;
use crate::store::RunStore;

/// Mutation operators applied to a capsule config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStrategy {
    /// Lower the sampling temperature (floor 0.1), or flag strictness.
    DefenseHarden,
    /// Raise the sampling temperature (cap 2.0), or seed an exploratory
    /// value.
    AttackExplore,
    /// Bump a mutation counter.
    GenericNudge,
}

impl std::fmt::Display for MutationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MutationStrategy::DefenseHarden => "defense_harden",
            MutationStrategy::AttackExplore => "attack_explore",
            MutationStrategy::GenericNudge => "generic_nudge",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for MutationStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "defense_harden" => Ok(MutationStrategy::DefenseHarden),
            "attack_explore" => Ok(MutationStrategy::AttackExplore),
            "generic_nudge" => Ok(MutationStrategy::GenericNudge),
            other => Err(format!("unknown mutation strategy: {other}")),
        }
    }
}

/// Evaluation metrics for one finished run. Higher score is better;
/// errors are a small penalty, breaches a large one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    pub run_id: String,
    pub rounds: u64,
    pub breaches: u64,
    pub breach_rate: f64,
    pub errors: u64,
    pub score: f64,
}

/// Result of an evaluate-and-mutate cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionOutcome {
    pub evaluation: Evaluation,
    pub mutated: Option<CapsuleRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Post-hoc analysis and mutation over persisted runs.
pub struct EvolutionEngine {
    store: Arc<RunStore>,
    registry: Arc<dyn CapsuleRegistry>,
}

impl EvolutionEngine {
    pub fn new(store: Arc<RunStore>, registry: Arc<dyn CapsuleRegistry>) -> Self {
        Self { store, registry }
    }

    /// Score a run from its persisted snapshot.
    pub fn evaluate(&self, run_id: &str) -> Result<Evaluation> {
        let state = self
            .store
            .load_snapshot(run_id)?
            .ok_or_else(|| SkirmishError::RunNotFound(run_id.to_string()))?;

        let rounds = if state.total_rounds > 0 {
            state.total_rounds
        } else {
            state.rounds.len() as u64
        };
        let errors = state.errors.len() as u64;
        let score = (1.0 - state.breach_rate - 0.01 * errors as f64).clamp(-1.0, 1.0);

        Ok(Evaluation {
            run_id: run_id.to_string(),
            rounds,
            breaches: state.breaches,
            breach_rate: state.breach_rate,
            errors,
            score,
        })
    }

    /// Clone-and-mutate a capsule record, registering the variant as a
    /// brand-new record. The original is never altered.
    pub async fn mutate_and_register(
        &self,
        target_id: &str,
        role: Role,
        strategy: MutationStrategy,
        reason: Option<&str>,
    ) -> Result<CapsuleRecord> {
        let original = self.registry.get(target_id).await?;

        let mut tags = original.tags.clone();
        if !tags.iter().any(|tag| tag == "mutant") {
            tags.push("mutant".to_string());
        }

        let description = match reason {
            Some(reason) => Some(format!(
                "{} (mutated: {reason})",
                original.description.clone().unwrap_or_default()
            )),
            None => original.description.clone(),
        };

        let now = Utc::now();
        let mutant = CapsuleRecord {
            id: Uuid::new_v4().to_string(),
            name: format!("{}-mutant", original.name),
            version: bump_version(&original.version),
            role,
            image: original.image.clone(),
            entrypoint: original.entrypoint.clone(),
            env: original.env.clone(),
            config: mutate_config(&original.config, strategy),
            tags,
            enabled: true,
            owner: original.owner.clone(),
            description,
            created_at: now,
            updated_at: now,
        };

        let registered = self.registry.create(mutant).await?;
        info!(
            event = "evolution.mutated",
            original = %original.id,
            new = %registered.id,
            strategy = %strategy,
        );
        Ok(registered)
    }

    /// Evaluate a run, pick a mutation target, and register the variant.
    ///
    /// Without an explicit `capsule_id`, direction follows the breach
    /// rate: any breach hardens the defender, a breach-free run explores
    /// with the attacker. The concrete target comes from the run's
    /// recorded capsule ids, falling back to the oldest enabled registry
    /// entry of the needed role. The audit append onto the run state is
    /// best-effort and never fails the call.
    pub async fn evaluate_and_mutate(
        &self,
        run_id: &str,
        capsule_id: Option<&str>,
        target_role: Option<Role>,
        strategy: Option<MutationStrategy>,
    ) -> Result<EvolutionOutcome> {
        let evaluation = self.evaluate(run_id)?;
        let state = self
            .store
            .load_snapshot(run_id)?
            .ok_or_else(|| SkirmishError::RunNotFound(run_id.to_string()))?;

        let attacker_id = state.meta.get("attacker_id").cloned();
        let defender_id = state.meta.get("defender_id").cloned();

        let (target_id, role, strategy) = if let Some(id) = capsule_id {
            (
                Some(id.to_string()),
                target_role.unwrap_or(Role::Defense),
                strategy.unwrap_or(MutationStrategy::DefenseHarden),
            )
        } else if evaluation.breach_rate > 0.0 {
            let role = target_role.unwrap_or(Role::Defense);
            let target = match defender_id {
                Some(id) => Some(id),
                None => self.oldest_enabled(role).await?,
            };
            (
                target,
                role,
                strategy.unwrap_or(MutationStrategy::DefenseHarden),
            )
        } else {
            let role = target_role.unwrap_or(Role::Attack);
            let target = match attacker_id {
                Some(id) => Some(id),
                None => self.oldest_enabled(role).await?,
            };
            (
                target,
                role,
                strategy.unwrap_or(MutationStrategy::AttackExplore),
            )
        };

        let Some(target_id) = target_id else {
            return Ok(EvolutionOutcome {
                evaluation,
                mutated: None,
                note: Some("no target capsule found to mutate".to_string()),
            });
        };

        let reason = format!("auto-evolved from run {run_id} at {}", Utc::now());
        let mutated = self
            .mutate_and_register(&target_id, role, strategy, Some(&reason))
            .await?;

        // Audit trail back onto the run; a write failure must never fail
        // the evolution call.
        let audit = EvolutionAudit {
            mutated_at: Utc::now(),
            strategy: strategy.to_string(),
            target_capsule_id: target_id.clone(),
            new_capsule_id: Some(mutated.id.clone()),
            note: format!("auto-evolved from run {run_id}"),
        };
        if let Err(err) = self.store.update(run_id, |state| {
            state.evolutions.push(audit.clone());
        }) {
            warn!(event = "evolution.audit_failed", run_id = %run_id, error = %err);
        }

        Ok(EvolutionOutcome {
            evaluation,
            mutated: Some(mutated),
            note: None,
        })
    }

    async fn oldest_enabled(&self, role: Role) -> Result<Option<String>> {
        let records = self.registry.list_by_role(role, true).await?;
        Ok(records.into_iter().next().map(|record| record.id))
    }
}

/// Apply one mutation operator to a capsule config.
fn mutate_config(
    config: &serde_json::Map<String, Value>,
    strategy: MutationStrategy,
) -> serde_json::Map<String, Value> {
    let mut mutated = config.clone();
    match strategy {
        MutationStrategy::DefenseHarden => match mutated.get("temp") {
            Some(value) => {
                let temp = match value.as_f64() {
                    Some(temp) => round3((temp - 0.1).max(0.1)),
                    None => 0.5,
                };
                mutated.insert("temp".into(), json_number(temp));
            }
            None => {
                mutated.insert("strict".into(), Value::Bool(true));
            }
        },
        MutationStrategy::AttackExplore => {
            let temp = mutated
                .get("temp")
                .and_then(Value::as_f64)
                .map(|temp| round3((temp + 0.1).min(2.0)))
                .unwrap_or(0.9);
            mutated.insert("temp".into(), json_number(temp));
        }
        MutationStrategy::GenericNudge => {
            let count = mutated
                .get("mutations")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            mutated.insert("mutations".into(), Value::from(count + 1));
        }
    }
    mutated
}

/// Bump a capsule version string.
///
/// `v`-prefixed versions that already carry a dot get a `.m1` minor
/// mutation suffix; otherwise the final numeric segment is incremented
/// and re-prefixed with `v`. Unparsable versions fall back to `.m1`.
fn bump_version(version: &str) -> String {
    let version = if version.is_empty() { "v1" } else { version };

    if version.starts_with('v') && version.contains('.') {
        return format!("{version}.m1");
    }

    let base = version.trim_start_matches('v');
    if base.contains('.') {
        let mut parts: Vec<&str> = base.split('.').collect();
        match parts.last().and_then(|last| last.parse::<i64>().ok()) {
            Some(last) => {
                let bumped = (last + 1).to_string();
                let len = parts.len();
                parts[len - 1] = &bumped;
                format!("v{}", parts.join("."))
            }
            None => format!("{version}.m1"),
        }
    } else {
        match base.parse::<i64>() {
            Ok(number) => format!("v{}", number + 1),
            Err(_) => format!("{version}.m1"),
        }
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn json_number(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_with_temp(temp: f64) -> serde_json::Map<String, Value> {
        let mut config = serde_json::Map::new();
        config.insert("temp".into(), json!(temp));
        config
    }

    #[test]
    fn test_defense_harden_lowers_temp_with_floor() {
        let mutated = mutate_config(&config_with_temp(0.7), MutationStrategy::DefenseHarden);
        assert_eq!(mutated["temp"].as_f64(), Some(0.6));

        let mutated = mutate_config(&config_with_temp(0.15), MutationStrategy::DefenseHarden);
        assert_eq!(mutated["temp"].as_f64(), Some(0.1));
    }

    #[test]
    fn test_defense_harden_without_temp_sets_strict() {
        let mutated = mutate_config(&serde_json::Map::new(), MutationStrategy::DefenseHarden);
        assert_eq!(mutated["strict"], Value::Bool(true));
    }

    #[test]
    fn test_defense_harden_non_numeric_temp_resets() {
        let mut config = serde_json::Map::new();
        config.insert("temp".into(), json!("warm"));
        let mutated = mutate_config(&config, MutationStrategy::DefenseHarden);
        assert_eq!(mutated["temp"].as_f64(), Some(0.5));
    }

    #[test]
    fn test_attack_explore_raises_temp_with_cap() {
        let mutated = mutate_config(&config_with_temp(0.7), MutationStrategy::AttackExplore);
        assert_eq!(mutated["temp"].as_f64(), Some(0.8));

        let mutated = mutate_config(&config_with_temp(1.95), MutationStrategy::AttackExplore);
        assert_eq!(mutated["temp"].as_f64(), Some(2.0));

        let mutated = mutate_config(&serde_json::Map::new(), MutationStrategy::AttackExplore);
        assert_eq!(mutated["temp"].as_f64(), Some(0.9));
    }

    #[test]
    fn test_generic_nudge_increments_counter() {
        let mutated = mutate_config(&serde_json::Map::new(), MutationStrategy::GenericNudge);
        assert_eq!(mutated["mutations"].as_i64(), Some(1));

        let again = mutate_config(&mutated, MutationStrategy::GenericNudge);
        assert_eq!(again["mutations"].as_i64(), Some(2));
    }

    #[test]
    fn test_bump_version_table() {
        assert_eq!(bump_version("v1"), "v2");
        assert_eq!(bump_version("v1.2"), "v1.2.m1");
        assert_eq!(bump_version("2"), "v3");
        assert_eq!(bump_version("1.2"), "v1.3");
        assert_eq!(bump_version("weird"), "weird.m1");
        assert_eq!(bump_version(""), "v2");
    }

    #[test]
    fn test_strategy_round_trip() {
        assert_eq!(
            "defense_harden".parse::<MutationStrategy>().unwrap(),
            MutationStrategy::DefenseHarden
        );
        assert_eq!(MutationStrategy::AttackExplore.to_string(), "attack_explore");
        assert!("random".parse::<MutationStrategy>().is_err());
    }
}
