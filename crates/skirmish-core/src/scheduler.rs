//! Multi-run scheduler: fans out independent battle runs with a bound on
//! simultaneous execution.
//!
//! Pairs come either from an explicit list or from the capsule registry
//! (round-robin by role). Every pair gets its own queued run and runner
//! task; a shared semaphore admits at most `concurrency` tasks into their
//! round loops, so excess runs stay `queued` until a slot frees up.
//! `start_many` returns once all tasks are scheduled; it never waits for
//! run completion.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::info;

use crate::domain::{Result, Role, SkirmishError};
use crate::registry::CapsuleRegistry;
use crate::runner::{BattleOptions, BattleRunner};

fn default_rounds() -> u64 {
    20
}

fn default_interval_seconds() -> f64 {
    1.0
}

/// One attacker/defender pairing to battle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattlePair {
    pub attacker_ref: String,
    pub defender_ref: String,
    #[serde(default)]
    pub attacker_tool: Option<String>,
    #[serde(default)]
    pub defender_tool: Option<String>,
    #[serde(default = "default_rounds")]
    pub rounds: u64,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: f64,
    /// Registry ids, when the pair came from the registry. Recorded in
    /// run meta so the evolution engine can resolve mutation targets.
    #[serde(default)]
    pub attacker_id: Option<String>,
    #[serde(default)]
    pub defender_id: Option<String>,
}

impl BattlePair {
    pub fn new(attacker_ref: impl Into<String>, defender_ref: impl Into<String>) -> Self {
        Self {
            attacker_ref: attacker_ref.into(),
            defender_ref: defender_ref.into(),
            attacker_tool: None,
            defender_tool: None,
            rounds: default_rounds(),
            interval_seconds: default_interval_seconds(),
            attacker_id: None,
            defender_id: None,
        }
    }

    fn options(&self) -> BattleOptions {
        BattleOptions {
            rounds: self.rounds,
            interval: Duration::from_secs_f64(self.interval_seconds),
            attacker_ref: Some(self.attacker_ref.clone()),
            defender_ref: Some(self.defender_ref.clone()),
            attacker_tool: self.attacker_tool.clone(),
            defender_tool: self.defender_tool.clone(),
        }
    }
}

/// How to build the pair list.
#[derive(Debug, Clone)]
pub enum BattlePlan {
    /// Battle exactly these pairs.
    ExplicitPairs(Vec<BattlePair>),
    /// Pair enabled registry capsules by role, round-robin when counts
    /// differ, bounded by `num_matches`.
    FromRegistry {
        attacker_role: Role,
        defender_role: Role,
        num_matches: usize,
        rounds: u64,
        interval_seconds: f64,
        attacker_tool: Option<String>,
        defender_tool: Option<String>,
    },
}

/// Launches batches of battle runs.
pub struct MultiRunScheduler {
    runner: Arc<BattleRunner>,
    registry: Arc<dyn CapsuleRegistry>,
}

impl MultiRunScheduler {
    pub fn new(runner: Arc<BattleRunner>, registry: Arc<dyn CapsuleRegistry>) -> Self {
        Self { runner, registry }
    }

    /// Create and launch one run per pair, bounded by `concurrency`.
    /// Returns the generated run ids once every task is scheduled.
    pub async fn start_many(&self, plan: BattlePlan, concurrency: usize) -> Result<Vec<String>> {
        let pairs = self.build_pairs(plan).await?;
        if pairs.is_empty() {
            return Err(SkirmishError::Validation(
                "no battle pairs to schedule".to_string(),
            ));
        }

        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut run_ids = Vec::with_capacity(pairs.len());

        for pair in pairs {
            let state = self.runner.create(None)?;
            let run_id = state.run_id.clone();

            self.runner.store().update(&run_id, |state| {
                state
                    .meta
                    .insert("attacker_endpoint".into(), pair.attacker_ref.clone());
                state
                    .meta
                    .insert("defender_endpoint".into(), pair.defender_ref.clone());
                if let Some(id) = &pair.attacker_id {
                    state.meta.insert("attacker_id".into(), id.clone());
                }
                if let Some(id) = &pair.defender_id {
                    state.meta.insert("defender_id".into(), id.clone());
                }
            })?;

            self.runner
                .spawn(&run_id, pair.options(), Some(Arc::clone(&semaphore)))?;
            info!(
                event = "scheduler.run_started",
                run_id = %run_id,
                attacker = %pair.attacker_ref,
                defender = %pair.defender_ref,
            );
            run_ids.push(run_id);
        }

        Ok(run_ids)
    }

    async fn build_pairs(&self, plan: BattlePlan) -> Result<Vec<BattlePair>> {
        match plan {
            BattlePlan::ExplicitPairs(pairs) => Ok(pairs),
            BattlePlan::FromRegistry {
                attacker_role,
                defender_role,
                num_matches,
                rounds,
                interval_seconds,
                attacker_tool,
                defender_tool,
            } => {
                let attackers = self.registry.list_by_role(attacker_role, true).await?;
                let defenders = self.registry.list_by_role(defender_role, true).await?;
                if attackers.is_empty() || defenders.is_empty() {
                    return Err(SkirmishError::Validation(
                        "not enough capsules found for specified roles".to_string(),
                    ));
                }

                let mut pairs = Vec::with_capacity(num_matches);
                for i in 0..num_matches {
                    let attacker = &attackers[i % attackers.len()];
                    let defender = &defenders[i % defenders.len()];
                    pairs.push(BattlePair {
                        attacker_ref: attacker.service_endpoint(),
                        defender_ref: defender.service_endpoint(),
                        attacker_tool: attacker_tool.clone(),
                        defender_tool: defender_tool.clone(),
                        rounds,
                        interval_seconds,
                        attacker_id: Some(attacker.id.clone()),
                        defender_id: Some(defender.id.clone()),
                    });
                }
                Ok(pairs)
            }
        }
    }
}
