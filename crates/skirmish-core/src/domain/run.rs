//! Battle run state and round tracking.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a battle run.
///
/// Transitions are monotonic: `Queued -> Running` is the only entry,
/// `Running -> {Stopped, Completed}` are the only exits, and terminal
/// states never transition further.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Stopped,
    Completed,
}

/// One attacker/defender exchange. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundEntry {
    /// 1-based round number, contiguous across successful rounds.
    pub round: u64,

    /// When the exchange completed.
    pub timestamp: DateTime<Utc>,

    /// Normalized attacker output fed to the defender.
    pub attacker_output: String,

    /// Normalized defender output that was classified.
    pub defender_output: String,

    /// Whether the defender output classified as a breach.
    pub breach: bool,

    /// Resolved attacker endpoint used for this round.
    pub attacker_endpoint: String,

    /// Resolved defender endpoint used for this round.
    pub defender_endpoint: String,
}

/// A round that raised before completing. Error rounds never count
/// toward `total_rounds`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundError {
    pub round: u64,
    pub error: String,
}

/// Aggregate metrics snapshotted when a run reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMetrics {
    pub rounds: u64,
    pub breaches: u64,
    pub breach_rate: f64,
    pub errors: u64,
}

/// Audit entry appended by the evolution engine after a mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvolutionAudit {
    pub mutated_at: DateTime<Utc>,
    pub strategy: String,
    pub target_capsule_id: String,
    pub new_capsule_id: Option<String>,
    pub note: String,
}

/// Full state of one battle run. Identity is `run_id`.
///
/// While a runner task is active it exclusively owns mutation of this
/// state; afterwards the persisted snapshot is the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunState {
    pub run_id: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Append-only, insertion order == chronological order.
    pub rounds: Vec<RoundEntry>,
    pub errors: Vec<RoundError>,

    /// Count of rounds classified as breach.
    pub breaches: u64,

    /// Count of successfully completed rounds. Error rounds excluded.
    pub total_rounds: u64,

    /// `breaches / total_rounds`, or 0.0 before any round completes.
    /// Recomputed after every successful round, never stored independently.
    pub breach_rate: f64,

    /// Write-once-true cooperative stop flag, read at round boundaries.
    pub stop_requested: bool,

    /// Resolved endpoints, tools, capsule ids, and lifecycle handles.
    #[serde(default)]
    pub meta: BTreeMap<String, String>,

    /// Populated once, at run termination.
    #[serde(default)]
    pub metrics: Option<RunMetrics>,

    /// Appended by the evolution engine.
    #[serde(default)]
    pub evolutions: Vec<EvolutionAudit>,
}

impl RunState {
    /// Create a fresh queued run.
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            rounds: Vec::new(),
            errors: Vec::new(),
            breaches: 0,
            total_rounds: 0,
            breach_rate: 0.0,
            stop_requested: false,
            meta: BTreeMap::new(),
            metrics: None,
            evolutions: Vec::new(),
        }
    }

    /// Recompute `breach_rate` from the counters.
    pub fn recompute_breach_rate(&mut self) {
        self.breach_rate = if self.total_rounds > 0 {
            self.breaches as f64 / self.total_rounds as f64
        } else {
            0.0
        };
    }

    /// Snapshot the aggregate metrics for a terminal state.
    pub fn snapshot_metrics(&self) -> RunMetrics {
        RunMetrics {
            rounds: self.total_rounds,
            breaches: self.breaches,
            breach_rate: self.breach_rate,
            errors: self.errors.len() as u64,
        }
    }

    /// True once the run has reached `Stopped` or `Completed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, RunStatus::Stopped | RunStatus::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_is_queued_and_empty() {
        let state = RunState::new("r1");
        assert_eq!(state.status, RunStatus::Queued);
        assert_eq!(state.total_rounds, 0);
        assert_eq!(state.breach_rate, 0.0);
        assert!(!state.stop_requested);
        assert!(state.rounds.is_empty());
        assert!(state.metrics.is_none());
    }

    #[test]
    fn test_breach_rate_derivation() {
        let mut state = RunState::new("r1");
        state.total_rounds = 4;
        state.breaches = 1;
        state.recompute_breach_rate();
        assert_eq!(state.breach_rate, 0.25);

        state.total_rounds = 0;
        state.breaches = 0;
        state.recompute_breach_rate();
        assert_eq!(state.breach_rate, 0.0);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut state = RunState::new("r1");
        state.meta.insert("attacker_endpoint".into(), "http://a:9000".into());
        let json = serde_json::to_string(&state).unwrap();
        let back: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
