//! Skirmish Core Library
//!
//! Battle orchestration for adversarial AI agent capsules: the run state
//! machine and round loop, the multi-backend tool invocation adapter, the
//! capsule lifecycle manager, the concurrency-bounded multi-run
//! scheduler, and the evolution engine that mutates capsule
//! configurations from run outcomes.

pub mod adapter;
pub mod breach;
pub mod config;
pub mod domain;
pub mod evolution;
pub mod lifecycle;
pub mod metrics;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod telemetry;

pub use domain::{
    CapsuleRecord, EvolutionAudit, Result, Role, RoundEntry, RoundError, RunMetrics, RunState,
    RunStatus, SkirmishError,
};

pub use adapter::{
    normalize_tool_output, BackendTarget, CerebrasClient, GenerationOptions, HfClient,
    HttpToolInvoker, ToolInvoker,
};
pub use breach::is_breach;
pub use config::OrchestratorConfig;
pub use evolution::{Evaluation, EvolutionEngine, EvolutionOutcome, MutationStrategy};
pub use lifecycle::{CapsuleLifecycle, ProvisionedCapsule};
pub use registry::{CapsuleRegistry, MemoryCapsuleRegistry};
pub use retry::{retry_async, RetryPolicy};
pub use runner::{BattleOptions, BattleRunner};
pub use scheduler::{BattlePair, BattlePlan, MultiRunScheduler};
pub use store::RunStore;

pub use metrics::METRICS;
pub use telemetry::init_tracing;

/// Skirmish version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
