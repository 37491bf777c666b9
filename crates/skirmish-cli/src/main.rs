//! Skirmish - adversarial battle orchestration CLI
//!
//! The `skirmish` command drives battles between attacker and defender
//! capsules and evolves capsule configurations from the outcomes.
//!
//! ## Commands
//!
//! - `start`: Run a single battle to completion
//! - `start-many`: Fan out a batch of battles with bounded concurrency
//! - `status` / `stop` / `list`: Inspect and control runs
//! - `evaluate`: Score a finished run
//! - `evolve`: Evaluate a run and register a mutated capsule variant

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;

use skirmish_core::{
    init_tracing, BattleOptions, BattlePair, BattlePlan, BattleRunner, CapsuleLifecycle,
    EvolutionEngine, HttpToolInvoker, MemoryCapsuleRegistry, MultiRunScheduler,
    MutationStrategy, OrchestratorConfig, Role, RunStore,
};

#[derive(Parser)]
#[command(name = "skirmish")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Adversarial battle orchestration for AI agent capsules", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Data directory for run snapshots (default: $DATA_DIR or ./data)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single battle to completion and print the final state
    Start {
        /// Run identifier (generated if omitted)
        #[arg(long)]
        run_id: Option<String>,

        /// Number of rounds to battle
        #[arg(long, default_value_t = 20)]
        rounds: u64,

        /// Delay between rounds, in seconds
        #[arg(long, default_value_t = 1.0)]
        interval_secs: f64,

        /// Attacker reference: endpoint URL, hf:<model>, cerebras:<model>,
        /// or a bare model identifier to auto-provision
        #[arg(long)]
        attacker: Option<String>,

        /// Defender reference (same forms as --attacker)
        #[arg(long)]
        defender: Option<String>,

        /// Tool invoked on the attacker side
        #[arg(long)]
        attacker_tool: Option<String>,

        /// Tool invoked on the defender side
        #[arg(long)]
        defender_tool: Option<String>,
    },

    /// Fan out a batch of battles and wait for them to finish
    StartMany {
        /// JSON file holding a list of battle pairs
        #[arg(long, conflicts_with = "from_registry")]
        pairs_file: Option<PathBuf>,

        /// Pair enabled registry capsules by role instead
        #[arg(long)]
        from_registry: bool,

        /// Number of matches when pairing from the registry
        #[arg(long, default_value_t = 10)]
        num_matches: usize,

        /// Rounds per battle when pairing from the registry
        #[arg(long, default_value_t = 20)]
        rounds: u64,

        /// Delay between rounds, in seconds
        #[arg(long, default_value_t = 1.0)]
        interval_secs: f64,

        /// Maximum battles executing simultaneously
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },

    /// Show the best-known state of a run
    Status {
        run_id: String,
    },

    /// Request a cooperative stop of a running battle
    Stop {
        run_id: String,
    },

    /// List all persisted runs
    List,

    /// Score a finished run
    Evaluate {
        run_id: String,
    },

    /// Evaluate a run and register a mutated capsule variant
    Evolve {
        run_id: String,

        /// Explicit mutation target (otherwise inferred from the outcome)
        #[arg(long)]
        capsule_id: Option<String>,

        /// Role of the mutation target: attack or defense
        #[arg(long)]
        target_role: Option<Role>,

        /// Mutation strategy: defense_harden, attack_explore, generic_nudge
        #[arg(long)]
        strategy: Option<MutationStrategy>,
    },
}

struct Engine {
    store: Arc<RunStore>,
    runner: Arc<BattleRunner>,
    scheduler: MultiRunScheduler,
    evolution: EvolutionEngine,
}

fn build_engine(data_dir: Option<PathBuf>) -> Result<Engine> {
    let mut config = OrchestratorConfig::from_env();
    if let Some(data_dir) = data_dir {
        config.data_dir = data_dir;
    }

    let store = Arc::new(
        RunStore::new(config.battles_dir())
            .with_context(|| format!("opening battles dir under {}", config.data_dir.display()))?,
    );
    let invoker = Arc::new(HttpToolInvoker::new(&config));
    let lifecycle = Arc::new(CapsuleLifecycle::new());
    let registry = Arc::new(MemoryCapsuleRegistry::new());

    let runner = Arc::new(BattleRunner::new(
        Arc::clone(&store),
        invoker,
        lifecycle,
        config,
    ));
    let scheduler = MultiRunScheduler::new(
        Arc::clone(&runner),
        Arc::clone(&registry) as Arc<dyn skirmish_core::CapsuleRegistry>,
    );
    let evolution = EvolutionEngine::new(
        Arc::clone(&store),
        registry as Arc<dyn skirmish_core::CapsuleRegistry>,
    );

    Ok(Engine {
        store,
        runner,
        scheduler,
        evolution,
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    let engine = build_engine(cli.data_dir)?;

    match cli.command {
        Commands::Start {
            run_id,
            rounds,
            interval_secs,
            attacker,
            defender,
            attacker_tool,
            defender_tool,
        } => {
            let state = engine.runner.create(run_id)?;
            let run_id = state.run_id.clone();
            let options = BattleOptions {
                rounds,
                interval: Duration::from_secs_f64(interval_secs),
                attacker_ref: attacker,
                defender_ref: defender,
                attacker_tool,
                defender_tool,
            };
            let handle = engine.runner.spawn(&run_id, options, None)?;
            handle.await.context("battle task panicked")?;
            print_json(&engine.runner.get_state(&run_id)?)?;
        }

        Commands::StartMany {
            pairs_file,
            from_registry,
            num_matches,
            rounds,
            interval_secs,
            concurrency,
        } => {
            let plan = if from_registry {
                BattlePlan::FromRegistry {
                    attacker_role: Role::Attack,
                    defender_role: Role::Defense,
                    num_matches,
                    rounds,
                    interval_seconds: interval_secs,
                    attacker_tool: None,
                    defender_tool: None,
                }
            } else {
                let path = pairs_file
                    .context("either --pairs-file or --from-registry is required")?;
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                let pairs: Vec<BattlePair> = serde_json::from_str(&raw)
                    .with_context(|| format!("parsing battle pairs from {}", path.display()))?;
                BattlePlan::ExplicitPairs(pairs)
            };

            let run_ids = engine.scheduler.start_many(plan, concurrency).await?;
            println!("started {} runs: {}", run_ids.len(), run_ids.join(", "));

            // Stay alive until every scheduled run reaches a terminal state.
            loop {
                let all_done = run_ids
                    .iter()
                    .map(|id| engine.runner.get_state(id))
                    .collect::<skirmish_core::Result<Vec<_>>>()?
                    .iter()
                    .all(|state| state.is_terminal());
                if all_done {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }

            for run_id in &run_ids {
                let state = engine.runner.get_state(run_id)?;
                println!(
                    "{run_id}: {:?} rounds={} breaches={} breach_rate={:.3}",
                    state.status, state.total_rounds, state.breaches, state.breach_rate
                );
            }
        }

        Commands::Status { run_id } => {
            let mut value = serde_json::to_value(engine.runner.get_state(&run_id)?)?;
            if let serde_json::Value::Object(map) = &mut value {
                map.insert(
                    "task_active".to_string(),
                    serde_json::Value::Bool(engine.runner.is_active(&run_id)),
                );
            }
            print_json(&value)?;
        }

        Commands::Stop { run_id } => {
            engine.runner.request_stop(&run_id)?;
            println!("stop requested for {run_id}");
        }

        Commands::List => {
            print_json(&engine.store.list_runs()?)?;
        }

        Commands::Evaluate { run_id } => {
            print_json(&engine.evolution.evaluate(&run_id)?)?;
        }

        Commands::Evolve {
            run_id,
            capsule_id,
            target_role,
            strategy,
        } => {
            let outcome = engine
                .evolution
                .evaluate_and_mutate(&run_id, capsule_id.as_deref(), target_role, strategy)
                .await?;
            print_json(&outcome)?;
        }
    }

    Ok(())
}
