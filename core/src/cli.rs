use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::compiler::BuildOptions;
use crate::config::EngineOptions;
use crate::interpreter::{Engine, Evaluation, RunOptions};

#[derive(Parser)]
#[command(name = "verdict")]
#[command(about = "Verdict - an asynchronous declarative logic engine", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides VERDICT_CONFIG_PATH)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Return suspensions instead of failing when an operator yields
    #[arg(long, global = true)]
    pub yield_supported: bool,

    /// Skip compile-time evaluation of constant sub-trees
    #[arg(long, global = true)]
    pub disable_inline: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate logic against data and print the result
    Run {
        /// Logic as JSON text, or @path to a JSON file
        #[arg(long)]
        logic: String,

        /// Data as JSON text, or @path to a JSON file
        #[arg(long, default_value = "{}")]
        data: String,

        /// Compile first instead of interpreting
        #[arg(long)]
        compiled: bool,
    },

    /// Compile logic and report how it was classified
    Build {
        /// Logic as JSON text, or @path to a JSON file
        #[arg(long)]
        logic: String,
    },

    /// Invoke a compiled program many times concurrently
    Bench {
        /// Logic as JSON text, or @path to a JSON file
        #[arg(long)]
        logic: String,

        /// Data as JSON text, or @path to a JSON file
        #[arg(long, default_value = "{}")]
        data: String,

        /// Total number of invocations
        #[arg(long, default_value = "10000")]
        invocations: usize,

        /// Number of concurrent tokio tasks
        #[arg(long, default_value = "100")]
        concurrency: usize,
    },

    /// Print the effective engine options as TOML
    Config,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with explicit arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Flags only ever switch options on; absent flags defer to file and env
    let options = EngineOptions::builder()
        .config_path(cli.config)
        .yield_supported(cli.yield_supported.then_some(true))
        .disable_inline(cli.disable_inline.then_some(true))
        .build()
        .context("Failed to load engine options")?;

    match cli.command {
        Commands::Run { logic, data, compiled } => {
            let engine = Engine::with_builtins(options);
            let logic = read_json(&logic).context("Invalid --logic")?;
            let data = read_json(&data).context("Invalid --data")?;

            let result = if compiled {
                engine.build(&logic, BuildOptions::default())?.call(data).await?
            } else {
                engine.run(&logic, data, RunOptions::default()).await?
            };

            match &result {
                Evaluation::Done(value) => println!("{}", serde_json::to_string_pretty(value)?),
                Evaluation::Suspended(suspension) => {
                    eprintln!(
                        "Suspended at {} point(s); resume by supplying a value per id",
                        suspension.points().len()
                    );
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
            }
        }

        Commands::Build { logic } => {
            let engine = Engine::with_builtins(options);
            let logic = read_json(&logic).context("Invalid --logic")?;
            let program = engine.build(&logic, BuildOptions::default())?;

            println!("Fingerprint: {}", program.fingerprint());
            println!("Kind: {}", program.kind());
            println!("Stateful: {}", program.program().is_stateful());
            println!("Pooled: {}", program.is_pooled());
        }

        Commands::Bench {
            logic,
            data,
            invocations,
            concurrency,
        } => {
            let engine = Engine::with_builtins(options);
            let logic = read_json(&logic).context("Invalid --logic")?;
            let data = read_json(&data).context("Invalid --data")?;
            bench(&engine, &logic, data, invocations, concurrency.max(1)).await?;
        }

        Commands::Config => {
            print!("{}", toml::to_string_pretty(&options)?);
        }
    }

    Ok(())
}

/// Parse `arg` as JSON, or the file it names when prefixed with `@`
fn read_json(arg: &str) -> Result<Value> {
    match arg.strip_prefix('@') {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))?;
            serde_json::from_str(&text).with_context(|| format!("{path} is not valid JSON"))
        }
        None => serde_json::from_str(arg).context("Not valid JSON"),
    }
}

async fn bench(engine: &Engine, logic: &Value, data: Value, invocations: usize, concurrency: usize) -> Result<()> {
    let program = Arc::new(engine.build(logic, BuildOptions::default())?);

    println!("Program {} ({}, pooled: {})", program.fingerprint(), program.kind(), program.is_pooled());
    println!("   Invocations: {}", invocations);
    println!("   Concurrency: {}", concurrency);

    let next = Arc::new(AtomicUsize::new(0));
    let suspended = Arc::new(AtomicUsize::new(0));
    let started = Instant::now();

    let mut workers = Vec::with_capacity(concurrency);
    for _ in 0..concurrency {
        let program = program.clone();
        let data = data.clone();
        let next = next.clone();
        let suspended = suspended.clone();
        workers.push(tokio::spawn(async move {
            while next.fetch_add(1, Ordering::Relaxed) < invocations {
                if program.call(data.clone()).await?.is_suspended() {
                    suspended.fetch_add(1, Ordering::Relaxed);
                }
            }
            Ok::<(), crate::EngineError>(())
        }));
    }

    for worker in workers {
        worker.await.context("Benchmark worker panicked")??;
    }

    let elapsed = started.elapsed();
    let per_sec = invocations as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    println!("Completed in {:.2?} ({:.0} invocations/sec)", elapsed, per_sec);
    if suspended.load(Ordering::Relaxed) > 0 {
        println!("   Suspended: {}", suspended.load(Ordering::Relaxed));
    }
    if let Some(pool) = program.pool() {
        println!("   Pool instances idle: {}", pool.idle());
    }

    Ok(())
}
