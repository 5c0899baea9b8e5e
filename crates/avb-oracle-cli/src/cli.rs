// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Argument parsing and subcommand dispatch.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use avb_oracle_core::{graph, render, Orchestrator, RunPolicy, State, TestPlan, Topology};
use avb_rig_config::{ConfigService, FsConfigStore};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::dry_run::DryRunRig;
use crate::report::{summary_table, write_startup, write_step, PredictionDoc, StepDoc};

/// Top-level arguments.
#[derive(Parser)]
#[command(name = "avb-oracle")]
#[command(about = "Predict what an AVB daisy-chain rig will print, without the rig")]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run a plan against a dry rig and print every command and prediction
    Predict {
        /// Path to the rig description
        #[arg(long)]
        config: PathBuf,
        /// Path to the test plan
        #[arg(long)]
        test: PathBuf,
        /// User whose ids are used for every participant
        #[arg(long, default_value = "ci")]
        user: String,
        /// Override the plan's random seed
        #[arg(long)]
        seed: Option<u64>,
        /// Abort on the first unconfirmed step
        #[arg(long)]
        stop_on_error: bool,
        /// Predict analyzer configuration, PTP roles and MAAP reservations first
        #[arg(long)]
        startup: bool,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Parse a plan and report how many steps it resolves to
    Check {
        /// Path to the test plan
        #[arg(long)]
        test: PathBuf,
        /// Override the plan's random seed
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Print the relay-aware path between two rig nodes
    Path {
        /// Path to the rig description
        #[arg(long)]
        config: PathBuf,
        /// User whose ids are used for every participant
        #[arg(long, default_value = "ci")]
        user: String,
        /// Start node
        from: String,
        /// End node
        to: String,
    },
}

fn load_rig(path: &Path, user: &str) -> Result<Arc<Topology>> {
    let (store, key) = FsConfigStore::for_file(path)?;
    ConfigService::new(store)
        .load_rig(&key, user)
        .with_context(|| format!("failed to load rig {}", path.display()))
}

fn load_plan(path: &Path) -> Result<TestPlan> {
    let (store, key) = FsConfigStore::for_file(path)?;
    ConfigService::new(store)
        .load_plan(&key)
        .with_context(|| format!("failed to load plan {}", path.display()))
}

struct PredictArgs {
    config: PathBuf,
    test: PathBuf,
    user: String,
    seed: Option<u64>,
    stop_on_error: bool,
    startup: bool,
    json: bool,
}

fn predict<W: Write>(out: &mut W, args: &PredictArgs) -> Result<()> {
    let topology = load_rig(&args.config, &args.user)?;
    let plan = load_plan(&args.test)?;
    let seed = plan.effective_seed(args.seed);
    let steps = plan
        .resolve(args.seed)
        .with_context(|| format!("invalid plan {}", args.test.display()))?;
    info!(steps = steps.len(), seed, "plan resolved");

    let names = topology.endpoint_names();
    let mut oracle = Orchestrator::new(
        topology,
        RunPolicy {
            stop_on_error: args.stop_on_error,
        },
    );
    let mut rig = DryRunRig::new();
    let startup = if args.startup {
        Some(oracle.startup(&mut rig)?)
    } else {
        None
    };
    let reports = oracle.run(&mut rig, &steps)?;
    info!(sent = rig.sent(), expects = rig.expects(), "dry run finished");
    let state = render::draw_state(oracle.current(), &names);

    if args.json {
        let doc = PredictionDoc {
            seed,
            startup: startup.as_ref().map(|plan| plan.emissions.as_slice()),
            checkpoints: oracle.checkpoints(),
            steps: reports.iter().map(StepDoc::from).collect(),
            armed: rig.watches().iter().collect(),
            state,
        };
        serde_json::to_writer_pretty(&mut *out, &doc)?;
        writeln!(out)?;
        return Ok(());
    }

    if let Some(plan) = &startup {
        write_startup(out, plan)?;
    }
    for report in &reports {
        write_step(out, report)?;
    }
    writeln!(out)?;
    for line in &state {
        writeln!(out, "{line}")?;
    }
    for watch in rig.watches().iter() {
        writeln!(out, "armed {}: /{}/", watch.source, watch.pattern)?;
    }
    writeln!(out, "{}", summary_table(&reports))?;
    writeln!(
        out,
        "{} steps, {} checkpoints, seed {seed}",
        reports.len(),
        oracle.checkpoints()
    )?;
    Ok(())
}

fn check<W: Write>(out: &mut W, test: &Path, seed: Option<u64>) -> Result<()> {
    let plan = load_plan(test)?;
    let steps = plan
        .resolve(seed)
        .with_context(|| format!("invalid plan {}", test.display()))?;
    let checkpoints = steps.iter().filter(|s| s.checkpoint).count();
    writeln!(
        out,
        "ok: {} steps, {checkpoints} checkpoints, seed {}",
        steps.len(),
        plan.effective_seed(seed)
    )?;
    Ok(())
}

fn path<W: Write>(out: &mut W, config: &Path, user: &str, from: &str, to: &str) -> Result<()> {
    let topology = load_rig(config, user)?;
    let state = State::new(topology);
    let Some(route) = graph::find_path(&state, from, to) else {
        bail!("no path from '{from}' to '{to}'");
    };
    writeln!(out, "{}", route.join(" -> "))?;
    Ok(())
}

/// Parses arguments, installs logging and runs the subcommand.
pub fn entrypoint() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(io::stderr)
        .init();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match cli.command {
        Commands::Predict {
            config,
            test,
            user,
            seed,
            stop_on_error,
            startup,
            json,
        } => predict(
            &mut out,
            &PredictArgs {
                config,
                test,
                user,
                seed,
                stop_on_error,
                startup,
                json,
            },
        ),
        Commands::Check { test, seed } => check(&mut out, &test, seed),
        Commands::Path {
            config,
            user,
            from,
            to,
        } => path(&mut out, &config, &user, &from, &to),
    }
}
