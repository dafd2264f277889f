//! Portcullis gateway policy engine demo CLI
//!
//! Runs one or all of the demo scenarios. Each scenario wires real
//! Portcullis components (compiler, composites, resilience steps, policy
//! service, audit ledger) to simulated backends.
//!
//! Usage:
//!   cargo run -p demo -- run-all
//!   cargo run -p demo -- composites
//!   cargo run -p demo -- quota
//!   cargo run -p demo -- circuit-breaker
//!   cargo run -p demo -- routing
//!   cargo run -p demo -- policy-file [PATH]

mod scenarios;
mod steps;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use portcullis_contracts::error::GatewayResult;

use scenarios::{circuit, composites, policy_file, quota, routing};

// ── CLI definition ────────────────────────────────────────────────────────────

/// Portcullis: composable gateway policy engine demo.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "Portcullis gateway policy engine demo",
    long_about = "Runs Portcullis demo scenarios showing composite control flow,\n\
                  compensating rollback, quotas, circuit breaking, failover routing\n\
                  and audit chain integrity."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every scenario in sequence.
    RunAll,
    /// Scenario 1: AND / OR / XOR with rollback.
    Composites,
    /// Scenario 2: per-requester throughput quota.
    Quota,
    /// Scenario 3: failure and latency circuits.
    CircuitBreaker,
    /// Scenario 4: sticky, round-robin and ordered failover.
    Routing,
    /// Scenario 5: load, publish and run a TOML policy document.
    PolicyFile {
        /// Policy file to load instead of the bundled one.
        path: Option<PathBuf>,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set RUST_LOG=debug for per-step output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    print_banner();

    let result = match cli.command {
        Command::RunAll => run_all(),
        Command::Composites => composites::run_scenario(),
        Command::Quota => quota::run_scenario(),
        Command::CircuitBreaker => circuit::run_scenario(),
        Command::Routing => routing::run_scenario(),
        Command::PolicyFile { path } => policy_file::run_scenario(path.as_deref()),
    };

    match result {
        Ok(()) => println!("All selected scenarios completed successfully."),
        Err(e) => {
            eprintln!("Demo error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_all() -> GatewayResult<()> {
    composites::run_scenario()?;
    quota::run_scenario()?;
    circuit::run_scenario()?;
    routing::run_scenario()?;
    policy_file::run_scenario(None)?;
    Ok(())
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("Portcullis — Gateway Policy Engine");
    println!("==================================");
    println!();
    println!("Per request:");
    println!("  [1] Pin the live compiled policy version");
    println!("  [2] Evaluate the assertion tree (AND / OR / XOR, catalog steps)");
    println!("  [3] Commit side effects on success, roll them back otherwise");
    println!("  [4] Append the request's audit trail to the SHA-256 ledger");
    println!();
}
