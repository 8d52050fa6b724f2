//! Sentinel CLI - operator commands for the safety gate

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sentinel_core::{diff_config, InputBundle, SafetyGate, SearchConfig, SentinelConfig, SignedConfig};

#[derive(Parser)]
#[command(name = "sentinel")]
#[command(about = "Sentinel - safety-governance decision gate")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "sentinel.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Gate one input given as JSON, or `@path` to a JSON file
    Check { input: String },
    /// Verify the ledger, run the challenge bank and hash the policy
    Health,
    /// Verify every ledger file
    Verify,
    /// Report influence drift against the hour ending N hours ago
    Drift {
        #[arg(long, default_value_t = 24)]
        hours: u32,
        #[arg(long, default_value_t = 3)]
        top: usize,
    },
    /// Search for a better policy starting from the active one
    Evolve {
        #[arg(long)]
        rounds: Option<usize>,
        #[arg(long)]
        beam: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        /// Activate the result
        #[arg(long)]
        apply: bool,
    },
    /// Restore the policy recorded at an RFC 3339 ledger timestamp
    Rollback { ts: String },
    /// Replay a recorded decision with each agent ablated
    Why { ts: String },
    /// Print the running configuration sealed with the ledger key
    SignConfig,
    /// Check a sealed configuration written by `sign-config`
    VerifyConfig { path: PathBuf },
    /// List settings that differ between two TOML configurations
    DiffConfig { old: PathBuf, new: PathBuf },
}

fn load_config(path: &Path) -> anyhow::Result<SentinelConfig> {
    if path.exists() {
        SentinelConfig::load(path).with_context(|| format!("loading {}", path.display()))
    } else {
        info!(path = %path.display(), "config not found, using defaults");
        Ok(SentinelConfig::default())
    }
}

fn parse_ts(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp '{raw}'"))?
        .with_timezone(&Utc))
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli.config)?;
    let gate = SafetyGate::open(config)?;

    match cli.command {
        Commands::Check { input } => {
            let raw = match input.strip_prefix('@') {
                Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?,
                None => input,
            };
            let input: InputBundle = serde_json::from_str(&raw).context("parsing input bundle")?;
            let outcome = gate.check_recorded(input).await?;
            print_json(&serde_json::json!({
                "decision": outcome.bundle.decision,
                "ts": outcome.record.as_ref().map(|r| r.ts),
                "virtue_distance": gate.virtue_distance(&outcome.bundle),
                "bundle": outcome.bundle,
            }))?;
        }
        Commands::Health => {
            let health = gate.health_check().await?;
            print_json(&health)?;
            if !health.is_healthy() {
                bail!("health check failed");
            }
        }
        Commands::Verify => {
            let verification = gate.verify_ledger()?;
            print_json(&verification)?;
            if !verification.ok {
                bail!("{} ledger record(s) failed verification", verification.bad_records());
            }
        }
        Commands::Drift { hours, top } => {
            print_json(&gate.drift_report(hours, top))?;
        }
        Commands::Evolve {
            rounds,
            beam,
            seed,
            apply,
        } => {
            let defaults = gate.config().evolution.search.clone();
            let search = SearchConfig {
                rounds: rounds.unwrap_or(defaults.rounds),
                beam: beam.unwrap_or(defaults.beam),
                seed: seed.unwrap_or(defaults.seed),
                ..defaults
            };
            let outcome = gate.evolve(None, search)?;
            print_json(&outcome)?;
            if apply {
                gate.activate_policy(outcome.best.genes)?;
                info!(genes = ?outcome.best.genes, "policy activated");
            }
        }
        Commands::Rollback { ts } => {
            let genes = gate.rollback(parse_ts(&ts)?)?;
            print_json(&genes)?;
        }
        Commands::Why { ts } => {
            let ts = parse_ts(&ts)?;
            let Some(snapshot) = gate.snapshot_at(ts) else {
                bail!("no snapshot recorded at {ts}");
            };
            print_json(&gate.counterfactuals(&snapshot.bundle).await)?;
        }
        Commands::SignConfig => {
            print_json(&gate.sign_config()?)?;
        }
        Commands::VerifyConfig { path } => {
            let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
            let signed: SignedConfig = serde_json::from_str(&raw).context("parsing signed config")?;
            if !gate.verify_config(&signed) {
                bail!("signature check failed for {}", path.display());
            }
            info!(key_id = %signed.seal.key_id, "config signature valid");
        }
        Commands::DiffConfig { old, new } => {
            let old = SentinelConfig::load(&old).with_context(|| format!("loading {}", old.display()))?;
            let new = SentinelConfig::load(&new).with_context(|| format!("loading {}", new.display()))?;
            print_json(&diff_config(&old, &new)?)?;
        }
    }

    Ok(())
}
