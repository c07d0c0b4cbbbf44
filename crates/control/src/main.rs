//! `pictl` — configuration and catalog diagnostics for the Pi control plane.
//!
//! The serving runtime is embedded by a host process that supplies the
//! worker transport (see [`pi_control::ControlPlane`]); this binary covers
//! the operator-facing checks that need no transport.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pi_catalog::ProviderCatalog;
use pi_domain::config::{Config, ConfigSeverity};

#[derive(Parser)]
#[command(name = "pictl", about = "Pi control-plane diagnostics", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "pi.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate the configuration file and report every issue.
    Validate,
    /// Print the effective configuration (defaults applied).
    Show,
    /// Print the built-in provider catalog.
    Catalog,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Validate => {
            let issues = config.validate();
            if issues.is_empty() {
                println!("configuration OK");
                return Ok(());
            }
            for issue in &issues {
                println!("{issue}");
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Show => {
            let rendered = toml::to_string_pretty(&config)?;
            println!("{rendered}");
            Ok(())
        }
        Command::Catalog => {
            let catalog = ProviderCatalog::builtin();
            for id in catalog.fallback_order() {
                let d = catalog.get(id).expect("catalog covers its own order");
                println!(
                    "{:<10} default={:<26} quality={:<3} latency={}ms window={} in=${}/1k out=${}/1k",
                    d.id.to_string(),
                    d.default_model,
                    d.quality_score,
                    d.default_latency_ms,
                    d.context_window,
                    d.input_price_per_1k,
                    d.output_price_per_1k,
                );
            }
            Ok(())
        }
    }
}
