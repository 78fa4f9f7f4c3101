use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facematch::{config, query, DescriptorProvider, EmbeddingProvider, QueryStatus, ReferenceRecord};
use log::{info, warn};

#[derive(Parser)]
#[command(name = "facematch")]
#[command(
    version,
    about = "Face identity lookup against a precomputed embedding database"
)]
struct Cli {
    /// Config file (defaults to the compiled-in location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank enrolled identities against a probe descriptor
    Match {
        /// JSON descriptor produced by the embedding model
        #[arg(short, long)]
        probe: PathBuf,
        /// Number of matches to return (defaults to config `top_k`)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Reference collection (defaults to config `reference_path`)
        #[arg(short, long)]
        reference: Option<PathBuf>,
        /// Print status and skip counters along with the matches
        #[arg(long)]
        report: bool,
    },
    /// Append an identity to the reference collection
    Enroll {
        /// Identity key, usually the database folder name
        #[arg(short, long)]
        key: String,
        /// JSON descriptor produced by the embedding model
        #[arg(short, long)]
        probe: PathBuf,
        /// Reference collection (defaults to config `reference_path`)
        #[arg(short, long)]
        reference: Option<PathBuf>,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<ExitCode> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    run(cli, &editor)
}

fn run(cli: Cli, editor: &str) -> Result<ExitCode> {
    let config_path = cli.config.as_deref();

    // Loaded per command so `config` can still open a file that fails
    // validation.
    match cli.command {
        Commands::Match {
            probe,
            top_k,
            reference,
            report,
        } => {
            let mut cfg = config::load_config(config_path)?;
            if let Some(reference) = reference {
                cfg.reference_path = reference;
            }
            let k = top_k.unwrap_or(cfg.top_k);
            run_match(&cfg, &probe, k, report)
        }
        Commands::Enroll {
            key,
            probe,
            reference,
        } => {
            let mut cfg = config::load_config(config_path)?;
            if let Some(reference) = reference {
                cfg.reference_path = reference;
            }
            enroll(&cfg, &key, &probe)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config => {
            open_config(config_path, editor)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_match(cfg: &config::Config, probe: &Path, k: usize, report: bool) -> Result<ExitCode> {
    let raw = std::fs::read(probe).with_context(|| format!("reading probe {}", probe.display()))?;
    info!("Loaded probe from {}", probe.display());

    let store = cfg.reference_store();
    let result = query::run_query(
        &mut DescriptorProvider,
        &raw,
        &store,
        &cfg.image_layout(),
        k,
    )
    .with_context(|| format!("matching against {}", store.path().display()))?;

    let out = if report {
        serde_json::to_string(&result)?
    } else {
        serde_json::to_string(&result.matches)?
    };
    println!("{}", out);

    match result.status {
        QueryStatus::Matched | QueryStatus::NoMatches => Ok(ExitCode::SUCCESS),
        QueryStatus::NoFace | QueryStatus::InvalidProbe => Ok(ExitCode::from(2)),
    }
}

fn enroll(cfg: &config::Config, key: &str, probe: &Path) -> Result<()> {
    info!("Enrolling identity: {}", key);

    let raw = std::fs::read(probe).with_context(|| format!("reading probe {}", probe.display()))?;
    let embedding = DescriptorProvider
        .produce_embedding(&raw)
        .with_context(|| format!("extracting descriptor from {}", probe.display()))?;

    let store = cfg.reference_store();
    if let Ok(records) = store.records() {
        let duplicate = records
            .filter_map(|r| r.ok())
            .any(|r| r.key == key);
        if duplicate {
            warn!("{} is already enrolled; appending another record", key);
        }
    }

    store
        .append(&ReferenceRecord {
            key: key.to_string(),
            embedding,
        })
        .context("Failed to save face record")?;

    info!("✓ Enrolled {} into {}", key, store.path().display());
    Ok(())
}

fn open_config(path: Option<&Path>, editor: &str) -> Result<()> {
    let config_path = path.unwrap_or(&config::CONFIG_PATH);

    if !config_path.exists() {
        info!("Writing default config to {:?}", config_path);
        config::save_config(&config::Config::default(), Some(config_path))
            .context("Failed to write default config")?;
    }

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_config_opens_invalid_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "top_k = 0\n")?;
        let path = path.to_str().unwrap();

        run(cli(&["facematch", "-c", path, "config"]), "true")?;
        // Left untouched for the user to repair.
        assert_eq!(std::fs::read_to_string(path)?, "top_k = 0\n");

        // Commands that need the config still refuse it.
        let probe = dir.path().join("probe.json");
        std::fs::write(&probe, "[1.0, 0.0]")?;
        let args = ["facematch", "-c", path, "match", "-p", probe.to_str().unwrap()];
        assert!(run(cli(&args), "true").is_err());
        Ok(())
    }

    #[test]
    fn test_config_writes_defaults_when_missing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("etc").join("config.toml");

        run(cli(&["facematch", "-c", path.to_str().unwrap(), "config"]), "true")?;
        assert_eq!(config::load_config(Some(&path))?, config::Config::default());
        Ok(())
    }

    #[test]
    fn test_editor_failure_is_reported() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        let args = ["facematch", "-c", path.to_str().unwrap(), "config"];
        assert!(run(cli(&args), "false").is_err());
        Ok(())
    }
}
