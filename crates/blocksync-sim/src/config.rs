use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// CLI STRUCTS
// ============================================================================

/// blocksync-sim: run the block syncer against in-memory peers.
#[derive(Parser, Debug)]
#[command(name = "blocksync-sim", version = "0.1.0")]
pub struct Cli {
    /// Path to TOML configuration file.
    #[arg(short = 'C', long)]
    pub config: Option<PathBuf>,

    /// Comma-separated chain heights of the source nodes (e.g. 300,1200,950).
    #[arg(short = 's', long, value_delimiter = ',')]
    pub sources: Vec<u64>,

    /// Maximum simulated one-way message latency in milliseconds.
    #[arg(long = "latency-ms")]
    pub latency_ms: Option<u64>,

    /// Give up if the target has not caught up after this many seconds.
    #[arg(long = "timeout-secs")]
    pub timeout_secs: Option<u64>,

    /// Force-sync interval of every node, in seconds.
    #[arg(long = "force-sync-secs")]
    pub force_sync_secs: Option<u64>,

    /// Force-header (handshake refresh) interval of every node, in seconds.
    #[arg(long = "force-header-secs")]
    pub force_header_secs: Option<u64>,

    /// Disconnect and reconnect a random source this often, in seconds.
    #[arg(long = "churn-secs")]
    pub churn_secs: Option<u64>,

    /// Height whose header the target validates with every new peer.
    #[arg(long = "checkpoint")]
    pub checkpoint: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

// ============================================================================
// CONFIG FILE STRUCTS
// ============================================================================

/// Configuration loaded from TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub sources: Vec<u64>,
    pub latency_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub force_sync_secs: Option<u64>,
    pub force_header_secs: Option<u64>,
    pub churn_secs: Option<u64>,
    pub checkpoint: Option<u64>,
    pub serve_concurrency: Option<usize>,
    pub log_level: Option<String>,
}

// ============================================================================
// RUNTIME CONFIG
// ============================================================================

/// Final merged configuration for runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub sources: Vec<u64>,
    pub max_latency: Duration,
    pub timeout: Duration,
    pub force_sync_interval: Duration,
    pub force_header_interval: Duration,
    pub churn_interval: Option<Duration>,
    pub checkpoint: Option<u64>,
    pub serve_concurrency: usize,
    pub log_level: String,
}

impl RuntimeConfig {
    /// Merge CLI args with config file. Precedence: CLI > config file > defaults.
    pub fn from_cli_and_file(cli: &Cli, file: ConfigFile) -> Result<Self, ConfigError> {
        let sources = if !cli.sources.is_empty() {
            cli.sources.clone()
        } else if !file.sources.is_empty() {
            file.sources
        } else {
            vec![300, 1200, 950]
        };

        let best = sources.iter().copied().max().unwrap_or(0);
        if best < 2 {
            return Err(ConfigError::Invalid(format!(
                "the tallest source must be at height 2 or more, got {}",
                best
            )));
        }

        let checkpoint = cli.checkpoint.or(file.checkpoint);
        if let Some(number) = checkpoint {
            if number > best {
                return Err(ConfigError::Invalid(format!(
                    "checkpoint {} is above the tallest source ({})",
                    number, best
                )));
            }
        }

        let max_latency =
            Duration::from_millis(cli.latency_ms.or(file.latency_ms).unwrap_or(40));

        let timeout = Duration::from_secs(cli.timeout_secs.or(file.timeout_secs).unwrap_or(120));

        let force_sync_secs = cli.force_sync_secs.or(file.force_sync_secs).unwrap_or(1);
        let force_header_secs = cli.force_header_secs.or(file.force_header_secs).unwrap_or(15);
        if force_sync_secs == 0 || force_header_secs == 0 {
            return Err(ConfigError::Invalid(
                "force intervals must be at least one second".to_string(),
            ));
        }

        let churn_interval = cli
            .churn_secs
            .or(file.churn_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let serve_concurrency = file.serve_concurrency.unwrap_or(32);

        let log_level = cli
            .log_level
            .clone()
            .or(file.log_level)
            .unwrap_or_else(|| "info".to_string());

        Ok(RuntimeConfig {
            sources,
            max_latency,
            timeout,
            force_sync_interval: Duration::from_secs(force_sync_secs),
            force_header_interval: Duration::from_secs(force_header_secs),
            churn_interval,
            checkpoint,
            serve_concurrency,
            log_level,
        })
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

// ============================================================================
// LOADING FUNCTIONS
// ============================================================================

/// Load TOML config file, returns default if path is None.
pub fn load_config_file(path: Option<&PathBuf>) -> Result<ConfigFile, ConfigError> {
    match path {
        Some(p) => {
            let content = std::fs::read_to_string(p)?;
            toml::from_str(&content).map_err(ConfigError::Toml)
        }
        None => Ok(ConfigFile::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["blocksync-sim"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn defaults_apply() {
        let rc = RuntimeConfig::from_cli_and_file(&cli(&[]), ConfigFile::default()).unwrap();
        assert_eq!(rc.sources, vec![300, 1200, 950]);
        assert_eq!(rc.max_latency, Duration::from_millis(40));
        assert_eq!(rc.force_sync_interval, Duration::from_secs(1));
        assert!(rc.churn_interval.is_none());
        assert_eq!(rc.log_level, "info");
    }

    #[test]
    fn cli_overrides_file() {
        let file: ConfigFile = toml::from_str(
            r#"
            sources = [10, 20]
            latency_ms = 5
            log_level = "debug"
            churn_secs = 3
            "#,
        )
        .unwrap();
        let rc = RuntimeConfig::from_cli_and_file(
            &cli(&["--sources", "50,60", "--log-level", "warn"]),
            file,
        )
        .unwrap();
        assert_eq!(rc.sources, vec![50, 60]);
        assert_eq!(rc.max_latency, Duration::from_millis(5));
        assert_eq!(rc.churn_interval, Some(Duration::from_secs(3)));
        assert_eq!(rc.log_level, "warn");
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        assert!(toml::from_str::<ConfigFile>("mining = true").is_err());
    }

    #[test]
    fn rejects_checkpoint_above_sources() {
        let err = RuntimeConfig::from_cli_and_file(
            &cli(&["--sources", "10", "--checkpoint", "11"]),
            ConfigFile::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_too_short_sources() {
        assert!(RuntimeConfig::from_cli_and_file(
            &cli(&["--sources", "1,0"]),
            ConfigFile::default()
        )
        .is_err());
    }
}
