//! Server configuration
//!
//! Settings come from environment variables with CLI flags taking
//! precedence. `TMP_JOB_LOGS_DIR` and `PLUGINS_DIR` are required; resource
//! limits default to 80% of the host CPUs and 8 GB of memory.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use sepex_core::ResourceLimits;
use thiserror::Error;
use tracing::warn;

const DEFAULT_MAX_MEMORY_MB: u64 = 8192;
const DEFAULT_PORT: u16 = 5050;
const DEFAULT_LOG_RETENTION_SECS: u64 = 3600;
const DEFAULT_REMOTE_POLL_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("env variable {0} not set")]
    MissingEnv(&'static str),

    #[error("invalid value for {0}: '{1}'")]
    InvalidValue(&'static str, String),
}

/// Command-line flags; each overrides the matching environment variable.
#[derive(Debug, Parser, Default)]
#[command(name = "sepex", about = "OGC API Processes server", version)]
pub struct Cli {
    /// Maximum CPUs available to local jobs (MAX_LOCAL_CPUS)
    #[arg(long)]
    pub max_local_cpus: Option<f64>,

    /// Maximum memory in MB available to local jobs (MAX_LOCAL_MEMORY)
    #[arg(long)]
    pub max_local_memory: Option<u64>,

    /// Directory for temporary job log files (TMP_JOB_LOGS_DIR)
    #[arg(long)]
    pub logs_dir: Option<PathBuf>,

    /// Directory containing process definitions (PLUGINS_DIR)
    #[arg(long)]
    pub plugins_dir: Option<PathBuf>,

    /// Address to bind (SEPEX_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind (SEPEX_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Log level: error, warn, info, debug, trace (LOG_LEVEL)
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_name: String,
    pub repo_url: String,
    pub logs_dir: PathBuf,
    pub plugins_dir: PathBuf,
    pub storage_root: PathBuf,
    pub metadata_prefix: String,
    pub results_prefix: String,
    pub log_level: String,
    pub host: String,
    pub port: u16,
    pub resource_limits: ResourceLimits,
    pub log_retention: Duration,
    pub remote_poll_interval: Duration,
}

fn env_string(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env_string(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
    }
}

impl AppConfig {
    /// Resolve the configuration from CLI flags and the environment.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let api_name = env_string("API_NAME").unwrap_or_else(|| {
            warn!("env variable API_NAME not set");
            "sepex".to_string()
        });
        let repo_url = env_string("REPO_URL").unwrap_or_else(|| {
            warn!("env variable REPO_URL not set");
            String::new()
        });

        let logs_dir = cli
            .logs_dir
            .clone()
            .or_else(|| env_string("TMP_JOB_LOGS_DIR").map(PathBuf::from))
            .ok_or(ConfigError::MissingEnv("TMP_JOB_LOGS_DIR"))?;
        let plugins_dir = cli
            .plugins_dir
            .clone()
            .or_else(|| env_string("PLUGINS_DIR").map(PathBuf::from))
            .ok_or(ConfigError::MissingEnv("PLUGINS_DIR"))?;
        let storage_root = env_string("STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("storage"));

        let metadata_prefix =
            env_string("STORAGE_METADATA_PREFIX").unwrap_or_else(|| "metadata".to_string());
        let results_prefix =
            env_string("STORAGE_RESULTS_PREFIX").unwrap_or_else(|| "results".to_string());

        let log_level = cli
            .log_level
            .clone()
            .or_else(|| env_string("LOG_LEVEL"))
            .unwrap_or_else(|| "info".to_string());

        let host = cli
            .host
            .clone()
            .or_else(|| env_string("SEPEX_HOST"))
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let port = match cli.port {
            Some(port) => port,
            None => env_parsed::<u16>("SEPEX_PORT")?.unwrap_or(DEFAULT_PORT),
        };

        let resource_limits = resolve_resource_limits(cli)?;

        let log_retention = Duration::from_secs(
            env_parsed::<u64>("SEPEX_LOG_RETENTION_SECS")?.unwrap_or(DEFAULT_LOG_RETENTION_SECS),
        );
        let remote_poll_interval = Duration::from_secs(
            env_parsed::<u64>("SEPEX_REMOTE_POLL_SECS")?.unwrap_or(DEFAULT_REMOTE_POLL_SECS),
        );

        Ok(Self {
            api_name,
            repo_url,
            logs_dir,
            plugins_dir,
            storage_root,
            metadata_prefix,
            results_prefix,
            log_level,
            host,
            port,
            resource_limits,
            log_retention,
            remote_poll_interval,
        })
    }
}

/// Resource limits: CLI over env over defaults. Invalid env values fall back
/// to the default with a warning, so a typo does not take the server down.
fn resolve_resource_limits(cli: &Cli) -> Result<ResourceLimits, ConfigError> {
    let default_cpus = num_cpus::get() as f64 * 0.8;

    let max_cpus = cli.max_local_cpus.unwrap_or_else(|| {
        match env_parsed::<f64>("MAX_LOCAL_CPUS") {
            Ok(Some(value)) => value,
            Ok(None) => default_cpus,
            Err(_) => {
                warn!("invalid MAX_LOCAL_CPUS value, using default {default_cpus:.2}");
                default_cpus
            }
        }
    });

    let max_memory_mb = cli.max_local_memory.unwrap_or_else(|| {
        match env_parsed::<u64>("MAX_LOCAL_MEMORY") {
            Ok(Some(value)) => value,
            Ok(None) => DEFAULT_MAX_MEMORY_MB,
            Err(_) => {
                warn!(
                    "invalid MAX_LOCAL_MEMORY value, using default {DEFAULT_MAX_MEMORY_MB}"
                );
                DEFAULT_MAX_MEMORY_MB
            }
        }
    });

    if max_cpus <= 0.0 {
        return Err(ConfigError::InvalidValue(
            "MAX_LOCAL_CPUS",
            max_cpus.to_string(),
        ));
    }

    Ok(ResourceLimits {
        max_cpus,
        max_memory_mb,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            logs_dir: Some(PathBuf::from("/tmp/sepex-logs")),
            plugins_dir: Some(PathBuf::from("/tmp/sepex-plugins")),
            ..Default::default()
        }
    }

    #[test]
    fn required_settings_are_enforced() {
        let cli = Cli::default();
        // Neither flag nor env set for the logs dir.
        std::env::remove_var("TMP_JOB_LOGS_DIR");
        let err = AppConfig::load(&cli).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv("TMP_JOB_LOGS_DIR")));
    }

    #[test]
    fn cli_flags_override_environment() {
        let mut cli = base_cli();
        cli.max_local_cpus = Some(2.5);
        cli.max_local_memory = Some(1024);
        cli.port = Some(9999);

        std::env::set_var("MAX_LOCAL_CPUS", "7.0");
        let config = AppConfig::load(&cli).unwrap();
        std::env::remove_var("MAX_LOCAL_CPUS");

        assert_eq!(config.resource_limits.max_cpus, 2.5);
        assert_eq!(config.resource_limits.max_memory_mb, 1024);
        assert_eq!(config.port, 9999);
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cli = base_cli();
        let config = AppConfig::load(&cli).unwrap();

        assert!(config.resource_limits.max_cpus > 0.0);
        assert_eq!(config.resource_limits.max_memory_mb, 8192);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.metadata_prefix, "metadata");
        assert_eq!(config.log_retention, Duration::from_secs(3600));
    }

    #[test]
    fn zero_cpu_limit_is_rejected() {
        let mut cli = base_cli();
        cli.max_local_cpus = Some(0.0);
        assert!(matches!(
            AppConfig::load(&cli),
            Err(ConfigError::InvalidValue("MAX_LOCAL_CPUS", _))
        ));
    }
}
