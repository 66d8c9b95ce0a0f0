//! Configuration loading shared by every stage binary
//!
//! Priority order for each setting:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (clap `env` fallback)
//! 3. TOML config file
//! 4. Compiled default
//!
//! A missing or unparseable TOML file is not fatal: a warning is logged and
//! the remaining sources still apply. Settings without a default (project id,
//! filestore endpoint, ...) fail resolution with `Error::Config`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::auth::{StaticTokenSource, TokenSource};
use crate::broker::{PubSubBroker, PubSubConfig, DEFAULT_PUBSUB_ENDPOINT};
use crate::store::{S3Config, S3ObjectStore};
use crate::{Error, Result};

/// Time a subscriber has to acknowledge before the broker redelivers
pub const ACK_DEADLINE: Duration = Duration::from_secs(60);
/// Local objects older than this are removed by the receiver's sweep
pub const RETENTION_WINDOW: Duration = Duration::from_secs(5 * 60);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Labels requested per image
pub const MAX_LABELS: usize = 3;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_IMAGE_TOPIC: &str = "images";
pub const DEFAULT_LABELED_TOPIC: &str = "labeled";
pub const DEFAULT_PURGE_TOPIC: &str = "purge";
pub const DEFAULT_TARGET_LABEL: &str = "cat";
pub const DEFAULT_BODY_LIMIT: usize = 32 * 1024 * 1024;

/// Optional settings file (`config.toml`)
///
/// Every key is optional; keys a stage does not use are ignored.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TomlConfig {
    pub project_id: Option<String>,
    pub filestore: Option<String>,
    pub pubsub_endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub access_token: Option<String>,
    pub port: Option<u16>,

    pub bucket: Option<String>,
    pub body_limit: Option<usize>,
    pub image_topic: Option<String>,
    pub labeled_topic: Option<String>,
    pub purge_topic: Option<String>,
    pub subscription: Option<String>,
    pub target_label: Option<String>,
    pub delete_subscription_on_stop: Option<bool>,
    pub purge_after_archive: Option<bool>,

    pub archive_bucket: Option<String>,
    pub archive_endpoint: Option<String>,
    pub archive_access_key_id: Option<String>,
    pub archive_secret_access_key: Option<String>,

    pub vision_endpoint: Option<String>,
}

/// `<config_dir>/sift/config.toml`, if the platform has a config directory
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sift").join("config.toml"))
}

/// Load the TOML file at `path`, or at [`default_config_path`] when `None`
///
/// Never fails: problems are logged and yield an empty config.
pub fn load_toml_config(path: Option<&Path>) -> TomlConfig {
    let path = match path.map(Path::to_path_buf).or_else(default_config_path) {
        Some(path) => path,
        None => {
            warn!("Could not determine config directory, using defaults");
            return TomlConfig::default();
        }
    };

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Config file not readable, using defaults");
            return TomlConfig::default();
        }
    };

    match toml::from_str::<TomlConfig>(&content) {
        Ok(config) => {
            debug!(path = %path.display(), "Loaded config file");
            config
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Config file not parseable, using defaults");
            TomlConfig::default()
        }
    }
}

/// First of `cli` (CLI or env) and `file`, else `default`
pub fn pick<T>(cli: Option<T>, file: Option<T>, default: T) -> T {
    cli.or(file).unwrap_or(default)
}

/// First of `cli` (CLI or env) and `file`; `Error::Config` naming `name` if neither
pub fn required(name: &str, cli: Option<String>, file: Option<String>) -> Result<String> {
    cli.or(file)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| Error::Config(format!("{} must be set", name)))
}

/// Arguments shared by every stage binary, flattened into each `Args`
#[derive(Debug, Clone, Default, clap::Args)]
pub struct CommonArgs {
    /// Path to TOML config file
    #[arg(long, env = "SIFT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Project hosting the topics and subscriptions
    #[arg(long, env = "SIFT_PROJECT_ID")]
    pub project_id: Option<String>,

    /// Local object store endpoint (host:port or URL)
    #[arg(long, env = "SIFT_FILESTORE")]
    pub filestore: Option<String>,

    /// Pub/Sub REST endpoint
    #[arg(long, env = "SIFT_PUBSUB_ENDPOINT")]
    pub pubsub_endpoint: Option<String>,

    /// Object store region
    #[arg(long, env = "SIFT_REGION")]
    pub region: Option<String>,

    #[arg(long, env = "MINIO_ACCESSKEYID", hide_env_values = true)]
    pub access_key_id: Option<String>,

    #[arg(long, env = "MINIO_SECRETKEY", hide_env_values = true)]
    pub secret_access_key: Option<String>,

    /// Bearer token for Pub/Sub and Vision; omit for emulators
    #[arg(long, env = "SIFT_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// HTTP port for health checks (and uploads on the receiver)
    #[arg(short, long, env = "SIFT_PORT")]
    pub port: Option<u16>,

    /// Log level when RUST_LOG is unset
    #[arg(long, env = "SIFT_LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,
}

/// Resolved settings shared by every stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonSettings {
    pub project_id: String,
    pub filestore: String,
    pub pubsub_endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub access_token: Option<String>,
    pub port: u16,
}

impl CommonArgs {
    /// Load the TOML file named by `--config` (or the default path)
    pub fn load_file(&self) -> TomlConfig {
        load_toml_config(self.config.as_deref())
    }

    pub fn resolve(&self, file: &TomlConfig) -> Result<CommonSettings> {
        Ok(CommonSettings {
            project_id: required(
                "project id (--project-id / SIFT_PROJECT_ID)",
                self.project_id.clone(),
                file.project_id.clone(),
            )?,
            filestore: required(
                "filestore endpoint (--filestore / SIFT_FILESTORE)",
                self.filestore.clone(),
                file.filestore.clone(),
            )?,
            pubsub_endpoint: pick(
                self.pubsub_endpoint.clone(),
                file.pubsub_endpoint.clone(),
                DEFAULT_PUBSUB_ENDPOINT.to_string(),
            ),
            region: pick(
                self.region.clone(),
                file.region.clone(),
                DEFAULT_REGION.to_string(),
            ),
            access_key_id: pick(
                self.access_key_id.clone(),
                file.access_key_id.clone(),
                String::new(),
            ),
            secret_access_key: pick(
                self.secret_access_key.clone(),
                file.secret_access_key.clone(),
                String::new(),
            ),
            access_token: self
                .access_token
                .clone()
                .or_else(|| file.access_token.clone())
                .filter(|token| !token.is_empty()),
            port: pick(self.port, file.port, DEFAULT_PORT),
        })
    }
}

impl CommonSettings {
    pub fn token_source(&self) -> Arc<dyn TokenSource> {
        Arc::new(StaticTokenSource::new(self.access_token.clone()))
    }

    pub fn broker(&self) -> Result<PubSubBroker> {
        PubSubBroker::new(
            PubSubConfig::new(&self.pubsub_endpoint, &self.project_id),
            self.token_source(),
        )
    }

    /// Client for the transient local store
    pub fn local_store(&self) -> S3ObjectStore {
        S3ObjectStore::new(S3Config::new(
            Some(self.filestore.clone()),
            &self.region,
            &self.access_key_id,
            &self.secret_access_key,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_prefers_cli_then_file() {
        assert_eq!(pick(Some(1), Some(2), 3), 1);
        assert_eq!(pick(None, Some(2), 3), 2);
        assert_eq!(pick(None, None, 3), 3);
    }

    #[test]
    fn required_rejects_missing_and_empty() {
        assert!(matches!(required("x", None, None), Err(Error::Config(_))));
        assert!(matches!(
            required("x", Some(String::new()), None),
            Err(Error::Config(_))
        ));
        assert_eq!(required("x", None, Some("f".into())).unwrap(), "f");
    }

    #[test]
    fn resolve_fills_defaults() {
        let args = CommonArgs {
            project_id: Some("demo".into()),
            filestore: Some("minio:9000".into()),
            ..CommonArgs::default()
        };
        let settings = args.resolve(&TomlConfig::default()).unwrap();
        assert_eq!(settings.pubsub_endpoint, DEFAULT_PUBSUB_ENDPOINT);
        assert_eq!(settings.region, "us-east-1");
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.access_token, None);
    }

    #[test]
    fn resolve_without_project_fails() {
        let args = CommonArgs {
            filestore: Some("minio:9000".into()),
            ..CommonArgs::default()
        };
        let err = args.resolve(&TomlConfig::default()).unwrap_err();
        assert!(err.to_string().contains("project id"));
    }
}
