//! Layered configuration.
//!
//! Later layers override earlier ones:
//!
//! 1. built-in defaults,
//! 2. `config.toml` / `config.yaml` in the platform config directory,
//! 3. a file named on the command line,
//! 4. `VIDSYNC_*` environment variables, with `__` separating nested keys
//!    (`VIDSYNC_DOWNLOADER__MAX_ATTEMPTS=3`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vidsync_risk::ProbePolicy;

pub const ENV_PREFIX: &str = "VIDSYNC_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root under which collection directories live.
    pub output_dir: PathBuf,
    /// Session cookie handed to the downloader.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    pub extra_args: Vec<String>,
    pub vip_strict: bool,
    pub save_cover: bool,
    pub debug: bool,
    pub downloader: DownloaderConfig,
    pub pacing: PacingConfig,
    pub risk: RiskConfig,
    pub source: SourceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    pub program: String,
    pub max_attempts: u32,
    pub retry_step_secs: u64,
    pub retry_cap_secs: u64,
    pub terminate_grace_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub item_cooldown_ms: u64,
    pub failure_cooldown_ms: u64,
    pub size_recheck_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub probe_capacity: usize,
    pub healthy_min_items: usize,
    pub max_probes: usize,
    pub backoff_base_secs: u64,
    pub backoff_max_attempts: u32,
}

/// The lister program the command-driven source runs. `{url}` in `args` is
/// replaced with the collection URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("downloads"),
            credential: None,
            extra_args: Vec::new(),
            vip_strict: false,
            save_cover: false,
            debug: false,
            downloader: DownloaderConfig::default(),
            pacing: PacingConfig::default(),
            risk: RiskConfig::default(),
            source: SourceConfig::default(),
        }
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            program: "yutto".to_string(),
            max_attempts: 5,
            retry_step_secs: 2,
            retry_cap_secs: 10,
            terminate_grace_secs: 3,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            item_cooldown_ms: 2000,
            failure_cooldown_ms: 1000,
            size_recheck_ms: 2000,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        let policy = ProbePolicy::default();
        Self {
            probe_capacity: policy.capacity,
            healthy_min_items: policy.healthy_min_items,
            max_probes: policy.max_probes,
            backoff_base_secs: policy.backoff_base.as_secs(),
            backoff_max_attempts: policy.backoff_attempts,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            args: ["--flat-playlist", "-J", "{url}"].map(String::from).to_vec(),
        }
    }
}

impl Config {
    /// Loads every layer, using the platform config directory.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let dirs = ProjectDirs::from("", "", "vidsync");
        if dirs.is_none() {
            tracing::debug!("No home directory; skipping user configuration");
        }
        Self::load_from(dirs.as_ref().map(ProjectDirs::config_dir), explicit)
    }

    /// Loads every layer with an explicit user config directory.
    pub fn load_from(config_dir: Option<&Path>, explicit: Option<&Path>) -> Result<Self> {
        let config: Self = Self::figment(config_dir, explicit)?.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn figment(config_dir: Option<&Path>, explicit: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(dir) = config_dir {
            tracing::debug!(dir = %dir.display(), "Looking for user configuration");
            figment = figment.merge(Toml::file(dir.join("config.toml"))).merge(Yaml::file(dir.join("config.yaml")));
        }
        if let Some(path) = explicit {
            if !path.is_file() {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
            }
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.downloader.max_attempts == 0, "downloader.max_attempts must be at least 1"),
            (self.downloader.program.trim().is_empty(), "downloader.program must not be empty"),
            (self.source.program.trim().is_empty(), "source.program must not be empty"),
            (self.risk.probe_capacity == 0, "risk.probe_capacity must be at least 1"),
            (self.risk.max_probes == 0, "risk.max_probes must be at least 1"),
            (self.risk.healthy_min_items == 0, "risk.healthy_min_items must be at least 1"),
            (self.risk.backoff_max_attempts == 0, "risk.backoff_max_attempts must be at least 1"),
        ];
        if let Some((_, message)) = checks.into_iter().find(|(failed, _)| *failed) {
            exn::bail!(ErrorKind::Invalid(message.to_string()));
        }
        Ok(())
    }

    /// Credential with blank values treated as absent.
    pub fn credential(&self) -> Option<String> {
        self.credential.as_ref().map(|c| c.trim().to_string()).filter(|c| !c.is_empty())
    }

    /// User flags plus the flags implied by the boolean switches, in the
    /// order they are passed to the downloader.
    pub fn transfer_args(&self) -> Vec<String> {
        let mut args = self.extra_args.clone();
        let switches = [
            (self.vip_strict, "--vip-strict"),
            (self.save_cover, "--save-cover"),
            (self.debug, "--debug"),
        ];
        for (enabled, flag) in switches {
            if enabled && !args.iter().any(|arg| arg == flag) {
                args.push(flag.to_string());
            }
        }
        args
    }

    pub fn probe_policy(&self) -> ProbePolicy {
        ProbePolicy {
            capacity: self.risk.probe_capacity,
            healthy_min_items: self.risk.healthy_min_items,
            max_probes: self.risk.max_probes,
            backoff_base: Duration::from_secs(self.risk.backoff_base_secs),
            backoff_attempts: self.risk.backoff_max_attempts,
        }
    }
}

impl DownloaderConfig {
    /// Delay before retry number `attempt` (1-based): grows linearly, capped.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.retry_step_secs.saturating_mul(u64::from(attempt)).min(self.retry_cap_secs))
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }
}

impl PacingConfig {
    pub fn item_cooldown(&self) -> Duration {
        Duration::from_millis(self.item_cooldown_ms)
    }

    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_millis(self.failure_cooldown_ms)
    }

    pub fn size_recheck(&self) -> Duration {
        Duration::from_millis(self.size_recheck_ms)
    }
}
