use crate::beem_api::BEEM_API_BASE;
use serde_derive::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub email: String,
    /// Saved into the secret store on startup when present.
    #[serde(default)]
    pub password: Option<String>,
    /// Absent for accounts that only own BeemBoxes.
    #[serde(default)]
    pub battery_id: Option<i64>,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

fn default_api_base_url() -> String {
    BEEM_API_BASE.to_string()
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_state_file() -> PathBuf {
    PathBuf::from("beem_state.json")
}

/// Loads settings from an optional file at `path` (any format `config` knows,
/// extension optional), overridden by `BEEM_*` environment variables.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(config::Environment::with_prefix("BEEM").try_parsing(true))
        .build()?;

    Ok(settings.try_deserialize()?)
}
