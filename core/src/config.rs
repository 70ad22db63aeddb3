use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::model::DEFAULT_TITLE;
use crate::Result;

/// Settings of one dashboard instance
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DashboardConfig {
    pub title: String,
    /// URL path the dashboard is served under, e.g. `/flexdash`
    pub path: String,
    /// Send the config snapshot to newly connected clients
    pub send_config: bool,
    /// Accept `$config/...` mutations coming from clients
    pub allow_config_edits: bool,
    /// Grace period after a disconnect before the client counts as idle
    pub idle_timeout_ms: u64,
    pub broadcast_capacity: usize,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            title: env_string("FLEXDASH_TITLE").unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            path: normalize_path(
                &env_string("FLEXDASH_PATH").unwrap_or_else(|| "/flexdash".to_string()),
            ),
            send_config: true,
            allow_config_edits: env_bool("FLEXDASH_CONFIG_EDITS").unwrap_or(false),
            idle_timeout_ms: env_string("FLEXDASH_IDLE_TIMEOUT_MS")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(10_000),
            broadcast_capacity: env_string("FLEXDASH_BROADCAST_CAPACITY")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(1000),
        }
    }
}

/// Leading slash, no trailing slash; an empty path becomes `/`
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    format!("/{trimmed}")
}

impl DashboardConfig {
    /// Load configuration from a TOML file (path via FLEXDASH_CONFIG or ./flexdash.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let path = std::env::var("FLEXDASH_CONFIG").unwrap_or_else(|_| "flexdash.toml".into());
        if !Path::new(&path).exists() {
            tracing::info!(path = %path, "No TOML config found; using defaults/env");
            return Self::default();
        }
        match Self::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Failed to load TOML; using defaults");
                Self::default()
            }
        }
    }

    /// Read a TOML file and overlay it onto the defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parse a TOML document and overlay it onto the defaults
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let t: DashboardToml = toml::from_str(s)?;
        Ok(t.overlay(Self::default()))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DashboardToml {
    title: Option<String>,
    path: Option<String>,
    send_config: Option<bool>,
    allow_config_edits: Option<bool>,
    idle_timeout_ms: Option<u64>,
    broadcast_capacity: Option<usize>,
}

impl DashboardToml {
    fn overlay(self, mut base: DashboardConfig) -> DashboardConfig {
        if let Some(v) = self.title {
            base.title = v;
        }
        if let Some(v) = self.path {
            base.path = normalize_path(&v);
        }
        if let Some(v) = self.send_config {
            base.send_config = v;
        }
        if let Some(v) = self.allow_config_edits {
            base.allow_config_edits = v;
        }
        if let Some(v) = self.idle_timeout_ms {
            base.idle_timeout_ms = v;
        }
        if let Some(v) = self.broadcast_capacity {
            base.broadcast_capacity = v;
        }
        base
    }
}
