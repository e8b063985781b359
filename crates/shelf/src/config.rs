//! Configuration loading for sync backends
//!
//! Backend endpoints are loaded from (in order of priority):
//! 1. JSON file (`~/.config/shelf/backends.json`)
//! 2. Runtime environment variables (fallback)
//!
//! Sync tuning lives in `~/.config/shelf/sync.json`; every field is optional.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Backend endpoints filename in the Shelf config directory
const BACKENDS_FILE: &str = "backends.json";

/// Sync settings filename in the Shelf config directory
const SETTINGS_FILE: &str = "sync.json";

/// REST backend endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestCredentials {
    pub url: String,
    /// Token refresh endpoint; defaults to `{url}/auth/refresh`
    #[serde(default)]
    pub refresh_url: Option<String>,
}

impl RestCredentials {
    pub fn refresh_endpoint(&self) -> String {
        self.refresh_url
            .clone()
            .unwrap_or_else(|| format!("{}/auth/refresh", self.url.trim_end_matches('/')))
    }
}

/// Managed database endpoint and public API key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedCredentials {
    pub url: String,
    pub api_key: String,
}

impl ManagedCredentials {
    pub fn refresh_endpoint(&self) -> String {
        format!(
            "{}/auth/v1/token?grant_type=refresh_token",
            self.url.trim_end_matches('/')
        )
    }
}

/// Endpoints for every backend the user may select
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendCredentials {
    #[serde(default)]
    pub rest: Option<RestCredentials>,
    #[serde(default)]
    pub managed: Option<ManagedCredentials>,
}

impl BackendCredentials {
    /// Load credentials using the following priority:
    /// 1. JSON file (~/.config/shelf/backends.json)
    /// 2. Runtime environment variables
    pub fn load() -> Result<Self> {
        if config::config_exists(BACKENDS_FILE) {
            return config::load_json(BACKENDS_FILE);
        }
        Ok(Self::from_env())
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_json_file(path)
    }

    /// Parse credentials from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse backend credentials JSON")
    }

    /// Load credentials from `SHELF_REST_URL`, `SHELF_MANAGED_URL` and
    /// `SHELF_MANAGED_KEY`
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| var(name).filter(|v| !v.is_empty());

        let rest = var("SHELF_REST_URL").map(|url| RestCredentials {
            url,
            refresh_url: var("SHELF_REST_REFRESH_URL"),
        });
        let managed = match (var("SHELF_MANAGED_URL"), var("SHELF_MANAGED_KEY")) {
            (Some(url), Some(api_key)) => Some(ManagedCredentials { url, api_key }),
            _ => None,
        };

        Self { rest, managed }
    }

    /// Get the default credentials file path (~/.config/shelf/backends.json)
    pub fn default_path() -> Option<PathBuf> {
        config::config_path(BACKENDS_FILE)
    }

    /// Check if any backend is configured
    pub fn is_available(&self) -> bool {
        self.rest.is_some() || self.managed.is_some()
    }
}

/// Sync tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncSettings {
    /// Listing page size for the REST backend
    pub rest_page_size: usize,
    /// Listing page size for the managed database (capped at 1000)
    pub managed_page_size: usize,
    /// Minimum seconds between periodic passes
    pub cooldown_secs: u64,
    /// Sync entity kinds concurrently
    pub parallel: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            rest_page_size: 50,
            managed_page_size: 1000,
            cooldown_secs: 300,
            parallel: true,
        }
    }
}

impl SyncSettings {
    /// Load settings from ~/.config/shelf/sync.json, or defaults if absent
    pub fn load() -> Result<Self> {
        if config::config_exists(SETTINGS_FILE) {
            return config::load_json(SETTINGS_FILE);
        }
        Ok(Self::default())
    }

    pub fn save(&self) -> Result<()> {
        config::save_json(SETTINGS_FILE, self)
    }
}
