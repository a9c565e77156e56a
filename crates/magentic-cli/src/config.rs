use std::path::PathBuf;
use std::time::Duration;

use magentic_core::curve::DEFAULT_STEPS;
use magentic_services::BridgeConfig;

pub(crate) const BRIDGE_URL_ENV: &str = "MAGENTIC_BRIDGE_URL";

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, Default)]
pub(crate) struct AppConfig {
    #[serde(default)]
    pub bridge: BridgeSection,
    #[serde(default)]
    pub automation: AutomationSection,
    #[serde(default)]
    pub offline: OfflineSection,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub(crate) struct BridgeSection {
    pub url: String,
    pub timeout_secs: u64,
    /// For host commands that may instantiate plugins or items
    pub slow_timeout_secs: u64,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self { url: "http://localhost:5001".to_string(), timeout_secs: 15, slow_timeout_secs: 60 }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub(crate) struct AutomationSection {
    pub curve_steps: usize,
}

impl Default for AutomationSection {
    fn default() -> Self {
        Self { curve_steps: DEFAULT_STEPS }
    }
}

/// Project used by `--offline` runs.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub(crate) struct OfflineSection {
    pub bpm: f64,
    pub tracks: Vec<String>,
}

impl Default for OfflineSection {
    fn default() -> Self {
        Self { bpm: 120.0, tracks: vec!["Track 1".to_string()] }
    }
}

impl AppConfig {
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            base_url: self.bridge.url.clone(),
            timeout: Duration::from_secs(self.bridge.timeout_secs),
            slow_timeout: Duration::from_secs(self.bridge.slow_timeout_secs.max(self.bridge.timeout_secs)),
        }
    }
}

pub(crate) fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("magentic")
        .join("config.toml")
}

pub(crate) fn parse_config(text: &str) -> AppConfig {
    toml::from_str(text).unwrap_or_else(|e| {
        tracing::warn!("Ignoring invalid config: {}", e);
        AppConfig::default()
    })
}

pub(crate) fn load_config() -> AppConfig {
    let path = config_path();
    let mut config = std::fs::read_to_string(&path)
        .ok()
        .map(|s| parse_config(&s))
        .unwrap_or_default();
    if let Ok(url) = std::env::var(BRIDGE_URL_ENV) {
        if !url.is_empty() {
            config.bridge.url = url;
        }
    }
    config
}
