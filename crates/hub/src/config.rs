//! TOML config file loading, validation, and registry seeding for stations.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::collector::PollSettings;
use crate::registry::StationRegistry;

const REGISTRY_FILE: &str = "stations.json";
const HISTORY_FILE: &str = "historico.json";

/// Anything faster than the collector's minimum wait is pointless.
const MIN_POLL_INTERVAL_MS: u64 = 200;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_save_every_n")]
    pub save_every_n: u64,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    /// Station polled at startup; the first configured one otherwise.
    #[serde(default)]
    pub default_station: Option<String>,
    #[serde(default)]
    pub stations: Vec<StationConfig>,
}

#[derive(Debug, Deserialize)]
pub struct StationConfig {
    pub name: String,
    /// Seed address, applied only while the stored one is empty.
    #[serde(default)]
    pub address: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_save_every_n() -> u64 {
    2
}

fn default_fetch_timeout_ms() -> u64 {
    3000
}

fn default_max_records() -> usize {
    200_000
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_timing(&mut errors);
        self.validate_stations(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_timing(&self, errors: &mut Vec<String>) {
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            errors.push(format!(
                "poll_interval_ms {} is below the minimum of {MIN_POLL_INTERVAL_MS}",
                self.poll_interval_ms
            ));
        }
        if self.save_every_n == 0 {
            errors.push("save_every_n must be at least 1".to_string());
        }
        if self.fetch_timeout_ms == 0 {
            errors.push("fetch_timeout_ms must be positive".to_string());
        }
        if self.max_records == 0 {
            errors.push("max_records must be at least 1".to_string());
        }
    }

    fn validate_stations(&self, errors: &mut Vec<String>) {
        if self.stations.is_empty() {
            errors.push("no stations configured".to_string());
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for (i, s) in self.stations.iter().enumerate() {
            if s.name.trim().is_empty() {
                errors.push(format!("stations[{i}]: name is empty"));
            } else if s.name.trim() != s.name {
                errors.push(format!(
                    "station '{}': name has leading or trailing whitespace",
                    s.name
                ));
            } else if !seen.insert(&s.name) {
                errors.push(format!("station '{}': duplicate name", s.name));
            }
        }

        if let Some(def) = &self.default_station {
            if !self.stations.iter().any(|s| &s.name == def) {
                errors.push(format!(
                    "default_station '{def}' does not match any defined station"
                ));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Derived settings
    // -----------------------------------------------------------------------

    pub fn station_names(&self) -> Vec<String> {
        self.stations.iter().map(|s| s.name.clone()).collect()
    }

    /// Only meaningful after `validate` (which guarantees a station exists).
    pub fn initial_station(&self) -> &str {
        self.default_station
            .as_deref()
            .or_else(|| self.stations.first().map(|s| s.name.as_str()))
            .unwrap_or_default()
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join(REGISTRY_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(HISTORY_FILE)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(self.poll_interval_ms),
            save_every_n: self.save_every_n,
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Seed configured addresses into the registry for stations that have none
/// stored yet. Addresses edited at runtime are left alone.
pub async fn apply(config: &Config, registry: &StationRegistry) -> Result<()> {
    let stored = registry.load().await;
    let mut seeded = 0;

    for s in &config.stations {
        let seed = s.address.trim();
        if seed.is_empty() {
            continue;
        }
        let current = stored.iter().find(|e| e.name == s.name);
        if current.is_some_and(|e| e.address.is_empty()) {
            registry
                .set_address(&s.name, seed)
                .await
                .with_context(|| format!("failed to seed station '{}'", s.name))?;
            seeded += 1;
        }
    }

    tracing::info!(
        stations = config.stations.len(),
        seeded,
        "config applied"
    );

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
