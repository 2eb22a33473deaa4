//! Station name → network address mapping, persisted as a JSON object.
//!
//! The set of names is fixed when the registry is built; only addresses
//! change. Every write replaces the whole file.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::persist::{self, Layout};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StationEntry {
    pub name: String,
    /// Empty when the station has not been configured yet.
    pub address: String,
}

pub struct StationRegistry {
    path: PathBuf,
    names: Vec<String>,
    /// Serializes writers so read-modify-write edits cannot interleave.
    write_lock: Mutex<()>,
}

impl StationRegistry {
    pub fn new(path: impl Into<PathBuf>, names: Vec<String>) -> Self {
        Self {
            path: path.into(),
            names,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured station names, in configuration order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Every configured station with its stored address.
    ///
    /// A missing or unreadable backing file yields empty addresses and is
    /// re-initialized; this never fails.
    pub async fn load(&self) -> Vec<StationEntry> {
        if let Some(stored) = self.read_addresses().await {
            return self.entries_from(&stored);
        }

        let _guard = self.write_lock.lock().await;
        // Another writer may have produced a valid file while we waited.
        if let Some(stored) = self.read_addresses().await {
            return self.entries_from(&stored);
        }

        let empty = HashMap::new();
        match self.write(&empty).await {
            Ok(()) => info!(path = %self.path.display(), "station registry initialised"),
            Err(e) => warn!("station registry re-initialisation failed: {e}"),
        }
        self.entries_from(&empty)
    }

    /// Persist the full mapping. Unknown names are dropped; known names
    /// missing from `mapping` are stored as unconfigured.
    pub async fn save(&self, mapping: &HashMap<String, String>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(mapping).await?;
        debug!(stations = self.names.len(), "station registry saved");
        Ok(())
    }

    /// Address currently on file for `name`.
    pub async fn select(&self, name: &str) -> Result<String> {
        if !self.contains(name) {
            return Err(Error::UnknownStation(name.to_string()));
        }
        Ok(self
            .load()
            .await
            .into_iter()
            .find(|e| e.name == name)
            .map(|e| e.address)
            .unwrap_or_default())
    }

    /// Update a single station's address, keeping the others as stored.
    pub async fn set_address(&self, name: &str, address: &str) -> Result<()> {
        if !self.contains(name) {
            return Err(Error::UnknownStation(name.to_string()));
        }

        let _guard = self.write_lock.lock().await;
        let mut stored = self.read_addresses().await.unwrap_or_default();
        let address = address.trim();
        stored.insert(name.to_string(), address.to_string());
        self.write(&stored).await?;

        info!(station = %name, address = %address, "station address updated");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// `None` when the file is missing or does not hold a JSON object.
    async fn read_addresses(&self) -> Option<HashMap<String, String>> {
        match persist::read_json::<HashMap<String, Value>>(&self.path).await {
            Ok(Some(raw)) => Some(
                raw.into_iter()
                    .map(|(name, v)| {
                        let addr = v.as_str().map(|s| s.trim().to_string()).unwrap_or_default();
                        (name, addr)
                    })
                    .collect(),
            ),
            Ok(None) => None,
            Err(e) => {
                warn!("station registry unreadable, treating as empty: {e}");
                None
            }
        }
    }

    fn entries_from(&self, stored: &HashMap<String, String>) -> Vec<StationEntry> {
        self.names
            .iter()
            .map(|name| StationEntry {
                name: name.clone(),
                address: stored.get(name).cloned().unwrap_or_default(),
            })
            .collect()
    }

    async fn write(&self, mapping: &HashMap<String, String>) -> Result<()> {
        let doc: BTreeMap<&str, &str> = self
            .names
            .iter()
            .map(|n| (n.as_str(), mapping.get(n).map(|a| a.trim()).unwrap_or("")))
            .collect();
        persist::write_json(&self.path, &doc, Layout::Pretty).await
    }
}

// ===========================================================================
// Tests
// ===========================================================================
