//! Read-mostly facade handed to consumers (the HTTP layer, trend views).
//! Only station selection and address edits mutate anything.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::history::{HistoryStore, Period};
use crate::registry::{StationEntry, StationRegistry};
use crate::state::{CollectorStatus, Reading, SharedState, StatusResponse};

/// Latest reading and collector status taken under one lock.
#[derive(Debug, Serialize)]
pub struct Live {
    pub reading: Option<Reading>,
    pub status: CollectorStatus,
}

#[derive(Clone)]
pub struct Monitor {
    registry: Arc<StationRegistry>,
    history: Arc<HistoryStore>,
    shared: SharedState,
}

impl Monitor {
    pub fn new(
        registry: Arc<StationRegistry>,
        history: Arc<HistoryStore>,
        shared: SharedState,
    ) -> Self {
        Self {
            registry,
            history,
            shared,
        }
    }

    pub async fn latest(&self) -> Option<Reading> {
        self.shared.read().await.latest.clone()
    }

    /// Collector state and message, plus selection, counters and recent events.
    pub async fn status(&self) -> StatusResponse {
        self.shared.read().await.to_status()
    }

    pub async fn live(&self) -> Live {
        let (reading, status) = self.shared.read().await.snapshot();
        Live { reading, status }
    }

    /// History for `station` (or all), limited to `since` before the newest
    /// matching reading when given.
    pub async fn query_history(
        &self,
        station: Option<&str>,
        since: Option<Duration>,
    ) -> Vec<Reading> {
        let period = since.map_or(Period::All, Period::Last);
        self.history.query_period(station, period).await
    }

    pub async fn list_stations(&self) -> Vec<StationEntry> {
        self.registry.load().await
    }

    /// Fails with `UnknownStation` for names outside the configured list.
    pub async fn select_station(&self, name: &str) -> Result<()> {
        if !self.registry.contains(name) {
            return Err(Error::UnknownStation(name.to_string()));
        }
        let mut st = self.shared.write().await;
        st.select(name);
        Ok(())
    }

    pub async fn set_station_address(&self, name: &str, address: &str) -> Result<()> {
        self.registry.set_address(name, address).await
    }

    /// Replace every address at once; unknown names are ignored.
    pub async fn save_stations(&self, mapping: &HashMap<String, String>) -> Result<()> {
        self.registry.save(mapping).await
    }
}
