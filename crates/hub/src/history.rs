//! Bounded, append-only history of accepted readings.
//!
//! The log is a JSON array rewritten in full on every append. Readers never
//! write; a missing or corrupt file reads as an empty log.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::persist::{self, Layout};
use crate::state::Reading;

/// Timestamp layout used when writing `fecha`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

// ---------------------------------------------------------------------------
// On-disk record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(rename = "fecha")]
    pub timestamp: String,
    #[serde(rename = "temperatura")]
    pub temperature: f64,
    #[serde(rename = "humedad")]
    pub humidity: f64,
    /// Absent in logs written before multi-station support.
    #[serde(rename = "estacion", default, skip_serializing_if = "Option::is_none")]
    pub station: Option<String>,
    #[serde(rename = "ip", default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl From<&Reading> for HistoryRecord {
    fn from(r: &Reading) -> Self {
        Self {
            timestamp: r.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            temperature: r.temperature,
            humidity: r.humidity,
            station: Some(r.station.clone()),
            address: Some(r.address.clone()),
        }
    }
}

impl HistoryRecord {
    /// `None` if the stored timestamp cannot be parsed.
    pub fn to_reading(&self) -> Option<Reading> {
        Some(Reading {
            timestamp: parse_timestamp(&self.timestamp)?,
            station: self.station.clone().unwrap_or_default(),
            address: self.address.clone().unwrap_or_default(),
            temperature: self.temperature,
            humidity: self.humidity,
        })
    }
}

/// Lenient ISO-8601 parsing: `T` or space separator, optional fraction,
/// optional offset (converted to the offset's local wall-clock time), or a
/// bare date.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|d| d.naive_local()))
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

// ---------------------------------------------------------------------------
// Trend window
// ---------------------------------------------------------------------------

/// How far back a trend query reaches, measured from the newest reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    All,
    Last(Duration),
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s == "all" {
            return Ok(Self::All);
        }

        let invalid = || format!("invalid period '{s}' (expected e.g. 1h, 24h, 7d or all)");
        if s.len() < 2 || !s.is_ascii() {
            return Err(invalid());
        }
        let (num, unit) = s.split_at(s.len() - 1);
        let n: i64 = num.parse().map_err(|_| invalid())?;
        if n <= 0 {
            return Err(invalid());
        }
        let span = match unit {
            "m" => Duration::try_minutes(n),
            "h" => Duration::try_hours(n),
            "d" => Duration::try_days(n),
            _ => None,
        };
        span.map(Self::Last).ok_or_else(invalid)
    }
}

impl Period {
    /// Window length, or `None` for the whole log.
    pub fn span(self) -> Option<Duration> {
        match self {
            Self::All => None,
            Self::Last(d) => Some(d),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Last(d) if d.num_seconds() % 86_400 == 0 => write!(f, "{}d", d.num_days()),
            Self::Last(d) if d.num_seconds() % 3_600 == 0 => write!(f, "{}h", d.num_hours()),
            Self::Last(d) => write!(f, "{}m", d.num_minutes()),
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct HistoryStore {
    path: PathBuf,
    max_records: usize,
    append_lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>, max_records: usize) -> Self {
        Self {
            path: path.into(),
            max_records,
            append_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    /// Create an empty log if none exists yet.
    pub async fn ensure(&self) -> Result<()> {
        let _guard = self.append_lock.lock().await;
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(());
        }
        persist::write_json(&self.path, &[] as &[HistoryRecord], Layout::Compact).await
    }

    /// Every stored record in insertion order. Entries that do not decode
    /// as a record are skipped.
    pub async fn load_all(&self) -> Vec<HistoryRecord> {
        let raw = match persist::read_json::<Vec<Value>>(&self.path).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("history unreadable, treating as empty: {e}");
                return Vec::new();
            }
        };

        let total = raw.len();
        let records: Vec<HistoryRecord> = raw
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();
        if records.len() < total {
            debug!(skipped = total - records.len(), "history: skipped malformed records");
        }
        records
    }

    /// Append one reading, evict the oldest beyond the retention cap, and
    /// rewrite the log.
    ///
    /// Stored entries are carried over verbatim, including ones that do not
    /// decode as records. A log that is not a JSON array at all is moved to
    /// `<file>.corrupt` and a new log is started.
    pub async fn append(&self, reading: &Reading) -> Result<()> {
        let _guard = self.append_lock.lock().await;

        let mut entries = match persist::read_json::<Vec<Value>>(&self.path).await {
            Ok(raw) => raw.unwrap_or_default(),
            Err(e) => {
                let aside = persist::set_aside(&self.path).await?;
                warn!(aside = %aside.display(), "history unreadable, starting a new log: {e}");
                Vec::new()
            }
        };

        let record = serde_json::to_value(HistoryRecord::from(reading)).map_err(|e| {
            Error::storage(&self.path, io::Error::new(io::ErrorKind::InvalidData, e))
        })?;
        entries.push(record);
        if entries.len() > self.max_records {
            let excess = entries.len() - self.max_records;
            entries.drain(..excess);
        }

        persist::write_json(&self.path, &entries, Layout::Compact).await?;
        debug!(
            station = %reading.station,
            len = entries.len(),
            "history: appended reading"
        );
        Ok(())
    }

    /// Readings at or after `since`, optionally for one station, oldest first.
    pub async fn query(
        &self,
        station: Option<&str>,
        since: Option<NaiveDateTime>,
    ) -> Vec<Reading> {
        let mut readings: Vec<Reading> = self
            .load_all()
            .await
            .iter()
            .filter_map(HistoryRecord::to_reading)
            .filter(|r| station.map_or(true, |s| r.station == s))
            .filter(|r| since.map_or(true, |t| r.timestamp >= t))
            .collect();
        readings.sort_by_key(|r| r.timestamp);
        readings
    }

    /// Readings within `period` of the newest matching reading.
    pub async fn query_period(&self, station: Option<&str>, period: Period) -> Vec<Reading> {
        let mut readings = self.query(station, None).await;
        if let (Period::Last(span), Some(newest)) = (period, readings.last()) {
            // A span reaching past the calendar range keeps everything.
            if let Some(cutoff) = newest.timestamp.checked_sub_signed(span) {
                readings.retain(|r| r.timestamp >= cutoff);
            }
        }
        readings
    }
}

// ===========================================================================
// Tests
// ===========================================================================
