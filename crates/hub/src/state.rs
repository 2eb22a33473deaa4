use chrono::{DateTime, Local, NaiveDateTime, SubsecRound, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// One accepted sample from a station.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    /// Local wall-clock time, whole seconds.
    pub timestamp: NaiveDateTime,
    pub station: String,
    pub address: String,
    pub temperature: f64,
    pub humidity: f64,
}

impl Reading {
    /// Stamp a reading with the current local time.
    pub fn now(station: &str, address: &str, temperature: f64, humidity: f64) -> Self {
        Self {
            timestamp: local_now(),
            station: station.to_string(),
            address: address.to_string(),
            temperature,
            humidity,
        }
    }
}

pub fn local_now() -> NaiveDateTime {
    Local::now().trunc_subsecs(0).naive_local()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorState {
    Initializing,
    Polling,
    Ok,
    NoAddress,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectorStatus {
    pub state: CollectorState,
    /// Empty unless `state` is `error` or `no_address`.
    pub message: String,
}

pub struct SystemState {
    pub started_at: Instant,
    /// Station the collector polls on its next tick.
    pub selected: String,
    pub latest: Option<Reading>,
    pub status: CollectorStatus,
    pub samples_total: u64,
    pub saved_total: u64,
    pub consecutive_failures: u64,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SystemEvent {
    pub ts: DateTime<Utc>,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Sample,
    Error,
    Station,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub selected: String,
    #[serde(flatten)]
    pub status: CollectorStatus,
    pub samples_total: u64,
    pub saved_total: u64,
    pub consecutive_failures: u64,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new(selected: &str) -> Self {
        Self {
            started_at: Instant::now(),
            selected: selected.to_string(),
            latest: None,
            status: CollectorStatus {
                state: CollectorState::Initializing,
                message: String::new(),
            },
            samples_total: 0,
            saved_total: 0,
            consecutive_failures: 0,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Replace the latest reading as a whole.
    pub fn publish(&mut self, reading: Reading) {
        let detail = format!(
            "{}: {:.1} °C, {:.1} %",
            reading.station, reading.temperature, reading.humidity
        );
        self.latest = Some(reading);
        self.samples_total += 1;
        self.consecutive_failures = 0;
        self.push_event(EventKind::Sample, detail);
    }

    /// Replace the collector status. Errors also land in the event log and
    /// bump the failure streak.
    pub fn publish_status(&mut self, state: CollectorState, message: impl Into<String>) {
        let message = message.into();
        if state == CollectorState::Error {
            self.consecutive_failures += 1;
            self.push_event(EventKind::Error, message.clone());
        }
        self.status = CollectorStatus { state, message };
    }

    /// Latest reading and status as of the same instant.
    pub fn snapshot(&self) -> (Option<Reading>, CollectorStatus) {
        (self.latest.clone(), self.status.clone())
    }

    /// Switch the polled station; effective on the collector's next tick.
    pub fn select(&mut self, station: &str) {
        if self.selected != station {
            self.push_event(
                EventKind::Station,
                format!("selected {station} (was {})", self.selected),
            );
            self.selected = station.to_string();
        }
    }

    /// Count a reading written to the history log.
    pub fn record_saved(&mut self) {
        self.saved_total += 1;
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            selected: self.selected.clone(),
            status: self.status.clone(),
            samples_total: self.samples_total,
            saved_total: self.saved_total,
            consecutive_failures: self.consecutive_failures,
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: Utc::now(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(i: i64) -> Reading {
        let base = chrono::NaiveDate::from_ymd_opt(2026, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        Reading {
            timestamp: base + Duration::seconds(i),
            station: format!("station-{i}"),
            address: format!("10.0.{}.{}", i / 256, i % 256),
            temperature: i as f64,
            humidity: i as f64 + 0.5,
        }
    }

    #[test]
    fn starts_initializing_with_no_reading() {
        let st = SystemState::new("greenhouse");
        let (latest, status) = st.snapshot();
        assert!(latest.is_none());
        assert_eq!(status.state, CollectorState::Initializing);
        assert_eq!(st.selected, "greenhouse");
    }

    #[test]
    fn publish_replaces_whole_reading() {
        let mut st = SystemState::new("a");
        st.publish(sample(1));
        st.publish(sample(2));
        let (latest, _) = st.snapshot();
        assert_eq!(latest, Some(sample(2)));
        assert_eq!(st.samples_total, 2);
    }

    #[test]
    fn error_streak_resets_on_publish() {
        let mut st = SystemState::new("a");
        st.publish_status(CollectorState::Error, "boom");
        st.publish_status(CollectorState::Error, "boom again");
        assert_eq!(st.consecutive_failures, 2);

        st.publish(sample(1));
        st.publish_status(CollectorState::Ok, "");
        assert_eq!(st.consecutive_failures, 0);
        assert_eq!(st.status.message, "");
    }

    #[test]
    fn select_records_event_only_on_change() {
        let mut st = SystemState::new("a");
        st.select("a");
        assert!(st.events.is_empty());
        st.select("b");
        assert_eq!(st.selected, "b");
        assert_eq!(st.events.back().unwrap().kind, EventKind::Station);
    }

    #[test]
    fn event_ring_is_bounded() {
        let mut st = SystemState::new("a");
        for i in 0..(MAX_EVENTS as i64 + 25) {
            st.publish(sample(i));
        }
        assert_eq!(st.events.len(), MAX_EVENTS);
        let status = st.to_status();
        // Newest first.
        assert!(status.events[0].detail.starts_with(&format!(
            "station-{}",
            MAX_EVENTS + 24
        )));
    }

    #[test]
    fn status_response_flattens_state() {
        let mut st = SystemState::new("a");
        st.publish_status(CollectorState::NoAddress, "station 'a' has no address configured");
        let json = serde_json::to_value(st.to_status()).unwrap();
        assert_eq!(json["state"], "no_address");
        assert_eq!(json["message"], "station 'a' has no address configured");
        assert_eq!(json["selected"], "a");
    }

    /// One producer publishes distinct readings while many readers snapshot;
    /// every observed reading must be internally consistent.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn snapshots_are_never_torn() {
        const N: i64 = 2_000;
        let shared: SharedState = Arc::new(RwLock::new(SystemState::new("a")));

        let mut readers = Vec::new();
        for _ in 0..8 {
            let shared = Arc::clone(&shared);
            readers.push(tokio::spawn(async move {
                let mut seen = 0_u32;
                loop {
                    let (latest, status) = shared.read().await.snapshot();
                    if let Some(r) = latest {
                        let i = r.temperature as i64;
                        assert_eq!(r, sample(i), "torn reading observed");
                        assert_eq!(status.message, format!("tick {i}"));
                        seen += 1;
                        if i == N - 1 {
                            return seen;
                        }
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        let producer = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                for i in 0..N {
                    let mut st = shared.write().await;
                    st.publish(sample(i));
                    st.publish_status(CollectorState::Ok, format!("tick {i}"));
                    drop(st);
                    tokio::task::yield_now().await;
                }
            })
        };

        producer.await.unwrap();
        for r in readers {
            assert!(r.await.unwrap() > 0);
        }
    }
}
