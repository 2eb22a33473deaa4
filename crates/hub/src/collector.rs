//! Background polling loop: fetches the selected station's `/data` endpoint
//! once per tick, publishes the reading to shared state and sub-samples it
//! into the history log.
//!
//! ## Tick cycle
//!
//! ```text
//! Initializing ──▶ resolve selected station
//!                    │ empty address ──▶ NoAddress ─┐
//!                    ▼                              │
//!                 Polling ──[fetch ok]──▶ Ok ───────┤
//!                    └─────[fetch err]──▶ Error ────┤
//!                                                   ▼
//!                                 sleep max(200ms, interval - elapsed)
//! ```
//!
//! Every failure is folded into the published status; only the cancellation
//! token ends the loop.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::history::HistoryStore;
use crate::registry::StationRegistry;
use crate::state::{CollectorState, Reading, SharedState};

/// Lower bound on the inter-tick wait, even when a fetch overran the period.
const MIN_WAIT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    /// Persist every Nth successful sample.
    pub save_every_n: u64,
    pub fetch_timeout: Duration,
}

pub struct Collector {
    http: reqwest::Client,
    registry: Arc<StationRegistry>,
    history: Arc<HistoryStore>,
    shared: SharedState,
    settings: PollSettings,
    /// Successful samples since start, across stations.
    counter: u64,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

impl Collector {
    pub fn new(
        settings: PollSettings,
        registry: Arc<StationRegistry>,
        history: Arc<HistoryStore>,
        shared: SharedState,
    ) -> Result<Self> {
        // Sensor nodes live on the local network; never route them via a proxy.
        let http = reqwest::Client::builder()
            .timeout(settings.fetch_timeout)
            .no_proxy()
            .build()?;
        let settings = PollSettings {
            save_every_n: settings.save_every_n.max(1),
            ..settings
        };
        Ok(Self {
            http,
            registry,
            history,
            shared,
            settings,
            counter: 0,
        })
    }

    /// Run until `cancel` fires. Intended to be `tokio::spawn`-ed from main.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            interval_ms = self.settings.interval.as_millis() as u64,
            save_every_n = self.settings.save_every_n,
            timeout_ms = self.settings.fetch_timeout.as_millis() as u64,
            "collector started"
        );
        {
            let mut st = self.shared.write().await;
            st.record_system("collector started".to_string());
        }

        while !cancel.is_cancelled() {
            let started = Instant::now();
            self.tick().await;

            let wait = next_wait(self.settings.interval, started.elapsed());
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!(samples = self.counter, "collector stopped");
        let mut st = self.shared.write().await;
        st.record_system("collector stopped".to_string());
    }

    // -----------------------------------------------------------------------
    // One tick
    // -----------------------------------------------------------------------

    pub(crate) async fn tick(&mut self) {
        // Re-resolved every tick so a selection change lands on a tick boundary.
        let station = self.shared.read().await.selected.clone();

        let address = match self.registry.select(&station).await {
            Ok(a) => a,
            Err(e) => {
                error!(station = %station, "collector: {e}");
                let mut st = self.shared.write().await;
                st.publish_status(CollectorState::Error, e.to_string());
                return;
            }
        };

        if address.is_empty() {
            let msg = Error::UnconfiguredStation(station.clone()).to_string();
            debug!(station = %station, "collector: no address, skipping fetch");
            let mut st = self.shared.write().await;
            st.publish_status(CollectorState::NoAddress, msg);
            return;
        }

        {
            let mut st = self.shared.write().await;
            st.publish_status(CollectorState::Polling, "");
        }

        let (temperature, humidity) = match self.fetch(&address).await {
            Ok(v) => v,
            Err(e) => {
                warn!(station = %station, address = %address, "collector: fetch failed: {e}");
                let mut st = self.shared.write().await;
                st.publish_status(
                    CollectorState::Error,
                    format!("station '{station}' ({address}): {e}"),
                );
                return;
            }
        };

        let reading = Reading::now(&station, &address, temperature, humidity);
        self.counter += 1;
        let persist = self.counter % self.settings.save_every_n == 0;

        // History is written outside the state lock; reading and status then
        // land under one guard.
        let saved = if persist {
            Some(self.history.append(&reading).await)
        } else {
            None
        };

        let mut st = self.shared.write().await;
        st.publish(reading);
        match saved {
            None => st.publish_status(CollectorState::Ok, ""),
            Some(Ok(())) => {
                st.record_saved();
                st.publish_status(CollectorState::Ok, "");
            }
            Some(Err(e)) => {
                error!(station = %station, "collector: history append failed: {e}");
                st.publish_status(
                    CollectorState::Error,
                    format!("station '{station}' ({address}): history write failed: {e}"),
                );
            }
        }
    }

    async fn fetch(&self, address: &str) -> Result<(f64, f64)> {
        let url = endpoint_url(address);
        let body = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        parse_payload(&body)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn next_wait(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed).max(MIN_WAIT)
}

/// `http://<address>/data`; tolerates a pasted scheme or trailing slash.
fn endpoint_url(address: &str) -> String {
    let host = address.trim();
    let host = host.strip_prefix("http://").unwrap_or(host);
    format!("http://{}/data", host.trim_end_matches('/'))
}

/// Extract `temp` and `hum` from a node's JSON body. Numbers and numeric
/// strings are accepted; the values must be finite.
fn parse_payload(body: &[u8]) -> Result<(f64, f64)> {
    let doc: Value = serde_json::from_slice(body)
        .map_err(|e| Error::MalformedResponse(format!("invalid JSON: {e}")))?;

    let field = |name: &str| -> Result<f64> {
        let raw = doc
            .get(name)
            .ok_or_else(|| Error::MalformedResponse(format!("missing field '{name}'")))?;
        let value = match raw {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        value
            .filter(|v| v.is_finite())
            .ok_or_else(|| Error::MalformedResponse(format!("field '{name}' is not a number: {raw}")))
    };

    Ok((field("temp")?, field("hum")?))
}

// ===========================================================================
// Tests
// ===========================================================================
