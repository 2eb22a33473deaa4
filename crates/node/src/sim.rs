//! Stateful DHT-style climate sensor simulator for local development.
//!
//! Models a temperature/humidity probe sitting in a greenhouse:
//! - Temporal coherence via random walk with mean reversion
//! - Diurnal (day/night) temperature swing
//! - Humidity moving against the temperature swing
//! - Per-reading sensor noise and occasional spikes

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Gaussian approximation
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    (0..12).map(|_| fastrand::f64()).sum::<f64>() - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profiles selectable via the `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Mild room climate, low noise, rare spikes.
    Stable,
    /// Noisy probe with frequent spikes; some requests fail outright.
    Flaky,
    /// Hot and dry, with a wide day/night swing.
    Heatwave,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "flaky" => Self::Flaky,
            "heatwave" => Self::Heatwave,
            _ => Self::Stable,
        }
    }

    /// Fraction of `/data` requests that should be answered with an error.
    pub fn failure_rate(self) -> f32 {
        match self {
            Self::Flaky => 0.15,
            Self::Stable | Self::Heatwave => 0.0,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
            Self::Heatwave => write!(f, "heatwave"),
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// One sample as the DHT driver would report it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub temperature: f64,
    pub humidity: f64,
}

pub struct ClimateSim {
    /// Slowly varying "true" air temperature in °C, before the diurnal swing.
    base_temp: f64,
    /// Same for relative humidity in %.
    base_hum: f64,

    center_temp: f64,
    center_hum: f64,
    walk_sigma: f64,
    mean_reversion: f64,

    noise_sigma: f64,
    spike_prob: f32,
    spike_sigma: f64,

    diurnal_amplitude: f64,
    diurnal_period_s: f64,
    /// Humidity points lost per degree above the daily mean.
    hum_per_degree: f64,
}

impl ClimateSim {
    /// `diurnal_period_s` sets the day/night cycle length. Use 600 for fast
    /// dev iteration or 86400 for real time.
    pub fn new(scenario: Scenario, diurnal_period_s: f64) -> Self {
        let (center_temp, center_hum, walk_sigma, mean_rev, noise, spike_prob, spike_sigma, amp) =
            match scenario {
                Scenario::Stable => (22.0, 55.0, 0.05, 0.05, 0.05, 0.005_f32, 2.0, 3.0),
                Scenario::Flaky => (22.0, 55.0, 0.15, 0.03, 0.4, 0.08, 6.0, 3.0),
                Scenario::Heatwave => (34.0, 30.0, 0.08, 0.03, 0.1, 0.01, 3.0, 7.0),
            };

        Self {
            base_temp: gaussian(center_temp, 0.5),
            base_hum: gaussian(center_hum, 2.0),
            center_temp,
            center_hum,
            walk_sigma,
            mean_reversion: mean_rev,
            noise_sigma: noise,
            spike_prob,
            spike_sigma,
            diurnal_amplitude: amp,
            diurnal_period_s: diurnal_period_s.max(1.0),
            hum_per_degree: 2.5,
        }
    }

    /// Produce the next reading using the wall clock for the diurnal phase.
    pub fn sample(&mut self) -> Sample {
        let now_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        self.sample_at(now_s)
    }

    /// Produce the next reading at `t_s` seconds into the diurnal cycle.
    pub fn sample_at(&mut self, t_s: f64) -> Sample {
        self.base_temp += self.mean_reversion * (self.center_temp - self.base_temp)
            + gaussian(0.0, self.walk_sigma);
        self.base_hum += self.mean_reversion * (self.center_hum - self.base_hum)
            + gaussian(0.0, self.walk_sigma * 4.0);
        self.base_temp = self.base_temp.clamp(-20.0, 60.0);
        self.base_hum = self.base_hum.clamp(0.0, 100.0);

        // Peaks a quarter period in, like an early-afternoon high.
        let phase = 2.0 * std::f64::consts::PI * t_s / self.diurnal_period_s;
        let swing = self.diurnal_amplitude * phase.sin();

        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(0.0, self.spike_sigma)
        } else {
            0.0
        };

        let temperature = self.base_temp + swing + gaussian(0.0, self.noise_sigma) + spike;
        let humidity = self.base_hum - self.hum_per_degree * swing
            + gaussian(0.0, self.noise_sigma * 4.0);

        Sample {
            temperature: round1(temperature),
            humidity: round1(humidity.clamp(0.0, 100.0)),
        }
    }
}

/// Round to one decimal, the resolution of a DHT21.
fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(sim: &mut ClimateSim, n: usize) -> Vec<Sample> {
        (0..n).map(|i| sim.sample_at(i as f64)).collect()
    }

    fn variance(values: &[f64]) -> f64 {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
    }

    #[test]
    fn humidity_stays_in_range() {
        for scenario in [Scenario::Stable, Scenario::Flaky, Scenario::Heatwave] {
            let mut sim = ClimateSim::new(scenario, 60.0);
            for s in collect(&mut sim, 1000) {
                assert!((0.0..=100.0).contains(&s.humidity), "{scenario}: {s:?}");
                assert!(s.temperature.is_finite());
            }
        }
    }

    #[test]
    fn readings_have_one_decimal() {
        let mut sim = ClimateSim::new(Scenario::Flaky, 600.0);
        for s in collect(&mut sim, 200) {
            for v in [s.temperature, s.humidity] {
                assert!(((v * 10.0).round() - v * 10.0).abs() < 1e-9, "not rounded: {v}");
            }
        }
    }

    #[test]
    fn temporal_coherence() {
        let mut sim = ClimateSim::new(Scenario::Stable, 86_400.0);
        let temps: Vec<f64> = collect(&mut sim, 100).iter().map(|s| s.temperature).collect();
        let max_jump = temps
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0_f64, f64::max);
        // Rare spikes allowed, but never a jump across the whole range.
        assert!(max_jump < 10.0, "max consecutive jump too large: {max_jump}");
    }

    #[test]
    fn humidity_falls_as_day_warms() {
        let period = 1000.0;
        let mut sim = ClimateSim::new(Scenario::Stable, period);
        let avg = |sim: &mut ClimateSim, t: f64| -> Sample {
            let samples: Vec<Sample> = (0..50).map(|_| sim.sample_at(t)).collect();
            Sample {
                temperature: samples.iter().map(|s| s.temperature).sum::<f64>() / 50.0,
                humidity: samples.iter().map(|s| s.humidity).sum::<f64>() / 50.0,
            }
        };

        let afternoon = avg(&mut sim, period * 0.25);
        let night = avg(&mut sim, period * 0.75);
        assert!(afternoon.temperature > night.temperature, "{afternoon:?} vs {night:?}");
        assert!(afternoon.humidity < night.humidity, "{afternoon:?} vs {night:?}");
    }

    #[test]
    fn heatwave_runs_hotter_and_drier() {
        let mut stable = ClimateSim::new(Scenario::Stable, 600.0);
        let mut hot = ClimateSim::new(Scenario::Heatwave, 600.0);
        fn mean(v: &[Sample], f: fn(&Sample) -> f64) -> f64 {
            v.iter().map(f).sum::<f64>() / v.len() as f64
        }

        let s = collect(&mut stable, 600);
        let h = collect(&mut hot, 600);
        assert!(mean(&h, |x| x.temperature) > mean(&s, |x| x.temperature));
        assert!(mean(&h, |x| x.humidity) < mean(&s, |x| x.humidity));
    }

    #[test]
    fn flaky_scenario_has_more_variation() {
        let mut stable = ClimateSim::new(Scenario::Stable, 1e9);
        let mut flaky = ClimateSim::new(Scenario::Flaky, 1e9);

        let vs: Vec<f64> = collect(&mut stable, 300).iter().map(|s| s.temperature).collect();
        let vf: Vec<f64> = collect(&mut flaky, 300).iter().map(|s| s.temperature).collect();
        assert!(
            variance(&vf) > variance(&vs),
            "flaky variance ({:.3}) should exceed stable ({:.3})",
            variance(&vf),
            variance(&vs)
        );
    }

    #[test]
    fn scenario_from_str_lossy() {
        assert_eq!(Scenario::from_str_lossy("stable"), Scenario::Stable);
        assert_eq!(Scenario::from_str_lossy("FLAKY"), Scenario::Flaky);
        assert_eq!(Scenario::from_str_lossy(" Heatwave "), Scenario::Heatwave);
        assert_eq!(Scenario::from_str_lossy("drying"), Scenario::Stable);
        assert_eq!(Scenario::from_str_lossy(""), Scenario::Stable);
    }

    #[test]
    fn only_flaky_fails_requests() {
        assert_eq!(Scenario::Stable.failure_rate(), 0.0);
        assert_eq!(Scenario::Heatwave.failure_rate(), 0.0);
        assert!(Scenario::Flaky.failure_rate() > 0.0);
        assert_eq!(Scenario::Heatwave.to_string(), "heatwave");
    }

    #[test]
    fn approx_std_normal_has_zero_mean() {
        let n = 5000;
        let mean = (0..n).map(|_| approx_std_normal()).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.15, "mean should be near zero: {mean}");
    }
}
