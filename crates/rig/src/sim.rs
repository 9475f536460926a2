//! Simulated greenhouse sensors for running the rig without hardware.
//!
//! Soil moisture follows a random walk with drying drift and mean reversion,
//! and climbs while the pump runs, so automation can be watched closing the
//! loop. The other channels wander around plausible greenhouse values on a
//! day/night cycle. Any channel can drop out for a sample to exercise the
//! missing-field path.

use anyhow::bail;
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::sensors::{round2, SensorReader, SensorReading};
use crate::telemetry::local_now;

/// Zero-mean Gaussian noise (Box-Muller).
fn noise(sigma: f64) -> f64 {
    // 1 - U keeps the log argument in (0, 1].
    let u1 = 1.0 - fastrand::f64();
    let u2 = fastrand::f64();
    sigma * (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Soil behaviour preset, picked with `SIM_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scenario {
    /// Starts mid-band and dries steadily; the pump cycles regularly.
    #[default]
    Drying,
    /// Hovers inside the hysteresis band; automation stays quiet.
    Stable,
    /// Noisy, spiky, and drops channels often.
    Flaky,
    /// Starts soaked and dries slowly.
    Wet,
}

const SCENARIO_NAMES: [(Scenario, &str); 4] = [
    (Scenario::Drying, "drying"),
    (Scenario::Stable, "stable"),
    (Scenario::Flaky, "flaky"),
    (Scenario::Wet, "wet"),
];

/// How the simulated bed behaves under one scenario. Moisture values are
/// percent, rates are per sample.
#[derive(Debug, Clone, Copy)]
struct SoilProfile {
    start: f64,
    drift: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    spike_prob: f32,
    spike_sigma: f64,
    dropout_prob: f32,
}

impl Scenario {
    fn name(self) -> &'static str {
        SCENARIO_NAMES
            .iter()
            .find(|(s, _)| *s == self)
            .map_or("drying", |&(_, name)| name)
    }

    fn profile(self) -> SoilProfile {
        let p = |start: f64,
                 drift: f64,
                 walk_sigma: f64,
                 mean_reversion: f64,
                 spike_prob: f32,
                 spike_sigma: f64,
                 dropout_prob: f32| {
            SoilProfile {
                start,
                drift,
                walk_sigma,
                mean_reversion,
                spike_prob,
                spike_sigma,
                dropout_prob,
            }
        };
        match self {
            Self::Drying => p(55.0, -0.8, 0.4, 0.005, 0.02, 8.0, 0.01),
            Self::Stable => p(55.0, -0.05, 0.2, 0.05, 0.005, 4.0, 0.005),
            Self::Flaky => p(50.0, -0.5, 1.5, 0.01, 0.10, 15.0, 0.10),
            Self::Wet => p(85.0, -0.2, 0.3, 0.005, 0.01, 5.0, 0.01),
        }
    }
}

impl FromStr for Scenario {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let wanted = s.trim();
        match SCENARIO_NAMES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(wanted))
        {
            Some((scenario, _)) => Ok(*scenario),
            None => bail!("unknown sim scenario {wanted:?}"),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct SimulatedRig {
    /// True soil moisture in percent; evolves every sample.
    soil: f64,
    profile: SoilProfile,
    /// Moisture the walk is pulled back towards.
    center: f64,
    watering: bool,
    /// Percent gained per sample while the pump runs.
    wet_rate: f64,
    diurnal_period_s: f64,
}

impl SimulatedRig {
    /// `diurnal_period_s` sets the day/night cycle length: 600 for quick
    /// iteration, 86400 for real time.
    pub fn new(scenario: Scenario, diurnal_period_s: f64) -> Self {
        let profile = scenario.profile();
        Self {
            soil: profile.start,
            profile,
            center: 55.0,
            watering: false,
            wet_rate: 6.0,
            diurnal_period_s,
        }
    }

    /// Current true soil moisture, before noise and spikes.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn soil(&self) -> f64 {
        self.soil
    }

    fn dropped(&self) -> bool {
        fastrand::f32() < self.profile.dropout_prob
    }

    /// Sinusoidal day/night phase in -1..=1, peaking mid-"afternoon".
    fn daylight(&self) -> f64 {
        let now_s = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        (2.0 * PI * now_s / self.diurnal_period_s).sin()
    }

    fn sample_soil(&mut self) -> u8 {
        let p = self.profile;
        let pull = p.mean_reversion * (self.center - self.soil);
        let wet = if self.watering { self.wet_rate } else { 0.0 };
        self.soil = (self.soil + p.drift + pull + noise(p.walk_sigma) + wet).clamp(0.0, 100.0);

        let spike = if fastrand::f32() < p.spike_prob {
            noise(p.spike_sigma)
        } else {
            0.0
        };
        (self.soil + spike).round().clamp(0.0, 100.0) as u8
    }
}

impl SensorReader for SimulatedRig {
    fn read(&mut self) -> SensorReading {
        let mut reading = SensorReading::empty(local_now());
        let day = self.daylight();

        // Soil evolves even when its read drops out.
        let soil = self.sample_soil();
        if !self.dropped() {
            reading.soil_moisture_pct = Some(soil);
        }
        if !self.dropped() {
            reading.temperature_c = Some(round2(27.0 + 4.0 * day + noise(0.3)));
            reading.humidity_pct =
                Some(round2((70.0 - 10.0 * day + noise(1.0)).clamp(0.0, 100.0)));
        }
        if !self.dropped() {
            reading.ph = Some(round2((6.3 + noise(0.05)).clamp(0.0, 14.0)));
        }
        if !self.dropped() {
            reading.light_lux =
                Some(round2((20_000.0 * day + noise(200.0)).max(0.0)));
        }

        reading
    }

    fn set_watering(&mut self, active: bool) {
        self.watering = active;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
