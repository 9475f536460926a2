//! Environmental sensing: raw transducer values to engineering units.
//!
//! A failing sensor never fails the whole reading. Its field is left `None`
//! and the rest of the snapshot is still published.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

#[cfg(feature = "gpio")]
use crate::ads1115::Ads1115;
#[cfg(feature = "gpio")]
use crate::config::HardwareConfig;
#[cfg(feature = "gpio")]
use rppal::i2c::I2c;
#[cfg(feature = "gpio")]
use std::{thread, time::Duration};
#[cfg(feature = "gpio")]
use tracing::warn;

/// pH probe span mapped across the ADC range.
const PH_MAX: f64 = 14.0;

/// BH1750 counts per lux in high-resolution mode.
const BH1750_COUNTS_PER_LUX: f64 = 1.2;

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    /// 0..=100. The only field automation looks at.
    pub soil_moisture_pct: Option<u8>,
    pub ph: Option<f64>,
    pub light_lux: Option<f64>,
    pub taken_at: OffsetDateTime,
}

impl SensorReading {
    /// A reading with every sensor missing.
    pub fn empty(taken_at: OffsetDateTime) -> Self {
        Self {
            temperature_c: None,
            humidity_pct: None,
            soil_moisture_pct: None,
            ph: None,
            light_lux: None,
            taken_at,
        }
    }
}

pub trait SensorReader: Send {
    fn read(&mut self) -> SensorReading;

    /// Told after every tick whether the pump is running. Only the simulator
    /// uses it, to close the loop between watering and soil moisture.
    fn set_watering(&mut self, _active: bool) {}
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Soil moisture percent from a raw ADC value and the probe's dry/wet
/// calibration endpoints. Works for probes that read higher when dry
/// (capacitive) as well as lower. Clamped to 0..=100.
pub fn soil_percent(raw: i64, raw_dry: i64, raw_wet: i64) -> u8 {
    let range = raw_dry - raw_wet;
    if range == 0 {
        return 0; // degenerate calibration
    }
    let frac = (raw_dry - raw) as f64 / range as f64;
    (frac.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Linear pH from a raw ADC value, where `full_scale` maps to pH 14.
pub fn ph_from_raw(raw: i64, full_scale: i64) -> f64 {
    if full_scale <= 0 {
        return 0.0;
    }
    let clamped = raw.clamp(0, full_scale) as f64;
    round2(clamped * PH_MAX / full_scale as f64)
}

pub fn lux_from_raw(raw: u16) -> f64 {
    round2(f64::from(raw) / BH1750_COUNTS_PER_LUX)
}

// ---------------------------------------------------------------------------
// DHT22 through the kernel IIO driver
// ---------------------------------------------------------------------------

/// DHT22 exposed by the Linux `dht11` IIO driver (which also handles the
/// DHT22). Values are in milli-units under an `iio:deviceN` directory.
#[cfg_attr(not(feature = "gpio"), allow(dead_code))]
pub struct DhtIio {
    dir: PathBuf,
}

#[cfg_attr(not(feature = "gpio"), allow(dead_code))]
impl DhtIio {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `(temperature °C, relative humidity %)`.
    pub fn read(&self) -> Result<(f64, f64)> {
        let temp = read_milli(&self.dir.join("in_temp_input"))?;
        let hum = read_milli(&self.dir.join("in_humidityrelative_input"))?;
        Ok((round2(temp), round2(hum)))
    }
}

#[cfg_attr(not(feature = "gpio"), allow(dead_code))]
fn read_milli(path: &Path) -> Result<f64> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let milli: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("unexpected value {:?} in {}", raw.trim(), path.display()))?;
    Ok(milli as f64 / 1000.0)
}

// ---------------------------------------------------------------------------
// BH1750 light sensor (I2C)
// ---------------------------------------------------------------------------

#[cfg(feature = "gpio")]
const BH1750_ONE_TIME_HIGH_RES: u8 = 0x20;

/// Worst-case high-resolution measurement time.
#[cfg(feature = "gpio")]
const BH1750_MEASURE_WAIT: Duration = Duration::from_millis(180);

#[cfg(feature = "gpio")]
pub struct Bh1750 {
    i2c: I2c,
}

#[cfg(feature = "gpio")]
impl Bh1750 {
    pub fn new(addr: u16) -> Result<Self> {
        let mut i2c = I2c::new().context("bh1750: failed to open i2c bus")?;
        i2c.set_slave_address(addr)
            .with_context(|| format!("bh1750: bad address 0x{addr:02x}"))?;
        Ok(Self { i2c })
    }

    pub fn read_lux(&mut self) -> Result<f64> {
        self.i2c.write(&[BH1750_ONE_TIME_HIGH_RES])?;
        thread::sleep(BH1750_MEASURE_WAIT);
        let mut buf = [0u8; 2];
        self.i2c.read(&mut buf)?;
        Ok(lux_from_raw(u16::from_be_bytes(buf)))
    }
}

// ---------------------------------------------------------------------------
// Real sensor rig (requires rppal and Raspberry Pi hardware)
// ---------------------------------------------------------------------------

#[cfg(feature = "gpio")]
pub struct HardwareSensors {
    adc: Ads1115,
    soil_channel: usize,
    ph_channel: usize,
    soil_raw_dry: i64,
    soil_raw_wet: i64,
    ph_full_scale: i64,
    light: Option<Bh1750>,
    climate: Option<DhtIio>,
}

#[cfg(feature = "gpio")]
impl HardwareSensors {
    pub fn new(hw: &HardwareConfig) -> Result<Self> {
        let adc = Ads1115::new(hw.ads1115_addr)?;

        // A missing light sensor degrades to a null field, not a dead rig.
        let light = if hw.bh1750_enabled {
            match Bh1750::new(hw.bh1750_addr) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!("bh1750 unavailable, light_lux will be null: {e:#}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            adc,
            soil_channel: hw.soil_channel,
            ph_channel: hw.ph_channel,
            soil_raw_dry: hw.soil_raw_dry,
            soil_raw_wet: hw.soil_raw_wet,
            ph_full_scale: hw.ph_raw_full_scale,
            light,
            climate: hw.dht_iio_path.clone().map(DhtIio::new),
        })
    }
}

#[cfg(feature = "gpio")]
impl SensorReader for HardwareSensors {
    fn read(&mut self) -> SensorReading {
        let mut reading = SensorReading::empty(crate::telemetry::local_now());

        if let Some(dht) = &self.climate {
            match dht.read() {
                Ok((t, h)) => {
                    reading.temperature_c = Some(t);
                    reading.humidity_pct = Some(h);
                }
                Err(e) => warn!(sensor = "DHT22", "read failed: {e:#}"),
            }
        }

        match self.adc.read_channel(self.soil_channel) {
            Ok(raw) => {
                reading.soil_moisture_pct = Some(soil_percent(
                    i64::from(raw),
                    self.soil_raw_dry,
                    self.soil_raw_wet,
                ));
            }
            Err(e) => warn!(sensor = "SOIL_MOISTURE", "read failed: {e:#}"),
        }

        match self.adc.read_channel(self.ph_channel) {
            Ok(raw) => reading.ph = Some(ph_from_raw(i64::from(raw), self.ph_full_scale)),
            Err(e) => warn!(sensor = "PH_SENSOR", "read failed: {e:#}"),
        }

        if let Some(light) = &mut self.light {
            match light.read_lux() {
                Ok(lux) => reading.light_lux = Some(lux),
                Err(e) => warn!(sensor = "BH1750", "read failed: {e:#}"),
            }
        }

        reading
    }
}

// ===========================================================================
// Tests
// ===========================================================================
