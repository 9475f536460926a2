//! TOML config file loading, environment overrides, and validation.
//!
//! Every key has a default, so an empty or missing file yields a working
//! rig. Values are validated once at startup and turned into the immutable
//! policies the controllers and arbiter run on.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::actuators::SERVO_MAX_ANGLE;
use crate::arbiter::Thresholds;
use crate::control::LoopTiming;
use crate::controller::SafetyPolicy;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device_id: String,
    pub mqtt: MqttConfig,
    pub automation: AutomationConfig,
    pub safety: SafetyConfig,
    pub timing: TimingConfig,
    pub lid: LidConfig,
    pub hardware: HardwareConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive_sec: u64,
    pub sensors_topic: String,
    pub status_topic: String,
    pub commands_topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Soil moisture hysteresis band, in percent.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub dry_threshold: i64,
    pub wet_threshold: i64,
}

/// All values in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub pump_max_runtime: u64,
    pub pump_min_off: u64,
    pub lift_max_runtime: u64,
    pub lift_min_off: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Seconds between sensor samples.
    pub read_interval: u64,
    pub tick_ms: u64,
    /// Pause after a failed tick before the next one.
    pub fault_retry_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LidConfig {
    pub open_angle: i64,
    pub close_angle: i64,
}

/// Pin numbers are BCM. Only read when built with `gpio`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub pump_pin: i64,
    pub lift_left_pin: i64,
    pub lift_right_pin: i64,
    pub servo_left_pin: i64,
    pub servo_right_pin: i64,
    /// Relay boards that switch on a low level.
    pub active_low: bool,
    pub ads1115_addr: u16,
    pub soil_channel: usize,
    pub ph_channel: usize,
    pub soil_raw_dry: i64,
    pub soil_raw_wet: i64,
    /// ADC count that maps to pH 14.
    pub ph_raw_full_scale: i64,
    pub bh1750_enabled: bool,
    pub bh1750_addr: u16,
    /// IIO device directory of the kernel DHT driver, e.g.
    /// `/sys/bus/iio/devices/iio:device0`. Unset means no climate sensor.
    pub dht_iio_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: "esp32_chili_01".into(),
            mqtt: MqttConfig::default(),
            automation: AutomationConfig::default(),
            safety: SafetyConfig::default(),
            timing: TimingConfig::default(),
            lid: LidConfig::default(),
            hardware: HardwareConfig::default(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            keep_alive_sec: 30,
            sensors_topic: "esp32/chili/data".into(),
            status_topic: "esp32/chili/status".into(),
            commands_topic: "esp32/chili/cmd".into(),
            username: None,
            password: None,
        }
    }
}

impl Default for AutomationConfig {
    fn default() -> Self {
        let t = Thresholds::default();
        Self {
            dry_threshold: i64::from(t.dry),
            wet_threshold: i64::from(t.wet),
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            pump_max_runtime: 60,
            pump_min_off: 10,
            lift_max_runtime: 30,
            lift_min_off: 5,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            read_interval: 20,
            tick_ms: 1000,
            fault_retry_ms: 2000,
        }
    }
}

impl Default for LidConfig {
    fn default() -> Self {
        Self {
            open_angle: 90,
            close_angle: 0,
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            pump_pin: 13,
            lift_left_pin: 26,
            lift_right_pin: 25,
            servo_left_pin: 27,
            servo_right_pin: 14,
            active_low: false,
            ads1115_addr: 0x48,
            soil_channel: 0,
            ph_channel: 1,
            soil_raw_dry: 26000,
            soil_raw_wet: 12000,
            ph_raw_full_scale: 26400,
            bh1750_enabled: true,
            bh1750_addr: 0x23,
            dht_iio_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: &[i64] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

/// Maximum single-ended reading from the ADS1115 (15-bit unsigned).
const ADS1115_MAX: i64 = 32767;

/// Highest single-ended input (AIN3).
pub const ADS1115_MAX_CHANNEL: usize = 3;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate the whole config. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_identity(&mut errors);
        self.validate_automation(&mut errors);
        self.validate_timers(&mut errors);
        self.validate_lid(&mut errors);
        self.validate_hardware(&mut errors);

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

    fn validate_identity(&self, errors: &mut Vec<String>) {
        if self.device_id.trim().is_empty() {
            errors.push("device_id is empty".into());
        }
        if self.mqtt.host.trim().is_empty() {
            errors.push("mqtt.host is empty".into());
        }
        if self.mqtt.keep_alive_sec == 0 {
            errors.push("mqtt.keep_alive_sec must be positive".into());
        }
        for (name, topic) in [
            ("sensors_topic", &self.mqtt.sensors_topic),
            ("status_topic", &self.mqtt.status_topic),
            ("commands_topic", &self.mqtt.commands_topic),
        ] {
            if topic.trim().is_empty() {
                errors.push(format!("mqtt.{name} is empty"));
            }
        }
    }

    fn validate_automation(&self, errors: &mut Vec<String>) {
        let a = &self.automation;
        for (name, v) in [("dry_threshold", a.dry_threshold), ("wet_threshold", a.wet_threshold)] {
            if !(0..=100).contains(&v) {
                errors.push(format!("automation.{name} {v} out of range [0, 100]"));
            }
        }
        if a.dry_threshold >= a.wet_threshold {
            errors.push(format!(
                "automation.wet_threshold ({}) must be greater than dry_threshold ({})",
                a.wet_threshold, a.dry_threshold
            ));
        }
    }

    fn validate_timers(&self, errors: &mut Vec<String>) {
        let s = &self.safety;
        let t = &self.timing;
        for (name, v) in [
            ("safety.pump_max_runtime", s.pump_max_runtime),
            ("safety.pump_min_off", s.pump_min_off),
            ("safety.lift_max_runtime", s.lift_max_runtime),
            ("safety.lift_min_off", s.lift_min_off),
            ("timing.read_interval", t.read_interval),
            ("timing.tick_ms", t.tick_ms),
            ("timing.fault_retry_ms", t.fault_retry_ms),
        ] {
            if v == 0 {
                errors.push(format!("{name} must be positive"));
            }
        }

        // Sampling slower than the safety tick is the whole point of the split.
        if t.tick_ms > 0
            && t.read_interval > 0
            && Duration::from_secs(t.read_interval) < Duration::from_millis(t.tick_ms)
        {
            errors.push(format!(
                "timing.read_interval ({} s) is shorter than timing.tick_ms ({} ms)",
                t.read_interval, t.tick_ms
            ));
        }
    }

    fn validate_lid(&self, errors: &mut Vec<String>) {
        let max = i64::from(SERVO_MAX_ANGLE);
        for (name, v) in [("open_angle", self.lid.open_angle), ("close_angle", self.lid.close_angle)] {
            if !(0..=max).contains(&v) {
                errors.push(format!("lid.{name} {v} out of range [0, {max}]"));
            }
        }
    }

    fn validate_hardware(&self, errors: &mut Vec<String>) {
        let hw = &self.hardware;

        // ── GPIO pin whitelist ──────────────────────────────
        let mut seen_pins: HashSet<i64> = HashSet::new();
        for (name, pin) in [
            ("pump_pin", hw.pump_pin),
            ("lift_left_pin", hw.lift_left_pin),
            ("lift_right_pin", hw.lift_right_pin),
            ("servo_left_pin", hw.servo_left_pin),
            ("servo_right_pin", hw.servo_right_pin),
        ] {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "hardware.{name} {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            } else if !seen_pins.insert(pin) {
                errors.push(format!("hardware.{name} {pin} is already used by another output"));
            }
        }

        // ── ADC ─────────────────────────────────────────────
        for (name, ch) in [("soil_channel", hw.soil_channel), ("ph_channel", hw.ph_channel)] {
            if ch > ADS1115_MAX_CHANNEL {
                errors.push(format!(
                    "hardware.{name} {ch} out of range [0, {ADS1115_MAX_CHANNEL}]"
                ));
            }
        }
        if hw.soil_channel == hw.ph_channel {
            errors.push(format!(
                "hardware.soil_channel and ph_channel are both AIN{}",
                hw.soil_channel
            ));
        }

        for (name, v) in [("soil_raw_dry", hw.soil_raw_dry), ("soil_raw_wet", hw.soil_raw_wet)] {
            if !(0..=ADS1115_MAX).contains(&v) {
                errors.push(format!(
                    "hardware.{name} {v} out of ADS1115 range [0, {ADS1115_MAX}]"
                ));
            }
        }
        if hw.soil_raw_dry == hw.soil_raw_wet {
            errors.push(format!(
                "hardware.soil_raw_dry and soil_raw_wet are both {}: calibration range is zero",
                hw.soil_raw_dry
            ));
        }
        if hw.ph_raw_full_scale <= 0 || hw.ph_raw_full_scale > ADS1115_MAX {
            errors.push(format!(
                "hardware.ph_raw_full_scale {} out of ADS1115 range (0, {ADS1115_MAX}]",
                hw.ph_raw_full_scale
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Derived values
// ---------------------------------------------------------------------------

impl Config {
    /// Only meaningful on a validated config.
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            dry: self.automation.dry_threshold.clamp(0, 100) as u8,
            wet: self.automation.wet_threshold.clamp(0, 100) as u8,
        }
    }

    pub fn pump_policy(&self) -> SafetyPolicy {
        SafetyPolicy {
            max_runtime: Duration::from_secs(self.safety.pump_max_runtime),
            min_off: Duration::from_secs(self.safety.pump_min_off),
        }
    }

    pub fn lift_policy(&self) -> SafetyPolicy {
        SafetyPolicy {
            max_runtime: Duration::from_secs(self.safety.lift_max_runtime),
            min_off: Duration::from_secs(self.safety.lift_min_off),
        }
    }

    pub fn loop_timing(&self) -> LoopTiming {
        LoopTiming {
            tick: Duration::from_millis(self.timing.tick_ms),
            read_interval: Duration::from_secs(self.timing.read_interval),
            fault_retry: Duration::from_millis(self.timing.fault_retry_ms),
        }
    }

    pub fn lid_angles(&self) -> (u8, u8) {
        let max = i64::from(SERVO_MAX_ANGLE);
        (
            self.lid.open_angle.clamp(0, max) as u8,
            self.lid.close_angle.clamp(0, max) as u8,
        )
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

impl Config {
    /// Apply `MQTT_HOST`, `MQTT_PORT` and `DEVICE_ID` from `lookup`. A port
    /// that does not parse is an error rather than a silent default.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.mqtt.port = port
                .trim()
                .parse()
                .with_context(|| format!("MQTT_PORT is not a valid port: {port}"))?;
        }
        if let Some(id) = lookup("DEVICE_ID") {
            self.device_id = id;
        }
        Ok(())
    }
}

/// Read and parse a TOML config file; a missing file means all defaults.
/// Environment overrides are applied before validation.
pub fn load(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config: {}", path.display()))?
    } else {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    config.apply_overrides(|key| std::env::var(key).ok())?;
    config
        .validate()
        .with_context(|| format!("invalid config: {}", path.display()))?;

    tracing::info!(
        device_id = %config.device_id,
        broker = %format_args!("{}:{}", config.mqtt.host, config.mqtt.port),
        "config loaded"
    );
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_empty_config_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.device_id, "esp32_chili_01");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.sensors_topic, "esp32/chili/data");
        assert_eq!(config.mqtt.status_topic, "esp32/chili/status");
        assert_eq!(config.mqtt.commands_topic, "esp32/chili/cmd");
        assert_eq!(config.automation.dry_threshold, 40);
        assert_eq!(config.automation.wet_threshold, 70);
        assert_eq!(config.timing.read_interval, 20);
        config.validate().unwrap();
    }

    #[test]
    fn parse_partial_config_keeps_other_defaults() {
        let toml_str = r#"
device_id = "greenhouse_02"

[mqtt]
host = "broker.lan"

[safety]
pump_max_runtime = 45

[hardware]
active_low = true
dht_iio_path = "/sys/bus/iio/devices/iio:device0"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.device_id, "greenhouse_02");
        assert_eq!(config.mqtt.host, "broker.lan");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.safety.pump_max_runtime, 45);
        assert_eq!(config.safety.pump_min_off, 10);
        assert!(config.hardware.active_low);
        assert_eq!(config.hardware.pump_pin, 13);
        assert_eq!(
            config.hardware.dht_iio_path.as_deref(),
            Some(Path::new("/sys/bus/iio/devices/iio:device0"))
        );
        config.validate().unwrap();
    }

    #[test]
    fn sample_file_matches_defaults() {
        let config: Config = toml::from_str(include_str!("../rig.toml")).unwrap();
        config.validate().unwrap();

        let defaults = Config::default();
        assert_eq!(config.device_id, defaults.device_id);
        assert_eq!(config.pump_policy(), defaults.pump_policy());
        assert_eq!(config.lift_policy(), defaults.lift_policy());
        assert_eq!(config.thresholds(), defaults.thresholds());
        assert_eq!(config.loop_timing(), defaults.loop_timing());
        assert_eq!(config.hardware.ads1115_addr, 0x48);
        assert_eq!(config.hardware.bh1750_addr, 0x23);
    }

    #[test]
    fn parse_rejects_wrong_types() {
        assert!(toml::from_str::<Config>("[mqtt]\nport = \"eighteen\"").is_err());
    }

    // -- Derived values ---------------------------------------------------

    #[test]
    fn default_policies() {
        let cfg = Config::default();
        assert_eq!(
            cfg.pump_policy(),
            SafetyPolicy {
                max_runtime: Duration::from_secs(60),
                min_off: Duration::from_secs(10),
            }
        );
        assert_eq!(
            cfg.lift_policy(),
            SafetyPolicy {
                max_runtime: Duration::from_secs(30),
                min_off: Duration::from_secs(5),
            }
        );
        assert_eq!(cfg.thresholds(), Thresholds { dry: 40, wet: 70 });
        assert_eq!(cfg.lid_angles(), (90, 0));
    }

    #[test]
    fn default_loop_timing() {
        let t = Config::default().loop_timing();
        assert_eq!(t.tick, Duration::from_secs(1));
        assert_eq!(t.read_interval, Duration::from_secs(20));
        assert_eq!(t.fault_retry, Duration::from_secs(2));
    }

    // -- Overrides --------------------------------------------------------

    #[test]
    fn env_overrides_replace_file_values() {
        let mut cfg = Config::default();
        cfg.apply_overrides(|key| match key {
            "MQTT_HOST" => Some("10.0.0.5".into()),
            "MQTT_PORT" => Some("8883".into()),
            "DEVICE_ID" => Some("rig_b".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.mqtt.host, "10.0.0.5");
        assert_eq!(cfg.mqtt.port, 8883);
        assert_eq!(cfg.device_id, "rig_b");
    }

    #[test]
    fn env_override_bad_port_is_an_error() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_overrides(|key| (key == "MQTT_PORT").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(format!("{err:#}").contains("MQTT_PORT"));
    }

    #[test]
    fn no_overrides_leaves_config_alone() {
        let mut cfg = Config::default();
        cfg.apply_overrides(|_| None).unwrap();
        assert_eq!(cfg.mqtt.host, "localhost");
    }

    // -- Load -------------------------------------------------------------

    #[test]
    fn load_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join("greenhouse-rig-no-such-config.toml");
        let cfg = load(&path).unwrap();
        assert_eq!(cfg.safety.lift_max_runtime, 30);
    }

    #[test]
    fn load_invalid_file_is_an_error() {
        let path = std::env::temp_dir().join(format!(
            "greenhouse-rig-bad-config-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[automation]\ndry_threshold = 80\nwet_threshold = 20\n").unwrap();
        let err = load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(format!("{err:#}").contains("must be greater than dry_threshold"));
    }

    // -- Validation: automation -------------------------------------------

    #[test]
    fn threshold_out_of_range() {
        let mut cfg = Config::default();
        cfg.automation.wet_threshold = 101;
        assert_validation_err(&cfg, "automation.wet_threshold 101 out of range");
    }

    #[test]
    fn dry_must_be_below_wet() {
        let mut cfg = Config::default();
        cfg.automation.dry_threshold = 70;
        assert_validation_err(&cfg, "must be greater than dry_threshold (70)");
    }

    // -- Validation: timers -----------------------------------------------

    #[test]
    fn zero_safety_timer_rejected() {
        let mut cfg = Config::default();
        cfg.safety.lift_min_off = 0;
        assert_validation_err(&cfg, "safety.lift_min_off must be positive");
    }

    #[test]
    fn zero_tick_rejected() {
        let mut cfg = Config::default();
        cfg.timing.tick_ms = 0;
        assert_validation_err(&cfg, "timing.tick_ms must be positive");
    }

    #[test]
    fn read_interval_shorter_than_tick_rejected() {
        let mut cfg = Config::default();
        cfg.timing.read_interval = 1;
        cfg.timing.tick_ms = 1500;
        assert_validation_err(&cfg, "is shorter than timing.tick_ms");
    }

    #[test]
    fn huge_read_interval_validates_without_overflow() {
        let cfg: Config = toml::from_str("[timing]\nread_interval = 9223372036854775807").unwrap();
        cfg.validate().unwrap();
        assert_eq!(
            cfg.loop_timing().read_interval,
            Duration::from_secs(9_223_372_036_854_775_807)
        );
    }

    // -- Validation: identity ---------------------------------------------

    #[test]
    fn empty_device_id_rejected() {
        let mut cfg = Config::default();
        cfg.device_id = "  ".into();
        assert_validation_err(&cfg, "device_id is empty");
    }

    #[test]
    fn empty_topic_rejected() {
        let mut cfg = Config::default();
        cfg.mqtt.commands_topic = "".into();
        assert_validation_err(&cfg, "mqtt.commands_topic is empty");
    }

    // -- Validation: lid --------------------------------------------------

    #[test]
    fn lid_angle_out_of_range() {
        let mut cfg = Config::default();
        cfg.lid.open_angle = 181;
        assert_validation_err(&cfg, "lid.open_angle 181 out of range");
    }

    #[test]
    fn lid_angle_boundaries_accepted() {
        let mut cfg = Config::default();
        cfg.lid.open_angle = 180;
        cfg.lid.close_angle = 0;
        cfg.validate().unwrap();
    }

    // -- Validation: hardware ---------------------------------------------

    #[test]
    fn gpio_pin_0_rejected() {
        let mut cfg = Config::default();
        cfg.hardware.pump_pin = 0;
        assert_validation_err(&cfg, "hardware.pump_pin 0 is not a valid BCM GPIO pin");
    }

    #[test]
    fn gpio_pin_28_rejected() {
        let mut cfg = Config::default();
        cfg.hardware.servo_right_pin = 28;
        assert_validation_err(&cfg, "not a valid BCM GPIO pin");
    }

    #[test]
    fn duplicate_gpio_rejected() {
        let mut cfg = Config::default();
        cfg.hardware.lift_right_pin = cfg.hardware.lift_left_pin;
        assert_validation_err(&cfg, "already used by another output");
    }

    #[test]
    fn adc_channel_out_of_range() {
        let mut cfg = Config::default();
        cfg.hardware.ph_channel = 4;
        assert_validation_err(&cfg, "hardware.ph_channel 4 out of range");
    }

    #[test]
    fn shared_adc_channel_rejected() {
        let mut cfg = Config::default();
        cfg.hardware.ph_channel = 0;
        assert_validation_err(&cfg, "are both AIN0");
    }

    #[test]
    fn soil_calibration_range_zero() {
        let mut cfg = Config::default();
        cfg.hardware.soil_raw_dry = 15000;
        cfg.hardware.soil_raw_wet = 15000;
        assert_validation_err(&cfg, "calibration range is zero");
    }

    #[test]
    fn soil_calibration_out_of_adc_range() {
        let mut cfg = Config::default();
        cfg.hardware.soil_raw_dry = 40000;
        assert_validation_err(&cfg, "soil_raw_dry 40000 out of ADS1115 range");
    }

    // -- Multiple errors reported at once ---------------------------------

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = Config::default();
        cfg.device_id = "".into();
        cfg.automation.dry_threshold = -1;
        cfg.safety.pump_max_runtime = 0;
        cfg.hardware.pump_pin = 1;

        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("device_id is empty"), "missing id error in: {msg}");
        assert!(msg.contains("dry_threshold -1"), "missing threshold error in: {msg}");
        assert!(msg.contains("pump_max_runtime"), "missing timer error in: {msg}");
        assert!(msg.contains("not a valid BCM GPIO pin"), "missing gpio error in: {msg}");
        assert!(msg.contains("4 errors"), "wrong count in: {msg}");
    }
}
