//! Engine configuration
//!
//! Loaded from TOML. Every field has a serde default so partial files work.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crossbeam::atomic::AtomicCell;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::device::packet::SensationShape;
use crate::error::ConfigError;
use crate::math::threephase::SqueezeStrategy;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub safety: SafetyLimits,
    #[serde(default)]
    pub axis: AxisConfig,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub pulse: PulseConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub projection: ProjectionConfig,
    #[serde(default)]
    pub inactivity: InactivityConfig,
}

impl AppConfig {
    /// Parse from a TOML string
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Serialize to a TOML string
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load from a file and validate
    pub fn load(path: &Path) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        config.validate()?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load from the platform config directory, falling back to defaults
    pub fn load_or_default() -> crate::Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                tracing::info!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// `<config dir>/phase-stim/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "phase-stim", "phase-stim")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Strict validation of the immutable safety and timing settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.safety.validate()?;
        self.clock.validate()?;
        self.axis.validate()?;
        self.inactivity.validate()?;
        self.pulse.validate()?;
        self.device.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Output device id as listed by `audio::device::list_output_devices`
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default = "AudioConfig::default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default)]
    pub buffer_size: Option<u32>,
    /// Used when the host does not report playback timestamps
    #[serde(default = "AudioConfig::default_latency_ms")]
    pub latency_ms: f64,
}

impl AudioConfig {
    fn default_sample_rate() -> u32 {
        crate::constants::DEFAULT_SAMPLE_RATE
    }
    fn default_latency_ms() -> f64 {
        40.0
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            sample_rate: Self::default_sample_rate(),
            buffer_size: None,
            latency_ms: Self::default_latency_ms(),
        }
    }
}

/// Hard output limits. Enforced by clamping regardless of axis values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SafetyLimits {
    #[serde(default = "SafetyLimits::default_min_carrier_hz")]
    pub min_carrier_hz: f64,
    #[serde(default = "SafetyLimits::default_max_carrier_hz")]
    pub max_carrier_hz: f64,
    /// Peak waveform amplitude, 1.0 is full scale
    #[serde(default = "SafetyLimits::default_max_amplitude")]
    pub max_amplitude: f64,
}

impl SafetyLimits {
    fn default_min_carrier_hz() -> f64 {
        300.0
    }
    fn default_max_carrier_hz() -> f64 {
        2000.0
    }
    fn default_max_amplitude() -> f64 {
        1.0
    }

    pub fn clamp_carrier(&self, hz: f64) -> f64 {
        if hz.is_nan() {
            return self.min_carrier_hz;
        }
        hz.clamp(self.min_carrier_hz, self.max_carrier_hz)
    }

    pub fn amplitude(&self) -> f64 {
        self.max_amplitude.clamp(0.0, 1.0)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("safety.min_carrier_hz", self.min_carrier_hz, 1.0, 100_000.0)?;
        check_range(
            "safety.max_carrier_hz",
            self.max_carrier_hz,
            self.min_carrier_hz,
            100_000.0,
        )?;
        check_range("safety.max_amplitude", self.max_amplitude, 0.0, 1.0)
    }
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            min_carrier_hz: Self::default_min_carrier_hz(),
            max_carrier_hz: Self::default_max_carrier_hz(),
            max_amplitude: Self::default_max_amplitude(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Samples older than this are pruned
    #[serde(default = "AxisConfig::default_retention_secs")]
    pub retention_secs: f64,
    /// Pruning starts once an axis holds more samples than this
    #[serde(default = "AxisConfig::default_prune_threshold")]
    pub prune_threshold: usize,
}

impl AxisConfig {
    fn default_retention_secs() -> f64 {
        10.0
    }
    fn default_prune_threshold() -> usize {
        1000
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("axis.retention_secs", self.retention_secs, 0.0, 86_400.0)?;
        check_range(
            "axis.prune_threshold",
            self.prune_threshold as f64,
            2.0,
            1_000_000.0,
        )
    }
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            retention_secs: Self::default_retention_secs(),
            prune_threshold: Self::default_prune_threshold(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Offset jump that aborts the stream
    #[serde(default = "ClockConfig::default_max_desync_secs")]
    pub max_desync_secs: f64,
    /// Maximum correction in seconds per second of audio
    #[serde(default = "ClockConfig::default_slew_rate")]
    pub slew_rate: f64,
    /// Number of callbacks averaged by the offset filter
    #[serde(default = "ClockConfig::default_filter_len")]
    pub filter_len: usize,
}

impl ClockConfig {
    fn default_max_desync_secs() -> f64 {
        1.0
    }
    fn default_slew_rate() -> f64 {
        0.02
    }
    fn default_filter_len() -> usize {
        8
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("clock.max_desync_secs", self.max_desync_secs, 0.001, 60.0)?;
        check_range("clock.slew_rate", self.slew_rate, 0.0, 1.0)?;
        check_range(
            "clock.filter_len",
            self.filter_len as f64,
            1.0,
            crate::audio::clock::MAX_FILTER_LEN as f64,
        )
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            max_desync_secs: Self::default_max_desync_secs(),
            slew_rate: Self::default_slew_rate(),
            filter_len: Self::default_filter_len(),
        }
    }
}

/// Bounds for the pulse-based audio mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PulseConfig {
    #[serde(default = "PulseConfig::default_min_pulse_hz")]
    pub min_pulse_hz: f64,
    #[serde(default = "PulseConfig::default_max_pulse_hz")]
    pub max_pulse_hz: f64,
    /// Upper bound on burst length in carrier cycles
    #[serde(default = "PulseConfig::default_max_width_cycles")]
    pub max_width_cycles: f64,
    /// Upper bound on the interval jitter fraction
    #[serde(default = "PulseConfig::default_max_interval_random")]
    pub max_interval_random: f64,
}

impl PulseConfig {
    fn default_min_pulse_hz() -> f64 {
        1.0
    }
    fn default_max_pulse_hz() -> f64 {
        300.0
    }
    fn default_max_width_cycles() -> f64 {
        100.0
    }
    fn default_max_interval_random() -> f64 {
        0.5
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("pulse.min_pulse_hz", self.min_pulse_hz, 0.01, 1000.0)?;
        check_range("pulse.max_pulse_hz", self.max_pulse_hz, self.min_pulse_hz, 1000.0)?;
        check_range("pulse.max_width_cycles", self.max_width_cycles, 1.0, 10_000.0)?;
        check_range(
            "pulse.max_interval_random",
            self.max_interval_random,
            0.0,
            1.0,
        )
    }
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            min_pulse_hz: Self::default_min_pulse_hz(),
            max_pulse_hz: Self::default_max_pulse_hz(),
            max_width_cycles: Self::default_max_width_cycles(),
            max_interval_random: Self::default_max_interval_random(),
        }
    }
}

/// Frequency band of one packet-device channel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ChannelBand {
    pub min_hz: f64,
    pub max_hz: f64,
}

impl ChannelBand {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("device.channels.min_hz", self.min_hz, 1.0, 1000.0)?;
        check_range("device.channels.max_hz", self.max_hz, self.min_hz, 1000.0)
    }
}

impl Default for ChannelBand {
    fn default() -> Self {
        Self {
            min_hz: 10.0,
            max_hz: 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Fraction of the shortest remaining channel duration after which the
    /// next packet is generated
    #[serde(default = "DeviceConfig::default_regenerate_fraction")]
    pub regenerate_fraction: f64,
    #[serde(default = "DeviceConfig::default_channels")]
    pub channels: Vec<ChannelBand>,
    #[serde(default)]
    pub sensation: SensationShape,
}

impl DeviceConfig {
    fn default_channels() -> Vec<ChannelBand> {
        vec![ChannelBand::default(); 2]
    }
    fn default_regenerate_fraction() -> f64 {
        0.8
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "device.regenerate_fraction",
            self.regenerate_fraction,
            0.05,
            1.0,
        )?;
        check_range("device.channels", self.channels.len() as f64, 1.0, 3.0)?;
        for band in &self.channels {
            band.validate()?;
        }
        self.sensation.validate()
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            regenerate_fraction: Self::default_regenerate_fraction(),
            channels: Self::default_channels(),
            sensation: SensationShape::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProjectionConfig {
    #[serde(default)]
    pub squeeze: SqueezeStrategy,
}

/// Automatic volume reduction while the position stands still
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InactivityConfig {
    #[serde(default = "InactivityConfig::default_enabled")]
    pub enabled: bool,
    /// Seconds without movement before the volume ramps down
    #[serde(default = "InactivityConfig::default_idle_secs")]
    pub idle_secs: f64,
    /// Volume reached after the ramp
    #[serde(default = "InactivityConfig::default_volume")]
    pub volume: f64,
    #[serde(default = "InactivityConfig::default_ramp_secs")]
    pub ramp_secs: f64,
    /// Position change that counts as movement
    #[serde(default = "InactivityConfig::default_threshold")]
    pub threshold: f64,
}

impl InactivityConfig {
    fn default_enabled() -> bool {
        true
    }
    fn default_idle_secs() -> f64 {
        2.0
    }
    fn default_volume() -> f64 {
        0.5
    }
    fn default_ramp_secs() -> f64 {
        2.0
    }
    fn default_threshold() -> f64 {
        0.05
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("inactivity.idle_secs", self.idle_secs, 0.0, 3600.0)?;
        check_range("inactivity.volume", self.volume, 0.0, 1.0)?;
        check_range("inactivity.ramp_secs", self.ramp_secs, 0.0, 3600.0)?;
        check_range("inactivity.threshold", self.threshold, 0.0, 2.0)
    }
}

impl Default for InactivityConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            idle_secs: Self::default_idle_secs(),
            volume: Self::default_volume(),
            ramp_secs: Self::default_ramp_secs(),
            threshold: Self::default_threshold(),
        }
    }
}

fn check_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_nan() || value < min || value > max {
        return Err(ConfigError::OutOfRange {
            name,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Clamp-and-continue guard for runtime scalars.
///
/// `clamp` never logs, so it is safe on the audio thread. The first
/// out-of-range value is parked until the owner collects it with
/// [`ClampWarning::take_pending`] or [`ClampWarning::log_pending`].
#[derive(Debug)]
pub struct ClampWarning {
    name: &'static str,
    fired: AtomicBool,
    pending: AtomicBool,
    value: AtomicCell<f64>,
}

impl ClampWarning {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            fired: AtomicBool::new(false),
            pending: AtomicBool::new(false),
            value: AtomicCell::new(0.0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn clamp(&self, value: f64, min: f64, max: f64) -> f64 {
        let clamped = if value.is_nan() { min } else { value.clamp(min, max) };
        if clamped != value && !self.fired.swap(true, Ordering::Relaxed) {
            self.value.store(value);
            self.pending.store(true, Ordering::Release);
        }
        clamped
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Relaxed)
    }

    /// Name and offending value of a clamp not yet reported. Returns `Some`
    /// at most once per guard.
    pub fn take_pending(&self) -> Option<(&'static str, f64)> {
        if self.pending.swap(false, Ordering::Acquire) {
            Some((self.name, self.value.load()))
        } else {
            None
        }
    }

    /// Log a pending clamp. Not for the audio thread.
    pub fn log_pending(&self) {
        if let Some((name, value)) = self.take_pending() {
            tracing::warn!("{} = {} outside valid range, clamping", name, value);
        }
    }
}
