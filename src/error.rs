//! Error types for the synthesis engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Projection faults. Unreachable when the magnitude repair is correct.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Electrode magnitudes not realizable: inequality {index} = {slack:.6}")]
    InvalidGeometry { index: usize, slack: f64 },

    #[error("Electrode magnitude {index} out of range: {value:.6}")]
    MagnitudeOutOfRange { index: usize, value: f64 },
}

/// Audio clock synchronisation faults
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClockError {
    #[error("Audio clock desync: offset drifted {drift:.3}s from running estimate")]
    Desync { drift: f64 },
}

/// Packet device faults
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device underrun: wrote {written} of {expected} bytes")]
    Underrun { written: usize, expected: usize },

    #[error("Packet encoding failed: {0}")]
    Encoding(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Channel count mismatch: algorithm needs {needed}, device offers {available}")]
    ChannelMismatch { needed: usize, available: usize },

    #[error("Stream aborted: {0}")]
    Aborted(#[from] ClockError),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} = {value} outside valid range [{min}, {max}]")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;
