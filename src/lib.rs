//! # Phase Stim
//!
//! Waveform synthesis and timing for multi-electrode stimulation hardware.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                     Axis Catalog (axis::catalog)                      │
//! │   position.*   intensity.e*   volume.*   carrier.*   pulse.*   ...    │
//! │        timestamped samples, interpolated per output frame             │
//! └──────────────┬──────────────────────────────────────┬─────────────────┘
//!                │                                      │
//!                ▼                                      ▼
//! ┌──────────────────────────────┐      ┌──────────────────────────────────┐
//! │    AUDIO DEVICES (synth)     │      │   PULSE DEVICES (device)         │
//! │                              │      │                                  │
//! │  ┌────────────────────────┐  │      │  ┌────────────────────────────┐  │
//! │  │ Clock Sync             │  │      │  │ Packet Generator           │  │
//! │  │ (audio::clock)         │  │      │  │ duty → pulse duration,     │  │
//! │  │ steady → command time  │  │      │  │ position → intensities     │  │
//! │  └───────────┬────────────┘  │      │  └─────────────┬──────────────┘  │
//! │              ▼               │      │                ▼                 │
//! │  ┌────────────────────────┐  │      │  ┌────────────────────────────┐  │
//! │  │ Continuous / Pulse     │  │      │  │ Packet Scheduler           │  │
//! │  │ 3-, 4-, 5-phase        │  │      │  │ regenerate at a fraction   │  │
//! │  │ (math::projection)     │  │      │  │ of the shortest queue      │  │
//! │  └───────────┬────────────┘  │      │  └─────────────┬──────────────┘  │
//! │              ▼               │      │                ▼                 │
//! │  ┌────────────────────────┐  │      │  ┌────────────────────────────┐  │
//! │  │ cpal Output Stream     │  │      │  │ Async Writer (tokio)       │  │
//! │  │ (audio::output)        │  │      │  │ one write per packet       │  │
//! │  └────────────────────────┘  │      │  └────────────────────────────┘  │
//! └──────────────────────────────┘      └──────────────────────────────────┘
//! ```

pub mod audio;
pub mod axis;
pub mod config;
pub mod device;
pub mod error;
pub mod math;
pub mod synth;
pub mod time;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio output
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Output channels of a stereo device, enough for 3-phase
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Interval between status lines in the binaries, in seconds
    pub const STATUS_INTERVAL_SECS: u64 = 5;
}
