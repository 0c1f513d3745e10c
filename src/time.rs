//! Wall-clock sources
//!
//! Axes timestamp their samples and the clock synchroniser reads system time
//! through [`TimeSource`], so tests can drive time by hand.

use crossbeam::atomic::AtomicCell;
use std::sync::Arc;

/// Source of wall-clock time in seconds
pub trait TimeSource: Send + Sync {
    fn now(&self) -> f64;
}

/// Shared handle to a time source
pub type SharedTime = Arc<dyn TimeSource>;

/// System wall clock (seconds since the Unix epoch)
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> f64 {
        chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// Manually advanced clock for tests and offline rendering
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now: AtomicCell<f64>,
}

impl ManualTimeSource {
    pub fn new(start: f64) -> Self {
        Self {
            now: AtomicCell::new(start),
        }
    }

    pub fn set(&self, t: f64) {
        self.now.store(t);
    }

    pub fn advance(&self, dt: f64) {
        let t = self.now.load();
        self.now.store(t + dt);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> f64 {
        self.now.load()
    }
}

/// Default shared system clock
pub fn system_time() -> SharedTime {
    Arc::new(SystemTimeSource)
}
