//! Audio clock synchronisation
//!
//! Three clocks meet in the output callback:
//!
//! - steady clock: sample count / sample rate, strictly increasing, no jitter
//! - system time: wall clock read at the callback, jittery
//! - command time: steady clock plus a slowly slewed offset, used to sample
//!   the control axes
//!
//! The offset between the steady clock and system time is low-pass filtered
//! and slewed at a bounded rate so command time never jumps. A jump larger
//! than the configured limit means the two clocks no longer describe the same
//! stream and synthesis must stop.

use crate::config::ClockConfig;
use crate::error::ClockError;

/// Upper bound for `ClockConfig::filter_len`
pub const MAX_FILTER_LEN: usize = 64;

/// Steady/command clock state for one output stream
#[derive(Debug, Clone)]
pub struct ClockSync {
    sample_rate: f64,
    config: ClockConfig,
    frames_played: u64,
    steady: Vec<f64>,
    command: Vec<f64>,
    running_offset: Option<f64>,
    history: [f64; MAX_FILTER_LEN],
    history_len: usize,
    history_pos: usize,
    last_adjustment: f64,
}

impl ClockSync {
    pub fn new(sample_rate: u32, config: ClockConfig) -> Self {
        Self::with_capacity(sample_rate, config, 0)
    }

    /// Preallocate the clock vectors for callbacks of up to `frames` frames
    pub fn with_capacity(sample_rate: u32, config: ClockConfig, frames: usize) -> Self {
        let config = ClockConfig {
            filter_len: config.filter_len.clamp(1, MAX_FILTER_LEN),
            ..config
        };
        Self {
            sample_rate: sample_rate.max(1) as f64,
            config,
            frames_played: 0,
            steady: Vec::with_capacity(frames),
            command: Vec::with_capacity(frames),
            running_offset: None,
            history: [0.0; MAX_FILTER_LEN],
            history_len: 0,
            history_pos: 0,
            last_adjustment: 0.0,
        }
    }

    /// Advance by one callback of `frames` frames.
    ///
    /// `system_time` is the wall clock at the callback, `latency` the time
    /// until the first frame is heard. On desync the state is left untouched
    /// and the clock vectors keep their previous contents.
    pub fn process(
        &mut self,
        frames: usize,
        system_time: f64,
        latency: f64,
    ) -> Result<(), ClockError> {
        let start = self.frames_played as f64 / self.sample_rate;
        let steady_end = (self.frames_played + frames as u64) as f64 / self.sample_rate;
        let offset = system_time - steady_end;

        let old = match self.running_offset {
            Some(running) => {
                let drift = offset - running;
                if !(drift.abs() <= self.config.max_desync_secs) {
                    return Err(ClockError::Desync { drift });
                }
                running
            }
            None => {
                self.history[..self.config.filter_len].fill(offset);
                self.history_len = self.config.filter_len;
                offset
            }
        };

        self.push_history(offset);
        let target = self.filtered_offset();
        let max_step = frames as f64 / self.sample_rate * self.config.slew_rate;
        let adjustment = (target - old).clamp(-max_step, max_step);
        let new = old + adjustment;

        self.steady.clear();
        self.command.clear();
        let inv_frames = if frames > 0 { 1.0 / frames as f64 } else { 0.0 };
        for i in 0..frames {
            let steady = start + i as f64 / self.sample_rate;
            let ramp = old + (new - old) * i as f64 * inv_frames;
            self.steady.push(steady);
            self.command.push(steady + ramp + latency);
        }

        self.running_offset = Some(new);
        self.last_adjustment = adjustment;
        self.frames_played += frames as u64;
        Ok(())
    }

    fn push_history(&mut self, offset: f64) {
        let len = self.config.filter_len;
        self.history[self.history_pos] = offset;
        self.history_pos = (self.history_pos + 1) % len;
        self.history_len = (self.history_len + 1).min(len);
    }

    fn filtered_offset(&self) -> f64 {
        let values = &self.history[..self.history_len];
        values.iter().sum::<f64>() / values.len().max(1) as f64
    }

    /// Steady clock of the last processed callback, one entry per frame
    pub fn steady_clock(&self) -> &[f64] {
        &self.steady
    }

    /// Command time of the last processed callback, one entry per frame
    pub fn command_time(&self) -> &[f64] {
        &self.command
    }

    /// Offset change applied in the last callback
    pub fn last_adjustment(&self) -> f64 {
        self.last_adjustment
    }

    /// Current running offset, `None` before the first callback
    pub fn offset(&self) -> Option<f64> {
        self.running_offset
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Forget the offset estimate; the next callback starts over
    pub fn reset(&mut self) {
        self.running_offset = None;
        self.history_len = 0;
        self.history_pos = 0;
        self.last_adjustment = 0.0;
    }
}
