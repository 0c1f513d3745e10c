//! Real-time audio output
//!
//! The stream lives on a dedicated thread because cpal streams are not
//! `Send` on every host. The callback runs the clock synchroniser and the
//! synthesizer. It never blocks or logs, and does not allocate for callbacks
//! up to the configured buffer size. Faults and clamped control values go
//! through a bounded channel to the owner.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam::atomic::AtomicCell;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::ChannelBuffers;
use crate::audio::clock::ClockSync;
use crate::audio::device::get_output_device;
use crate::config::{AudioConfig, ClockConfig};
use crate::error::{AudioError, ClockError};
use crate::synth::AudioAlgorithm;
use crate::time::SharedTime;

/// Frames preallocated for the clock and channel buffers when the host
/// picks the buffer size
const PREALLOCATED_FRAMES: usize = 4096;

/// Largest callback to preallocate for
pub fn callback_capacity(buffer_size: Option<u32>) -> usize {
    match buffer_size {
        Some(size) if size > 0 => size as usize,
        _ => PREALLOCATED_FRAMES,
    }
}

/// Something the callback could not handle itself
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Clocks diverged; the stream has stopped
    Desync(ClockError),
    /// Host reported a stream fault
    StreamError(String),
    /// A control value was out of range and has been clamped
    ConfigClamped { name: &'static str, value: f64 },
}

/// Counters shared with the callback
#[derive(Debug, Default)]
pub struct StreamStats {
    callbacks: AtomicU64,
    frames: AtomicU64,
    offset: AtomicCell<f64>,
    latency: AtomicCell<f64>,
}

impl StreamStats {
    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Running steady-to-system clock offset in seconds
    pub fn offset(&self) -> f64 {
        self.offset.load()
    }

    /// Output latency used in the last callback
    pub fn latency(&self) -> f64 {
        self.latency.load()
    }
}

/// Everything the output callback owns
pub struct RenderState {
    clock: ClockSync,
    algorithm: Box<dyn AudioAlgorithm>,
    buffers: ChannelBuffers,
    device_channels: usize,
    time: SharedTime,
    stats: Arc<StreamStats>,
    running: Arc<AtomicBool>,
    events: Sender<StreamEvent>,
}

impl RenderState {
    /// `max_frames` is the largest callback expected; buffers for it are
    /// allocated here.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sample_rate: u32,
        device_channels: usize,
        max_frames: usize,
        clock_config: ClockConfig,
        mut algorithm: Box<dyn AudioAlgorithm>,
        time: SharedTime,
        running: Arc<AtomicBool>,
        events: Sender<StreamEvent>,
    ) -> Self {
        algorithm.prepare(f64::from(sample_rate), max_frames);
        let buffers = ChannelBuffers::new(algorithm.channel_count(), max_frames);
        Self {
            clock: ClockSync::with_capacity(sample_rate, clock_config, max_frames),
            algorithm,
            buffers,
            device_channels: device_channels.max(1),
            time,
            stats: Arc::new(StreamStats::default()),
            running,
            events,
        }
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        self.stats.clone()
    }

    /// Fill one interleaved device buffer. Writes silence once stopped.
    pub fn render(&mut self, data: &mut [f32], latency: f64) {
        if !self.running.load(Ordering::Relaxed) {
            data.fill(0.0);
            return;
        }

        let frames = data.len() / self.device_channels;
        if let Err(e) = self.clock.process(frames, self.time.now(), latency) {
            data.fill(0.0);
            self.running.store(false, Ordering::SeqCst);
            let _ = self.events.try_send(StreamEvent::Desync(e));
            return;
        }

        self.buffers.prepare(frames);
        self.algorithm.generate_audio(
            self.clock.sample_rate(),
            self.clock.steady_clock(),
            self.clock.command_time(),
            &mut self.buffers,
        );
        self.buffers.interleave_into(data, self.device_channels);

        let events = &self.events;
        self.algorithm.report_clamps(&mut |name, value| {
            let _ = events.try_send(StreamEvent::ConfigClamped { name, value });
        });

        self.stats.callbacks.fetch_add(1, Ordering::Relaxed);
        self.stats.frames.fetch_add(frames as u64, Ordering::Relaxed);
        if let Some(offset) = self.clock.offset() {
            self.stats.offset.store(offset);
        }
        self.stats.latency.store(latency);
    }
}

/// Output stream driving one [`AudioAlgorithm`]
pub struct AudioOutput {
    device_id: Option<String>,
    config: StreamConfig,
    clock_config: ClockConfig,
    fallback_latency: f64,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    events: Option<Receiver<StreamEvent>>,
    stats: Arc<StreamStats>,
}

impl AudioOutput {
    /// Resolve the configured device and its stream format
    pub fn new(audio: &AudioConfig, clock_config: ClockConfig) -> Result<Self, AudioError> {
        let device = get_output_device(audio.device_id.as_deref())?;
        let default_config = device.default_config()?;
        if default_config.sample_format() != cpal::SampleFormat::F32 {
            return Err(AudioError::UnsupportedFormat(format!(
                "{:?} on {}",
                default_config.sample_format(),
                device.name
            )));
        }

        let config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: cpal::SampleRate(audio.sample_rate),
            buffer_size: match audio.buffer_size {
                Some(size) => cpal::BufferSize::Fixed(size),
                None => cpal::BufferSize::Default,
            },
        };

        Ok(Self {
            device_id: audio.device_id.clone(),
            config,
            clock_config,
            fallback_latency: audio.latency_ms / 1000.0,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            events: None,
            stats: Arc::new(StreamStats::default()),
        })
    }

    /// Start playing `algorithm`
    pub fn start(
        &mut self,
        algorithm: Box<dyn AudioAlgorithm>,
        time: SharedTime,
    ) -> Result<(), AudioError> {
        if self.is_running() {
            return Ok(());
        }

        let needed = algorithm.channel_count();
        let available = self.config.channels as usize;
        if needed > available {
            return Err(AudioError::ChannelMismatch { needed, available });
        }

        let device = get_output_device(self.device_id.as_deref())?;
        let (event_tx, event_rx) = bounded::<StreamEvent>(16);
        self.events = Some(event_rx);

        self.running.store(true, Ordering::SeqCst);
        let max_frames = callback_capacity(match self.config.buffer_size {
            cpal::BufferSize::Fixed(size) => Some(size),
            cpal::BufferSize::Default => None,
        });
        let mut state = RenderState::new(
            self.config.sample_rate.0,
            available,
            max_frames,
            self.clock_config,
            algorithm,
            time,
            self.running.clone(),
            event_tx.clone(),
        );
        self.stats = state.stats();

        let running = self.running.clone();
        let config = self.config.clone();
        let fallback_latency = self.fallback_latency;

        let handle = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let stream = cpal_device.build_output_stream(
                    &config,
                    move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                        let timestamp = info.timestamp();
                        let latency = timestamp
                            .playback
                            .duration_since(&timestamp.callback)
                            .map_or(fallback_latency, |d| d.as_secs_f64());
                        state.render(data, latency);
                    },
                    move |err| {
                        let _ = event_tx.try_send(StreamEvent::StreamError(err.to_string()));
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!("Failed to start output stream: {}", e);
                            running.store(false, Ordering::SeqCst);
                            return;
                        }
                        while running.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to build output stream: {}", e);
                        running.store(false, Ordering::SeqCst);
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);
        tracing::info!(
            "Audio output started: {} Hz, {} channels",
            self.config.sample_rate.0,
            self.config.channels
        );
        Ok(())
    }

    /// Stop the stream. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!("Audio output stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        self.stats.clone()
    }

    /// Next pending stream event, if any
    pub fn check_events(&self) -> Option<StreamEvent> {
        self.events.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::{AxisCatalog, AxisId};
    use crate::config::{AxisConfig, SafetyLimits};
    use crate::math::SqueezeStrategy;
    use crate::synth::ThreePhaseContinuous;
    use crate::time::ManualTimeSource;

    /// Constant value on every channel
    struct Dc {
        channels: usize,
        value: f32,
    }

    impl AudioAlgorithm for Dc {
        fn channel_count(&self) -> usize {
            self.channels
        }

        fn generate_audio(
            &mut self,
            _sample_rate: f64,
            steady_clock: &[f64],
            command_time: &[f64],
            out: &mut ChannelBuffers,
        ) {
            assert_eq!(steady_clock.len(), command_time.len());
            for c in 0..self.channels {
                out.channel_mut(c).fill(self.value);
            }
        }
    }

    type Harness = (RenderState, Receiver<StreamEvent>, Arc<AtomicBool>);

    fn state_with(time: Arc<ManualTimeSource>, algorithm: Box<dyn AudioAlgorithm>) -> Harness {
        let (tx, rx) = bounded(4);
        let running = Arc::new(AtomicBool::new(true));
        let state = RenderState::new(
            48_000,
            3,
            256,
            ClockConfig::default(),
            algorithm,
            time,
            running.clone(),
            tx,
        );
        (state, rx, running)
    }

    fn state(time: Arc<ManualTimeSource>) -> Harness {
        let dc = Dc {
            channels: 2,
            value: 0.5,
        };
        state_with(time, Box::new(dc))
    }

    #[test]
    fn test_render_interleaves_and_counts() {
        let time = Arc::new(ManualTimeSource::new(100.0));
        let (mut state, rx, _) = state(time);
        let mut data = vec![9.0f32; 3 * 64];
        state.render(&mut data, 0.02);

        assert_eq!(&data[..6], &[0.5, 0.5, 0.0, 0.5, 0.5, 0.0]);
        let stats = state.stats();
        assert_eq!(stats.callbacks(), 1);
        assert_eq!(stats.frames(), 64);
        assert_eq!(stats.latency(), 0.02);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_desync_silences_and_stops() {
        let time = Arc::new(ManualTimeSource::new(100.0));
        let (mut state, rx, running) = state(time.clone());
        let mut data = vec![0.0f32; 3 * 64];
        state.render(&mut data, 0.0);

        time.advance(5.0);
        data.fill(1.0);
        state.render(&mut data, 0.0);

        assert!(data.iter().all(|&s| s == 0.0));
        assert!(!running.load(Ordering::SeqCst));
        assert!(matches!(rx.try_recv(), Ok(StreamEvent::Desync(_))));

        // later callbacks stay silent
        data.fill(1.0);
        state.render(&mut data, 0.0);
        assert!(data.iter().all(|&s| s == 0.0));
        assert_eq!(state.stats().callbacks(), 1);
    }

    #[test]
    fn test_clamped_control_reported_once_through_events() {
        let time = Arc::new(ManualTimeSource::new(100.0));
        let catalog = AxisCatalog::new(time.clone(), &AxisConfig::default());
        catalog.set(AxisId::Calib3Neutral, 500.0, 0.0);
        let synth =
            ThreePhaseContinuous::new(catalog, SafetyLimits::default(), SqueezeStrategy::Linear);
        let (mut state, rx, _) = state_with(time.clone(), Box::new(synth));

        let mut data = vec![0.0f32; 3 * 64];
        state.render(&mut data, 0.0);
        assert_eq!(
            rx.try_recv(),
            Ok(StreamEvent::ConfigClamped {
                name: "calibrate.3phase.neutral",
                value: 500.0
            })
        );

        time.advance(64.0 / 48_000.0);
        state.render(&mut data, 0.0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_callback_capacity_follows_buffer_size() {
        assert_eq!(callback_capacity(Some(512)), 512);
        assert_eq!(callback_capacity(Some(0)), PREALLOCATED_FRAMES);
        assert_eq!(callback_capacity(None), PREALLOCATED_FRAMES);
    }
}
