//! Sample buffers for synthesis
//!
//! Synthesizers write planar channels; the output callback interleaves them
//! into the device buffer. Both types reuse their allocations across
//! callbacks.

use std::collections::VecDeque;

/// Planar per-channel output of one callback
#[derive(Debug, Clone, Default)]
pub struct ChannelBuffers {
    channels: Vec<Vec<f32>>,
    frames: usize,
}

impl ChannelBuffers {
    /// Create buffers for `channels` channels with room for `capacity` frames
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            channels: (0..channels).map(|_| Vec::with_capacity(capacity)).collect(),
            frames: 0,
        }
    }

    /// Resize every channel to `frames` zeroed samples
    pub fn prepare(&mut self, frames: usize) {
        for channel in &mut self.channels {
            channel.clear();
            channel.resize(frames, 0.0);
        }
        self.frames = frames;
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Frames per channel
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.channels[index]
    }

    /// Silence every channel without changing the length
    pub fn fill_silence(&mut self) {
        for channel in &mut self.channels {
            channel.fill(0.0);
        }
    }

    /// Write into an interleaved device buffer with `device_channels` per
    /// frame. Extra device channels get silence, extra synth channels are
    /// dropped.
    pub fn interleave_into(&self, out: &mut [f32], device_channels: usize) {
        if device_channels == 0 {
            return;
        }
        for (frame_index, frame) in out.chunks_mut(device_channels).enumerate() {
            for (channel_index, sample) in frame.iter_mut().enumerate() {
                *sample = self
                    .channels
                    .get(channel_index)
                    .and_then(|c| c.get(frame_index))
                    .copied()
                    .unwrap_or(0.0);
            }
        }
    }
}

/// Per-channel FIFO of synthesized samples. Pulse synthesis produces whole
/// pulses and hands out exactly as many frames as each callback asks for.
#[derive(Debug, Clone, Default)]
pub struct RollingBuffer {
    channels: Vec<VecDeque<f32>>,
}

impl RollingBuffer {
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            channels: (0..channels)
                .map(|_| VecDeque::with_capacity(capacity))
                .collect(),
        }
    }

    /// Frames currently buffered
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames every channel holds without reallocating
    pub fn capacity(&self) -> usize {
        self.channels.iter().map(VecDeque::capacity).min().unwrap_or(0)
    }

    /// Make room for `frames` more frames
    pub fn reserve(&mut self, frames: usize) {
        for channel in &mut self.channels {
            channel.reserve(frames);
        }
    }

    /// Append one frame; `frame` holds one sample per channel
    #[inline]
    pub fn push(&mut self, frame: &[f32]) {
        for (channel, &sample) in self.channels.iter_mut().zip(frame) {
            channel.push_back(sample);
        }
    }

    /// Append `frames` frames of silence
    pub fn push_silence(&mut self, frames: usize) {
        for channel in &mut self.channels {
            channel.extend(std::iter::repeat(0.0).take(frames));
        }
    }

    /// Move up to `out.frames()` frames into `out`, starting at `offset`.
    /// Returns the number of frames moved.
    pub fn drain_into(&mut self, out: &mut ChannelBuffers, offset: usize) -> usize {
        let wanted = out.frames().saturating_sub(offset);
        let count = wanted.min(self.len());
        for (index, channel) in self.channels.iter_mut().enumerate() {
            if index >= out.channel_count() {
                channel.drain(..count);
                continue;
            }
            let target = &mut out.channel_mut(index)[offset..offset + count];
            for (dst, src) in target.iter_mut().zip(channel.drain(..count)) {
                *dst = src;
            }
        }
        count
    }

    pub fn clear(&mut self) {
        for channel in &mut self.channels {
            channel.clear();
        }
    }
}
