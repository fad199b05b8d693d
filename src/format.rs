//! Processing format and the reusable render block.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The sample layout every node in the graph agrees on.
///
/// Samples are always 32-bit float. The graph itself only renders
/// deinterleaved (planar) buffers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessingFormat {
    pub sample_rate: f64,
    pub channels: u16,
    pub interleaved: bool,
}

impl ProcessingFormat {
    /// Planar float format at the given rate and channel count.
    pub fn planar(sample_rate: f64, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            interleaved: false,
        }
    }
}

impl fmt::Display for ProcessingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layout = if self.interleaved { "interleaved" } else { "planar" };
        write!(f, "{} Hz, {} ch, f32 {}", self.sample_rate, self.channels, layout)
    }
}

/// A fixed-capacity planar buffer reused for every block of a job.
///
/// Allocated once per job; `set_frame_length` only moves the fill marker,
/// so the steady state performs no allocation.
#[derive(Debug, Clone)]
pub struct RenderBlock {
    format: ProcessingFormat,
    channels: Vec<Vec<f32>>,
    frame_length: usize,
}

impl RenderBlock {
    pub fn new(format: ProcessingFormat, capacity: usize) -> Self {
        Self {
            format,
            channels: (0..format.channels).map(|_| vec![0.0; capacity]).collect(),
            frame_length: 0,
        }
    }

    pub fn format(&self) -> &ProcessingFormat {
        &self.format
    }

    /// Maximum number of frames the block can hold.
    pub fn capacity(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Number of valid frames currently held.
    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    /// Set the number of valid frames, clamped to capacity.
    pub fn set_frame_length(&mut self, frames: usize) {
        self.frame_length = frames.min(self.capacity());
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Valid samples of one channel.
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index][..self.frame_length]
    }

    /// Valid samples of one channel, mutable.
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        let len = self.frame_length;
        &mut self.channels[index][..len]
    }

    /// Full-capacity storage of one channel, for producers filling the block.
    pub fn channel_storage_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.channels[index]
    }

    /// Left and right valid slices at once. Only meaningful for stereo blocks.
    pub fn stereo_mut(&mut self) -> Option<(&mut [f32], &mut [f32])> {
        let len = self.frame_length;
        match self.channels.as_mut_slice() {
            [left, right] => Some((&mut left[..len], &mut right[..len])),
            _ => None,
        }
    }

    /// Append the valid frames as interleaved little-endian `f32` bytes.
    pub fn write_interleaved_le(&self, out: &mut Vec<u8>) {
        out.reserve(self.frame_length * self.channels.len() * 4);
        for frame in 0..self.frame_length {
            for channel in &self.channels {
                out.extend_from_slice(&channel[frame].to_le_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_length_clamps_to_capacity() {
        let mut block = RenderBlock::new(ProcessingFormat::planar(48000.0, 2), 16);
        block.set_frame_length(64);
        assert_eq!(block.frame_length(), 16);
        assert_eq!(block.channel(1).len(), 16);
    }

    #[test]
    fn stereo_view_only_for_two_channels() {
        let mut mono = RenderBlock::new(ProcessingFormat::planar(44100.0, 1), 8);
        assert!(mono.stereo_mut().is_none());

        let mut stereo = RenderBlock::new(ProcessingFormat::planar(44100.0, 2), 8);
        stereo.set_frame_length(3);
        let (l, r) = stereo.stereo_mut().unwrap();
        assert_eq!((l.len(), r.len()), (3, 3));
    }

    #[test]
    fn interleaves_valid_frames_only() {
        let mut block = RenderBlock::new(ProcessingFormat::planar(44100.0, 2), 4);
        block.channel_storage_mut(0).copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        block.channel_storage_mut(1).copy_from_slice(&[-1.0, -2.0, -3.0, -4.0]);
        block.set_frame_length(2);

        let mut bytes = Vec::new();
        block.write_interleaved_le(&mut bytes);
        let samples: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(samples, vec![1.0, -1.0, 2.0, -2.0]);
    }
}
