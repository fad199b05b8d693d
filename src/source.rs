//! Audio sources: finite, forward-only streams of planar float frames.
//!
//! [`FileSource`] decodes with symphonia one packet at a time, so only the
//! current packet is held in memory regardless of file length.

use std::fs::File;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use symphonia::core::audio::{AudioBuffer, Signal};
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{PipelineError, Result};
use crate::format::{ProcessingFormat, RenderBlock};

/// A decoded input consumed linearly by the graph's source node.
pub trait AudioSource: Send {
    fn format(&self) -> ProcessingFormat;

    /// Total number of frames the source will deliver.
    fn total_frames(&self) -> u64;

    /// Fill the first `frames` frames of every channel of `block`.
    ///
    /// Returns how many frames were written; fewer than requested means the
    /// source is exhausted.
    fn read(&mut self, block: &mut RenderBlock, frames: usize) -> Result<usize>;
}

/// Streaming decoder over an audio file.
pub struct FileSource {
    path: PathBuf,
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: ProcessingFormat,
    total_frames: u64,
    scratch: Option<AudioBuffer<f32>>,
    pending: Vec<Vec<f32>>,
    pending_pos: usize,
    finished: bool,
}

impl FileSource {
    /// Open and probe `path`.
    ///
    /// # Errors
    /// - `SourceNotFound` if nothing exists at `path`
    /// - `UnreadableSourceFormat` if the container/codec cannot be decoded or
    ///   the stream length is unknown
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PipelineError::SourceNotFound(path.to_path_buf()),
            _ => PipelineError::UnreadableSourceFormat(format!("{}: {e}", path.display())),
        })?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| unreadable(path, e))?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| unreadable(path, "no audio track"))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| unreadable(path, "sample rate unknown"))?;
        let channels = params
            .channels
            .map(|c| c.count() as u16)
            .filter(|&c| c > 0)
            .ok_or_else(|| unreadable(path, "channel layout unknown"))?;
        let total_frames = params
            .n_frames
            .ok_or_else(|| unreadable(path, "stream length unknown"))?;

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| unreadable(path, e))?;

        debug!(
            "Opened {}: {} Hz, {} ch, {} frames",
            path.display(),
            sample_rate,
            channels,
            total_frames
        );

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            decoder,
            track_id,
            format: ProcessingFormat::planar(sample_rate as f64, channels),
            total_frames,
            scratch: None,
            pending: vec![Vec::new(); channels as usize],
            pending_pos: 0,
            finished: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn pending_frames(&self) -> usize {
        self.pending.first().map_or(0, Vec::len) - self.pending_pos
    }

    /// Decode the next packet of our track into `pending`.
    ///
    /// Returns `false` once the stream is exhausted.
    fn refill(&mut self) -> Result<bool> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(e) => return Err(unreadable(&self.path, e)),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping corrupt packet in {}: {}", self.path.display(), e);
                    continue;
                }
                Err(e) => return Err(unreadable(&self.path, e)),
            };

            if decoded.spec().channels.count() != self.pending.len() {
                return Err(unreadable(&self.path, "channel count changed mid-stream"));
            }

            let needs_alloc = self
                .scratch
                .as_ref()
                .is_none_or(|buf| buf.capacity() < decoded.capacity() || buf.spec() != decoded.spec());
            if needs_alloc {
                self.scratch = Some(AudioBuffer::new(decoded.capacity() as u64, *decoded.spec()));
            }
            let Some(scratch) = self.scratch.as_mut() else {
                continue;
            };
            decoded.convert(scratch);

            for (ch, pending) in self.pending.iter_mut().enumerate() {
                pending.clear();
                pending.extend_from_slice(scratch.chan(ch));
            }
            self.pending_pos = 0;

            if scratch.frames() > 0 {
                return Ok(true);
            }
        }
    }
}

impl AudioSource for FileSource {
    fn format(&self) -> ProcessingFormat {
        self.format
    }

    fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn read(&mut self, block: &mut RenderBlock, frames: usize) -> Result<usize> {
        let frames = frames.min(block.capacity());
        let mut written = 0;

        while written < frames {
            if self.pending_frames() == 0 {
                if self.finished || !self.refill()? {
                    self.finished = true;
                    break;
                }
            }

            let take = self.pending_frames().min(frames - written);
            let from = self.pending_pos;
            for (ch, pending) in self.pending.iter().enumerate() {
                block.channel_storage_mut(ch)[written..written + take]
                    .copy_from_slice(&pending[from..from + take]);
            }
            self.pending_pos += take;
            written += take;
        }

        Ok(written)
    }
}

impl Drop for FileSource {
    fn drop(&mut self) {
        debug!("Released source {}", self.path.display());
    }
}

fn unreadable(path: &Path, detail: impl std::fmt::Display) -> PipelineError {
    PipelineError::UnreadableSourceFormat(format!("{}: {detail}", path.display()))
}

/// Planar samples already resident in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    format: ProcessingFormat,
    channels: Vec<Vec<f32>>,
    position: usize,
}

impl MemorySource {
    /// Build from one `Vec` per channel. All channels must be the same length.
    pub fn new(sample_rate: f64, channels: Vec<Vec<f32>>) -> Result<Self> {
        let len = channels.first().map_or(0, Vec::len);
        if channels.is_empty() || channels.iter().any(|c| c.len() != len) {
            return Err(PipelineError::UnreadableSourceFormat(
                "channels must be non-empty and equally long".to_string(),
            ));
        }
        Ok(Self {
            format: ProcessingFormat::planar(sample_rate, channels.len() as u16),
            channels,
            position: 0,
        })
    }

    /// A silent source of `frames` frames.
    pub fn silence(sample_rate: f64, channels: u16, frames: usize) -> Self {
        Self {
            format: ProcessingFormat::planar(sample_rate, channels),
            channels: vec![vec![0.0; frames]; channels as usize],
            position: 0,
        }
    }
}

impl AudioSource for MemorySource {
    fn format(&self) -> ProcessingFormat {
        self.format
    }

    fn total_frames(&self) -> u64 {
        self.channels.first().map_or(0, Vec::len) as u64
    }

    fn read(&mut self, block: &mut RenderBlock, frames: usize) -> Result<usize> {
        let remaining = self.total_frames() as usize - self.position;
        let take = frames.min(block.capacity()).min(remaining);
        for (ch, samples) in self.channels.iter().enumerate() {
            block.channel_storage_mut(ch)[..take]
                .copy_from_slice(&samples[self.position..self.position + take]);
        }
        self.position += take;
        Ok(take)
    }
}
