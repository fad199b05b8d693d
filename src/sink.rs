//! Encoder sink. Writes rendered blocks to an MPEG-4/AAC file.
//!
//! There is no AAC encoder in pure Rust worth shipping, so [`AacFileSink`]
//! streams raw `f32le` PCM into the system `ffmpeg`. The encoder writes to a
//! hidden staging file beside the destination; only [`BlockSink::close`]
//! moves it into place. A sink dropped without `close` kills the encoder and
//! deletes the staging file, so the destination never holds a partial file.

use std::ffi::OsString;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::{self, JoinHandle};

use log::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::format::{ProcessingFormat, RenderBlock};
use crate::settings::EncoderSettings;

/// Destination of rendered blocks.
pub trait BlockSink {
    /// Append the valid frames of `block`.
    fn write(&mut self, block: &RenderBlock) -> Result<()>;

    /// Finalize the output. Called once, after the last block.
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// A destination path plus the hidden staging file written in its place.
#[derive(Debug)]
pub struct StagedFile {
    destination: PathBuf,
    staging: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Prepare to (re)write `destination`.
    ///
    /// Creates the parent directory and deletes any existing file at the
    /// destination or staging path.
    pub fn create(destination: &Path) -> Result<Self> {
        let create_err =
            |e: io::Error| PipelineError::SinkCreateFailure(format!("{}: {e}", destination.display()));

        let name = destination
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PipelineError::SinkCreateFailure(format!(
                "{} has no file name",
                destination.display()
            )))?;
        let staging = destination.with_file_name(format!(".{name}.partial"));

        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(create_err)?;
        }
        if remove_if_exists(destination).map_err(create_err)? {
            debug!("Removed previous output {}", destination.display());
        }
        remove_if_exists(&staging).map_err(create_err)?;

        Ok(Self {
            destination: destination.to_path_buf(),
            staging,
            committed: false,
        })
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging
    }

    /// Move the staging file onto the destination.
    pub fn commit(mut self) -> Result<()> {
        fs::rename(&self.staging, &self.destination).map_err(|e| {
            PipelineError::SinkWriteFailure(format!(
                "cannot move {} into place: {e}",
                self.staging.display()
            ))
        })?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = remove_if_exists(&self.staging) {
                warn!("Could not remove {}: {}", self.staging.display(), e);
            }
        }
    }
}

/// Whether `program -version` runs successfully.
pub fn encoder_available(program: &Path) -> bool {
    Command::new(program)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Arguments that make `ffmpeg` read raw `f32le` PCM in `format` from stdin
/// and write AAC in an MPEG-4 container to `output`.
pub fn encoder_args(format: &ProcessingFormat, settings: &EncoderSettings, output: &Path) -> Vec<OsString> {
    let sample_rate = (format.sample_rate.round() as u32).to_string();
    let channels = format.channels.to_string();
    let bitrate = settings.bitrate.to_string();
    let mut args: Vec<OsString> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-y",
        "-f",
        "f32le",
        "-ar",
        sample_rate.as_str(),
        "-ac",
        channels.as_str(),
        "-i",
        "pipe:0",
        "-c:a",
        "aac",
        "-b:a",
        bitrate.as_str(),
        "-f",
        "mp4",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(output.as_os_str().to_os_string());
    args
}

/// AAC in an MPEG-4 container, encoded by an `ffmpeg` child process.
pub struct AacFileSink {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    /// Drains the encoder's stderr so it can never fill the pipe and stall.
    stderr: Option<JoinHandle<String>>,
    staged: Option<StagedFile>,
    scratch: Vec<u8>,
    frames_written: u64,
}

impl AacFileSink {
    /// Start an encoder for `format` that will produce `destination`.
    ///
    /// Any existing file at `destination` is deleted first.
    pub fn create(
        destination: &Path,
        format: &ProcessingFormat,
        settings: &EncoderSettings,
    ) -> Result<Self> {
        let staged = StagedFile::create(destination)?;

        let mut child = Command::new(&settings.program)
            .args(encoder_args(format, settings, staged.staging_path()))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                PipelineError::SinkCreateFailure(format!(
                    "cannot start encoder {}: {e}",
                    settings.program.display()
                ))
            })?;

        let stdin = child.stdin.take();
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });
        debug!(
            "Encoder started for {} ({}, {} bps)",
            destination.display(),
            format,
            settings.bitrate
        );

        Ok(Self {
            child: Some(child),
            stdin,
            stderr,
            staged: Some(staged),
            scratch: Vec::new(),
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl BlockSink for AacFileSink {
    fn write(&mut self, block: &RenderBlock) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| PipelineError::SinkWriteFailure("encoder input closed".to_string()))?;

        self.scratch.clear();
        block.write_interleaved_le(&mut self.scratch);
        stdin
            .write_all(&self.scratch)
            .map_err(|e| PipelineError::SinkWriteFailure(format!("encoder pipe: {e}")))?;

        self.frames_written += block.frame_length() as u64;
        Ok(())
    }

    fn close(mut self) -> Result<()> {
        // EOF on stdin lets ffmpeg flush and write the moov atom
        drop(self.stdin.take());

        let mut child = self
            .child
            .take()
            .ok_or_else(|| PipelineError::SinkWriteFailure("encoder already closed".to_string()))?;
        let status = child
            .wait()
            .map_err(|e| PipelineError::SinkWriteFailure(format!("encoder wait: {e}")))?;
        let stderr = self
            .stderr
            .take()
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();
        if !status.success() {
            return Err(PipelineError::SinkWriteFailure(format!(
                "encoder exited with {}: {}",
                status,
                stderr.trim()
            )));
        }

        let staged = self
            .staged
            .take()
            .ok_or_else(|| PipelineError::SinkWriteFailure("output already committed".to_string()))?;
        let destination = staged.destination().to_path_buf();
        staged.commit()?;
        debug!(
            "Finalized {} ({} frames)",
            destination.display(),
            self.frames_written
        );
        Ok(())
    }
}

impl Drop for AacFileSink {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            warn!("Encoder abandoned after {} frames, discarding output", self.frames_written);
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(reader) = self.stderr.take() {
            let _ = reader.join();
        }
    }
}
