//! Fixed render parameters and the well-known output location.
//!
//! Nothing here is read from disk. `RenderSettings::default()` is the
//! configuration every job uses; the struct exists so hosts and tests can
//! construct variations (e.g. a smaller block size).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// File name of the processed artifact the player picks up.
pub const OUTPUT_FILE_NAME: &str = "ProcessedAudio.m4a";

/// Reverb room presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReverbPreset {
    MediumHall,
    LargeHall,
}

impl ReverbPreset {
    /// `(room_size, damping, width)` for the Freeverb core.
    pub fn room(self) -> (f64, f64, f64) {
        match self {
            ReverbPreset::MediumHall => (0.75, 0.45, 1.0),
            ReverbPreset::LargeHall => (0.9, 0.35, 1.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbSettings {
    pub preset: ReverbPreset,
    /// Wet share of the output (0.0 = dry, 1.0 = fully wet).
    pub wet_dry_mix: f64,
}

impl Default for ReverbSettings {
    fn default() -> Self {
        Self {
            preset: ReverbPreset::MediumHall,
            wet_dry_mix: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    /// Encoder executable, resolved through `PATH` when not absolute.
    pub program: PathBuf,
    /// AAC bit rate in bits per second.
    pub bitrate: u32,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            bitrate: 128_000,
        }
    }
}

/// Everything a render job needs besides its input and output paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Pan rotation frequency in Hz. 0.5 Hz = one left-right cycle every 2 s.
    pub rotation_hz: f64,
    pub reverb: ReverbSettings,
    /// Capacity of the reusable render block.
    pub max_block_frames: usize,
    pub encoder: EncoderSettings,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            rotation_hz: 0.5,
            reverb: ReverbSettings::default(),
            max_block_frames: 4096,
            encoder: EncoderSettings::default(),
        }
    }
}

/// Directory holding the processed artifact.
///
/// Returns: `<data_local_dir>/orbit8d`, or the working directory when the
/// platform exposes no home.
pub fn default_output_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "orbit8d")
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Well-known path of the processed artifact.
pub fn default_output_path() -> PathBuf {
    default_output_dir().join(OUTPUT_FILE_NAME)
}
