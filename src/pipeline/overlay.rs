use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;
use crate::fetch::FetcherTrait;
use crate::job::MAX_LINEAR_GAIN;
use crate::media::MediaProcessorTrait;
use super::ScratchWorkspace;

/// What to do when the background audio and the video differ in length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFitPolicy {
    /// Repeat the audio until the video ends
    #[default]
    Loop,
    /// Stop at the end of the shorter input
    Shortest,
}

impl AudioFitPolicy {
    pub fn loops_audio(&self) -> bool {
        matches!(self, AudioFitPolicy::Loop)
    }
}

/// Gain applied to the background audio
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AudioGain {
    Decibels(f64),
    Linear(f64),
}

impl AudioGain {
    /// Linear factor clamped to `[0.0, MAX_LINEAR_GAIN]`
    pub fn linear(factor: f64) -> Self {
        AudioGain::Linear(factor.clamp(0.0, MAX_LINEAR_GAIN))
    }

    /// ffmpeg `volume` filter for this gain
    pub fn filter(&self) -> String {
        match self {
            AudioGain::Decibels(db) => format!("volume={:.2}dB", db),
            AudioGain::Linear(factor) => format!("volume={:.3}", factor),
        }
    }
}

/// Background audio requested for a job
#[derive(Debug, Clone, PartialEq)]
pub struct AudioOverlay {
    pub url: String,
    pub gain: AudioGain,
    pub fit: AudioFitPolicy,
    pub bitrate: String,
}

/// Fetch the background track and attach it to the concatenated video
pub async fn overlay_background_audio(
    fetcher: &dyn FetcherTrait,
    media: &dyn MediaProcessorTrait,
    workspace: &ScratchWorkspace,
    video_path: &Path,
    overlay: &AudioOverlay,
) -> Result<PathBuf> {
    let audio_path = workspace.file("audio.src");
    let bytes = fetcher.fetch(&overlay.url, &audio_path).await?;
    info!("Fetched background audio ({} bytes)", bytes);

    let output_path = workspace.file("final.mp4");
    media.overlay_audio(video_path, &audio_path, &output_path, overlay).await?;

    Ok(output_path)
}
