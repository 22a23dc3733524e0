// Media processing seam
//
// The pipeline never talks to ffmpeg directly:
// - Commands: argument-list builders for each pipeline step
// - Filters: frame-size parsing and the fit-and-pad filter chain
// - Processor: the ffmpeg-backed implementation of MediaProcessorTrait

pub mod commands;
pub mod filters;
pub mod processor;

use async_trait::async_trait;
use std::path::Path;

pub use commands::*;
pub use filters::*;
pub use processor::*;

use crate::config::MediaConfig;
use crate::error::Result;
use crate::job::{ConcatMode, EncodeSettings, TrimWindow};
use crate::pipeline::AudioOverlay;

/// Main trait for media processing operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaProcessorTrait: Send + Sync {
    /// Trim, scale/pad and re-encode one clip without audio
    async fn normalize_clip(
        &self,
        input_path: &Path,
        output_path: &Path,
        trim: &TrimWindow,
        settings: &EncodeSettings,
        clip_index: usize,
    ) -> Result<()>;

    /// Join the clips listed in a concat manifest
    async fn concatenate(
        &self,
        manifest_path: &Path,
        output_path: &Path,
        mode: ConcatMode,
        settings: &EncodeSettings,
    ) -> Result<()>;

    /// Attach background audio to a silent video
    async fn overlay_audio(
        &self,
        video_path: &Path,
        audio_path: &Path,
        output_path: &Path,
        overlay: &AudioOverlay,
    ) -> Result<()>;

    /// Check if media processor is available
    async fn check_availability(&self) -> Result<()>;

    /// Get media processor version information
    async fn get_version_info(&self) -> Result<String>;
}

/// Factory for creating media processor instances
pub struct MediaProcessorFactory;

impl MediaProcessorFactory {
    /// Create the default media processor implementation (FFmpeg-based)
    pub fn create_processor(config: MediaConfig) -> Box<dyn MediaProcessorTrait> {
        Box::new(processor::MediaProcessorImpl::new(config))
    }
}
