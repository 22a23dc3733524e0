use async_trait::async_trait;
use std::path::Path;
use tracing::{info, debug};

use crate::config::MediaConfig;
use crate::error::{excerpt_tail, EncodeStage, Result, StitchError};
use crate::job::{ConcatMode, EncodeSettings, TrimWindow};
use crate::pipeline::AudioOverlay;
use super::{MediaProcessorTrait, MediaCommand, MediaCommandBuilder, ToolFailure};

/// Concrete implementation of media processor (FFmpeg-based)
pub struct MediaProcessorImpl {
    config: MediaConfig,
    command_builder: MediaCommandBuilder,
}

impl MediaProcessorImpl {
    /// Create a new media processor implementation
    pub fn new(config: MediaConfig) -> Self {
        let command_builder = MediaCommandBuilder::new(config.clone());

        Self {
            config,
            command_builder,
        }
    }

    /// Run a command on behalf of a pipeline step, translating tool failures
    async fn run_step(&self, stage: EncodeStage, command: MediaCommand) -> Result<()> {
        match command.execute().await {
            Ok(_) => Ok(()),
            Err(failure) => Err(self.step_error(stage, failure)),
        }
    }

    fn step_error(&self, stage: EncodeStage, failure: ToolFailure) -> StitchError {
        match failure {
            ToolFailure::Spawn { binary, source } if source.kind() == std::io::ErrorKind::NotFound => {
                StitchError::ToolUnavailable(format!("{} not found: {}", binary, source))
            }
            ToolFailure::Spawn { binary, source } => StitchError::Encode {
                stage,
                detail: format!("failed to launch {}: {}", binary, source),
            },
            ToolFailure::Exit { code, stderr, .. } => {
                let detail = if stderr.trim().is_empty() {
                    format!("exit status {:?}", code)
                } else {
                    excerpt_tail(&stderr, self.config.stderr_excerpt_chars)
                };
                StitchError::Encode { stage, detail }
            }
        }
    }
}

#[async_trait]
impl MediaProcessorTrait for MediaProcessorImpl {
    async fn normalize_clip(
        &self,
        input_path: &Path,
        output_path: &Path,
        trim: &TrimWindow,
        settings: &EncodeSettings,
        clip_index: usize,
    ) -> Result<()> {
        info!("Normalizing clip {} ({}) -> {}", clip_index, input_path.display(), output_path.display());

        let command = self.command_builder.normalize_clip(input_path, output_path, trim, settings);
        self.run_step(EncodeStage::Normalize { clip_index }, command).await?;

        debug!("Clip {} normalized", clip_index);
        Ok(())
    }

    async fn concatenate(
        &self,
        manifest_path: &Path,
        output_path: &Path,
        mode: ConcatMode,
        settings: &EncodeSettings,
    ) -> Result<()> {
        info!("Concatenating clips listed in {} ({:?}) -> {}",
              manifest_path.display(), mode, output_path.display());

        let command = match mode {
            ConcatMode::Copy => self.command_builder.concat_copy(manifest_path, output_path),
            ConcatMode::Reencode => self.command_builder.concat_reencode(manifest_path, output_path, settings),
        };
        self.run_step(EncodeStage::Concat, command).await?;

        info!("Concatenation completed");
        Ok(())
    }

    async fn overlay_audio(
        &self,
        video_path: &Path,
        audio_path: &Path,
        output_path: &Path,
        overlay: &AudioOverlay,
    ) -> Result<()> {
        info!("Overlaying audio {} onto {} ({:?}, {}) -> {}",
              audio_path.display(), video_path.display(), overlay.fit, overlay.gain.filter(), output_path.display());

        let command = self.command_builder.overlay_audio(video_path, audio_path, output_path, overlay);
        self.run_step(EncodeStage::Overlay, command).await?;

        info!("Audio overlay completed");
        Ok(())
    }

    async fn check_availability(&self) -> Result<()> {
        which::which(&self.config.binary_path).map_err(|e| {
            StitchError::ToolUnavailable(format!("{} not found: {}", self.config.binary_path, e))
        })?;

        match self.command_builder.version_check().execute().await {
            Ok(_) => {
                debug!("Media processor is available");
                Ok(())
            }
            Err(failure) => Err(StitchError::ToolUnavailable(format!(
                "Media processor version check failed: {}",
                failure
            ))),
        }
    }

    async fn get_version_info(&self) -> Result<String> {
        debug!("Getting media processor version information");

        let output = self
            .command_builder
            .version_check()
            .execute()
            .await
            .map_err(|e| StitchError::ToolUnavailable(e.to_string()))?;

        // The first line carries the version
        let first_line = output.stdout.lines().next().unwrap_or("Unknown version");
        Ok(first_line.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_tool() -> MediaProcessorImpl {
        MediaProcessorImpl::new(MediaConfig {
            binary_path: "reelstitch-no-such-ffmpeg".to_string(),
            ..MediaConfig::default()
        })
    }

    #[tokio::test]
    async fn test_missing_binary_is_tool_unavailable() {
        let processor = missing_tool();
        let result = processor.check_availability().await;
        assert!(matches!(result, Err(StitchError::ToolUnavailable(_))));
    }

    #[tokio::test]
    async fn test_missing_binary_during_step_is_tool_unavailable() {
        let processor = missing_tool();
        let result = processor
            .concatenate(Path::new("list.txt"), Path::new("out.mp4"), ConcatMode::Copy, &EncodeSettings::default())
            .await;
        assert!(matches!(result, Err(StitchError::ToolUnavailable(_))));
    }

    #[test]
    fn test_exit_failure_keeps_stderr_tail() {
        let processor = MediaProcessorImpl::new(MediaConfig {
            stderr_excerpt_chars: 5,
            ..MediaConfig::default()
        });
        let error = processor.step_error(
            EncodeStage::Concat,
            ToolFailure::Exit {
                description: "Concatenation".to_string(),
                code: Some(1),
                stderr: "banner banner fatal".to_string(),
            },
        );

        match error {
            StitchError::Encode { stage, detail } => {
                assert_eq!(stage, EncodeStage::Concat);
                assert_eq!(detail, "...fatal");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
