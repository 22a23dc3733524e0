use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::MediaConfig;
use crate::job::{EncodeSettings, TrimWindow};
use crate::pipeline::AudioOverlay;
use super::filters::fit_and_pad;

/// Why a media tool invocation did not succeed
#[derive(Error, Debug)]
pub enum ToolFailure {
    #[error("failed to launch {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{description} exited with {code:?}")]
    Exit {
        description: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Captured output of a successful invocation
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
}

/// Abstract media processing command representation
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add an argument pair only when a value is present
    pub fn opt_arg<S: Into<String>>(self, flag: &str, value: Option<S>) -> Self {
        match value {
            Some(value) => self.arg(flag).arg(value),
            None => self,
        }
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Only print errors
    pub fn quiet(self) -> Self {
        self.args(["-hide_banner", "-nostdin", "-loglevel", "error"])
    }

    /// Select a stream explicitly
    pub fn map<S: Into<String>>(self, specifier: S) -> Self {
        self.arg("-map").arg(specifier)
    }

    /// Set video codec
    pub fn video_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:v").arg(codec)
    }

    /// Set audio codec
    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    /// Copy video stream
    pub fn copy_video(self) -> Self {
        self.video_codec("copy")
    }

    /// Copy every stream
    pub fn copy_all(self) -> Self {
        self.arg("-c").arg("copy")
    }

    /// Disable audio
    pub fn no_audio(self) -> Self {
        self.arg("-an")
    }

    /// Set output frame rate
    pub fn frame_rate(self, fps: u32) -> Self {
        self.arg("-r").arg(fps.to_string())
    }

    /// Set video bitrate
    pub fn video_bitrate<S: Into<String>>(self, bitrate: S) -> Self {
        self.arg("-b:v").arg(bitrate)
    }

    /// Set audio bitrate
    pub fn audio_bitrate<S: Into<String>>(self, bitrate: S) -> Self {
        self.arg("-b:a").arg(bitrate)
    }

    /// Add video filter
    pub fn video_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-vf").arg(filter)
    }

    /// Add audio filter
    pub fn audio_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-af").arg(filter)
    }

    /// Move the moov atom to the front for progressive playback
    pub fn faststart(self) -> Self {
        self.arg("-movflags").arg("+faststart")
    }

    /// Execute the command
    pub async fn execute(&self) -> Result<CommandOutput, ToolFailure> {
        debug!("Executing media processing command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ToolFailure::Spawn {
                binary: self.binary_path.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ToolFailure::Exit {
                description: self.description.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

/// Builder for the pipeline's media processing operations
pub struct MediaCommandBuilder {
    config: MediaConfig,
}

impl MediaCommandBuilder {
    /// Create a new command builder
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    fn command<S: Into<String>>(&self, description: S) -> MediaCommand {
        MediaCommand::new(&self.config.binary_path, description).quiet()
    }

    /// Encoder arguments shared by normalization and re-encoding concatenation
    fn encode_video(&self, cmd: MediaCommand, settings: &EncodeSettings) -> MediaCommand {
        cmd.video_codec(&self.config.video_codec)
            .arg("-preset").arg(&self.config.preset)
            .video_bitrate(&settings.video_bitrate)
            .arg("-pix_fmt").arg(&self.config.pixel_format)
            .args(self.config.extra_encode_options.iter().cloned())
    }

    /// Build clip normalization command
    ///
    /// Trim start is an input seek placed before `-i`; the trim end becomes a
    /// duration after it, because timestamps restart at zero after seeking.
    pub fn normalize_clip<P: AsRef<Path>>(
        &self,
        input_path: P,
        output_path: P,
        trim: &TrimWindow,
        settings: &EncodeSettings,
    ) -> MediaCommand {
        let cmd = self
            .command("Clip normalization")
            .overwrite()
            .opt_arg("-ss", trim.seek_arg())
            .input(input_path)
            .opt_arg("-t", trim.duration_arg())
            .map("0:v:0")
            .video_filter(fit_and_pad(settings.resolution))
            .frame_rate(settings.fps);

        self.encode_video(cmd, settings)
            .no_audio()
            .faststart()
            .output(output_path)
    }

    /// Build stream-copy concatenation command
    pub fn concat_copy<P: AsRef<Path>>(&self, manifest_path: P, output_path: P) -> MediaCommand {
        self.command("Concatenation")
            .overwrite()
            .arg("-f").arg("concat")
            .arg("-safe").arg("0")
            .input(manifest_path)
            .copy_all()
            .faststart()
            .output(output_path)
    }

    /// Build re-encoding concatenation command
    pub fn concat_reencode<P: AsRef<Path>>(
        &self,
        manifest_path: P,
        output_path: P,
        settings: &EncodeSettings,
    ) -> MediaCommand {
        let cmd = self
            .command("Concatenation (re-encode)")
            .overwrite()
            .arg("-f").arg("concat")
            .arg("-safe").arg("0")
            .input(manifest_path)
            .map("0:v:0")
            .frame_rate(settings.fps);

        self.encode_video(cmd, settings)
            .no_audio()
            .faststart()
            .output(output_path)
    }

    /// Build background audio overlay command
    pub fn overlay_audio<P: AsRef<Path>>(
        &self,
        video_path: P,
        audio_path: P,
        output_path: P,
        overlay: &AudioOverlay,
    ) -> MediaCommand {
        let mut cmd = self
            .command("Audio overlay")
            .overwrite()
            .input(video_path);

        if overlay.fit.loops_audio() {
            cmd = cmd.arg("-stream_loop").arg("-1");
        }

        cmd.input(audio_path)
            .map("0:v:0")
            .map("1:a:0")
            .copy_video()
            .audio_filter(overlay.gain.filter())
            .audio_codec(&self.config.audio_codec)
            .audio_bitrate(&overlay.bitrate)
            .arg("-shortest")
            .faststart()
            .output(output_path)
    }

    /// Build version check command
    pub fn version_check(&self) -> MediaCommand {
        MediaCommand::new(&self.config.binary_path, "Version check")
            .arg("-version")
    }
}
