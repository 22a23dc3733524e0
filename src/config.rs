use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::error::{Result, StitchError};
use crate::pipeline::AudioFitPolicy;
use crate::job::ConcatMode;

// Default values for fields that older config files may omit
fn default_normalize_concurrency() -> usize {
    1
}

fn default_status_retention_secs() -> u64 {
    3600
}

fn default_stale_after_secs() -> u64 {
    24 * 3600
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub worker: WorkerConfig,
    pub fetch: FetchConfig,
    pub media: MediaConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to
    pub host: String,
    /// Port to listen on (the `PORT` environment variable overrides it at start-up)
    pub port: u16,
    /// Maximum accepted request body size in bytes
    pub max_body_bytes: usize,
    /// Error details returned to clients are truncated to this many characters
    pub max_detail_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of jobs allowed to execute at the same time
    pub max_concurrent_jobs: u32,
    /// Upper bound for a whole job; 0 disables the bound
    pub job_timeout_secs: u64,
    /// How long finished job records stay queryable
    #[serde(default = "default_status_retention_secs")]
    pub status_retention_secs: u64,
    /// How long shutdown waits for in-flight jobs; 0 waits indefinitely
    pub drain_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Timeout for connecting, the response head and each body chunk
    pub timeout_secs: u64,
    /// Write buffer size used while streaming downloads to disk
    pub chunk_size_bytes: usize,
    /// User agent sent with every download
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    /// Video encoder used for normalization
    pub video_codec: String,
    /// Encoder speed preset (ultrafast, veryfast, fast, medium, slow)
    pub preset: String,
    /// Pixel format every normalized clip is converted to
    pub pixel_format: String,
    /// Audio encoder used for the background track
    pub audio_codec: String,
    /// Additional encoding options appended to normalization commands
    /// Common options: ["-crf", "23", "-profile:v", "high"]
    pub extra_encode_options: Vec<String>,
    /// Captured stderr is reduced to its last N characters
    pub stderr_excerpt_chars: usize,
    /// Number of clips normalized in parallel within one job
    #[serde(default = "default_normalize_concurrency")]
    pub normalize_concurrency: usize,
    /// Retry a failed stream-copy concatenation once with re-encoding
    pub concat_fallback_reencode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Parent directory for job scratch workspaces (system temp dir when unset)
    pub scratch_root: Option<PathBuf>,
    /// Where artifacts are written when a job does not upload
    pub output_dir: PathBuf,
    /// Workspaces untouched for this long are treated as abandoned and purged
    pub stale_after_secs: u64,
    /// Minimum number of clips a job must contain
    pub min_clips: usize,
    /// Default frame size, "WIDTHxHEIGHT" or "WIDTH:HEIGHT"
    pub default_resolution: String,
    /// Default output frame rate
    pub default_fps: u32,
    /// Default video bitrate target
    pub default_video_bitrate: String,
    /// Default background audio bitrate target
    pub default_audio_bitrate: String,
    /// Default linear gain applied to background audio
    pub default_audio_gain_linear: f64,
    /// What happens when the background audio and the video differ in length
    pub audio_fit: AudioFitPolicy,
    /// Default concatenation mode
    pub concat_mode: ConcatMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Enable the object storage upload sink
    pub enabled: bool,
    /// Destination used when a request does not name one ("bucket" or "bucket/prefix")
    pub default_destination: Option<String>,
    /// Custom S3 endpoint (R2, MinIO, GCS interoperability)
    pub endpoint_url: Option<String>,
    /// Region passed to the S3 client
    pub region: String,
    /// Use path-style bucket addressing
    pub force_path_style: bool,
    /// Lifetime of generated signed download URLs
    pub signed_url_expiration_minutes: u64,
    /// Content type stored with uploaded artifacts
    pub content_type: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_body_bytes: 1024 * 1024,
            max_detail_chars: 1000,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            job_timeout_secs: 0,
            status_retention_secs: default_status_retention_secs(),
            drain_timeout_secs: 0,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            chunk_size_bytes: 1024 * 1024,
            user_agent: format!("reelstitch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            video_codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            pixel_format: "yuv420p".to_string(),
            audio_codec: "aac".to_string(),
            extra_encode_options: vec![
                // Example encoding options users can customize:
                // "-crf".to_string(), "23".to_string(),          // Quality (0-51, lower = better quality)
                // "-profile:v".to_string(), "high".to_string(),  // H.264 profile
            ],
            stderr_excerpt_chars: 1000,
            normalize_concurrency: default_normalize_concurrency(),
            concat_fallback_reencode: false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scratch_root: None,
            output_dir: PathBuf::from("output"),
            stale_after_secs: default_stale_after_secs(),
            min_clips: 1,
            default_resolution: "1080x1920".to_string(),
            default_fps: 30,
            default_video_bitrate: "4M".to_string(),
            default_audio_bitrate: "128k".to_string(),
            default_audio_gain_linear: 1.0,
            audio_fit: AudioFitPolicy::Loop,
            concat_mode: ConcatMode::Copy,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_destination: None,
            endpoint_url: None,
            region: "us-east-1".to_string(),
            force_path_style: false,
            signed_url_expiration_minutes: 60,
            content_type: "video/mp4".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn job_timeout(&self) -> Option<std::time::Duration> {
        (self.job_timeout_secs > 0).then(|| std::time::Duration::from_secs(self.job_timeout_secs))
    }

    pub fn drain_timeout(&self) -> Option<std::time::Duration> {
        (self.drain_timeout_secs > 0).then(|| std::time::Duration::from_secs(self.drain_timeout_secs))
    }
}

impl PipelineConfig {
    pub fn stale_after(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stale_after_secs)
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StitchError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| StitchError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| StitchError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| StitchError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Apply the environment overrides the service honours.
    ///
    /// Called once at start-up; the pipeline never reads the environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|e| StitchError::Config(format!("Invalid PORT '{}': {}", port, e)))?;
        }
        Ok(())
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.worker.max_concurrent_jobs == 0 {
            return Err(StitchError::Config("worker.max_concurrent_jobs must be at least 1".to_string()));
        }
        if self.fetch.chunk_size_bytes == 0 {
            return Err(StitchError::Config("fetch.chunk_size_bytes must be positive".to_string()));
        }
        if self.pipeline.stale_after_secs == 0 {
            return Err(StitchError::Config("pipeline.stale_after_secs must be positive".to_string()));
        }
        if self.worker.job_timeout_secs > 0 && self.pipeline.stale_after_secs <= self.worker.job_timeout_secs {
            return Err(StitchError::Config(
                "pipeline.stale_after_secs must exceed worker.job_timeout_secs".to_string(),
            ));
        }
        if self.pipeline.min_clips == 0 {
            return Err(StitchError::Config("pipeline.min_clips must be at least 1".to_string()));
        }
        self.pipeline.default_resolution.parse::<crate::media::Resolution>()
            .map_err(|e| StitchError::Config(format!("pipeline.default_resolution: {}", e)))?;
        Ok(())
    }
}
