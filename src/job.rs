use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{PipelineConfig, StorageConfig};
use crate::error::{excerpt_head, Result, StitchError};
use crate::media::Resolution;
use crate::pipeline::{AudioGain, AudioOverlay};
use crate::upload::UploadReceipt;

/// Linear gains outside this range are clamped
pub const MAX_LINEAR_GAIN: f64 = 5.0;

const OUTPUT_EXTENSION: &str = ".mp4";

fn default_upload() -> bool {
    true
}

/// One input clip as received from the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ClipSpecRepr")]
pub struct ClipSpec {
    pub source_url: String,
    pub trim_start: Option<String>,
    pub trim_end: Option<String>,
}

/// Clips may be given as a bare URL or as an object with trim bounds
#[derive(Deserialize)]
#[serde(untagged)]
enum ClipSpecRepr {
    Url(String),
    Detailed {
        #[serde(alias = "url")]
        source_url: String,
        #[serde(default)]
        trim_start: Option<String>,
        #[serde(default)]
        trim_end: Option<String>,
    },
}

impl From<ClipSpecRepr> for ClipSpec {
    fn from(repr: ClipSpecRepr) -> Self {
        match repr {
            ClipSpecRepr::Url(source_url) => Self {
                source_url,
                trim_start: None,
                trim_end: None,
            },
            ClipSpecRepr::Detailed { source_url, trim_start, trim_end } => Self {
                source_url,
                trim_start,
                trim_end,
            },
        }
    }
}

impl ClipSpec {
    pub fn url<S: Into<String>>(source_url: S) -> Self {
        Self {
            source_url: source_url.into(),
            trim_start: None,
            trim_end: None,
        }
    }
}

/// How normalized clips are joined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcatMode {
    /// Stream copy; relies on every clip being normalized identically
    #[default]
    Copy,
    /// Re-encode while concatenating
    Reencode,
}

/// Job description accepted over HTTP and by `reelstitch run`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default, alias = "input_videos")]
    pub clips: Vec<ClipSpec>,
    #[serde(default)]
    pub target_resolution: Option<String>,
    #[serde(default)]
    pub target_fps: Option<u32>,
    #[serde(default)]
    pub video_bitrate: Option<String>,
    #[serde(default)]
    pub audio_bitrate: Option<String>,
    #[serde(default, alias = "audio_url")]
    pub background_audio_url: Option<String>,
    #[serde(default)]
    pub audio_gain_db: Option<f64>,
    #[serde(default, alias = "audio_volume")]
    pub audio_gain_linear: Option<f64>,
    #[serde(default)]
    pub audio_fit: Option<crate::pipeline::AudioFitPolicy>,
    #[serde(default, alias = "output_filename")]
    pub output_name: Option<String>,
    #[serde(default)]
    pub concat_mode: Option<ConcatMode>,
    #[serde(default = "default_upload")]
    pub upload: bool,
    #[serde(default, alias = "bucket_name")]
    pub upload_destination: Option<String>,
    #[serde(default)]
    pub signed_url_expiration_minutes: Option<u64>,
}

/// Optional trim bounds of a clip, in seconds of the source
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrimWindow {
    pub start: Option<f64>,
    pub end: Option<f64>,
}

impl TrimWindow {
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        let start = start.filter(|s| !s.trim().is_empty()).map(parse_timestamp).transpose()?;
        let end = end.filter(|s| !s.trim().is_empty()).map(parse_timestamp).transpose()?;

        if let Some(end) = end {
            if end <= start.unwrap_or(0.0) {
                return Err(StitchError::validation(format!(
                    "trim_end ({:.3}s) must be after trim_start ({:.3}s)",
                    end,
                    start.unwrap_or(0.0)
                )));
            }
        }

        Ok(Self { start, end })
    }

    /// Value for the input seek placed before `-i`
    pub fn seek_arg(&self) -> Option<String> {
        self.start.filter(|s| *s > 0.0).map(|s| format!("{:.3}", s))
    }

    /// Output duration placed after `-i`
    pub fn duration_arg(&self) -> Option<String> {
        self.end
            .map(|end| end - self.start.unwrap_or(0.0))
            .map(|d| format!("{:.3}", d))
    }
}

/// Parse "SS[.fff]", "MM:SS[.fff]" or "HH:MM:SS[.fff]" into seconds
pub fn parse_timestamp(raw: &str) -> Result<f64> {
    let invalid = || {
        StitchError::validation(format!(
            "Invalid timestamp '{}': expected SS[.fff], MM:SS[.fff] or HH:MM:SS[.fff]",
            raw
        ))
    };

    let text = raw.trim();
    let parts: Vec<&str> = text.split(':').collect();
    if text.is_empty() || parts.len() > 3 {
        return Err(invalid());
    }

    let (last, leading) = parts.split_last().ok_or_else(invalid)?;
    let seconds: f64 = last.parse().map_err(|_| invalid())?;
    if !seconds.is_finite() || seconds < 0.0 || (!leading.is_empty() && seconds >= 60.0) {
        return Err(invalid());
    }

    let mut total = 0.0;
    for (position, part) in leading.iter().enumerate() {
        let value: u64 = part.parse().map_err(|_| invalid())?;
        // minutes stay below 60 once hours are present
        if leading.len() == 2 && position == 1 && value >= 60 {
            return Err(invalid());
        }
        total = total * 60.0 + value as f64;
    }

    Ok(total * 60.0 + seconds)
}

/// Per-job encoding targets
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodeSettings {
    pub resolution: Resolution,
    pub fps: u32,
    pub video_bitrate: String,
    pub audio_bitrate: String,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::new(1080, 1920),
            fps: 30,
            video_bitrate: "4M".to_string(),
            audio_bitrate: "128k".to_string(),
        }
    }
}

/// A validated clip
#[derive(Debug, Clone, PartialEq)]
pub struct ClipPlan {
    pub index: usize,
    pub source_url: String,
    pub trim: TrimWindow,
}

/// Where and how the artifact is uploaded
#[derive(Debug, Clone, PartialEq)]
pub struct UploadTarget {
    pub bucket: String,
    pub prefix: Option<String>,
    pub signed_url_ttl: Duration,
}

impl UploadTarget {
    /// Parse "bucket", "bucket/prefix" or "s3://bucket/prefix"
    pub fn parse(destination: &str, signed_url_ttl: Duration) -> Result<Self> {
        let trimmed = destination.trim();
        let trimmed = ["s3://", "gs://"]
            .iter()
            .find_map(|scheme| trimmed.strip_prefix(scheme))
            .unwrap_or(trimmed);

        let (bucket, prefix) = match trimmed.split_once('/') {
            Some((bucket, prefix)) => (bucket, Some(prefix.trim_matches('/'))),
            None => (trimmed, None),
        };

        if bucket.is_empty() {
            return Err(StitchError::validation(format!(
                "Invalid upload destination '{}': bucket name is empty",
                destination
            )));
        }

        Ok(Self {
            bucket: bucket.to_string(),
            prefix: prefix.filter(|p| !p.is_empty()).map(str::to_string),
            signed_url_ttl,
        })
    }

    /// Object key for an artifact name
    pub fn object_key(&self, object_name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, object_name),
            None => object_name.to_string(),
        }
    }
}

/// A fully validated job with every default resolved
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub clips: Vec<ClipPlan>,
    pub encode: EncodeSettings,
    pub concat_mode: ConcatMode,
    pub audio: Option<AudioOverlay>,
    pub output_name: String,
    pub upload: Option<UploadTarget>,
}

impl JobSpec {
    pub fn from_request(
        request: JobRequest,
        pipeline: &PipelineConfig,
        storage: &StorageConfig,
    ) -> Result<Self> {
        if request.clips.len() < pipeline.min_clips {
            return Err(StitchError::validation(format!(
                "At least {} clip(s) required in 'clips', got {}",
                pipeline.min_clips,
                request.clips.len()
            )));
        }

        let clips = request
            .clips
            .iter()
            .enumerate()
            .map(|(index, clip)| {
                let source_url = validate_url(&clip.source_url)
                    .map_err(|e| StitchError::validation(format!("clip {}: {}", index, e)))?;
                let trim = TrimWindow::parse(clip.trim_start.as_deref(), clip.trim_end.as_deref())
                    .map_err(|e| StitchError::validation(format!("clip {}: {}", index, e)))?;
                Ok(ClipPlan { index, source_url, trim })
            })
            .collect::<Result<Vec<_>>>()?;

        let resolution: Resolution = request
            .target_resolution
            .as_deref()
            .unwrap_or(&pipeline.default_resolution)
            .parse()?;

        let fps = request.target_fps.unwrap_or(pipeline.default_fps);
        if fps == 0 {
            return Err(StitchError::validation("target_fps must be positive"));
        }

        let video_bitrate = validate_bitrate(
            request.video_bitrate.as_deref().unwrap_or(&pipeline.default_video_bitrate),
        )?;
        let audio_bitrate = validate_bitrate(
            request.audio_bitrate.as_deref().unwrap_or(&pipeline.default_audio_bitrate),
        )?;

        let audio = match request.background_audio_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => {
                let url = validate_url(url)
                    .map_err(|e| StitchError::validation(format!("background_audio_url: {}", e)))?;
                let gain = resolve_gain(request.audio_gain_db, request.audio_gain_linear, pipeline)?;
                Some(AudioOverlay {
                    url,
                    gain,
                    fit: request.audio_fit.unwrap_or(pipeline.audio_fit),
                    bitrate: audio_bitrate.clone(),
                })
            }
            _ => None,
        };

        let upload = if request.upload {
            let destination = request
                .upload_destination
                .as_deref()
                .filter(|d| !d.trim().is_empty())
                .or(storage.default_destination.as_deref())
                .ok_or_else(|| {
                    StitchError::validation("'upload_destination' (or 'bucket_name') is required when upload is enabled")
                })?;
            let minutes = request
                .signed_url_expiration_minutes
                .unwrap_or(storage.signed_url_expiration_minutes)
                .max(1);
            Some(UploadTarget::parse(destination, Duration::from_secs(minutes * 60))?)
        } else {
            None
        };

        Ok(Self {
            clips,
            encode: EncodeSettings {
                resolution,
                fps,
                video_bitrate,
                audio_bitrate,
            },
            concat_mode: request.concat_mode.unwrap_or(pipeline.concat_mode),
            audio,
            output_name: normalize_output_name(request.output_name.as_deref()),
            upload,
        })
    }
}

fn validate_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let url = reqwest::Url::parse(trimmed)
        .map_err(|e| StitchError::validation(format!("invalid URL '{}': {}", trimmed, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(url.to_string()),
        scheme => Err(StitchError::validation(format!(
            "unsupported URL scheme '{}' in '{}'",
            scheme, trimmed
        ))),
    }
}

/// Bitrates are passed to the encoder verbatim, so only "<number>[k|M]" is accepted
fn validate_bitrate(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let number = trimmed.trim_end_matches(['k', 'K', 'm', 'M']);
    let suffix_len = trimmed.len() - number.len();

    let valid = suffix_len <= 1
        && number.parse::<f64>().map(|n| n.is_finite() && n > 0.0).unwrap_or(false)
        && number.chars().all(|c| c.is_ascii_digit() || c == '.');

    if valid {
        Ok(trimmed.to_string())
    } else {
        Err(StitchError::validation(format!("Invalid bitrate '{}': expected e.g. 4M or 128k", raw)))
    }
}

fn resolve_gain(db: Option<f64>, linear: Option<f64>, pipeline: &PipelineConfig) -> Result<AudioGain> {
    match (db, linear) {
        (Some(_), Some(_)) => Err(StitchError::validation(
            "Specify either audio_gain_db or audio_gain_linear, not both",
        )),
        (Some(db), None) if db.is_finite() => Ok(AudioGain::Decibels(db)),
        (None, Some(linear)) if linear.is_finite() => Ok(AudioGain::linear(linear)),
        (None, None) => Ok(AudioGain::linear(pipeline.default_audio_gain_linear)),
        _ => Err(StitchError::validation("Audio gain must be a finite number")),
    }
}

/// Normalize the artifact name: directory components dropped, `.mp4` suffix ensured
pub fn normalize_output_name(raw: Option<&str>) -> String {
    let name = raw
        .map(str::trim)
        .and_then(|n| n.rsplit(['/', '\\']).next())
        .map(str::trim)
        .filter(|n| !n.is_empty() && *n != "." && *n != "..");

    let name = match name {
        Some(name) => name.to_string(),
        None => format!("concat_{}", Uuid::new_v4().simple()),
    };

    if name.to_lowercase().ends_with(OUTPUT_EXTENSION) {
        name
    } else {
        format!("{}{}", name, OUTPUT_EXTENSION)
    }
}

/// Position of a job in its state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Created,
    Fetching,
    Normalizing,
    Concatenating,
    Overlaying,
    Uploading,
    Done,
    Failed,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Created => "created",
            JobStage::Fetching => "fetching",
            JobStage::Normalizing => "normalizing",
            JobStage::Concatenating => "concatenating",
            JobStage::Overlaying => "overlaying",
            JobStage::Uploading => "uploading",
            JobStage::Done => "done",
            JobStage::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the finished artifact ended up
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactLocation {
    Remote(UploadReceipt),
    Local { path: PathBuf },
}

/// Success record of a job
#[derive(Debug, Clone, Serialize)]
pub struct JobArtifact {
    pub job_id: Uuid,
    pub output_name: String,
    pub location: ArtifactLocation,
    pub clip_count: usize,
    pub concat_mode: ConcatMode,
    pub with_audio: bool,
    pub elapsed_ms: u64,
}

/// Failure record of a job: the stage it stopped in and why
#[derive(Debug, Error)]
#[error("job failed while {stage}: {error}")]
pub struct JobFailure {
    pub stage: JobStage,
    #[source]
    pub error: StitchError,
}

impl JobFailure {
    pub fn new(stage: JobStage, error: StitchError) -> Self {
        Self { stage, error }
    }

    pub fn summary(&self, max_detail_chars: usize) -> FailureSummary {
        FailureSummary {
            stage: self.stage,
            kind: self.error.kind().to_string(),
            detail: excerpt_head(&self.error.to_string(), max_detail_chars),
        }
    }
}

/// Serializable form of a [`JobFailure`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureSummary {
    pub stage: JobStage,
    pub kind: String,
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::AudioFitPolicy;
    use serde_json::json;

    fn request(body: serde_json::Value) -> JobRequest {
        serde_json::from_value(body).unwrap()
    }

    fn spec(body: serde_json::Value) -> Result<JobSpec> {
        JobSpec::from_request(request(body), &PipelineConfig::default(), &StorageConfig::default())
    }

    #[test]
    fn test_output_name_is_idempotent() {
        assert_eq!(normalize_output_name(Some("final")), "final.mp4");
        assert_eq!(normalize_output_name(Some("final.mp4")), "final.mp4");
        assert_eq!(normalize_output_name(Some("FINAL.MP4")), "FINAL.MP4");
        assert_eq!(normalize_output_name(Some("../../etc/final")), "final.mp4");
    }

    #[test]
    fn test_output_name_generated_when_missing() {
        for raw in [None, Some(""), Some("   "), Some("dir/")] {
            let name = normalize_output_name(raw);
            assert!(name.starts_with("concat_"), "{}", name);
            assert!(name.ends_with(".mp4"));
        }
    }

    #[test]
    fn test_parse_timestamp_forms() {
        assert_eq!(parse_timestamp("5").unwrap(), 5.0);
        assert_eq!(parse_timestamp("1.25").unwrap(), 1.25);
        assert_eq!(parse_timestamp("01:30").unwrap(), 90.0);
        assert_eq!(parse_timestamp("1:02:03.5").unwrap(), 3723.5);

        for bad in ["", "abc", "-1", "1:75", "1:60:00", "1:2:3:4", "inf"] {
            assert!(parse_timestamp(bad).is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_trim_end_must_follow_start() {
        assert!(TrimWindow::parse(Some("5"), Some("3")).is_err());
        assert!(TrimWindow::parse(None, Some("0")).is_err());

        let trim = TrimWindow::parse(Some(""), Some("00:04")).unwrap();
        assert_eq!(trim, TrimWindow { start: None, end: Some(4.0) });
        assert_eq!(trim.seek_arg(), None);
        assert_eq!(trim.duration_arg().as_deref(), Some("4.000"));
    }

    #[test]
    fn test_clips_accept_strings_and_objects() {
        let req = request(json!({
            "clips": [
                "https://cdn.example.com/a.mp4",
                { "url": "https://cdn.example.com/b.mp4", "trim_start": "1", "trim_end": "3" }
            ]
        }));

        assert_eq!(req.clips[0], ClipSpec::url("https://cdn.example.com/a.mp4"));
        assert_eq!(req.clips[1].trim_start.as_deref(), Some("1"));
        assert!(req.upload);
    }

    #[test]
    fn test_original_field_names_are_accepted() {
        let spec = spec(json!({
            "input_videos": ["https://cdn.example.com/a.mp4", "https://cdn.example.com/b.mp4"],
            "bucket_name": "media-out",
            "output_filename": "joined",
            "concat_mode": "reencode",
            "signed_url_expiration_minutes": 0
        }))
        .unwrap();

        assert_eq!(spec.clips.len(), 2);
        assert_eq!(spec.output_name, "joined.mp4");
        assert_eq!(spec.concat_mode, ConcatMode::Reencode);

        let upload = spec.upload.unwrap();
        assert_eq!(upload.bucket, "media-out");
        assert_eq!(upload.signed_url_ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_defaults_are_resolved_from_config() {
        let spec = spec(json!({
            "clips": ["https://cdn.example.com/a.mp4"],
            "upload": false
        }))
        .unwrap();

        assert_eq!(spec.encode, EncodeSettings::default());
        assert_eq!(spec.concat_mode, ConcatMode::Copy);
        assert!(spec.audio.is_none());
        assert!(spec.upload.is_none());
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            json!({ "clips": [], "upload": false }),
            json!({ "clips": ["ftp://cdn.example.com/a.mp4"], "upload": false }),
            json!({ "clips": ["not a url"], "upload": false }),
            json!({ "clips": ["https://cdn.example.com/a.mp4"] }),
            json!({ "clips": ["https://cdn.example.com/a.mp4"], "upload": false, "target_resolution": "big" }),
            json!({ "clips": ["https://cdn.example.com/a.mp4"], "upload": false, "target_resolution": "1081x1921" }),
            json!({ "clips": ["https://cdn.example.com/a.mp4"], "upload": false, "target_fps": 0 }),
            json!({ "clips": ["https://cdn.example.com/a.mp4"], "upload": false, "video_bitrate": "-vf x" }),
            json!({
                "clips": ["https://cdn.example.com/a.mp4"],
                "upload": false,
                "background_audio_url": "https://cdn.example.com/a.mp3",
                "audio_gain_db": -3.0,
                "audio_gain_linear": 0.5
            }),
        ];

        for body in cases {
            let result = spec(body.clone());
            assert!(
                matches!(result, Err(StitchError::Validation(_))),
                "{} should fail validation",
                body
            );
        }
    }

    #[test]
    fn test_min_clips_is_configurable() {
        let pipeline = PipelineConfig {
            min_clips: 2,
            ..PipelineConfig::default()
        };
        let result = JobSpec::from_request(
            request(json!({ "clips": ["https://cdn.example.com/a.mp4"], "upload": false })),
            &pipeline,
            &StorageConfig::default(),
        );
        assert!(matches!(result, Err(StitchError::Validation(_))));
    }

    #[test]
    fn test_audio_overlay_resolution() {
        let spec = spec(json!({
            "clips": ["https://cdn.example.com/a.mp4"],
            "upload": false,
            "audio_url": "https://cdn.example.com/a.mp3",
            "audio_volume": 7.0,
            "audio_fit": "shortest"
        }))
        .unwrap();

        let audio = spec.audio.unwrap();
        assert_eq!(audio.gain, AudioGain::Linear(MAX_LINEAR_GAIN));
        assert_eq!(audio.fit, AudioFitPolicy::Shortest);
        assert_eq!(audio.bitrate, "128k");
    }

    #[test]
    fn test_upload_target_parsing() {
        let ttl = Duration::from_secs(60);
        let target = UploadTarget::parse("s3://bucket/renders/2024/", ttl).unwrap();
        assert_eq!(target.bucket, "bucket");
        assert_eq!(target.prefix.as_deref(), Some("renders/2024"));
        assert_eq!(target.object_key("a.mp4"), "renders/2024/a.mp4");

        let bare = UploadTarget::parse("bucket", ttl).unwrap();
        assert_eq!(bare.object_key("a.mp4"), "a.mp4");

        assert!(UploadTarget::parse("/prefix", ttl).is_err());
    }

    #[test]
    fn test_failure_summary_truncates_detail() {
        let failure = JobFailure::new(
            JobStage::Fetching,
            StitchError::Download {
                url: "https://cdn.example.com/a.mp4".to_string(),
                cause: "x".repeat(100),
            },
        );
        let summary = failure.summary(20);

        assert_eq!(summary.stage, JobStage::Fetching);
        assert_eq!(summary.kind, "download_failure");
        assert_eq!(summary.detail.chars().count(), 23);
    }
}
