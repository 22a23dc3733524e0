use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::io;
use std::time::Instant;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::time;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Result, StitchError};
use crate::fetch::{FetcherTrait, HttpFetcher};
use crate::job::{ArtifactLocation, ConcatMode, JobArtifact, JobFailure, JobRequest, JobSpec, JobStage};
use crate::media::{MediaProcessorFactory, MediaProcessorTrait};
use crate::upload::{S3UploadSink, UploadSink};
use super::{concatenate_clips, normalize_clips, overlay_background_audio, ScratchWorkspace};

/// Executes validated jobs from download to delivery
pub struct JobRunner {
    config: Arc<Config>,
    scratch_root: PathBuf,
    output_dir: PathBuf,
    fetcher: Box<dyn FetcherTrait>,
    media: Box<dyn MediaProcessorTrait>,
    uploader: Option<Box<dyn UploadSink>>,
}

impl JobRunner {
    pub fn new(
        config: Arc<Config>,
        fetcher: Box<dyn FetcherTrait>,
        media: Box<dyn MediaProcessorTrait>,
        uploader: Option<Box<dyn UploadSink>>,
    ) -> Result<Self> {
        // Resolved once so manifests always carry absolute paths
        let scratch_root = config
            .pipeline
            .scratch_root
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let scratch_root = std::path::absolute(&scratch_root)?;
        let output_dir = std::path::absolute(&config.pipeline.output_dir)?;

        Ok(Self {
            config,
            scratch_root,
            output_dir,
            fetcher,
            media,
            uploader,
        })
    }

    /// Build the production runner: HTTP fetcher, ffmpeg and (when enabled) S3
    pub async fn from_config(config: Arc<Config>) -> Result<Self> {
        let fetcher = Box::new(HttpFetcher::new(&config.fetch)?);
        let media = MediaProcessorFactory::create_processor(config.media.clone());
        let uploader: Option<Box<dyn UploadSink>> = if config.storage.enabled {
            Some(Box::new(S3UploadSink::new(&config.storage).await?))
        } else {
            None
        };

        Self::new(config, fetcher, media, uploader)
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    pub fn media(&self) -> &dyn MediaProcessorTrait {
        self.media.as_ref()
    }

    /// Validate a request against the configuration and the available sinks
    pub fn prepare(&self, request: JobRequest) -> Result<JobSpec> {
        let spec = JobSpec::from_request(request, &self.config.pipeline, &self.config.storage)?;

        if spec.upload.is_some() && self.uploader.is_none() {
            return Err(StitchError::validation(
                "upload requested but object storage is not enabled; send \"upload\": false or enable [storage]",
            ));
        }

        Ok(spec)
    }

    /// Run one job to completion, publishing every stage transition on `stage`
    pub async fn run(
        &self,
        job_id: Uuid,
        spec: JobSpec,
        stage: &watch::Sender<JobStage>,
    ) -> std::result::Result<JobArtifact, JobFailure> {
        let started = Instant::now();
        let span = info_span!("job", id = %job_id);
        let work = self.execute(job_id, &spec, stage).instrument(span);

        let outcome = match self.config.worker.job_timeout() {
            Some(limit) => time::timeout(limit, work)
                .await
                .unwrap_or_else(|_| Err(StitchError::Timeout(limit.as_secs()))),
            None => work.await,
        };

        match outcome {
            Ok((location, concat_mode)) => {
                stage.send_replace(JobStage::Done);
                let elapsed_ms = started.elapsed().as_millis() as u64;
                info!("Job {} finished in {} ms", job_id, elapsed_ms);

                Ok(JobArtifact {
                    job_id,
                    output_name: spec.output_name,
                    location,
                    clip_count: spec.clips.len(),
                    concat_mode,
                    with_audio: spec.audio.is_some(),
                    elapsed_ms,
                })
            }
            Err(error) => {
                let failed_in = *stage.borrow();
                stage.send_replace(JobStage::Failed);
                let failure = JobFailure::new(failed_in, error);
                error!("Job {}: {}", job_id, failure);
                Err(failure)
            }
        }
    }

    async fn execute(
        &self,
        job_id: Uuid,
        spec: &JobSpec,
        stage: &watch::Sender<JobStage>,
    ) -> Result<(ArtifactLocation, ConcatMode)> {
        stage.send_replace(JobStage::Created);
        self.media.check_availability().await?;

        stage.send_replace(JobStage::Fetching);
        let workspace = ScratchWorkspace::create(&self.scratch_root, job_id)?;
        let result = self.execute_in(job_id, &workspace, spec, stage).await;
        workspace.close();

        result
    }

    async fn execute_in(
        &self,
        job_id: Uuid,
        workspace: &ScratchWorkspace,
        spec: &JobSpec,
        stage: &watch::Sender<JobStage>,
    ) -> Result<(ArtifactLocation, ConcatMode)> {
        info!("Fetching {} clip(s)", spec.clips.len());
        let mut sources = Vec::with_capacity(spec.clips.len());
        for clip in &spec.clips {
            let destination = workspace.file(&format!("clip_{:03}.src", clip.index));
            self.fetcher.fetch(&clip.source_url, &destination).await?;
            sources.push(destination);
        }

        stage.send_replace(JobStage::Normalizing);
        let normalized = normalize_clips(
            self.media.as_ref(),
            workspace,
            &spec.clips,
            &sources,
            &spec.encode,
            self.config.media.normalize_concurrency,
        )
        .await?;

        stage.send_replace(JobStage::Concatenating);
        let (mut artifact, concat_mode) = concatenate_clips(
            self.media.as_ref(),
            workspace,
            &normalized,
            spec.concat_mode,
            &spec.encode,
            self.config.media.concat_fallback_reencode,
        )
        .await?;

        if let Some(overlay) = &spec.audio {
            stage.send_replace(JobStage::Overlaying);
            artifact = overlay_background_audio(
                self.fetcher.as_ref(),
                self.media.as_ref(),
                workspace,
                &artifact,
                overlay,
            )
            .await?;
        }

        stage.send_replace(JobStage::Uploading);
        let location = self.deliver(job_id, &artifact, spec).await?;

        Ok((location, concat_mode))
    }

    async fn deliver(&self, job_id: Uuid, artifact: &Path, spec: &JobSpec) -> Result<ArtifactLocation> {
        match (&spec.upload, &self.uploader) {
            (Some(target), Some(uploader)) => {
                let receipt = uploader.upload(artifact, &spec.output_name, target).await?;
                info!("Uploaded artifact to {}", receipt.uri);
                Ok(ArtifactLocation::Remote(receipt))
            }
            (Some(_), None) => Err(StitchError::Upload("object storage is not enabled".to_string())),
            (None, _) => {
                let path = self.persist_locally(job_id, artifact, &spec.output_name).await?;
                info!("Saved artifact to {}", path.display());
                Ok(ArtifactLocation::Local { path })
            }
        }
    }

    /// Copy the artifact into `output_dir` without replacing an existing file.
    ///
    /// When `output_name` is taken the job id is appended to the file stem.
    async fn persist_locally(&self, job_id: Uuid, artifact: &Path, output_name: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir).await?;

        let preferred = self.output_dir.join(output_name);
        let (mut target, path) = match create_new(&preferred).await {
            Ok(file) => (file, preferred),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let path = self.output_dir.join(unique_name(output_name, job_id));
                warn!("{} already exists, saving as {}", preferred.display(), path.display());
                (create_new(&path).await?, path)
            }
            Err(e) => return Err(e.into()),
        };

        let copied = async {
            let mut source = fs::File::open(artifact).await?;
            tokio::io::copy(&mut source, &mut target).await?;
            target.flush().await
        }
        .await;

        if let Err(e) = copied {
            let _ = fs::remove_file(&path).await;
            return Err(e.into());
        }
        Ok(path)
    }
}

async fn create_new(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create_new(true).open(path).await
}

fn unique_name(output_name: &str, job_id: Uuid) -> String {
    let name = Path::new(output_name);
    let stem = name.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    match name.extension() {
        Some(extension) => format!("{}-{}.{}", stem, job_id.simple(), extension.to_string_lossy()),
        None => format!("{}-{}", stem, job_id.simple()),
    }
}
