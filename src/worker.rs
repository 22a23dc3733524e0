use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify, RwLock, Semaphore};
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::{Result, StitchError};
use crate::job::{FailureSummary, JobArtifact, JobFailure, JobSpec, JobStage};
use crate::pipeline::JobRunner;

pub type JobResult = std::result::Result<JobArtifact, JobFailure>;

/// Final result of a job as exposed through the status endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded(JobArtifact),
    Failed(FailureSummary),
}

/// Snapshot of one job
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub job_id: Uuid,
    pub stage: JobStage,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<JobOutcome>,
}

struct JobEntry {
    submitted_at: DateTime<Utc>,
    stage: watch::Receiver<JobStage>,
    finished_at: Option<DateTime<Utc>>,
    finished: Option<Instant>,
    outcome: Option<JobOutcome>,
}

struct PoolInner {
    runner: Arc<JobRunner>,
    permits: Arc<Semaphore>,
    jobs: RwLock<HashMap<Uuid, JobEntry>>,
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    retention: Duration,
    max_detail_chars: usize,
}

/// Decrements the in-flight count even if the job task panics
struct InFlightGuard(Arc<PoolInner>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Bounded executor for stitching jobs with a queryable registry
#[derive(Clone)]
pub struct JobPool {
    inner: Arc<PoolInner>,
}

impl JobPool {
    pub fn new(runner: Arc<JobRunner>, config: &WorkerConfig, max_detail_chars: usize) -> Self {
        let capacity = config.max_concurrent_jobs.max(1) as usize;
        info!("Job pool ready: {} concurrent job(s)", capacity);

        Self {
            inner: Arc::new(PoolInner {
                runner,
                permits: Arc::new(Semaphore::new(capacity)),
                jobs: RwLock::new(HashMap::new()),
                accepting: AtomicBool::new(true),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                retention: Duration::from_secs(config.status_retention_secs),
                max_detail_chars,
            }),
        }
    }

    pub fn runner(&self) -> &JobRunner {
        &self.inner.runner
    }

    /// Start a job in the background and return its id
    pub async fn submit(&self, spec: JobSpec) -> Result<Uuid> {
        let (job_id, _handle) = self.spawn(spec).await?;
        Ok(job_id)
    }

    /// Run a job and wait for its result.
    ///
    /// The job runs on its own task, so it completes even if the caller goes away.
    pub async fn run(&self, spec: JobSpec) -> Result<(Uuid, JobResult)> {
        let (job_id, handle) = self.spawn(spec).await?;
        let result = handle
            .await
            .map_err(|e| StitchError::Unavailable(format!("job {} aborted: {}", job_id, e)))?;
        Ok((job_id, result))
    }

    pub async fn status(&self, job_id: Uuid) -> Option<JobStatusView> {
        let jobs = self.inner.jobs.read().await;
        jobs.get(&job_id).map(|entry| JobStatusView {
            job_id,
            stage: *entry.stage.borrow(),
            submitted_at: entry.submitted_at,
            finished_at: entry.finished_at,
            outcome: entry.outcome.clone(),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// Stop accepting new jobs; running and queued jobs continue
    pub fn close(&self) {
        if self.inner.accepting.swap(false, Ordering::SeqCst) {
            info!("Job pool closed to new jobs ({} in flight)", self.in_flight());
        }
    }

    /// Wait for every in-flight job to finish.
    ///
    /// Returns false if `timeout` elapsed first.
    pub async fn drain(&self, timeout: Option<Duration>) -> bool {
        let wait = async {
            loop {
                let idle = self.inner.idle.notified();
                if self.in_flight() == 0 {
                    break;
                }
                idle.await;
            }
        };

        match timeout {
            Some(limit) => {
                let drained = time::timeout(limit, wait).await.is_ok();
                if !drained {
                    warn!("Drain timed out with {} job(s) still running", self.in_flight());
                }
                drained
            }
            None => {
                wait.await;
                true
            }
        }
    }

    async fn spawn(&self, spec: JobSpec) -> Result<(Uuid, tokio::task::JoinHandle<JobResult>)> {
        if !self.is_accepting() {
            return Err(StitchError::Unavailable("job pool is shutting down".to_string()));
        }

        let job_id = Uuid::new_v4();
        let (stage_tx, stage_rx) = watch::channel(JobStage::Created);
        {
            let mut jobs = self.inner.jobs.write().await;
            prune_finished(&mut jobs, self.inner.retention);
            jobs.insert(
                job_id,
                JobEntry {
                    submitted_at: Utc::now(),
                    stage: stage_rx,
                    finished_at: None,
                    finished: None,
                    outcome: None,
                },
            );
        }

        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard(Arc::clone(&self.inner));
        let inner = Arc::clone(&self.inner);
        info!("Accepted job {} ({} clip(s))", job_id, spec.clips.len());

        let handle = tokio::spawn(async move {
            let _guard = guard;
            let result = match Arc::clone(&inner.permits).acquire_owned().await {
                Ok(_permit) => inner.runner.run(job_id, spec, &stage_tx).await,
                Err(_) => {
                    stage_tx.send_replace(JobStage::Failed);
                    Err(JobFailure::new(
                        JobStage::Created,
                        StitchError::Unavailable("job pool is closed".to_string()),
                    ))
                }
            };
            inner.record(job_id, &result).await;
            result
        });

        Ok((job_id, handle))
    }
}

impl PoolInner {
    async fn record(&self, job_id: Uuid, result: &JobResult) {
        let outcome = match result {
            Ok(artifact) => JobOutcome::Succeeded(artifact.clone()),
            Err(failure) => JobOutcome::Failed(failure.summary(self.max_detail_chars)),
        };

        let mut jobs = self.jobs.write().await;
        if let Some(entry) = jobs.get_mut(&job_id) {
            entry.finished_at = Some(Utc::now());
            entry.finished = Some(Instant::now());
            entry.outcome = Some(outcome);
        }
    }
}

fn prune_finished(jobs: &mut HashMap<Uuid, JobEntry>, retention: Duration) {
    let before = jobs.len();
    jobs.retain(|_, entry| entry.finished.is_none_or(|at| at.elapsed() < retention));

    let pruned = before - jobs.len();
    if pruned > 0 {
        debug!("Pruned {} finished job record(s)", pruned);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fetch::FetcherTrait;
    use crate::job::JobRequest;
    use crate::media::MockMediaProcessorTrait;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;

    /// Counts concurrent downloads and holds each one briefly
    #[derive(Default)]
    struct SlowFetcher {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FetcherTrait for SlowFetcher {
        async fn fetch(&self, _url: &str, destination: &Path) -> Result<u64> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            time::sleep(Duration::from_millis(50)).await;
            tokio::fs::write(destination, b"clip").await?;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(4)
        }
    }

    fn media() -> MockMediaProcessorTrait {
        let mut media = MockMediaProcessorTrait::new();
        media.expect_check_availability().returning(|| Ok(()));
        media.expect_normalize_clip().returning(|_, output, _, _, _| {
            std::fs::write(output, b"norm").unwrap();
            Ok(())
        });
        media.expect_concatenate().returning(|_, output, _, _| {
            std::fs::write(output, b"joined").unwrap();
            Ok(())
        });
        media
    }

    fn pool(root: &Path, worker: WorkerConfig, fetcher: SlowFetcher) -> JobPool {
        let mut config = Config::default();
        config.pipeline.scratch_root = Some(root.join("scratch"));
        config.pipeline.output_dir = root.join("output");
        config.worker = worker.clone();

        let runner = JobRunner::new(Arc::new(config), Box::new(fetcher), Box::new(media()), None).unwrap();
        JobPool::new(Arc::new(runner), &worker, 200)
    }

    fn spec(pool: &JobPool) -> JobSpec {
        let request: JobRequest = serde_json::from_value(json!({
            "clips": ["https://cdn.example.com/a.mp4"],
            "upload": false
        }))
        .unwrap();
        pool.runner().prepare(request).unwrap()
    }

    #[tokio::test]
    async fn test_submitted_job_reaches_done() {
        let root = assert_fs::TempDir::new().unwrap();
        let pool = pool(root.path(), WorkerConfig::default(), SlowFetcher::default());

        let job_id = pool.submit(spec(&pool)).await.unwrap();
        assert!(pool.status(job_id).await.is_some());

        assert!(pool.drain(Some(Duration::from_secs(5))).await);
        let status = pool.status(job_id).await.unwrap();

        assert_eq!(status.stage, JobStage::Done);
        assert!(status.finished_at.is_some());
        assert!(matches!(status.outcome, Some(JobOutcome::Succeeded(_))));
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let root = assert_fs::TempDir::new().unwrap();
        let fetcher = SlowFetcher::default();
        let peak = Arc::clone(&fetcher.peak);
        let worker = WorkerConfig {
            max_concurrent_jobs: 1,
            ..WorkerConfig::default()
        };
        let pool = pool(root.path(), worker, fetcher);

        for _ in 0..3 {
            pool.submit(spec(&pool)).await.unwrap();
        }
        assert!(pool.drain(Some(Duration::from_secs(5))).await);

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_waits_for_result() {
        let root = assert_fs::TempDir::new().unwrap();
        let pool = pool(root.path(), WorkerConfig::default(), SlowFetcher::default());

        let (job_id, result) = pool.run(spec(&pool)).await.unwrap();
        let artifact = result.unwrap();

        assert_eq!(artifact.job_id, job_id);
        assert_eq!(artifact.clip_count, 1);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_jobs() {
        let root = assert_fs::TempDir::new().unwrap();
        let pool = pool(root.path(), WorkerConfig::default(), SlowFetcher::default());

        pool.close();
        assert!(!pool.is_accepting());

        let result = pool.submit(spec(&pool)).await;
        assert!(matches!(result, Err(StitchError::Unavailable(_))));
        assert!(pool.drain(None).await);
    }

    #[tokio::test]
    async fn test_finished_records_are_pruned() {
        let root = assert_fs::TempDir::new().unwrap();
        let worker = WorkerConfig {
            status_retention_secs: 0,
            ..WorkerConfig::default()
        };
        let pool = pool(root.path(), worker, SlowFetcher::default());

        let (first, _) = pool.run(spec(&pool)).await.unwrap();
        assert!(pool.status(first).await.is_some());

        let second = pool.submit(spec(&pool)).await.unwrap();
        assert!(pool.status(first).await.is_none());
        assert!(pool.status(second).await.is_some());
        assert!(pool.status(Uuid::new_v4()).await.is_none());
    }
}
