use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::time;
use tracing::{debug, info};

use crate::config::FetchConfig;
use crate::error::{Result, StitchError};

/// Retrieves remote resources into local scratch storage
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FetcherTrait: Send + Sync {
    /// Stream `url` into `destination`, returning the number of bytes written
    async fn fetch(&self, url: &str, destination: &Path) -> Result<u64>;
}

#[derive(Error, Debug)]
enum FetchFailure {
    #[error("HTTP {0}")]
    Status(StatusCode),

    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("timed out after {0} seconds")]
    TimedOut(u64),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Streaming HTTP(S) downloader
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
    buffer_capacity: usize,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            timeout,
            buffer_capacity: config.chunk_size_bytes.max(1),
        })
    }

    /// The timeout applies to the response head and to every body chunk, so
    /// large files are not cut off as long as data keeps flowing.
    async fn stream_to_file(&self, url: &str, destination: &Path) -> std::result::Result<u64, FetchFailure> {
        let timed_out = |_| FetchFailure::TimedOut(self.timeout.as_secs());
        let write_failed = |source: std::io::Error| FetchFailure::Write {
            path: destination.to_path_buf(),
            source,
        };

        let response = time::timeout(self.timeout, self.client.get(url).send())
            .await
            .map_err(timed_out)??;

        if !response.status().is_success() {
            return Err(FetchFailure::Status(response.status()));
        }

        let file = fs::File::create(destination).await.map_err(write_failed)?;
        let mut writer = BufWriter::with_capacity(self.buffer_capacity, file);
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = time::timeout(self.timeout, stream.next()).await.map_err(timed_out)? {
            let chunk = chunk?;
            writer.write_all(&chunk).await.map_err(write_failed)?;
            written += chunk.len() as u64;
        }

        writer.flush().await.map_err(write_failed)?;
        Ok(written)
    }
}

#[async_trait]
impl FetcherTrait for HttpFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<u64> {
        info!("Downloading {} -> {}", url, destination.display());

        match self.stream_to_file(url, destination).await {
            Ok(bytes) => {
                debug!("Downloaded {} bytes from {}", bytes, url);
                Ok(bytes)
            }
            Err(failure) => {
                // the workspace goes away with the job; this only keeps it tidy
                let _ = fs::remove_file(destination).await;
                Err(StitchError::Download {
                    url: url.to_string(),
                    cause: failure.to_string(),
                })
            }
        }
    }
}
