// HTTP model downloader (the download job kind's processor)
// reason: reqwest streaming so large checkpoints never sit in memory

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use kiln_core::application::worker::constants::DOWNLOAD_PROGRESS_INTERVAL;
use kiln_core::domain::{DomainError, JobKind, JobStatus};
use kiln_core::kinds::download::validate_download;
use kiln_core::kinds::{DownloadOutput, DownloadPayload};
use kiln_core::port::{JobContext, ProcessError, Processor, ProgressReporter};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Streams a file into `<root>/<category>/<filename>`
///
/// The body is written to `<filename>.part` and renamed when complete; a failed
/// download removes the partial file.
pub struct HttpDownloader {
    client: reqwest::Client,
    root: PathBuf,
    progress_interval: Duration,
}

impl HttpDownloader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            root: root.into(),
            progress_interval: DOWNLOAD_PROGRESS_INTERVAL,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn target_path(&self, payload: &DownloadPayload) -> PathBuf {
        self.root
            .join(payload.category.dir_name())
            .join(&payload.filename)
    }

    async fn stream_to(
        &self,
        payload: &DownloadPayload,
        part: &Path,
        progress: &ProgressReporter,
    ) -> Result<u64, ProcessError> {
        let response = self
            .client
            .get(&payload.url)
            .send()
            .await
            .map_err(|e| ProcessError::Backend(format!("request failed: {}", e)))?;
        let mut response = response
            .error_for_status()
            .map_err(|e| ProcessError::Failed(format!("download failed: {}", e)))?;

        let total = response.content_length().or(payload.expected_bytes);
        let mut file = fs::File::create(part).await?;
        let mut downloaded: u64 = 0;
        let mut last_report = Instant::now();

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ProcessError::Failed(format!("download interrupted: {}", e)))?
        {
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if last_report.elapsed() >= self.progress_interval {
                last_report = Instant::now();
                let percent = total
                    .filter(|t| *t > 0)
                    .map(|t| (downloaded as f64 / t as f64 * 100.0).min(99.0) as f32)
                    .unwrap_or(0.0);
                progress
                    .message(percent, describe_progress(downloaded, total))
                    .await;
            }
        }
        file.flush().await?;
        file.sync_all().await?;

        if let Some(expected) = total {
            if downloaded < expected {
                return Err(ProcessError::Failed(format!(
                    "download truncated: {} of {} bytes",
                    downloaded, expected
                )));
            }
        }
        Ok(downloaded)
    }
}

fn describe_progress(downloaded: u64, total: Option<u64>) -> String {
    match total {
        Some(total) => format!(
            "{:.1} / {:.1} MB",
            downloaded as f64 / BYTES_PER_MB,
            total as f64 / BYTES_PER_MB
        ),
        None => format!("{:.1} MB", downloaded as f64 / BYTES_PER_MB),
    }
}

#[async_trait]
impl Processor for HttpDownloader {
    type Payload = DownloadPayload;
    type Output = DownloadOutput;

    fn kind(&self) -> JobKind {
        JobKind::Download
    }

    fn validate(&self, payload: &DownloadPayload) -> Result<(), DomainError> {
        validate_download(payload)
    }

    async fn process(
        &self,
        ctx: JobContext,
        payload: DownloadPayload,
        progress: ProgressReporter,
    ) -> Result<DownloadOutput, ProcessError> {
        let target = self.target_path(&payload);
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir).await?;
        }
        let part = target.with_file_name(format!("{}.part", payload.filename));

        progress.report(JobStatus::Downloading, 0.0).await;
        info!(job_id = %ctx.job_id, url = %payload.url, target = %target.display(), "Download started");

        let bytes = match self.stream_to(&payload, &part, &progress).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&part).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %part.display(), error = %cleanup, "Failed to remove partial download");
                    }
                }
                return Err(e);
            }
        };
        fs::rename(&part, &target).await?;

        info!(job_id = %ctx.job_id, bytes = bytes, "Download finished");
        Ok(DownloadOutput {
            local_path: target.display().to_string(),
            bytes,
        })
    }
}
