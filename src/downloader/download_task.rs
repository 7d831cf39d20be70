//! Download task: GET, stream into staging, relocate.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

use crate::error::DownloadError;
use crate::http::ResponseBody;
use crate::pool::{Job, WorkerPool};
use crate::types::{Event, Request};
use crate::utils;

use super::Shared;

/// Result of a transfer that did not fail
enum Transfer {
    Done { filename: String, filepath: PathBuf },
    Cancelled,
}

/// One queued download
pub(crate) struct DownloadJob {
    task_id: u64,
    request: Request,
    shared: Arc<Shared>,
    /// Pool this job was queued on, for `files_remaining` in its events
    pool: Weak<WorkerPool<DownloadJob>>,
}

impl DownloadJob {
    pub(crate) fn new(
        task_id: u64,
        request: Request,
        shared: Arc<Shared>,
        pool: Weak<WorkerPool<DownloadJob>>,
    ) -> Self {
        Self {
            task_id,
            request,
            shared,
            pool,
        }
    }

    fn files_remaining(&self) -> usize {
        self.pool.upgrade().map(|pool| pool.pending()).unwrap_or(0)
    }

    async fn transfer(&self, cancel: &CancellationToken) -> Result<Transfer, DownloadError> {
        let url = self.request.url();
        let destination = self
            .request
            .destination()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.shared.config.output_dir().clone());

        // Checked up front so a bad destination never costs a transfer
        if !utils::is_directory(&destination).await {
            return Err(DownloadError::MissingOrInvalidDestination { path: destination });
        }

        let mut body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Transfer::Cancelled),
            response = self.shared.transport.get(url) => response?,
        };

        let filename = utils::derive_filename(url, self.request.filename());
        let staged = self
            .shared
            .staging_dir
            .join(utils::staged_name(self.task_id, &filename));

        match self.stream_to_staging(body.as_mut(), &staged, cancel).await {
            Ok(true) => {}
            Ok(false) => {
                discard(&staged).await;
                return Ok(Transfer::Cancelled);
            }
            Err(e) => {
                discard(&staged).await;
                return Err(e);
            }
        }

        let target = destination.join(&filename);
        if let Err(e) = utils::relocate_file(&staged, &target).await {
            discard(&staged).await;
            return Err(DownloadError::RelocationFailure {
                from: staged,
                to: target,
                reason: e.to_string(),
            });
        }

        let filepath = std::path::absolute(&target).unwrap_or(target);
        Ok(Transfer::Done { filename, filepath })
    }

    /// Copy the body into `staged`; returns false if cancelled midway
    async fn stream_to_staging(
        &self,
        body: &mut dyn ResponseBody,
        staged: &Path,
        cancel: &CancellationToken,
    ) -> Result<bool, DownloadError> {
        let staging_error = |e: std::io::Error| DownloadError::Staging {
            path: staged.to_path_buf(),
            reason: e.to_string(),
        };

        // The staging directory is only ever emptied, but a host may have removed it
        utils::ensure_directory(&self.shared.staging_dir, "staging directory")
            .await
            .map_err(staging_error)?;
        let file = tokio::fs::File::create(staged)
            .await
            .map_err(staging_error)?;
        let mut writer =
            BufWriter::with_capacity(self.shared.config.download.write_buffer_size, file);

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(false),
                chunk = body.next_chunk() => chunk?,
            };
            let Some(chunk) = chunk else {
                break;
            };

            writer.write_all(&chunk).await.map_err(staging_error)?;
            self.shared.progress.add_downloaded(chunk.len() as u64);
        }

        writer.flush().await.map_err(staging_error)?;
        Ok(true)
    }
}

impl Job for DownloadJob {
    async fn run(self, cancel: CancellationToken) {
        tracing::debug!(
            task_id = self.task_id,
            url = self.request.url(),
            "download started"
        );

        match self.transfer(&cancel).await {
            Ok(Transfer::Done { filename, filepath }) => {
                tracing::debug!(
                    task_id = self.task_id,
                    filepath = %filepath.display(),
                    "download finished"
                );
                self.shared.publish(Event::FileDownloaded {
                    progress: self.shared.progress.snapshot(self.files_remaining()),
                    filename,
                    filepath,
                });
            }
            Ok(Transfer::Cancelled) => {
                // Reported once for the whole batch by the coordinator
                tracing::debug!(task_id = self.task_id, "download cancelled");
            }
            Err(e) if cancel.is_cancelled() => {
                tracing::debug!(task_id = self.task_id, error = %e, "download failed after cancel");
            }
            Err(e) => {
                let errors = self.shared.progress.record_error();
                tracing::warn!(
                    task_id = self.task_id,
                    url = self.request.url(),
                    code = e.code(),
                    error = %e,
                    errors,
                    "download failed"
                );
                self.shared.publish(Event::Error {
                    progress: self.shared.progress.snapshot(self.files_remaining()),
                    failing_url: self.request.url().to_string(),
                });
            }
        }
    }
}

async fn discard(staged: &Path) {
    if let Err(e) = tokio::fs::remove_file(staged).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %staged.display(), error = %e, "failed to discard staged file");
    }
}
