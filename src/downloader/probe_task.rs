//! Size probe task: HEAD the URL and add its length to the expected total.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::pool::Job;

use super::Shared;

pub(crate) struct ProbeJob {
    url: String,
    shared: Arc<Shared>,
}

impl ProbeJob {
    pub(crate) fn new(shared: Arc<Shared>, url: &str) -> Self {
        Self {
            url: url.to_string(),
            shared,
        }
    }
}

impl Job for ProbeJob {
    async fn run(self, cancel: CancellationToken) {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = self.shared.transport.content_length(&self.url) => result,
        };

        match result {
            Ok(length) => {
                self.shared.progress.add_expected(length);
                tracing::trace!(url = %self.url, length, "size probe finished");
            }
            // Sizes are advisory; an unknown length only degrades the percentage
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "size probe failed, ignoring");
            }
        }
    }
}
