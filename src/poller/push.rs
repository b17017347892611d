use std::sync::Arc;

use futures::StreamExt;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::Poller;
use crate::BackoffPolicy;
use crate::ChangeSource;
use crate::Error;
use crate::ErrorCategory;
use crate::OperationKind;
use crate::StorageError;

/// How one push channel session ended
#[derive(Debug)]
enum PushSession {
    /// Storage offers no push channel for the key
    Unsupported,
    Cancelled,
    Failed {
        error: StorageError,
        /// At least one notification arrived before the failure
        delivered: bool,
    },
}

impl Poller {
    /// Keeps a push channel open for `key` until `token` is cancelled.
    ///
    /// Failed channels are reopened with the Connection retry policy. Once that budget is used
    /// up the key is served by polling alone; it stays watched either way.
    pub(super) async fn supervise_push(
        self: Arc<Self>,
        key: String,
        token: CancellationToken,
    ) {
        let policy = BackoffPolicy::for_category(ErrorCategory::Connection, &self.executor_config);
        let mut failures: u32 = 0;

        loop {
            let session = tokio::select! {
                _ = token.cancelled() => PushSession::Cancelled,
                session = self.push_session(&key, &token) => session,
            };

            let (error, delivered) = match session {
                PushSession::Unsupported => {
                    debug!(key = %key, "No push channel available, polling only");
                    return;
                }
                PushSession::Cancelled => {
                    trace!(key = %key, "Push supervisor stopped");
                    return;
                }
                PushSession::Failed { error, delivered } => (error, delivered),
            };

            self.set_push_live(&key, false);
            if delivered {
                failures = 0;
            }
            failures += 1;

            if !policy.allows_retry(failures) {
                warn!(
                    key = %key,
                    failures,
                    "Push channel keeps failing, falling back to polling: {}",
                    error
                );
                return;
            }

            let delay = policy.delay_for(failures, &error);
            debug!(key = %key, failures, ?delay, "Reopening push channel: {}", error);
            tokio::select! {
                _ = token.cancelled() => return,
                _ = sleep(delay) => {}
            }
        }
    }

    async fn push_session(
        &self,
        key: &str,
        token: &CancellationToken,
    ) -> PushSession {
        let storage = self.storage.clone();
        let opened = self
            .executor
            .execute(OperationKind::Subscribe, || {
                let storage = storage.clone();
                let key = key.to_string();
                async move { storage.subscribe(&key).await }
            })
            .await;

        let mut stream = match opened {
            Ok(Some(stream)) => stream,
            Ok(None) => return PushSession::Unsupported,
            Err(Error::Shutdown) => return PushSession::Cancelled,
            Err(e) => {
                let error = e
                    .storage_error()
                    .cloned()
                    .unwrap_or_else(|| StorageError::Connection(e.to_string()));
                return PushSession::Failed {
                    error,
                    delivered: false,
                };
            }
        };

        self.set_push_live(key, true);
        info!(key, "Push channel open");

        let mut delivered = false;
        loop {
            let item = tokio::select! {
                _ = token.cancelled() => return PushSession::Cancelled,
                item = stream.next() => item,
            };

            match item {
                Some(Ok(notification)) if notification.key == key => {
                    delivered = true;
                    if self.is_watched(key) {
                        self.detector.observe(key, notification.snapshot, ChangeSource::Push);
                    }
                }
                Some(Ok(notification)) => {
                    trace!(key, other = %notification.key, "Ignoring push for another key");
                }
                Some(Err(error)) => return PushSession::Failed { error, delivered },
                None => {
                    return PushSession::Failed {
                        error: StorageError::Connection("push channel closed".to_string()),
                        delivered,
                    }
                }
            }
        }
    }
}
