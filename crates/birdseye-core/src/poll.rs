//! Background polling of which function bodies have recorded calls.
//!
//! The poller runs on the tokio runtime. Every tick it reads the current set
//! of body hashes from a `watch` channel, asks the [`CallSource`] about them
//! on the blocking pool and sends the answer over an `mpsc` channel. It
//! never touches a [`Session`](crate::session::Session); the session's owner
//! drains the channel on its own thread.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::CallSource;
use crate::hash::ContentHash;
use crate::trace::HashPresence;

/// Presence maps buffered before the poller waits for the owner.
const CHANNEL_CAPACITY: usize = 8;

/// Handle of a running hash poller.
#[derive(Debug)]
pub struct HashPoller {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl HashPoller {
    /// Start polling every `period`, first one `period` from now.
    ///
    /// Must be called within a tokio runtime. The poller stops when
    /// cancelled, when the hash sender is dropped or when the returned
    /// receiver is dropped.
    pub fn spawn(
        source: Arc<dyn CallSource>,
        mut hashes: watch::Receiver<Vec<ContentHash>>,
        period: Duration,
    ) -> (Self, mpsc::Receiver<Vec<HashPresence>>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if hashes.has_changed().is_err() {
                            debug!("hash sender dropped, stopping poller");
                            break;
                        }
                        let current = hashes.borrow_and_update().clone();
                        let source = Arc::clone(&source);
                        let result = tokio::task::spawn_blocking(move || {
                            source.body_hashes_present(&current)
                        })
                        .await;
                        let presence = match result {
                            Ok(Ok(presence)) => presence,
                            Ok(Err(err)) => {
                                debug!(error = %err, "hash poll failed");
                                continue;
                            }
                            Err(err) => {
                                warn!(error = ?err, "hash poll task panicked");
                                continue;
                            }
                        };
                        if tx.send(presence).await.is_err() {
                            debug!("presence receiver dropped, stopping poller");
                            break;
                        }
                    }
                    _ = token.cancelled() => {
                        debug!("hash poller cancelled");
                        break;
                    }
                }
            }
        });

        (HashPoller { cancel, handle }, rx)
    }

    /// Ask the poller to stop after its current poll.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the polling task has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the poller and wait for it to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.handle.await {
            warn!(error = ?err, "hash poller ended abnormally");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
