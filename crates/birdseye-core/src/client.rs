//! Sources of recorded trace data.
//!
//! [`CallSource`] is the logical contract of the trace server: call detail
//! by call id, calls by function body hash, and which body hashes have
//! calls at all. The HTTP transport is not part of this crate; the
//! [`StaticCallSource`] serves data already loaded from JSON, and
//! [`ReportingSource`] wraps any source to turn load failures into
//! coalesced user notifications.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::{BirdseyeError, BirdseyeResult};
use crate::hash::ContentHash;
use crate::host::Notification;
use crate::trace::{CallDetail, CallsByHash, HashPresence};

/// Title of every load failure notification.
pub const LOAD_ERROR_TITLE: &str = "Error communicating with birdseye server";

/// Status the server answers with when it predates the requested endpoint.
const NOT_FOUND: u16 = 404;

// ============================================================================
// API Paths
// ============================================================================

/// Path of the call detail endpoint, relative to the API root.
pub fn call_path(call_id: &str) -> String {
    format!("call/{}", call_id)
}

/// Path of the calls-by-body-hash endpoint.
pub fn calls_by_hash_path(hash: &ContentHash) -> String {
    format!("calls_by_body_hash/{}", hash)
}

/// Path of the body-hash presence endpoint (POST).
pub const BODY_HASHES_PRESENT_PATH: &str = "body_hashes_present/";

// ============================================================================
// Call Source
// ============================================================================

/// Where call data comes from.
///
/// Implementations may block. They are shared with the hash poller, so
/// they must be thread-safe.
pub trait CallSource: Send + Sync {
    /// Captured data and function structure of one call.
    fn call_detail(&self, call_id: &str) -> BirdseyeResult<CallDetail>;

    /// Calls recorded for a function body, with its traced ranges.
    fn calls_by_hash(&self, hash: &ContentHash) -> BirdseyeResult<CallsByHash>;

    /// Call counts of those `hashes` the server knows.
    fn body_hashes_present(&self, hashes: &[ContentHash]) -> BirdseyeResult<Vec<HashPresence>>;
}

/// Serves trace data held in memory.
///
/// Unknown ids and hashes fail like the server does, with a 404.
#[derive(Debug, Clone, Default)]
pub struct StaticCallSource {
    details: HashMap<String, CallDetail>,
    listings: HashMap<ContentHash, CallsByHash>,
}

impl StaticCallSource {
    /// Empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the listing of a function body.
    pub fn with_listing(mut self, hash: ContentHash, listing: CallsByHash) -> Self {
        self.listings.insert(hash, listing);
        self
    }

    /// Add the detail of a call.
    pub fn with_detail(mut self, call_id: impl Into<String>, detail: CallDetail) -> Self {
        self.details.insert(call_id.into(), detail);
        self
    }
}

impl CallSource for StaticCallSource {
    fn call_detail(&self, call_id: &str) -> BirdseyeResult<CallDetail> {
        self.details
            .get(call_id)
            .cloned()
            .ok_or_else(|| BirdseyeError::Server {
                status: NOT_FOUND,
                message: format!("no call '{}'", call_id),
            })
    }

    fn calls_by_hash(&self, hash: &ContentHash) -> BirdseyeResult<CallsByHash> {
        self.listings
            .get(hash)
            .cloned()
            .ok_or_else(|| BirdseyeError::Server {
                status: NOT_FOUND,
                message: format!("no function with body hash {}", hash),
            })
    }

    fn body_hashes_present(&self, hashes: &[ContentHash]) -> BirdseyeResult<Vec<HashPresence>> {
        Ok(hashes
            .iter()
            .filter_map(|hash| {
                self.listings.get(hash).map(|listing| HashPresence {
                    hash: hash.clone(),
                    count: listing.calls.len() as u32,
                })
            })
            .collect())
    }
}

// ============================================================================
// Reporting Source
// ============================================================================

#[derive(Debug, Default)]
struct ReportState {
    in_error: bool,
    pending: Vec<Notification>,
}

/// Wraps a source and reports load failures to the user, once per outage.
///
/// The first failure queues a notification; later failures stay silent
/// until a request succeeds again. While a locally started server is still
/// within its start-up grace period, failures are not reported at all.
/// Queued notifications are taken by the single owner with
/// [`ReportingSource::drain_notifications`] and shown through its host.
#[derive(Debug)]
pub struct ReportingSource<S> {
    inner: S,
    startup: Option<(Instant, Duration)>,
    state: Mutex<ReportState>,
}

impl<S: CallSource> ReportingSource<S> {
    /// Report every failure of `inner`.
    pub fn new(inner: S) -> Self {
        ReportingSource {
            inner,
            startup: None,
            state: Mutex::new(ReportState::default()),
        }
    }

    /// Stay silent for `grace` after a server started at `started_at`.
    pub fn with_startup_grace(mut self, started_at: Instant, grace: Duration) -> Self {
        self.startup = Some((started_at, grace));
        self
    }

    /// The wrapped source.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Take the notifications queued so far.
    pub fn drain_notifications(&self) -> Vec<Notification> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut state.pending)
    }

    /// Whether the last request failed.
    pub fn in_error(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_error
    }

    fn in_grace_period(&self) -> bool {
        self.startup
            .is_some_and(|(started_at, grace)| started_at.elapsed() <= grace)
    }

    fn observe<T>(&self, result: BirdseyeResult<T>) -> BirdseyeResult<T> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &result {
            Ok(_) => state.in_error = false,
            Err(err) if err.is_load_failure() => {
                warn!(error = %err, "trace server request failed");
                if !state.in_error && !self.in_grace_period() {
                    state.pending.push(Notification {
                        title: LOAD_ERROR_TITLE.to_string(),
                        message: failure_message(err),
                    });
                    state.in_error = true;
                }
            }
            Err(_) => {}
        }
        result
    }
}

impl<S: CallSource> CallSource for ReportingSource<S> {
    fn call_detail(&self, call_id: &str) -> BirdseyeResult<CallDetail> {
        self.observe(self.inner.call_detail(call_id))
    }

    fn calls_by_hash(&self, hash: &ContentHash) -> BirdseyeResult<CallsByHash> {
        self.observe(self.inner.calls_by_hash(hash))
    }

    fn body_hashes_present(&self, hashes: &[ContentHash]) -> BirdseyeResult<Vec<HashPresence>> {
        self.observe(self.inner.body_hashes_present(hashes))
    }
}

/// User-facing text of a load failure.
fn failure_message(err: &BirdseyeError) -> String {
    match err {
        BirdseyeError::Server { status, .. } => {
            let mut message = format!("Request returned response with code {}.", status);
            if *status == NOT_FOUND {
                message.push_str(
                    " You probably need to upgrade birdseye:\n\
                     1. pip install --upgrade birdseye\n\
                     2. Delete existing database tables (e.g. delete $HOME/.birdseye.db).\n\
                     3. Restart the server.",
                );
            }
            message
        }
        BirdseyeError::Transport { message } => message.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
