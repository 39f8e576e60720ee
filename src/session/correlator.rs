//! Request/response correlation.
//!
//! Owned by the session driver. Every pending request holds a single-shot
//! reply channel; removing the entry from the map is what settles it, so
//! whichever of response, deadline, cancellation or teardown comes first
//! wins and the rest find nothing to settle.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeSet;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::Response;

use super::config::MAX_TIMEOUT;

// ============================================================================
// Types
// ============================================================================

/// Settlement channel of one request.
pub(crate) type Reply = oneshot::Sender<Result<Value>>;

/// One request awaiting its response.
struct PendingRequest {
    method: String,
    submitted_at: Instant,
    deadline: Instant,
    timeout: Duration,
    reply: Reply,
}

// ============================================================================
// Correlator
// ============================================================================

/// Pending request map plus an ordered deadline index.
pub(crate) struct Correlator {
    pending: FxHashMap<RequestId, PendingRequest>,
    deadlines: BTreeSet<(Instant, RequestId)>,
    max_pending: usize,
}

impl Correlator {
    /// Creates an empty correlator accepting up to `max_pending` requests.
    pub(crate) fn new(max_pending: usize) -> Self {
        Self {
            pending: FxHashMap::default(),
            deadlines: BTreeSet::new(),
            max_pending,
        }
    }

    /// Changes the in-flight cap for later registrations.
    pub(crate) fn set_max_pending(&mut self, max_pending: usize) {
        self.max_pending = max_pending;
    }

    /// Checks whether a request with `id` may be registered.
    ///
    /// # Errors
    ///
    /// - [`Error::TooManyPending`] if the cap is reached
    /// - [`Error::InvalidFrame`] if `id` is already pending
    pub(crate) fn admit(&self, id: &RequestId) -> Result<()> {
        if self.pending.len() >= self.max_pending {
            return Err(Error::TooManyPending {
                pending: self.pending.len(),
                max: self.max_pending,
            });
        }

        if self.pending.contains_key(id) {
            return Err(Error::invalid_frame(format!("duplicate request id {id}")));
        }

        Ok(())
    }

    /// Records a pending request with a deadline of `now + timeout`.
    ///
    /// `timeout` is capped at [`MAX_TIMEOUT`]. Callers check
    /// [`Correlator::admit`] first.
    pub(crate) fn register(
        &mut self,
        id: RequestId,
        method: String,
        timeout: Duration,
        now: Instant,
        reply: Reply,
    ) {
        let timeout = timeout.min(MAX_TIMEOUT);
        let deadline = now + timeout;
        self.deadlines.insert((deadline, id.clone()));
        self.pending.insert(
            id,
            PendingRequest {
                method,
                submitted_at: now,
                deadline,
                timeout,
                reply,
            },
        );
    }

    /// Settles the request matching `response`.
    ///
    /// Returns `false` if no request with that id is pending (late or
    /// unknown response); the response is dropped.
    pub(crate) fn resolve(&mut self, response: Response) -> bool {
        let Some(entry) = self.take(&response.id) else {
            debug!(id = %response.id, "Dropping response for unknown request");
            return false;
        };

        trace!(
            id = %response.id,
            method = %entry.method,
            elapsed_ms = entry.submitted_at.elapsed().as_millis(),
            ok = response.is_ok(),
            "Request settled"
        );
        let _ = entry.reply.send(response.into_result());
        true
    }

    /// Settles every request whose deadline is at or before `now` with a
    /// timeout. Returns how many expired.
    pub(crate) fn expire(&mut self, now: Instant) -> usize {
        let mut expired = 0;

        while let Some((deadline, _)) = self.deadlines.first()
            && *deadline <= now
        {
            let Some((_, id)) = self.deadlines.pop_first() else {
                break;
            };
            if let Some(entry) = self.pending.remove(&id) {
                debug!(%id, method = %entry.method, "Request timed out");
                let error = Error::request_timeout(id, entry.method, entry.timeout);
                let _ = entry.reply.send(Err(error));
                expired += 1;
            }
        }

        expired
    }

    /// Settles `id` as cancelled. Returns `false` if it was not pending.
    pub(crate) fn cancel(&mut self, id: &RequestId) -> bool {
        let Some(entry) = self.take(id) else {
            return false;
        };

        debug!(%id, method = %entry.method, "Request cancelled");
        let _ = entry.reply.send(Err(Error::cancelled(id.clone())));
        true
    }

    /// Settles every pending request with `error` and clears the map.
    pub(crate) fn fail_all(&mut self, error: &Error) -> usize {
        self.deadlines.clear();
        let count = self.pending.len();

        for (_, entry) in self.pending.drain() {
            let _ = entry.reply.send(Err(error.clone()));
        }

        if count > 0 {
            debug!(count, %error, "Failed pending requests");
        }
        count
    }

    /// Earliest pending deadline.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.first().map(|(deadline, _)| *deadline)
    }

    /// Number of pending requests.
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if nothing is pending.
    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn take(&mut self, id: &RequestId) -> Option<PendingRequest> {
        let entry = self.pending.remove(id)?;
        self.deadlines.remove(&(entry.deadline, id.clone()));
        Some(entry)
    }
}

// ============================================================================
// Tests
// ============================================================================
