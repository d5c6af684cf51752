//! The per-connection pipeline coordinator: a FIFO of active streams
//! plus a "request lock" and wake condition, serializing the one
//! send-side writer (client) or read-side reader (server) that may
//! touch the socket at a time while preserving issue order for the
//! other side.
//!
//! The FIFO and the lock are merged into one `Mutex`-guarded struct so
//! both client and server roles can share the same type, and
//! `req_cond`/the FIFO wake condition are a single `tokio::sync::Notify`.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time;

use crate::error::StreamError;

/// Opaque identity for a stream within one connection's pipeline.
/// Streams compare by this id, not by address, so the pipeline can be
/// inspected without holding a borrow of the stream itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(u64);

struct Inner {
    fifo: VecDeque<StreamId>,
    req_locked: Option<StreamId>,
    next_id: u64,
}

/// Per-connection pipeline state: the request lock and the FIFO of
/// streams awaiting their turn to read (client) or to have their
/// response written (server).
pub struct Pipeline {
    inner: Mutex<Inner>,
    req_cond: Notify,
}

impl Pipeline {
    pub fn new() -> Pipeline {
        Pipeline {
            inner: Mutex::new(Inner { fifo: VecDeque::new(), req_locked: None, next_id: 0 }),
            req_cond: Notify::new(),
        }
    }

    pub fn allocate_id(&self) -> StreamId {
        let mut inner = self.inner.lock().unwrap();
        let id = StreamId(inner.next_id);
        inner.next_id += 1;
        id
    }

    /// Acquire the request lock for `id`, waiting up to `timeout` if
    /// another stream holds it. Fails with `StreamError::TimedOut` if
    /// the wait exceeds the deadline.
    pub async fn acquire_req_lock(&self, id: StreamId, timeout: Duration) -> Result<(), StreamError> {
        let deadline = time::Instant::now() + timeout;
        let mut waited = false;
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.req_locked.is_none() {
                    inner.req_locked = Some(id);
                    if waited {
                        tracing::trace!(?id, "req_locked acquired after waiting");
                    }
                    return Ok(());
                }
            }
            if !waited {
                tracing::trace!(?id, holder = ?self.inner.lock().unwrap().req_locked, "blocking on req_cond");
                waited = true;
            }
            let remaining = deadline.saturating_duration_since(time::Instant::now());
            if remaining.is_zero() {
                return Err(StreamError::TimedOut);
            }
            time::timeout(remaining, self.req_cond.notified())
                .await
                .map_err(|_| StreamError::TimedOut)?;
        }
    }

    /// Release the request lock, if `id` holds it, and wake waiters.
    /// Called as a side effect bound to the state transition that ends
    /// whichever half-direction this role holds the lock for: a
    /// client's write completion, or a server's read completion.
    pub fn release_req_lock(&self, id: StreamId) {
        let mut inner = self.inner.lock().unwrap();
        if inner.req_locked == Some(id) {
            inner.req_locked = None;
            drop(inner);
            self.req_cond.notify_waiters();
        }
    }

    /// Push a stream onto the tail of the FIFO once it has begun
    /// sending (client: after acquiring `req_locked`; server: when a
    /// request is dispatched for handling).
    pub fn push(&self, id: StreamId) {
        let mut inner = self.inner.lock().unwrap();
        inner.fifo.push_back(id);
    }

    /// True if `id` is at the head of the FIFO -- the only stream
    /// permitted to perform order-sensitive socket I/O right now.
    pub fn is_head(&self, id: StreamId) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.fifo.front() == Some(&id)
    }

    /// True if `id` currently holds the request lock. Used by a client
    /// stream's `write_chunk` to check that the caller actually holds
    /// the lock it's writing under.
    pub fn owns_req_lock(&self, id: StreamId) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.req_locked == Some(id)
    }

    /// Pop the head of the FIFO, if it is `id`. Called as a side effect
    /// bound to the state transition that ends the read-side direction
    /// for a client (dequeuing means "this response has been fully
    /// read") or the write-side direction for a server (dequeuing means
    /// "this response has been fully written").
    pub fn pop_if_head(&self, id: StreamId) {
        let mut inner = self.inner.lock().unwrap();
        if inner.fifo.front() == Some(&id) {
            inner.fifo.pop_front();
        }
    }
}

impl Default for Pipeline {
    fn default() -> Pipeline {
        Pipeline::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn single_lock_holder_at_a_time() {
        let pipeline = Arc::new(Pipeline::new());
        let a = pipeline.allocate_id();
        let b = pipeline.allocate_id();
        pipeline.acquire_req_lock(a, Duration::from_secs(1)).await.unwrap();

        let p2 = pipeline.clone();
        let acquired_b = tokio::spawn(async move {
            p2.acquire_req_lock(b, Duration::from_secs(1)).await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!acquired_b.is_finished());

        pipeline.release_req_lock(a);
        acquired_b.await.unwrap();
    }

    #[tokio::test]
    async fn fifo_preserves_issue_order() {
        let pipeline = Pipeline::new();
        let a = pipeline.allocate_id();
        let b = pipeline.allocate_id();
        pipeline.push(a);
        pipeline.push(b);
        assert!(pipeline.is_head(a));
        assert!(!pipeline.is_head(b));
        pipeline.pop_if_head(a);
        assert!(pipeline.is_head(b));
    }

    #[tokio::test]
    async fn lock_wait_times_out() {
        let pipeline = Pipeline::new();
        let a = pipeline.allocate_id();
        let b = pipeline.allocate_id();
        pipeline.acquire_req_lock(a, Duration::from_secs(1)).await.unwrap();
        let err = pipeline.acquire_req_lock(b, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, StreamError::TimedOut));
    }
}
