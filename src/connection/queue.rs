//! FIFO request queue between callers and the connection worker
//!
//! Each request carries its own oneshot reply channel, so a result is only
//! ever delivered to the caller that submitted it.

use crate::query::QueryResult;
use crate::{Error, Result};
use tokio::sync::{mpsc, oneshot};

/// Receiving half of a caller's reply channel
pub type ReplyReceiver = oneshot::Receiver<Result<QueryResult>>;

/// A query waiting for the connection
#[derive(Debug)]
pub struct PendingQuery {
    /// Fully substituted SQL text
    pub sql: String,
    reply: oneshot::Sender<Result<QueryResult>>,
}

impl PendingQuery {
    /// Deliver the outcome; a caller that stopped waiting is ignored
    pub fn complete(self, result: Result<QueryResult>) {
        let _ = self.reply.send(result);
    }
}

/// Submitting side, shared by callers
#[derive(Debug, Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<PendingQuery>,
}

impl QueueHandle {
    /// Append a query to the queue and return the channel its result arrives on.
    ///
    /// Fails with `ConnectionClosed` once the worker has stopped accepting work.
    pub fn submit(&self, sql: String) -> Result<ReplyReceiver> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PendingQuery { sql, reply })
            .map_err(|_| Error::ConnectionClosed)?;
        Ok(rx)
    }
}

/// Draining side, owned by the connection worker
#[derive(Debug)]
pub struct RequestQueue {
    rx: mpsc::UnboundedReceiver<PendingQuery>,
}

/// Create a connected handle/queue pair
pub fn request_queue() -> (QueueHandle, RequestQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueHandle { tx }, RequestQueue { rx })
}

impl RequestQueue {
    /// Next query in submission order; `None` once every handle is gone
    pub async fn next(&mut self) -> Option<PendingQuery> {
        self.rx.recv().await
    }

    /// Stop accepting work and fail everything still queued, oldest first.
    ///
    /// Returns the number of rejected queries.
    pub fn reject_all(&mut self, err: &Error) -> usize {
        self.rx.close();
        let mut rejected = 0;
        while let Ok(pending) = self.rx.try_recv() {
            pending.complete(Err(err.clone()));
            rejected += 1;
        }
        rejected
    }
}
