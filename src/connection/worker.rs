//! Task that owns the connection and drains the request queue

use super::conn::{Connection, ConnectionConfig};
use super::queue::RequestQueue;
use crate::Error;
use tokio::sync::watch;

/// Connection readiness as seen by the pool
#[derive(Debug, Clone)]
pub enum ConnectStatus {
    /// Connect still in progress
    Pending,
    /// Authenticated and serving queries
    Ready,
    /// Connect attempt failed; the connection never became usable
    Failed(Error),
    /// Connection shut down after being ready, or before it finished connecting
    Closed,
}

/// Connection worker: connects once, then runs queued queries one at a time
#[derive(Debug)]
pub struct Worker {
    config: ConnectionConfig,
    queue: RequestQueue,
    status: watch::Sender<ConnectStatus>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    /// Create a worker that publishes its status on `status` and stops when
    /// `shutdown` flips to `true` (or its sender is dropped)
    pub fn new(
        config: ConnectionConfig,
        queue: RequestQueue,
        status: watch::Sender<ConnectStatus>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            queue,
            status,
            shutdown,
        }
    }

    /// Run until shutdown, queue exhaustion, or a fatal connection error
    pub async fn run(mut self) {
        let connected = tokio::select! {
            biased;
            _ = shutdown_requested(&mut self.shutdown) => None,
            result = Connection::connect(&self.config) => Some(result),
        };

        let mut conn = match connected {
            Some(Ok(conn)) => conn,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "connect failed");
                self.status.send_replace(ConnectStatus::Failed(e.clone()));
                self.queue.reject_all(&e);
                return;
            }
            None => {
                self.status.send_replace(ConnectStatus::Closed);
                self.queue.reject_all(&Error::ConnectionClosed);
                return;
            }
        };
        self.status.send_replace(ConnectStatus::Ready);

        let failure = loop {
            let next = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => None,
                next = self.queue.next() => next,
            };
            let Some(pending) = next else {
                break None;
            };

            // Once on the wire a query runs to completion; only shutdown interrupts it
            let outcome = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => None,
                result = conn.simple_query(&pending.sql) => Some(result),
            };

            match outcome {
                None => {
                    pending.complete(Err(Error::ConnectionClosed));
                    break None;
                }
                Some(Err(e)) if e.is_fatal() => {
                    pending.complete(Err(e.clone()));
                    break Some(e);
                }
                Some(result) => pending.complete(result),
            }
        };

        self.status.send_replace(ConnectStatus::Closed);
        match failure {
            Some(e) => {
                tracing::warn!(error = %e, "connection failed");
                let rejected = self.queue.reject_all(&e);
                if rejected > 0 {
                    tracing::debug!(rejected, "rejected queued queries");
                }
            }
            None => {
                self.queue.reject_all(&Error::ConnectionClosed);
                if let Err(e) = conn.close().await {
                    tracing::debug!(error = %e, "error while closing connection");
                }
            }
        }
    }
}

/// Resolves once shutdown is signalled or the pool side is gone
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
