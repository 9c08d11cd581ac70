//! Single-connection pool exposed to callers

use crate::connection::{
    request_queue, ConnectStatus, ConnectionConfig, QueueHandle, ReplyReceiver, Worker,
};
use crate::query::{format_query, QueryResult, SqlValue};
use crate::{Error, Result};
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

enum PoolState {
    /// Nothing spawned yet
    Idle,
    /// Worker running (or finished on its own after a failure)
    Running {
        queue: QueueHandle,
        status: watch::Receiver<ConnectStatus>,
        shutdown: watch::Sender<bool>,
        worker: JoinHandle<()>,
    },
    /// `close()` was called
    Closed,
}

/// Lazily connected wrapper around exactly one Postgres connection.
///
/// The connection is opened on first use. Concurrent [`Pool::query`] calls are
/// queued and run one after another in submission order. After [`Pool::close`]
/// (or a fatal connection error) every call fails; the pool never reconnects.
pub struct Pool {
    config: ConnectionConfig,
    state: Mutex<PoolState>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Pool {
    /// Create a pool; no connection is made until the first query
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PoolState::Idle),
        }
    }

    /// Create a pool from a `postgres://` connection string
    pub fn from_url(url: &str) -> Result<Self> {
        Ok(Self::new(ConnectionConfig::from_url(url)?))
    }

    /// Configuration this pool connects with
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Whether `close()` has been called
    pub fn is_closed(&self) -> bool {
        matches!(*self.lock(), PoolState::Closed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the worker on first use and hand out the queue and status channel
    fn ensure_started(&self) -> Result<(QueueHandle, watch::Receiver<ConnectStatus>)> {
        let mut state = self.lock();
        if let PoolState::Idle = *state {
            let (queue, requests) = request_queue();
            let (status_tx, status) = watch::channel(ConnectStatus::Pending);
            let (shutdown, shutdown_rx) = watch::channel(false);

            let worker = Worker::new(self.config.clone(), requests, status_tx, shutdown_rx);
            let span = tracing::info_span!(
                "pgwire_worker",
                host = %self.config.host,
                database = %self.config.database
            );
            let worker = tokio::spawn(worker.run().instrument(span));

            *state = PoolState::Running {
                queue,
                status,
                shutdown,
                worker,
            };
        }

        match &*state {
            PoolState::Running { queue, status, .. } => Ok((queue.clone(), status.clone())),
            _ => Err(Error::ConnectionClosed),
        }
    }

    /// Connect now instead of on the first query.
    ///
    /// Resolves once the connection is authenticated, or with the error that
    /// prevented it.
    pub async fn connect(&self) -> Result<()> {
        let (_, mut status) = self.ensure_started()?;
        let outcome = status
            .wait_for(|s| !matches!(s, ConnectStatus::Pending))
            .await
            .map(|s| s.clone());

        match outcome {
            Ok(ConnectStatus::Ready) => Ok(()),
            Ok(ConnectStatus::Failed(e)) => Err(e),
            _ => Err(Error::ConnectionClosed),
        }
    }

    /// Run `sql` with `$n` placeholders replaced by `params`.
    ///
    /// Formatting errors are reported before anything is queued. Queries run in
    /// the order `query` was called.
    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        let sql = format_query(sql, params)?;
        let (queue, status) = self.ensure_started()?;

        let reply: ReplyReceiver = match queue.submit(sql) {
            Ok(reply) => reply,
            Err(e) => return Err(failure_from(&status).unwrap_or(e)),
        };

        match reply.await {
            Ok(result) => result,
            // Worker dropped the request without answering
            Err(_) => Err(failure_from(&status).unwrap_or(Error::ConnectionClosed)),
        }
    }

    /// Close the connection. Pending and future queries fail with
    /// `ConnectionClosed`; the pool cannot be reopened.
    pub async fn close(&self) {
        let previous = std::mem::replace(&mut *self.lock(), PoolState::Closed);

        if let PoolState::Running {
            shutdown, worker, ..
        } = previous
        {
            let _ = shutdown.send(true);
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "connection worker panicked");
            }
        }
    }
}

/// The connect error, if the worker never got a connection
fn failure_from(status: &watch::Receiver<ConnectStatus>) -> Option<Error> {
    match &*status.borrow() {
        ConnectStatus::Failed(e) => Some(e.clone()),
        _ => None,
    }
}
