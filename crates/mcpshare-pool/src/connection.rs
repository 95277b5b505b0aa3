//! Per-server connection record
//!
//! State machine with race condition prevention:
//! - generation: monotonic counter, bumped on every connect attempt
//! - a reference handed out for generation N is only honoured while the
//!   connection is still on generation N and READY
//! - stale completions (cancelled or superseded attempts) close their own
//!   session instead of installing it
//!
//! All transitions happen under `inner`, a synchronous lock that is never held
//! across an await. The connect itself runs in a spawned task so that a
//! cancelled caller cannot strand the other waiters.

use std::sync::Arc;
use std::time::{Duration, Instant};

use mcpshare_core::{CloseFailure, IdlePolicy, PoolError, PoolResult, ServerConfig};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::session::Session;
use crate::transport::Launcher;

/// Lifecycle state of a single server connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Uninitialized,
    Connecting,
    Ready,
    /// Last connect attempt failed; the next acquire retries
    Failed,
    Closing,
    Closed,
}

/// Why a connection was permanently taken out of service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Retirement {
    Removed,
    PoolClosed,
}

impl Retirement {
    fn error(self, server: &str) -> PoolError {
        match self {
            Retirement::Removed => PoolError::NotFound(server.to_string()),
            Retirement::PoolClosed => PoolError::PoolClosed,
        }
    }
}

/// Point-in-time view of a connection, for stats and diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub server: String,
    pub state: ConnectionState,
    pub ref_count: usize,
    pub generation: u64,
    pub connect_attempts: u64,
    pub waiters: usize,
    pub last_error: Option<String>,
}

/// Proof of one counted reference on a specific generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Lease {
    pub generation: u64,
}

/// A session that has been unhooked from its connection and must be closed
pub(crate) struct ClosingSession {
    generation: u64,
    session: Arc<dyn Session>,
}

struct InFlight {
    done_rx: watch::Receiver<bool>,
    task: AbortHandle,
}

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    generation: u64,
    session: Option<Arc<dyn Session>>,
    ref_count: usize,
    /// Callers suspended on the in-flight attempt. Each one has a reference
    /// reserved for it when the attempt succeeds.
    waiters: usize,
    in_flight: Option<InFlight>,
    last_error: Option<PoolError>,
    retired: Option<Retirement>,
    connect_attempts: u64,
    idle_since: Option<Instant>,
}

pub(crate) struct Connection {
    server: String,
    idle_policy: IdlePolicy,
    inner: Mutex<Inner>,
    /// Held around each request when the server needs strict request/response ordering
    request_lock: tokio::sync::Mutex<()>,
}

impl Connection {
    pub fn new(server: impl Into<String>, idle_policy: IdlePolicy) -> Self {
        Self {
            server: server.into(),
            idle_policy,
            inner: Mutex::new(Inner::default()),
            request_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn request_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.request_lock
    }

    /// Obtain a counted reference, connecting first if needed.
    ///
    /// Concurrent callers collapse onto a single connect attempt. Dropping
    /// the returned future before it resolves never leaks a reference.
    pub async fn acquire(
        self: &Arc<Self>,
        config: Arc<ServerConfig>,
        launcher: Arc<dyn Launcher>,
        timeout: Duration,
    ) -> PoolResult<Lease> {
        let (generation, mut done_rx) = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            if let Some(reason) = inner.retired {
                return Err(reason.error(&self.server));
            }

            match (inner.state, inner.in_flight.as_ref()) {
                (ConnectionState::Ready, _) => {
                    inner.ref_count += 1;
                    inner.idle_since = None;
                    debug!(
                        server = %self.server,
                        ref_count = inner.ref_count,
                        generation = inner.generation,
                        "Reusing connection"
                    );
                    return Ok(Lease {
                        generation: inner.generation,
                    });
                }
                (ConnectionState::Connecting, Some(in_flight)) => {
                    let done_rx = in_flight.done_rx.clone();
                    inner.waiters += 1;
                    debug!(
                        server = %self.server,
                        waiters = inner.waiters,
                        "Waiting on in-flight connect"
                    );
                    (inner.generation, done_rx)
                }
                _ => self.begin_connect(inner, config, launcher, timeout),
            }
        };

        let waiter = Waiter {
            connection: self,
            generation,
            claimed: false,
        };
        // Err means the attempt task went away without reporting; claim() sorts it out
        let _ = done_rx.wait_for(|done| *done).await;
        waiter.claim()
    }

    fn begin_connect(
        self: &Arc<Self>,
        inner: &mut Inner,
        config: Arc<ServerConfig>,
        launcher: Arc<dyn Launcher>,
        timeout: Duration,
    ) -> (u64, watch::Receiver<bool>) {
        inner.generation += 1;
        inner.connect_attempts += 1;
        inner.state = ConnectionState::Connecting;
        inner.waiters = 1;
        inner.last_error = None;
        let generation = inner.generation;

        info!(
            server = %self.server,
            generation,
            attempt = inner.connect_attempts,
            target = %config.describe(),
            "Connecting to server"
        );

        let (done_tx, done_rx) = watch::channel(false);
        let connection = Arc::clone(self);
        let task = tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, launcher.launch(&config)).await {
                Ok(Ok(session)) => Ok(session),
                Ok(Err(e)) => Err(PoolError::connection(config.name(), format!("{:#}", e))),
                Err(_) => Err(PoolError::connection(
                    config.name(),
                    format!("connect timed out after {}s", timeout.as_secs_f64()),
                )),
            };
            connection.finish_connect(generation, outcome, done_tx).await;
        });

        inner.in_flight = Some(InFlight {
            done_rx: done_rx.clone(),
            task: task.abort_handle(),
        });
        (generation, done_rx)
    }

    async fn finish_connect(
        &self,
        generation: u64,
        outcome: PoolResult<Arc<dyn Session>>,
        done_tx: watch::Sender<bool>,
    ) {
        let orphan = {
            let mut inner = self.inner.lock();
            let current = inner.generation == generation
                && inner.state == ConnectionState::Connecting
                && inner.retired.is_none();

            if current {
                inner.in_flight = None;
                match outcome {
                    Ok(session) => {
                        inner.state = ConnectionState::Ready;
                        inner.session = Some(session);
                        inner.ref_count += inner.waiters;
                        inner.waiters = 0;
                        info!(
                            server = %self.server,
                            generation,
                            ref_count = inner.ref_count,
                            "Connection ready"
                        );
                    }
                    Err(e) => {
                        error!(server = %self.server, generation, error = %e, "Connect failed");
                        inner.state = ConnectionState::Failed;
                        inner.last_error = Some(e);
                        inner.waiters = 0;
                    }
                }
                None
            } else {
                outcome.ok()
            }
        };
        let _ = done_tx.send(true);

        if let Some(session) = orphan {
            debug!(server = %self.server, generation, "Closing session from abandoned attempt");
            if let Err(e) = session.close().await {
                warn!(server = %self.server, error = %e, "Failed to close abandoned session");
            }
        }
    }

    /// Get the live session behind a lease
    pub fn session_for(&self, lease: Lease) -> PoolResult<Arc<dyn Session>> {
        let inner = self.inner.lock();
        match (&inner.session, inner.state) {
            (Some(session), ConnectionState::Ready)
                if inner.retired.is_none() && inner.generation == lease.generation =>
            {
                Ok(Arc::clone(session))
            }
            _ => Err(PoolError::connection(&self.server, "connection was closed")),
        }
    }

    /// Give back a lease. Leases from a retired or superseded generation are
    /// already void and release nothing.
    pub fn release_lease(&self, lease: Lease) -> PoolResult<Option<ClosingSession>> {
        let mut inner = self.inner.lock();
        if inner.retired.is_some()
            || inner.generation != lease.generation
            || inner.state != ConnectionState::Ready
        {
            debug!(server = %self.server, generation = lease.generation, "Ignoring stale release");
            return Ok(None);
        }
        self.release_locked(&mut inner)
    }

    /// Release one reference without a lease
    pub fn release(&self) -> PoolResult<Option<ClosingSession>> {
        let mut inner = self.inner.lock();
        if let Some(reason) = inner.retired {
            return Err(reason.error(&self.server));
        }
        self.release_locked(&mut inner)
    }

    fn release_locked(&self, inner: &mut Inner) -> PoolResult<Option<ClosingSession>> {
        if inner.ref_count == 0 || inner.state != ConnectionState::Ready {
            error!(
                server = %self.server,
                state = ?inner.state,
                "Release without a matching acquire"
            );
            return Err(PoolError::invariant(
                &self.server,
                "release without a matching acquire",
            ));
        }

        inner.ref_count -= 1;
        debug!(
            server = %self.server,
            ref_count = inner.ref_count,
            generation = inner.generation,
            "Released connection"
        );

        if inner.ref_count > 0 {
            return Ok(None);
        }
        inner.idle_since = Some(Instant::now());
        if self.idle_policy == IdlePolicy::CloseWhenIdle {
            return Ok(Self::detach_session(inner));
        }
        Ok(None)
    }

    /// Unhook the session and move to CLOSING. The caller closes it.
    fn detach_session(inner: &mut Inner) -> Option<ClosingSession> {
        let session = inner.session.take()?;
        inner.state = ConnectionState::Closing;
        inner.idle_since = None;
        Some(ClosingSession {
            generation: inner.generation,
            session,
        })
    }

    /// Take the session if it has been unreferenced for at least `max_idle`
    pub fn take_if_idle(&self, max_idle: Duration) -> Option<ClosingSession> {
        let mut inner = self.inner.lock();
        let expired = inner.retired.is_none()
            && inner.state == ConnectionState::Ready
            && inner.ref_count == 0
            && inner
                .idle_since
                .is_some_and(|since| since.elapsed() >= max_idle);
        if !expired {
            return None;
        }
        info!(server = %self.server, "Closing idle connection");
        Self::detach_session(&mut inner)
    }

    /// Permanently take the connection out of service regardless of its
    /// reference count. Outstanding leases become void and waiters are
    /// woken with an error.
    pub fn retire(&self, reason: Retirement) -> Option<ClosingSession> {
        let mut inner = self.inner.lock();
        if inner.retired.is_some() {
            return None;
        }
        inner.retired = Some(reason);
        if let Some(in_flight) = inner.in_flight.take() {
            in_flight.task.abort();
        }
        if inner.ref_count > 0 {
            debug!(
                server = %self.server,
                ref_count = inner.ref_count,
                "Force-closing connection with outstanding references"
            );
        }
        inner.waiters = 0;
        inner.ref_count = 0;

        let closing = Self::detach_session(&mut inner);
        if closing.is_none() {
            inner.state = ConnectionState::Closed;
        }
        closing
    }

    /// Close a detached session and mark the connection CLOSED if nothing
    /// reconnected in the meantime
    pub async fn close(&self, closing: ClosingSession) -> Result<(), CloseFailure> {
        let ClosingSession {
            generation,
            session,
        } = closing;
        let result = session.close().await;

        {
            let mut inner = self.inner.lock();
            if inner.generation == generation && inner.state == ConnectionState::Closing {
                inner.state = ConnectionState::Closed;
            }
        }

        match result {
            Ok(()) => {
                info!(server = %self.server, generation, "Connection closed");
                Ok(())
            }
            Err(e) => {
                warn!(server = %self.server, generation, error = %e, "Failed to close connection");
                Err(CloseFailure {
                    server: self.server.clone(),
                    message: format!("{:#}", e),
                })
            }
        }
    }

    /// Close from a synchronous context (drop paths)
    pub fn spawn_close(self: &Arc<Self>, closing: ClosingSession) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let connection = Arc::clone(self);
                handle.spawn(async move {
                    let _ = connection.close(closing).await;
                });
            }
            Err(_) => {
                warn!(server = %self.server, "No runtime available, dropping session unclosed");
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let inner = self.inner.lock();
        ConnectionSnapshot {
            server: self.server.clone(),
            state: inner.state,
            ref_count: inner.ref_count,
            generation: inner.generation,
            connect_attempts: inner.connect_attempts,
            waiters: inner.waiters,
            last_error: inner.last_error.as_ref().map(ToString::to_string),
        }
    }
}

/// A caller suspended on a connect attempt.
///
/// If dropped before `claim`, it gives back the reference reserved for it,
/// and the last waiter to leave cancels the attempt.
struct Waiter<'a> {
    connection: &'a Arc<Connection>,
    generation: u64,
    claimed: bool,
}

impl Waiter<'_> {
    fn claim(mut self) -> PoolResult<Lease> {
        self.claimed = true;
        let server = &self.connection.server;
        let mut inner = self.connection.inner.lock();

        if let Some(reason) = inner.retired {
            return Err(reason.error(server));
        }
        if inner.generation != self.generation {
            return Err(PoolError::connection(server, "connect attempt was superseded"));
        }

        match inner.state {
            ConnectionState::Ready => Ok(Lease {
                generation: self.generation,
            }),
            ConnectionState::Failed => Err(inner
                .last_error
                .clone()
                .unwrap_or_else(|| PoolError::connection(server, "connect failed"))),
            ConnectionState::Connecting => {
                // The attempt task died without reporting
                let err = PoolError::connection(server, "connect attempt aborted");
                inner.state = ConnectionState::Failed;
                inner.in_flight = None;
                inner.waiters = 0;
                inner.last_error = Some(err.clone());
                Err(err)
            }
            _ => Err(PoolError::connection(
                server,
                "connection closed before it became ready",
            )),
        }
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if self.claimed {
            return;
        }

        let closing = {
            let mut inner = self.connection.inner.lock();
            if inner.retired.is_some() || inner.generation != self.generation {
                return;
            }
            match inner.state {
                ConnectionState::Connecting => {
                    inner.waiters = inner.waiters.saturating_sub(1);
                    if inner.waiters == 0 {
                        if let Some(in_flight) = inner.in_flight.take() {
                            in_flight.task.abort();
                        }
                        inner.state = ConnectionState::Uninitialized;
                        info!(
                            server = %self.connection.server,
                            generation = self.generation,
                            "Connect cancelled, no callers left waiting"
                        );
                    }
                    None
                }
                // Completed before the cancelled caller could take its reference
                ConnectionState::Ready => self.connection.release_locked(&mut inner).ok().flatten(),
                _ => None,
            }
        };

        if let Some(closing) = closing {
            self.connection.spawn_close(closing);
        }
    }
}
