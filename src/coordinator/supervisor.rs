//! Connection supervisor
//!
//! Dials the coordinator, runs a session over each connection, and waits a
//! fixed interval before dialing again. It never gives up on its own; only
//! the shutdown future passed to [`Supervisor::run_until`] stops it.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backoff::backoff::{Backoff, Constant};
use futures_util::{Sink, Stream};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{error, info, warn};
use url::Url;

use super::session::Session;
use crate::error::{Error, Result};

/// Client side of a coordinator WebSocket
pub type WsConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ─────────────────────────────────────────────────────────────────
// Dialing
// ─────────────────────────────────────────────────────────────────

/// Opens connections to the coordinator
#[async_trait]
pub trait Dialer: Send + Sync {
    type Connection: Stream<Item = std::result::Result<WsMessage, WsError>>
        + Sink<WsMessage, Error = WsError>
        + Send
        + Unpin
        + 'static;

    async fn dial(&self) -> Result<Self::Connection>;

    /// Where this dialer connects to, for logging
    fn endpoint(&self) -> &str;
}

/// Dials a `ws://` or `wss://` URL
pub struct WsDialer {
    url: Url,
    connect_timeout: Duration,
}

impl WsDialer {
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| Error::config_field_invalid("coordinator.url", format!("invalid URL {}: {}", url, e)))?;
        Ok(Self { url, connect_timeout })
    }
}

#[async_trait]
impl Dialer for WsDialer {
    type Connection = WsConnection;

    async fn dial(&self) -> Result<WsConnection> {
        match tokio::time::timeout(self.connect_timeout, connect_async(self.url.clone())).await {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(e)) => Err(Error::connection_failed(self.url.as_str(), e.to_string())),
            Err(_) => Err(Error::ConnectionTimeout {
                url: self.url.to_string(),
                timeout_secs: self.connect_timeout.as_secs(),
            }),
        }
    }

    fn endpoint(&self) -> &str {
        self.url.as_str()
    }
}

// ─────────────────────────────────────────────────────────────────
// Waiting
// ─────────────────────────────────────────────────────────────────

/// Pause between connection attempts
#[async_trait]
pub trait Delay: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real-time delay
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// ─────────────────────────────────────────────────────────────────
// Supervisor
// ─────────────────────────────────────────────────────────────────

/// Where the supervisor is in its connect cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Waiting,
    Stopped,
}

/// Snapshot shared with observers of the supervisor
#[derive(Debug, Clone)]
pub struct SupervisorStatus {
    pub state: ConnectionState,
    /// Dial attempts since start
    pub attempts: u64,
    /// Sessions that reached the connected state
    pub sessions: u64,
    pub connected_at: Option<Instant>,
}

impl Default for SupervisorStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            sessions: 0,
            connected_at: None,
        }
    }
}

pub struct Supervisor<D: Dialer, Z: Delay = TokioDelay> {
    dialer: D,
    delay: Z,
    session: Session,
    backoff: Constant,
    interval: Duration,
    status: Arc<RwLock<SupervisorStatus>>,
}

impl<D: Dialer> Supervisor<D, TokioDelay> {
    pub fn new(dialer: D, session: Session, interval: Duration) -> Self {
        Self::with_delay(dialer, TokioDelay, session, interval)
    }
}

impl<D: Dialer, Z: Delay> Supervisor<D, Z> {
    pub fn with_delay(dialer: D, delay: Z, session: Session, interval: Duration) -> Self {
        Self {
            dialer,
            delay,
            session,
            backoff: Constant::new(interval),
            interval,
            status: Arc::new(RwLock::new(SupervisorStatus::default())),
        }
    }

    /// Shared handle onto the current status
    pub fn status(&self) -> Arc<RwLock<SupervisorStatus>> {
        self.status.clone()
    }

    fn set_state(&self, state: ConnectionState) {
        self.status.write().state = state;
    }

    /// Connect, serve, and reconnect until `shutdown` completes
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = shutdown => info!("Shutdown requested"),
            _ = self.run() => {}
        }
        self.set_state(ConnectionState::Stopped);
        info!("Supervisor stopped");
    }

    async fn run(&mut self) {
        loop {
            let attempt = {
                let mut s = self.status.write();
                s.state = ConnectionState::Connecting;
                s.attempts += 1;
                s.attempts
            };

            info!(url = %self.dialer.endpoint(), attempt, "Connecting to coordinator");

            match self.dialer.dial().await {
                Ok(connection) => {
                    info!(url = %self.dialer.endpoint(), "Connected to coordinator");
                    self.backoff.reset();
                    {
                        let mut s = self.status.write();
                        s.state = ConnectionState::Connected;
                        s.sessions += 1;
                        s.connected_at = Some(Instant::now());
                    }

                    let outcome = self.session.run(connection).await;
                    let uptime_ms = self
                        .status
                        .write()
                        .connected_at
                        .take()
                        .map(|since| since.elapsed().as_millis() as u64)
                        .unwrap_or_default();

                    match outcome {
                        Ok(()) => info!(uptime_ms, "Disconnected from coordinator"),
                        Err(e) if e.is_retryable() => {
                            warn!(uptime_ms, error = %e.format_for_log(), "Connection to coordinator lost")
                        }
                        Err(e) => error!(uptime_ms, error = %e.format_for_log(), "Session ended unexpectedly"),
                    }
                }
                Err(e) => {
                    error!(url = %self.dialer.endpoint(), error = %e.format_for_log(), "Failed to connect to coordinator");
                }
            }

            self.set_state(ConnectionState::Waiting);
            let delay = self.backoff.next_backoff().unwrap_or(self.interval);
            info!(delay_ms = delay.as_millis() as u64, "Waiting before reconnection");
            self.delay.sleep(delay).await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
