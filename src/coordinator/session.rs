//! One live coordinator connection
//!
//! A session owns the connection from the moment it opens until a read
//! fails or the coordinator closes it:
//! - sends the init message
//! - runs the heartbeat task
//! - reads frames and spawns a handler task per routed command
//!
//! Every outbound frame goes through a single writer task, so heartbeats
//! and concurrently finishing handlers never interleave on the wire.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::handlers::Handlers;
use crate::protocol::{Identity, Message};

// ─────────────────────────────────────────────────────────────────
// Outbound Queue
// ─────────────────────────────────────────────────────────────────

/// Handle onto the session's single writer
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<WsMessage>,
}

impl Outbound {
    /// Encode and queue a message; fails once the writer has stopped
    pub fn send(&self, message: &Message) -> Result<()> {
        let text = message.encode()?;
        self.tx
            .send(WsMessage::Text(text))
            .map_err(|_| Error::ConnectionLost {
                message: "session writer has stopped".to_string(),
            })
    }
}

async fn write_loop<K>(mut sink: K, mut rx: mpsc::UnboundedReceiver<WsMessage>)
where
    K: Sink<WsMessage, Error = WsError> + Unpin,
{
    while let Some(frame) = rx.recv().await {
        if let Err(e) = sink.send(frame).await {
            debug!(error = %e, "Write failed, writer stopping");
            return;
        }
    }
    let _ = sink.close().await;
}

// ─────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────

/// Runs sessions over connections handed to it by the supervisor
pub struct Session {
    handlers: Arc<Handlers>,
    heartbeat_interval: Duration,
}

impl Session {
    pub fn new(handlers: Arc<Handlers>, heartbeat_interval: Duration) -> Self {
        Self {
            handlers,
            heartbeat_interval,
        }
    }

    /// Drive one connection until it closes
    ///
    /// `Ok` means the coordinator closed the connection cleanly; `Err` is a
    /// transport failure. The heartbeat stops when this future completes or
    /// is dropped, while handler tasks already spawned run to completion.
    pub async fn run<S>(&self, connection: S) -> Result<()>
    where
        S: Stream<Item = std::result::Result<WsMessage, WsError>>
            + Sink<WsMessage, Error = WsError>
            + Send
            + Unpin
            + 'static,
    {
        let (sink, mut stream) = connection.split();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(sink, rx));
        let outbound = Outbound { tx };

        let identity = self.handlers.identity();
        outbound.send(&Message::init(identity))?;
        debug!(sid = %identity.sid, role = %identity.role, "Sent init message");

        let _heartbeat = AbortOnDrop(tokio::spawn(heartbeat_loop(
            outbound.clone(),
            identity.clone(),
            self.heartbeat_interval,
        )));

        self.read_loop(&mut stream, &outbound).await
    }

    async fn read_loop<R>(&self, stream: &mut R, outbound: &Outbound) -> Result<()>
    where
        R: Stream<Item = std::result::Result<WsMessage, WsError>> + Unpin,
    {
        while let Some(frame) = stream.next().await {
            let decoded = match frame {
                Ok(WsMessage::Text(text)) => Message::decode(&text),
                Ok(WsMessage::Binary(data)) => Message::decode_bytes(&data),
                Ok(WsMessage::Close(frame)) => {
                    info!(frame = ?frame, "Coordinator closed the connection");
                    return Ok(());
                }
                // Pongs to coordinator pings are queued by tungstenite itself
                Ok(_) => continue,
                Err(e) => {
                    return Err(Error::ConnectionLost {
                        message: e.to_string(),
                    });
                }
            };

            match decoded {
                Ok(message) => self.dispatch(message, outbound),
                Err(e) => warn!(error = %e, "Failed to decode message, skipping"),
            }
        }

        info!("Coordinator stream ended");
        Ok(())
    }

    /// Spawn the handler for a routed command without waiting on it
    fn dispatch(&self, request: Message, outbound: &Outbound) {
        let action = request.action();
        if !Handlers::routes(action) {
            debug!(action = %request.action, "Ignoring message");
            return;
        }

        debug!(action = %action, uid = ?request.uid, "Dispatching command");

        let handlers = self.handlers.clone();
        let outbound = outbound.clone();
        tokio::spawn(async move {
            let uid = request.uid.clone();
            if let Some(response) = handlers.handle(request).await {
                if let Err(e) = outbound.send(&response) {
                    warn!(action = %action, uid = ?uid, error = %e, "Response dropped");
                }
            }
        });
    }
}

/// Aborts the task when dropped, including when the owning future is cancelled
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn heartbeat_loop(outbound: Outbound, identity: Identity, period: Duration) {
    let mut timer = tokio::time::interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        timer.tick().await;
        if let Err(e) = outbound.send(&Message::heartbeat(&identity)) {
            debug!(error = %e, "Heartbeat stopped");
            return;
        }
        trace!("Sent heartbeat");
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StatusSettings;
    use crate::handlers::{ProbeStats, Prober, StatusFetcher};
    use crate::protocol::Action;
    use async_trait::async_trait;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{accept_async, connect_async, WebSocketStream};

    type ServerSide = WebSocketStream<TcpStream>;

    /// Latency depends on the host name; `down.test` always fails
    struct ScriptedProber;

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, host: &str) -> Result<ProbeStats> {
            let delay = match host {
                "slow.test" => Duration::from_millis(300),
                _ => Duration::from_millis(10),
            };
            tokio::time::sleep(delay).await;
            if host == "down.test" {
                return Err(Error::probe_failed("all 3 probes to down.test were lost"));
            }
            Ok(ProbeStats { sent: 3, received: 3, avg_rtt: delay })
        }
    }

    fn session(heartbeat_interval: Duration) -> Session {
        let status = StatusFetcher::new(StatusSettings {
            url: "http://127.0.0.1:9/api/serverinfo".to_string(),
            timeout_ms: 500,
            ..StatusSettings::default()
        })
        .unwrap();
        let handlers = Handlers::new(Identity::new("node", "7"), Arc::new(ScriptedProber), status);
        Session::new(Arc::new(handlers), heartbeat_interval)
    }

    /// Start a session against an in-process coordinator and return the coordinator end
    async fn connect(session: Session) -> (ServerSide, JoinHandle<Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            accept_async(stream).await.unwrap()
        });
        let (client, _) = connect_async(url).await.unwrap();
        let server = accept.await.unwrap();

        let handle = tokio::spawn(async move { session.run(client).await });
        (server, handle)
    }

    async fn next_message(server: &mut ServerSide) -> Message {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), server.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection closed")
                .unwrap();
            if let WsMessage::Text(text) = frame {
                return Message::decode(&text).unwrap();
            }
        }
    }

    /// Next message that is a command response (skips init and heartbeats)
    async fn next_response(server: &mut ServerSide) -> Message {
        loop {
            let message = next_message(server).await;
            if message.uid.is_some() {
                return message;
            }
        }
    }

    async fn send(server: &mut ServerSide, text: &str) {
        server.send(WsMessage::Text(text.to_string())).await.unwrap();
    }

    #[tokio::test]
    async fn test_init_then_heartbeats() {
        let (mut server, _handle) = connect(session(Duration::from_millis(50))).await;

        let init = next_message(&mut server).await;
        assert_eq!(init.role, "node");
        assert_eq!(init.sid, "7");
        assert_eq!(init.action(), Action::Other);
        assert!(init.code.is_none());

        for _ in 0..3 {
            let beat = next_message(&mut server).await;
            assert_eq!(beat.action(), Action::Head);
            assert_eq!(beat.code, Some(200));
            assert_eq!(beat.sid, "7");
        }
    }

    #[tokio::test]
    async fn test_ping_round_trip() {
        let (mut server, _handle) = connect(session(Duration::from_secs(3600))).await;

        send(&mut server, r#"{"type":"server","sid":"7","action":"ping","ip":"fast.test","uid":"u-1"}"#).await;
        let response = next_response(&mut server).await;

        assert_eq!(response.action(), Action::Ping);
        assert_eq!(response.uid.as_deref(), Some("u-1"));
        assert_eq!(response.code, Some(200));
        assert_eq!(response.result_json(), Some(r#""10ms""#));
    }

    #[tokio::test]
    async fn test_null_sid_still_answered() {
        let (mut server, _handle) = connect(session(Duration::from_secs(3600))).await;

        send(&mut server, r#"{"type":"server","sid":null,"action":"ping","ip":"fast.test","uid":"u-null","code":-1}"#).await;
        let response = next_response(&mut server).await;

        assert_eq!(response.uid.as_deref(), Some("u-null"));
        assert_eq!(response.code, Some(200));
        assert_eq!(response.sid, "7");
    }

    #[tokio::test]
    async fn test_ping_failure_is_reported() {
        let (mut server, _handle) = connect(session(Duration::from_secs(3600))).await;

        send(&mut server, r#"{"type":"server","sid":"7","action":"ping","ip":"down.test","uid":"u-2"}"#).await;
        let response = next_response(&mut server).await;

        assert_eq!(response.code, Some(500));
        assert_eq!(response.uid.as_deref(), Some("u-2"));
        let result: serde_json::Value = serde_json::from_str(response.result_json().unwrap()).unwrap();
        assert!(result.get("error").is_some());
    }

    #[tokio::test]
    async fn test_concurrent_pings_keep_their_uid() {
        let (mut server, _handle) = connect(session(Duration::from_secs(3600))).await;

        send(&mut server, r#"{"type":"server","sid":"7","action":"ping","ip":"slow.test","uid":"first"}"#).await;
        send(&mut server, r#"{"type":"server","sid":"7","action":"ping","ip":"fast.test","uid":"second"}"#).await;

        // The slow probe was read first but finishes last
        let a = next_response(&mut server).await;
        let b = next_response(&mut server).await;

        assert_eq!(a.uid.as_deref(), Some("second"));
        assert_eq!(a.result_json(), Some(r#""10ms""#));
        assert_eq!(b.uid.as_deref(), Some("first"));
        assert_eq!(b.result_json(), Some(r#""300ms""#));
        assert!(a.action() == Action::Ping && b.action() == Action::Ping);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let (mut server, handle) = connect(session(Duration::from_secs(3600))).await;

        send(&mut server, "{not json").await;
        server.send(WsMessage::Binary(vec![0xde, 0xad])).await.unwrap();
        send(&mut server, r#"{"type":"server","sid":"7","action":"ping","ip":"fast.test","uid":"after"}"#).await;

        let response = next_response(&mut server).await;
        assert_eq!(response.uid.as_deref(), Some("after"));
        assert!(!handle.is_finished());
    }

    #[tokio::test]
    async fn test_unknown_action_is_ignored() {
        let (mut server, _handle) = connect(session(Duration::from_secs(3600))).await;

        send(&mut server, r#"{"type":"server","sid":"7","action":"reboot","uid":"nope"}"#).await;
        send(&mut server, r#"{"type":"server","sid":"7","action":"head","code":200}"#).await;
        send(&mut server, r#"{"type":"server","sid":"7","action":"ping","ip":"fast.test","uid":"yes"}"#).await;

        let response = next_response(&mut server).await;
        assert_eq!(response.uid.as_deref(), Some("yes"));
    }

    #[tokio::test]
    async fn test_heartbeat_independent_of_commands() {
        let (mut server, _handle) = connect(session(Duration::from_millis(60))).await;

        send(&mut server, r#"{"type":"server","sid":"7","action":"ping","ip":"slow.test","uid":"busy"}"#).await;

        let mut heartbeats = 0;
        loop {
            let message = next_message(&mut server).await;
            match message.action() {
                Action::Head => heartbeats += 1,
                Action::Ping => break,
                _ => {}
            }
        }
        // First beat is immediate, then one every 60ms during the 300ms probe
        assert!(heartbeats >= 3, "only {} heartbeats while probing", heartbeats);
    }

    #[tokio::test]
    async fn test_info_failure_response() {
        let (mut server, _handle) = connect(session(Duration::from_secs(3600))).await;

        send(&mut server, r#"{"type":"server","sid":"7","action":"info","uid":"i-1"}"#).await;
        let response = next_response(&mut server).await;

        assert_eq!(response.action(), Action::Info);
        assert_eq!(response.uid.as_deref(), Some("i-1"));
        assert_eq!(response.code, Some(500));
    }

    #[tokio::test]
    async fn test_session_ends_when_coordinator_closes() {
        let (mut server, handle) = connect(session(Duration::from_millis(20))).await;

        let _init = next_message(&mut server).await;
        server.close(None).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("session did not end")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_session_ends_on_dropped_connection() {
        let (server, handle) = connect(session(Duration::from_millis(20))).await;
        drop(server);

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("session did not end")
            .unwrap();
        // Abrupt drop surfaces either as a transport error or end of stream
        if let Err(e) = result {
            assert!(e.is_retryable());
        }
    }

    #[tokio::test]
    async fn test_cancelled_session_stops_heartbeat() {
        let (mut server, handle) = connect(session(Duration::from_millis(20))).await;
        next_message(&mut server).await;

        handle.abort();

        // With the heartbeat gone the writer's queue has no senders left, so it closes
        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(Ok(frame)) = server.next().await {
                if matches!(frame, WsMessage::Close(_)) {
                    break;
                }
            }
        })
        .await;
        assert!(drained.is_ok(), "heartbeat kept the connection open after cancellation");
    }
}
