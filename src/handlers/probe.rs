//! `ping` command: ICMP echo round-trip measurement

use std::net::IpAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use socket2::Type;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, ICMP};
use tracing::{debug, info, warn};

use crate::config::ProbeSettings;
use crate::error::{Error, Result};
use crate::protocol::{Action, Identity, Message};

/// Outcome of one probe run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeStats {
    /// Echo requests sent
    pub sent: u16,
    /// Replies received
    pub received: u16,
    /// Mean round-trip time over received replies
    pub avg_rtt: Duration,
}

impl ProbeStats {
    /// Wire form of the latency, e.g. `"23ms"`
    pub fn latency_label(&self) -> String {
        format!("{}ms", self.avg_rtt.as_millis())
    }
}

/// Something that can measure round-trip latency to a host
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, host: &str) -> Result<ProbeStats>;
}

// ─────────────────────────────────────────────────────────────────
// ICMP Prober
// ─────────────────────────────────────────────────────────────────

/// ICMP echo prober backed by `surge-ping`
pub struct IcmpProber {
    settings: ProbeSettings,
    next_ident: AtomicU16,
}

impl IcmpProber {
    pub fn new(settings: ProbeSettings) -> Self {
        Self {
            settings,
            next_ident: AtomicU16::new(std::process::id() as u16),
        }
    }

    fn identifier(&self) -> PingIdentifier {
        PingIdentifier(self.next_ident.fetch_add(1, Ordering::Relaxed))
    }
}

/// Raw sockets only where the platform has no unprivileged ICMP socket
fn socket_type() -> Type {
    if cfg!(windows) {
        Type::RAW
    } else {
        Type::DGRAM
    }
}

async fn resolve(host: &str) -> Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let mut addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| Error::probe_setup(format!("failed to resolve {}: {}", host, e)))?;

    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| Error::probe_setup(format!("no address found for {}", host)))
}

#[async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, host: &str) -> Result<ProbeStats> {
        let addr = resolve(host).await?;
        let kind = if addr.is_ipv4() { ICMP::V4 } else { ICMP::V6 };

        let config = Config::builder()
            .kind(kind)
            .sock_type_hint(socket_type())
            .build();
        let client = Client::new(&config)
            .map_err(|e| Error::probe_setup(format!("failed to open ICMP socket: {}", e)))?;

        let mut pinger = client.pinger(addr, self.identifier()).await;
        pinger.timeout(Duration::from_millis(self.settings.timeout_ms));

        let payload = vec![0u8; self.settings.payload_size];
        let count = self.settings.count;
        let mut rtts = Vec::with_capacity(count as usize);
        let mut last_error = None;

        for seq in 0..count {
            if seq > 0 {
                tokio::time::sleep(Duration::from_millis(self.settings.interval_ms)).await;
            }
            match pinger.ping(PingSequence(seq), &payload).await {
                Ok((_reply, rtt)) => {
                    debug!(host = %host, %addr, seq, rtt_ms = rtt.as_millis() as u64, "Echo reply");
                    rtts.push(rtt);
                }
                Err(e) => {
                    debug!(host = %host, %addr, seq, error = %e, "Echo lost");
                    last_error = Some(e.to_string());
                }
            }
        }

        summarize(host, count, &rtts, last_error)
    }
}

/// Fold per-echo round trips into stats; no replies at all is a failure
fn summarize(host: &str, sent: u16, rtts: &[Duration], last_error: Option<String>) -> Result<ProbeStats> {
    if rtts.is_empty() {
        let reason = last_error.map(|e| format!(": {}", e)).unwrap_or_default();
        return Err(Error::probe_failed(format!(
            "all {} probes to {} were lost{}",
            sent, host, reason
        )));
    }

    let total: Duration = rtts.iter().sum();
    Ok(ProbeStats {
        sent,
        received: rtts.len() as u16,
        avg_rtt: total / rtts.len() as u32,
    })
}

// ─────────────────────────────────────────────────────────────────
// Handler
// ─────────────────────────────────────────────────────────────────

/// Run a probe for a `ping` request and build exactly one response
pub async fn handle_ping(prober: &dyn Prober, identity: &Identity, request: &Message) -> Message {
    let uid = request.uid.clone();
    let host = match request.ip.as_deref().map(str::trim) {
        Some(host) if !host.is_empty() => host,
        _ => {
            warn!(uid = ?uid, "Ping request without target host");
            return Message::failure(identity, Action::Ping, uid, "missing target host");
        }
    };

    info!(host = %host, uid = ?uid, "Pinging");

    let stats = match prober.probe(host).await {
        Ok(stats) => stats,
        Err(e) => {
            warn!(host = %host, uid = ?uid, error = %e, "Ping failed");
            return Message::failure(identity, Action::Ping, uid, &e.to_string());
        }
    };

    let label = stats.latency_label();
    info!(
        host = %host,
        uid = ?uid,
        latency = %label,
        received = stats.received,
        sent = stats.sent,
        "Ping complete"
    );

    match serde_json::value::to_raw_value(&label) {
        Ok(result) => Message::success(identity, Action::Ping, uid, result),
        Err(e) => Message::failure(identity, Action::Ping, uid, &e.to_string()),
    }
}
