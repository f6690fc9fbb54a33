//! Command handlers
//!
//! Each routed request produces at most one correlated response:
//! - `ping`: ICMP latency probe
//! - `info`: local status document

mod probe;
mod status;

pub use probe::{handle_ping, IcmpProber, ProbeStats, Prober};
pub use status::{handle_info, StatusFetcher};

use std::sync::Arc;

use crate::protocol::{Action, Identity, Message};

/// Routes requests to the handler for their action
pub struct Handlers {
    identity: Identity,
    prober: Arc<dyn Prober>,
    status: StatusFetcher,
}

impl Handlers {
    pub fn new(identity: Identity, prober: Arc<dyn Prober>, status: StatusFetcher) -> Self {
        Self {
            identity,
            prober,
            status,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Whether `action` has a handler
    pub fn routes(action: Action) -> bool {
        matches!(action, Action::Ping | Action::Info)
    }

    /// Run the handler for `request`; `None` means nothing is sent back
    pub async fn handle(&self, request: Message) -> Option<Message> {
        match request.action() {
            Action::Ping => Some(handle_ping(self.prober.as_ref(), &self.identity, &request).await),
            Action::Info => handle_info(&self.status, &self.identity, &request).await,
            Action::Head | Action::Other => None,
        }
    }
}
