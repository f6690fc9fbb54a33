//! `info` command: fetch the local status document

use std::time::Duration;

use serde_json::value::RawValue;
use tracing::{info, warn};
use url::{Host, Url};

use crate::config::StatusSettings;
use crate::error::{Error, Result};
use crate::protocol::{Action, Identity, Message};
use crate::version::build_info;

/// HTTP client for the status endpoint
pub struct StatusFetcher {
    client: reqwest::Client,
    settings: StatusSettings,
}

impl StatusFetcher {
    pub fn new(settings: StatusSettings) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .user_agent(build_info().user_agent());
        if targets_loopback(&settings.url) {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, settings })
    }

    pub fn url(&self) -> &str {
        &self.settings.url
    }

    /// Perform the authenticated GET, up to receiving response headers
    async fn send(&self) -> Result<reqwest::Response> {
        self.client
            .get(&self.settings.url)
            .basic_auth(&self.settings.username, Some(&self.settings.password))
            .send()
            .await
            .map_err(|e| self.classify(e))
    }

    fn classify(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::StatusTimeout {
                url: self.settings.url.clone(),
                timeout_ms: self.settings.timeout_ms,
            }
        } else {
            Error::StatusFetch {
                message: format!("status request to {} failed: {}", self.settings.url, e),
            }
        }
    }
}

/// Local endpoints must never be routed through an HTTP proxy
fn targets_loopback(url: &str) -> bool {
    match Url::parse(url).ok().as_ref().and_then(Url::host) {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Fetch status for an `info` request
///
/// Returns `None` when the body cannot be read after a completed exchange;
/// that case is logged and the request goes unanswered.
pub async fn handle_info(fetcher: &StatusFetcher, identity: &Identity, request: &Message) -> Option<Message> {
    let uid = request.uid.clone();

    let response = match fetcher.send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(uid = ?uid, url = %fetcher.url(), error = %e, "Status request failed");
            return Some(Message::failure(identity, Action::Info, uid, &e.to_string()));
        }
    };

    let status = response.status();
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(e) => {
            warn!(uid = ?uid, %status, error = %e, "Failed to read status response body, no reply sent");
            return None;
        }
    };

    match embed_body(body.to_vec()) {
        Ok(result) => {
            info!(uid = ?uid, %status, bytes = body.len(), "Status fetched");
            Some(Message::success(identity, Action::Info, uid, result))
        }
        Err(e) => {
            warn!(uid = ?uid, %status, error = %e, "Status response is not JSON");
            Some(Message::failure(identity, Action::Info, uid, &e.to_string()))
        }
    }
}

/// Wrap the body as raw JSON without re-serializing it
fn embed_body(body: Vec<u8>) -> Result<Box<RawValue>> {
    let text = String::from_utf8(body).map_err(|e| Error::StatusBody {
        message: format!("status response is not valid UTF-8: {}", e),
    })?;
    RawValue::from_string(text).map_err(|e| Error::StatusBody {
        message: format!("status response is not valid JSON: {}", e),
    })
}
