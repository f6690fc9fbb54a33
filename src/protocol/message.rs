//! Wire message definition
//!
//! Every frame exchanged with the coordinator is one flat JSON object.
//! Optional fields are omitted when absent and decode to `None`, and
//! `result` is carried as raw JSON that is never re-parsed here.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

use crate::error::{Error, Result};

/// Status code for a successful command
pub const CODE_OK: i32 = 200;

/// Status code for a failed command
pub const CODE_ERROR: i32 = 500;

// ─────────────────────────────────────────────────────────────────
// Action
// ─────────────────────────────────────────────────────────────────

/// Command tag carried in the `action` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Heartbeat (outbound) or heartbeat ack (inbound)
    Head,
    /// ICMP probe request
    Ping,
    /// Status fetch request
    Info,
    /// Empty or unrecognized tag
    Other,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Head => "head",
            Action::Ping => "ping",
            Action::Info => "info",
            Action::Other => "",
        }
    }
}

impl From<&str> for Action {
    fn from(tag: &str) -> Self {
        match tag {
            "head" => Action::Head,
            "ping" => Action::Ping,
            "info" => Action::Info,
            _ => Action::Other,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────

/// Who this node is on the wire; fixed for the life of the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Sent as `type`
    pub role: String,
    /// Sent as `sid`
    pub sid: String,
}

impl Identity {
    pub fn new(role: impl Into<String>, sid: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            sid: sid.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Message
// ─────────────────────────────────────────────────────────────────

/// A single protocol message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role tag of the sending peer
    #[serde(rename = "type", default, deserialize_with = "null_as_empty")]
    pub role: String,

    /// Session identifier
    #[serde(default, deserialize_with = "null_as_empty")]
    pub sid: String,

    /// Command tag
    #[serde(default, skip_serializing_if = "String::is_empty", deserialize_with = "null_as_empty")]
    pub action: String,

    /// Probe target host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    /// Correlation token, echoed on the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Status code (responses and heartbeats only); peers may send any integer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,

    /// Opaque payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<RawValue>>,
}

impl Message {
    /// First message after the connection opens: role and sid only
    pub fn init(identity: &Identity) -> Self {
        Self::bare(identity)
    }

    /// Periodic keep-alive
    pub fn heartbeat(identity: &Identity) -> Self {
        Self {
            action: Action::Head.as_str().to_string(),
            code: Some(CODE_OK),
            ..Self::bare(identity)
        }
    }

    /// `code=200` response carrying `result` verbatim
    pub fn success(
        identity: &Identity,
        action: Action,
        uid: Option<String>,
        result: Box<RawValue>,
    ) -> Self {
        Self {
            action: action.as_str().to_string(),
            uid,
            code: Some(CODE_OK),
            result: Some(result),
            ..Self::bare(identity)
        }
    }

    /// `code=500` response carrying `{"error": <message>}`
    pub fn failure(
        identity: &Identity,
        action: Action,
        uid: Option<String>,
        message: &str,
    ) -> Self {
        Self {
            action: action.as_str().to_string(),
            uid,
            code: Some(CODE_ERROR),
            result: error_payload(message),
            ..Self::bare(identity)
        }
    }

    fn bare(identity: &Identity) -> Self {
        Self {
            role: identity.role.clone(),
            sid: identity.sid.clone(),
            action: String::new(),
            ip: None,
            uid: None,
            code: None,
            result: None,
        }
    }

    /// Routing tag of this message
    pub fn action(&self) -> Action {
        Action::from(self.action.as_str())
    }

    /// Raw JSON text of `result`, if present
    pub fn result_json(&self) -> Option<&str> {
        self.result.as_deref().map(RawValue::get)
    }

    /// Serialize to JSON text
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::ProtocolEncode)
    }

    /// Parse a text frame
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::malformed(e.to_string()))
    }

    /// Parse a binary frame
    pub fn decode_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::malformed(e.to_string()))
    }
}

/// `null` on a string field reads as the empty string
fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Build the `{"error": ...}` payload; `None` only if serialization fails
fn error_payload(message: &str) -> Option<Box<RawValue>> {
    serde_json::value::to_raw_value(&serde_json::json!({ "error": message })).ok()
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn node(sid: &str) -> Identity {
        Identity::new("node", sid)
    }

    fn raw(json: &str) -> Box<RawValue> {
        RawValue::from_string(json.to_string()).unwrap()
    }

    #[test]
    fn test_init_carries_only_role_and_sid() {
        let json = Message::init(&node("7")).encode().unwrap();
        assert_eq!(json, r#"{"type":"node","sid":"7"}"#);
    }

    #[test]
    fn test_heartbeat_shape() {
        let value: Value = serde_json::from_str(&Message::heartbeat(&node("7")).encode().unwrap()).unwrap();
        assert_eq!(value["type"], "node");
        assert_eq!(value["sid"], "7");
        assert_eq!(value["action"], "head");
        assert_eq!(value["code"], 200);
        assert!(value.get("uid").is_none());
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_decode_ping_request() {
        let msg = Message::decode(r#"{"type":"server","sid":"7","action":"ping","ip":"10.0.0.1","uid":"u-1"}"#).unwrap();
        assert_eq!(msg.action(), Action::Ping);
        assert_eq!(msg.ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(msg.uid.as_deref(), Some("u-1"));
        assert!(msg.code.is_none());
        assert!(msg.result.is_none());
    }

    #[test]
    fn test_absent_fields_stay_absent() {
        let msg = Message::decode(r#"{"type":"server","sid":"1"}"#).unwrap();
        assert_eq!(msg.action(), Action::Other);
        assert!(msg.code.is_none());

        let json = msg.encode().unwrap();
        let back = Message::decode(&json).unwrap();
        assert!(back.ip.is_none());
        assert!(back.uid.is_none());
        assert!(back.code.is_none());
        assert!(back.result.is_none());
        assert!(!json.contains("action"));
    }

    #[test]
    fn test_zero_code_distinct_from_absent() {
        let msg = Message::decode(r#"{"type":"server","sid":"1","code":0}"#).unwrap();
        assert_eq!(msg.code, Some(0));
        assert!(Message::decode(&msg.encode().unwrap()).unwrap().code == Some(0));
    }

    #[test]
    fn test_null_fields_read_as_empty() {
        let msg = Message::decode(r#"{"type":null,"sid":null,"action":"ping","ip":"1.1.1.1","uid":"u"}"#).unwrap();
        assert_eq!(msg.role, "");
        assert_eq!(msg.sid, "");
        assert_eq!(msg.action(), Action::Ping);
        assert_eq!(msg.uid.as_deref(), Some("u"));

        let msg = Message::decode(r#"{"type":"server","sid":"1","action":null,"uid":null,"result":null}"#).unwrap();
        assert_eq!(msg.action(), Action::Other);
        assert!(msg.uid.is_none());
        assert!(msg.result.is_none());
    }

    #[test]
    fn test_negative_code_accepted() {
        let msg = Message::decode(r#"{"type":"server","sid":"1","action":"info","uid":"i","code":-1}"#).unwrap();
        assert_eq!(msg.code, Some(-1));
        assert_eq!(msg.action(), Action::Info);
    }

    #[test]
    fn test_round_trip_preserves_present_fields() {
        let original = Message {
            ip: Some("example.com".to_string()),
            ..Message::success(&node("9"), Action::Info, Some("abc".to_string()), raw(r#"{"players":[1, 2],"ok":true}"#))
        };

        let back = Message::decode(&original.encode().unwrap()).unwrap();
        assert_eq!(back.role, "node");
        assert_eq!(back.sid, "9");
        assert_eq!(back.action(), Action::Info);
        assert_eq!(back.ip.as_deref(), Some("example.com"));
        assert_eq!(back.uid.as_deref(), Some("abc"));
        assert_eq!(back.code, Some(200));
        assert_eq!(back.result_json(), Some(r#"{"players":[1, 2],"ok":true}"#));
    }

    #[test]
    fn test_result_passed_through_verbatim() {
        // Spacing and key order survive because the payload is never re-parsed into a tree
        let msg = Message::decode(r#"{"type":"x","sid":"1","result":{"b" : 1,"a":[ ]}}"#).unwrap();
        assert_eq!(msg.result_json(), Some(r#"{"b" : 1,"a":[ ]}"#));
    }

    #[test]
    fn test_failure_payload_is_escaped() {
        let msg = Message::failure(&node("7"), Action::Ping, Some("u".into()), r#"lookup "bad host": no such host"#);
        let value: Value = serde_json::from_str(msg.result_json().unwrap()).unwrap();
        assert_eq!(value["error"], r#"lookup "bad host": no such host"#);
        assert_eq!(msg.code, Some(500));
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(Message::decode("not json"), Err(Error::ProtocolMalformed { .. })));
        assert!(Message::decode(r#"{"type":"x","code":"two hundred"}"#).is_err());
        assert!(Message::decode_bytes(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!(Action::from("head"), Action::Head);
        assert_eq!(Action::from("ping"), Action::Ping);
        assert_eq!(Action::from("info"), Action::Info);
        assert_eq!(Action::from("PING"), Action::Other);
        assert_eq!(Action::from(""), Action::Other);
        assert_eq!(Action::Info.to_string(), "info");
    }
}
