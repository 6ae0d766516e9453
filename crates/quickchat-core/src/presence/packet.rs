//! Engine.IO v4 / Socket.IO v5 text packets.
//!
//! Only the text framing used on a websocket transport is handled. An
//! Engine.IO packet is a single type digit followed by its data; Socket.IO
//! packets travel inside Engine.IO `message` (`4`) packets, so a roster
//! event on the wire looks like `42["getOnlineUsers",["u1","u2"]]`.
//! Binary attachments are not supported.

use serde::Deserialize;
use serde_json::Value;

use super::PresenceError;

/// Handshake data sent by the server in the Engine.IO open packet
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    #[serde(default)]
    pub sid: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// `0{...}` Engine.IO handshake
    Open(OpenInfo),
    /// `1` Engine.IO close
    Close,
    /// `2` heartbeat from the server
    Ping,
    /// `3` heartbeat reply
    Pong,
    /// `6` no-op
    Noop,
    /// `40` namespace connect (server: accepted, client: request)
    Connect(Option<Value>),
    /// `41` namespace disconnect
    Disconnect,
    /// `42[name, ...args]`
    Event { name: String, args: Vec<Value> },
    /// `44{"message": ...}` namespace refused
    ConnectError(String),
}

impl Packet {
    pub fn decode(text: &str) -> Result<Self, PresenceError> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| PresenceError::Protocol("empty packet".to_string()))?;
        let rest = chars.as_str();

        match kind {
            '0' => serde_json::from_str(rest)
                .map(Packet::Open)
                .map_err(|e| PresenceError::Protocol(format!("bad open packet: {}", e))),
            '1' => Ok(Packet::Close),
            '2' => Ok(Packet::Ping),
            '3' => Ok(Packet::Pong),
            '6' => Ok(Packet::Noop),
            '4' => Self::decode_message(rest),
            other => Err(PresenceError::Protocol(format!(
                "unsupported engine packet type '{}'",
                other
            ))),
        }
    }

    fn decode_message(text: &str) -> Result<Self, PresenceError> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| PresenceError::Protocol("empty socket packet".to_string()))?;
        let payload = strip_ack_id(strip_namespace(chars.as_str()));

        match kind {
            '0' => Ok(Packet::Connect(parse_optional(payload)?)),
            '1' => Ok(Packet::Disconnect),
            '2' => {
                let mut items = match serde_json::from_str::<Value>(payload) {
                    Ok(Value::Array(items)) => items,
                    Ok(_) => return Err(PresenceError::Protocol("event payload is not an array".to_string())),
                    Err(e) => return Err(PresenceError::Protocol(format!("bad event payload: {}", e))),
                };
                if items.is_empty() {
                    return Err(PresenceError::Protocol("event without a name".to_string()));
                }
                let name = match items.remove(0) {
                    Value::String(name) => name,
                    other => return Err(PresenceError::Protocol(format!("event name is not a string: {}", other))),
                };
                Ok(Packet::Event { name, args: items })
            }
            '4' => {
                let message = match parse_optional(payload)? {
                    Some(Value::Object(map)) => map
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("connection refused")
                        .to_string(),
                    Some(Value::String(message)) => message,
                    _ => "connection refused".to_string(),
                };
                Ok(Packet::ConnectError(message))
            }
            other => Err(PresenceError::Protocol(format!(
                "unsupported socket packet type '{}'",
                other
            ))),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Packet::Open(info) => format!(
                "0{}",
                serde_json::json!({
                    "sid": info.sid,
                    "pingInterval": info.ping_interval,
                    "pingTimeout": info.ping_timeout,
                })
            ),
            Packet::Close => "1".to_string(),
            Packet::Ping => "2".to_string(),
            Packet::Pong => "3".to_string(),
            Packet::Noop => "6".to_string(),
            Packet::Connect(None) => "40".to_string(),
            Packet::Connect(Some(data)) => format!("40{}", data),
            Packet::Disconnect => "41".to_string(),
            Packet::Event { name, args } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                format!("42{}", Value::Array(items))
            }
            Packet::ConnectError(message) => {
                format!("44{}", serde_json::json!({ "message": message }))
            }
        }
    }
}

/// Drop a `/namespace,` prefix. Only the default namespace is used, so the
/// name itself is ignored.
fn strip_namespace(text: &str) -> &str {
    if text.starts_with('/') {
        match text.find(',') {
            Some(idx) => &text[idx + 1..],
            None => "",
        }
    } else {
        text
    }
}

fn strip_ack_id(text: &str) -> &str {
    text.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn parse_optional(payload: &str) -> Result<Option<Value>, PresenceError> {
    if payload.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(payload)
        .map(Some)
        .map_err(|e| PresenceError::Protocol(format!("bad packet payload: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_open() {
        let packet = Packet::decode(r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":5000,"maxPayload":1000000}"#).unwrap();
        assert_eq!(
            packet,
            Packet::Open(OpenInfo {
                sid: "abc".into(),
                ping_interval: 25000,
                ping_timeout: 5000,
            })
        );
    }

    #[test]
    fn test_decode_heartbeats() {
        assert_eq!(Packet::decode("2").unwrap(), Packet::Ping);
        assert_eq!(Packet::decode("3").unwrap(), Packet::Pong);
        assert_eq!(Packet::decode("1").unwrap(), Packet::Close);
    }

    #[test]
    fn test_decode_connect() {
        assert_eq!(
            Packet::decode(r#"40{"sid":"xyz"}"#).unwrap(),
            Packet::Connect(Some(json!({"sid": "xyz"})))
        );
        assert_eq!(Packet::decode("40").unwrap(), Packet::Connect(None));
        assert_eq!(Packet::decode("41").unwrap(), Packet::Disconnect);
    }

    #[test]
    fn test_decode_roster_event() {
        let packet = Packet::decode(r#"42["getOnlineUsers",["u1","u2"]]"#).unwrap();
        assert_eq!(
            packet,
            Packet::Event {
                name: "getOnlineUsers".into(),
                args: vec![json!(["u1", "u2"])],
            }
        );
    }

    #[test]
    fn test_decode_event_with_namespace_and_ack() {
        let packet = Packet::decode(r#"42/chat,12["newMessage",{"text":"hi"}]"#).unwrap();
        assert_eq!(
            packet,
            Packet::Event {
                name: "newMessage".into(),
                args: vec![json!({"text": "hi"})],
            }
        );
    }

    #[test]
    fn test_decode_connect_error() {
        assert_eq!(
            Packet::decode(r#"44{"message":"Not authorized"}"#).unwrap(),
            Packet::ConnectError("Not authorized".into())
        );
        assert_eq!(
            Packet::decode("44").unwrap(),
            Packet::ConnectError("connection refused".into())
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Packet::decode("").is_err());
        assert!(Packet::decode("9").is_err());
        assert!(Packet::decode("42{\"not\":\"array\"}").is_err());
        assert!(Packet::decode("42[]").is_err());
        assert!(Packet::decode("42[1,2]").is_err());
        assert!(Packet::decode("0not-json").is_err());
    }

    #[test]
    fn test_encode_client_packets() {
        assert_eq!(Packet::Connect(None).encode(), "40");
        assert_eq!(Packet::Pong.encode(), "3");
        assert_eq!(Packet::Disconnect.encode(), "41");
        assert_eq!(
            Packet::Event {
                name: "getOnlineUsers".into(),
                args: vec![json!(["c"])],
            }
            .encode(),
            r#"42["getOnlineUsers",["c"]]"#
        );
    }
}
