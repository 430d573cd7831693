//! Engine.IO v4 / Socket.IO v5 text framing, default namespace only.
//!
//! | Frame           | Meaning                          |
//! |-----------------|----------------------------------|
//! | `0{...}`        | engine open (sid, ping timing)   |
//! | `1`             | engine close                     |
//! | `2` / `3`       | ping / pong                      |
//! | `6`             | noop                             |
//! | `40{...}`       | socket connect (auth or ack)     |
//! | `41`            | socket disconnect                |
//! | `42[name,data]` | event, optionally with an ack id |
//! | `44{...}`       | connect error                    |

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::RealtimeError;

/// Handshake data sent by the server in the open packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

/// Upper bound on the liveness window, whatever the server announces.
const MAX_LIVENESS_WINDOW: Duration = Duration::from_secs(60 * 60);

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

impl OpenInfo {
    /// How long to wait for the next server ping before giving up.
    pub fn liveness_window(&self) -> Duration {
        let millis = self.ping_interval.saturating_add(self.ping_timeout);
        Duration::from_millis(millis).min(MAX_LIVENESS_WINDOW)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    Noop,
    /// Client auth payload, or the server's ack.
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, payload: Value },
    ConnectError { message: String },
}

impl Packet {
    pub fn connect_with_token(token: &str) -> Self {
        Self::Connect(Some(serde_json::json!({ "token": token })))
    }

    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        Self::Event {
            name: name.into(),
            payload,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Open(info) => format!(
                "0{}",
                serde_json::json!({
                    "sid": info.sid,
                    "pingInterval": info.ping_interval,
                    "pingTimeout": info.ping_timeout,
                })
            ),
            Self::Close => "1".to_string(),
            Self::Ping => "2".to_string(),
            Self::Pong => "3".to_string(),
            Self::Noop => "6".to_string(),
            Self::Connect(None) => "40".to_string(),
            Self::Connect(Some(data)) => format!("40{data}"),
            Self::Disconnect => "41".to_string(),
            Self::Event { name, payload } => {
                let frame = if payload.is_null() {
                    serde_json::json!([name])
                } else {
                    serde_json::json!([name, payload])
                };
                format!("42{frame}")
            }
            Self::ConnectError { message } => {
                format!("44{}", serde_json::json!({ "message": message }))
            }
        }
    }

    pub fn decode(frame: &str) -> Result<Self, RealtimeError> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| RealtimeError::protocol("empty frame"))?;
        let rest = chars.as_str();

        match kind {
            '0' => {
                let info = serde_json::from_str(rest)
                    .map_err(|e| RealtimeError::protocol(format!("bad open packet: {e}")))?;
                Ok(Self::Open(info))
            }
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping),
            '3' => Ok(Self::Pong),
            '6' => Ok(Self::Noop),
            '4' => decode_socket(rest),
            other => Err(RealtimeError::protocol(format!(
                "unknown engine packet type '{other}'"
            ))),
        }
    }
}

fn decode_socket(frame: &str) -> Result<Packet, RealtimeError> {
    let mut chars = frame.chars();
    let kind = chars
        .next()
        .ok_or_else(|| RealtimeError::protocol("missing socket packet type"))?;
    let rest = chars.as_str();

    if rest.starts_with('/') {
        return Err(RealtimeError::protocol("namespaces are not supported"));
    }

    match kind {
        '0' if rest.is_empty() => Ok(Packet::Connect(None)),
        '0' => Ok(Packet::Connect(Some(parse_json(rest)?))),
        '1' => Ok(Packet::Disconnect),
        '2' => {
            // Skip an optional ack id.
            let body = rest.trim_start_matches(|c: char| c.is_ascii_digit());
            let Value::Array(mut items) = parse_json(body)? else {
                return Err(RealtimeError::protocol("event is not an array"));
            };
            if items.is_empty() {
                return Err(RealtimeError::protocol("event without a name"));
            }
            let Value::String(name) = items.remove(0) else {
                return Err(RealtimeError::protocol("event name is not a string"));
            };
            let payload = match items.len() {
                0 => Value::Null,
                1 => items.remove(0),
                _ => Value::Array(items),
            };
            Ok(Packet::Event { name, payload })
        }
        '4' => {
            let message = match parse_json(rest)? {
                Value::String(message) => message,
                value => value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("connection refused")
                    .to_string(),
            };
            Ok(Packet::ConnectError { message })
        }
        other => Err(RealtimeError::protocol(format!(
            "unsupported socket packet type '{other}'"
        ))),
    }
}

fn parse_json(text: &str) -> Result<Value, RealtimeError> {
    serde_json::from_str(text).map_err(|e| RealtimeError::protocol(format!("bad payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_open() {
        let packet = Packet::decode(
            r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .unwrap();
        let Packet::Open(info) = packet else {
            panic!("expected open packet");
        };
        assert_eq!(info.sid, "abc");
        assert_eq!(info.liveness_window(), Duration::from_secs(45));
    }

    #[test]
    fn test_liveness_window_is_bounded() {
        let info = OpenInfo {
            sid: "abc".into(),
            ping_interval: u64::MAX,
            ping_timeout: u64::MAX,
        };
        assert_eq!(info.liveness_window(), MAX_LIVENESS_WINDOW);

        let packet = Packet::decode(&format!(
            r#"0{{"sid":"abc","pingInterval":{},"pingTimeout":1}}"#,
            u64::MAX
        ))
        .unwrap();
        let Packet::Open(info) = packet else {
            panic!("expected open packet");
        };
        assert_eq!(info.liveness_window(), MAX_LIVENESS_WINDOW);
    }

    #[test]
    fn test_connect_frames() {
        assert_eq!(
            Packet::connect_with_token("a1").encode(),
            r#"40{"token":"a1"}"#
        );
        assert_eq!(
            Packet::decode(r#"40{"sid":"xyz"}"#).unwrap(),
            Packet::Connect(Some(json!({ "sid": "xyz" })))
        );
        assert_eq!(
            Packet::decode(r#"44{"message":"jwt expired"}"#).unwrap(),
            Packet::ConnectError {
                message: "jwt expired".into()
            }
        );
    }

    #[test]
    fn test_events() {
        assert_eq!(
            Packet::decode(r#"42["chat:message",{"conversationId":"c1"}]"#).unwrap(),
            Packet::event("chat:message", json!({ "conversationId": "c1" }))
        );
        // With an ack id.
        assert_eq!(
            Packet::decode(r#"4213["ping"]"#).unwrap(),
            Packet::event("ping", Value::Null)
        );
        assert_eq!(
            Packet::event("chat:new", json!({ "text": "hi" })).encode(),
            r#"42["chat:new",{"text":"hi"}]"#
        );
    }

    #[test]
    fn test_control_frames() {
        assert_eq!(Packet::decode("2").unwrap(), Packet::Ping);
        assert_eq!(Packet::Pong.encode(), "3");
        assert_eq!(Packet::decode("41").unwrap(), Packet::Disconnect);
        assert_eq!(Packet::decode("1").unwrap(), Packet::Close);
    }

    #[test]
    fn test_malformed_frames() {
        assert!(Packet::decode("").is_err());
        assert!(Packet::decode("9").is_err());
        assert!(Packet::decode("42{}").is_err());
        assert!(Packet::decode("42[]").is_err());
        assert!(Packet::decode("40/admin,").is_err());
    }
}
