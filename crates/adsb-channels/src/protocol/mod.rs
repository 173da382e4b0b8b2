// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Protocol layer for the aircraft channels socket.
//!
//! Inbound frames are JSON objects tagged with a `type` field and carrying
//! their payload under `data`:
//!
//! ```text
//! {"type":"aircraft:snapshot","data":{"aircraft":[{...},{...}]}}
//! {"type":"aircraft:update","data":{"aircraft":[{...}],"removed":["A1B2C3"]}}
//! {"type":"response","request_id":"...","data":{...}}
//! ```
//!
//! Outbound frames are tagged with an `action` field (see [`ChannelAction`]).
//! Aircraft entries are kept as raw JSON here; normalization happens per
//! entry in the reconciler so one bad entry cannot spoil a batch.

pub mod fields;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur while decoding a frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    /// Full replacement of the aircraft table.
    Snapshot {
        aircraft: Vec<Value>,
    },

    /// Incremental changes: updated or new entries plus removed ids.
    Update {
        aircraft: Vec<Value>,
        removed: Vec<String>,
    },

    /// Explicit removal of one or more aircraft.
    Remove {
        ids: Vec<String>,
    },

    /// Periodic keep-alive, optionally with the server's aircraft count.
    Heartbeat {
        count: Option<u64>,
    },

    /// Reply to a correlated request.
    Response {
        request_id: String,
        data: Value,
    },

    /// Server-side error, correlated to a request when `request_id` is set.
    Error {
        request_id: Option<String>,
        message: String,
    },

    /// Any other message type (alerts, safety events, ...). Not handled by
    /// the position pipeline.
    Other(String),
}

impl ChannelMessage {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(&value)
    }

    /// Decode an already-parsed JSON frame.
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let object = value
            .as_object()
            .ok_or_else(|| ProtocolError::InvalidFormat("frame is not a JSON object".to_string()))?;
        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingField("type"))?;
        // Some servers put the payload at the top level instead of under `data`
        let payload = object.get("data").unwrap_or(value);

        let message = match kind {
            "aircraft:snapshot" | "snapshot" => Self::Snapshot {
                aircraft: aircraft_list(payload)?,
            },
            "aircraft:update" | "update" | "aircraft:new" => Self::Update {
                aircraft: optional_aircraft_list(payload)?,
                removed: id_list(payload, &["removed", "removed_icaos"]),
            },
            "aircraft:remove" => {
                let mut ids = id_list(payload, &["icaos", "removed"]);
                if let Some(id) = payload.get("icao").and_then(Value::as_str).and_then(fields::normalize_id) {
                    ids.push(id);
                }
                if ids.is_empty() {
                    return Err(ProtocolError::MissingField("icao"));
                }
                Self::Remove { ids }
            }
            "aircraft:heartbeat" | "heartbeat" => Self::Heartbeat {
                count: payload.get("count").and_then(Value::as_u64),
            },
            "response" => Self::Response {
                request_id: request_id(value, payload).ok_or(ProtocolError::MissingField("request_id"))?,
                data: object.get("data").cloned().unwrap_or(Value::Null),
            },
            "error" => Self::Error {
                request_id: request_id(value, payload),
                message: payload
                    .get("message")
                    .or_else(|| object.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            },
            other => Self::Other(other.to_string()),
        };

        Ok(message)
    }
}

fn aircraft_list(payload: &Value) -> Result<Vec<Value>, ProtocolError> {
    match payload {
        Value::Array(entries) => Ok(entries.clone()),
        Value::Object(map) => match map.get("aircraft") {
            Some(Value::Array(entries)) => Ok(entries.clone()),
            Some(Value::Null) | None => Err(ProtocolError::MissingField("aircraft")),
            Some(_) => Err(ProtocolError::InvalidFormat("'aircraft' is not an array".to_string())),
        },
        _ => Err(ProtocolError::InvalidFormat("payload is not an object".to_string())),
    }
}

/// Like [`aircraft_list`], but a missing or null `aircraft` is empty.
fn optional_aircraft_list(payload: &Value) -> Result<Vec<Value>, ProtocolError> {
    match payload.get("aircraft") {
        Some(Value::Null) | None if payload.is_object() => Ok(Vec::new()),
        _ => aircraft_list(payload),
    }
}

fn id_list(payload: &Value, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .filter_map(|key| payload.get(*key))
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(Value::as_str)
        .filter_map(fields::normalize_id)
        .collect()
}

fn request_id(frame: &Value, payload: &Value) -> Option<String> {
    frame
        .get("request_id")
        .or_else(|| payload.get("request_id"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

/// Outbound actions sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ChannelAction {
    Subscribe {
        topics: Vec<String>,
    },
    Unsubscribe {
        topics: Vec<String>,
    },
    Request {
        #[serde(rename = "type")]
        kind: String,
        request_id: String,
        params: Value,
    },
}

impl ChannelAction {
    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Trait for frame parsers.
///
/// Implement this trait to support a different channels wire format.
pub trait Protocol {
    /// The message type produced by this parser.
    type Message;
    /// The error type for parsing failures.
    type Error;

    /// Parse input bytes into a message.
    ///
    /// Returns `Ok(Some(message))` if parsing succeeded,
    /// `Ok(None)` if the input is valid but doesn't produce a message,
    /// or `Err(error)` if parsing failed.
    fn parse(&mut self, input: &[u8]) -> Result<Option<Self::Message>, Self::Error>;
}

/// Parser for the JSON channels protocol.
#[derive(Debug, Default)]
pub struct ChannelParser;

impl ChannelParser {
    /// Create a new channels parser.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Protocol for ChannelParser {
    type Message = ChannelMessage;
    type Error = ProtocolError;

    fn parse(&mut self, input: &[u8]) -> Result<Option<ChannelMessage>, ProtocolError> {
        let text = std::str::from_utf8(input)
            .map_err(|e| ProtocolError::InvalidFormat(format!("invalid UTF-8: {e}")))?;

        if text.trim().is_empty() {
            return Ok(None);
        }

        ChannelMessage::decode(text).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_snapshot() {
        let msg = ChannelMessage::decode(
            r#"{"type":"aircraft:snapshot","data":{"aircraft":[{"hex":"A1","lat":10,"lon":20}]}}"#,
        )
        .unwrap();
        assert!(matches!(msg, ChannelMessage::Snapshot { ref aircraft } if aircraft.len() == 1));
    }

    #[test]
    fn test_decode_update_with_removals() {
        let msg = ChannelMessage::decode(
            r#"{"type":"aircraft:update","data":{"aircraft":[],"removed":["abc123"," def456"]}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ChannelMessage::Update {
                aircraft: vec![],
                removed: vec!["ABC123".to_string(), "DEF456".to_string()],
            }
        );
    }

    #[test]
    fn test_decode_update_with_only_removals() {
        let msg =
            ChannelMessage::decode(r#"{"type":"aircraft:update","data":{"removed":["ABC123"]}}"#)
                .unwrap();
        assert_eq!(
            msg,
            ChannelMessage::Update {
                aircraft: vec![],
                removed: vec!["ABC123".to_string()],
            }
        );

        let msg = ChannelMessage::decode(r#"{"type":"aircraft:update","data":{"aircraft":null}}"#)
            .unwrap();
        assert!(matches!(msg, ChannelMessage::Update { ref aircraft, .. } if aircraft.is_empty()));

        assert!(matches!(
            ChannelMessage::decode(r#"{"type":"aircraft:update","data":{"aircraft":"A1"}}"#),
            Err(ProtocolError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_decode_new_is_update() {
        let msg =
            ChannelMessage::decode(r#"{"type":"aircraft:new","data":{"aircraft":[{"hex":"A1"}]}}"#)
                .unwrap();
        assert!(matches!(msg, ChannelMessage::Update { ref removed, .. } if removed.is_empty()));
    }

    #[test]
    fn test_decode_remove() {
        let msg = ChannelMessage::decode(r#"{"type":"aircraft:remove","data":{"icao":"a1"}}"#).unwrap();
        assert_eq!(msg, ChannelMessage::Remove { ids: vec!["A1".to_string()] });

        let err = ChannelMessage::decode(r#"{"type":"aircraft:remove","data":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("icao")));
    }

    #[test]
    fn test_decode_top_level_payload() {
        let msg = ChannelMessage::decode(r#"{"type":"snapshot","aircraft":[]}"#).unwrap();
        assert_eq!(msg, ChannelMessage::Snapshot { aircraft: vec![] });
    }

    #[test]
    fn test_decode_response_and_error() {
        let msg = ChannelMessage::decode(r#"{"type":"response","request_id":"r1","data":{"ok":true}}"#)
            .unwrap();
        assert_eq!(
            msg,
            ChannelMessage::Response {
                request_id: "r1".to_string(),
                data: json!({"ok": true}),
            }
        );

        let msg = ChannelMessage::decode(r#"{"type":"error","request_id":"r2","message":"nope"}"#)
            .unwrap();
        assert_eq!(
            msg,
            ChannelMessage::Error {
                request_id: Some("r2".to_string()),
                message: "nope".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_failures() {
        assert!(matches!(ChannelMessage::decode("not json"), Err(ProtocolError::InvalidJson(_))));
        assert!(matches!(ChannelMessage::decode("[1,2]"), Err(ProtocolError::InvalidFormat(_))));
        assert!(matches!(
            ChannelMessage::decode(r#"{"data":{}}"#),
            Err(ProtocolError::MissingField("type"))
        ));
        assert!(matches!(
            ChannelMessage::decode(r#"{"type":"aircraft:snapshot","data":{"aircraft":5}}"#),
            Err(ProtocolError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_decode_other() {
        let msg = ChannelMessage::decode(r#"{"type":"safety:event","data":{}}"#).unwrap();
        assert_eq!(msg, ChannelMessage::Other("safety:event".to_string()));
    }

    #[test]
    fn test_encode_actions() {
        let subscribe = ChannelAction::Subscribe {
            topics: vec!["aircraft".to_string()],
        };
        assert_eq!(
            serde_json::from_str::<Value>(&subscribe.encode().unwrap()).unwrap(),
            json!({"action": "subscribe", "topics": ["aircraft"]})
        );

        let request = ChannelAction::Request {
            kind: "aircraft-info".to_string(),
            request_id: "r1".to_string(),
            params: json!({"icao": "A1"}),
        };
        assert_eq!(
            serde_json::from_str::<Value>(&request.encode().unwrap()).unwrap(),
            json!({"action": "request", "type": "aircraft-info", "request_id": "r1", "params": {"icao": "A1"}})
        );
    }

    #[test]
    fn test_parser_skips_blank_input() {
        let mut parser = ChannelParser::new();
        assert!(parser.parse(b"  \n").unwrap().is_none());
        assert!(parser.parse(&[0xff, 0xfe]).is_err());
        assert!(parser
            .parse(br#"{"type":"heartbeat","data":{"count":3}}"#)
            .unwrap()
            .is_some_and(|m| m == ChannelMessage::Heartbeat { count: Some(3) }));
    }
}
