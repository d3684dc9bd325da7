//! Command-packet JSON protocol (§4.4): `open`, `ping`, `close`, `disconnect`,
//! `error`, `event`.

use serde_json::{json, Map, Value};

/// A decoded negotiated media block (sample rate + channel layout).
#[derive(Debug, Clone)]
pub struct MediaParams {
    pub format: String,
    pub rate: u32,
    pub channel_labels: Vec<String>,
}

impl MediaParams {
    pub fn channels(&self) -> u16 {
        self.channel_labels.len().max(1) as u16
    }
}

/// A parsed command packet.
#[derive(Debug, Clone)]
pub enum Command {
    Open {
        conversation_id: Option<String>,
        media: Option<MediaParams>,
    },
    Ping {
        id: Option<Value>,
        seq: Option<Value>,
    },
    Close,
    Disconnect,
    Error,
    Event {
        texts: Vec<String>,
    },
    Unknown(String),
}

/// Looks up `key` first at the top level of `obj`, then inside a nested
/// `parameters` object - AudioHook commands nest most fields there, but the
/// parser is deliberately tolerant of either shape.
fn find(obj: &Map<String, Value>, key: &str) -> Option<&Value> {
    obj.get(key).or_else(|| {
        obj.get("parameters")
            .and_then(Value::as_object)
            .and_then(|params| params.get(key))
    })
}

fn find_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        find(obj, key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

fn parse_media(obj: &Map<String, Value>) -> Option<MediaParams> {
    let media = find(obj, "media")?.as_object()?;
    let format = media.get("format").and_then(Value::as_str)?.to_string();
    let rate = media.get("rate").and_then(Value::as_u64).unwrap_or(8000) as u32;

    let channel_labels = match media.get("channels") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::Number(n)) => {
            let count = n.as_u64().unwrap_or(1).max(1) as usize;
            (0..count).map(|i| format!("channel_{i}")).collect()
        }
        _ => vec!["external".to_string()],
    };

    Some(MediaParams {
        format,
        rate,
        channel_labels,
    })
}

fn extract_event_texts(obj: &Map<String, Value>) -> Vec<String> {
    let mut texts = Vec::new();

    if let Some(text) = find_string(obj, &["text", "transcript", "utteranceText", "message"]) {
        texts.push(text);
    }

    if let Some(events) = obj.get("events").and_then(Value::as_array) {
        for event in events {
            if let Some(event_obj) = event.as_object() {
                if let Some(text) = find_string(event_obj, &["text", "transcript", "utteranceText", "message"]) {
                    texts.push(text);
                }
            }
        }
    }

    texts
}

/// Parses a command packet's JSON payload.
pub fn parse_command(raw: &Value) -> Command {
    let Some(obj) = raw.as_object() else {
        return Command::Unknown("non-object command payload".to_string());
    };
    let command_type = obj
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();

    match command_type.as_str() {
        "open" => Command::Open {
            conversation_id: find_string(obj, &["conversationId", "conversation_id", "callId", "call_id", "id"]),
            media: parse_media(obj),
        },
        "ping" => Command::Ping {
            id: obj.get("id").cloned(),
            seq: obj.get("seq").cloned(),
        },
        "close" => Command::Close,
        "disconnect" => Command::Disconnect,
        "error" => Command::Error,
        "event" => Command::Event {
            texts: extract_event_texts(obj),
        },
        other => Command::Unknown(other.to_string()),
    }
}

/// Builds the `opened` reply for a successful `open` command.
pub fn build_opened_reply(conversation_id: &str, media: &MediaParams) -> Value {
    json!({
        "type": "opened",
        "conversationId": conversation_id,
        "media": {
            "format": media.format,
            "rate": media.rate,
            "channels": media.channel_labels,
        },
    })
}

/// Builds the `pong` reply for a `ping` command, echoing `id`/`seq` if present.
pub fn build_pong_reply(id: Option<Value>, seq: Option<Value>) -> Value {
    let mut body = json!({"type": "pong"});
    if let Some(id) = id {
        body["id"] = id;
    }
    if let Some(seq) = seq {
        body["seq"] = seq;
    }
    body
}

/// Builds the `closed` reply for a `close` command.
pub fn build_closed_reply() -> Value {
    json!({"type": "closed"})
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_open_with_top_level_call_id_and_media() {
        let raw = json!({
            "type": "open",
            "conversationId": "c-1",
            "media": {"format": "PCMU", "rate": 8000, "channels": ["external"]},
        });
        match parse_command(&raw) {
            Command::Open { conversation_id, media } => {
                assert_eq!(conversation_id, Some("c-1".to_string()));
                let media = media.unwrap();
                assert_eq!(media.format, "PCMU");
                assert_eq!(media.rate, 8000);
                assert_eq!(media.channels(), 1);
            }
            other => panic!("expected Open, got {other:?}"),
        }
    }

    #[test]
    fn parses_open_with_nested_parameters() {
        let raw = json!({
            "type": "open",
            "parameters": {
                "callId": "c-2",
                "media": {"format": "L16", "rate": 16000, "channels": 2},
            },
        });
        match parse_command(&raw) {
            Command::Open { conversation_id, media } => {
                assert_eq!(conversation_id, Some("c-2".to_string()));
                assert_eq!(media.unwrap().channels(), 2);
            }
            other => panic!("expected Open, got {other:?}"),
        }
    }

    #[test]
    fn parses_ping_echoing_id_and_seq() {
        let raw = json!({"type": "ping", "id": "abc", "seq": 7});
        match parse_command(&raw) {
            Command::Ping { id, seq } => {
                assert_eq!(id, Some(json!("abc")));
                assert_eq!(seq, Some(json!(7)));
            }
            other => panic!("expected Ping, got {other:?}"),
        }
    }

    #[test]
    fn extracts_event_text_from_top_level_and_nested_events() {
        let raw = json!({
            "type": "event",
            "parameters": {
                "events": [{"transcript": "hello there"}],
            },
        });
        match parse_command(&raw) {
            Command::Event { texts } => assert_eq!(texts, vec!["hello there".to_string()]),
            other => panic!("expected Event, got {other:?}"),
        }
    }

    #[test]
    fn unknown_command_type_is_preserved() {
        let raw = json!({"type": "something_else"});
        match parse_command(&raw) {
            Command::Unknown(kind) => assert_eq!(kind, "something_else"),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }
}
