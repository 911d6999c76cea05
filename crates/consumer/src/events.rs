//! Protocol events exchanged with the host framework.
//!
//! Events serialize as tagged JSON objects whose `type` carries the dotted
//! protocol name (`{"type": "websocket.receive", "text": "hi"}`), matching
//! the wire shape the host framework speaks.

use serde::{Deserialize, Serialize};

/// Events the framework delivers to the consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UpstreamEvent {
    /// Client opened the connection; always the first event
    #[serde(rename = "websocket.connect")]
    Connect,

    /// Client frame; exactly one of `text` and `bytes` is set
    #[serde(rename = "websocket.receive")]
    Receive {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bytes: Option<Vec<u8>>,
    },

    /// Client went away
    #[serde(rename = "websocket.disconnect")]
    Disconnect { code: u16 },
}

impl UpstreamEvent {
    /// Text frame shorthand.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Receive {
            text: Some(text.into()),
            bytes: None,
        }
    }

    /// Binary frame shorthand.
    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Receive {
            text: None,
            bytes: Some(bytes.into()),
        }
    }

    /// The dotted protocol name of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Connect => "websocket.connect",
            Self::Receive { .. } => "websocket.receive",
            Self::Disconnect { .. } => "websocket.disconnect",
        }
    }
}

/// Events the consumer emits toward the framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DownstreamEvent {
    /// Complete the handshake
    #[serde(rename = "websocket.accept")]
    Accept {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subprotocol: Option<String>,
    },

    /// Server frame; exactly one of `text` and `bytes` is set
    #[serde(rename = "websocket.send")]
    Send {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bytes: Option<Vec<u8>>,
    },

    /// Close the connection
    #[serde(rename = "websocket.close")]
    Close {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<u16>,
    },
}

impl DownstreamEvent {
    /// The dotted protocol name of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Accept { .. } => "websocket.accept",
            Self::Send { .. } => "websocket.send",
            Self::Close { .. } => "websocket.close",
        }
    }
}

/// One client data frame, already shape-checked by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Text(_) => None,
            Self::Binary(bytes) => Some(bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_serialize_with_dotted_types() {
        let event = UpstreamEvent::text("hi");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "websocket.receive");
        assert_eq!(json["text"], "hi");
        assert!(json.get("bytes").is_none());
    }

    #[test]
    fn test_connect_round_trip() {
        let json = r#"{"type":"websocket.connect"}"#;
        let event: UpstreamEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, UpstreamEvent::Connect);
        assert_eq!(serde_json::to_string(&event).unwrap(), json);
    }

    #[test]
    fn test_downstream_close_code_is_optional() {
        let close = DownstreamEvent::Close { code: None };
        assert_eq!(
            serde_json::to_string(&close).unwrap(),
            r#"{"type":"websocket.close"}"#
        );

        let close: DownstreamEvent =
            serde_json::from_str(r#"{"type":"websocket.close","code":4001}"#).unwrap();
        assert_eq!(close, DownstreamEvent::Close { code: Some(4001) });
    }

    #[test]
    fn test_frame_accessors() {
        assert_eq!(Frame::Text("a".into()).as_text(), Some("a"));
        assert_eq!(Frame::Text("a".into()).as_bytes(), None);
        assert_eq!(Frame::Binary(vec![1]).as_bytes(), Some(&[1u8][..]));
    }
}
