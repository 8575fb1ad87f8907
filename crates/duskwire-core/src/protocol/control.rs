//! Control-channel payloads.
//!
//! Channel 0 carries compact JSON objects with a required `"type"`
//! discriminator. Unknown types are logged and ignored so newer peers can
//! extend the protocol; malformed JSON closes the session.

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Encode binary data for embedding in a control payload.
pub fn to_b64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode a base64 field from a control payload.
pub fn from_b64(text: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(text)
        .map_err(|e| Error::Malformed(format!("bad base64 field: {}", e)))
}

/// Acknowledgment status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckStatus {
    /// The subject was accepted or completed.
    Ok,
    /// The subject was declined by the peer.
    Rejected,
    /// The peer aborted an in-progress operation.
    Abort,
    /// The operation failed on the peer's side.
    Failed,
}

/// Text encodings a chat message may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageEncoding {
    /// 7-bit ASCII.
    #[serde(rename = "us-ascii")]
    UsAscii,
    /// UTF-8.
    #[serde(rename = "utf-8")]
    Utf8,
}

impl MessageEncoding {
    /// The wire name, as used in signatures and JSON.
    pub fn name(&self) -> &'static str {
        match self {
            MessageEncoding::UsAscii => "us-ascii",
            MessageEncoding::Utf8 => "utf-8",
        }
    }
}

/// A chat message as it appears on the wire. Binary fields are base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Random message id, base64.
    #[serde(rename = "message-id")]
    pub message_id: String,
    /// Composition time, unix seconds.
    pub date: u64,
    /// Message body in the declared encoding.
    pub content: String,
    /// Declared text encoding.
    pub encoding: MessageEncoding,
    /// Conversation hash, base64.
    pub conversation: String,
    /// Sender pubkey hash, base64.
    pub from: String,
    /// Ed25519 signature over the canonical message bytes, base64.
    pub signature: String,
}

/// A recognized control-channel request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Contact request, sent when the initiator's pubkey is unknown to the
    /// receiving identity.
    AddMe {
        /// Requester's self-chosen nickname.
        nick: String,
        /// Free-form introduction.
        message: String,
        /// Requester's onion address, so the recipient can dial back.
        address: String,
    },
    /// Generic acknowledgment referencing an earlier request.
    Ack {
        /// Subject of the ack, e.g. `"IncomingFile"` or `"Message"`.
        what: String,
        /// Outcome.
        status: AckStatus,
        /// Context: base64 file id or message id.
        data: String,
        /// File-transfer channel assignment, present only on accept acks.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<u32>,
    },
    /// A chat message.
    Message(WireMessage),
    /// A file offer.
    IncomingFile {
        /// Random file id, base64.
        #[serde(rename = "file-id")]
        file_id: String,
        /// Offered file name (no path components).
        name: String,
        /// File size in bytes.
        size: i64,
        /// SHA-256 of the file content, base64.
        hash: String,
        /// File modification time, unix seconds.
        #[serde(rename = "file-time")]
        file_time: i64,
    },
}

impl ControlMessage {
    /// Serialize to compact JSON for the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Malformed(e.to_string()))
    }

    /// Parse a control payload.
    ///
    /// Returns `Ok(None)` for syntactically valid JSON carrying an
    /// unrecognized `"type"` (the session stays open). Malformed JSON or a
    /// recognized type with bad fields is an error, which closes the session.
    pub fn parse(payload: &[u8]) -> Result<Option<Self>> {
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| Error::Malformed(format!("control payload is not JSON: {}", e)))?;

        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| Error::Malformed("control payload without type".into()))?
            .to_string();

        match kind.as_str() {
            "AddMe" | "Ack" | "Message" | "IncomingFile" => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| Error::Malformed(format!("bad {} payload: {}", kind, e))),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_roundtrip() {
        let ack = ControlMessage::Ack {
            what: "IncomingFile".into(),
            status: AckStatus::Rejected,
            data: to_b64(b"file-id"),
            channel: None,
        };

        let bytes = ack.to_bytes().expect("serialize");
        // The channel field is omitted entirely when absent.
        assert!(!String::from_utf8_lossy(&bytes).contains("channel"));

        let parsed = ControlMessage::parse(&bytes).expect("parse").expect("known");
        assert_eq!(parsed, ack);
    }

    #[test]
    fn accept_ack_carries_channel() {
        let ack = ControlMessage::Ack {
            what: "IncomingFile".into(),
            status: AckStatus::Ok,
            data: to_b64(b"file-id"),
            channel: Some(7),
        };

        let bytes = ack.to_bytes().expect("serialize");
        let parsed = ControlMessage::parse(&bytes).expect("parse").expect("known");
        match parsed {
            ControlMessage::Ack { channel, .. } => assert_eq!(channel, Some(7)),
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn message_wire_format() {
        let json = br#"{"type":"Message","message-id":"bWlkMQ==","date":1700000000,"content":"hello","encoding":"utf-8","conversation":"Y2lk","from":"YWtleQ==","signature":"c2ln"}"#;

        let parsed = ControlMessage::parse(json).expect("parse").expect("known");
        match parsed {
            ControlMessage::Message(msg) => {
                assert_eq!(msg.message_id, "bWlkMQ==");
                assert_eq!(msg.date, 1_700_000_000);
                assert_eq!(msg.content, "hello");
                assert_eq!(msg.encoding, MessageEncoding::Utf8);
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn incoming_file_roundtrip() {
        let offer = ControlMessage::IncomingFile {
            file_id: to_b64(&[1u8; 16]),
            name: "photo.jpg".into(),
            size: 1024,
            hash: to_b64(&[2u8; 32]),
            file_time: 1_700_000_000,
        };

        let bytes = offer.to_bytes().expect("serialize");
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("\"file-id\""));
        assert!(text.contains("\"file-time\""));

        let parsed = ControlMessage::parse(&bytes).expect("parse").expect("known");
        assert_eq!(parsed, offer);
    }

    #[test]
    fn unknown_type_is_ignored() {
        let json = br#"{"type":"Wave","at":"you"}"#;
        assert!(ControlMessage::parse(json).expect("parse").is_none());
    }

    #[test]
    fn non_json_is_malformed() {
        assert!(matches!(
            ControlMessage::parse(b"not json"),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn missing_type_is_malformed() {
        assert!(matches!(
            ControlMessage::parse(br#"{"nick":"carol"}"#),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn recognized_type_with_bad_fields_is_malformed() {
        let json = br#"{"type":"Ack","what":"Message"}"#;
        assert!(matches!(
            ControlMessage::parse(json),
            Err(Error::Malformed(_))
        ));
    }
}
