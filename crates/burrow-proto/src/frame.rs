//! Tunnel frame payload types.
//!
//! Three payload shapes travel over the tunnel:
//!
//! ```text
//! Registration : {"type":"register","client_id":"<uuid>","timestamp":<float>}
//! Request      : {"id":"<uuid>","timestamp":<float>,"data":"<base64>","client_addr":[..]}
//! Response     : {"request_id":"<uuid>","data":"<base64>"}
//! ```
//!
//! `data` carries the verbatim HTTP/1.1 wire bytes of a request or
//! response. Bodies are bytes, not text; the field is base64-encoded so
//! binary payloads survive the JSON payload intact.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Peer address of the public HTTP connection, as `[host, port]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAddr(pub String, pub u16);

/// Marker for the `"type":"register"` discriminator field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegisterTag {
    #[serde(rename = "register")]
    Register,
}

/// First frame a tunnel client sends; binds a self-chosen id to the
/// connection on the relay. Re-registration under the same id replaces
/// the prior record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterFrame {
    #[serde(rename = "type")]
    pub tag: RegisterTag,
    pub client_id: Uuid,
    pub timestamp: f64,
}

/// Relay -> client: one public HTTP request, wrapped verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: Uuid,
    pub timestamp: f64,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_addr: Option<ClientAddr>,
}

/// Client -> relay: the local service's response, keyed by the original
/// request id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub request_id: Uuid,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// One tunnel frame payload. Untagged: the variants are disambiguated by
/// their required fields (`type`, `id`, `request_id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Register(RegisterFrame),
    Response(ResponseFrame),
    Request(RequestFrame),
}

impl Frame {
    /// Build a registration frame stamped with the current time.
    pub fn register(client_id: Uuid) -> Self {
        Self::Register(RegisterFrame {
            tag: RegisterTag::Register,
            client_id,
            timestamp: unix_timestamp(),
        })
    }

    /// Wrap raw HTTP request bytes in a freshly-minted request frame.
    pub fn request(data: Vec<u8>, client_addr: Option<ClientAddr>) -> Self {
        Self::Request(RequestFrame {
            id: Uuid::new_v4(),
            timestamp: unix_timestamp(),
            data,
            client_addr,
        })
    }

    /// Wrap raw HTTP response bytes in a response frame for `request_id`.
    pub fn response(request_id: Uuid, data: Vec<u8>) -> Self {
        Self::Response(ResponseFrame { request_id, data })
    }
}

/// Seconds since the Unix epoch as a float, matching the wire format.
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Base64 (standard alphabet) codec for byte fields inside JSON payloads.
mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_frame_wire_shape() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(Frame::register(id)).unwrap();

        assert_eq!(json["type"], "register");
        assert_eq!(json["client_id"], id.to_string());
        assert!(json["timestamp"].is_f64());
    }

    #[test]
    fn request_frame_wire_shape() {
        let frame = Frame::request(
            b"GET / HTTP/1.1\r\n\r\n".to_vec(),
            Some(ClientAddr("203.0.113.7".into(), 49152)),
        );
        let json = serde_json::to_value(&frame).unwrap();

        assert!(json["id"].is_string());
        assert!(json["timestamp"].is_f64());
        assert!(json["data"].is_string());
        assert_eq!(json["client_addr"][0], "203.0.113.7");
        assert_eq!(json["client_addr"][1], 49152);
    }

    #[test]
    fn response_frame_wire_shape() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(Frame::response(id, b"HTTP/1.1 200 OK\r\n\r\n".to_vec()))
            .unwrap();

        assert_eq!(json["request_id"], id.to_string());
        assert!(json["data"].is_string());
        assert!(json.get("id").is_none());
    }

    #[test]
    fn untagged_round_trip_picks_correct_variant() {
        let frames = vec![
            Frame::register(Uuid::new_v4()),
            Frame::request(vec![0x00, 0xFF, 0x80], None),
            Frame::response(Uuid::new_v4(), vec![0xDE, 0xAD]),
        ];

        for frame in frames {
            let json = serde_json::to_string(&frame).unwrap();
            let back: Frame = serde_json::from_str(&json).unwrap();
            match (&frame, &back) {
                (Frame::Register(a), Frame::Register(b)) => {
                    assert_eq!(a.client_id, b.client_id);
                }
                (Frame::Request(a), Frame::Request(b)) => {
                    assert_eq!(a.id, b.id);
                    assert_eq!(a.data, b.data);
                }
                (Frame::Response(a), Frame::Response(b)) => {
                    assert_eq!(a.request_id, b.request_id);
                    assert_eq!(a.data, b.data);
                }
                (sent, got) => panic!("variant changed in transit: {sent:?} -> {got:?}"),
            }
        }
    }

    #[test]
    fn binary_data_survives_json() {
        let body: Vec<u8> = (0..=255).collect();
        let frame = Frame::response(Uuid::new_v4(), body.clone());

        let json = serde_json::to_string(&frame).unwrap();
        let Frame::Response(back) = serde_json::from_str::<Frame>(&json).unwrap() else {
            panic!("expected response frame");
        };
        assert_eq!(back.data, body);
    }

    #[test]
    fn register_requires_exact_type_value() {
        let json = r#"{"type":"deregister","client_id":"6ec0bd7f-11c0-43da-975e-2a8ad9ebae0b","timestamp":1.0}"#;
        assert!(serde_json::from_str::<Frame>(json).is_err());
    }
}
