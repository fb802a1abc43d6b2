//! Request and response envelopes carried inside frame payloads.
//!
//! Envelopes are self-describing JSON records dispatched on a `type` field:
//!
//! ```text
//! { "type":"request", "clientId":"...", "requestId":"...",
//!   "method":"GET", "url":"/path",
//!   "headers":{"Accept":["text/html"]}, "body":"<base64>" }
//!
//! { "type":"response", "clientId":"...", "requestId":"...",
//!   "statusCode":200, "headers":{...}, "body":"<base64>" }
//! ```
//!
//! Header values are multi-valued. A decoder accepts either a bare string
//! or an array of strings per name; an encoder always emits the normalized
//! array form. Bodies travel as base64 text; an absent or empty `body`
//! field means a zero-length body. Unknown fields are ignored.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{frame, Result};

/// Multi-valued header map with the wire's string-or-array flexibility.
///
/// Names are kept exactly as they appear on the wire; no case folding is
/// applied at this layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, Vec<String>>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value for a name, preserving any existing values.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.entry(name.into()).or_default().push(value.into());
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0.get(name).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, values) in &self.0 {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

/// Accepts `"value"` and `["v1", "v2"]` interchangeably on decode.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct HeadersVisitor;

        impl<'de> Visitor<'de> for HeadersVisitor {
            type Value = Headers;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a map of header name to string or array of strings")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut out = BTreeMap::new();
                while let Some((name, value)) = access.next_entry::<String, OneOrMany>()? {
                    let values = match value {
                        OneOrMany::One(v) => vec![v],
                        OneOrMany::Many(vs) => vs,
                    };
                    out.insert(name, values);
                }
                Ok(Headers(out))
            }
        }

        deserializer.deserialize_map(HeadersVisitor)
    }
}

/// Base64 transport encoding for envelope bodies.
mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &[u8],
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        if text.is_empty() {
            return Ok(Vec::new());
        }
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// A request travelling broker → agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub client_id: String,
    pub request_id: String,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, with = "body_base64")]
    pub body: Vec<u8>,
}

/// A response travelling agent → broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub client_id: String,
    pub request_id: String,
    pub status_code: u16,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, with = "body_base64")]
    pub body: Vec<u8>,
}

/// One structured message carried in a frame payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "request")]
    Request(RequestEnvelope),
    #[serde(rename = "response")]
    Response(ResponseEnvelope),
}

impl Envelope {
    /// Decode one frame payload into an envelope.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Encode this envelope and wrap it in a frame, ready for the wire.
    pub fn to_frame(&self) -> Result<Bytes> {
        let json = serde_json::to_vec(self)?;
        frame::encode(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FrameDecoder, ProtoError, DEFAULT_MAX_FRAME};

    fn roundtrip(envelope: &Envelope) -> Envelope {
        let json = serde_json::to_vec(envelope).expect("encode failed");
        let decoded = Envelope::from_payload(&json).expect("decode failed");
        assert_eq!(&decoded, envelope);
        decoded
    }

    #[test]
    fn roundtrip_request() {
        roundtrip(&Envelope::Request(RequestEnvelope {
            client_id: "agent-1".into(),
            request_id: "req-1".into(),
            method: "POST".into(),
            url: "/api/items?page=2".into(),
            headers: [("Content-Type", "application/json")].into_iter().collect(),
            body: br#"{"name":"widget"}"#.to_vec(),
        }));
    }

    #[test]
    fn roundtrip_response() {
        roundtrip(&Envelope::Response(ResponseEnvelope {
            client_id: "agent-1".into(),
            request_id: "req-1".into(),
            status_code: 404,
            headers: [("Content-Type", "text/plain")].into_iter().collect(),
            body: b"not here".to_vec(),
        }));
    }

    #[test]
    fn roundtrip_binary_body() {
        // Bodies are raw bytes, not text; base64 must carry them intact.
        roundtrip(&Envelope::Response(ResponseEnvelope {
            client_id: "c".into(),
            request_id: "r".into(),
            status_code: 200,
            headers: Headers::new(),
            body: vec![0x00, 0xFF, 0x80, 0x7F, 0xDE, 0xAD],
        }));
    }

    #[test]
    fn roundtrip_empty_body() {
        roundtrip(&Envelope::Request(RequestEnvelope {
            client_id: "c".into(),
            request_id: "r".into(),
            method: "GET".into(),
            url: "/".into(),
            headers: Headers::new(),
            body: Vec::new(),
        }));
    }

    #[test]
    fn roundtrip_megabyte_body() {
        let body: Vec<u8> = (0..1_048_576u32).map(|i| (i % 251) as u8).collect();
        roundtrip(&Envelope::Response(ResponseEnvelope {
            client_id: "c".into(),
            request_id: "r".into(),
            status_code: 200,
            headers: Headers::new(),
            body,
        }));
    }

    #[test]
    fn roundtrip_multivalue_headers() {
        let mut headers = Headers::new();
        headers.append("Set-Cookie", "a=1");
        headers.append("Set-Cookie", "b=2");
        headers.append("Vary", "Accept-Encoding");

        let envelope = Envelope::Response(ResponseEnvelope {
            client_id: "c".into(),
            request_id: "r".into(),
            status_code: 200,
            headers,
            body: Vec::new(),
        });
        let decoded = roundtrip(&envelope);

        let Envelope::Response(r) = decoded else {
            panic!("expected response");
        };
        assert_eq!(
            r.headers.get("Set-Cookie"),
            Some(&["a=1".to_string(), "b=2".to_string()][..])
        );
    }

    #[test]
    fn decode_accepts_bare_string_header_values() {
        let json = br#"{
            "type": "request",
            "clientId": "c",
            "requestId": "r",
            "method": "GET",
            "url": "/x",
            "headers": {"Accept": "text/html", "Cookie": ["a=1", "b=2"]},
            "body": ""
        }"#;

        let Envelope::Request(req) = Envelope::from_payload(json).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(req.headers.get("Accept"), Some(&["text/html".to_string()][..]));
        assert_eq!(
            req.headers.get("Cookie"),
            Some(&["a=1".to_string(), "b=2".to_string()][..])
        );
    }

    #[test]
    fn encode_normalizes_headers_to_arrays() {
        let envelope = Envelope::Response(ResponseEnvelope {
            client_id: "c".into(),
            request_id: "r".into(),
            status_code: 200,
            headers: [("Server", "origin/1.0")].into_iter().collect(),
            body: b"hi".to_vec(),
        });

        let json: serde_json::Value =
            serde_json::from_slice(&serde_json::to_vec(&envelope).unwrap()).unwrap();
        assert_eq!(json["type"], "response");
        assert_eq!(json["statusCode"], 200);
        assert_eq!(json["headers"]["Server"], serde_json::json!(["origin/1.0"]));
        // "hi" in base64.
        assert_eq!(json["body"], "aGk=");
    }

    #[test]
    fn decode_missing_body_means_empty() {
        let json = br#"{"type":"response","clientId":"c","requestId":"r","statusCode":204}"#;
        let Envelope::Response(r) = Envelope::from_payload(json).unwrap() else {
            panic!("expected response");
        };
        assert!(r.body.is_empty());
        assert!(r.headers.is_empty());
    }

    #[test]
    fn decode_ignores_unknown_fields() {
        let json = br#"{
            "type": "request",
            "clientId": "c",
            "requestId": "r",
            "method": "GET",
            "url": "/",
            "trace": "00-abc-01",
            "priority": 7
        }"#;
        assert!(Envelope::from_payload(json).is_ok());
    }

    #[test]
    fn decode_garbage_is_malformed() {
        let err = Envelope::from_payload(b"\x00\x01not json").unwrap_err();
        assert!(matches!(err, ProtoError::Envelope(_)));
    }

    #[test]
    fn decode_unknown_type_is_malformed() {
        let json = br#"{"type":"ping","clientId":"c","requestId":"r"}"#;
        assert!(Envelope::from_payload(json).is_err());
    }

    #[test]
    fn decode_invalid_base64_body_is_malformed() {
        let json = br#"{"type":"response","clientId":"c","requestId":"r","statusCode":200,"body":"%%%"}"#;
        assert!(Envelope::from_payload(json).is_err());
    }

    #[test]
    fn to_frame_roundtrips_through_decoder() {
        let envelope = Envelope::Request(RequestEnvelope {
            client_id: "c".into(),
            request_id: "r".into(),
            method: "PUT".into(),
            url: "https://origin:9090/items/7".into(),
            headers: [("If-Match", "\"v3\"")].into_iter().collect(),
            body: b"payload".to_vec(),
        });

        let framed = envelope.to_frame().unwrap();
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME);
        let payloads = decoder.push(&framed).unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(Envelope::from_payload(&payloads[0]).unwrap(), envelope);
    }
}
