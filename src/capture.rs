//! Canonical capture record (spec §3, §4.9).
//!
//! Mirrors the teacher's `CapturedExchange`/`CapturedBody` split
//! (`cursor-proxy/src/capture.rs`) but follows the wire contract from the
//! original Go `capture.Capture`/`capture.BodyBytes` exactly: a capture is
//! either terminal-with-response or terminal-with-error, and the body is a
//! single JSON string rather than a `{data, is_base64}` pair.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// An ordered multimap of header name to values, preserving case and
/// duplicate names (spec §3 RequestSnapshot/ResponseSnapshot).
pub type Headers = HashMap<String, Vec<String>>;

pub fn headers_insert(headers: &mut Headers, name: &str, value: impl Into<String>) {
    headers.entry(name.to_string()).or_default().push(value.into());
}

pub fn headers_set(headers: &mut Headers, name: &str, value: impl Into<String>) {
    headers.insert(name.to_string(), vec![value.into()]);
}

pub fn headers_remove(headers: &mut Headers, name: &str) {
    headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
}

pub fn headers_get(headers: &Headers, name: &str) -> Option<&str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .and_then(|(_, v)| v.first())
        .map(String::as_str)
}

/// Body octet sequence (spec §3). Serializes as a JSON string: raw text when
/// the bytes are valid UTF-8, base64 otherwise. Decoding prefers the base64
/// interpretation only when it actually shrinks the payload, so a plain text
/// capture that happens to also be valid base64 never gets misread as binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyBytes(pub Vec<u8>);

impl BodyBytes {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<u8>> for BodyBytes {
    fn from(v: Vec<u8>) -> Self {
        BodyBytes(v)
    }
}

impl Serialize for BodyBytes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if self.0.is_empty() {
            return serializer.serialize_str("");
        }
        match std::str::from_utf8(&self.0) {
            Ok(text) => serializer.serialize_str(text),
            Err(_) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&self.0);
                serializer.serialize_str(&encoded)
            }
        }
    }
}

impl<'de> Deserialize<'de> for BodyBytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(&s) {
            if decoded.len() < s.len() {
                return Ok(BodyBytes(decoded));
            }
        }
        Ok(BodyBytes(s.into_bytes()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub method: String,
    pub url: String,
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "BodyBytes::is_empty")]
    pub body: BodyBytes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status_code: u16,
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "BodyBytes::is_empty")]
    pub body: BodyBytes,
}

/// Protocol tag for a captured exchange (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    H1,
    H2,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::H1 => write!(f, "h1"),
            Protocol::H2 => write!(f, "h2"),
        }
    }
}

fn duration_as_nanos<S>(d: &Duration, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let nanos = d.as_nanos();
    if nanos == 0 {
        return s.serialize_none();
    }
    s.serialize_some(&(nanos as u64))
}

fn nanos_as_duration<'de, D>(d: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let nanos: Option<u64> = Option::deserialize(d)?;
    Ok(Duration::from_nanos(nanos.unwrap_or(0)))
}

/// One exchange (spec §3). Invariant: exactly one of `response`/`error` is
/// populated once the capture is handed to the store; in-flight captures are
/// never constructed until that point (builders below enforce this).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capture {
    pub id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    pub request: RequestSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSnapshot>,
    #[serde(
        default,
        rename = "duration_ns",
        serialize_with = "duration_as_nanos",
        deserialize_with = "nanos_as_duration",
        skip_serializing_if = "is_zero_duration"
    )]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn is_zero_duration(d: &Duration) -> bool {
    d.is_zero()
}

impl Capture {
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_round_trips_utf8() {
        let body = BodyBytes(b"hello world".to_vec());
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, "\"hello world\"");
        let back: BodyBytes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, body);
    }

    #[test]
    fn body_round_trips_binary() {
        let body = BodyBytes(vec![0, 159, 146, 150, 255, 1, 2, 3]);
        let json = serde_json::to_string(&body).unwrap();
        let back: BodyBytes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, body);
    }

    #[test]
    fn empty_body_round_trips() {
        let body = BodyBytes::default();
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, "\"\"");
        let back: BodyBytes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, body);
    }

    #[test]
    fn capture_omits_absent_fields() {
        let c = Capture {
            id: "abc".into(),
            timestamp: chrono::Utc::now(),
            protocol: None,
            request: RequestSnapshot {
                method: "GET".into(),
                url: "http://example.test/".into(),
                headers: Headers::new(),
                body: BodyBytes::default(),
            },
            response: None,
            duration: Duration::ZERO,
            error: Some("boom".into()),
        };
        let json = serde_json::to_value(&c).unwrap();
        assert!(json.get("protocol").is_none());
        assert!(json.get("response").is_none());
        assert!(json.get("duration_ns").is_none());
        assert_eq!(json.get("error").unwrap(), "boom");
    }
}
