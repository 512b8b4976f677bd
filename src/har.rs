//! HAR 1.2 export (spec §6.2).
//!
//! Grounded on `cmd/export.go::buildHAR`: one `entries[]` item per capture,
//! `startedDateTime` as RFC3339, `time` in milliseconds, headers flattened
//! from the multi-value map into HAR's `{name, value}` pairs (repeated
//! per value).

use crate::capture::{Capture, Headers};
use serde::Serialize;

#[derive(Serialize)]
pub struct Har {
    pub log: HarLog,
}

#[derive(Serialize)]
pub struct HarLog {
    pub version: &'static str,
    pub creator: HarCreator,
    pub entries: Vec<HarEntry>,
}

#[derive(Serialize)]
pub struct HarCreator {
    pub name: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct HarEntry {
    #[serde(rename = "startedDateTime")]
    pub started_date_time: String,
    pub time: f64,
    pub request: HarRequest,
    pub response: HarResponse,
    pub cache: serde_json::Value,
    pub timings: HarTimings,
}

#[derive(Serialize)]
pub struct HarRequest {
    pub method: String,
    pub url: String,
    #[serde(rename = "httpVersion")]
    pub http_version: &'static str,
    pub headers: Vec<HarHeader>,
    #[serde(rename = "queryString")]
    pub query_string: Vec<HarHeader>,
    #[serde(rename = "headersSize")]
    pub headers_size: i64,
    #[serde(rename = "bodySize")]
    pub body_size: i64,
}

#[derive(Serialize)]
pub struct HarResponse {
    pub status: u16,
    #[serde(rename = "statusText")]
    pub status_text: String,
    #[serde(rename = "httpVersion")]
    pub http_version: &'static str,
    pub headers: Vec<HarHeader>,
    pub content: HarContent,
    #[serde(rename = "redirectURL")]
    pub redirect_url: String,
    #[serde(rename = "headersSize")]
    pub headers_size: i64,
    #[serde(rename = "bodySize")]
    pub body_size: i64,
}

#[derive(Serialize)]
pub struct HarContent {
    pub size: i64,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

#[derive(Serialize)]
pub struct HarHeader {
    pub name: String,
    pub value: String,
}

#[derive(Serialize)]
pub struct HarTimings {
    pub send: f64,
    pub wait: f64,
    pub receive: f64,
}

pub fn build_har(captures: &[Capture]) -> Har {
    let entries = captures.iter().map(entry_for).collect();
    Har {
        log: HarLog {
            version: "1.2",
            creator: HarCreator { name: "snare", version: "1.0" },
            entries,
        },
    }
}

fn entry_for(capture: &Capture) -> HarEntry {
    let time_ms = capture.duration.as_secs_f64() * 1000.0;
    let request_body_size = capture.request.body.len() as i64;
    let response_body_size = capture.response.as_ref().map(|r| r.body.len() as i64).unwrap_or(-1);
    let status = capture.response.as_ref().map(|r| r.status_code).unwrap_or(0);
    let content_type = capture
        .response
        .as_ref()
        .and_then(|r| crate::capture::headers_get(&r.headers, "content-type"))
        .unwrap_or("")
        .to_string();

    HarEntry {
        started_date_time: capture.timestamp.to_rfc3339(),
        time: time_ms,
        request: HarRequest {
            method: capture.request.method.clone(),
            url: capture.request.url.clone(),
            http_version: "HTTP/1.1",
            headers: flatten_headers(&capture.request.headers),
            query_string: Vec::new(),
            headers_size: -1,
            body_size: request_body_size,
        },
        response: HarResponse {
            status,
            status_text: String::new(),
            http_version: "HTTP/1.1",
            headers: capture
                .response
                .as_ref()
                .map(|r| flatten_headers(&r.headers))
                .unwrap_or_default(),
            content: HarContent { size: response_body_size.max(0), mime_type: content_type },
            redirect_url: String::new(),
            headers_size: -1,
            body_size: response_body_size,
        },
        cache: serde_json::json!({}),
        timings: HarTimings { send: 0.0, wait: time_ms, receive: 0.0 },
    }
}

fn flatten_headers(headers: &Headers) -> Vec<HarHeader> {
    let mut out: Vec<HarHeader> = headers
        .iter()
        .flat_map(|(name, values)| {
            values
                .iter()
                .map(move |v| HarHeader { name: name.clone(), value: v.clone() })
        })
        .collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{BodyBytes, Protocol, RequestSnapshot, ResponseSnapshot};

    #[test]
    fn builds_one_entry_per_capture() {
        let mut headers = Headers::new();
        crate::capture::headers_insert(&mut headers, "Content-Type", "application/json");
        let capture = Capture {
            id: "abc".into(),
            timestamp: chrono::Utc::now(),
            protocol: Some(Protocol::H1),
            request: RequestSnapshot {
                method: "GET".into(),
                url: "https://example.test/".into(),
                headers: Headers::new(),
                body: BodyBytes::default(),
            },
            response: Some(ResponseSnapshot {
                status_code: 200,
                headers,
                body: BodyBytes(b"{}".to_vec()),
            }),
            duration: std::time::Duration::from_millis(42),
            error: None,
        };

        let har = build_har(&[capture]);
        assert_eq!(har.log.entries.len(), 1);
        assert_eq!(har.log.entries[0].response.status, 200);
        assert_eq!(har.log.entries[0].response.content.mime_type, "application/json");
        assert!((har.log.entries[0].time - 42.0).abs() < 0.01);
    }
}
