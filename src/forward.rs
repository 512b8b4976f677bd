//! Plain (non-CONNECT) forward path (spec §4.6).
//!
//! Grounded on `proxy/handler.go::serveHTTP` and the teacher's
//! `forward_to_upstream_with_capture`: buffer the request body so it can be
//! both forwarded and captured, strip hop-by-hop headers, round-trip through
//! the shared [`ForwardTransport`], and record a [`Capture`] either way —
//! successful exchanges get a full response snapshot, failures get the error
//! string instead (spec §7, "every outcome produces a capture").

use crate::body;
use crate::capture::{headers_get, headers_insert, headers_remove, headers_set, Capture, Headers, RequestSnapshot, ResponseSnapshot};
use crate::error::ProxyError;
use crate::handler::error_response;
use crate::server::ResponseBody;
use crate::state::ProxyState;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{HeaderMap, Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Instant;

/// Headers that are connection-scoped rather than message-scoped and must
/// never be forwarded verbatim (RFC 7230 §6.1, plus the proxy's own Host).
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailers",
    "host",
];

pub async fn forward(
    state: Arc<ProxyState>,
    req: Request<Incoming>,
) -> Result<Response<ResponseBody>, ProxyError> {
    let method = req.method().to_string();
    let (parts, body) = req.into_parts();
    let request_bytes = body
        .collect()
        .await
        .map_err(|e| ProxyError::Http(e.to_string()))?
        .to_bytes();

    let url = parts.uri.to_string();

    let mut upstream_req = Request::builder()
        .method(parts.method.clone())
        .uri(parts.uri.clone())
        .body(Full::new(request_bytes.clone()))
        .map_err(|e| ProxyError::Http(e.to_string()))?;
    *upstream_req.headers_mut() = filter_hop_by_hop(&parts.headers);

    let start = Instant::now();
    let capture_id = Capture::new_id();
    let timestamp = chrono::Utc::now();

    let (req_capture_headers, req_capture_body) =
        decompressed_snapshot(to_capture_headers(&parts.headers), &request_bytes);
    let request_snapshot = RequestSnapshot {
        method,
        url,
        headers: req_capture_headers,
        body: req_capture_body,
    };

    match state.transport.send(upstream_req).await {
        Ok(upstream_resp) => {
            let status = upstream_resp.status();
            let (resp_parts, resp_body) = upstream_resp.into_parts();
            let resp_bytes = resp_body
                .collect()
                .await
                .map_err(|e| ProxyError::Http(e.to_string()))?
                .to_bytes();
            let (resp_capture_headers, resp_capture_body) =
                decompressed_snapshot(to_capture_headers(&resp_parts.headers), &resp_bytes);

            let capture = Capture {
                id: capture_id,
                timestamp,
                protocol: Some(crate::capture::Protocol::H1),
                request: request_snapshot,
                response: Some(ResponseSnapshot {
                    status_code: status.as_u16(),
                    headers: resp_capture_headers,
                    body: resp_capture_body,
                }),
                duration: start.elapsed(),
                error: None,
            };
            state.store.add(capture);

            let mut builder = Response::builder().status(resp_parts.status);
            if let Some(headers) = builder.headers_mut() {
                *headers = resp_parts.headers;
            }
            let body = Full::new(resp_bytes)
                .map_err(|never: std::convert::Infallible| match never {})
                .boxed();
            builder.body(body).map_err(|e| ProxyError::Http(e.to_string()))
        }
        Err(e) => {
            let capture = Capture {
                id: capture_id,
                timestamp,
                protocol: Some(crate::capture::Protocol::H1),
                request: request_snapshot,
                response: None,
                duration: start.elapsed(),
                error: Some(e.to_string()),
            };
            state.store.add(capture);
            Ok(error_response(StatusCode::BAD_GATEWAY, &e.to_string()))
        }
    }
}

pub(crate) fn filter_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers.iter() {
        if HOP_BY_HOP.iter().any(|h| name.as_str().eq_ignore_ascii_case(h)) {
            continue;
        }
        out.append(name, value.clone());
    }
    out
}

pub(crate) fn to_capture_headers(headers: &HeaderMap) -> Headers {
    let mut out = Headers::new();
    for (name, value) in headers.iter() {
        headers_insert(&mut out, name.as_str(), value.to_str().unwrap_or("").to_string());
    }
    out
}

/// Decompress `bytes` for the capture record only. The returned headers only
/// drop `content-encoding`/rewrite `content-length` when decompression
/// actually changed the length — a corrupt or identity-encoded body comes
/// back unchanged from [`body::decompress`], and in that case the headers
/// must describe the bytes as captured, not as if decoding had succeeded.
/// The wire response handed back to the client is untouched either way.
pub(crate) fn decompressed_snapshot(mut headers: Headers, bytes: &Bytes) -> (Headers, crate::capture::BodyBytes) {
    let encoding = headers_get(&headers, "content-encoding").unwrap_or("").to_string();
    if encoding.is_empty() {
        return (headers, bytes.to_vec().into());
    }
    let decompressed = body::decompress(bytes, &encoding);
    if decompressed.len() == bytes.len() {
        return (headers, bytes.to_vec().into());
    }
    headers_remove(&mut headers, "content-encoding");
    headers_set(&mut headers, "content-length", decompressed.len().to_string());
    (headers, decompressed.into())
}
