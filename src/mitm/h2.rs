//! MITM subpath for clients that negotiate `h2` (spec §4.8.2).
//!
//! Grounded on `proxy/mitm_h2.go`: each request dials its own fresh origin
//! connection rather than reusing the one opened at CONNECT time. That's a
//! simplification in the original this crate keeps rather than "fixes" — see
//! design notes for why.

use crate::capture::{Capture, Protocol, RequestSnapshot, ResponseSnapshot};
use crate::connect::dial_origin_tls_alpn;
use crate::error::ProxyError;
use crate::forward::{decompressed_snapshot, filter_hop_by_hop, to_capture_headers};
use crate::state::ProxyState;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};

pub async fn serve<C>(hostname: &str, client_tls: C, state: Arc<ProxyState>) -> Result<(), ProxyError>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let hostname = hostname.to_string();
    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
        let hostname = hostname.clone();
        let state = state.clone();
        async move { handle_one(hostname, state, req).await }
    });

    hyper::server::conn::http2::Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(client_tls), service)
        .await
        .map_err(|e| ProxyError::Http(e.to_string()))
}

async fn handle_one(
    hostname: String,
    state: Arc<ProxyState>,
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let method = req.method().to_string();
    let path = req.uri().path_and_query().map(|p| p.as_str().to_string()).unwrap_or_else(|| "/".to_string());
    let url = format!("https://{hostname}{path}");

    let (parts, body) = req.into_parts();
    let request_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };

    let start = Instant::now();
    let capture_id = Capture::new_id();
    let timestamp = chrono::Utc::now();
    let (req_headers, req_body) = decompressed_snapshot(to_capture_headers(&parts.headers), &request_bytes);
    let request_snapshot = RequestSnapshot { method, url: url.clone(), headers: req_headers, body: req_body };

    match send_to_origin(&hostname, parts.method.clone(), &url, &parts.headers, request_bytes).await {
        Ok((status, resp_headers_raw, resp_bytes)) => {
            let (resp_headers, resp_body_capture) =
                decompressed_snapshot(to_capture_headers(&resp_headers_raw), &resp_bytes);

            state.store.add(Capture {
                id: capture_id,
                timestamp,
                protocol: Some(Protocol::H2),
                request: request_snapshot,
                response: Some(ResponseSnapshot {
                    status_code: status.as_u16(),
                    headers: resp_headers,
                    body: resp_body_capture,
                }),
                duration: start.elapsed(),
                error: None,
            });

            let mut builder = Response::builder().status(status);
            if let Some(headers) = builder.headers_mut() {
                *headers = resp_headers_raw;
            }
            Ok(builder.body(Full::new(resp_bytes)).expect("well-formed response"))
        }
        Err(e) => {
            state.store.add(Capture {
                id: capture_id,
                timestamp,
                protocol: Some(Protocol::H2),
                request: request_snapshot,
                response: None,
                duration: start.elapsed(),
                error: Some(e.to_string()),
            });
            Ok(Response::builder()
                .status(hyper::StatusCode::BAD_GATEWAY)
                .body(Full::new(Bytes::from(e.to_string())))
                .expect("well-formed response"))
        }
    }
}

async fn send_to_origin(
    hostname: &str,
    method: hyper::Method,
    url: &str,
    headers: &hyper::HeaderMap,
    body: Bytes,
) -> Result<(hyper::StatusCode, hyper::HeaderMap, Bytes), ProxyError> {
    let origin_tls = dial_origin_tls_alpn(hostname, b"h2").await?;
    let (mut sender, conn) = hyper::client::conn::http2::handshake(TokioExecutor::new(), TokioIo::new(origin_tls))
        .await
        .map_err(|e| ProxyError::Http(e.to_string()))?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!(error = %e, "origin h2 connection closed");
        }
    });

    let mut upstream_req = Request::builder()
        .method(method)
        .uri(url)
        .body(Full::new(body))
        .map_err(|e| ProxyError::Http(e.to_string()))?;
    *upstream_req.headers_mut() = filter_hop_by_hop(headers);

    let resp = sender
        .send_request(upstream_req)
        .await
        .map_err(|e| ProxyError::Http(e.to_string()))?;
    let status = resp.status();
    let (parts, resp_body) = resp.into_parts();
    let bytes = resp_body
        .collect()
        .await
        .map_err(|e| ProxyError::Http(e.to_string()))?
        .to_bytes();
    Ok((status, parts.headers, bytes))
}
