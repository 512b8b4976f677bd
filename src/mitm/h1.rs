//! MITM subpath for clients that negotiate `http/1.1` (spec §4.8.1).
//!
//! Grounded on `proxy/handler.go::mitmHTTP1`: requests on one client
//! connection are served strictly in order against the single origin
//! connection opened at CONNECT time — the next request is never sent until
//! the previous response has been captured, preserving the ordering
//! guarantee the original relies on (spec §8, "captures on one MITM/1.1
//! connection appear in request order").

use crate::capture::{Capture, Protocol, RequestSnapshot, ResponseSnapshot};
use crate::error::ProxyError;
use crate::forward::{decompressed_snapshot, filter_hop_by_hop, to_capture_headers};
use crate::state::ProxyState;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioIo, TokioTimer};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex as AsyncMutex;

pub async fn serve<C, O>(hostname: &str, client_tls: C, origin_tls: O, state: Arc<ProxyState>) -> Result<(), ProxyError>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    O: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (origin_sender, origin_conn) = hyper::client::conn::http1::handshake(TokioIo::new(origin_tls))
        .await
        .map_err(|e| ProxyError::Http(e.to_string()))?;
    tokio::spawn(async move {
        if let Err(e) = origin_conn.await {
            tracing::debug!(error = %e, "origin connection closed");
        }
    });
    let origin_sender = Arc::new(AsyncMutex::new(origin_sender));

    let hostname = hostname.to_string();
    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
        let origin_sender = origin_sender.clone();
        let hostname = hostname.clone();
        let state = state.clone();
        async move { handle_one(hostname, origin_sender, state, req).await }
    });

    hyper::server::conn::http1::Builder::new()
        .timer(TokioTimer::new())
        .serve_connection(TokioIo::new(client_tls), service)
        .await
        .map_err(|e| ProxyError::Http(e.to_string()))
}

async fn handle_one(
    hostname: String,
    origin_sender: Arc<AsyncMutex<hyper::client::conn::http1::SendRequest<Full<Bytes>>>>,
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

    let mut upstream_req = Request::builder()
        .method(parts.method.clone())
        .uri(&url)
        .body(Full::new(request_bytes.clone()))
        .expect("well-formed upstream request");
    *upstream_req.headers_mut() = filter_hop_by_hop(&parts.headers);

    let start = Instant::now();
    let capture_id = Capture::new_id();
    let timestamp = chrono::Utc::now();
    let (req_headers, req_body) = decompressed_snapshot(to_capture_headers(&parts.headers), &request_bytes);
    let request_snapshot = RequestSnapshot { method, url, headers: req_headers, body: req_body };

    let mut sender = origin_sender.lock().await;
    let result = sender.send_request(upstream_req).await;
    drop(sender);

    match result {
        Ok(upstream_resp) => {
            let status = upstream_resp.status();
            let (resp_parts, resp_body) = upstream_resp.into_parts();
            let resp_bytes = resp_body.collect().await.map(|c| c.to_bytes()).unwrap_or_default();
            let (resp_headers, resp_body_capture) =
                decompressed_snapshot(to_capture_headers(&resp_parts.headers), &resp_bytes);

            state.store.add(Capture {
                id: capture_id,
                timestamp,
                protocol: Some(Protocol::H1),
                request: request_snapshot,
                response: Some(ResponseSnapshot {
                    status_code: status.as_u16(),
                    headers: resp_headers,
                    body: resp_body_capture,
                }),
                duration: start.elapsed(),
                error: None,
            });

            let mut builder = Response::builder().status(resp_parts.status);
            if let Some(headers) = builder.headers_mut() {
                *headers = resp_parts.headers;
            }
            Ok(builder.body(Full::new(resp_bytes)).expect("well-formed response"))
        }
        Err(e) => {
            state.store.add(Capture {
                id: capture_id,
                timestamp,
                protocol: Some(Protocol::H1),
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
