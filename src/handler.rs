//! Top-level request dispatch (spec §4.5).
//!
//! Grounded on `proxy/handler.go::ServeHTTP`: recovers from panics in the
//! handling future and turns them into a `500` rather than tearing down the
//! connection, logs the request, then dispatches `CONNECT` to the tunnel/MITM
//! path and everything else to the plain forward path.

use crate::error::ProxyError;
use crate::server::ResponseBody;
use crate::state::ProxyState;
use bytes::Bytes;
use futures_util::FutureExt;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub async fn serve(
    state: Arc<ProxyState>,
    peer: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<ResponseBody>, Infallible> {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let started = Instant::now();

    let outcome = AssertUnwindSafe(dispatch(state, peer, req)).catch_unwind().await;

    let response = match outcome {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => {
            warn!(%peer, %method, %uri, error = %e, "request failed");
            error_response(StatusCode::BAD_GATEWAY, &e.to_string())
        }
        Err(_panic) => {
            error!(%peer, %method, %uri, "handler panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    };

    info!(
        %peer,
        %method,
        %uri,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request complete"
    );
    Ok(response)
}

async fn dispatch(
    state: Arc<ProxyState>,
    peer: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<ResponseBody>, ProxyError> {
    if req.method() == Method::CONNECT {
        crate::connect::handle_connect(state, peer, req).await
    } else {
        crate::forward::forward(state, req).await
    }
}

pub fn error_response(status: StatusCode, message: &str) -> Response<ResponseBody> {
    let body = Full::new(Bytes::from(message.to_string()))
        .map_err(|never: std::convert::Infallible| match never {})
        .boxed();
    Response::builder()
        .status(status)
        .header("content-type", "text/plain; charset=utf-8")
        .body(body)
        .expect("static response is well-formed")
}
