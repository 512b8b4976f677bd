//! `CONNECT` dispatch: plain tunnel or MITM (spec §4.7).
//!
//! Grounded on `proxy/handler.go::serveCONNECT`/`tunnelCONNECT`/`mitmCONNECT`.
//! Go hijacks the raw `net.Conn` out of its `http.Server`; hyper's answer to
//! the same need is `hyper::upgrade::on`, which hands back the same
//! underlying socket once we respond `200` — functionally the Rust idiom for
//! what the original does by hand.

use crate::error::ProxyError;
use crate::handler::error_response;
use crate::server::ResponseBody;
use crate::state::ProxyState;
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rustls::pki_types::{PrivateKeyDer, ServerName};
use rustls::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, warn};

const DIAL_TIMEOUT: Duration = Duration::from_secs(15);

pub async fn handle_connect(
    state: Arc<ProxyState>,
    peer: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<ResponseBody>, ProxyError> {
    let target = req
        .uri()
        .authority()
        .map(|a| a.to_string())
        .or_else(|| req.headers().get(hyper::header::HOST).and_then(|h| h.to_str().ok()).map(str::to_string))
        .ok_or_else(|| ProxyError::InvalidUrl("CONNECT request has no target authority".into()))?;

    let mitm_enabled = state.mitm_enabled();
    tokio::spawn(async move {
        let upgraded = match hyper::upgrade::on(req).await {
            Ok(u) => u,
            Err(e) => {
                warn!(%peer, %target, error = %e, "CONNECT upgrade failed");
                return;
            }
        };
        let client_io = TokioIo::new(upgraded);

        let result = if mitm_enabled {
            crate::mitm::serve(&target, client_io, state).await
        } else {
            tunnel(&target, client_io).await
        };
        if let Err(e) = result {
            debug!(%peer, %target, error = %e, "CONNECT session ended with error");
        }
    });

    Ok(Response::builder()
        .status(StatusCode::OK)
        .body(Empty::new().map_err(|never: std::convert::Infallible| match never {}).boxed())
        .expect("static response is well-formed"))
}

/// Plain bidirectional tunnel: dial the origin and splice bytes both ways
/// without inspecting them. No capture is produced — an opaque tunnel has
/// nothing to decode (spec §4.7 edge case).
async fn tunnel<C>(target: &str, mut client: C) -> Result<(), ProxyError>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let addr = ensure_port(target, 443);
    let mut origin = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&addr))
        .await
        .map_err(|_| ProxyError::UpstreamConnect { target: addr.clone(), reason: "connect timed out".into() })?
        .map_err(|e| ProxyError::UpstreamConnect { target: addr, reason: e.to_string() })?;

    tokio::io::copy_bidirectional(&mut client, &mut origin)
        .await
        .map_err(ProxyError::from)?;
    Ok(())
}

pub(crate) fn ensure_port(host: &str, default_port: u16) -> String {
    if host.rsplit(':').next().map(|p| p.parse::<u16>().is_ok()).unwrap_or(false)
        && host.matches(':').count() == 1
    {
        host.to_string()
    } else if host.starts_with('[') {
        // bracketed IPv6 literal, already has or lacks a port unambiguously
        if host.ends_with(']') {
            format!("{host}:{default_port}")
        } else {
            host.to_string()
        }
    } else {
        format!("{host}:{default_port}")
    }
}

pub(crate) fn hostname_only(target: &str) -> String {
    if let Some(rest) = target.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return rest[..end].to_string();
        }
    }
    match target.rfind(':') {
        Some(idx) if target[..idx].rfind(':').is_none() => target[..idx].to_string(),
        _ => target.to_string(),
    }
}

/// Dial `hostname:port` and perform a skip-verify TLS handshake advertising
/// only `http/1.1`, matching the origin-facing leg Go opens at CONNECT time
/// (`tls.Dial` with `NextProtos: []string{"http/1.1"}`).
pub(crate) async fn dial_origin_tls(
    target: &str,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, ProxyError> {
    dial_origin_tls_alpn(target, b"http/1.1").await
}

/// Same as [`dial_origin_tls`] but lets the caller pick the single ALPN
/// token offered — the MITM/2 subpath dials fresh per request with `h2`
/// (spec §4.8.2, §9 "fresh per-stream origin dial").
pub(crate) async fn dial_origin_tls_alpn(
    target: &str,
    alpn: &[u8],
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, ProxyError> {
    let addr = ensure_port(target, 443);
    let hostname = hostname_only(target);

    let tcp = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&addr))
        .await
        .map_err(|_| ProxyError::UpstreamConnect { target: addr.clone(), reason: "connect timed out".into() })?
        .map_err(|e| ProxyError::UpstreamConnect { target: addr, reason: e.to_string() })?;

    let mut tls_config = skip_verify_client_config();
    tls_config.alpn_protocols = vec![alpn.to_vec()];
    let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));
    let server_name = ServerName::try_from(hostname.clone())
        .map_err(|_| ProxyError::UpstreamTls { target: hostname.clone(), reason: "invalid server name".into() })?;

    tokio::time::timeout(DIAL_TIMEOUT, connector.connect(server_name, tcp))
        .await
        .map_err(|_| ProxyError::UpstreamTls { target: hostname.clone(), reason: "handshake timed out".into() })?
        .map_err(|e| ProxyError::UpstreamTls { target: hostname, reason: e.to_string() })
}

fn skip_verify_client_config() -> rustls::ClientConfig {
    crate::transport::skip_verify_client_config()
}

/// Build a per-host server config from PEM cert chain + key material
/// (spec §4.4), advertising both `h2` and `http/1.1` so the client picks.
pub(crate) fn build_server_config(
    cert_chain_pem: &str,
    key_pem: &str,
) -> Result<Arc<ServerConfig>, ProxyError> {
    let certs = rustls_pemfile::certs(&mut cert_chain_pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProxyError::Certificate(e.to_string()))?;
    let key = rustls_pemfile::pkcs8_private_keys(&mut key_pem.as_bytes())
        .next()
        .ok_or_else(|| ProxyError::Certificate("no private key found".into()))?
        .map_err(|e| ProxyError::Certificate(e.to_string()))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, PrivateKeyDer::Pkcs8(key))
        .map_err(|e| ProxyError::Certificate(e.to_string()))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_port_adds_default_when_missing() {
        assert_eq!(ensure_port("example.com", 443), "example.com:443");
        assert_eq!(ensure_port("example.com:8443", 443), "example.com:8443");
    }

    #[test]
    fn hostname_only_strips_port() {
        assert_eq!(hostname_only("example.com:443"), "example.com");
        assert_eq!(hostname_only("example.com"), "example.com");
        assert_eq!(hostname_only("[::1]:443"), "::1");
    }
}
