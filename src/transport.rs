//! Reusable forward transport for the plain-HTTP proxy path (spec §4.6 step 5).
//!
//! Grounded on `proxy/transport.go::ProxyTransport` for the pooling knobs and
//! on the teacher's `pool.rs::Http2Pool` for the pooled-connection shape —
//! generalized from HTTP/2-only (gRPC-specific) to plain HTTP/1.1, which is
//! what the forward-HTTP path actually proxies. TLS verification is skipped
//! for upstream connections, matching `ProxyTransport(true)`'s
//! `InsecureSkipVerify`.
//!
//! `HTTP_PROXY`/`HTTPS_PROXY` are honored for plain `http://` targets by
//! dialing the configured proxy instead of the origin and forwarding the
//! absolute-form request unchanged — the same shape Go's
//! `http.ProxyFromEnvironment` produces for non-TLS targets. CONNECT-based
//! tunneling through an upstream proxy for `https://` targets is not
//! implemented; see design notes.

use crate::error::{ProxyError, ProxyResult};
use bytes::Bytes;
use dashmap::DashMap;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, Uri};
use hyper_util::rt::TokioIo;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;

const MAX_IDLE_AGE: Duration = Duration::from_secs(90);
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct NoCertVerification;

impl ServerCertVerifier for NoCertVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA1,
            SignatureScheme::ECDSA_SHA1_Legacy,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

pub(crate) fn skip_verify_client_config() -> ClientConfig {
    ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoCertVerification))
        .with_no_client_auth()
}

fn skip_verify_tls_config() -> Arc<ClientConfig> {
    Arc::new(skip_verify_client_config())
}

struct PooledConnection {
    sender: hyper::client::conn::http1::SendRequest<Full<Bytes>>,
    created_at: Instant,
}

impl PooledConnection {
    fn is_healthy(&self) -> bool {
        self.created_at.elapsed() < MAX_IDLE_AGE && !self.sender.is_closed()
    }
}

/// Pools one connection per `scheme://host:port` origin, mirroring
/// `Http2Pool`'s per-key `Mutex<Option<PooledConnection>>` shape.
pub struct ForwardTransport {
    connections: DashMap<String, Arc<AsyncMutex<Option<PooledConnection>>>>,
    tls_config: Arc<ClientConfig>,
}

impl ForwardTransport {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            tls_config: skip_verify_tls_config(),
        }
    }

    pub async fn send(&self, req: Request<Full<Bytes>>) -> ProxyResult<Response<Incoming>> {
        let uri = req.uri().clone();
        let key = origin_key(&uri)?;
        let slot = self
            .connections
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone();

        let mut guard = slot.lock().await;
        if !matches!(&*guard, Some(c) if c.is_healthy()) {
            *guard = Some(self.connect(&uri).await?);
        }
        let sender = &mut guard.as_mut().expect("just populated").sender;
        sender
            .send_request(req)
            .await
            .map_err(|e| ProxyError::Http(e.to_string()))
    }

    async fn connect(&self, uri: &Uri) -> ProxyResult<PooledConnection> {
        let scheme = uri.scheme_str().unwrap_or("http");
        let host = uri.host().ok_or_else(|| ProxyError::InvalidUrl(uri.to_string()))?;
        let port = uri.port_u16().unwrap_or(if scheme == "https" { 443 } else { 80 });

        let sender = if scheme == "https" {
            let tcp = dial(host, port).await?;
            let tls = self.tls_handshake(tcp, host).await?;
            handshake_http1(tls, host).await?
        } else if let Some((proxy_host, proxy_port)) = http_proxy_from_env() {
            let tcp = dial(&proxy_host, proxy_port).await?;
            handshake_http1(tcp, host).await?
        } else {
            let tcp = dial(host, port).await?;
            handshake_http1(tcp, host).await?
        };

        Ok(PooledConnection {
            sender,
            created_at: Instant::now(),
        })
    }

    async fn tls_handshake(
        &self,
        tcp: TcpStream,
        host: &str,
    ) -> ProxyResult<tokio_rustls::client::TlsStream<TcpStream>> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| ProxyError::UpstreamTls { target: host.to_string(), reason: "invalid server name".into() })?;
        let connector = tokio_rustls::TlsConnector::from(self.tls_config.clone());
        tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, connector.connect(server_name, tcp))
            .await
            .map_err(|_| ProxyError::UpstreamTls { target: host.to_string(), reason: "handshake timed out".into() })?
            .map_err(|e| ProxyError::UpstreamTls { target: host.to_string(), reason: e.to_string() })
    }
}

impl Default for ForwardTransport {
    fn default() -> Self {
        Self::new()
    }
}

async fn dial(host: &str, port: u16) -> ProxyResult<TcpStream> {
    let addr = format!("{host}:{port}");
    tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
        .await
        .map_err(|_| ProxyError::UpstreamConnect { target: addr.clone(), reason: "connect timed out".into() })?
        .map_err(|e| ProxyError::UpstreamConnect { target: addr, reason: e.to_string() })
}

async fn handshake_http1<S>(
    io: S,
    host: &str,
) -> ProxyResult<hyper::client::conn::http1::SendRequest<Full<Bytes>>>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .map_err(|e| ProxyError::Http(e.to_string()))?;
    let host = host.to_string();
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!(%host, error = %e, "upstream connection closed");
        }
    });
    Ok(sender)
}

fn origin_key(uri: &Uri) -> ProxyResult<String> {
    let scheme = uri.scheme_str().unwrap_or("http");
    let host = uri.host().ok_or_else(|| ProxyError::InvalidUrl(uri.to_string()))?;
    let port = uri.port_u16().unwrap_or(if scheme == "https" { 443 } else { 80 });
    Ok(format!("{scheme}://{host}:{port}"))
}

fn http_proxy_from_env() -> Option<(String, u16)> {
    let raw = std::env::var("HTTP_PROXY")
        .or_else(|_| std::env::var("http_proxy"))
        .ok()?;
    let uri: Uri = raw.parse().ok()?;
    let host = uri.host()?.to_string();
    let port = uri.port_u16().unwrap_or(80);
    Some((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_key_defaults_ports_by_scheme() {
        let http: Uri = "http://example.test/path".parse().unwrap();
        let https: Uri = "https://example.test/path".parse().unwrap();
        assert_eq!(origin_key(&http).unwrap(), "http://example.test:80");
        assert_eq!(origin_key(&https).unwrap(), "https://example.test:443");
    }

    #[test]
    fn origin_key_respects_explicit_port() {
        let uri: Uri = "http://example.test:8080/path".parse().unwrap();
        assert_eq!(origin_key(&uri).unwrap(), "http://example.test:8080");
    }
}
