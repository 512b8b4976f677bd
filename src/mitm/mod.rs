//! MITM CONNECT handling: TLS-terminate the client leg with a freshly issued
//! leaf certificate, then branch on negotiated ALPN (spec §4.8).
//!
//! Grounded on `proxy/handler.go::mitmCONNECT`: dial the origin first (so a
//! handshake failure there can fall back before the client ever sees a
//! certificate), issue a host-matched leaf, terminate TLS toward the client
//! with `h2`/`http/1.1` on offer, then dispatch by what the client picked.

mod h1;
mod h2;

use crate::connect::{build_server_config, dial_origin_tls, hostname_only};
use crate::error::ProxyError;
use crate::state::ProxyState;
use hyper::rt::{Read as HyperRead, Write as HyperWrite};
use hyper_util::rt::TokioIo;
use std::sync::Arc;

/// `client_io` is `TokioIo<Upgraded>` in practice: `Upgraded` implements
/// hyper's own `Read`/`Write`, and wrapping it in `TokioIo` is what makes the
/// result usable with `tokio_rustls` below.
pub async fn serve<C>(target: &str, client_io: TokioIo<C>, state: Arc<ProxyState>) -> Result<(), ProxyError>
where
    C: HyperRead + HyperWrite + Unpin + Send + 'static,
{
    let host_certs = state
        .host_certs
        .as_ref()
        .expect("serve is only invoked when mitm_enabled() is true")
        .clone();
    let hostname = hostname_only(target);

    let origin_tls = dial_origin_tls(target).await?;
    let issued = host_certs.get_certificate(&hostname)?;
    let server_config = build_server_config(&issued.cert_chain_pem, &issued.key_pem)?;
    let acceptor = tokio_rustls::TlsAcceptor::from(server_config);

    let client_tls = acceptor
        .accept(client_io)
        .await
        .map_err(|e| ProxyError::ClientTls(e.to_string()))?;

    let negotiated = client_tls.get_ref().1.alpn_protocol().map(|p| p.to_vec());
    match negotiated.as_deref() {
        Some(b"h2") => h2::serve(&hostname, client_tls, state).await,
        _ => h1::serve(&hostname, client_tls, origin_tls, state).await,
    }
}
