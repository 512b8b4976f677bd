//! Exercises the certificate machinery the way a real TLS client would:
//! concurrent identical-host lookups return the same leaf, distinct hosts
//! never collide, and a leaf issued by [`HostCertCache`] is actually trusted
//! by a client that only trusts the root — not skip-verify, real chain
//! validation.

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use snare::cert::{CertificateAuthority, HostCertCache};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[tokio::test]
async fn concurrent_lookups_for_same_host_agree() {
    let ca = Arc::new(CertificateAuthority::generate().unwrap());
    let cache = Arc::new(HostCertCache::new(ca));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move { cache.get_certificate("api.example.test").unwrap() }));
    }

    let mut results = Vec::new();
    for h in handles {
        results.push(h.await.unwrap());
    }

    let first_key = &results[0].key_pem;
    assert!(results.iter().all(|r| &r.key_pem == first_key));
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn distinct_hosts_never_share_a_leaf_even_under_concurrency() {
    let ca = Arc::new(CertificateAuthority::generate().unwrap());
    let cache = Arc::new(HostCertCache::new(ca));
    let hosts = ["a.example.test", "b.example.test", "c.example.test"];

    let mut handles = Vec::new();
    for host in hosts {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move { (host, cache.get_certificate(host).unwrap()) }));
    }

    let mut keys = Vec::new();
    for h in handles {
        let (_, issued) = h.await.unwrap();
        keys.push(issued.key_pem);
    }
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), hosts.len());
    assert_eq!(cache.len(), hosts.len());
}

fn parse_server_config(cert_chain_pem: &str, key_pem: &str) -> Arc<ServerConfig> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_chain_pem.as_bytes())
        .collect::<Result<_, _>>()
        .unwrap();
    let key = rustls_pemfile::pkcs8_private_keys(&mut key_pem.as_bytes())
        .next()
        .unwrap()
        .unwrap();
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, PrivateKeyDer::Pkcs8(key))
        .unwrap();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Arc::new(config)
}

fn root_store_trusting(ca: &CertificateAuthority) -> RootCertStore {
    let mut roots = RootCertStore::empty();
    let pem = ca.cert.pem();
    for cert in rustls_pemfile::certs(&mut pem.as_bytes()) {
        roots.add(cert.unwrap()).unwrap();
    }
    roots
}

#[tokio::test]
async fn leaf_issued_for_localhost_is_trusted_by_a_client_that_trusts_only_the_root() {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let ca = Arc::new(CertificateAuthority::generate().unwrap());
    let roots = root_store_trusting(&ca);
    let cache = HostCertCache::new(ca);
    let issued = cache.get_certificate("localhost").unwrap();

    let server_config = parse_server_config(&issued.cert_chain_pem, &issued.key_pem);
    let acceptor = tokio_rustls::TlsAcceptor::from(server_config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut tls = acceptor.accept(tcp).await.unwrap();
        let mut buf = [0u8; 64];
        let n = tls.read(&mut buf).await.unwrap();
        tls.write_all(&buf[..n]).await.unwrap();
        tls.shutdown().await.unwrap();
    });

    let client_config = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));
    let tcp = TcpStream::connect(addr).await.unwrap();
    let server_name = ServerName::try_from("localhost").unwrap();
    let mut tls = connector.connect(server_name, tcp).await.unwrap();

    tls.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 64];
    let n = tls.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"ping");

    server.await.unwrap();
}

#[tokio::test]
async fn leaf_issued_for_a_different_host_is_rejected_by_a_strict_client() {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let ca = Arc::new(CertificateAuthority::generate().unwrap());
    let roots = root_store_trusting(&ca);
    let cache = HostCertCache::new(ca);
    // Issue a leaf for a host that is not the one the client will ask for.
    let issued = cache.get_certificate("totally-different.example.test").unwrap();

    let server_config = parse_server_config(&issued.cert_chain_pem, &issued.key_pem);
    let acceptor = tokio_rustls::TlsAcceptor::from(server_config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        if let Ok((tcp, _)) = listener.accept().await {
            // The handshake is expected to fail client-side before any data
            // flows; ignore whatever happens to the accept future here.
            let _ = acceptor.accept(tcp).await;
        }
    });

    let client_config = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));
    let tcp = TcpStream::connect(addr).await.unwrap();
    let server_name = ServerName::try_from("localhost").unwrap();
    let result = connector.connect(server_name, tcp).await;
    assert!(result.is_err(), "client should reject a certificate issued for a different hostname");
}
