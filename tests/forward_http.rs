//! End-to-end: a client talks to [`ProxyServer`] in absolute-form, the
//! server forwards to a loopback origin, and the exchange lands in the
//! [`CaptureStore`].

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::Request;
use hyper_util::rt::TokioIo;
use snare::server::ProxyServer;
use snare::state::ProxyState;
use snare::store::CaptureStore;
use snare::transport::ForwardTransport;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// A minimal origin that answers every connection with one fixed HTTP/1.1
/// response and then closes.
async fn spawn_origin() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                // Drain the request; we don't need to parse it to answer.
                let _ = stream.read(&mut buf).await;
                let body = b"hello from origin";
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\ncontent-type: text/plain\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.write_all(body).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}

async fn spawn_proxy() -> (std::net::SocketAddr, Arc<ProxyState>, watch::Sender<bool>) {
    let store = Arc::new(CaptureStore::new(100, None));
    let transport = Arc::new(ForwardTransport::new());
    let state = Arc::new(ProxyState { store, transport, host_certs: None });

    let server = ProxyServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = server.local_addr();
    let (tx, rx) = watch::channel(false);
    let state_for_server = state.clone();
    tokio::spawn(async move {
        server.serve(state_for_server, rx).await;
    });
    (addr, state, tx)
}

#[tokio::test]
async fn forwards_request_and_records_capture() {
    let origin_addr = spawn_origin().await;
    let (proxy_addr, state, _shutdown_tx) = spawn_proxy().await;

    let stream = TcpStream::connect(proxy_addr).await.unwrap();
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await.unwrap();
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let url = format!("http://{origin_addr}/widgets");
    let req = Request::builder()
        .method("GET")
        .uri(&url)
        .header("host", origin_addr.to_string())
        .body(Empty::<Bytes>::new().boxed())
        .unwrap();

    let resp = sender.send_request(req).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"hello from origin");

    // The forward path records a capture synchronously before the response
    // is returned, so it's already visible here.
    let captures = state.store.list(0);
    assert_eq!(captures.len(), 1);
    assert_eq!(captures[0].request.method, "GET");
    assert_eq!(captures[0].request.url, url);
    assert_eq!(captures[0].response.as_ref().unwrap().status_code, 200);
    assert!(captures[0].error.is_none());
}

#[tokio::test]
async fn records_error_capture_when_origin_is_unreachable() {
    let (proxy_addr, state, _shutdown_tx) = spawn_proxy().await;

    // Reserve a port and drop the listener so nothing answers on it.
    let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = reserved.local_addr().unwrap();
    drop(reserved);

    let stream = TcpStream::connect(proxy_addr).await.unwrap();
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await.unwrap();
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let url = format!("http://{dead_addr}/");
    let req = Request::builder()
        .method("GET")
        .uri(&url)
        .header("host", dead_addr.to_string())
        .body(Empty::<Bytes>::new().boxed())
        .unwrap();

    let resp = sender.send_request(req).await.unwrap();
    assert_eq!(resp.status(), 502);

    let captures = state.store.list(0);
    assert_eq!(captures.len(), 1);
    assert!(captures[0].response.is_none());
    assert!(captures[0].error.is_some());
}

#[tokio::test]
async fn posts_body_through_to_origin_and_captures_it() {
    // Origin that echoes back whatever body it received, to confirm the
    // forwarded bytes on the wire match what was sent (as opposed to the
    // decompressed copy that only the capture record carries).
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = vec![0u8; 8192];
            let n = stream.read(&mut buf).await.unwrap_or(0);
            let request_text = String::from_utf8_lossy(&buf[..n]);
            let body_start = request_text.find("\r\n\r\n").map(|i| i + 4).unwrap_or(request_text.len());
            let received_body = request_text[body_start..].as_bytes().to_vec();

            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-length: {}\r\n\r\n",
                received_body.len()
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.write_all(&received_body).await;
            let _ = stream.shutdown().await;
        }
    });

    let (proxy_addr, state, _shutdown_tx) = spawn_proxy().await;
    let stream = TcpStream::connect(proxy_addr).await.unwrap();
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await.unwrap();
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let url = format!("http://{origin_addr}/submit");
    let payload = Bytes::from_static(b"{\"name\":\"widget\"}");
    let req = Request::builder()
        .method("POST")
        .uri(&url)
        .header("host", origin_addr.to_string())
        .header("content-length", payload.len().to_string())
        .body(Full::new(payload.clone()).boxed())
        .unwrap();

    let resp = sender.send_request(req).await.unwrap();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, payload);

    let captures = state.store.list(0);
    assert_eq!(captures[0].request.body.0, payload.to_vec());
}
