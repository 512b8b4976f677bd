//! `snare replay` (spec §6): grounded on `cmd/replay.go`. Resends a captured
//! request directly — not through the proxy — via the same
//! [`ForwardTransport`] the forward path uses.

use anyhow::Context;
use bytes::Bytes;
use clap::Args;
use http_body_util::Full;
use hyper::Request;
use snare::store::CaptureStore;
use snare::transport::ForwardTransport;

#[derive(Args)]
pub struct ReplayArgs {
    /// Capture id, or a unique prefix of one.
    id: String,

    /// Number of times to resend the request.
    #[arg(short = 'n', long, default_value_t = 1)]
    repeat: u32,

    /// Override the captured URL.
    #[arg(short, long)]
    url: Option<String>,
}

pub async fn run(args: ReplayArgs) -> anyhow::Result<()> {
    let store = CaptureStore::new(1000, Some(snare::config::store_dir()));
    let capture = store.get_by_prefix(&args.id).with_context(|| format!("no capture found matching '{}'", args.id))?;
    let url = args.url.unwrap_or_else(|| capture.request.url.clone());
    let method: hyper::Method = capture.request.method.parse().context("invalid captured method")?;

    let transport = ForwardTransport::new();
    for attempt in 1..=args.repeat {
        let mut req = Request::builder()
            .method(method.clone())
            .uri(&url)
            .body(Full::new(Bytes::from(capture.request.body.0.clone())))
            .context("building replay request")?;
        for (name, values) in &capture.request.headers {
            if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            for value in values {
                if let (Ok(name), Ok(value)) = (
                    hyper::header::HeaderName::try_from(name.as_str()),
                    hyper::header::HeaderValue::try_from(value.as_str()),
                ) {
                    req.headers_mut().append(name, value);
                }
            }
        }

        match transport.send(req).await {
            Ok(resp) => println!("[{attempt}/{}] {} {}", args.repeat, resp.status(), url),
            Err(e) => println!("[{attempt}/{}] error: {e}", args.repeat),
        }
    }
    Ok(())
}
