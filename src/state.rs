//! Shared state handed to every accepted connection (spec §4.5-§4.8).

use crate::cert::HostCertCache;
use crate::store::CaptureStore;
use crate::transport::ForwardTransport;
use std::sync::Arc;

pub struct ProxyState {
    pub store: Arc<CaptureStore>,
    pub transport: Arc<ForwardTransport>,
    /// `None` when the CA failed to load — MITM is disabled and CONNECT
    /// falls back to a plain tunnel (spec §7.4).
    pub host_certs: Option<Arc<HostCertCache>>,
}

impl ProxyState {
    pub fn mitm_enabled(&self) -> bool {
        self.host_certs.is_some()
    }
}
