//! Certificate authority and per-host leaf issuance (spec §4.3, §4.4).

mod ca;
mod host;

pub use ca::CertificateAuthority;
pub use host::HostCertCache;
