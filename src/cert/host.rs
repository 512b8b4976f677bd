//! Per-host leaf certificate cache (spec §4.4).
//!
//! Grounded on `proxy/cert/host.go::HostCertCache`. Go's RWMutex-guarded map
//! with a double-checked read-then-write pattern becomes a `DashMap`, which
//! gives the same "many concurrent readers, rare writer" shape the teacher's
//! `pool.rs`/`capture.rs` already lean on for their own concurrent maps.

use crate::cert::CertificateAuthority;
use crate::error::{ProxyError, ProxyResult};
use dashmap::DashMap;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, Ia5String,
    KeyUsagePurpose, SanType, SerialNumber,
};
use std::net::IpAddr;
use std::sync::Arc;
use time::{Duration as TimeDuration, OffsetDateTime};

const LEAF_VALIDITY_DAYS: i64 = 365;

#[derive(Clone)]
struct CachedCert {
    cert_chain_pem: String,
    key_pem: String,
}

pub struct HostCertCache {
    cache: DashMap<String, CachedCert>,
    ca: Arc<CertificateAuthority>,
}

/// A leaf certificate plus its private key, PEM-encoded, ready to hand to
/// `rustls::ServerConfig`.
pub struct IssuedCert {
    pub cert_chain_pem: String,
    pub key_pem: String,
}

impl HostCertCache {
    pub fn new(ca: Arc<CertificateAuthority>) -> Self {
        Self {
            cache: DashMap::new(),
            ca,
        }
    }

    /// Normalize `host` (strip port, lowercase), return a cached leaf cert
    /// if present, otherwise issue one, cache it, and return it. Concurrent
    /// callers for the same host race on the cache entry, not on CA signing:
    /// the first writer in wins and later ones just re-read the cache.
    pub fn get_certificate(&self, host: &str) -> ProxyResult<IssuedCert> {
        let normalized = normalize_host(host);

        if let Some(entry) = self.cache.get(&normalized) {
            return Ok(entry.clone().into());
        }

        let issued = self.issue(&normalized)?;
        // entry() re-checks under the shard lock so a racing issuer doesn't
        // clobber a cert another thread already inserted.
        let cached = self
            .cache
            .entry(normalized)
            .or_insert_with(|| CachedCert {
                cert_chain_pem: issued.cert_chain_pem.clone(),
                key_pem: issued.key_pem.clone(),
            })
            .clone();
        Ok(cached.into())
    }

    fn issue(&self, host: &str) -> ProxyResult<IssuedCert> {
        let leaf_key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|e| ProxyError::Certificate(e.to_string()))?;

        let mut params = CertificateParams::new(Vec::<String>::new())
            .map_err(|e| ProxyError::Certificate(e.to_string()))?;

        let mut name = DistinguishedName::new();
        name.push(DnType::OrganizationName, "Proxy");
        name.push(DnType::CommonName, host);
        params.distinguished_name = name;

        params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.serial_number = Some(SerialNumber::from_slice(&uuid::Uuid::new_v4().into_bytes()));

        let mut sans = vec![SanType::DnsName(
            Ia5String::try_from(host).map_err(|e| ProxyError::Certificate(e.to_string()))?,
        )];
        if let Ok(ip) = host.parse::<IpAddr>() {
            sans.push(SanType::IpAddress(ip));
        }
        params.subject_alt_names = sans;

        let now = OffsetDateTime::now_utc();
        params.not_before = now - TimeDuration::days(1);
        params.not_after = now + TimeDuration::days(LEAF_VALIDITY_DAYS);

        let cert = params
            .signed_by(&leaf_key, &self.ca.cert, &self.ca.key)
            .map_err(|e| ProxyError::Certificate(e.to_string()))?;

        Ok(IssuedCert {
            cert_chain_pem: format!("{}\n{}", cert.pem(), self.ca.cert.pem()),
            key_pem: leaf_key.serialize_pem(),
        })
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl From<CachedCert> for IssuedCert {
    fn from(c: CachedCert) -> Self {
        IssuedCert {
            cert_chain_pem: c.cert_chain_pem,
            key_pem: c.key_pem,
        }
    }
}

/// Trim whitespace, strip a trailing `:port`, lowercase. IPv6 literals in
/// bracket form (`[::1]:443`) keep their brackets stripped too.
fn normalize_host(host: &str) -> String {
    let trimmed = host.trim();
    let without_port = if let Some(rest) = trimmed.strip_prefix('[') {
        match rest.find(']') {
            Some(end) => &rest[..end],
            None => trimmed,
        }
    } else {
        match trimmed.rfind(':') {
            Some(idx) if trimmed[..idx].rfind(':').is_none() => &trimmed[..idx],
            _ => trimmed,
        }
    };
    without_port.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_host_and_port() {
        assert_eq!(normalize_host("Example.COM:8443"), "example.com");
        assert_eq!(normalize_host("  example.com  "), "example.com");
        assert_eq!(normalize_host("[::1]:443"), "::1");
        assert_eq!(normalize_host("example.com"), "example.com");
    }

    #[test]
    fn issues_and_caches_same_host() {
        let ca = Arc::new(CertificateAuthority::generate().unwrap());
        let cache = HostCertCache::new(ca);
        let first = cache.get_certificate("api.example.test").unwrap();
        let second = cache.get_certificate("API.EXAMPLE.TEST:443").unwrap();
        assert_eq!(first.key_pem, second.key_pem);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn issues_distinct_certs_for_distinct_hosts() {
        let ca = Arc::new(CertificateAuthority::generate().unwrap());
        let cache = HostCertCache::new(ca);
        let a = cache.get_certificate("a.example.test").unwrap();
        let b = cache.get_certificate("b.example.test").unwrap();
        assert_ne!(a.key_pem, b.key_pem);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn issues_ip_san_for_ip_host() {
        let ca = Arc::new(CertificateAuthority::generate().unwrap());
        let cache = HostCertCache::new(ca);
        let issued = cache.get_certificate("127.0.0.1").unwrap();
        assert!(issued.cert_chain_pem.contains("BEGIN CERTIFICATE"));
    }
}
