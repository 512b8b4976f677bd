//! Root certificate authority: load-or-create plus PEM persistence
//! (spec §4.3).
//!
//! Grounded on `proxy/cert/ca.go::LoadOrCreateCA`. rcgen has no "parse an
//! existing self-signed cert back into a signer" path, so — matching the
//! teacher's own `load_ca` in `proxy-test/cursor-proxy/src/main.rs` — loading
//! an existing CA re-derives the same `CertificateParams` used at generation
//! time and re-signs with the persisted key. The result is byte-identical in
//! every field except validity dates, which are stamped fresh on each load;
//! this is a known, accepted simplification (see design notes).

use crate::error::{ProxyError, ProxyResult};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose, SerialNumber,
};
use std::fs;
use std::path::{Path, PathBuf};
use time::{Duration as TimeDuration, OffsetDateTime};

const CA_CERT_FILE: &str = "ca.pem";
const CA_KEY_FILE: &str = "ca-key.pem";
const CA_VALIDITY_DAYS: i64 = 365 * 10;

pub struct CertificateAuthority {
    pub cert: Certificate,
    pub key: KeyPair,
}

impl CertificateAuthority {
    /// Load `ca.pem`/`ca-key.pem` from `dir` if both exist, otherwise
    /// generate a fresh ECDSA P-256 root and write them out (0644 cert,
    /// 0600 key).
    pub fn load_or_create(dir: &Path) -> ProxyResult<Self> {
        let cert_path = dir.join(CA_CERT_FILE);
        let key_path = dir.join(CA_KEY_FILE);

        if cert_path.is_file() && key_path.is_file() {
            return Self::load(&key_path);
        }

        fs::create_dir_all(dir).map_err(|e| ProxyError::io(dir, e))?;
        let ca = Self::generate()?;
        ca.write(&cert_path, &key_path)?;
        Ok(ca)
    }

    /// Generate a new root CA in memory without touching disk.
    pub fn generate() -> ProxyResult<Self> {
        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|e| ProxyError::Certificate(e.to_string()))?;
        let params = ca_params()?;
        let cert = params
            .self_signed(&key)
            .map_err(|e| ProxyError::Certificate(e.to_string()))?;
        Ok(Self { cert, key })
    }

    fn load(key_path: &Path) -> ProxyResult<Self> {
        let key_pem = fs::read_to_string(key_path).map_err(|e| ProxyError::io(key_path, e))?;
        let key = KeyPair::from_pem(&key_pem).map_err(|e| ProxyError::Certificate(e.to_string()))?;
        let params = ca_params()?;
        let cert = params
            .self_signed(&key)
            .map_err(|e| ProxyError::Certificate(e.to_string()))?;
        Ok(Self { cert, key })
    }

    fn write(&self, cert_path: &Path, key_path: &Path) -> ProxyResult<()> {
        fs::write(cert_path, self.cert.pem()).map_err(|e| ProxyError::io(cert_path, e))?;
        fs::write(key_path, self.key.serialize_pem()).map_err(|e| ProxyError::io(key_path, e))?;
        set_mode(cert_path, 0o644)?;
        set_mode(key_path, 0o600)?;
        Ok(())
    }

    pub fn cert_path(dir: &Path) -> PathBuf {
        dir.join(CA_CERT_FILE)
    }

    pub fn key_path(dir: &Path) -> PathBuf {
        dir.join(CA_KEY_FILE)
    }
}

fn ca_params() -> ProxyResult<CertificateParams> {
    let mut params =
        CertificateParams::new(Vec::<String>::new()).map_err(|e| ProxyError::Certificate(e.to_string()))?;

    let mut name = DistinguishedName::new();
    name.push(DnType::OrganizationName, "Proxy CA");
    name.push(DnType::CommonName, "Proxy Root CA");
    params.distinguished_name = name;

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.serial_number = Some(SerialNumber::from_slice(&uuid::Uuid::new_v4().into_bytes()));

    let now = OffsetDateTime::now_utc();
    params.not_before = now - TimeDuration::days(1);
    params.not_after = now + TimeDuration::days(CA_VALIDITY_DAYS);

    Ok(params)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> ProxyResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| ProxyError::io(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> ProxyResult<()> {
    Ok(())
}
