//! Directory resolution (spec §4.12).
//!
//! Grounded on `config/path.go::StoreDir`/`CADir`: `SNARE_STORE`/`SNARE_CA`
//! environment variables override `$HOME/.snare/captures` and `$HOME/.snare`
//! respectively. CLI flags (wired in `cli/serve.rs`) take precedence over
//! both — the env var is the fallback, not the other way round. There is
//! deliberately no on-disk config file: every other knob is a CLI flag or
//! env var, matching the original's footprint.

use std::path::PathBuf;

const STORE_ENV: &str = "SNARE_STORE";
const CA_ENV: &str = "SNARE_CA";

pub fn store_dir() -> PathBuf {
    if let Ok(v) = std::env::var(STORE_ENV) {
        if !v.is_empty() {
            return expand(&v);
        }
    }
    home_dir().join(".snare").join("captures")
}

pub fn ca_dir() -> PathBuf {
    if let Ok(v) = std::env::var(CA_ENV) {
        if !v.is_empty() {
            return expand(&v);
        }
    }
    home_dir().join(".snare")
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}
