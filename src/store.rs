//! Capture store: bounded in-memory ring plus per-capture file persistence
//! (spec §4.2).
//!
//! Grounded on `capture/store.go`: a `std::sync::RwLock` around a `Vec`
//! plays the role of Go's `sync.RWMutex`, and persistence is best-effort —
//! a write failure is logged and otherwise ignored, never propagated to the
//! caller of `add`. The blocking lock is intentional (spec §5 "persistence
//! I/O occurs while exclusive... acceptable because persistence is best-effort
//! and the ring is small"); callers on the async request path move it to a
//! blocking-safe call site rather than holding it across an `.await`.

use crate::capture::Capture;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::warn;

const DEFAULT_MAX_CAPTURES: usize = 1000;
/// `getByPrefix` only scans this many of the most recent on-disk captures
/// (spec §4.2, §9 open question).
const PREFIX_SCAN_LIMIT: usize = 500;

pub struct CaptureStore {
    captures: RwLock<Vec<Capture>>,
    max: usize,
    dir: Option<PathBuf>,
}

impl CaptureStore {
    /// `max <= 0` (expressed here as `max == 0`) falls back to the default
    /// of 1000 live records, matching `NewStore`'s Go semantics.
    pub fn new(max: usize, dir: Option<PathBuf>) -> Self {
        Self {
            captures: RwLock::new(Vec::new()),
            max: if max == 0 { DEFAULT_MAX_CAPTURES } else { max },
            dir,
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Append a capture, trimming the ring to `max` and persisting to disk
    /// (if configured) with 0600 permissions. Never fails — filesystem
    /// errors are logged and otherwise swallowed.
    pub fn add(&self, capture: Capture) {
        let to_persist = capture.clone();
        {
            let mut guard = self.captures.write().expect("capture store lock poisoned");
            guard.push(capture);
            if guard.len() > self.max {
                let excess = guard.len() - self.max;
                guard.drain(0..excess);
            }
        }
        if let Some(dir) = &self.dir {
            if let Err(e) = persist_one(dir, &to_persist) {
                warn!(error = %e, id = %to_persist.id, "failed to save capture");
            }
        }
    }

    /// Most recent `n` in-memory captures, newest first. `n == 0` means all.
    pub fn list(&self, n: usize) -> Vec<Capture> {
        let guard = self.captures.read().expect("capture store lock poisoned");
        let take = if n == 0 || n > guard.len() { guard.len() } else { n };
        guard.iter().rev().take(take).cloned().collect()
    }

    /// Snapshot copy of every in-memory capture (oldest first).
    pub fn all(&self) -> Vec<Capture> {
        let guard = self.captures.read().expect("capture store lock poisoned");
        guard.clone()
    }

    /// Exact-id lookup: in-memory first, then disk if persistence is
    /// enabled.
    pub fn get(&self, id: &str) -> Option<Capture> {
        {
            let guard = self.captures.read().expect("capture store lock poisoned");
            if let Some(c) = guard.iter().find(|c| c.id == id) {
                return Some(c.clone());
            }
        }
        self.dir.as_ref().and_then(|dir| load_from_disk(dir, id))
    }

    /// `get(id)` first, then a scan of the most recent on-disk captures for
    /// a unique prefix match (spec §4.2, §8 boundary behavior).
    pub fn get_by_prefix(&self, prefix: &str) -> Option<Capture> {
        if let Some(c) = self.get(prefix) {
            return Some(c);
        }
        self.list_from_disk(PREFIX_SCAN_LIMIT)
            .into_iter()
            .find(|c| c.id.starts_with(prefix))
    }

    /// Enumerate `*.json` in the persistence directory, newest-mtime-first,
    /// decode up to `n` (0 means all), skipping any that fail to decode.
    pub fn list_from_disk(&self, n: usize) -> Vec<Capture> {
        let Some(dir) = &self.dir else {
            return Vec::new();
        };
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };
        let mut files: Vec<(PathBuf, std::time::SystemTime)> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|ext| ext == "json").unwrap_or(false))
            .filter_map(|e| {
                let meta = e.metadata().ok()?;
                let modified = meta.modified().ok()?;
                Some((e.path(), modified))
            })
            .collect();
        files.sort_by(|a, b| b.1.cmp(&a.1));
        if n > 0 && files.len() > n {
            files.truncate(n);
        }
        files
            .into_iter()
            .filter_map(|(path, _)| {
                let id = path.file_stem()?.to_str()?.to_string();
                load_from_disk(dir, &id)
            })
            .collect()
    }

    /// Empty the in-memory ring; optionally delete every `*.json` on disk.
    pub fn clear(&self, delete_files: bool) {
        {
            let mut guard = self.captures.write().expect("capture store lock poisoned");
            guard.clear();
        }
        if delete_files {
            if let Some(dir) = &self.dir {
                if let Ok(entries) = fs::read_dir(dir) {
                    for entry in entries.filter_map(|e| e.ok()) {
                        if entry.path().extension().map(|ext| ext == "json").unwrap_or(false) {
                            let _ = fs::remove_file(entry.path());
                        }
                    }
                }
            }
        }
    }
}

fn persist_one(dir: &Path, capture: &Capture) -> std::io::Result<()> {
    let path = dir.join(format!("{}.json", capture.id));
    let data = serde_json::to_vec_pretty(capture)?;
    fs::write(&path, data)?;
    set_owner_only(&path)?;
    Ok(())
}

fn load_from_disk(dir: &Path, id: &str) -> Option<Capture> {
    let path = dir.join(format!("{id}.json"));
    let data = fs::read(path).ok()?;
    serde_json::from_slice(&data).ok()
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
