use crate::detect::detect_now;
use crate::types::DeviceProfile;
use anyhow::{Context, Result};
use chrono::Utc;
use serde_json as json;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

const SCHEMA: u32 = 1;

pub fn load_cached(path: &Path) -> Option<DeviceProfile> {
    let buf = fs::read(path).ok()?;
    let p = json::from_slice::<DeviceProfile>(&buf).ok()?;
    (p.schema == SCHEMA).then_some(p)
}

/// Write through a temp file so readers never see a half-written profile.
pub fn save_profile(path: &Path, p: &DeviceProfile) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("mkd {}", dir.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json::to_vec_pretty(p)?).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

/// Cached profile if present, otherwise a fresh detection (cached on the way out).
pub fn load_or_detect(path: &Path) -> Result<DeviceProfile> {
    if let Some(p) = load_cached(path) {
        debug!(path = %path.display(), "using cached device profile");
        return Ok(p);
    }
    detect_and_cache(path)
}

/// Runs detection now and caches the result, returning the fresh profile.
pub fn detect_and_cache(path: &Path) -> Result<DeviceProfile> {
    let fresh = detect_now()?;
    let p = stamp(fresh, None);
    save_profile(path, &p)?;
    info!(tier = %p.tier, path = %path.display(), "device profile cached");
    Ok(p)
}

/// Re-detect and rewrite the cache only when the hardware fingerprint changed.
pub fn validate_or_redetect(path: &Path) -> Result<DeviceProfile> {
    let fresh = detect_now()?;
    refresh_with(path, fresh)
}

/// Compare `fresh` against the cached profile at `path`; keep the cache if it still matches.
pub fn refresh_with(path: &Path, fresh: DeviceProfile) -> Result<DeviceProfile> {
    let cached = load_cached(path);
    let fingerprint = compute_fingerprint(&fresh);
    match cached {
        Some(c) if c.fingerprint == fingerprint => Ok(c),
        cached => {
            let created = cached.map(|c| c.created_at);
            let p = stamp(fresh, created);
            save_profile(path, &p)?;
            info!(tier = %p.tier, "device profile refreshed");
            Ok(p)
        }
    }
}

fn stamp(mut p: DeviceProfile, created_at: Option<String>) -> DeviceProfile {
    p.schema = SCHEMA;
    p.fingerprint = compute_fingerprint(&p);
    let now = Utc::now().to_rfc3339();
    p.created_at = created_at.unwrap_or_else(|| now.clone());
    p.updated_at = now;
    p
}

/// Stable identity of the hardware; timestamps and probe timings are excluded.
pub fn compute_fingerprint(p: &DeviceProfile) -> String {
    let mut hasher = Sha256::new();
    hasher.update(p.os.as_bytes());
    hasher.update(p.arch.as_bytes());
    hasher.update(p.cpu.brand.as_bytes());
    hasher.update(p.cpu.threads.to_le_bytes());
    hasher.update(p.cpu.physical_cores.unwrap_or(0).to_le_bytes());
    hasher.update(p.total_memory_mb.to_le_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CpuInfo;

    fn sample(memory_mb: u64) -> DeviceProfile {
        DeviceProfile::assemble(
            "linux".into(),
            "x86_64".into(),
            CpuInfo {
                brand: "Test CPU".into(),
                threads: 8,
                physical_cores: Some(4),
            },
            memory_mb,
        )
    }

    #[test]
    fn fingerprint_ignores_timestamps() {
        let a = sample(8000);
        let mut b = a.clone();
        b.created_at = "yesterday".into();
        b.probe_ms = Some(99);
        assert_eq!(compute_fingerprint(&a), compute_fingerprint(&b));
        assert_ne!(compute_fingerprint(&a), compute_fingerprint(&sample(16000)));
        assert_eq!(compute_fingerprint(&a).len(), 64);
    }

    #[test]
    fn save_then_load_keeps_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("profile.json");
        let p = stamp(sample(8000), None);
        save_profile(&path, &p).unwrap();
        assert_eq!(load_cached(&path), Some(p));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn garbage_cache_reads_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        fs::write(&path, b"{ not json").unwrap();
        assert_eq!(load_cached(&path), None);
    }

    #[test]
    fn refresh_keeps_matching_cache_and_rewrites_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");

        let first = refresh_with(&path, sample(8000)).unwrap();
        let again = refresh_with(&path, sample(8000)).unwrap();
        assert_eq!(first, again);

        let upgraded = refresh_with(&path, sample(16000)).unwrap();
        assert_ne!(upgraded.fingerprint, first.fingerprint);
        assert_eq!(upgraded.created_at, first.created_at);
        assert_eq!(load_cached(&path), Some(upgraded));
    }
}
