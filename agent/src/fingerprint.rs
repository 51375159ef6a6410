use sha2::{Digest, Sha256};

use crate::models::Alert;

/// Stable dedup key for an alert. The upstream fingerprint (or the batch
/// group key) wins verbatim; otherwise the key is composed from labels with
/// empty segments preserved, so distinct alerts never collapse by accident.
pub fn fingerprint(alert: &Alert) -> String {
    if let Some(fp) = &alert.fingerprint
        && !fp.is_empty()
    {
        return fp.clone();
    }
    if let Some(gk) = &alert.group_key
        && !gk.is_empty()
    {
        return gk.clone();
    }
    format!(
        "{}:{}:{}:{}",
        alert.alertname,
        alert.namespace(),
        alert.pod(),
        alert.container()
    )
}

/// 64-bit advisory-lock key derived from a fingerprint. Postgres advisory
/// locks are keyed by bigint, so the fingerprint is hashed down.
pub fn lock_key(fingerprint: &str) -> i64 {
    let digest = Sha256::digest(fingerprint.as_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(buf)
}
