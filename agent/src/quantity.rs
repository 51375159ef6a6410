//! Kubernetes memory quantity arithmetic for the limit-bump remediation.

pub const MIB: i64 = 1024 * 1024;
pub const GIB: i64 = 1024 * MIB;

/// Floor for a bumped memory limit.
pub const MIN_LIMIT: i64 = 256 * MIB;
/// Ceiling for a bumped memory limit.
pub const MAX_LIMIT: i64 = 4 * GIB;

/// Parses a Kubernetes memory quantity into bytes. Binary suffixes (Ki, Mi,
/// Gi, Ti), decimal suffixes (K/k, M, G, T) and plain byte counts are
/// accepted; anything else is None.
pub fn parse_memory(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (number, multiplier): (&str, i64) = if let Some(n) = s.strip_suffix("Ki") {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix("Mi") {
        (n, MIB)
    } else if let Some(n) = s.strip_suffix("Gi") {
        (n, GIB)
    } else if let Some(n) = s.strip_suffix("Ti") {
        (n, 1024 * GIB)
    } else if let Some(n) = s.strip_suffix('K').or_else(|| s.strip_suffix('k')) {
        (n, 1_000)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, 1_000_000)
    } else if let Some(n) = s.strip_suffix('G') {
        (n, 1_000_000_000)
    } else if let Some(n) = s.strip_suffix('T') {
        (n, 1_000_000_000_000)
    } else {
        (s, 1)
    };
    let value: f64 = number.trim().parse().ok()?;
    if value < 0.0 {
        return None;
    }
    Some((value * multiplier as f64).round() as i64)
}

/// Renders bytes back into the shortest binary quantity: whole Gi when the
/// value divides evenly, otherwise Mi (rounded up).
pub fn format_memory(bytes: i64) -> String {
    if bytes > 0 && bytes % GIB == 0 {
        format!("{}Gi", bytes / GIB)
    } else {
        format!("{}Mi", (bytes + MIB - 1) / MIB)
    }
}

/// Next memory limit: double the current one, floored at 256Mi and capped at
/// 4Gi. An unknown current limit starts at the floor. The result never
/// shrinks an existing limit.
pub fn next_limit(current: Option<i64>) -> i64 {
    match current {
        None => MIN_LIMIT,
        Some(c) if c >= MAX_LIMIT => c,
        Some(c) => (c * 2).clamp(MIN_LIMIT, MAX_LIMIT),
    }
}
