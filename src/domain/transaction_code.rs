//! Transaction code generation.
//!
//! A transaction code is the correlation key between a local donation and
//! one gateway order. The format is `yymmdd_<16 hex chars>`, where the date
//! is taken in Vietnam time (UTC+7) as the mobile-wallet gateway requires the
//! prefix to match its own calendar day. The 64-bit random suffix makes a
//! collision within one day vanishingly unlikely; the store still enforces
//! uniqueness.

use chrono::{DateTime, FixedOffset, Utc};
use rand::RngCore;

const GATEWAY_UTC_OFFSET_SECS: i32 = 7 * 3600;

/// Returns the `yymmdd` prefix for `now` in gateway time.
#[must_use]
pub fn date_prefix(now: DateTime<Utc>) -> String {
    match FixedOffset::east_opt(GATEWAY_UTC_OFFSET_SECS) {
        Some(offset) => now.with_timezone(&offset).format("%y%m%d").to_string(),
        None => now.format("%y%m%d").to_string(),
    }
}

/// Generates a fresh transaction code for `now`.
#[must_use]
pub fn generate(now: DateTime<Utc>) -> String {
    let suffix = rand::thread_rng().next_u64();
    format!("{}_{suffix:016x}", date_prefix(now))
}

/// Returns the random part of a transaction code (everything after the
/// first `_`), or the whole code if it has no date prefix.
#[must_use]
pub fn suffix(code: &str) -> &str {
    code.split_once('_').map_or(code, |(_, rest)| rest)
}

/// Returns `true` if `code` only uses the characters of generated codes
/// (`[0-9a-z_]`). Codes are embedded in gateway search queries, so anything
/// else is refused before it reaches a gateway.
#[must_use]
pub fn is_well_formed(code: &str) -> bool {
    !code.is_empty()
        && code
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase() || b == b'_')
}
