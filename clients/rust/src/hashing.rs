//! Deterministic bucketing hash.
//!
//! A 32-bit rolling hash (`h = h * 31 + unit`) over the UTF-16 code units of
//! `salt + input`, wrapped to a signed 32-bit integer at every step, with the
//! absolute value taken at the end. Buckets are that value mod 100.
//!
//! This is a distribution hash, not a cryptographic one. It must stay
//! bit-for-bit stable: changing it reshuffles every subject that has not yet
//! been persisted.

/// Number of buckets subjects are spread over.
pub const BUCKETS: u32 = 100;

/// Hash `salt + input`.
pub fn hash_string(input: &str, salt: &str) -> u32 {
    let mut hash: i32 = 0;
    for unit in salt.encode_utf16().chain(input.encode_utf16()) {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit));
    }
    // i32::MIN has no positive i32 counterpart but fits in u32
    hash.unsigned_abs()
}

/// Bucket in `[0, 100)` for `salt + input`.
pub fn bucket(input: &str, salt: &str) -> u32 {
    hash_string(input, salt) % BUCKETS
}

/// Bucket deciding whether a subject enters a test at all.
pub fn traffic_bucket(subject_id: &str, test_id: &str, salt: &str) -> u32 {
    bucket(&format!("{subject_id}-{test_id}-traffic"), salt)
}

/// Bucket deciding which variant a subject sees.
pub fn variant_bucket(subject_id: &str, test_id: &str, salt: &str) -> u32 {
    bucket(&format!("{subject_id}-{test_id}"), salt)
}
