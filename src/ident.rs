//! Identifier generation for `generate:` schema fields.

use rand::Rng;

/// Crockford base32 alphabet, shared with the ULID encoding.
const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Default length of a `uid` identifier.
pub const UID_LEN: usize = 10;

/// Generate a ULID for the current time: 26 Crockford base32 characters,
/// 10 of timestamp and 16 of randomness. Monotonicity within a single
/// millisecond is not guaranteed across calls.
pub fn ulid() -> String {
    ulid::Ulid::new().to_string()
}

/// Generate `len` characters of cryptographically random base32.
pub fn uid(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Parse a `generate` attribute value: `ulid`, `uid` or `uid(N)`.
/// Returns None for anything unrecognized.
pub(crate) fn generate(spec: &str) -> Option<String> {
    if spec == "ulid" {
        return Some(ulid());
    }
    if spec == "uid" {
        return Some(uid(UID_LEN));
    }
    if let Some(rest) = spec.strip_prefix("uid(") {
        let n: usize = rest.strip_suffix(')')?.trim().parse().ok()?;
        return Some(uid(n));
    }
    None
}
