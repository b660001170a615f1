//! Unguessable token generation.
//!
//! Session ids double as CSRF capability tokens, so they must come from the
//! operating system's entropy source, never from a seedable PRNG.

/// Generates an unguessable token of `bytes` random bytes, hex encoded.
///
/// Used for session ids, tracking cookies, and the random initial ack and
/// script ids that tie an ajax page to its session.
#[must_use]
pub fn generate_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    getrandom::getrandom(&mut buf).expect("failed to read system entropy");
    let mut out = String::with_capacity(bytes * 2);
    for b in buf {
        use std::fmt::Write;
        write!(out, "{b:02x}").expect("writing to string cannot fail");
    }
    out
}

/// Generates a random `u32`, used to seed update and script id counters.
#[must_use]
pub fn random_u32() -> u32 {
    let mut buf = [0u8; 4];
    getrandom::getrandom(&mut buf).expect("failed to read system entropy");
    u32::from_le_bytes(buf)
}
