//! Session token codec.
//!
//! A token is 36 bytes before transport encoding: bytes 0..8 carry the
//! user id (little endian), bytes 8..16 the expiry in nanoseconds since
//! the epoch (little endian), bytes 16..36 a SHA-1 over
//! `session-secret ‖ first-16-bytes`. A fixed byte permutation is then
//! applied so the token looks opaque on the wire, and the result is
//! base64-encoded. Verification applies the inverse permutation and
//! checks structure, expiry window, and MAC in that order.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::domain::entities::SESSION_SECRET_LEN;

pub const TOKEN_LEN: usize = 36;
const PAYLOAD_LEN: usize = 16;
const MAC_LEN: usize = 20;

/// Longest accepted expiry distance: 30 days in nanoseconds.
pub const MAX_TTL_NS: i64 = 30 * 24 * 60 * 60 * 1_000_000_000;

const SHUFFLE: [usize; TOKEN_LEN] = [
    17, 3, 28, 9, 33, 0, 21, 12, 25, 6, 31, 14, 1, 19, 35, 8, 23, 4, 27, 10, 34, 2, 16, 30, 7, 20,
    13, 29, 5, 24, 11, 32, 18, 26, 15, 22,
];

const UNSHUFFLE: [usize; TOKEN_LEN] = invert(SHUFFLE);

const fn invert(p: [usize; TOKEN_LEN]) -> [usize; TOKEN_LEN] {
    let mut inv = [0usize; TOKEN_LEN];
    let mut i = 0;
    while i < TOKEN_LEN {
        inv[p[i]] = i;
        i += 1;
    }
    inv
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token has expired")]
    Expired,
    #[error("token expiry is too far in the future")]
    TooFarInFuture,
    #[error("bad token")]
    BadMac,
}

/// A structurally valid token whose MAC has not been checked yet; the
/// session secret lives on the user record, which can only be looked
/// up after the id is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedToken {
    pub user_id: i64,
    pub expires_at_ns: i64,
    payload: [u8; PAYLOAD_LEN],
    mac: [u8; MAC_LEN],
}

impl DecodedToken {
    /// Constant-time MAC check against the user's current secret.
    pub fn verify(&self, secret: &[u8; SESSION_SECRET_LEN]) -> Result<(), TokenError> {
        let expected = compute_mac(secret, &self.payload);
        if expected.ct_eq(&self.mac).into() {
            Ok(())
        } else {
            Err(TokenError::BadMac)
        }
    }
}

fn compute_mac(secret: &[u8; SESSION_SECRET_LEN], payload: &[u8; PAYLOAD_LEN]) -> [u8; MAC_LEN] {
    let mut hasher = Sha1::new();
    hasher.update(secret);
    hasher.update(payload);
    hasher.finalize().into()
}

/// Build a transport token for `user_id` expiring at `expires_at_ns`.
pub fn issue(user_id: i64, expires_at_ns: i64, secret: &[u8; SESSION_SECRET_LEN]) -> String {
    let mut raw = [0u8; TOKEN_LEN];
    raw[..8].copy_from_slice(&user_id.to_le_bytes());
    raw[8..16].copy_from_slice(&expires_at_ns.to_le_bytes());
    let payload: [u8; PAYLOAD_LEN] = raw[..PAYLOAD_LEN].try_into().unwrap_or_default();
    raw[16..].copy_from_slice(&compute_mac(secret, &payload));

    let mut wire = [0u8; TOKEN_LEN];
    for (i, slot) in wire.iter_mut().enumerate() {
        *slot = raw[SHUFFLE[i]];
    }
    BASE64.encode(wire)
}

/// Decode and structurally validate a transport token. The check order
/// is fixed: shape, then expiry, then the 30-day window; the MAC check
/// follows separately once the secret is known.
pub fn decode(token: &str, now_ns: i64) -> Result<DecodedToken, TokenError> {
    let wire = BASE64.decode(token).map_err(|_| TokenError::Malformed)?;
    let wire: [u8; TOKEN_LEN] = wire.try_into().map_err(|_| TokenError::Malformed)?;

    let mut raw = [0u8; TOKEN_LEN];
    for (i, slot) in raw.iter_mut().enumerate() {
        *slot = wire[UNSHUFFLE[i]];
    }

    let user_id = i64::from_le_bytes(raw[..8].try_into().unwrap_or_default());
    let expires_at_ns = i64::from_le_bytes(raw[8..16].try_into().unwrap_or_default());
    let payload: [u8; PAYLOAD_LEN] = raw[..PAYLOAD_LEN].try_into().unwrap_or_default();
    let mac: [u8; MAC_LEN] = raw[16..].try_into().unwrap_or_default();

    if user_id <= 0 {
        return Err(TokenError::Malformed);
    }
    if expires_at_ns < now_ns {
        return Err(TokenError::Expired);
    }
    if expires_at_ns > now_ns.saturating_add(MAX_TTL_NS) {
        return Err(TokenError::TooFarInFuture);
    }

    Ok(DecodedToken {
        user_id,
        expires_at_ns,
        payload,
        mac,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: [u8; SESSION_SECRET_LEN] = [7u8; SESSION_SECRET_LEN];
    const NOW_NS: i64 = 1_750_000_000_000_000_000;

    #[test]
    fn shuffle_is_a_permutation() {
        let mut seen = [false; TOKEN_LEN];
        for &i in &SHUFFLE {
            assert!(!seen[i]);
            seen[i] = true;
        }
        for (i, &inv) in UNSHUFFLE.iter().enumerate() {
            assert_eq!(SHUFFLE[inv], i);
        }
    }

    #[test]
    fn issue_then_decode_round_trips() {
        let token = issue(42, NOW_NS + 1_000_000_000, &SECRET);
        let decoded = decode(&token, NOW_NS).expect("decode");
        assert_eq!(decoded.user_id, 42);
        assert_eq!(decoded.expires_at_ns, NOW_NS + 1_000_000_000);
        decoded.verify(&SECRET).expect("mac");
    }

    #[test]
    fn wrong_secret_fails_mac() {
        let token = issue(42, NOW_NS + 1_000_000_000, &SECRET);
        let decoded = decode(&token, NOW_NS).expect("decode");
        let other = [9u8; SESSION_SECRET_LEN];
        assert_eq!(decoded.verify(&other), Err(TokenError::BadMac));
    }

    #[test]
    fn tampered_byte_fails_mac() {
        let token = issue(42, NOW_NS + 1_000_000_000, &SECRET);
        let mut wire = BASE64.decode(&token).expect("b64");
        // Flip a bit in the scrambled user-id region.
        wire[5] ^= 0x01;
        let tampered = BASE64.encode(&wire);
        match decode(&tampered, NOW_NS) {
            Ok(decoded) => assert_eq!(decoded.verify(&SECRET), Err(TokenError::BadMac)),
            // Structural checks may trip first depending on which byte
            // the flip landed on after unshuffling.
            Err(err) => assert_ne!(err, TokenError::BadMac),
        }
    }

    #[test]
    fn expired_token_is_rejected_before_mac() {
        let token = issue(42, NOW_NS - 1, &SECRET);
        assert_eq!(decode(&token, NOW_NS), Err(TokenError::Expired));
    }

    #[test]
    fn expiry_beyond_thirty_days_is_rejected() {
        let token = issue(42, NOW_NS + MAX_TTL_NS + 1, &SECRET);
        assert_eq!(decode(&token, NOW_NS), Err(TokenError::TooFarInFuture));
    }

    #[test]
    fn garbage_is_malformed() {
        assert_eq!(decode("not base64 !!!", NOW_NS), Err(TokenError::Malformed));
        assert_eq!(
            decode(&BASE64.encode([0u8; 12]), NOW_NS),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn wire_form_differs_from_raw_layout() {
        let token = issue(1, NOW_NS + 1_000_000_000, &SECRET);
        let wire = BASE64.decode(&token).expect("b64");
        // Raw layout would start with the little-endian user id.
        assert_ne!(&wire[..8], &1i64.to_le_bytes());
    }
}
