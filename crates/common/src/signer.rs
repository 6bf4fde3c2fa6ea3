//! HMAC-SHA256 signing over canonical strings.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::canonical::CanonicalString;
use crate::constants::SIGNATURE_HEX_LEN;

type HmacSha256 = Hmac<Sha256>;

fn mac_for(canonical: &CanonicalString, secret: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(canonical.as_bytes());
    mac
}

/// Signs a canonical string, returning the lowercase hex digest.
#[must_use]
pub fn sign(canonical: &CanonicalString, secret: &[u8]) -> String {
    hex::encode(mac_for(canonical, secret).finalize().into_bytes())
}

/// Checks a candidate signature in constant time.
///
/// Only the wire form is accepted: exactly 64 lowercase hex characters.
#[must_use]
pub fn verify(canonical: &CanonicalString, secret: &[u8], candidate: &str) -> bool {
    if candidate.len() != SIGNATURE_HEX_LEN
        || !candidate
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return false;
    }

    let Ok(candidate_bytes) = hex::decode(candidate) else {
        return false;
    };

    mac_for(canonical, secret)
        .verify_slice(&candidate_bytes)
        .is_ok()
}
