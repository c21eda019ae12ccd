//! `X-Hub-Signature-256` webhook signature verification.
//!
//! The platform signs every event delivery with HMAC-SHA256 over the raw
//! request body, keyed by the app secret, and sends it as
//! `X-Hub-Signature-256: sha256=<hex>`.
//!
//! The digest must be computed over the exact bytes received. Parsing and
//! re-serializing the JSON first changes the bytes and breaks the signature.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::{Choice, ConstantTimeEq};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Required prefix of the signature header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Verify an `X-Hub-Signature-256` header value against a raw body.
///
/// Returns `false` when the secret is empty, the header lacks the `sha256=`
/// prefix, or the digests differ. The received hex is lowercased before the
/// comparison, which runs in constant time.
///
/// Every path computes the MAC and folds the checks together as
/// [`Choice`] values, so a missing prefix costs the same as a wrong digest.
pub fn verify_hub_signature(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let expected = hex::encode(compute_mac(secret, body));

    let (has_prefix, given) = match signature_header.strip_prefix(SIGNATURE_PREFIX) {
        Some(rest) => (Choice::from(1), rest),
        None => (Choice::from(0), signature_header),
    };
    let given = given.to_ascii_lowercase();

    let has_secret = Choice::from(u8::from(!secret.is_empty()));
    let digest_matches = expected.as_bytes().ct_eq(given.as_bytes());

    (has_secret & has_prefix & digest_matches).into()
}

/// Produce the `sha256=<hex>` header value for a body.
pub fn sign_hub_payload(secret: &str, body: &[u8]) -> String {
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(compute_mac(secret, body)))
}

fn compute_mac(secret: &str, body: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}
