//! GitHub webhook signature verification using HMAC-SHA1.
//!
//! GitHub signs webhook payloads using HMAC-SHA1 with a shared secret.
//! The signature is provided in the `X-Hub-Signature` header as `sha1=<hex>`.
//!
//! Verification must run on the raw request body. A body that has been
//! parsed and re-serialized will not produce the same digest.

use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Prefix GitHub puts in front of the hex digest.
pub const SIGNATURE_PREFIX: &str = "sha1=";

/// Parses a GitHub signature header (e.g., "sha1=abc123...") into raw bytes.
///
/// Returns `None` for malformed headers (missing prefix, invalid hex, etc.).
/// Never panics.
///
/// # Examples
///
/// ```
/// use gtm_agent::webhooks::parse_signature_header;
///
/// assert!(parse_signature_header("sha1=abcd1234").is_some());
/// assert!(parse_signature_header("abcd1234").is_none());
/// assert!(parse_signature_header("sha256=abcd1234").is_none());
/// assert!(parse_signature_header("sha1=xyz").is_none());
/// ```
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.strip_prefix(SIGNATURE_PREFIX)?;
    hex::decode(hex_sig).ok()
}

/// Computes the HMAC-SHA1 signature of a payload using the given secret.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha1::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Formats a signature as a GitHub-style header value: `sha1=<lowercase hex>`.
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(signature))
}

/// Signs a request body the way GitHub does, returning the header value.
pub fn sign_request_body(secret: &[u8], body: &[u8]) -> String {
    format_signature_header(&compute_signature(body, secret))
}

/// Verifies a GitHub webhook signature against the payload and secret.
///
/// The header must be exactly `sha1=` followed by the lowercase hex digest of
/// the payload; this is the byte-for-byte equality GitHub's own tooling uses.
/// The digest comparison itself is constant-time.
///
/// # Examples
///
/// ```
/// use gtm_agent::webhooks::{verify_signature, sign_request_body};
///
/// let payload = b"Hello, World!";
/// let header = sign_request_body(b"my-secret-key", payload);
///
/// assert!(verify_signature(payload, &header, b"my-secret-key"));
/// assert!(!verify_signature(payload, &header, b"wrong-secret"));
/// ```
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let expected_signature = match parse_signature_header(signature_header) {
        Some(sig) => sig,
        None => return false,
    };

    // Uppercase hex decodes to the same bytes but is not what GitHub sends.
    if format_signature_header(&expected_signature) != signature_header {
        return false;
    }

    let mut mac = match HmacSha1::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);

    mac.verify_slice(&expected_signature).is_ok()
}
