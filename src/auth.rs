//! Constant-time bearer token validation.
//!
//! Every protected route (all but `/health`) funnels its `Authorization`
//! header through [`check_bearer`]. Comparison is constant-time on the
//! SHA-256 digest of the presented token rather than the token itself:
//! `subtle::ConstantTimeEq` prevents the optimizer from short-circuiting
//! the comparison the way it could with `==` on raw bytes.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const BEARER_PREFIX: &str = "Bearer ";

/// Validate an `Authorization` header value against a configured bearer token.
///
/// Returns `true` when no token is configured (auth disabled), when the
/// header is a well-formed `Bearer <token>` value whose digest matches the
/// configured token's digest, and `false` otherwise.
pub fn check_bearer(configured_token: Option<&str>, header_value: Option<&str>) -> bool {
    let Some(expected) = configured_token else {
        return true;
    };

    let Some(header_value) = header_value else {
        return false;
    };

    let Some(presented) = header_value.strip_prefix(BEARER_PREFIX) else {
        return false;
    };

    let expected_digest = Sha256::digest(expected.as_bytes());
    let presented_digest = Sha256::digest(presented.as_bytes());

    expected_digest.ct_eq(&presented_digest).into()
}
