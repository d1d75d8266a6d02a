//! Webhook signature verification

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// Fixed key used to compare plain tokens through a MAC
const TOKEN_COMPARE_KEY: &[u8] = b"hostengine/webhook-token";

/// Digest algorithms accepted in an `algorithm=hexdigest` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Sha1,
    Sha256,
}

impl std::str::FromStr for SignatureAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha1" => Ok(SignatureAlgorithm::Sha1),
            "sha256" => Ok(SignatureAlgorithm::Sha256),
            _ => Err(format!("Unsupported signature algorithm: {}", s)),
        }
    }
}

/// Verify an `algorithm=hexdigest` signature over the raw request body.
///
/// Fails closed on a missing header, a header without exactly one `=`, an
/// unknown algorithm or a digest that is not valid hex.
pub fn verify(signature_header: Option<&str>, payload: &[u8], secret: &str) -> bool {
    let Some(header) = signature_header else {
        return false;
    };

    let parts: Vec<&str> = header.trim().split('=').collect();
    let [algorithm, digest] = parts.as_slice() else {
        return false;
    };

    let Ok(algorithm) = algorithm.parse::<SignatureAlgorithm>() else {
        return false;
    };
    let Ok(provided) = hex::decode(digest) else {
        return false;
    };

    match algorithm {
        SignatureAlgorithm::Sha1 => match HmacSha1::new_from_slice(secret.as_bytes()) {
            Ok(mut mac) => {
                mac.update(payload);
                mac.verify_slice(&provided).is_ok()
            }
            Err(_) => false,
        },
        SignatureAlgorithm::Sha256 => match HmacSha256::new_from_slice(secret.as_bytes()) {
            Ok(mut mac) => {
                mac.update(payload);
                mac.verify_slice(&provided).is_ok()
            }
            Err(_) => false,
        },
    }
}

/// Compare a plain shared token (GitLab's `X-Gitlab-Token`) in constant time
pub fn verify_token(token_header: Option<&str>, secret: &str) -> bool {
    let Some(token) = token_header else {
        return false;
    };

    let Ok(mut expected) = HmacSha256::new_from_slice(TOKEN_COMPARE_KEY) else {
        return false;
    };
    expected.update(secret.as_bytes());
    let expected = expected.finalize().into_bytes();

    let Ok(mut provided) = HmacSha256::new_from_slice(TOKEN_COMPARE_KEY) else {
        return false;
    };
    provided.update(token.as_bytes());
    provided.verify_slice(&expected).is_ok()
}
