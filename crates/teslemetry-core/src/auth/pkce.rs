// PKCE (RFC 7636) verifier/challenge generation, S256 method only.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};

const VERIFIER_BYTES: usize = 32;

/// A freshly generated verifier and its S256 challenge.
///
/// Ephemeral: handed to the caller, never stored by the token manager.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub code_verifier: String,
    pub code_challenge: String,
}

/// 32 CSPRNG bytes, base64url without padding (43 characters).
pub fn generate() -> PkceChallenge {
    let mut bytes = [0u8; VERIFIER_BYTES];
    rand::rng().fill_bytes(&mut bytes);

    let code_verifier = URL_SAFE_NO_PAD.encode(bytes);
    let code_challenge = challenge_for(&code_verifier);
    PkceChallenge {
        code_verifier,
        code_challenge,
    }
}

/// `base64url(SHA-256(verifier))`, no padding.
pub fn challenge_for(code_verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc7636_appendix_b_vector() {
        assert_eq!(
            challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn generated_pair_is_consistent_and_url_safe() {
        let pkce = generate();
        assert_eq!(pkce.code_verifier.len(), 43);
        assert_eq!(pkce.code_challenge, challenge_for(&pkce.code_verifier));
        assert!(
            pkce.code_verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn verifiers_are_not_reused() {
        assert_ne!(generate().code_verifier, generate().code_verifier);
    }
}
