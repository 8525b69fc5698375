//! Private key decoding and public key fingerprints
//!
//! Snowflake identifies the signing key by the SHA-256 digest of the DER encoded
//! SubjectPublicKeyInfo, base64 encoded with the *standard* alphabet and padding.
//! Any other encoding produces a token that is rejected with a generic "JWT token is invalid".
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey};
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};

use crate::config::Credentials;
use crate::errors::{GatewayError, GatewayResult};

/// Decode a base64 PKCS#8 blob, ignoring any embedded whitespace or line breaks
pub fn decode_private_key(blob: &str) -> GatewayResult<Vec<u8>> {
    let compact: String = blob.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| GatewayError::KeyDecode(format!("private key is not valid base64: {e}")))
}

/// Parse PKCS#8 DER bytes as an unencrypted RSA private key
pub fn import_private_key(der: &[u8]) -> GatewayResult<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_der(der).map_err(|e| {
        GatewayError::KeyDecode(format!("private key is not an unencrypted PKCS#8 RSA key: {e}"))
    })
}

/// `SHA256:<base64>` of the public half of `key`
pub fn public_key_fingerprint(key: &RsaPrivateKey) -> GatewayResult<String> {
    let spki = key.to_public_key().to_public_key_der().map_err(|e| {
        GatewayError::KeyDecode(format!("public key could not be encoded as DER: {e}"))
    })?;
    let digest = Sha256::digest(spki.as_bytes());
    Ok(format!("SHA256:{}", STANDARD.encode(digest)))
}

/// Where a fingerprint came from, for diagnosing mismatches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintSource {
    Configured,
    Derived,
}

/// Use the configured fingerprint verbatim, or derive it from the key
pub fn resolve_fingerprint(
    credentials: &Credentials,
    key: &RsaPrivateKey,
) -> GatewayResult<(String, FingerprintSource)> {
    let resolved = match &credentials.fingerprint {
        Some(fingerprint) => (fingerprint.clone(), FingerprintSource::Configured),
        None => (public_key_fingerprint(key)?, FingerprintSource::Derived),
    };
    log::debug!(
        "Public key fingerprint ({:?}): {}",
        resolved.1,
        resolved.0
    );
    Ok(resolved)
}
