pub use jwt_simple::algorithms::RS256KeyPair;

use chrono::{DateTime, Utc};
use jwt_simple::prelude::{Claims, Duration, RSAKeyPairLike};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::RsaPrivateKey;

use crate::errors::{GatewayError, GatewayResult};

/// Tokens are valid for one hour from issue
pub const TOKEN_LIFETIME_SECS: u64 = 3600;

/// `ACCOUNT.USER`, the subject Snowflake expects
pub fn qualified_username(account: &str, user: &str) -> String {
    format!(
        "{}.{}",
        account.to_ascii_uppercase(),
        user.to_ascii_uppercase()
    )
}

/// Load the signing key pair from an already validated RSA key
pub fn key_pair(key: &RsaPrivateKey) -> GatewayResult<RS256KeyPair> {
    let der = key
        .to_pkcs1_der()
        .map_err(|e| GatewayError::KeyDecode(e.to_string()))?;
    Ok(RS256KeyPair::from_der(der.as_bytes())?)
}

/// Mint a key-pair JWT for `account`/`user`, signed RS256 with `key_pair`
///
/// The token is returned exactly as Snowflake needs to see it: base64url segments
/// without padding, joined by dots. Callers must not re-encode it.
pub fn create_token(
    key_pair: &RS256KeyPair,
    account: &str,
    user: &str,
    fingerprint: &str,
    issued_at: DateTime<Utc>,
) -> GatewayResult<String> {
    let qualified_username = qualified_username(account, user);
    let issuer = format!("{qualified_username}.{fingerprint}");
    let iat = u64::try_from(issued_at.timestamp()).unwrap_or_default();

    let mut claims = Claims::create(Duration::from_secs(TOKEN_LIFETIME_SECS))
        .with_issuer(issuer)
        .with_subject(qualified_username);
    claims.issued_at = Some(Duration::from_secs(iat));
    claims.expires_at = Some(Duration::from_secs(iat + TOKEN_LIFETIME_SECS));
    claims.invalid_before = None;
    log::info!("Minting JWT with issuer {}", claims.issuer.as_deref().unwrap_or_default());
    log::debug!("Claims: {:?}", claims);
    Ok(key_pair.sign(claims)?)
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use chrono::TimeZone;
    use jwt_simple::prelude::{NoCustomClaims, RS256PublicKey, RSAPublicKeyLike};

    use super::*;
    use crate::key::{decode_private_key, import_private_key, public_key_fingerprint};

    const KEY: &str = include_str!("../testdata/rsa_key.p8.b64");
    const PUBLIC_KEY: &str = include_str!("../testdata/rsa_key.pub.pem");

    fn test_key() -> RsaPrivateKey {
        import_private_key(&decode_private_key(KEY).unwrap()).unwrap()
    }

    fn test_key_pair() -> RS256KeyPair {
        key_pair(&test_key()).unwrap()
    }

    fn decode_segment(segment: &str) -> serde_json::Value {
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segment).unwrap()).unwrap()
    }

    #[test]
    fn verify_jwt() -> GatewayResult<()> {
        let fingerprint = public_key_fingerprint(&test_key())?;
        let token = create_token(&test_key_pair(), "xy12345", "analyst", &fingerprint, Utc::now())?;

        let public_key = RS256PublicKey::from_pem(PUBLIC_KEY).unwrap();
        let verified = public_key
            .verify_token::<NoCustomClaims>(&token, None)
            .unwrap();
        assert_eq!(
            verified.issuer.as_deref(),
            Some(format!("XY12345.ANALYST.{fingerprint}").as_str())
        );
        assert_eq!(verified.subject.as_deref(), Some("XY12345.ANALYST"));
        let iat = verified.issued_at.unwrap().as_secs();
        let exp = verified.expires_at.unwrap().as_secs();
        assert_eq!(exp - iat, 3600);
        Ok(())
    }

    #[test]
    fn claims_layout() -> GatewayResult<()> {
        let issued_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let token = create_token(
            &test_key_pair(),
            "Org-Acct.eu-west-1",
            "Dashboard_User",
            "SHA256:abc+/def=",
            issued_at,
        )?;
        let segments: Vec<&str> = token.split('.').collect();
        assert_eq!(segments.len(), 3);

        let header = decode_segment(segments[0]);
        assert_eq!(header, serde_json::json!({"alg": "RS256", "typ": "JWT"}));

        let claims = decode_segment(segments[1]);
        assert_eq!(
            claims["iss"],
            "ORG-ACCT.EU-WEST-1.DASHBOARD_USER.SHA256:abc+/def="
        );
        assert_eq!(claims["sub"], "ORG-ACCT.EU-WEST-1.DASHBOARD_USER");
        assert_eq!(claims["iat"].as_i64(), Some(issued_at.timestamp()));
        assert_eq!(
            claims["exp"].as_i64(),
            Some(issued_at.timestamp() + 3600)
        );
        assert!(claims.get("nbf").is_none());
        Ok(())
    }

    #[test]
    fn segments_are_base64url_without_padding() -> GatewayResult<()> {
        let key = test_key_pair();
        // fingerprints with '+' and '/' push those bytes through the payload encoding
        for fingerprint in ["SHA256:+++///==", "SHA256:~~~???>>>", "SHA256:plain"] {
            let token = create_token(&key, "acct", "user", fingerprint, Utc::now())?;
            assert!(!token.contains('+'));
            assert!(!token.contains('/'));
            assert!(!token.contains('='));
            assert!(token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'));
        }
        Ok(())
    }

    #[test]
    fn tokens_are_not_reused() -> GatewayResult<()> {
        let key = test_key_pair();
        let first = create_token(
            &key,
            "acct",
            "user",
            "SHA256:x",
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        )?;
        let second = create_token(
            &key,
            "acct",
            "user",
            "SHA256:x",
            Utc.timestamp_opt(1_700_000_001, 0).unwrap(),
        )?;
        assert_ne!(first, second);
        Ok(())
    }
}
