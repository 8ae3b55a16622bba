use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashSet;

use super::error::AuthError;

/// The only claim the collector reads from access tokens.
#[derive(Debug, Deserialize)]
struct ExpiryClaims {
    exp: i64,
}

/// Expiry instant of an access token issued by the OAM API.
///
/// The collector is a token bearer, not a verifier: the signature is not
/// checked, only the `exp` claim is read.
pub fn access_token_expiry(access_token: &str) -> Result<DateTime<Utc>, AuthError> {
    let header = decode_header(access_token)?;

    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    let data = decode::<ExpiryClaims>(access_token, &DecodingKey::from_secret(&[]), &validation)?;

    DateTime::from_timestamp(data.claims.exp, 0)
        .ok_or_else(|| AuthError::Decode(format!("exp claim out of range: {}", data.claims.exp)))
}

#[cfg(test)]
pub(crate) fn mint_token(exp: DateTime<Utc>) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};
    encode(
        &Header::default(),
        &serde_json::json!({ "sub": "collector", "exp": exp.timestamp() }),
        &EncodingKey::from_secret(b"test-secret"),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_reads_exp_claim() {
        let exp = DateTime::from_timestamp(Utc::now().timestamp() + 3600, 0).unwrap();
        assert_eq!(access_token_expiry(&mint_token(exp)).unwrap(), exp);
    }

    #[test]
    fn test_expired_token_still_decodes() {
        let exp = DateTime::from_timestamp((Utc::now() - Duration::hours(2)).timestamp(), 0).unwrap();
        assert_eq!(access_token_expiry(&mint_token(exp)).unwrap(), exp);
    }

    #[test]
    fn test_garbage_token_is_rejected() {
        assert!(matches!(
            access_token_expiry("not-a-jwt"),
            Err(AuthError::InvalidToken(_))
        ));
    }
}
