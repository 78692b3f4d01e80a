//! Bearer token verification
//!
//! Tokens are minted by the patient auth service; this service only checks
//! them. The subject is the patient id used for rate limiting and tracking.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Patient id
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),

    #[error("token subject is empty")]
    EmptySubject,

    #[error("token lifetime {lifetime}s exceeds {max}s")]
    LifetimeTooLong { lifetime: i64, max: i64 },
}

pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
    max_lifetime_secs: i64,
}

impl TokenVerifier {
    pub fn new(secret: &str, max_lifetime_secs: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            max_lifetime_secs,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = decode::<Claims>(token, &self.key, &self.validation)?.claims;

        if claims.sub.trim().is_empty() {
            return Err(TokenError::EmptySubject);
        }
        if let Some(iat) = claims.iat {
            let lifetime = claims.exp - iat;
            if lifetime > self.max_lifetime_secs {
                return Err(TokenError::LifetimeTooLong {
                    lifetime,
                    max: self.max_lifetime_secs,
                });
            }
        }
        Ok(claims)
    }
}

/// HS256 token for `sub`, valid from now for `lifetime_secs`
#[cfg(test)]
pub fn issue_token(secret: &str, sub: &str, lifetime_secs: i64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: sub.to_string(),
        exp: now + lifetime_secs,
        iat: Some(now),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_token_yields_patient_id() {
        let token = issue_token("test_secret", "patient-42", 600);
        let claims = TokenVerifier::new("test_secret", 1800).verify(&token).unwrap();

        assert_eq!(claims.sub, "patient-42");
        assert!(claims.exp > claims.iat.unwrap());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = issue_token("secret-a", "patient-42", 600);
        assert!(matches!(
            TokenVerifier::new("secret-b", 1800).verify(&token),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        // Beyond the default 60s leeway
        let token = issue_token("test_secret", "patient-42", -3600);
        assert!(TokenVerifier::new("test_secret", 1800).verify(&token).is_err());
    }

    #[test]
    fn test_overlong_lifetime_rejected() {
        let token = issue_token("test_secret", "patient-42", 7200);
        assert!(matches!(
            TokenVerifier::new("test_secret", 1800).verify(&token),
            Err(TokenError::LifetimeTooLong { lifetime: 7200, max: 1800 })
        ));
    }

    #[test]
    fn test_blank_subject_rejected() {
        let token = issue_token("test_secret", "  ", 600);
        assert!(matches!(
            TokenVerifier::new("test_secret", 1800).verify(&token),
            Err(TokenError::EmptySubject)
        ));
    }
}
