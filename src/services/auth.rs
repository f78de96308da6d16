use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::IdentityValidator;

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

/// JWT-backed identity validator. The identity service issues HS256 tokens
/// carrying the user id in `sub`; this side only verifies.
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl IdentityValidator for JwtValidator {
    async fn validate(&self, token: &str) -> AppResult<Uuid> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| AppError::Auth(e.to_string()))?;
        Uuid::parse_str(&data.claims.sub)
            .map_err(|_| AppError::Auth("subject is not a user id".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        exp: usize,
    }

    fn token(secret: &str, sub: &str, exp: usize) -> String {
        encode(
            &Header::default(),
            &TestClaims {
                sub: sub.to_string(),
                exp,
            },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn accepts_valid_token_and_returns_subject() {
        let user = Uuid::new_v4();
        let validator = JwtValidator::new("secret");
        let token = token("secret", &user.to_string(), usize::MAX / 2);
        assert_eq!(validator.validate(&token).await.unwrap(), user);
    }

    #[tokio::test]
    async fn rejects_wrong_secret_and_garbage_subject() {
        let validator = JwtValidator::new("secret");

        let forged = token("other-secret", &Uuid::new_v4().to_string(), usize::MAX / 2);
        assert!(matches!(
            validator.validate(&forged).await.unwrap_err(),
            AppError::Auth(_)
        ));

        let no_uuid = token("secret", "not-a-uuid", usize::MAX / 2);
        assert!(matches!(
            validator.validate(&no_uuid).await.unwrap_err(),
            AppError::Auth(_)
        ));
    }

    #[tokio::test]
    async fn rejects_expired_token() {
        let validator = JwtValidator::new("secret");
        let expired = token("secret", &Uuid::new_v4().to_string(), 1);
        assert!(matches!(
            validator.validate(&expired).await.unwrap_err(),
            AppError::Auth(_)
        ));
    }
}
