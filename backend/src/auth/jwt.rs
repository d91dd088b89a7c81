use super::models::Claims;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("JWT decoding error: {0}")]
    Decoding(String),
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
    #[error("Token carries no user identity")]
    MissingIdentity,
}

#[derive(Clone)]
pub struct JwtService {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Tokens issued by the account service carry no `exp`; it is only
        // enforced when present.
        validation.required_spec_claims.clear();
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, JwtError> {
        if token.is_empty() || token.split('.').count() != 3 {
            return Err(JwtError::InvalidToken);
        }

        match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(token_data) => {
                log::debug!(
                    "JWT token decoded successfully. User: {:?}, Exp: {:?}",
                    token_data.claims.identity(),
                    token_data.claims.exp
                );
                Ok(token_data.claims)
            }
            Err(err) => {
                log::debug!("JWT token decode error: {:?}", err);
                match err.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                        Err(JwtError::TokenExpired)
                    }
                    jsonwebtoken::errors::ErrorKind::InvalidToken
                    | jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        Err(JwtError::InvalidToken)
                    }
                    _ => Err(JwtError::Decoding(err.to_string())),
                }
            }
        }
    }

    pub fn caller_identity(&self, token: &str) -> Result<String, JwtError> {
        let claims = self.verify_token(token)?;
        claims
            .identity()
            .map(str::to_string)
            .ok_or(JwtError::MissingIdentity)
    }
}
