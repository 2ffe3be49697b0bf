use jsonwebtoken::{DecodingKey, Validation, decode};
use uuid::Uuid;

use kindred_types::api::Claims;

use crate::error::RealtimeError;

/// Validates a bearer token and returns the user id it was issued for.
pub fn verify_token(jwt_secret: &str, token: &str) -> Result<Uuid, RealtimeError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims.sub)
    .map_err(|_| RealtimeError::Unauthenticated)
}

#[cfg(test)]
pub(crate) fn issue_token(jwt_secret: &str, user_id: Uuid) -> String {
    use jsonwebtoken::{EncodingKey, Header, encode};

    let claims = Claims {
        sub: user_id,
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(jwt_secret.as_bytes()))
        .expect("token encodes")
}
