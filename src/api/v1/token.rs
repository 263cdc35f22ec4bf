use bson::oid::ObjectId;
use jsonwebtoken::TokenData;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::{config::Config, error::Error, util::ObjectIdString};

#[derive(Clone)]
pub struct JwtState {
    validation: jsonwebtoken::Validation,
    header: jsonwebtoken::Header,

    encoding_key: jsonwebtoken::EncodingKey,
    decoding_key: jsonwebtoken::DecodingKey,

    token_ttl: Duration,
}

impl JwtState {
    pub fn new(secret: &str, token_ttl: Duration) -> Self {
        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256);

        // Expiry is checked explicitly through `SessionTokenClaims::is_expired`
        // so an expired token stays distinguishable from a malformed one.
        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.validate_exp = false;

        Self {
            header,
            validation,

            encoding_key: jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: jsonwebtoken::DecodingKey::from_secret(secret.as_bytes()),

            token_ttl,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.jwt_secret, config.token_ttl)
    }
}

pub fn current_timestamp() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Stateless proof of identity: nothing is stored server side, so a token
/// stays valid until `exp` regardless of any later logout.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionTokenClaims {
    pub sub: ObjectIdString,
    pub iat: i64,
    pub exp: i64,
}

impl SessionTokenClaims {
    pub fn is_expired(&self) -> bool {
        self.exp < current_timestamp().unix_timestamp()
    }
}

pub fn issue_session_token(jwt_state: &JwtState, user_id: ObjectId) -> Result<String, Error> {
    let expired_at = current_timestamp() + jwt_state.token_ttl;

    issue_session_token_with_exp(jwt_state, user_id, expired_at.unix_timestamp())
}

pub fn issue_session_token_with_exp(
    jwt_state: &JwtState,
    user_id: ObjectId,
    exp: i64,
) -> Result<String, Error> {
    let claims = SessionTokenClaims {
        sub: user_id.into(),
        iat: current_timestamp().unix_timestamp(),
        exp,
    };

    jsonwebtoken::encode(&jwt_state.header, &claims, &jwt_state.encoding_key).map_err(Into::into)
}

pub fn decode_session_token(
    jwt_state: &JwtState,
    token: &str,
) -> Result<TokenData<SessionTokenClaims>, jsonwebtoken::errors::Error> {
    jsonwebtoken::decode(token, &jwt_state.decoding_key, &jwt_state.validation)
}
