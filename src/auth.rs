//! Caller identity: password hashing, token issuance and the request extractor.
//!
//! Access and refresh tokens are HS256 JWTs carrying the user id in `sub`
//! and their kind in `token_type`, so a refresh token is never accepted as
//! an access token or the other way round. Logout records the refresh
//! token's `jti` until it would have expired.

use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts, HeaderMap};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::db::{now, Constraint, Repo, StoreError, User};

pub const REFRESH_COOKIE: &str = "refresh_token";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("username and password are required")]
    MissingCredentials,
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("authentication credentials were not provided")]
    MissingToken,
    #[error("token is invalid or expired")]
    InvalidToken,
    #[error("too many login attempts, try again later")]
    TooManyAttempts,
    #[error("{0}")]
    InvalidInput(String),
    #[error("username '{0}' is already taken")]
    UsernameTaken(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("token encoding failed: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub jti: String,
    pub token_type: TokenKind,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

/// False for a wrong password and for a stored hash that does not parse.
pub fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

pub fn register_user(repo: &Repo, username: &str, email: &str, password: &str) -> Result<User, AuthError> {
    let username = username.trim();
    if username.is_empty() || username.chars().count() > 150 {
        return Err(AuthError::InvalidInput("username must be 1 to 150 characters".to_string()));
    }
    if password.is_empty() {
        return Err(AuthError::InvalidInput("password must not be empty".to_string()));
    }
    if repo.get_user_by_username(username)?.is_some() {
        return Err(AuthError::UsernameTaken(username.to_string()));
    }
    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        username: username.to_string(),
        email: email.trim().to_string(),
        password_hash: hash_password(password)?,
        created_at: now(),
    };
    repo.insert_user(&user).map_err(|e| match e {
        StoreError::Unique(Constraint::Username) => AuthError::UsernameTaken(user.username.clone()),
        other => other.into(),
    })?;
    tracing::info!(user = %user.id, username = %user.username, "user registered");
    Ok(user)
}

/// Check a username/password pair. Blank input is `MissingCredentials`;
/// an unknown user and a wrong password are both `InvalidCredentials`.
pub fn authenticate(repo: &Repo, username: Option<&str>, password: Option<&str>) -> Result<User, AuthError> {
    let (Some(username), Some(password)) = (
        username.filter(|s| !s.is_empty()),
        password.filter(|s| !s.is_empty()),
    ) else {
        return Err(AuthError::MissingCredentials);
    };
    match repo.get_user_by_username(username)? {
        Some(user) if verify_password(password, &user.password_hash) => Ok(user),
        _ => Err(AuthError::InvalidCredentials),
    }
}

pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtKeys {
    pub fn new(secret: &[u8], access_minutes: i64, refresh_days: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            access_ttl: Duration::minutes(access_minutes),
            refresh_ttl: Duration::days(refresh_days),
        }
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn issue(&self, user: &User, kind: TokenKind) -> Result<String, AuthError> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let iat = Utc::now();
        let claims = Claims {
            sub: user.id.clone(),
            username: user.username.clone(),
            jti: uuid::Uuid::new_v4().simple().to_string(),
            token_type: kind,
            iat: iat.timestamp(),
            exp: (iat + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(AuthError::Encode)
    }

    pub fn issue_pair(&self, user: &User) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access: self.issue(user, TokenKind::Access)?,
            refresh: self.issue(user, TokenKind::Refresh)?,
        })
    }

    /// Signature, expiry and kind. Revocation is checked by the caller.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map_err(|e| {
                tracing::debug!(error = %e, "token rejected");
                AuthError::InvalidToken
            })?;
        if data.claims.token_type != expected {
            return Err(AuthError::InvalidToken);
        }
        Ok(data.claims)
    }
}

/// Verify a refresh token and make sure logout has not revoked it.
pub fn check_refresh(repo: &Repo, keys: &JwtKeys, token: &str) -> Result<Claims, AuthError> {
    let claims = keys.verify(token, TokenKind::Refresh)?;
    if repo.is_token_revoked(&claims.jti)? {
        return Err(AuthError::InvalidToken);
    }
    Ok(claims)
}

/// Revoke `owner`'s refresh token. Tokens that no longer verify, or that
/// belong to someone else, are left alone.
pub fn revoke_refresh(repo: &Repo, keys: &JwtKeys, token: &str, owner: &str) -> Result<bool, AuthError> {
    let claims = match keys.verify(token, TokenKind::Refresh) {
        Ok(claims) if claims.sub == owner => claims,
        _ => return Ok(false),
    };
    repo.purge_expired_revocations(Utc::now().timestamp())?;
    repo.revoke_token(&claims.jti, claims.exp)?;
    tracing::info!(user = %claims.sub, "refresh token revoked");
    Ok(true)
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub fn cookie_value<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

/// The authenticated caller, resolved from `Authorization: Bearer <access>`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub username: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AuthError::MissingToken)?;
        let claims = state.keys.verify(token, TokenKind::Access)?;
        // A deleted user's tokens stop working immediately
        let user = state
            .db
            .transaction(|repo| repo.get_user(&claims.sub))?
            .ok_or(AuthError::InvalidToken)?;
        Ok(AuthUser { id: user.id, username: user.username })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use axum::http::HeaderValue;

    fn keys() -> JwtKeys {
        JwtKeys::new(b"test-secret", 60, 7)
    }

    fn alice(db: &Database) -> User {
        db.transaction(|repo| register_user(repo, "alice", "alice@example.com", "pw-alice")).unwrap()
    }

    #[test]
    fn test_password_hash_round_trip() {
        let hash = hash_password("testpass123").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("testpass123", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("testpass123", "not-a-hash"));
    }

    #[test]
    fn test_register_and_authenticate() {
        let db = Database::in_memory().unwrap();
        let user = alice(&db);

        let err = db
            .transaction(|repo| register_user(repo, "alice", "other@example.com", "x"))
            .unwrap_err();
        assert!(matches!(err, AuthError::UsernameTaken(_)));

        db.transaction(|repo| {
            assert_eq!(authenticate(repo, Some("alice"), Some("pw-alice"))?.id, user.id);
            assert!(matches!(authenticate(repo, Some("alice"), Some("nope")), Err(AuthError::InvalidCredentials)));
            assert!(matches!(authenticate(repo, Some("mallory"), Some("pw")), Err(AuthError::InvalidCredentials)));
            assert!(matches!(authenticate(repo, Some("alice"), None), Err(AuthError::MissingCredentials)));
            assert!(matches!(authenticate(repo, Some(""), Some("pw")), Err(AuthError::MissingCredentials)));
            Ok::<_, AuthError>(())
        }).unwrap();
    }

    #[test]
    fn test_token_kinds_are_not_interchangeable() {
        let db = Database::in_memory().unwrap();
        let user = alice(&db);
        let keys = keys();
        let pair = keys.issue_pair(&user).unwrap();

        let claims = keys.verify(&pair.access, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.exp - claims.iat, 3600);
        assert!(matches!(keys.verify(&pair.access, TokenKind::Refresh), Err(AuthError::InvalidToken)));
        assert!(matches!(keys.verify(&pair.refresh, TokenKind::Access), Err(AuthError::InvalidToken)));

        let other = JwtKeys::new(b"other-secret", 60, 7);
        assert!(matches!(other.verify(&pair.access, TokenKind::Access), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_expired_token_rejected() {
        let db = Database::in_memory().unwrap();
        let user = alice(&db);
        // Past the default 60s validation leeway
        let stale = JwtKeys::new(b"test-secret", -5, 7);
        let token = stale.issue(&user, TokenKind::Access).unwrap();
        assert!(matches!(keys().verify(&token, TokenKind::Access), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_revoked_refresh_token_rejected() {
        let db = Database::in_memory().unwrap();
        let user = alice(&db);
        let keys = keys();
        let refresh = keys.issue(&user, TokenKind::Refresh).unwrap();

        db.transaction(|repo| check_refresh(repo, &keys, &refresh)).unwrap();
        assert!(!db.transaction(|repo| revoke_refresh(repo, &keys, &refresh, "someone-else")).unwrap());
        db.transaction(|repo| check_refresh(repo, &keys, &refresh)).unwrap();

        assert!(db.transaction(|repo| revoke_refresh(repo, &keys, &refresh, &user.id)).unwrap());
        let err = db.transaction(|repo| check_refresh(repo, &keys, &refresh)).unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));

        assert!(!db.transaction(|repo| revoke_refresh(repo, &keys, "garbage", &user.id)).unwrap());
    }

    #[test]
    fn test_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; refresh_token=r.t.x; other=1"));
        assert_eq!(cookie_value(&headers, REFRESH_COOKIE), Some("r.t.x"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }
}
