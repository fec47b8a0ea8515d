//! Accounts and sessions: password hashing, bearer tokens and the [`Viewer`]
//! every handler receives.

use std::sync::Arc;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use password_hash::rand_core::OsRng;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use poem::{FromRequest, Request, RequestBody, http::header};
use sea_orm::{ConnectionTrait, EntityTrait};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use validator::Validate;

use crate::{
    AppState,
    entities::user,
    error::{AppError, Result},
    forms::{LoginForm, SignupForm},
    store,
};

pub const LOGIN_PATH: &str = "/auth/login/";

/// Escapes `next` outside the unreserved set, keeping `/` readable.
const NEXT_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i32,
    pub username: String,
    pub exp: i64,
}

pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: u64,
}

impl TokenKeys {
    pub fn new(secret: &[u8], ttl_secs: u64) -> Self {
        TokenKeys {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl_secs,
        }
    }

    pub fn issue(&self, user: &user::Model) -> Result<String> {
        let claims = Claims {
            sub: user.id,
            username: user.username.clone(),
            exp: Utc::now().timestamp().saturating_add_unsigned(self.ttl_secs),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("token encoding failed: {e}")))
    }

    pub fn verify(&self, token: &str) -> Option<Claims> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| debug!(error = %e, "rejected bearer token"))
            .ok()
    }
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

pub async fn signup<C: ConnectionTrait>(db: &C, form: &SignupForm) -> Result<user::Model> {
    form.validate()?;
    let hash = hash_password(&form.password)?;
    store::create_user(db, &form.username, hash).await
}

/// Checks the credentials and returns a fresh token for the user.
pub async fn login<C: ConnectionTrait>(
    db: &C,
    keys: &TokenKeys,
    form: &LoginForm,
) -> Result<(user::Model, String)> {
    form.validate()?;
    let user = match store::find_user_by_username(db, &form.username).await {
        Ok(user) => user,
        Err(AppError::NotFound(_)) => return Err(AppError::Unauthorized),
        Err(e) => return Err(e),
    };
    if !verify_password(&user.password_hash, &form.password) {
        return Err(AppError::Unauthorized);
    }
    let token = keys.issue(&user)?;
    info!(user_id = user.id, "user logged in");
    Ok((user, token))
}

/// Path and query exactly as the client sent them, recorded before routing
/// trims or rewrites the URI.
#[derive(Debug, Clone)]
pub struct RequestedPath(pub String);

impl RequestedPath {
    pub fn of(req: &Request) -> Self {
        let uri = req.uri();
        RequestedPath(
            uri.path_and_query()
                .map(|pq| pq.as_str().to_owned())
                .unwrap_or_else(|| uri.path().to_owned()),
        )
    }
}

/// The user a request acts for, if any, plus the path it asked for.
#[derive(Debug, Clone)]
pub struct Viewer {
    pub user: Option<user::Model>,
    pub path: String,
}

impl Viewer {
    /// The logged-in user, or the login URL to send an anonymous visitor to.
    pub fn require_login(&self) -> Result<&user::Model, String> {
        self.user.as_ref().ok_or_else(|| login_url(&self.path))
    }
}

pub fn login_url(next: &str) -> String {
    format!("{LOGIN_PATH}?next={}", utf8_percent_encode(next, NEXT_SET))
}

fn bearer(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

impl<'a> FromRequest<'a> for Viewer {
    async fn from_request(req: &'a Request, _body: &mut RequestBody) -> poem::Result<Self> {
        let RequestedPath(path) = req
            .data::<RequestedPath>()
            .cloned()
            .unwrap_or_else(|| RequestedPath::of(req));
        let state = req.data::<Arc<AppState>>();
        let claims = match (state, bearer(req)) {
            (Some(state), Some(token)) => state.tokens.verify(token),
            _ => None,
        };
        let user = match (state, claims) {
            (Some(state), Some(claims)) => user::Entity::find_by_id(claims.sub)
                .one(&state.db)
                .await
                .map_err(AppError::from)?,
            _ => None,
        };
        Ok(Viewer { user, path })
    }
}
