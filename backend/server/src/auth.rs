//! # Sessions
//!
//! Signed claim sets carried in an http-only cookie.
//!
//! ## Token
//! - HS256 over `{sub, email, uid?, role, iss, aud, iat, exp}`
//! - Issuer, audience and expiry are all checked, a token is dead at `exp`
//! - No server-side revocation, logout just clears the cookie
//!
//! ## Roles
//! - `super_admin`: the single operator account from the environment
//! - `admin`: managed accounts on the organisation domain
//! - `client`: every other managed account
//!
//! ## Transport
//! - Cookie `access_token`, http-only, same-site lax, `Secure`/`Domain` from config
//! - `Authorization: Bearer` accepted as a fallback for non-browser clients
use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{config::Config, error::AppError, state::State};

pub const AUTH_COOKIE: &str = "access_token";

#[derive(Error, Debug, PartialEq)]
pub enum AuthError {
    #[error("missing token")]
    Missing,

    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("token signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }
}

/// Organisation-domain addresses are admins, everyone else is a client.
pub fn derive_role(email: &str, org_domain: &str) -> Role {
    let email = email.trim().to_lowercase();
    let domain = org_domain.trim().to_lowercase();

    if !domain.is_empty() && email.ends_with(&domain) {
        Role::Admin
    } else {
        Role::Client
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub role: Role,
    pub iss: String,
    pub aud: String,
    pub iat: u64,
    pub exp: u64,
}

pub struct Identity<'a> {
    pub email: &'a str,
    pub uid: Option<&'a str>,
    pub role: Role,
}

pub struct Tokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

impl Tokens {
    pub fn new(secret: &str, issuer: &str, audience: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            ttl,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.jwt_secret,
            &config.jwt_issuer,
            &config.jwt_audience,
            config.jwt_ttl,
        )
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, identity: &Identity<'_>) -> Result<String, AuthError> {
        self.issue_at(identity, unix_now())
    }

    pub fn issue_at(&self, identity: &Identity<'_>, now: u64) -> Result<String, AuthError> {
        let claims = Claims {
            sub: identity.email.to_string(),
            email: identity.email.to_string(),
            uid: identity.uid.map(str::to_string),
            role: identity.role,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now,
            exp: now + self.ttl.as_secs(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_at(token, unix_now())
    }

    /// Checks signature, issuer and audience, then expiry against `now`.
    pub fn verify_at(&self, token: &str, now: u64) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        // expiry is checked below without leeway
        validation.validate_exp = false;

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            })?
            .claims;

        if claims.exp <= now {
            return Err(AuthError::Expired);
        }

        Ok(claims)
    }
}

pub fn session_cookie(token: String, config: &Config) -> Cookie<'static> {
    let mut cookie = Cookie::build((AUTH_COOKIE, token))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.cookie_secure)
        .path("/")
        .build();

    if let Some(domain) = &config.cookie_domain {
        cookie.set_domain(domain.clone());
    }

    cookie
}

pub fn cleared_cookie(config: &Config) -> Cookie<'static> {
    let mut cookie = Cookie::build((AUTH_COOKIE, "")).path("/").build();

    if let Some(domain) = &config.cookie_domain {
        cookie.set_domain(domain.clone());
    }

    cookie
}

fn bearer(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

/// Any holder of a valid token.
pub struct AuthUser(pub Claims);

impl FromRequestParts<Arc<State>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<State>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);

        let token = jar
            .get(AUTH_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .filter(|token| !token.is_empty())
            .or_else(|| bearer(parts))
            .ok_or(AuthError::Missing)?;

        Ok(AuthUser(state.tokens.verify(&token)?))
    }
}

/// A valid token carrying `admin` or `super_admin`.
pub struct AdminUser(pub Claims);

impl FromRequestParts<Arc<State>> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<State>,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(claims) = AuthUser::from_request_parts(parts, state).await?;

        if !claims.role.is_admin() {
            return Err(AppError::Forbidden);
        }

        Ok(AdminUser(claims))
    }
}
