//! # Dashboard API
//!
//! Login, session and read endpoints of the admin dashboard under `/api/admin`.
//!
//! ## Login
//! 1. The configured super admin pair wins outright
//! 2. Anyone else goes through the identity provider, role from the email domain
//! 3. Org-domain logins are audited, successes and failures alike
//!
//! ## Access
//! - [`AuthUser`]: `verify`, `fountains`
//! - [`AdminUser`]: everything else
use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Query, State as AxumState,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::CookieJar;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, json};
use tracing::{error, info};

use crate::{
    audit::{AuditEntry, Category, DEFAULT_LIMIT},
    auth::{AdminUser, AuthUser, Identity, Role, cleared_cookie, derive_role, session_cookie},
    error::AppError,
    identity::IdentityError,
    state::State,
    stats::{self, FountainGraph, FountainSummary, StatsTotal},
    utils::today,
};

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Deserialize)]
pub struct Credentials {
    email: String,
    password: String,
}

#[derive(Serialize)]
pub struct LoginReply {
    role: Role,
    expires_in: u64,
    token_type: &'static str,
}

#[derive(Deserialize)]
pub struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct GraphQuery {
    days: Option<u32>,
}

fn payload<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|e| AppError::MalformedPayload(e.body_text()))
}

fn query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    query
        .map(|Query(inner)| inner)
        .map_err(|e| AppError::MalformedPayload(e.body_text()))
}

fn is_org_email(state: &State, email: &str) -> bool {
    derive_role(email, &state.config.org_email_domain) == Role::Admin
}

fn signed_in(
    state: &State,
    jar: CookieJar,
    identity: Identity<'_>,
) -> Result<(CookieJar, Json<LoginReply>), AppError> {
    let token = state
        .tokens
        .issue(&identity)
        .map_err(|e| AppError::InternalError(Box::new(e)))?;
    let jar = jar.add(session_cookie(token, &state.config));

    Ok((
        jar,
        Json(LoginReply {
            role: identity.role,
            expires_in: state.tokens.ttl().as_secs(),
            token_type: "bearer",
        }),
    ))
}

pub async fn login_handler(
    AxumState(state): AxumState<Arc<State>>,
    jar: CookieJar,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Credentials { email, password } = payload(body)?;

    if email == state.config.super_admin_email && password == state.config.super_admin_password {
        state
            .audit
            .record_quietly(Category::Login, &format!("Super admin login: {email}"))
            .await;

        return signed_in(
            &state,
            jar,
            Identity {
                email: &email,
                uid: None,
                role: Role::SuperAdmin,
            },
        );
    }

    let email = email.trim().to_string();
    let account = match state.identity.sign_in(&email, &password).await {
        Ok(account) => account,
        Err(e @ IdentityError::Rejected(_)) => {
            if is_org_email(&state, &email) {
                let reason = if e.is_unknown_user() {
                    "unknown user"
                } else {
                    "bad password"
                };
                state
                    .audit
                    .record_quietly(
                        Category::FailedLogin,
                        &format!("Failed admin login ({reason}): {email}"),
                    )
                    .await;
            }
            info!("Login refused for {email}: {e}");
            return Err(AppError::InvalidCredentials);
        }
        Err(e) => {
            error!("Login for {email} failed upstream: {e}");
            return Err(AppError::InvalidCredentials);
        }
    };

    let role = derive_role(&account.email, &state.config.org_email_domain);

    let mut profile = Map::new();
    profile.insert("email".to_string(), json!(account.email));
    profile.insert("role".to_string(), json!(role));
    if let Err(e) = state
        .store
        .update(&format!("/users/{}", account.uid), profile)
        .await
    {
        error!("Failed to store profile of {}: {e}", account.email);
        return Err(AppError::InvalidCredentials);
    }

    if role.is_admin() {
        state
            .audit
            .record_quietly(Category::Login, &format!("Admin login: {}", account.email))
            .await;
    }

    signed_in(
        &state,
        jar,
        Identity {
            email: &account.email,
            uid: Some(&account.uid),
            role,
        },
    )
}

pub async fn verify_handler(AuthUser(claims): AuthUser) -> impl IntoResponse {
    Json(json!({
        "email": claims.email,
        "role": claims.role,
        "uid": claims.uid,
    }))
}

pub async fn logout_handler(
    AxumState(state): AxumState<Arc<State>>,
    AdminUser(claims): AdminUser,
    jar: CookieJar,
) -> impl IntoResponse {
    state
        .audit
        .record_quietly(Category::Logout, &format!("Logout: {}", claims.email))
        .await;

    let jar = jar.remove(cleared_cookie(&state.config));

    (jar, Json(json!({ "detail": "Logged out" })))
}

pub async fn create_user_handler(
    AxumState(state): AxumState<Arc<State>>,
    AdminUser(claims): AdminUser,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Credentials { email, password } = payload(body)?;
    let email = email.trim().to_string();

    if !email.contains('@') {
        return Err(AppError::MalformedPayload(format!("{email} is not an email")));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::MalformedPayload(format!(
            "password needs at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let account = match state.identity.create_user(&email, &password).await {
        Ok(account) => account,
        Err(e) if e.is_existing_email() => return Err(AppError::Conflict),
        Err(e) => return Err(AppError::Identity(e)),
    };

    let role = derive_role(&account.email, &state.config.org_email_domain);
    state
        .store
        .set(
            &format!("/users/{}", account.uid),
            json!({
                "email": account.email,
                "role": role,
                "organisation": state.config.department,
                "createdAt": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            }),
        )
        .await?;

    state
        .audit
        .record_quietly(
            Category::UserCreated,
            &format!("User created by {}: {}", claims.email, account.email),
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "uid": account.uid,
            "email": account.email,
            "role": role,
        })),
    ))
}

pub async fn stats_total_handler(
    AxumState(state): AxumState<Arc<State>>,
    _: AdminUser,
) -> Result<Json<StatsTotal>, AppError> {
    let root = state.store.get("/").await?.unwrap_or_default();

    Ok(Json(stats::stats_total(&root, today())))
}

pub async fn fountain_graph_handler(
    AxumState(state): AxumState<Arc<State>>,
    _: AdminUser,
    params: Result<Query<GraphQuery>, QueryRejection>,
) -> Result<Json<FountainGraph>, AppError> {
    let params = query(params)?;
    let root = state.store.get("/").await?.unwrap_or_default();

    Ok(Json(stats::fountain_graph(&root, today(), params.days)))
}

pub async fn fountains_handler(
    AxumState(state): AxumState<Arc<State>>,
    _: AuthUser,
) -> Result<Json<Vec<FountainSummary>>, AppError> {
    let root = state.store.get("/").await?.unwrap_or_default();

    Ok(Json(stats::fountains(&root)))
}

pub async fn logs_handler(
    AxumState(state): AxumState<Arc<State>>,
    _: AdminUser,
    params: Result<Query<LimitQuery>, QueryRejection>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    let limit = query(params)?.limit.unwrap_or(DEFAULT_LIMIT);

    Ok(Json(state.audit.recent(limit).await?))
}

pub async fn alerts_handler(
    AxumState(state): AxumState<Arc<State>>,
    _: AdminUser,
    params: Result<Query<LimitQuery>, QueryRejection>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    let limit = query(params)?.limit.unwrap_or(DEFAULT_LIMIT);

    Ok(Json(state.audit.alerts(limit).await?))
}
