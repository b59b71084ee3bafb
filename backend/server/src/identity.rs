//! # Identity Provider
//!
//! Password sign-in and account creation for managed users.
//!
//! - [`RemoteIdentity`]: hosted REST API, `accounts:signInWithPassword` and `accounts:signUp`
//! - [`LocalIdentity`]: in-process account table, used when no API key is configured
//!
//! Refusals by the provider ([`IdentityError::Rejected`]) are told apart from
//! transport or server trouble ([`IdentityError::Upstream`]).
use std::{collections::HashMap, sync::RwLock, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::utils::with_retries;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IdentityError {
    #[error("Rejected by identity provider: {0}")]
    Rejected(String),

    #[error("Identity provider request failed: {0}")]
    Upstream(String),
}

impl IdentityError {
    pub fn is_unknown_user(&self) -> bool {
        matches!(self, IdentityError::Rejected(reason) if reason == EMAIL_NOT_FOUND)
    }

    pub fn is_existing_email(&self) -> bool {
        matches!(self, IdentityError::Rejected(reason) if reason == EMAIL_EXISTS)
    }
}

pub const EMAIL_NOT_FOUND: &str = "EMAIL_NOT_FOUND";
pub const EMAIL_EXISTS: &str = "EMAIL_EXISTS";
pub const INVALID_PASSWORD: &str = "INVALID_PASSWORD";

const REJECTIONS: [&str; 5] = [
    EMAIL_NOT_FOUND,
    INVALID_PASSWORD,
    "INVALID_LOGIN_CREDENTIALS",
    "USER_DISABLED",
    EMAIL_EXISTS,
];

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub uid: String,
    pub email: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Account, IdentityError>;

    async fn create_user(&self, email: &str, password: &str) -> Result<Account, IdentityError>;
}

pub struct RemoteIdentity {
    client: Client,
    base_url: String,
    api_key: String,
    retries: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountReply {
    local_id: String,
    email: String,
}

#[derive(Deserialize)]
struct ErrorReply {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Maps a provider error message such as `INVALID_PASSWORD : ...` to a rejection.
fn classify(message: &str) -> IdentityError {
    let code = message.split([' ', ':']).next().unwrap_or_default();

    if REJECTIONS.contains(&code) {
        IdentityError::Rejected(code.to_string())
    } else {
        IdentityError::Upstream(message.to_string())
    }
}

impl RemoteIdentity {
    pub fn new(
        base_url: &str,
        api_key: String,
        timeout: Duration,
        retries: u32,
    ) -> Result<Self, IdentityError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IdentityError::Upstream(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            retries,
        })
    }

    async fn call(&self, endpoint: &str, email: &str, password: &str) -> Result<Account, IdentityError> {
        debug!("Identity call {endpoint} for {email}");

        let url = format!("{}/accounts:{endpoint}", self.base_url);
        let body = json!({
            "email": email,
            "password": password,
            "returnSecureToken": true,
        });

        let response = with_retries(self.retries, || {
            self.client
                .post(&url)
                .query(&[("key", &self.api_key)])
                .json(&body)
                .send()
        })
        .await
        .map_err(|e| IdentityError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let reply = response
                .json::<ErrorReply>()
                .await
                .map_err(|_| IdentityError::Upstream(format!("provider answered {status}")))?;
            return Err(classify(&reply.error.message));
        }

        let reply = response
            .json::<AccountReply>()
            .await
            .map_err(|e| IdentityError::Upstream(e.to_string()))?;

        Ok(Account {
            uid: reply.local_id,
            email: reply.email,
        })
    }
}

#[async_trait]
impl IdentityProvider for RemoteIdentity {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Account, IdentityError> {
        self.call("signInWithPassword", email, password).await
    }

    async fn create_user(&self, email: &str, password: &str) -> Result<Account, IdentityError> {
        self.call("signUp", email, password).await
    }
}

struct LocalAccount {
    uid: String,
    email: String,
    password: String,
}

/// Accounts keyed by lowercased email.
#[derive(Default)]
pub struct LocalIdentity {
    accounts: RwLock<HashMap<String, LocalAccount>>,
}

impl LocalIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> IdentityError {
        IdentityError::Upstream("local account table poisoned".to_string())
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentity {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Account, IdentityError> {
        let accounts = self.accounts.read().map_err(|_| Self::poisoned())?;

        let account = accounts
            .get(&email.trim().to_lowercase())
            .ok_or_else(|| IdentityError::Rejected(EMAIL_NOT_FOUND.to_string()))?;

        if account.password != password {
            return Err(IdentityError::Rejected(INVALID_PASSWORD.to_string()));
        }

        Ok(Account {
            uid: account.uid.clone(),
            email: account.email.clone(),
        })
    }

    async fn create_user(&self, email: &str, password: &str) -> Result<Account, IdentityError> {
        let mut accounts = self.accounts.write().map_err(|_| Self::poisoned())?;
        let key = email.trim().to_lowercase();

        if accounts.contains_key(&key) {
            return Err(IdentityError::Rejected(EMAIL_EXISTS.to_string()));
        }

        let account = LocalAccount {
            uid: format!("local-{}", accounts.len() + 1),
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        let created = Account {
            uid: account.uid.clone(),
            email: account.email.clone(),
        };
        accounts.insert(key, account);

        Ok(created)
    }
}
