//! # Audit Log
//!
//! Append-only record of security events under `/logs`.
//!
//! Entries are `{timestamp, message, type}` with an RFC 3339 timestamp.
//! Push keys sort chronologically, so reads order by key, newest first.
use std::{fmt, sync::Arc};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::database::{Store, StoreError};

const LOGS_PATH: &str = "/logs";
pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Login,
    FailedLogin,
    UserCreated,
    Logout,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Login => "login",
            Category::FailedLogin => "failed_login",
            Category::UserCreated => "user_created",
            Category::Logout => "logout",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

pub struct AuditLog {
    store: Arc<dyn Store>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn record(&self, category: Category, message: &str) -> Result<(), StoreError> {
        let entry = json!({
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "message": message,
            "type": category,
        });

        self.store.push(LOGS_PATH, entry).await?;
        info!("Audit [{category}] {message}");

        Ok(())
    }

    /// Records without failing the caller, a lost entry only gets logged.
    pub async fn record_quietly(&self, category: Category, message: &str) {
        if let Err(e) = self.record(category, message).await {
            warn!("Failed to write audit entry [{category}] {message}: {e}");
        }
    }

    /// Most recent entries first, at most `limit` of them.
    pub async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        self.read(limit, |_| true).await
    }

    /// Most recent failed logins first.
    pub async fn alerts(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        let failed = Category::FailedLogin.to_string();
        self.read(limit, |entry| entry.category.as_deref() == Some(failed.as_str()))
            .await
    }

    async fn read(
        &self,
        limit: usize,
        keep: impl Fn(&AuditEntry) -> bool,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let Some(Value::Object(logs)) = self.store.get(LOGS_PATH).await? else {
            return Ok(Vec::new());
        };

        let mut keyed: Vec<(String, AuditEntry)> = logs
            .into_iter()
            .filter_map(|(key, entry)| {
                serde_json::from_value::<AuditEntry>(entry)
                    .map_err(|e| warn!("Skipping malformed audit entry {key}: {e}"))
                    .ok()
                    .map(|entry| (key, entry))
            })
            .collect();
        keyed.sort_by(|(a, _), (b, _)| b.cmp(a));

        Ok(keyed
            .into_iter()
            .map(|(_, entry)| entry)
            .filter(|entry| keep(entry))
            .take(limit.clamp(1, MAX_LIMIT))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;

    fn log() -> AuditLog {
        AuditLog::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn empty_log_reads_as_empty() {
        assert!(log().recent(DEFAULT_LIMIT).await.unwrap().is_empty());
        assert!(log().alerts(DEFAULT_LIMIT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recent_entries_come_newest_first() {
        let log = log();
        log.record(Category::Login, "Super admin login: root@jemlo.be")
            .await
            .unwrap();
        log.record(Category::UserCreated, "User created: a@b.c")
            .await
            .unwrap();
        log.record(Category::Logout, "Logout: root@jemlo.be")
            .await
            .unwrap();

        let entries = log.recent(2).await.unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "Logout: root@jemlo.be");
        assert_eq!(entries[0].category.as_deref(), Some("logout"));
        assert_eq!(entries[1].message, "User created: a@b.c");
    }

    #[tokio::test]
    async fn alerts_only_keep_failed_logins() {
        let log = log();
        log.record(Category::FailedLogin, "Failed admin login (bad password): x@jemlo.be")
            .await
            .unwrap();
        log.record(Category::Login, "Admin login: y@jemlo.be")
            .await
            .unwrap();

        let alerts = log.alerts(DEFAULT_LIMIT).await.unwrap();

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category.as_deref(), Some("failed_login"));
        assert!(chrono::DateTime::parse_from_rfc3339(&alerts[0].timestamp).is_ok());
    }
}
