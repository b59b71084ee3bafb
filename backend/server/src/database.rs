//! # Realtime Database
//!
//! Cloud JSON tree holding every counter, profile and audit entry.
//!
//! ## Layout
//!
//! - `/{date}/{department}/{serial}`: daily counter of one fountain
//! - `/users/{uid}`: identity profile (email, role, organisation, createdAt)
//! - `/logs/{pushId}`: audit entries, push ids sort chronologically
//!
//! ## Access
//!
//! Treated as an opaque key-value store addressed by slash paths.
//! - `get`: subtree at a path, `None` when absent
//! - `set`: replace the subtree
//! - `update`: merge the given children, siblings untouched
//! - `push`: append under a generated chronological key
//!
//! No transactions. Read-modify-write is last-writer-wins per field, which is
//! fine for counters written by one fountain each.
//!
//! ## Backends
//!
//! - [`RemoteStore`]: REST protocol of the hosted database, `{url}/{path}.json?auth={secret}`
//! - [`MemoryStore`]: in-process tree, used offline (`DATABASE_URL=memory`) and in tests
use std::{
    sync::{
        RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::utils::with_retries;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Store answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Store returned an unexpected shape: {0}")]
    Shape(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError>;

    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError>;
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

pub struct RemoteStore {
    client: Client,
    base_url: String,
    secret: Option<String>,
    retries: u32,
}

impl RemoteStore {
    pub fn new(
        base_url: &str,
        secret: Option<String>,
        timeout: Duration,
        retries: u32,
    ) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret,
            retries,
        })
    }

    fn url(&self, path: &str) -> String {
        let path = segments(path).collect::<Vec<_>>().join("/");
        format!("{}/{}.json", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self.client.request(method, self.url(path));

        match &self.secret {
            Some(secret) => request.query(&[("auth", secret)]),
            None => request,
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, StoreError> {
        debug!("{method} {path}");

        let response = with_retries(self.retries, || {
            let request = self.request(method.clone(), path);
            let request = match body {
                Some(body) => request.json(body),
                None => request,
            };
            request.send()
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

#[derive(Deserialize)]
struct PushReply {
    name: String,
}

#[async_trait]
impl Store for RemoteStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let value = self.send(Method::GET, path, None).await?;

        Ok((!value.is_null()).then_some(value))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.send(Method::PUT, path, Some(&value)).await?;

        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.send(Method::PATCH, path, Some(&Value::Object(fields)))
            .await?;

        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError> {
        let reply = self.send(Method::POST, path, Some(&value)).await?;

        serde_json::from_value::<PushReply>(reply)
            .map(|reply| reply.name)
            .map_err(|e| StoreError::Shape(e.to_string()))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    root: RwLock<Value>,
    pushes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: Value) -> Self {
        Self {
            root: RwLock::new(root),
            pushes: AtomicU64::new(0),
        }
    }

    fn write(&self, path: &str, apply: impl FnOnce(&mut Value)) -> Result<(), StoreError> {
        let mut root = self
            .root
            .write()
            .map_err(|_| StoreError::Shape("memory store poisoned".to_string()))?;

        let mut node = &mut *root;
        for segment in segments(path) {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            node = match node {
                Value::Object(children) => children.entry(segment).or_insert(Value::Null),
                _ => return Err(StoreError::Shape(format!("{path} is not a branch"))),
            };
        }

        apply(node);
        prune(&mut root);

        Ok(())
    }
}

fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(children) => children.is_empty(),
        _ => false,
    }
}

/// Drops nulls and emptied objects, the hosted database never stores either.
fn prune(value: &mut Value) -> bool {
    if let Value::Object(children) = value {
        children.retain(|_, child| !prune(child));
        return children.is_empty();
    }

    value.is_null()
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let root = self
            .root
            .read()
            .map_err(|_| StoreError::Shape("memory store poisoned".to_string()))?;

        let mut node = &*root;
        for segment in segments(path) {
            match node.get(segment) {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }

        Ok((!is_absent(node)).then(|| node.clone()))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.write(path, |node| *node = value)
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.write(path, |node| {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            if let Value::Object(children) = node {
                children.extend(fields);
            }
        })
    }

    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError> {
        let sequence = self.pushes.fetch_add(1, Ordering::Relaxed);
        let key = format!("-{:013}{:06}", Utc::now().timestamp_millis(), sequence);

        self.set(&format!("{path}/{key}"), value).await?;

        Ok(key)
    }
}

/// Memory store whose first read following the first write fails.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct ReadAfterWriteFails {
    pub inner: MemoryStore,
    written: std::sync::atomic::AtomicBool,
    tripped: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
#[async_trait]
impl Store for ReadAfterWriteFails {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        if self.written.load(Ordering::SeqCst) && !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Shape(format!("read of {path} refused")));
        }
        self.inner.get(path).await
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.inner.set(path, value).await
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.inner.update(path, fields).await?;
        self.written.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError> {
        self.inner.push(path, value).await
    }
}
