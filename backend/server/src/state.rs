use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::{
    audit::AuditLog,
    auth::Tokens,
    config::Config,
    counters::Counters,
    database::{MemoryStore, RemoteStore, Store},
    hub::Hub,
    identity::{IdentityProvider, LocalIdentity, RemoteIdentity},
};

const MEMORY_DATABASE: &str = "memory";

pub struct State {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub identity: Arc<dyn IdentityProvider>,
    pub tokens: Tokens,
    pub counters: Arc<Counters>,
    pub hub: Arc<Hub>,
    pub audit: AuditLog,
}

impl State {
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let store: Arc<dyn Store> = if config.database_url == MEMORY_DATABASE {
            info!("Using in-memory database, nothing will persist");
            Arc::new(MemoryStore::new())
        } else {
            info!("Using database at {}", config.database_url);
            Arc::new(RemoteStore::new(
                &config.database_url,
                config.database_secret.clone(),
                config.upstream_timeout,
                config.upstream_retries,
            )?)
        };

        let identity: Arc<dyn IdentityProvider> = match &config.identity_api_key {
            Some(api_key) => Arc::new(RemoteIdentity::new(
                &config.identity_url,
                api_key.clone(),
                config.upstream_timeout,
                config.upstream_retries,
            )?),
            None => {
                info!("IDENTITY_API_KEY not set, using local accounts");
                Arc::new(LocalIdentity::new())
            }
        };

        Ok(Self::with_backends(config, store, identity))
    }

    pub fn with_backends(
        config: Config,
        store: Arc<dyn Store>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Arc<Self> {
        let tokens = Tokens::from_config(&config);
        let counters = Arc::new(Counters::new(
            store.clone(),
            &config.department,
            &config.serial,
        ));

        Arc::new(Self {
            tokens,
            counters,
            hub: Arc::new(Hub::new()),
            audit: AuditLog::new(store.clone()),
            store,
            identity,
            config,
        })
    }
}
