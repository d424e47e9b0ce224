//! Async lifecycle wrapper that owns a [`Database`] and serializes access to it.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::lock::Mutex;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::Error;
use crate::sqlite::{Database, TableDict};
use crate::value::Row;

/// Start/stop hooks for a long-lived component.
#[async_trait]
pub trait Lifecycle {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
}

/// Meta store service: opens the database on start, disconnects on stop.
pub struct MetaStoreService {
    config: DatabaseConfig,
    db: Arc<Mutex<Option<Database>>>,
}

// Clones share the same underlying handle.
impl Clone for MetaStoreService {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            db: self.db.clone(),
        }
    }
}

impl MetaStoreService {
    /// Create a new service with the given config
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            db: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        self.db.lock().await.is_some()
    }

    async fn with_db<T>(&self, f: impl FnOnce(&mut Database) -> crate::Result<T> + Send) -> Result<T> {
        let mut guard = self.db.lock().await;
        let db = guard.as_mut().ok_or(Error::Closed)?;
        Ok(f(db)?)
    }

    pub async fn set_meta_value(&self, key: &str, value: &str) -> Result<()> {
        self.with_db(|db| db.set_meta_value(key, value)).await
    }

    pub async fn get_meta_value(&self, key: &str) -> Result<String> {
        self.with_db(|db| db.get_meta_value(key)).await
    }

    pub async fn create_table(&self, name: &str, field_names: &[&str], field_types: &[&str]) -> Result<()> {
        self.with_db(|db| {
            db.create_table(name, field_names, field_types)?;
            db.commit()
        })
        .await
    }

    pub async fn get_all_rows(&self, table: &str) -> Result<Vec<Row>> {
        self.with_db(|db| db.get_all_rows(table)).await
    }

    pub async fn get_table_as_dict(&self, table: &str, column_names: &[&str]) -> Result<TableDict> {
        self.with_db(|db| db.get_table_as_dict(table, column_names)).await
    }
}

#[async_trait]
impl Lifecycle for MetaStoreService {
    async fn start(&self) -> Result<()> {
        let mut guard = self.db.lock().await;
        if guard.is_some() {
            bail!("meta store at {} is already running", self.config.path.display());
        }
        info!(path = %self.config.path.display(), "starting meta store service");
        let db = Database::open_with_config(&self.config)
            .with_context(|| format!("failed to open meta store at {}", self.config.path.display()))?;
        *guard = Some(db);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut guard = self.db.lock().await;
        match guard.take() {
            Some(mut db) => {
                db.disconnect().context("failed to disconnect meta store")?;
                info!(path = %self.config.path.display(), "meta store service stopped");
            }
            None => debug!("meta store service was not running"),
        }
        Ok(())
    }
}
