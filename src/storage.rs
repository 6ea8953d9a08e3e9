//! Credential and option persistence for Beem accounts.
//!
//! The password lives in a secret store keyed by account, the bearer token in
//! per-account options. `JsonFileStore` keeps both in one JSON document.

use crate::errors::{BeemError, BeemResult};
use async_trait::async_trait;
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_password(&self, account_id: &str) -> BeemResult<Option<String>>;
    async fn save_password(&self, account_id: &str, password: &str) -> BeemResult<()>;
}

#[async_trait]
pub trait OptionsStore: Send + Sync {
    async fn options(&self, account_id: &str) -> BeemResult<EntryOptions>;
    async fn update_options(&self, account_id: &str, options: EntryOptions) -> BeemResult<()>;
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    passwords: HashMap<String, String>,
    #[serde(default)]
    options: HashMap<String, EntryOptions>,
}

/// File-backed store. Every write rewrites the whole document.
pub struct JsonFileStore {
    path: PathBuf,
    lock: AsyncMutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: AsyncMutex::new(()),
        }
    }

    async fn load(&self) -> BeemResult<StoreDocument> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(StoreDocument::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, document: &StoreDocument) -> BeemResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(document)?;
        let staging = self.path.with_extension("tmp");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        debug!(path = %self.path.display(), "Store saved");
        Ok(())
    }

    async fn modify(&self, change: impl FnOnce(&mut StoreDocument) + Send) -> BeemResult<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.load().await?;
        change(&mut document);
        self.save(&document).await
    }
}

#[async_trait]
impl SecretStore for JsonFileStore {
    async fn get_password(&self, account_id: &str) -> BeemResult<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.passwords.remove(account_id))
    }

    async fn save_password(&self, account_id: &str, password: &str) -> BeemResult<()> {
        if account_id.is_empty() {
            return Err(BeemError::Store("account id is empty".to_string()));
        }
        let (account_id, password) = (account_id.to_string(), password.to_string());
        self.modify(move |document| {
            document.passwords.insert(account_id, password);
        })
        .await
    }
}

#[async_trait]
impl OptionsStore for JsonFileStore {
    async fn options(&self, account_id: &str) -> BeemResult<EntryOptions> {
        let _guard = self.lock.lock().await;
        Ok(self
            .load()
            .await?
            .options
            .remove(account_id)
            .unwrap_or_default())
    }

    async fn update_options(&self, account_id: &str, options: EntryOptions) -> BeemResult<()> {
        let account_id = account_id.to_string();
        self.modify(move |document| {
            document.options.insert(account_id, options);
        })
        .await
    }
}

/// In-process store, used when nothing has to survive a restart.
#[derive(Default)]
pub struct MemoryStore {
    document: Mutex<StoreDocument>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_document<T>(&self, f: impl FnOnce(&mut StoreDocument) -> T) -> T {
        let mut document = self.document.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut document)
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn get_password(&self, account_id: &str) -> BeemResult<Option<String>> {
        Ok(self.with_document(|d| d.passwords.get(account_id).cloned()))
    }

    async fn save_password(&self, account_id: &str, password: &str) -> BeemResult<()> {
        self.with_document(|d| d.passwords.insert(account_id.to_string(), password.to_string()));
        Ok(())
    }
}

#[async_trait]
impl OptionsStore for MemoryStore {
    async fn options(&self, account_id: &str) -> BeemResult<EntryOptions> {
        Ok(self.with_document(|d| d.options.get(account_id).cloned().unwrap_or_default()))
    }

    async fn update_options(&self, account_id: &str, options: EntryOptions) -> BeemResult<()> {
        self.with_document(|d| d.options.insert(account_id.to_string(), options));
        Ok(())
    }
}
