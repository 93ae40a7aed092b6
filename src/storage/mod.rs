//! Content-addressed blob storage behind a narrow save/get/delete/exists
//! contract. Two backends: local filesystem and S3-compatible object store,
//! selected at start-up from the storage configuration.

use {super::*, async_trait::async_trait};

pub use self::{local::LocalStore, object::ObjectStore};

mod local;
mod object;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
  #[error("blob not found: {0}")]
  NotFound(String),
  #[error("storage io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("storage backend error: {0}")]
  Backend(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Keys are POSIX-style relative paths. `save` overwrites.
#[async_trait]
pub trait BlobStore: Send + Sync {
  async fn save(&self, key: &str, data: Bytes) -> StorageResult<()>;
  async fn get(&self, key: &str) -> StorageResult<Bytes>;
  async fn delete(&self, key: &str) -> StorageResult<()>;
  async fn exists(&self, key: &str) -> StorageResult<bool>;
}

/// Opens the configured blob store backend.
pub async fn open(settings: &Settings) -> Result<Arc<dyn BlobStore>> {
  match settings.storage_type.as_str() {
    "object-store" => Ok(Arc::new(
      ObjectStore::new(
        &settings.object_endpoint,
        &settings.object_access_key,
        &settings.object_secret_key,
        &settings.object_bucket,
      )
      .await,
    )),
    _ => Ok(Arc::new(LocalStore::new(settings.local_base_path.clone())?)),
  }
}

/// Blob key for a file PIN: `indexer/{chain}/{pin_id}{ext}`.
pub fn file_storage_path(chain: &str, pin_id: &str, extension: &str) -> String {
  format!("indexer/{chain}/{pin_id}{extension}")
}

/// Blob key for an avatar PIN: `indexer/avatar/{chain}/{tx_id}/{pin_id}{ext}`.
pub fn avatar_storage_path(chain: &str, tx_id: &str, pin_id: &str, extension: &str) -> String {
  format!("indexer/avatar/{chain}/{tx_id}/{pin_id}{extension}")
}
