use super::*;

pub const STATE_EXIST: i64 = 0;
pub const STATE_DELETED: i64 = 2;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
  Pending,
  #[default]
  Success,
  Failed,
}

/// An indexed file PIN. Serialised as JSON into every collection that
/// carries it.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
  pub pin_id: String,
  pub tx_id: String,
  pub vout: u32,

  pub path: String,
  pub operation: String,
  pub parent_path: String,
  pub encryption: String,
  pub version: String,
  /// Content type as declared in the payload.
  pub content_type: String,

  pub file_type: String,
  pub file_extension: String,
  pub file_name: String,
  pub file_size: u64,
  pub file_md5: String,
  pub file_hash: String,

  pub storage_type: String,
  pub storage_path: String,

  pub chain_name: String,
  pub block_height: u64,
  pub timestamp: i64,
  pub creator_meta_id: String,
  pub creator_address: String,
  pub owner_address: String,
  pub owner_meta_id: String,

  pub status: Status,
  /// 0 = exists, 2 = deleted out of band.
  pub state: i64,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// An indexed avatar PIN. At most one *latest* record per meta_id is
/// maintained in the `avatar_latest` collection, selected by the largest
/// observed timestamp.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Avatar {
  pub pin_id: String,
  pub tx_id: String,

  pub meta_id: String,
  pub address: String,

  pub storage_type: String,
  pub storage_path: String,
  pub content_type: String,
  pub file_size: u64,
  pub file_md5: String,
  pub file_hash: String,
  pub file_extension: String,
  pub file_type: String,

  pub chain_name: String,
  pub block_height: u64,
  pub timestamp: i64,

  pub status: Status,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Sync cursor, one record per chain.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
  pub chain_name: String,
  pub current_sync_height: u64,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Upload record, keyed by `file_id = meta_id + "_" + sha256_hex(content)`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadFile {
  pub file_id: String,
  pub file_name: String,
  pub file_type: String,
  pub meta_id: String,
  pub address: String,
  pub path: String,
  pub operation: String,
  pub content_type: String,
  pub file_size: u64,
  pub file_md5: String,
  pub file_hash: String,
  pub tx_id: String,
  pub pin_id: String,
  pub status: Status,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}
