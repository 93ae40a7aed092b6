//! Embedded multi-collection index.
//!
//! One redb database holds one table per logical collection; values are the
//! JSON-serialised entities in every collection. Persisting an entity is a
//! fan-out write to all of its index tables inside a single write
//! transaction, so after a crash either every index contains the record or
//! none does, and the scanner can advance its cursor as soon as the commit
//! returns.

use {
  super::*,
  redb::{Database, ReadableTable, TableDefinition},
  serde::de::DeserializeOwned,
};

pub mod entry;

use entry::{Avatar, File, Status, SyncStatus, UploadFile};

type Collection = TableDefinition<'static, &'static str, &'static [u8]>;

macro_rules! define_table {
  ($name:ident, $collection:literal) => {
    const $name: Collection = TableDefinition::new($collection);
  };
}

define_table! { FILE_PIN, "file_pin" }
define_table! { FILE_ADDR, "file_addr" }
define_table! { FILE_META, "file_meta" }
define_table! { FILE_HASH, "file_hash" }
define_table! { AVATAR_PIN, "avatar_pin" }
define_table! { AVATAR_META, "avatar_meta" }
define_table! { AVATAR_META_TS, "avatar_meta_ts" }
define_table! { AVATAR_ADDR, "avatar_addr" }
define_table! { AVATAR_HASH, "avatar_hash" }
define_table! { AVATAR_LATEST, "avatar_latest" }
define_table! { SYNC_STATUS, "sync_status" }
define_table! { UPLOAD_FILE, "upload_file" }

const TABLES: [Collection; 12] = [
  FILE_PIN,
  FILE_ADDR,
  FILE_META,
  FILE_HASH,
  AVATAR_PIN,
  AVATAR_META,
  AVATAR_META_TS,
  AVATAR_ADDR,
  AVATAR_HASH,
  AVATAR_LATEST,
  SYNC_STATUS,
  UPLOAD_FILE,
];

/// Everything below the upper-bound sentinel sorts inside a prefix range;
/// keys only contain hex digits, base58 characters, `:` and `_`, all of
/// which order below `~`.
const PREFIX_UPPER_BOUND: char = '~';

/// One page of a cursor-paginated listing. The cursor is the key of the
/// last returned item; passing it back continues strictly past it.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub next_cursor: String,
  pub has_more: bool,
}

pub struct Index {
  database: Database,
}

impl Index {
  /// Opens (or creates) the index under `{data_dir}/indexer_db`, ensuring
  /// every collection exists before the first read transaction runs.
  pub fn open(data_dir: &Path) -> Result<Self> {
    let dir = data_dir.join("indexer_db");
    std::fs::create_dir_all(&dir)
      .with_context(|| format!("failed to create data dir `{}`", dir.display()))?;

    let database = Database::create(dir.join("metapin.redb"))?;

    let wtx = database.begin_write()?;
    for table in TABLES {
      wtx.open_table(table)?;
    }
    wtx.commit()?;

    Ok(Self { database })
  }

  // files

  /// Fan-out write of a file to its primary and secondary collections.
  pub fn put_file(&self, file: &File) -> Result {
    let value = serde_json::to_vec(file)?;

    let wtx = self.database.begin_write()?;
    {
      let addr_key = format!("{}:{}", file.creator_address, file.pin_id);
      let meta_key = format!("{}:{}", file.creator_meta_id, file.pin_id);
      let hash_key = format!("{}:{}", file.file_md5, file.pin_id);

      wtx
        .open_table(FILE_PIN)?
        .insert(file.pin_id.as_str(), value.as_slice())?;
      wtx
        .open_table(FILE_ADDR)?
        .insert(addr_key.as_str(), value.as_slice())?;
      wtx
        .open_table(FILE_META)?
        .insert(meta_key.as_str(), value.as_slice())?;
      wtx
        .open_table(FILE_HASH)?
        .insert(hash_key.as_str(), value.as_slice())?;
    }
    wtx.commit()?;

    Ok(())
  }

  /// Re-observation update. File index keys do not embed mutable fields,
  /// so this is a plain re-fan-out under the same keys.
  pub fn update_file(&self, file: &File) -> Result {
    self.put_file(file)
  }

  pub fn file_by_pin(&self, pin_id: &str) -> Result<Option<File>> {
    self.get_json(FILE_PIN, pin_id)
  }

  pub fn files(&self, cursor: &str, size: usize) -> Result<Page<File>> {
    self.scan_rev(FILE_PIN, "", cursor, size, |file: &File| {
      file.status == Status::Success
    })
  }

  pub fn files_by_address(&self, address: &str, cursor: &str, size: usize) -> Result<Page<File>> {
    let prefix = format!("{address}:");
    self.scan_rev(FILE_ADDR, &prefix, cursor, size, |file: &File| {
      file.status == Status::Success
    })
  }

  pub fn files_by_metaid(&self, meta_id: &str, cursor: &str, size: usize) -> Result<Page<File>> {
    let prefix = format!("{meta_id}:");
    self.scan_rev(FILE_META, &prefix, cursor, size, |file: &File| {
      file.status == Status::Success
    })
  }

  pub fn files_by_md5(&self, md5: &str, cursor: &str, size: usize) -> Result<Page<File>> {
    let prefix = format!("{md5}:");
    self.scan_rev(FILE_HASH, &prefix, cursor, size, |file: &File| {
      file.status == Status::Success
    })
  }

  pub fn count_files(&self) -> Result<u64> {
    let rtx = self.database.begin_read()?;
    let table = rtx.open_table(FILE_PIN)?;

    let mut count = 0;
    for entry in table.iter()? {
      let (_, value) = entry?;
      let file: File = serde_json::from_slice(value.value())?;
      if file.status == Status::Success {
        count += 1;
      }
    }

    Ok(count)
  }

  // avatars

  /// Fan-out write of an avatar. The `avatar_latest` pointer is replaced in
  /// the same transaction, but only when this record's timestamp strictly
  /// exceeds the stored one (or no record exists).
  pub fn put_avatar(&self, avatar: &Avatar) -> Result {
    let value = serde_json::to_vec(avatar)?;

    let wtx = self.database.begin_write()?;
    {
      let height = encode_u64(avatar.block_height);
      let timestamp = encode_u64(avatar.timestamp.max(0) as u64);
      let meta_key = format!("{}:{}", avatar.meta_id, height);
      let meta_ts_key = format!("{}:{}", avatar.meta_id, timestamp);
      let addr_key = format!("{}:{}", avatar.address, height);
      let hash_key = format!("{}:{}", avatar.file_md5, avatar.pin_id);

      wtx
        .open_table(AVATAR_PIN)?
        .insert(avatar.pin_id.as_str(), value.as_slice())?;
      wtx
        .open_table(AVATAR_META)?
        .insert(meta_key.as_str(), value.as_slice())?;
      wtx
        .open_table(AVATAR_META_TS)?
        .insert(meta_ts_key.as_str(), value.as_slice())?;
      wtx
        .open_table(AVATAR_ADDR)?
        .insert(addr_key.as_str(), value.as_slice())?;
      wtx
        .open_table(AVATAR_HASH)?
        .insert(hash_key.as_str(), value.as_slice())?;

      let mut latest = wtx.open_table(AVATAR_LATEST)?;
      let should_update = match latest.get(avatar.meta_id.as_str())? {
        None => true,
        Some(guard) => {
          let existing: Avatar = serde_json::from_slice(guard.value())?;
          avatar.timestamp > existing.timestamp
        }
      };
      if should_update {
        latest.insert(avatar.meta_id.as_str(), value.as_slice())?;
      }
    }
    wtx.commit()?;

    Ok(())
  }

  /// Re-observation update. Only collections whose keys do not embed the
  /// block height are rewritten; height-keyed historical entries keep their
  /// original observation.
  pub fn update_avatar(&self, avatar: &Avatar) -> Result {
    let value = serde_json::to_vec(avatar)?;

    let wtx = self.database.begin_write()?;
    {
      let hash_key = format!("{}:{}", avatar.file_md5, avatar.pin_id);

      wtx
        .open_table(AVATAR_PIN)?
        .insert(avatar.pin_id.as_str(), value.as_slice())?;
      wtx
        .open_table(AVATAR_HASH)?
        .insert(hash_key.as_str(), value.as_slice())?;

      let mut latest = wtx.open_table(AVATAR_LATEST)?;
      let points_here = match latest.get(avatar.meta_id.as_str())? {
        Some(guard) => {
          let existing: Avatar = serde_json::from_slice(guard.value())?;
          existing.pin_id == avatar.pin_id
        }
        None => false,
      };
      if points_here {
        latest.insert(avatar.meta_id.as_str(), value.as_slice())?;
      }
    }
    wtx.commit()?;

    Ok(())
  }

  pub fn avatar_by_pin(&self, pin_id: &str) -> Result<Option<Avatar>> {
    self.get_json(AVATAR_PIN, pin_id)
  }

  pub fn avatars(&self, cursor: &str, size: usize) -> Result<Page<Avatar>> {
    self.scan_rev(AVATAR_PIN, "", cursor, size, |avatar: &Avatar| {
      avatar.status == Status::Success
    })
  }

  /// Current avatar for a meta_id: the `avatar_latest` pointer, falling
  /// back to the newest entry of the by-timestamp index.
  pub fn latest_avatar_by_metaid(&self, meta_id: &str) -> Result<Option<Avatar>> {
    if let Some(avatar) = self.get_json(AVATAR_LATEST, meta_id)? {
      return Ok(Some(avatar));
    }

    let page = self.scan_rev(
      AVATAR_META_TS,
      &format!("{meta_id}:"),
      "",
      1,
      |_: &Avatar| true,
    )?;
    Ok(page.items.into_iter().next())
  }

  /// Newest avatar observed for an address.
  pub fn latest_avatar_by_address(&self, address: &str) -> Result<Option<Avatar>> {
    let page = self.scan_rev(
      AVATAR_ADDR,
      &format!("{address}:"),
      "",
      1,
      |_: &Avatar| true,
    )?;
    Ok(page.items.into_iter().next())
  }

  // sync status

  pub fn sync_status(&self, chain_name: &str) -> Result<Option<SyncStatus>> {
    self.get_json(SYNC_STATUS, chain_name)
  }

  pub fn create_or_update_sync_status(&self, status: &SyncStatus) -> Result {
    let value = serde_json::to_vec(status)?;

    let wtx = self.database.begin_write()?;
    wtx
      .open_table(SYNC_STATUS)?
      .insert(status.chain_name.as_str(), value.as_slice())?;
    wtx.commit()?;

    Ok(())
  }

  /// Durable cursor advance; the scanner calls this only after every PIN of
  /// the block has been written.
  pub fn update_sync_height(&self, chain_name: &str, height: u64) -> Result {
    let wtx = self.database.begin_write()?;
    {
      let mut table = wtx.open_table(SYNC_STATUS)?;

      let mut status = match table.get(chain_name)? {
        Some(guard) => serde_json::from_slice::<SyncStatus>(guard.value())?,
        None => SyncStatus {
          chain_name: chain_name.into(),
          created_at: Utc::now(),
          ..Default::default()
        },
      };

      status.current_sync_height = height;
      status.updated_at = Utc::now();

      let value = serde_json::to_vec(&status)?;
      table.insert(chain_name, value.as_slice())?;
    }
    wtx.commit()?;

    Ok(())
  }

  // upload records

  pub fn upload_file(&self, file_id: &str) -> Result<Option<UploadFile>> {
    self.get_json(UPLOAD_FILE, file_id)
  }

  pub fn put_upload_file(&self, file: &UploadFile) -> Result {
    let value = serde_json::to_vec(file)?;

    let wtx = self.database.begin_write()?;
    wtx
      .open_table(UPLOAD_FILE)?
      .insert(file.file_id.as_str(), value.as_slice())?;
    wtx.commit()?;

    Ok(())
  }

  /// Compare-and-set transition to `success`. The first caller wins; later
  /// callers get the stored record back unchanged, so concurrent uploads of
  /// the same file_id converge on one `(tx_id, pin_id)`.
  pub fn complete_upload(&self, file_id: &str, tx_id: &str, pin_id: &str) -> Result<UploadFile> {
    let wtx = self.database.begin_write()?;
    let stored = {
      let mut table = wtx.open_table(UPLOAD_FILE)?;

      let mut record = match table.get(file_id)? {
        Some(guard) => serde_json::from_slice::<UploadFile>(guard.value())?,
        None => bail!("upload record not found: {file_id}"),
      };

      if record.status != Status::Success {
        record.tx_id = tx_id.into();
        record.pin_id = pin_id.into();
        record.status = Status::Success;
        record.updated_at = Utc::now();

        let value = serde_json::to_vec(&record)?;
        table.insert(file_id, value.as_slice())?;
      }

      record
    };
    wtx.commit()?;

    Ok(stored)
  }

  /// Marks a pending upload failed; `success` records are left untouched.
  pub fn fail_upload(&self, file_id: &str) -> Result {
    let wtx = self.database.begin_write()?;
    {
      let mut table = wtx.open_table(UPLOAD_FILE)?;

      let record = match table.get(file_id)? {
        Some(guard) => serde_json::from_slice::<UploadFile>(guard.value())?,
        None => return Ok(()),
      };

      if record.status == Status::Pending {
        let mut record = record;
        record.status = Status::Failed;
        record.updated_at = Utc::now();

        let value = serde_json::to_vec(&record)?;
        table.insert(file_id, value.as_slice())?;
      }
    }
    wtx.commit()?;

    Ok(())
  }

  // internals

  fn get_json<T: DeserializeOwned>(&self, table: Collection, key: &str) -> Result<Option<T>> {
    let rtx = self.database.begin_read()?;
    let table = rtx.open_table(table)?;

    match table.get(key)? {
      Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
      None => Ok(None),
    }
  }

  /// Reverse range scan over `[prefix, prefix ‖ '~')`, continuing strictly
  /// past `cursor` when one is given, collecting up to `size` records that
  /// pass `keep`.
  fn scan_rev<T: DeserializeOwned>(
    &self,
    table: Collection,
    prefix: &str,
    cursor: &str,
    size: usize,
    keep: impl Fn(&T) -> bool,
  ) -> Result<Page<T>> {
    let rtx = self.database.begin_read()?;
    let table = rtx.open_table(table)?;

    let upper = format!("{prefix}{PREFIX_UPPER_BOUND}");
    let hi: &str = if cursor.is_empty() || cursor >= upper.as_str() {
      &upper
    } else {
      cursor
    };

    let mut items = Vec::new();
    let mut next_cursor = String::new();

    if hi > prefix {
      for entry in table.range(prefix..hi)?.rev() {
        let (key, value) = entry?;
        let item: T = serde_json::from_slice(value.value())?;
        if !keep(&item) {
          continue;
        }

        next_cursor = key.value().to_string();
        items.push(item);

        if items.len() == size {
          break;
        }
      }
    }

    let has_more = items.len() == size;

    Ok(Page {
      items,
      next_cursor,
      has_more,
    })
  }
}

/// Fixed-width zero-padded encoding so lexicographic order equals numeric
/// order for height and timestamp sub-keys.
fn encode_u64(value: u64) -> String {
  format!("{value:012}")
}
