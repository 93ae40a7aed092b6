//! Block scanner and inscription handler.
//!
//! A single long-lived task pulls blocks from the chain node, extracts
//! MetaID PINs, writes their content to the blob store, fans metadata out
//! to the index collections, and advances the durable sync cursor. The
//! cursor is only advanced after every PIN of a block has been written, so
//! a restart re-processes at most the block that was in flight.

use {
  super::*,
  metaid::Pin,
  tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{mpsc, watch},
  },
};

pub struct Indexer {
  chain: Chain,
  rpc: RpcClient,
  index: Arc<Index>,
  storage: Arc<dyn BlobStore>,
  scan_interval: Duration,
  batch_size: u64,
  notify_address: Option<String>,
  storage_type: String,
  cursor: u64,
  shutdown: watch::Receiver<bool>,
}

impl Indexer {
  /// Builds the scanner, resolving its start height as
  /// `max(configured_start_height, current_sync_height + 1)` and falling
  /// back to the chain's configured init height when neither exists. A
  /// missing sync record is bootstrapped at `start − 1` so the first
  /// scanned block advances it.
  pub fn new(
    settings: &Settings,
    index: Arc<Index>,
    storage: Arc<dyn BlobStore>,
    shutdown: watch::Receiver<bool>,
  ) -> Result<Self> {
    let chain = settings.chain;

    let configured = if settings.start_height > 0 {
      settings.start_height
    } else {
      settings.init_block_height()
    };

    let cursor = match index.sync_status(chain.name())? {
      Some(status) => configured.max(status.current_sync_height + 1),
      None => {
        let now = Utc::now();
        index.create_or_update_sync_status(&SyncStatus {
          chain_name: chain.name().into(),
          current_sync_height: configured.saturating_sub(1),
          created_at: now,
          updated_at: now,
        })?;
        configured
      }
    };

    log::info!("indexer will start from block height {cursor} (chain: {chain})");

    Ok(Self {
      chain,
      rpc: RpcClient::new(&settings.rpc_url, &settings.rpc_user, &settings.rpc_pass),
      index,
      storage,
      scan_interval: settings.scan_interval,
      batch_size: settings.batch_size.max(1),
      notify_address: settings
        .notify_enabled
        .then(|| settings.notify_address.clone())
        .filter(|address| !address.is_empty()),
      storage_type: settings.storage_type.clone(),
      cursor,
      shutdown,
    })
  }

  /// Pull loop. Wakes on the scan interval, or early on a notifier hint;
  /// hints are advisory and correctness does not depend on them.
  pub async fn run(mut self) -> Result {
    let mut wake = self.spawn_notifier();

    loop {
      if *self.shutdown.borrow() {
        break;
      }

      if let Err(err) = self.sync_once().await {
        log::warn!("scan failed at height {}: {err:#}", self.cursor);
      }

      let mut shutdown = self.shutdown.clone();
      tokio::select! {
        _ = shutdown.changed() => break,
        _ = tokio::time::sleep(self.scan_interval) => {}
        _ = wake_hint(&mut wake) => {
          log::debug!("woken by block notification");
        }
      }
    }

    log::info!("indexer stopped at height {}", self.cursor);

    Ok(())
  }

  /// Scans from the cursor towards the tip, at most `batch_size` blocks per
  /// call, advancing the durable cursor after each fully indexed block.
  /// Returns the next height to scan. A failed block leaves the cursor in
  /// place so the same height is retried on the next wake.
  pub async fn sync_once(&mut self) -> Result<u64> {
    let tip = self.rpc.get_block_count().await?;

    let mut scanned = 0;
    while self.cursor <= tip && scanned < self.batch_size {
      if *self.shutdown.borrow() {
        break;
      }

      self.index_block(self.cursor).await?;
      self.index.update_sync_height(self.chain.name(), self.cursor)?;

      self.cursor += 1;
      scanned += 1;
    }

    Ok(self.cursor)
  }

  async fn index_block(&self, height: u64) -> Result {
    let hash = self.rpc.get_block_hash(height).await?;
    let block = self.rpc.get_block(&hash).await?;

    log::info!(
      "block {height} with {} transactions…",
      block.tx.len()
    );

    for tx_ref in &block.tx {
      let raw = match self.rpc.get_raw_transaction(&tx_ref.txid).await {
        Ok(raw) => raw,
        Err(err) => {
          log::warn!("failed to fetch transaction {}: {err}", tx_ref.txid);
          continue;
        }
      };

      let Some(tx) = decode_transaction(&raw) else {
        log::warn!("failed to decode transaction {}", tx_ref.txid);
        continue;
      };

      let pins = metaid::pins_in_transaction(&tx);
      if pins.is_empty() {
        continue;
      }

      self.handle_transaction(pins, height, block.time).await?;
    }

    Ok(())
  }

  /// Processes a transaction's PINs in output-index order. Storage and
  /// index write failures propagate so the hosting block is retried and the
  /// cursor never advances past an unindexed PIN.
  async fn handle_transaction(&self, pins: Vec<Pin>, height: u64, timestamp: i64) -> Result {
    for pin in pins {
      let path = &pin.data.path;
      if path.contains("/file") {
        log::info!(
          "processing file PIN {} (path: {path}, operation: {})",
          pin.id(),
          pin.data.operation,
        );
        self.process_file(&pin, height, timestamp).await?;
      } else if path.contains("/info/avatar") {
        log::info!(
          "processing avatar PIN {} (path: {path}, operation: {})",
          pin.id(),
          pin.data.operation,
        );
        self.process_avatar(&pin, height, timestamp).await?;
      }
    }

    Ok(())
  }

  async fn process_file(&self, pin: &Pin, height: u64, timestamp: i64) -> Result {
    let pin_id = pin.id();
    let content = &pin.data.content;

    if let Some(mut existing) = self.index.file_by_pin(&pin_id)? {
      if existing.file_md5 != md5_hex(content) {
        log::warn!("conflicting content for already indexed PIN {pin_id}; keeping the existing record");
        return Ok(());
      }
      if height > existing.block_height {
        existing.block_height = height;
        existing.updated_at = Utc::now();
        self.index.update_file(&existing)?;
      }
      return Ok(());
    }

    let creator_address = self.resolve_creator_address(pin).await;
    let creator_meta_id = meta_id_of(&creator_address);

    let detected = media::detect_content_type(content, &pin.data.content_type);
    let file_extension = media::file_extension(&pin.data.path, &detected);
    let storage_path = storage::file_storage_path(self.chain.name(), &pin_id, &file_extension);

    self
      .storage
      .save(&storage_path, Bytes::from(content.clone()))
      .await
      .with_context(|| format!("failed to save content of PIN {pin_id}"))?;

    let now = Utc::now();
    let file = File {
      pin_id: pin_id.clone(),
      tx_id: pin.txid.to_string(),
      vout: pin.vout,
      path: pin.data.path.clone(),
      operation: pin.data.operation.clone(),
      parent_path: pin.data.parent_path.clone(),
      encryption: pin.data.encryption.clone(),
      version: pin.data.version.clone(),
      content_type: pin.data.content_type.clone(),
      file_type: media::file_type(&detected).into(),
      file_extension,
      file_name: media::file_name(&pin.data.path),
      file_size: content.len() as u64,
      file_md5: md5_hex(content),
      file_hash: sha256_hex(content),
      storage_type: self.storage_type.clone(),
      storage_path,
      chain_name: self.chain.name().into(),
      block_height: height,
      timestamp,
      creator_meta_id: creator_meta_id.clone(),
      creator_address: creator_address.clone(),
      owner_address: creator_address,
      owner_meta_id: creator_meta_id,
      status: Status::Success,
      state: index::entry::STATE_EXIST,
      created_at: now,
      updated_at: now,
    };

    self
      .index
      .put_file(&file)
      .with_context(|| format!("failed to index PIN {pin_id}"))?;

    log::info!(
      "file indexed: pin={pin_id} path={} type={} size={}",
      file.path,
      file.file_type,
      file.file_size,
    );

    Ok(())
  }

  async fn process_avatar(&self, pin: &Pin, height: u64, timestamp: i64) -> Result {
    let pin_id = pin.id();
    let content = &pin.data.content;

    if let Some(mut existing) = self.index.avatar_by_pin(&pin_id)? {
      if existing.file_md5 != md5_hex(content) {
        log::warn!("conflicting content for already indexed PIN {pin_id}; keeping the existing record");
        return Ok(());
      }
      if height > existing.block_height {
        existing.block_height = height;
        existing.updated_at = Utc::now();
        self.index.update_avatar(&existing)?;
      }
      return Ok(());
    }

    let creator_address = self.resolve_creator_address(pin).await;
    let meta_id = meta_id_of(&creator_address);

    let detected = media::detect_content_type(content, &pin.data.content_type);
    let file_extension = media::extension_for_content_type(&detected).to_string();
    let storage_path = storage::avatar_storage_path(
      self.chain.name(),
      &pin.txid.to_string(),
      &pin_id,
      &file_extension,
    );

    self
      .storage
      .save(&storage_path, Bytes::from(content.clone()))
      .await
      .with_context(|| format!("failed to save content of PIN {pin_id}"))?;

    let now = Utc::now();
    let avatar = Avatar {
      pin_id: pin_id.clone(),
      tx_id: pin.txid.to_string(),
      meta_id,
      address: creator_address,
      storage_type: self.storage_type.clone(),
      storage_path,
      content_type: pin.data.content_type.clone(),
      file_size: content.len() as u64,
      file_md5: md5_hex(content),
      file_hash: sha256_hex(content),
      file_extension,
      file_type: media::file_type(&detected).into(),
      chain_name: self.chain.name().into(),
      block_height: height,
      timestamp,
      status: Status::Success,
      created_at: now,
      updated_at: now,
    };

    self
      .index
      .put_avatar(&avatar)
      .with_context(|| format!("failed to index PIN {pin_id}"))?;

    log::info!(
      "avatar indexed: pin={pin_id} meta_id={} size={}",
      avatar.meta_id,
      avatar.file_size,
    );

    Ok(())
  }

  /// Resolves the creator address through the PIN's creator input location,
  /// a `txid:vout` reference to a prior output. Any failure falls back to
  /// the payload-declared address (empty on this wire format).
  async fn resolve_creator_address(&self, pin: &Pin) -> String {
    let Some(location) = &pin.creator_input_location else {
      return String::new();
    };

    match self.lookup_output_address(location).await {
      Ok(address) => address,
      Err(err) => {
        log::warn!("failed to resolve creator address from {location}: {err:#}");
        String::new()
      }
    }
  }

  async fn lookup_output_address(&self, location: &str) -> Result<String> {
    let (txid, vout) = location
      .split_once(':')
      .ok_or_else(|| anyhow!("malformed creator input location `{location}`"))?;
    let vout: usize = vout.parse()?;

    let raw = self.rpc.get_raw_transaction(txid).await?;
    let tx = decode_transaction(&raw).ok_or_else(|| anyhow!("undecodable transaction {txid}"))?;

    let output = tx
      .output
      .get(vout)
      .ok_or_else(|| anyhow!("transaction {txid} has no output {vout}"))?;

    self
      .chain
      .address_from_script(&output.script_pubkey)
      .ok_or_else(|| anyhow!("output {location} has no standard address"))
  }

  fn spawn_notifier(&self) -> Option<mpsc::Receiver<()>> {
    let address = self.notify_address.clone()?;
    let (hint_tx, hint_rx) = mpsc::channel(1);

    tokio::spawn(async move {
      loop {
        match tokio::net::TcpStream::connect(&address).await {
          Ok(stream) => {
            log::info!("block notifier connected to {address}");
            let mut lines = BufReader::new(stream).lines();
            loop {
              match lines.next_line().await {
                Ok(Some(_)) => {
                  let _ = hint_tx.try_send(());
                }
                Ok(None) => break,
                Err(err) => {
                  log::warn!("block notifier read error: {err}");
                  break;
                }
              }
            }
          }
          Err(err) => {
            log::warn!("block notifier connection to {address} failed: {err}");
          }
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
      }
    });

    Some(hint_rx)
  }
}

async fn wake_hint(wake: &mut Option<mpsc::Receiver<()>>) {
  match wake {
    Some(receiver) => {
      if receiver.recv().await.is_none() {
        std::future::pending::<()>().await
      }
    }
    None => std::future::pending().await,
  }
}

fn decode_transaction(raw_hex: &str) -> Option<Transaction> {
  let bytes = hex::decode(raw_hex.trim()).ok()?;
  consensus::deserialize(&bytes).ok()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decode_transaction_rejects_garbage() {
    assert!(decode_transaction("zz").is_none());
    assert!(decode_transaction("00").is_none());
  }

  #[test]
  fn transaction_hex_round_trips() {
    let tx = Transaction {
      version: bitcoin::transaction::Version::ONE,
      lock_time: bitcoin::absolute::LockTime::ZERO,
      input: vec![bitcoin::TxIn {
        previous_output: bitcoin::OutPoint::null(),
        script_sig: bitcoin::ScriptBuf::new(),
        sequence: bitcoin::Sequence::MAX,
        witness: bitcoin::Witness::new(),
      }],
      output: vec![bitcoin::TxOut {
        value: bitcoin::Amount::from_sat(1_000),
        script_pubkey: bitcoin::ScriptBuf::from_bytes(vec![0x51]),
      }],
    };

    let raw = hex::encode(consensus::serialize(&tx));
    assert_eq!(decode_transaction(&raw).unwrap(), tx);
    assert_eq!(hex::encode(consensus::serialize(&decode_transaction(&raw).unwrap())), raw);
  }
}
