//! End-to-end scanner tests against an in-process mock chain node that
//! speaks the five JSON-RPC methods the indexer uses.

use {
  bitcoin::{
    absolute::LockTime, consensus, transaction::Version, Amount, OutPoint, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Witness,
  },
  metapin::{
    chain::Chain,
    index::{entry::Status, Index},
    indexer::Indexer,
    settings::Settings,
    storage::{BlobStore, LocalStore},
  },
  serde_json::{json, Value},
  std::{
    collections::HashMap,
    sync::{Arc, Mutex},
  },
  tempfile::TempDir,
  tokio::sync::watch,
};

#[derive(Default)]
struct NodeState {
  start_height: u64,
  blocks: Vec<MockBlock>,
  transactions: HashMap<String, String>,
  requested_heights: Vec<u64>,
}

struct MockBlock {
  time: i64,
  txids: Vec<String>,
}

#[derive(Clone, Default)]
struct MockNode {
  state: Arc<Mutex<NodeState>>,
}

impl MockNode {
  fn push_block(&self, time: i64, transactions: &[&Transaction]) {
    let mut state = self.state.lock().unwrap();
    let mut txids = Vec::new();
    for tx in transactions {
      let txid = tx.compute_txid().to_string();
      state
        .transactions
        .insert(txid.clone(), hex::encode(consensus::serialize(*tx)));
      txids.push(txid);
    }
    state.blocks.push(MockBlock {
      time,
      txids,
    });
  }

  /// Registers a transaction that is reachable via `getrawtransaction` but
  /// not part of any block, like a long-confirmed funding transaction.
  fn register_transaction(&self, tx: &Transaction) {
    let mut state = self.state.lock().unwrap();
    state.transactions.insert(
      tx.compute_txid().to_string(),
      hex::encode(consensus::serialize(tx)),
    );
  }

  fn requested_heights(&self) -> Vec<u64> {
    self.state.lock().unwrap().requested_heights.clone()
  }

  async fn serve(&self) -> String {
    let node = self.clone();

    let router = axum::Router::new().route(
      "/",
      axum::routing::post(move |axum::Json(request): axum::Json<Value>| {
        let node = node.clone();
        async move { axum::Json(node.handle(request)) }
      }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
      axum::serve(listener, router).await.unwrap();
    });

    url
  }

  fn handle(&self, request: Value) -> Value {
    let method = request["method"].as_str().unwrap_or_default();
    let params = request["params"].clone();
    let mut state = self.state.lock().unwrap();

    let result = match method {
      "getblockcount" => {
        json!((state.start_height + state.blocks.len() as u64).saturating_sub(1))
      }
      "getblockhash" => {
        let height = params[0].as_u64().unwrap();
        state.requested_heights.push(height);
        match height.checked_sub(state.start_height) {
          Some(offset) if (offset as usize) < state.blocks.len() => {
            json!(format!("hash-{height}"))
          }
          _ => return rpc_error(-8, "Block height out of range"),
        }
      }
      "getblock" => {
        let hash = params[0].as_str().unwrap_or_default();
        let height: u64 = match hash.strip_prefix("hash-").and_then(|h| h.parse().ok()) {
          Some(height) => height,
          None => return rpc_error(-5, "Block not found"),
        };
        let block = &state.blocks[(height - state.start_height) as usize];
        json!({
          "height": height,
          "time": block.time,
          "tx": block.txids.iter().map(|txid| json!({"txid": txid})).collect::<Vec<Value>>(),
        })
      }
      "getrawtransaction" => {
        let txid = params[0].as_str().unwrap_or_default();
        match state.transactions.get(txid) {
          Some(raw) => json!(raw),
          None => return rpc_error(-5, "No such mempool or blockchain transaction"),
        }
      }
      "sendrawtransaction" => {
        let raw = params[0].as_str().unwrap_or_default();
        let bytes = match hex::decode(raw) {
          Ok(bytes) => bytes,
          Err(_) => return rpc_error(-22, "TX decode failed"),
        };
        match consensus::deserialize::<Transaction>(&bytes) {
          Ok(tx) => json!(tx.compute_txid().to_string()),
          Err(_) => return rpc_error(-22, "TX decode failed"),
        }
      }
      _ => return rpc_error(-32601, "Method not found"),
    };

    json!({"result": result, "error": null, "id": request["id"]})
  }
}

fn rpc_error(code: i64, message: &str) -> Value {
  json!({"result": null, "error": {"code": code, "message": message}, "id": null})
}

const CREATOR_HASH: [u8; 20] = [7; 20];

fn creator_address() -> String {
  let mut payload = vec![0x00];
  payload.extend_from_slice(&CREATOR_HASH);
  bitcoin::base58::encode_check(&payload)
}

/// A confirmed transaction whose first output pays the creator address.
fn funding_transaction() -> Transaction {
  Transaction {
    version: Version::ONE,
    lock_time: LockTime::ZERO,
    input: vec![TxIn {
      previous_output: OutPoint::null(),
      script_sig: ScriptBuf::from_bytes(vec![0x01, 0x02]),
      sequence: Sequence::MAX,
      witness: Witness::new(),
    }],
    output: vec![TxOut {
      value: Amount::from_sat(100_000),
      script_pubkey: Chain::Mvc.pay_to_address_script(&creator_address()).unwrap(),
    }],
  }
}

fn inscription_transaction(funding: &Transaction, data: &metaid::MetaIdData) -> Transaction {
  Transaction {
    version: Version::ONE,
    lock_time: LockTime::ZERO,
    input: vec![TxIn {
      previous_output: OutPoint {
        txid: funding.compute_txid(),
        vout: 0,
      },
      script_sig: ScriptBuf::from_bytes(vec![0x03, 0x04]),
      sequence: Sequence::MAX,
      witness: Witness::new(),
    }],
    output: vec![TxOut {
      value: Amount::ZERO,
      script_pubkey: data.to_script(),
    }],
  }
}

struct Harness {
  node: MockNode,
  index: Arc<Index>,
  storage: Arc<dyn BlobStore>,
  _data_dir: TempDir,
  _blob_dir: TempDir,
}

impl Harness {
  fn new() -> Self {
    let data_dir = TempDir::new().unwrap();
    let blob_dir = TempDir::new().unwrap();
    Self {
      node: MockNode::default(),
      index: Arc::new(Index::open(data_dir.path()).unwrap()),
      storage: Arc::new(LocalStore::new(blob_dir.path().to_path_buf()).unwrap()),
      _data_dir: data_dir,
      _blob_dir: blob_dir,
    }
  }

  async fn indexer(&self, start_height: u64) -> Indexer {
    let url = self.node.serve().await;
    let settings = Settings {
      chain: Chain::Mvc,
      rpc_url: url,
      start_height,
      ..Default::default()
    };
    let (_shutdown, rx) = watch::channel(false);
    Indexer::new(&settings, self.index.clone(), self.storage.clone(), rx).unwrap()
  }
}

#[tokio::test]
async fn single_chunk_file_is_fully_indexed() {
  let harness = Harness::new();

  let funding = funding_transaction();
  harness.node.register_transaction(&funding);

  let data = metaid::MetaIdData::new(
    "create",
    "/file/hello.txt",
    "0",
    "1.0.0",
    "text/plain",
    b"hello".to_vec(),
  );
  let tx = inscription_transaction(&funding, &data);
  {
    let mut state = harness.node.state.lock().unwrap();
    state.start_height = 100;
  }
  harness.node.push_block(1_700_000_000, &[&tx]);

  let mut indexer = harness.indexer(100).await;
  indexer.sync_once().await.unwrap();

  let pin_id = format!("{}i0", tx.compute_txid());
  let file = harness.index.file_by_pin(&pin_id).unwrap().unwrap();

  assert_eq!(file.file_md5, "5d41402abc4b2a76b9719d911017c592");
  assert_eq!(
    file.file_hash,
    "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
  );
  assert_eq!(file.file_type, "text");
  assert_eq!(file.file_extension, ".txt");
  assert_eq!(file.file_name, "hello.txt");
  assert_eq!(file.file_size, 5);
  assert_eq!(file.storage_path, format!("indexer/mvc/{pin_id}.txt"));
  assert_eq!(file.block_height, 100);
  assert_eq!(file.timestamp, 1_700_000_000);
  assert_eq!(file.status, Status::Success);
  assert_eq!(file.creator_address, creator_address());
  assert_eq!(file.creator_meta_id, metapin::meta_id_of(&creator_address()));
  assert_eq!(file.parent_path, "/file");

  // reachable through every secondary index
  assert_eq!(
    harness
      .index
      .files_by_address(&creator_address(), "", 10)
      .unwrap()
      .items
      .len(),
    1,
  );
  assert_eq!(
    harness
      .index
      .files_by_metaid(&file.creator_meta_id, "", 10)
      .unwrap()
      .items
      .len(),
    1,
  );
  assert_eq!(
    harness
      .index
      .files_by_md5(&file.file_md5, "", 10)
      .unwrap()
      .items
      .len(),
    1,
  );

  // blob round trip
  let stored = harness.storage.get(&file.storage_path).await.unwrap();
  assert_eq!(stored.as_ref(), b"hello");

  // cursor advanced durably
  assert_eq!(
    harness
      .index
      .sync_status("mvc")
      .unwrap()
      .unwrap()
      .current_sync_height,
    100,
  );
}

#[tokio::test]
async fn multi_chunk_image_content_is_byte_identical() {
  let harness = Harness::new();

  let funding = funding_transaction();
  harness.node.register_transaction(&funding);

  let mut content = b"\x89PNG\r\n\x1a\n".to_vec();
  content.extend((0..1292).map(|i| (i % 251) as u8));
  assert_eq!(content.len(), 1300);

  let data = metaid::MetaIdData::new(
    "create",
    "/file/pic.png",
    "0",
    "1.0.0",
    "application/octet-stream",
    content.clone(),
  );
  let tx = inscription_transaction(&funding, &data);
  harness.node.push_block(1_700_000_100, &[&tx]);

  let mut indexer = harness.indexer(0).await;
  indexer.sync_once().await.unwrap();

  let pin_id = format!("{}i0", tx.compute_txid());
  let file = harness.index.file_by_pin(&pin_id).unwrap().unwrap();

  // detected from the magic number regardless of the declared type
  assert_eq!(file.file_type, "image");
  assert_eq!(file.file_extension, ".png");
  assert_eq!(file.file_size, 1300);

  let stored = harness.storage.get(&file.storage_path).await.unwrap();
  assert_eq!(stored.as_ref(), content.as_slice());
}

#[tokio::test]
async fn avatar_latest_wins_by_timestamp_in_either_arrival_order() {
  for reversed in [false, true] {
    let harness = Harness::new();

    let funding = funding_transaction();
    harness.node.register_transaction(&funding);

    let avatar = |content: &[u8]| {
      metaid::MetaIdData::new(
        "create",
        "/info/avatar",
        "0",
        "1.0.0",
        "image/png",
        content.to_vec(),
      )
    };
    let first = inscription_transaction(&funding, &avatar(b"avatar-one"));
    let second = inscription_transaction(&funding, &avatar(b"avatar-two"));

    let (early_time, late_time) = (100, 200);
    if reversed {
      harness.node.push_block(late_time, &[&second]);
      harness.node.push_block(early_time, &[&first]);
    } else {
      harness.node.push_block(early_time, &[&first]);
      harness.node.push_block(late_time, &[&second]);
    }

    let mut indexer = harness.indexer(0).await;
    indexer.sync_once().await.unwrap();

    let meta_id = metapin::meta_id_of(&creator_address());
    let latest = harness
      .index
      .latest_avatar_by_metaid(&meta_id)
      .unwrap()
      .unwrap();

    assert_eq!(latest.timestamp, late_time, "reversed: {reversed}");
    assert_eq!(latest.pin_id, format!("{}i0", second.compute_txid()));
  }
}

#[tokio::test]
async fn duplicate_pin_raises_height_without_duplicating_indexes() {
  let harness = Harness::new();

  let funding = funding_transaction();
  harness.node.register_transaction(&funding);

  let data = metaid::MetaIdData::new(
    "create",
    "/file/dup.txt",
    "0",
    "1.0.0",
    "text/plain",
    b"same bytes".to_vec(),
  );
  let tx = inscription_transaction(&funding, &data);

  {
    let mut state = harness.node.state.lock().unwrap();
    state.start_height = 50;
  }
  // the same transaction confirmed at 50 and re-observed at 60
  harness.node.push_block(1_000, &[&tx]);
  for height in 51..60 {
    harness.node.push_block(1_000 + height as i64, &[]);
  }
  harness.node.push_block(1_010, &[&tx]);

  let mut indexer = harness.indexer(50).await;
  indexer.sync_once().await.unwrap();

  let pin_id = format!("{}i0", tx.compute_txid());
  let file = harness.index.file_by_pin(&pin_id).unwrap().unwrap();
  assert_eq!(file.block_height, 60);

  let by_md5 = harness.index.files_by_md5(&file.file_md5, "", 10).unwrap();
  assert_eq!(by_md5.items.len(), 1);
  assert_eq!(harness.index.files("", 10).unwrap().items.len(), 1);
}

#[tokio::test]
async fn restart_resumes_past_the_persisted_cursor() {
  let harness = Harness::new();

  // a previous run stopped at height 1000
  harness.index.update_sync_height("mvc", 1000).unwrap();

  let funding = funding_transaction();
  harness.node.register_transaction(&funding);

  let data = metaid::MetaIdData::new(
    "create",
    "/file/late.txt",
    "0",
    "1.0.0",
    "text/plain",
    b"late".to_vec(),
  );
  let tx = inscription_transaction(&funding, &data);
  {
    let mut state = harness.node.state.lock().unwrap();
    state.start_height = 1001;
  }
  harness.node.push_block(2_000, &[&tx]);

  // configured start height is far behind the cursor
  let mut indexer = harness.indexer(500).await;
  indexer.sync_once().await.unwrap();

  // blocks 500..=1000 were never requested
  let requested = harness.node.requested_heights();
  assert!(!requested.is_empty());
  assert!(requested.iter().all(|height| *height >= 1001));

  let pin_id = format!("{}i0", tx.compute_txid());
  let file = harness.index.file_by_pin(&pin_id).unwrap().unwrap();
  assert_eq!(file.block_height, 1001);
  assert_eq!(
    harness
      .index
      .sync_status("mvc")
      .unwrap()
      .unwrap()
      .current_sync_height,
    1001,
  );
}

#[tokio::test]
async fn inscription_less_transactions_are_skipped() {
  let harness = Harness::new();

  let plain = funding_transaction();
  harness.node.push_block(1_000, &[&plain]);

  let mut indexer = harness.indexer(0).await;
  indexer.sync_once().await.unwrap();

  assert_eq!(harness.index.count_files().unwrap(), 0);
  assert_eq!(
    harness
      .index
      .sync_status("mvc")
      .unwrap()
      .unwrap()
      .current_sync_height,
    0,
  );
}

#[tokio::test]
async fn broadcast_round_trips_through_the_node() {
  let harness = Harness::new();
  let url = harness.node.serve().await;
  let rpc = metapin::rpc::RpcClient::new(url, "user", "pass");

  let tx = funding_transaction();
  let raw = hex::encode(consensus::serialize(&tx));
  let txid = rpc.send_raw_transaction(&raw).await.unwrap();
  assert_eq!(txid, tx.compute_txid().to_string());

  assert!(matches!(
    rpc.send_raw_transaction("not-hex").await,
    Err(metapin::rpc::RpcError::Server { code: -22, .. }),
  ));
}
