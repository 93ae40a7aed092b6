//! JSON-RPC 1.0 client for the chain node, HTTP Basic auth.
//!
//! Server-reported errors (`{code, message}`) are surfaced as
//! [`RpcError::Server`], distinct from transport failures and malformed
//! responses; all three are recoverable from the scan loop.

use {super::*, serde_json::json};

/// Bound on any single node round-trip, so shutdown never waits on a hung
/// call indefinitely.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
  #[error("rpc error {code}: {message}")]
  Server { code: i64, message: String },
  #[error("rpc transport error: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("unexpected rpc response: {0}")]
  Decode(String),
}

pub type RpcResult<T> = std::result::Result<T, RpcError>;

#[derive(Clone)]
pub struct RpcClient {
  http: reqwest::Client,
  url: String,
  user: String,
  pass: String,
}

#[derive(Deserialize)]
struct Response<T> {
  result: Option<T>,
  error: Option<ErrorObject>,
}

#[derive(Deserialize)]
struct ErrorObject {
  code: i64,
  message: String,
}

/// `getblock` verbosity 2 result, narrowed to what the scanner consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct Block {
  pub height: u64,
  pub time: i64,
  pub tx: Vec<BlockTx>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockTx {
  pub txid: String,
}

impl RpcClient {
  pub fn new(url: impl Into<String>, user: impl Into<String>, pass: impl Into<String>) -> Self {
    Self {
      http: reqwest::Client::new(),
      url: url.into(),
      user: user.into(),
      pass: pass.into(),
    }
  }

  pub async fn get_block_count(&self) -> RpcResult<u64> {
    self.call("getblockcount", json!([])).await
  }

  pub async fn get_block_hash(&self, height: u64) -> RpcResult<String> {
    self.call("getblockhash", json!([height])).await
  }

  pub async fn get_block(&self, hash: &str) -> RpcResult<Block> {
    self.call("getblock", json!([hash, 2])).await
  }

  /// Raw transaction hex.
  pub async fn get_raw_transaction(&self, txid: &str) -> RpcResult<String> {
    self.call("getrawtransaction", json!([txid, false])).await
  }

  /// Broadcasts a raw transaction, returning the txid the node reports.
  pub async fn send_raw_transaction(&self, hex: &str) -> RpcResult<String> {
    self.call("sendrawtransaction", json!([hex])).await
  }

  async fn call<T: serde::de::DeserializeOwned>(
    &self,
    method: &str,
    params: serde_json::Value,
  ) -> RpcResult<T> {
    let body = json!({
      "jsonrpc": "1.0",
      "id": method,
      "method": method,
      "params": params,
    });

    let response: Response<T> = self
      .http
      .post(&self.url)
      .timeout(REQUEST_TIMEOUT)
      .basic_auth(&self.user, Some(&self.pass))
      .json(&body)
      .send()
      .await?
      .json()
      .await?;

    if let Some(error) = response.error {
      return Err(RpcError::Server {
        code: error.code,
        message: error.message,
      });
    }

    response
      .result
      .ok_or_else(|| RpcError::Decode(format!("`{method}` returned neither result nor error")))
  }
}
