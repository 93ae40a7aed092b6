use {
  self::{
    chain::Chain,
    index::{
      entry::{Avatar, File, Status, SyncStatus, UploadFile},
      Index,
    },
    options::{Arguments, Options},
    rpc::RpcClient,
    settings::Settings,
    storage::BlobStore,
  },
  anyhow::{anyhow, bail, Context},
  bitcoin::{consensus, Transaction},
  bytes::Bytes,
  chrono::{DateTime, Utc},
  clap::Parser,
  serde::{Deserialize, Serialize},
  std::{
    fmt::{self, Display, Formatter},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
  },
};

pub mod chain;
pub mod index;
pub mod indexer;
pub mod media;
pub mod options;
pub mod rpc;
pub mod server;
pub mod settings;
pub mod storage;
pub mod subcommand;
pub mod uploader;

pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;

/// SHA-256 hex of an address, the stable pseudonymous identity key of the
/// MetaID protocol. Empty addresses map to the empty string.
pub fn meta_id_of(address: &str) -> String {
  if address.is_empty() {
    return String::new();
  }
  sha256_hex(address.as_bytes())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
  use sha2::{Digest, Sha256};
  hex::encode(Sha256::digest(bytes))
}

pub fn md5_hex(bytes: &[u8]) -> String {
  use md5::{Digest, Md5};
  hex::encode(Md5::digest(bytes))
}

pub async fn run() -> Result {
  let arguments = Arguments::parse();
  let settings = Settings::load(&arguments.options)?;
  arguments.subcommand.run(settings).await
}
