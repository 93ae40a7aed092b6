//! Merged runtime configuration: YAML config file plus command-line
//! overrides, with the service's defaults filled in.

use super::*;

#[derive(Debug, Clone)]
pub struct Settings {
  pub chain: Chain,
  pub indexer_port: u16,
  pub uploader_port: u16,

  pub indexer_type: String,
  pub dsn: String,
  pub data_dir: PathBuf,

  pub rpc_url: String,
  pub rpc_user: String,
  pub rpc_pass: String,

  pub storage_type: String,
  pub local_base_path: PathBuf,
  pub object_endpoint: String,
  pub object_access_key: String,
  pub object_secret_key: String,
  pub object_bucket: String,

  pub scan_interval: Duration,
  pub batch_size: u64,
  pub start_height: u64,
  pub mvc_init_block_height: u64,
  pub btc_init_block_height: u64,
  pub notify_enabled: bool,
  pub notify_address: String,

  /// Maximum accepted upload size, in bytes.
  pub max_file_size: u64,
  pub fee_rate: u64,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      chain: Chain::default(),
      indexer_port: 7281,
      uploader_port: 7282,
      indexer_type: "embedded-kv".into(),
      dsn: String::new(),
      data_dir: "./data".into(),
      rpc_url: String::new(),
      rpc_user: String::new(),
      rpc_pass: String::new(),
      storage_type: "local".into(),
      local_base_path: "./data/files".into(),
      object_endpoint: String::new(),
      object_access_key: String::new(),
      object_secret_key: String::new(),
      object_bucket: String::new(),
      scan_interval: Duration::from_secs(10),
      batch_size: 100,
      start_height: 0,
      mvc_init_block_height: 0,
      btc_init_block_height: 0,
      notify_enabled: false,
      notify_address: String::new(),
      max_file_size: 10 * 1024 * 1024,
      fee_rate: 1,
    }
  }
}

impl Settings {
  pub fn load(options: &Options) -> Result<Self> {
    let config = match &options.config {
      Some(path) => {
        let yaml = std::fs::read_to_string(path)
          .with_context(|| format!("failed to read config file `{}`", path.display()))?;
        serde_yaml::from_str::<Config>(&yaml)
          .with_context(|| format!("failed to parse config file `{}`", path.display()))?
      }
      None => Config::default(),
    };

    let defaults = Settings::default();

    let chain = match options.chain_argument {
      Some(chain) => chain,
      None => match config.net.as_deref() {
        Some(net) => net.parse()?,
        None => defaults.chain,
      },
    };

    Ok(Self {
      chain,
      indexer_port: config.indexer.port.unwrap_or(defaults.indexer_port),
      uploader_port: config.uploader.port.unwrap_or(defaults.uploader_port),
      indexer_type: config
        .database
        .indexer_type
        .unwrap_or(defaults.indexer_type),
      dsn: config.database.dsn.unwrap_or_default(),
      data_dir: options
        .data_dir
        .clone()
        .or(config.database.data_dir)
        .unwrap_or(defaults.data_dir),
      rpc_url: options
        .rpc_url
        .clone()
        .or(config.chain.rpc_url)
        .unwrap_or_default(),
      rpc_user: options
        .rpc_user
        .clone()
        .or(config.chain.rpc_user)
        .unwrap_or_default(),
      rpc_pass: options
        .rpc_pass
        .clone()
        .or(config.chain.rpc_pass)
        .unwrap_or_default(),
      storage_type: config.storage.r#type.unwrap_or(defaults.storage_type),
      local_base_path: config
        .storage
        .local
        .base_path
        .unwrap_or(defaults.local_base_path),
      object_endpoint: config.storage.object.endpoint.unwrap_or_default(),
      object_access_key: config.storage.object.access_key.unwrap_or_default(),
      object_secret_key: config.storage.object.secret_key.unwrap_or_default(),
      object_bucket: config.storage.object.bucket.unwrap_or_default(),
      scan_interval: Duration::from_secs(
        config
          .indexer
          .scan_interval_seconds
          .unwrap_or(defaults.scan_interval.as_secs()),
      ),
      batch_size: config.indexer.batch_size.unwrap_or(defaults.batch_size),
      start_height: options
        .start_height
        .or(config.indexer.start_height)
        .unwrap_or(0),
      mvc_init_block_height: config.indexer.mvc_init_block_height.unwrap_or(0),
      btc_init_block_height: config.indexer.btc_init_block_height.unwrap_or(0),
      notify_enabled: config.indexer.notify_enabled.unwrap_or(false),
      notify_address: config.indexer.notify_address.unwrap_or_default(),
      max_file_size: config
        .uploader
        .max_file_size_mb
        .map(|mb| mb * 1024 * 1024)
        .unwrap_or(defaults.max_file_size),
      fee_rate: config.uploader.fee_rate.unwrap_or(defaults.fee_rate),
    })
  }

  /// Configured init height of the selected chain, used when no explicit
  /// start height and no sync record exist.
  pub fn init_block_height(&self) -> u64 {
    match self.chain.name() {
      "btc" => self.btc_init_block_height,
      _ => self.mvc_init_block_height,
    }
  }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Config {
  net: Option<String>,
  #[serde(default)]
  indexer: IndexerConfig,
  #[serde(default)]
  uploader: UploaderConfig,
  #[serde(default)]
  database: DatabaseConfig,
  #[serde(default)]
  chain: ChainConfig,
  #[serde(default)]
  storage: StorageConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct IndexerConfig {
  port: Option<u16>,
  scan_interval_seconds: Option<u64>,
  batch_size: Option<u64>,
  start_height: Option<u64>,
  mvc_init_block_height: Option<u64>,
  btc_init_block_height: Option<u64>,
  notify_enabled: Option<bool>,
  notify_address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct UploaderConfig {
  port: Option<u16>,
  max_file_size_mb: Option<u64>,
  fee_rate: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatabaseConfig {
  indexer_type: Option<String>,
  dsn: Option<String>,
  data_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChainConfig {
  rpc_url: Option<String>,
  rpc_user: Option<String>,
  rpc_pass: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StorageConfig {
  r#type: Option<String>,
  #[serde(default)]
  local: LocalStorageConfig,
  #[serde(default)]
  object: ObjectStorageConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LocalStorageConfig {
  base_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ObjectStorageConfig {
  endpoint: Option<String>,
  access_key: Option<String>,
  secret_key: Option<String>,
  bucket: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_the_service_conventions() {
    let settings = Settings::load(&Options::default()).unwrap();
    assert_eq!(settings.indexer_port, 7281);
    assert_eq!(settings.uploader_port, 7282);
    assert_eq!(settings.scan_interval, Duration::from_secs(10));
    assert_eq!(settings.batch_size, 100);
    assert_eq!(settings.max_file_size, 10 * 1024 * 1024);
    assert_eq!(settings.fee_rate, 1);
    assert_eq!(settings.storage_type, "local");
    assert_eq!(settings.indexer_type, "embedded-kv");
  }

  #[test]
  fn config_file_and_overrides_merge() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(
      &path,
      r#"
net: mvc-testnet
indexer:
  port: 8080
  scan_interval_seconds: 3
  mvc_init_block_height: 90000
chain:
  rpc_url: http://127.0.0.1:9882
  rpc_user: user
  rpc_pass: pass
storage:
  type: object-store
  object:
    endpoint: http://127.0.0.1:9000
    bucket: pins
uploader:
  max_file_size_mb: 2
  fee_rate: 3
"#,
    )
    .unwrap();

    let options = Options {
      config: Some(path),
      rpc_user: Some("override".into()),
      start_height: Some(123),
      ..Default::default()
    };

    let settings = Settings::load(&options).unwrap();
    assert_eq!(settings.chain, Chain::MvcTestnet);
    assert_eq!(settings.indexer_port, 8080);
    assert_eq!(settings.scan_interval, Duration::from_secs(3));
    assert_eq!(settings.rpc_url, "http://127.0.0.1:9882");
    assert_eq!(settings.rpc_user, "override");
    assert_eq!(settings.start_height, 123);
    assert_eq!(settings.storage_type, "object-store");
    assert_eq!(settings.object_bucket, "pins");
    assert_eq!(settings.max_file_size, 2 * 1024 * 1024);
    assert_eq!(settings.fee_rate, 3);
    assert_eq!(settings.init_block_height(), 90000);
  }
}
