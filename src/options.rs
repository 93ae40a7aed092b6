use {super::*, crate::subcommand::Subcommand};

#[derive(Debug, Parser)]
#[command(version, about = "MetaID inscription indexer and mirror upload service")]
pub struct Arguments {
  #[command(flatten)]
  pub options: Options,
  #[command(subcommand)]
  pub subcommand: Subcommand,
}

#[derive(Clone, Default, Debug, Parser)]
pub struct Options {
  #[arg(long, help = "Load configuration from <CONFIG>.")]
  pub config: Option<PathBuf>,
  #[arg(long = "chain", value_enum, help = "Index <CHAIN>. [default: mvc]")]
  pub chain_argument: Option<Chain>,
  #[arg(long, alias = "datadir", help = "Store the index under <DATA_DIR>.")]
  pub data_dir: Option<PathBuf>,
  #[arg(long, help = "Connect to the chain node RPC at <RPC_URL>.")]
  pub rpc_url: Option<String>,
  #[arg(long, help = "Authenticate to the chain node RPC as <RPC_USER>.")]
  pub rpc_user: Option<String>,
  #[arg(long, help = "Authenticate to the chain node RPC with <RPC_PASS>.")]
  pub rpc_pass: Option<String>,
  #[arg(long, help = "Begin scanning at <START_HEIGHT> instead of the configured init height.")]
  pub start_height: Option<u64>,
}
