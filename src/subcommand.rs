use {
  super::*,
  crate::{
    indexer::Indexer,
    server::ApiState,
    uploader::UploaderState,
  },
  tokio::sync::watch,
};

#[derive(Debug, Clone, clap::Subcommand)]
pub enum Subcommand {
  #[command(about = "Run the block-scanning pipeline and the read-only query API")]
  Indexer,
  #[command(about = "Run the inscription upload API")]
  Uploader,
}

impl Subcommand {
  pub async fn run(self, settings: Settings) -> Result {
    match self {
      Self::Indexer => run_indexer(settings).await,
      Self::Uploader => run_uploader(settings).await,
    }
  }
}

async fn run_indexer(settings: Settings) -> Result {
  let index = Arc::new(Index::open(&settings.data_dir)?);
  let storage = storage::open(&settings).await?;

  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  spawn_signal_listener(shutdown_tx);

  let scanner = tokio::spawn(
    Indexer::new(&settings, index.clone(), storage.clone(), shutdown_rx.clone())?.run(),
  );

  let state = ApiState {
    chain: settings.chain,
    index,
    storage,
    rpc: RpcClient::new(&settings.rpc_url, &settings.rpc_user, &settings.rpc_pass),
  };

  let listener =
    tokio::net::TcpListener::bind(("0.0.0.0", settings.indexer_port)).await?;
  log::info!("indexer API listening on {}", listener.local_addr()?);

  axum::serve(listener, server::router(state))
    .with_graceful_shutdown(shutdown_requested(shutdown_rx))
    .await?;

  scanner.await??;

  Ok(())
}

async fn run_uploader(settings: Settings) -> Result {
  let index = Arc::new(Index::open(&settings.data_dir)?);

  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  spawn_signal_listener(shutdown_tx);

  let state = UploaderState {
    chain: settings.chain,
    index,
    rpc: RpcClient::new(&settings.rpc_url, &settings.rpc_user, &settings.rpc_pass),
    fee_rate: settings.fee_rate,
    max_file_size: settings.max_file_size,
  };

  let listener =
    tokio::net::TcpListener::bind(("0.0.0.0", settings.uploader_port)).await?;
  log::info!("uploader API listening on {}", listener.local_addr()?);

  axum::serve(listener, uploader::router(state))
    .with_graceful_shutdown(shutdown_requested(shutdown_rx))
    .await?;

  Ok(())
}

fn spawn_signal_listener(shutdown: watch::Sender<bool>) {
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      log::info!("shutdown signal received");
      let _ = shutdown.send(true);
    }
  });
}

async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
  let _ = shutdown.changed().await;
}
