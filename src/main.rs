#[tokio::main]
async fn main() {
  env_logger::init();

  if let Err(err) = metapin::run().await {
    log::error!("{err:#}");
    std::process::exit(1);
  }
}
