use clap::Parser;
use log::{error, info};
use server::config::Config;
use server::shutdown::wait_for_signal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine; flags and the real environment still apply.
    dotenvy::dotenv().ok();

    let config = Config::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    info!("Starting session server");

    server::run(config, async {
        if let Err(e) = wait_for_signal().await {
            error!("[SIGNAL] {}", e);
        }
    })
    .await?;

    Ok(())
}
