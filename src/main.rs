// main.rs
use std::sync::Arc;

use feed_api::{AppState, app, config::Config, db};
use poem::listener::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let db = db::connect(&config.database_url).await?;
    let state = Arc::new(AppState::new(db, &config));

    tracing::info!(addr = %config.bind_addr, "listening");
    poem::Server::new(TcpListener::bind(config.bind_addr.clone()))
        .run(app(state))
        .await?;
    Ok(())
}
