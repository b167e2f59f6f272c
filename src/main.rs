use anyhow::{Context, Result};
use groupchat::{app, AppState, Chat, Config, Hub, Store};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,groupchat=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("failed to load configuration")?;

    let store = Store::connect(&config.database_url, config.max_connections)
        .await
        .context("failed to connect to database")?;
    store.init_schema().await.context("failed to create schema")?;
    if config.seed_sample_data {
        store.seed_sample_data().await.context("failed to seed sample data")?;
    }
    tracing::info!("database initialized");

    let chat = Chat::new(store, Hub::with_capacity(config.channel_capacity))
        .enforce_membership(config.enforce_membership);
    let app = app(AppState::new(chat));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "server running");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
