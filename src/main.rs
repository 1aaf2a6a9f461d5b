use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newsstand::config::Config;
use newsstand::db::Database;
use newsstand::fetcher::Fetcher;
use newsstand::routes::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsstand=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("NEWSSTAND_CONFIG").unwrap_or_else(|_| "newsstand.toml".to_string());
    let config = Config::load_or_default(&config_path)?;
    info!("Loaded configuration from {}", config_path);

    // Initialize database
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| config.database_url.clone());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    info!("Database initialized");

    let db = Arc::new(db);
    let fetcher = Arc::new(Fetcher::new(db.clone(), &config.fetch)?);

    // Subscribe to configured feeds
    for url in &config.feeds {
        match fetcher.add_feed(url).await {
            Ok(true) => info!("Subscribed to configured feed {}", url),
            Ok(false) => {}
            Err(e) => warn!("Could not add configured feed {}: {}", url, e),
        }
    }

    let state = Arc::new(AppState {
        db: db.clone(),
        fetcher: fetcher.clone(),
    });

    let app = routes::app(state).layer(TraceLayer::new_for_http());

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("Server starting on http://{}", config.listen_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
