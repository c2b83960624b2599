use std::net::SocketAddr;

use profast::{
    api::token::FirebaseVerifier,
    app::AppState,
    config::{Config, DEFAULT_LOG_FILTER},
    store::lazy::LazyMongoStore,
    stripe::StripeProcessor,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let store = LazyMongoStore::new(&config.mongo_url, &config.database_name);
    match store.get().await {
        Ok(mongo) => match mongo.ping().await {
            Ok(()) => tracing::info!("connected to MongoDB"),
            Err(err) => tracing::error!("MongoDB ping failed: {}", err),
        },
        Err(_) => tracing::warn!("serving without MongoDB, connecting again on the next request"),
    }

    let verifier =
        FirebaseVerifier::load(&config.firebase_project_id, &config.firebase_keys).await?;
    let processor = StripeProcessor::new(&config.payment_gateway_key);

    let app = profast::api::router(AppState::new(store, verifier, processor));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
