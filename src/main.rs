mod config;
mod db;
mod routes;
mod services;
mod state;
mod store;
mod wire;

use std::sync::Arc;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = config::Config::from_env().expect("invalid configuration");

    let pool = db::init_pool(&config.database_url, config.db_max_connections, config.realtime.store_timeout)
        .await
        .expect("database init failed");
    let store = Arc::new(store::PgStore::new(pool));
    let state = state::AppState::new(store, config.realtime);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .expect("failed to bind");

    tracing::info!(port = config.port, "studyroom listening");
    axum::serve(listener, app).await.expect("server failed");
}
