mod config;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let config = config::RelayConfig::from_env();
    let app = routes::app(state::RelayState::new(config));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;

    tracing::info!(port = config.port, max_peers = config.max_peers, "casefile relay listening");
    axum::serve(listener, app).await
}
