mod protocol;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = state::Config::from_env().expect("ADMIN_PASSWORD required");
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "5000".into())
        .parse()
        .expect("invalid PORT");

    let state = state::AppState::new(config);

    // Spawn the background liveness sweep.
    let _liveness = services::liveness::spawn_liveness_task(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "relayboard listening");
    axum::serve(listener, app).await.expect("server failed");
}
