use log::*;
pub use service::AppState;
use tokio::net::TcpListener;

mod controller;
mod error;
mod router;

pub use error::Error;
pub use router::define_routes;

pub async fn init_server(app_state: AppState) -> std::io::Result<()> {
    let host = app_state.config.interface().to_owned();
    let port = app_state.config.port;
    let server_url = format!("{host}:{port}");

    let listener = TcpListener::bind(&server_url).await?;
    info!("Server starting... listening for connections on http://{server_url}");

    let router = define_routes(app_state.clone());

    // Frames are small and must not wait on Nagle.
    axum::serve(listener, router)
        .tcp_nodelay(true)
        .with_graceful_shutdown(shutdown_signal(app_state))
        .await
}

async fn shutdown_signal(app_state: AppState) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        return;
    }
    info!("Shutdown signal received, closing SSE channels");
    app_state.close_channels();
}
