use log::{error, info};
use service::{config::Config, logging::Logger, AppState};
use sse::Channel;
use std::time::Duration;

mod feeds;

#[tokio::main]
async fn main() {
    let config = Config::new();
    Logger::init_logger(&config as &Config);

    info!("Starting up SSE channel server...");

    let ticks = Channel::new(config.channel_options());
    let stats = Channel::new(config.channel_options().json_encode(true));

    let feed_period = Duration::from_millis(config.feed_interval_ms.max(1));
    feeds::spawn_ticks(ticks.clone(), feed_period);
    feeds::spawn_stats(stats.clone(), feed_period);

    let app_state = AppState::new(config)
        .with_channel("ticks", ticks)
        .with_channel("stats", stats);

    if let Err(e) = web::init_server(app_state).await {
        error!("Failed to start server: {e}");
        std::process::exit(1);
    }
}
