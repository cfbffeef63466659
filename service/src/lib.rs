use config::Config;
use log::info;
use sse::Channel;
use std::collections::HashMap;
use std::sync::Arc;

pub mod config;
pub mod logging;

// Service-level state shared by every request handler.
// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    channels: Arc<HashMap<String, Channel>>,
}

impl AppState {
    pub fn new(app_config: Config) -> Self {
        Self {
            config: app_config,
            channels: Arc::new(HashMap::new()),
        }
    }

    /// Adds a channel reachable as `/channel/{name}`.
    pub fn with_channel(mut self, name: impl Into<String>, channel: Channel) -> Self {
        let name = name.into();
        info!("Serving SSE channel \"{name}\"");
        Arc::make_mut(&mut self.channels).insert(name, channel);
        self
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    /// Closes every channel, ending all open streams.
    pub fn close_channels(&self) {
        for channel in self.channels.values() {
            channel.close();
        }
    }
}
