use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use sse::{ChannelOptions, CorsPolicy};

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// A list of full CORS origin URLs allowed to open event streams. Use `*` to
    /// allow every origin; leave empty to disable CORS handling.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "http://localhost:3000,https://localhost:3000"
    )]
    pub allowed_origins: Vec<String>,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 4000)]
    pub port: u16,

    /// Maximum number of id-bearing messages each channel keeps for replay
    #[arg(long, env, default_value_t = 500)]
    pub history_size: usize,

    /// Milliseconds clients should wait before reconnecting (0 leaves it to the client)
    #[arg(long, env, default_value_t = 0)]
    pub retry_timeout: u64,

    /// Milliseconds between keep-alive pings sent to every connection
    #[arg(long, env, default_value_t = 20_000)]
    pub ping_interval: u64,

    /// JSON-encode message data before framing it
    #[arg(long, env, default_value_t = false)]
    pub json_encode: bool,

    /// Milliseconds between messages published by the demo feeds
    #[arg(long, env, default_value_t = 1_000)]
    pub feed_interval_ms: u64,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap_or(LevelFilter::Info)),
        )]
    pub log_level_filter: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn interface(&self) -> &str {
        self.interface.as_deref().unwrap_or("127.0.0.1")
    }

    pub fn cors_policy(&self) -> CorsPolicy {
        CorsPolicy::from_origins(self.allowed_origins.iter().cloned())
    }

    /// Channel options derived from the command line / environment. Zero
    /// values fall back to the channel defaults.
    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions::new()
            .history_size(self.history_size)
            .retry_timeout(self.retry_timeout)
            .ping_interval(self.ping_interval)
            .json_encode(self.json_encode)
            .cors(self.cors_policy())
            .normalized()
    }
}
