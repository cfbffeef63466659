use crate::config::Config;
use log::LevelFilter;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

/// HTTP stack crates whose records drown out channel activity.
const FILTERED_MODULES: &[&str] = &["hyper", "axum", "tower", "tokio", "mio"];

pub struct Logger {}

impl Logger {
    /// Installs the terminal logger at the configured level. Records from the
    /// HTTP stack are only shown at TRACE.
    pub fn init_logger(config: &Config) {
        let level = config.log_level_filter;

        if let Err(e) = TermLogger::init(
            level,
            Self::build_log_config(level),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ) {
            eprintln!("Failed to start simplelog: {e}");
        }
    }

    fn ignored_modules(level: LevelFilter) -> &'static [&'static str] {
        match level {
            LevelFilter::Trace => &[],
            _ => FILTERED_MODULES,
        }
    }

    fn build_log_config(level: LevelFilter) -> simplelog::Config {
        let mut builder = ConfigBuilder::new();
        builder.set_time_format_rfc3339();

        for module in Self::ignored_modules(level) {
            builder.add_filter_ignore_str(module);
        }

        builder.build()
    }
}
