//! Channel configuration surface.
use crate::cors::CorsPolicy;
use crate::message::Message;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

pub const DEFAULT_HISTORY_SIZE: usize = 500;
pub const DEFAULT_PING_INTERVAL_MS: u64 = 20_000;
/// Longest accepted ping interval (one day); larger values are clamped.
pub const MAX_PING_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

/// Options recognised when creating a [`crate::Channel`].
///
/// Field names deserialize in camelCase (`historySize`, `retryTimeout`, ...)
/// so the same JSON an integrator keeps for its front end can be loaded
/// directly. Out-of-range values are normalised to defaults rather than
/// rejected, see [`ChannelOptions::normalized`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelOptions {
    /// Maximum number of messages kept for replay. Defaults to 500.
    #[serde(deserialize_with = "lenient")]
    pub history_size: Option<usize>,
    /// Messages to seed the history with, oldest first.
    pub history: Vec<Message>,
    /// Milliseconds clients should wait before reconnecting.
    #[serde(deserialize_with = "lenient")]
    pub retry_timeout: Option<u64>,
    /// Milliseconds between keep-alive pings. Defaults to 20000.
    #[serde(deserialize_with = "lenient")]
    pub ping_interval: Option<u64>,
    /// JSON-encode message data before framing.
    pub json_encode: bool,
    pub cors: CorsPolicy,
}

impl ChannelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history_size(mut self, size: usize) -> Self {
        self.history_size = Some(size);
        self
    }

    pub fn history(mut self, messages: Vec<Message>) -> Self {
        self.history = messages;
        self
    }

    pub fn retry_timeout(mut self, millis: u64) -> Self {
        self.retry_timeout = Some(millis);
        self
    }

    pub fn ping_interval(mut self, millis: u64) -> Self {
        self.ping_interval = Some(millis);
        self
    }

    pub fn json_encode(mut self, enabled: bool) -> Self {
        self.json_encode = enabled;
        self
    }

    pub fn cors(mut self, policy: CorsPolicy) -> Self {
        self.cors = policy;
        self
    }

    /// Replaces zero or missing sizes and intervals with their defaults,
    /// clamps the ping interval to [`MAX_PING_INTERVAL_MS`] and treats a zero
    /// retry timeout as unset.
    pub fn normalized(mut self) -> Self {
        self.history_size = Some(
            self.history_size
                .filter(|size| *size > 0)
                .unwrap_or(DEFAULT_HISTORY_SIZE),
        );
        self.ping_interval = Some(self.ping_millis());
        self.retry_timeout = self.retry_timeout.filter(|millis| *millis > 0);
        self
    }

    pub fn history_limit(&self) -> usize {
        self.history_size
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_HISTORY_SIZE)
    }

    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_millis())
    }

    fn ping_millis(&self) -> u64 {
        self.ping_interval
            .filter(|millis| *millis > 0)
            .map_or(DEFAULT_PING_INTERVAL_MS, |millis| {
                millis.min(MAX_PING_INTERVAL_MS)
            })
    }
}

/// Negative numbers become `None` so that normalisation can replace them.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<i64>,
{
    let value = Option::<i64>::deserialize(deserializer)?;
    Ok(value.and_then(|v| T::try_from(v).ok()))
}
