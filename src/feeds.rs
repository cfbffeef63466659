//! Demo publishers feeding the channels served by the binary.
use chrono::Utc;
use log::*;
use serde_json::json;
use sse::{Channel, Message};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Publishes an id-bearing `tick` event carrying the current time.
pub fn spawn_ticks(channel: Channel, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut next_id: u64 = 1;

        loop {
            ticker.tick().await;
            if channel.is_closed() {
                break;
            }
            channel.send(tick_message(next_id));
            next_id += 1;
        }
        debug!("Tick feed stopped after {} message(s)", next_id - 1);
    })
}

/// Publishes a JSON snapshot of the channel's connection count.
pub fn spawn_stats(channel: Channel, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if channel.is_closed() {
                break;
            }
            channel.send(stats_message(channel.connection_count()));
        }
        debug!("Stats feed stopped");
    })
}

fn tick_message(id: u64) -> Message {
    Message::new(Utc::now().to_rfc3339())
        .with_id(id)
        .with_event("tick")
}

fn stats_message(connections: usize) -> Message {
    Message::new(json!({
        "time": Utc::now().timestamp_millis(),
        "connections": connections,
    }))
}
