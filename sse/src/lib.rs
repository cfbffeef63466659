//! Server-Sent Events (SSE) broadcast channels.
//!
//! This crate provides the channel abstraction that fans text messages out to
//! many long-lived `text/event-stream` responses and replays recent messages
//! to clients that reconnect with a "last seen" id.
//!
//! # Architecture
//!
//! - **Framing**: `Message` values are turned into immutable `Frame`s
//!   (`event`, `retry`, `id`, then one `data:` line per line of payload).
//! - **History**: a bounded, newest-first buffer of id-bearing frames,
//!   deduplicated by id, used to replay what a reconnecting client missed.
//! - **Registry**: the live connection set, keyed by a server-generated
//!   `ConnectionId`. Each connection is a `Sink` owned by the transport.
//! - **Admission**: CORS check, event-stream headers, `:ok` preamble, optional
//!   2 KiB padding, registration, then history replay.
//! - **Channel**: the facade tying it together, plus a keep-alive ping task
//!   and synchronous connect/disconnect/message observers.
//!
//! # Message Flow
//!
//! 1. The transport builds a `RequestMeta` and a sink (usually `ChannelSink`)
//!    and calls `Channel::admit`
//! 2. Admission writes the preamble, registers the sink and replays history
//!    newer than the `Last-Event-ID` the client sent
//! 3. `Channel::send` frames the message, records it in history when it has
//!    an id, and writes it to every registered sink
//! 4. When the client goes away the transport calls `Channel::deregister`
//!
//! # Example
//!
//! ```rust,ignore
//! use sse::{Channel, ChannelOptions, ChannelSink, Message, RequestMeta};
//! use std::sync::Arc;
//!
//! let channel = Channel::new(ChannelOptions::new().retry_timeout(250));
//!
//! let (sink, body) = ChannelSink::new();
//! let admission = channel.admit(&request_meta, Arc::new(sink))?;
//! // respond with admission.status(), admission.headers() and `body`
//!
//! channel.send(Message::new("hello").with_id(1).with_event("greeting"));
//! ```
//!
//! # Concurrency
//!
//! All operations take `&self` and may be called from any task. The registry
//! is a `DashMap`; history recording and broadcasting share one mutex so the
//! replay batch for a reconnecting client is never overtaken by live frames.
//! Writes never wait on the network: a slow client only grows its own queue.
//!
//! # Modules
//!
//! - `admission`: admitting new clients (`Channel::admit`)
//! - `channel`: the `Channel` facade
//! - `connection`: `ConnectionRegistry` and type-safe `ConnectionId`
//! - `cors`: origin policy and the headers it grants
//! - `error`: error kinds
//! - `history`: the bounded replay buffer
//! - `message`: messages and wire framing
//! - `observer`: connect/disconnect/message notifications
//! - `options`: channel configuration
//! - `request`: request metadata (`Last-Event-ID`, preamble flag, origin)
//! - `sink`: transport sinks

pub mod admission;
pub mod channel;
pub mod connection;
pub mod cors;
pub mod error;
pub mod history;
pub mod message;
pub mod observer;
pub mod options;
pub mod request;
pub mod sink;

pub use admission::Admission;
pub use channel::Channel;
pub use connection::ConnectionId;
pub use cors::CorsPolicy;
pub use error::{Error, Result};
pub use message::{Data, Frame, Message};
pub use observer::{ChannelEvent, ChannelObserver};
pub use options::ChannelOptions;
pub use request::RequestMeta;
pub use sink::{ChannelSink, Sink, WriterSink};
