//! Connect, disconnect and message notifications for the owning application.
//!
//! Observers run synchronously, in registration order, at the point the
//! event happens and outside the channel's internal locks, so an observer may
//! call back into the channel (for example `send` from a connect handler).
use crate::channel::Channel;
use crate::connection::ConnectionId;
use crate::message::Message;
use crate::request::RequestMeta;

#[derive(Debug)]
pub enum ChannelEvent<'a> {
    /// A client passed admission and is now registered.
    Connect {
        connection: &'a ConnectionId,
        request: &'a RequestMeta,
    },
    /// A connection was removed, either by the transport or by `close`.
    Disconnect { connection: &'a ConnectionId },
    /// A message went out; `targets` is set for private sends.
    Message {
        message: &'a Message,
        targets: Option<&'a [ConnectionId]>,
    },
}

pub trait ChannelObserver: Send + Sync {
    fn on_event(&self, channel: &Channel, event: &ChannelEvent<'_>);
}

impl<F> ChannelObserver for F
where
    F: Fn(&Channel, &ChannelEvent<'_>) + Send + Sync,
{
    fn on_event(&self, channel: &Channel, event: &ChannelEvent<'_>) {
        self(channel, event)
    }
}
