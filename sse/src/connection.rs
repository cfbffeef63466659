use crate::message::Frame;
use crate::sink::Sink;
use dashmap::DashMap;
use log::*;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier for a connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered subscriber: its sink plus the order it was registered in.
/// The sink belongs to the transport; the registry only holds a handle.
#[derive(Clone)]
pub struct ConnectionInfo {
    pub sequence: u64,
    pub sink: Arc<dyn Sink>,
}

/// Live connection set for one channel.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionInfo>,
    next_sequence: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Register a new connection - O(1)
    pub fn register(&self, sink: Arc<dyn Sink>) -> ConnectionId {
        let connection_id = ConnectionId::new();
        self.register_with_id(connection_id.clone(), sink);
        connection_id
    }

    /// Register under an id the caller generated beforehand.
    pub fn register_with_id(&self, connection_id: ConnectionId, sink: Arc<dyn Sink>) {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        self.connections
            .insert(connection_id, ConnectionInfo { sequence, sink });
    }

    /// Unregister a connection - O(1). Returns whether it was still
    /// registered, so repeated calls for the same connection are harmless.
    pub fn unregister(&self, connection_id: &ConnectionId) -> bool {
        self.connections.remove(connection_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Write a frame to every connection, oldest registration first - O(n)
    pub fn broadcast(&self, frame: &Frame) {
        for (connection_id, sink) in self.snapshot() {
            deliver(&connection_id, sink.as_ref(), std::slice::from_ref(frame));
        }
    }

    /// Write a frame to the listed connections only. Ids that are not
    /// registered are skipped.
    pub fn send_to(&self, connection_ids: &[ConnectionId], frame: &Frame) {
        for connection_id in connection_ids {
            let sink = match self.connections.get(connection_id) {
                Some(info) => Arc::clone(&info.sink),
                None => {
                    debug!("Skipping send to unknown connection {connection_id}");
                    continue;
                }
            };
            deliver(connection_id, sink.as_ref(), std::slice::from_ref(frame));
        }
    }

    /// Write a batch of frames to one connection and flush once at the end.
    pub fn send_batch(&self, connection_id: &ConnectionId, frames: &[Frame]) {
        let sink = match self.connections.get(connection_id) {
            Some(info) => Arc::clone(&info.sink),
            None => return,
        };
        deliver(connection_id, sink.as_ref(), frames);
    }

    /// End every connection's stream and empty the registry, returning the
    /// ids that were removed.
    pub fn end_all(&self) -> Vec<ConnectionId> {
        let mut ended = Vec::with_capacity(self.connections.len());
        for (connection_id, sink) in self.snapshot() {
            sink.end();
            if self.unregister(&connection_id) {
                ended.push(connection_id);
            }
        }
        ended
    }

    /// Copies the sinks out so no map shard stays locked while writing.
    fn snapshot(&self) -> Vec<(ConnectionId, Arc<dyn Sink>)> {
        let mut entries: Vec<(u64, ConnectionId, Arc<dyn Sink>)> = self
            .connections
            .iter()
            .map(|entry| {
                (
                    entry.value().sequence,
                    entry.key().clone(),
                    Arc::clone(&entry.value().sink),
                )
            })
            .collect();
        entries.sort_unstable_by_key(|(sequence, _, _)| *sequence);
        entries
            .into_iter()
            .map(|(_, connection_id, sink)| (connection_id, sink))
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes `frames` then flushes if the sink buffers. Failures are logged and
/// swallowed: the transport reports the disconnect separately.
fn deliver(connection_id: &ConnectionId, sink: &dyn Sink, frames: &[Frame]) {
    for frame in frames {
        if let Err(e) = sink.write(frame) {
            warn!(
                "Failed to send event to connection {}: {}. Connection will be cleaned up.",
                connection_id.as_str(),
                e
            );
            return;
        }
    }

    if sink.supports_flush() {
        if let Err(e) = sink.flush() {
            warn!("Failed to flush connection {}: {}", connection_id.as_str(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::sink::ChannelSink;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        writes: Mutex<Vec<String>>,
        flushes: Mutex<usize>,
        fail_writes: bool,
    }

    impl Sink for RecordingSink {
        fn write(&self, frame: &Frame) -> Result<()> {
            if self.fail_writes {
                return Err(Error::closed());
            }
            self.writes.lock().unwrap().push(frame.text().into_owned());
            Ok(())
        }

        fn supports_flush(&self) -> bool {
            true
        }

        fn flush(&self) -> Result<()> {
            *self.flushes.lock().unwrap() += 1;
            Ok(())
        }

        fn end(&self) {}
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (sink, _rx) = ChannelSink::new();
        let id = registry.register(Arc::new(sink));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(&id));
        assert!(!registry.unregister(&id));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn broadcast_writes_and_flushes_every_connection() {
        let registry = ConnectionRegistry::new();
        let first = Arc::new(RecordingSink::default());
        let second = Arc::new(RecordingSink::default());
        registry.register(first.clone());
        registry.register(second.clone());

        registry.broadcast(&Frame::from("data: hi\n\n"));

        for sink in [&first, &second] {
            assert_eq!(*sink.writes.lock().unwrap(), vec!["data: hi\n\n"]);
            assert_eq!(*sink.flushes.lock().unwrap(), 1);
        }
    }

    #[test]
    fn failing_connection_does_not_block_others_and_stays_registered() {
        let registry = ConnectionRegistry::new();
        let broken = Arc::new(RecordingSink {
            fail_writes: true,
            ..Default::default()
        });
        let healthy = Arc::new(RecordingSink::default());
        let broken_id = registry.register(broken);
        registry.register(healthy.clone());

        registry.broadcast(&Frame::ping());

        assert_eq!(*healthy.writes.lock().unwrap(), vec![":\n"]);
        assert!(registry.contains(&broken_id));
    }

    #[test]
    fn send_to_reaches_only_listed_connections() {
        let registry = ConnectionRegistry::new();
        let target = Arc::new(RecordingSink::default());
        let bystander = Arc::new(RecordingSink::default());
        let target_id = registry.register(target.clone());
        registry.register(bystander.clone());

        registry.send_to(&[target_id, ConnectionId::new()], &Frame::from("data: psst\n\n"));

        assert_eq!(*target.writes.lock().unwrap(), vec!["data: psst\n\n"]);
        assert!(bystander.writes.lock().unwrap().is_empty());
    }

    #[test]
    fn batch_is_flushed_once() {
        let registry = ConnectionRegistry::new();
        let sink = Arc::new(RecordingSink::default());
        let id = registry.register(sink.clone());

        registry.send_batch(&id, &[Frame::from("data: a\n\n"), Frame::from("data: b\n\n")]);

        assert_eq!(sink.writes.lock().unwrap().len(), 2);
        assert_eq!(*sink.flushes.lock().unwrap(), 1);
    }

    #[test]
    fn end_all_empties_the_registry() {
        let registry = ConnectionRegistry::new();
        let (sink, mut rx) = ChannelSink::new();
        registry.register(Arc::new(sink));

        let ended = registry.end_all();

        assert_eq!(ended.len(), 1);
        assert!(registry.is_empty());
        assert!(rx.try_recv().is_err());
    }
}
