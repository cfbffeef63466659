use crate::connection::{ConnectionId, ConnectionRegistry};
use crate::cors::CorsPolicy;
use crate::history::History;
use crate::message::{Frame, Message};
use crate::observer::{ChannelEvent, ChannelObserver};
use crate::options::ChannelOptions;
use log::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// A broadcast unit: a set of connections sharing one replay history and one
/// configuration.
///
/// `Channel` is a cheap handle; clones share the same state. The keep-alive
/// ping task starts on construction (when a Tokio runtime is available) and
/// stops on [`Channel::close`] or when the last handle is dropped.
#[derive(Clone)]
pub struct Channel {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) json_encode: bool,
    pub(crate) cors: CorsPolicy,
    /// Zero means no default retry.
    pub(crate) retry_timeout: AtomicU64,
    /// Held across record + broadcast, retry changes and register + replay
    /// so a new client never sees live frames ahead of its preamble or replay.
    pub(crate) history: Mutex<History>,
    pub(crate) registry: ConnectionRegistry,
    observers: RwLock<Vec<Arc<dyn ChannelObserver>>>,
    pinger: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Inner {
    pub(crate) fn lock_history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_pinger(&self) {
        let handle = self
            .pinger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!("Stopped SSE ping timer");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop_pinger();
    }
}

impl Channel {
    pub fn new(options: ChannelOptions) -> Self {
        let options = options.normalized();
        let history = History::prepopulated(
            options.history_limit(),
            &options.history,
            options.json_encode,
        );

        let inner = Arc::new(Inner {
            json_encode: options.json_encode,
            cors: options.cors.clone(),
            retry_timeout: AtomicU64::new(options.retry_timeout.unwrap_or(0)),
            history: Mutex::new(history),
            registry: ConnectionRegistry::new(),
            observers: RwLock::new(Vec::new()),
            pinger: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let pinger = spawn_pinger(Arc::downgrade(&inner), options.ping_period());
        *inner.pinger.lock().unwrap_or_else(PoisonError::into_inner) = pinger;

        Self { inner }
    }

    /// Broadcast a message to every connection, recording it in history if
    /// it carries a positive id.
    pub fn send(&self, message: impl Into<Message>) {
        let message = message.into();
        let frame = message.frame(self.inner.json_encode);

        {
            let mut history = self.inner.lock_history();
            if let Some(id) = message.event_id() {
                history.record(id, frame.clone());
            }
            self.inner.registry.broadcast(&frame);
        }

        self.notify(&ChannelEvent::Message {
            message: &message,
            targets: None,
        });
    }

    /// Send a message privately to `targets`. Private messages never enter
    /// the history, whatever their id.
    pub fn send_to(&self, message: impl Into<Message>, targets: &[ConnectionId]) {
        let message = message.into();
        let frame = message.frame(self.inner.json_encode);

        self.inner.registry.send_to(targets, &frame);

        self.notify(&ChannelEvent::Message {
            message: &message,
            targets: Some(targets),
        });
    }

    /// Set the reconnection delay used for future connections and tell every
    /// connected client about it right away.
    pub fn retry(&self, retry_millis: u64) {
        let _history = self.inner.lock_history();
        self.inner
            .retry_timeout
            .store(retry_millis, Ordering::Relaxed);
        self.inner.registry.broadcast(&Frame::retry(retry_millis));
    }

    pub fn retry_timeout(&self) -> Option<u64> {
        Some(self.inner.retry_timeout.load(Ordering::Relaxed)).filter(|millis| *millis > 0)
    }

    /// Send the keep-alive comment to every connection.
    pub fn ping(&self) {
        trace!(
            "Pinging {} SSE connection(s)",
            self.inner.registry.len()
        );
        self.inner.registry.broadcast(&Frame::ping());
    }

    /// Stop the ping timer and end every connection. The channel still
    /// accepts new connections afterwards, but pings never resume.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Relaxed);
        self.inner.stop_pinger();

        let ended = self.inner.registry.end_all();
        info!("Closed SSE channel, ended {} connection(s)", ended.len());

        for connection in &ended {
            self.notify(&ChannelEvent::Disconnect { connection });
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }

    /// Remove a connection. Called by the transport when the client goes
    /// away; calling it again for the same connection does nothing.
    pub fn deregister(&self, connection: &ConnectionId) -> bool {
        let removed = self.inner.registry.unregister(connection);
        if removed {
            info!("Unregistering SSE connection {connection}");
            self.notify(&ChannelEvent::Disconnect { connection });
        }
        removed
    }

    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock_history().len()
    }

    pub fn subscribe(&self, observer: Arc<dyn ChannelObserver>) {
        self.inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Register a closure as an observer.
    pub fn on_event<F>(&self, observer: F)
    where
        F: Fn(&Channel, &ChannelEvent<'_>) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(observer));
    }

    pub(crate) fn notify(&self, event: &ChannelEvent<'_>) {
        let observers = self
            .inner
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for observer in observers {
            observer.on_event(self, event);
        }
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new(ChannelOptions::default())
    }
}

fn spawn_pinger(inner: Weak<Inner>, period: Duration) -> Option<JoinHandle<()>> {
    let handle = match Handle::try_current() {
        Ok(handle) => handle,
        Err(_) => {
            warn!("No Tokio runtime available, SSE channel will not send keep-alive pings");
            return None;
        }
    };

    Some(handle.spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if inner.closed.load(Ordering::Relaxed) {
                break;
            }
            Channel { inner }.ping();
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestMeta;
    use crate::sink::{ChannelSink, Sink};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn connect(channel: &Channel, uri: &str) -> (ConnectionId, UnboundedReceiver<Frame>) {
        let (sink, mut rx) = ChannelSink::new();
        let meta = RequestMeta::new(
            axum::http::Method::GET,
            uri.parse().unwrap(),
            Default::default(),
        );
        let admission = channel.admit(&meta, Arc::new(sink)).unwrap();
        let preamble = rx.try_recv().unwrap();
        assert!(preamble.text().starts_with(":ok\n\n"));
        (admission.connection().unwrap().clone(), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Frame>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame.text().into_owned());
        }
        frames
    }

    #[tokio::test]
    async fn broadcasts_simple_message_to_all_connections() {
        let channel = Channel::default();
        let (_, mut first) = connect(&channel, "/sse");
        let (_, mut second) = connect(&channel, "/sse");

        channel.send("First event!");

        assert_eq!(drain(&mut first), vec!["data: First event!\n\n"]);
        assert_eq!(drain(&mut second), vec!["data: First event!\n\n"]);
    }

    #[tokio::test]
    async fn reconnecting_client_receives_only_newer_messages_in_order() {
        let channel = Channel::default();
        for id in 1338..=1343 {
            channel.send(Message::new(format!("Event #{id}")).with_id(id));
        }

        let (_, mut rx) = connect(&channel, "/sse?lastEventId=1337");
        let replay = drain(&mut rx);

        assert_eq!(replay.len(), 6);
        assert_eq!(replay[0], "id: 1338\ndata: Event #1338\n\n");
        assert_eq!(replay[5], "id: 1343\ndata: Event #1343\n\n");
    }

    #[tokio::test]
    async fn history_is_not_replayed_by_default() {
        let channel = Channel::default();
        channel.send(Message::new("old").with_id(1));

        let (_, mut rx) = connect(&channel, "/sse");
        channel.send("Boom");

        assert_eq!(drain(&mut rx), vec!["data: Boom\n\n"]);
    }

    #[tokio::test]
    async fn duplicate_ids_replay_only_the_latest_payload() {
        let channel = Channel::default();
        channel.send(Message::new("first").with_id(5));
        channel.send(Message::new("second").with_id(5));

        assert_eq!(channel.history_len(), 1);
        let (_, mut rx) = connect(&channel, "/sse?lastEventId=1");
        assert_eq!(drain(&mut rx), vec!["id: 5\ndata: second\n\n"]);
    }

    #[tokio::test]
    async fn history_is_capped_at_history_size() {
        let channel = Channel::new(ChannelOptions::new().history_size(3));
        for id in 1..=10 {
            channel.send(Message::new(format!("{id}")).with_id(id));
        }

        assert_eq!(channel.history_len(), 3);
        let (_, mut rx) = connect(&channel, "/sse?lastEventId=1");
        assert_eq!(
            drain(&mut rx),
            vec!["id: 8\ndata: 8\n\n", "id: 9\ndata: 9\n\n", "id: 10\ndata: 10\n\n"]
        );
    }

    #[tokio::test]
    async fn messages_without_ids_are_live_only() {
        let channel = Channel::default();
        let (_, mut live) = connect(&channel, "/sse");

        channel.send(Message::new("anonymous"));
        channel.send(Message::new("zero").with_id(0));
        channel.send(Message::new("kept").with_id(2));

        assert_eq!(drain(&mut live).len(), 3);
        let (_, mut replayed) = connect(&channel, "/sse?lastEventId=1");
        assert_eq!(drain(&mut replayed), vec!["id: 2\ndata: kept\n\n"]);
    }

    #[tokio::test]
    async fn targeted_send_reaches_targets_only_and_skips_history() {
        let channel = Channel::default();
        let (target, mut target_rx) = connect(&channel, "/sse");
        let (_, mut other_rx) = connect(&channel, "/sse");

        channel.send_to(Message::new("psst").with_id(99), &[target]);

        assert_eq!(drain(&mut target_rx), vec!["id: 99\ndata: psst\n\n"]);
        assert!(drain(&mut other_rx).is_empty());
        assert_eq!(channel.history_len(), 0);
    }

    #[tokio::test]
    async fn connection_count_tracks_admission_and_deregistration() {
        let channel = Channel::default();
        assert_eq!(channel.connection_count(), 0);

        let (first, _first_rx) = connect(&channel, "/sse");
        assert_eq!(channel.connection_count(), 1);
        let (_second, _second_rx) = connect(&channel, "/sse");
        assert_eq!(channel.connection_count(), 2);

        assert!(channel.deregister(&first));
        assert!(!channel.deregister(&first));
        assert_eq!(channel.connection_count(), 1);
    }

    #[tokio::test]
    async fn retry_updates_default_and_broadcasts() {
        let channel = Channel::default();
        let (_, mut rx) = connect(&channel, "/sse");

        channel.retry(75);

        assert_eq!(drain(&mut rx), vec!["retry: 75\n"]);
        assert_eq!(channel.retry_timeout(), Some(75));

        let (sink, mut next) = ChannelSink::new();
        channel
            .admit(&RequestMeta::default(), Arc::new(sink))
            .unwrap();
        assert_eq!(next.try_recv().unwrap().text(), ":ok\n\nretry: 75\n");
    }

    #[tokio::test(start_paused = true)]
    async fn pings_every_interval() {
        let channel = Channel::new(ChannelOptions::new().ping_interval(25));
        let (_, mut rx) = connect(&channel, "/sse");

        time::sleep(Duration::from_millis(25 * 5 + 10)).await;

        let pings = drain(&mut rx);
        assert_eq!(pings.len(), 5);
        assert!(pings.iter().all(|frame| frame == ":\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn huge_ping_interval_still_pings() {
        let channel = Channel::new(ChannelOptions::new().ping_interval(u64::MAX));
        let (_, mut rx) = connect(&channel, "/sse");

        time::sleep(Duration::from_millis(crate::options::MAX_PING_INTERVAL_MS + 10)).await;

        assert_eq!(drain(&mut rx), vec![":\n"]);
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_pings_and_ends_connections() {
        let channel = Channel::new(ChannelOptions::new().ping_interval(25));
        let (_, mut rx) = connect(&channel, "/sse");
        let disconnects = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&disconnects);
        channel.on_event(move |_, event| {
            if let ChannelEvent::Disconnect { .. } = event {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        channel.close();
        time::sleep(Duration::from_millis(100)).await;

        assert!(channel.is_closed());
        assert_eq!(channel.connection_count(), 0);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert!(drain(&mut rx).is_empty());
        assert!(rx.recv().await.is_none());

        // Later admissions still work but get no pings.
        let (_, mut late) = connect(&channel, "/sse");
        time::sleep(Duration::from_millis(100)).await;
        assert!(drain(&mut late).is_empty());
    }

    #[tokio::test]
    async fn observers_see_messages_and_may_send_from_connect() {
        let channel = Channel::default();
        let sent = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&sent);
        channel.on_event(move |channel, event| match event {
            ChannelEvent::Connect { .. } => channel.send("welcome"),
            ChannelEvent::Message { targets, .. } => {
                assert!(targets.is_none());
                counter.fetch_add(1, Ordering::SeqCst);
            }
            ChannelEvent::Disconnect { .. } => {}
        });

        let (_, mut rx) = connect(&channel, "/sse");

        assert_eq!(drain(&mut rx), vec!["data: welcome\n\n"]);
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn prepopulated_history_is_replayed() {
        let channel = Channel::new(ChannelOptions::new().history_size(2).history(vec![
            Message::new("a").with_id(1),
            Message::new("b").with_id(2),
            Message::new("c").with_id(3),
        ]));

        assert_eq!(channel.history_len(), 2);
        let (_, mut rx) = connect(&channel, "/sse?evs_last_event_id=1");
        assert_eq!(
            drain(&mut rx),
            vec!["id: 2\ndata: b\n\n", "id: 3\ndata: c\n\n"]
        );
    }

    #[test]
    fn works_without_a_runtime() {
        let channel = Channel::default();
        let (sink, mut rx) = ChannelSink::new();
        channel
            .admit(&RequestMeta::default(), Arc::new(sink))
            .unwrap();
        channel.send("hi");

        assert_eq!(rx.try_recv().unwrap().text(), ":ok\n\n");
        assert_eq!(rx.try_recv().unwrap().text(), "data: hi\n\n");
        drop(channel);
    }

    #[test]
    fn dropped_sinks_do_not_break_send() {
        let channel = Channel::default();
        let (sink, rx) = ChannelSink::new();
        let sink: Arc<dyn Sink> = Arc::new(sink);
        channel.admit(&RequestMeta::default(), sink).unwrap();
        drop(rx);

        channel.send("nobody home");

        assert_eq!(channel.connection_count(), 1);
    }

    #[test]
    fn deregistering_twice_reports_one_disconnect() {
        let channel = Channel::default();
        let disconnects = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&disconnects);
        channel.on_event(move |_, event| {
            if let ChannelEvent::Disconnect { .. } = event {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        let (connection, _rx) = connect(&channel, "/sse");

        assert!(channel.deregister(&connection));
        assert!(!channel.deregister(&connection));

        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deregister_after_close_reports_no_second_disconnect() {
        let channel = Channel::default();
        let disconnects = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&disconnects);
        channel.on_event(move |_, event| {
            if let ChannelEvent::Disconnect { .. } = event {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        let (connection, _rx) = connect(&channel, "/sse");

        channel.close();
        assert!(!channel.deregister(&connection));

        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    struct StalledWriter;

    impl std::io::Write for StalledWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stalled_client_does_not_hold_up_others() {
        let channel = Channel::default();
        let stalled: Arc<dyn Sink> = Arc::new(crate::sink::WriterSink::new(StalledWriter));
        channel.admit(&RequestMeta::default(), stalled).unwrap();
        let (_, mut rx) = connect(&channel, "/sse");

        let started = std::time::Instant::now();
        std::thread::scope(|scope| {
            scope.spawn(|| channel.send("a"));
            scope.spawn(|| channel.send("b"));
        });
        assert!(started.elapsed() < Duration::from_millis(250));

        let mut frames = drain(&mut rx);
        frames.sort();
        assert_eq!(frames, vec!["data: a\n\n", "data: b\n\n"]);
    }

    #[test]
    fn clients_admitted_during_retry_change_learn_the_new_value() {
        for retry_millis in 1..=200 {
            let channel = Channel::default();

            let mut rx = std::thread::scope(|scope| {
                let admitting = scope.spawn(|| {
                    let (sink, rx) = ChannelSink::new();
                    channel
                        .admit(&RequestMeta::default(), Arc::new(sink))
                        .unwrap();
                    rx
                });
                channel.retry(retry_millis);
                admitting.join().unwrap()
            });

            let received = drain(&mut rx).concat();
            assert!(
                received.contains(&format!("retry: {retry_millis}\n")),
                "client missed retry {retry_millis}: {received:?}"
            );
        }
    }
}
