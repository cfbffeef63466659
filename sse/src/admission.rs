//! Connection admission: origin check, stream preamble, registration and
//! history replay for a new client.
use crate::channel::Channel;
use crate::connection::ConnectionId;
use crate::cors::CorsDecision;
use crate::error::{Error, Result};
use crate::message::Frame;
use crate::observer::ChannelEvent;
use crate::request::RequestMeta;
use crate::sink::Sink;
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use log::*;
use std::sync::atomic::Ordering;
use std::sync::{Arc, LazyLock};
use tokio::runtime::Handle;

pub const CONTENT_TYPE_EVENT_STREAM: &str = "text/event-stream;charset=UTF-8";

/// Padding comment for user agents that hold back events until they have
/// received roughly 2 KiB.
static PREAMBLE_PADDING: LazyLock<String> = LazyLock::new(|| format!(":{}\n", "-".repeat(2056)));

/// Successful outcome of [`Channel::admit`].
#[derive(Debug)]
pub enum Admission {
    /// The client is registered; respond `200` with `headers` and stream the
    /// sink's output as the body.
    Stream {
        connection: ConnectionId,
        headers: HeaderMap,
    },
    /// CORS preflight; respond `204` with `headers` and no stream. A denied
    /// origin simply gets no `Access-Control-Allow-*` headers.
    Preflight { headers: HeaderMap },
}

impl Admission {
    pub fn status(&self) -> StatusCode {
        match self {
            Admission::Stream { .. } => StatusCode::OK,
            Admission::Preflight { .. } => StatusCode::NO_CONTENT,
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        match self {
            Admission::Stream { headers, .. } | Admission::Preflight { headers } => headers,
        }
    }

    pub fn connection(&self) -> Option<&ConnectionId> {
        match self {
            Admission::Stream { connection, .. } => Some(connection),
            Admission::Preflight { .. } => None,
        }
    }
}

impl Channel {
    /// Admit a client whose response body is fed by `sink`.
    ///
    /// On success the preamble (and any replayed history) has already been
    /// written to the sink and the connection is registered. A disallowed
    /// origin is rejected before anything is written.
    pub fn admit(&self, request: &RequestMeta, sink: Arc<dyn Sink>) -> Result<Admission> {
        let decision = self.inner.cors.decide(request.origin());
        let mut headers = HeaderMap::new();

        if request.is_preflight() {
            if decision.is_denied() {
                debug!("Denying CORS preflight from {:?}", request.origin());
            }
            decision.apply(&mut headers, true);
            return Ok(Admission::Preflight { headers });
        }

        if let CorsDecision::Denied(origin) = &decision {
            warn!("Rejecting SSE connection from disallowed origin {origin}");
            return Err(Error::origin_not_allowed(origin.clone()));
        }

        decision.apply(&mut headers, false);
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(CONTENT_TYPE_EVENT_STREAM),
        );
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        let connection = ConnectionId::new();

        {
            let history = self.inner.lock_history();
            let registry = &self.inner.registry;
            let preamble = self.preamble(request.wants_preamble());

            registry.register_with_id(connection.clone(), sink);
            registry.send_batch(&connection, std::slice::from_ref(&preamble));
            info!("Registered new SSE connection {connection}");

            if let Some(last_event_id) = request.last_event_id() {
                let frames = history.entries_since(last_event_id);
                debug!(
                    "Replaying {} event(s) since id {} to connection {}",
                    frames.len(),
                    last_event_id,
                    connection
                );
                registry.send_batch(&connection, &frames);
            }
        }

        self.notify(&ChannelEvent::Connect {
            connection: &connection,
            request,
        });

        Ok(Admission::Stream {
            connection,
            headers,
        })
    }

    /// Like [`Channel::admit`], additionally reporting the outcome to
    /// `callback` once the current task has yielded. Without a Tokio runtime
    /// the callback runs before returning.
    pub fn admit_with_callback<F>(
        &self,
        request: &RequestMeta,
        sink: Arc<dyn Sink>,
        callback: F,
    ) -> Result<Admission>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let admission = self.admit(request, sink);
        let outcome = match &admission {
            Ok(_) => Ok(()),
            Err(e) => Err(Error::from(e.error_kind.clone())),
        };

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { callback(outcome) });
            }
            Err(_) => callback(outcome),
        }

        admission
    }

    /// `:ok` acknowledgement, the default retry if one is set and the
    /// padding comment if the client asked for it, as a single frame.
    fn preamble(&self, padded: bool) -> Frame {
        let mut preamble = String::from(":ok\n\n");

        let retry = self.inner.retry_timeout.load(Ordering::Relaxed);
        if retry > 0 {
            preamble.push_str(&format!("retry: {retry}\n"));
        }

        if padded {
            preamble.push_str(&PREAMBLE_PADDING);
        }

        Frame::from(preamble)
    }
}
