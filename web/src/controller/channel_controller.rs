use crate::{AppState, Error};
use async_stream::stream;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use log::*;
use sse::{Admission, Channel, ChannelSink, ConnectionId, RequestMeta};
use std::convert::Infallible;
use std::sync::Arc;

/// Deregisters the connection when the response body is dropped, whether
/// the client went away or the channel ended the stream.
struct ConnectionGuard {
    channel: Channel,
    connection: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.channel.deregister(&self.connection) {
            debug!("SSE connection {} closed, cleaning up", self.connection);
        }
    }
}

/// GET (stream) or OPTIONS (CORS preflight) a named channel.
pub async fn connect(
    State(app_state): State<AppState>,
    Path(name): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let channel = match app_state.channel(&name) {
        Some(channel) => channel.clone(),
        None => {
            debug!("No SSE channel named \"{name}\"");
            return Ok((StatusCode::NOT_FOUND, "NOT FOUND").into_response());
        }
    };

    let request = RequestMeta::new(method, uri, headers);
    let (sink, mut rx) = ChannelSink::new();

    match channel.admit(&request, Arc::new(sink))? {
        Admission::Preflight { headers } => Ok((StatusCode::NO_CONTENT, headers).into_response()),
        Admission::Stream {
            connection,
            headers,
        } => {
            debug!("Establishing SSE connection {connection} on channel \"{name}\"");

            let guard = ConnectionGuard {
                channel,
                connection,
            };

            // Frames arrive from the channel; the stream ends when the
            // channel ends the sink or the client disconnects.
            let body = stream! {
                let _guard = guard;
                while let Some(frame) = rx.recv().await {
                    yield Ok::<_, Infallible>(frame.into_bytes());
                }
            };

            Ok((StatusCode::OK, headers, Body::from_stream(body)).into_response())
        }
    }
}
