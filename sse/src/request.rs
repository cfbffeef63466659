//! What admission needs to know about an incoming request.
use axum::http::header::ORIGIN;
use axum::http::{HeaderMap, HeaderName, Method, Uri};
use url::form_urlencoded;

pub const LAST_EVENT_ID: HeaderName = HeaderName::from_static("last-event-id");

/// Query parameters EventSource polyfills use in place of the
/// `Last-Event-ID` header, in priority order.
const LAST_EVENT_ID_PARAMS: [&str; 2] = ["evs_last_event_id", "lastEventId"];
const PREAMBLE_PARAM: &str = "evs_preamble";

/// Request metadata, borrowed from the transport for the duration of
/// admission.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl RequestMeta {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap) -> Self {
        Self {
            method,
            uri,
            headers,
        }
    }

    /// The declared `Origin`, if any.
    pub fn origin(&self) -> Option<&str> {
        self.headers
            .get(ORIGIN)
            .and_then(|value| value.to_str().ok())
            .filter(|origin| !origin.is_empty())
    }

    /// Capability probe sent by browsers before a cross-origin request.
    pub fn is_preflight(&self) -> bool {
        self.method == Method::OPTIONS
    }

    /// The id of the last event the client saw, from the `Last-Event-ID`
    /// header or one of the polyfill query parameters. The first non-empty
    /// source wins; values that are not positive integers count as none.
    pub fn last_event_id(&self) -> Option<u64> {
        let header = self
            .headers
            .get(&LAST_EVENT_ID)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let raw = header
            .into_iter()
            .chain(
                LAST_EVENT_ID_PARAMS
                    .iter()
                    .filter_map(|name| self.query_param(name)),
            )
            .map(|value| value.trim().to_owned())
            .find(|value| !value.is_empty())?;

        raw.parse::<u64>().ok().filter(|id| *id > 0)
    }

    /// Whether the client asked for the 2 KiB padding comment.
    pub fn wants_preamble(&self) -> bool {
        self.query_param(PREAMBLE_PARAM)
            .map(|value| !matches!(value.as_str(), "" | "0" | "false"))
            .unwrap_or(false)
    }

    fn query_param(&self, name: &str) -> Option<String> {
        let query = self.uri.query()?;
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}
