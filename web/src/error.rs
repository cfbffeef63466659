use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use sse::error::{AdmissionErrorKind, Error as SseError, ErrorKind, TransportErrorKind};

#[derive(Debug)]
pub struct Error(SseError);

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.0)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        write!(fmt, "{}", self.0)
    }
}

// List of possible StatusCode variants https://docs.rs/http/latest/http/status/struct.StatusCode.html
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self.0.error_kind {
            ErrorKind::Admission(admission_error_kind) => match admission_error_kind {
                AdmissionErrorKind::OriginNotAllowed(_) => {
                    (StatusCode::FORBIDDEN, "FORBIDDEN").into_response()
                }
            },
            ErrorKind::Transport(transport_error_kind) => match transport_error_kind {
                TransportErrorKind::Closed | TransportErrorKind::Io => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
                }
            },
        }
    }
}

impl<E> From<E> for Error
where
    E: Into<SseError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disallowed_origin_maps_to_forbidden() {
        let response = Error::from(SseError::origin_not_allowed("http://evil.example")).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn transport_failures_map_to_internal_error() {
        let response = Error::from(SseError::closed()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
