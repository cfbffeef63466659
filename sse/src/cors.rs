//! Cross-origin admission decisions for a channel.
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, VARY,
};
use axum::http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Deserializer};

const ALLOW_ALL: &str = "*";

#[derive(Debug, Clone, Default, PartialEq)]
pub enum CorsPolicy {
    #[default]
    Disabled,
    AllowAll,
    AllowList(Vec<String>),
}

/// Outcome of checking a request's `Origin` against a [`CorsPolicy`].
#[derive(Debug, Clone, PartialEq)]
pub enum CorsDecision {
    /// CORS is disabled or the request carries no `Origin`.
    NotApplicable,
    Allowed(String),
    Denied(String),
}

impl CorsPolicy {
    /// Builds a policy from a list of origins, where `*` allows every origin
    /// and an empty list disables CORS handling.
    pub fn from_origins<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let origins: Vec<String> = origins
            .into_iter()
            .map(Into::into)
            .map(|origin| origin.trim().to_owned())
            .filter(|origin| !origin.is_empty())
            .collect();

        if origins.is_empty() {
            CorsPolicy::Disabled
        } else if origins.iter().any(|origin| origin == ALLOW_ALL) {
            CorsPolicy::AllowAll
        } else {
            CorsPolicy::AllowList(origins)
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, CorsPolicy::Disabled)
    }

    pub fn decide(&self, origin: Option<&str>) -> CorsDecision {
        let origin = match (self, origin) {
            (CorsPolicy::Disabled, _) | (_, None) => return CorsDecision::NotApplicable,
            (_, Some(origin)) => origin,
        };

        let allowed = match self {
            CorsPolicy::AllowAll => true,
            CorsPolicy::AllowList(origins) => origins.iter().any(|o| o == origin),
            CorsPolicy::Disabled => false,
        };

        if allowed {
            CorsDecision::Allowed(origin.to_owned())
        } else {
            CorsDecision::Denied(origin.to_owned())
        }
    }
}

impl CorsDecision {
    pub fn is_denied(&self) -> bool {
        matches!(self, CorsDecision::Denied(_))
    }

    /// Adds the response headers granting access, if the origin was allowed.
    pub fn apply(&self, headers: &mut HeaderMap, preflight: bool) {
        let CorsDecision::Allowed(origin) = self else {
            return;
        };

        let Ok(origin) = HeaderValue::from_str(origin) else {
            log::warn!("Not echoing unrepresentable origin {origin:?}");
            return;
        };

        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Last-Event-ID"),
        );
        headers.insert(VARY, HeaderValue::from_static("Origin"));

        if preflight {
            headers.insert(
                ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static("GET, OPTIONS"),
            );
        }
    }
}

/// Accepts `false` / `true` or `{ "origins": [...] }`.
impl<'de> Deserialize<'de> for CorsPolicy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Setting {
            Flag(bool),
            Origins { origins: Vec<String> },
        }

        Ok(match Setting::deserialize(deserializer)? {
            Setting::Flag(false) => CorsPolicy::Disabled,
            Setting::Flag(true) => CorsPolicy::AllowAll,
            Setting::Origins { origins } => CorsPolicy::from_origins(origins),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_allows_any_origin() {
        let policy = CorsPolicy::from_origins(["*"]);
        assert_eq!(policy, CorsPolicy::AllowAll);
        assert_eq!(
            policy.decide(Some("https://anywhere.example")),
            CorsDecision::Allowed("https://anywhere.example".to_owned())
        );
    }

    #[test]
    fn allow_list_denies_unknown_origins() {
        let policy = CorsPolicy::from_origins(["http://localhost:3000"]);

        assert_eq!(
            policy.decide(Some("http://localhost:3000")),
            CorsDecision::Allowed("http://localhost:3000".to_owned())
        );
        assert!(policy.decide(Some("http://evil.example")).is_denied());
    }

    #[test]
    fn missing_origin_or_disabled_policy_is_not_applicable() {
        let policy = CorsPolicy::from_origins(["http://localhost:3000"]);
        assert_eq!(policy.decide(None), CorsDecision::NotApplicable);
        assert_eq!(
            CorsPolicy::Disabled.decide(Some("http://evil.example")),
            CorsDecision::NotApplicable
        );
        assert_eq!(CorsPolicy::from_origins(Vec::<String>::new()), CorsPolicy::Disabled);
    }

    #[test]
    fn allowed_decision_sets_headers() {
        let mut headers = HeaderMap::new();
        CorsDecision::Allowed("http://a.example".to_owned()).apply(&mut headers, true);

        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "http://a.example");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_HEADERS], "Last-Event-ID");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], "GET, OPTIONS");
    }

    #[test]
    fn denied_decision_sets_nothing() {
        let mut headers = HeaderMap::new();
        CorsDecision::Denied("http://evil.example".to_owned()).apply(&mut headers, true);
        assert!(headers.is_empty());
    }

    #[test]
    fn deserializes_flag_and_origin_list() {
        let disabled: CorsPolicy = serde_json::from_str("false").unwrap();
        let all: CorsPolicy = serde_json::from_str(r#"{ "origins": ["*"] }"#).unwrap();
        let some: CorsPolicy =
            serde_json::from_str(r#"{ "origins": ["http://a.example"] }"#).unwrap();

        assert_eq!(disabled, CorsPolicy::Disabled);
        assert_eq!(all, CorsPolicy::AllowAll);
        assert_eq!(some, CorsPolicy::AllowList(vec!["http://a.example".to_owned()]));
    }
}
