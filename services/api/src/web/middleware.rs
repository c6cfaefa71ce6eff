//! services/api/src/web/middleware.rs
//!
//! Request middleware that works out who is asking and in which language.
//!
//! Verifying the user header is the job of the gateway in front of this service;
//! here a present `x-user-id` simply marks the caller as authenticated.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use quiz_core::Identity;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::web::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const CLIENT_ID_HEADER: &str = "x-client-id";
pub const DEFAULT_CLIENT_ID: &str = "anonymous";

/// The caller's UI language, taken from `Accept-Language`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locale(pub String);

pub fn identity_from_headers(headers: &HeaderMap) -> Identity {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok());
    if let Some(user_id) = user_id {
        return Identity::Authenticated { user_id };
    }

    let client_id = headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_CLIENT_ID);
    Identity::Anonymous {
        client_id: client_id.to_string(),
    }
}

/// Primary subtag of the first `Accept-Language` entry, e.g. `de` for `de-CH,de;q=0.9`.
pub fn language_from_headers(headers: &HeaderMap, default: &str) -> String {
    headers
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|tag| tag.split(';').next())
        .and_then(|tag| tag.trim().split('-').next())
        .map(str::trim)
        .filter(|tag| !tag.is_empty() && *tag != "*")
        .map(|tag| tag.to_ascii_lowercase())
        .unwrap_or_else(|| default.to_string())
}

/// Middleware that inserts the caller's `Identity` and `Locale` into request extensions.
pub async fn resolve_identity(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let identity = identity_from_headers(req.headers());
    let locale = Locale(language_from_headers(
        req.headers(),
        &state.config.default_language,
    ));
    debug!("Request from {:?} with locale {}", identity, locale.0);

    req.extensions_mut().insert(identity);
    req.extensions_mut().insert(locale);
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn user_header_marks_authenticated() {
        let mut headers = HeaderMap::new();
        let id = Uuid::new_v4();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        assert_eq!(identity_from_headers(&headers), Identity::Authenticated { user_id: id });
    }

    #[test]
    fn invalid_user_header_falls_back_to_anonymous_client() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        headers.insert(CLIENT_ID_HEADER, HeaderValue::from_static("tab-42"));
        assert_eq!(
            identity_from_headers(&headers),
            Identity::Anonymous {
                client_id: "tab-42".to_string()
            }
        );
        assert_eq!(
            identity_from_headers(&HeaderMap::new()),
            Identity::Anonymous {
                client_id: DEFAULT_CLIENT_ID.to_string()
            }
        );
    }

    #[test]
    fn language_uses_primary_subtag() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("de-CH,de;q=0.9,en;q=0.8"),
        );
        assert_eq!(language_from_headers(&headers, "en"), "de");
        assert_eq!(language_from_headers(&HeaderMap::new(), "en"), "en");

        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("*"));
        assert_eq!(language_from_headers(&headers, "fr"), "fr");
    }
}
