//! Session guard middleware for the API routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use pipeline_core::session::{Session, SessionGuard};
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the session token.
pub const SESSION_HEADER: &str = "x-session-id";

/// Cookie carrying the session token for browser requests.
pub const SESSION_COOKIE: &str = "crm_session";

/// The authorized session, inserted into request extensions by [`require_session`].
#[derive(Debug, Clone)]
pub struct CurrentSession {
    pub token: String,
    pub session: Session,
}

/// Session token from the header, falling back to the cookie.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(token.trim().to_string()).filter(|t| !t.is_empty());
    }
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|t| !t.is_empty())
}

/// Browsers asking for a page get redirected instead of a JSON 401.
pub fn wants_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"))
}

/// Run the session guard for `token`. The guard is returned still following
/// auth events so long-lived callers can watch it.
pub async fn authorize(
    state: &AppState,
    token: Option<String>,
    html: bool,
) -> Result<(SessionGuard, CurrentSession), ApiError> {
    let sign_in_path = &state.guard.sign_in_path;
    let Some(token) = token else {
        debug!("Request without session token");
        return Err(ApiError::sign_in("missing session token", sign_in_path, html));
    };

    let mut guard = SessionGuard::new(
        state.sessions.auth(&token),
        state.sessions.storage(&token),
        state.guard.clone(),
    );
    let session = guard
        .enter()
        .await
        .map_err(|e| ApiError::from_guard(e, sign_in_path, html))?;
    Ok((guard, CurrentSession { token, session }))
}

pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let html = wants_html(req.headers());
    let token = session_token(req.headers());
    match authorize(&state, token, html).await {
        Ok((mut guard, current)) => {
            guard.teardown();
            req.extensions_mut().insert(current);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_token_from_header_or_cookie() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_token(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; crm_session=abc"));
        assert_eq!(session_token(&headers).as_deref(), Some("abc"));

        headers.insert(SESSION_HEADER, HeaderValue::from_static("xyz"));
        assert_eq!(session_token(&headers).as_deref(), Some("xyz"));
    }

    #[test]
    fn test_wants_html() {
        let mut headers = HeaderMap::new();
        assert!(!wants_html(&headers));
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/html,application/xhtml+xml"));
        assert!(wants_html(&headers));
    }
}
