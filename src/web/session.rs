use axum::body::Body;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;

use crate::session::SessionStore;

pub const COOKIE_NAME: &str = "qc_session";

/// Session id attached to every API request by [`ensure_session`].
#[derive(Debug, Clone)]
pub struct SessionId(pub String);

/// Pull a well-formed session id out of the request's cookie header.
fn session_from_cookie(req: &Request<Body>) -> Option<String> {
    let cookies = req.headers().get(COOKIE)?.to_str().ok()?;

    cookies
        .split(';')
        .filter_map(|pair| pair.trim().strip_prefix(&format!("{COOKIE_NAME}=")))
        .find(|value| uuid::Uuid::parse_str(value).is_ok())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// Middleware that gives every browser a session.
///
/// Requests without a valid `qc_session` cookie get a fresh id, and the
/// response carries the cookie that pins it.
pub async fn ensure_session(mut req: Request<Body>, next: Next) -> Response {
    let (id, fresh) = match session_from_cookie(&req) {
        Some(id) => (id, false),
        None => (SessionStore::new_id(), true),
    };

    req.extensions_mut().insert(SessionId(id.clone()));
    let mut response = next.run(req).await;

    if fresh {
        let cookie = format!("{COOKIE_NAME}={id}; Path=/; HttpOnly; SameSite=Lax");
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => tracing::error!("failed to build session cookie: {e}"),
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_cookie(cookie: &str) -> Request<Body> {
        Request::builder()
            .uri("/api/overview")
            .header(COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn reads_session_among_other_cookies() {
        let id = SessionStore::new_id();
        let req = request_with_cookie(&format!("theme=dark; {COOKIE_NAME}={id}; other=1"));
        assert_eq!(session_from_cookie(&req), Some(id));
    }

    #[test]
    fn rejects_malformed_session_values() {
        let req = request_with_cookie(&format!("{COOKIE_NAME}=not-a-uuid"));
        assert_eq!(session_from_cookie(&req), None);

        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(session_from_cookie(&req), None);
    }
}
