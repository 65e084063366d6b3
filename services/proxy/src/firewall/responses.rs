//! Terminal responses produced by the chain

use crate::store::session::SessionRecord;
use axum::body::Body;
use axum::http::{header, Response, StatusCode};
use chrono::Utc;

const REFRESH_PAGE: &str =
    "<!DOCTYPE html><html><head><meta http-equiv=\"refresh\" content=\"0\"></head><body></body></html>";

/// Default refusal
pub fn forbidden() -> Response<Body> {
    Response::builder()
        .status(StatusCode::FORBIDDEN)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from("Forbidden"))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Auto-refresh page without a cookie; used when request handling fails
/// and the client should simply retry
pub fn refresh_page() -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(REFRESH_PAGE))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Session issuance: set the cookie, serve the auto-refresh page so the
/// browser retries the same URL carrying it
pub fn session_challenge(cookie_name: &str, record: &SessionRecord) -> Response<Body> {
    let max_age = (record.expires - Utc::now()).num_seconds().max(0);
    // intentionally neither Secure nor HttpOnly, matching deployed behavior
    let cookie = format!(
        "{}={}; Path=/; Domain={}; Max-Age={}",
        cookie_name, record.sid, record.domain, max_age
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .header(header::SET_COOKIE, cookie)
        .body(Body::from(REFRESH_PAGE))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
