//! Data-plane ingress
//!
//! Adapts each inbound HTTP request into the chain's view of it, runs the
//! chain, and either forwards to the origin or serves the chain's terminal
//! response.

use crate::firewall::{responses, AbortAction, Decision, FirewallChain, RequestInfo};
use crate::proxy::Forwarder;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct AppState {
    pub chain: Arc<FirewallChain>,
    pub forwarder: Arc<Forwarder>,
    pub cookie_name: String,
}

/// Strip the port and a leading `www.` so cookies and counters are keyed
/// by the bare domain
fn normalize_hostname(host: &str) -> String {
    let host = host.trim();
    // bracketed IPv6 literals keep their colons
    let without_port = if let Some(end) = host.rfind(']') {
        &host[..=end]
    } else {
        host.split(':').next().unwrap_or(host)
    };
    without_port
        .strip_prefix("www.")
        .unwrap_or(without_port)
        .to_lowercase()
}

/// Client address: first X-Forwarded-For hop, then X-Real-IP, then the
/// peer socket
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real = real.trim();
        if !real.is_empty() {
            return real.to_string();
        }
    }
    peer.ip().to_string()
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for value in headers.get_all(header::COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        for pair in raw.split(';') {
            let Some((k, v)) = pair.trim().split_once('=') else {
                continue;
            };
            if k == name && !v.is_empty() {
                return Some(v.to_string());
            }
        }
    }
    None
}

fn parse_query(query: Option<&str>) -> Vec<(String, String)> {
    let Some(query) = query else {
        return Vec::new();
    };
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

fn request_info(req: &Request, peer: SocketAddr, cookie_name: &str) -> RequestInfo {
    let headers = req.headers();
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");

    RequestInfo {
        method: req.method().to_string(),
        hostname: normalize_hostname(host),
        path: req.uri().path().to_string(),
        query: parse_query(req.uri().query()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string(),
        remote_ip: client_ip(headers, peer),
        sid: cookie_value(headers, cookie_name),
        scheme: scheme.to_string(),
    }
}

/// Fallback handler for every data-plane request
pub async fn handle(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response<Body> {
    let info = request_info(&req, peer, &state.cookie_name);
    debug!(
        method = %info.method,
        hostname = %info.hostname,
        path = %info.path,
        ip = %info.remote_ip,
        "Evaluating request"
    );

    match state.chain.evaluate(&info).await {
        Decision::Forward => {
            state
                .forwarder
                .forward(req, &info.hostname, &info.remote_ip, &info.scheme)
                .await
        }
        Decision::Respond(AbortAction::Forbidden) => responses::forbidden(),
        Decision::Respond(AbortAction::IssueSession(record)) => {
            responses::session_challenge(&state.cookie_name, &record)
        }
    }
}
