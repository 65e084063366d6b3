//! Origin forwarding
//!
//! Streams allowed requests to the configured origin and streams the
//! response back without buffering either body. The firewall decides
//! allow or deny; this module only moves bytes.

use crate::firewall::responses;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderValue, Response, StatusCode};
use proxywall_common::config::OriginConfig;
use proxywall_common::metrics::FORWARD_DURATION_SECONDS;
use std::time::{Duration, Instant};
use tracing::warn;

/// Connection-scoped headers that must not cross the proxy hop
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

pub struct Forwarder {
    client: reqwest::Client,
    origin: String,
}

impl Forwarder {
    pub fn new(config: &OriginConfig, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();
        Self {
            client,
            origin: config.address.clone(),
        }
    }

    fn origin_url(&self, req: &Request) -> String {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("http://{}{}", self.origin, path_and_query)
    }

    /// Forward the request, preserving the original Host and adding the
    /// standard forwarding headers
    pub async fn forward(
        &self,
        req: Request,
        hostname: &str,
        remote_ip: &str,
        scheme: &str,
    ) -> Response<Body> {
        let url = self.origin_url(&req);
        let started = Instant::now();
        let (parts, body) = req.into_parts();

        let mut headers = parts.headers;
        strip_hop_headers(&mut headers);
        if let Ok(host) = HeaderValue::from_str(hostname) {
            headers.insert(header::HOST, host.clone());
            headers.insert("x-forwarded-host", host);
        }
        if let Ok(value) = HeaderValue::from_str(scheme) {
            headers.insert("x-forwarded-proto", value);
        }
        let forwarded_for = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{existing}, {remote_ip}"),
            None => remote_ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert("x-forwarded-for", value);
        }

        let result = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await;

        let upstream = match result {
            Ok(resp) => resp,
            Err(e) => {
                warn!(origin = %self.origin, error = %e, "Origin request failed");
                FORWARD_DURATION_SECONDS
                    .with_label_values(&["error"])
                    .observe(started.elapsed().as_secs_f64());
                return Response::builder()
                    .status(StatusCode::BAD_GATEWAY)
                    .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
                    .body(Body::from("Bad Gateway"))
                    .unwrap_or_else(|_| responses::refresh_page());
            }
        };

        let status = upstream.status();
        FORWARD_DURATION_SECONDS
            .with_label_values(&[status.as_str()])
            .observe(started.elapsed().as_secs_f64());

        let mut builder = Response::builder().status(status);
        if let Some(out) = builder.headers_mut() {
            for (name, value) in upstream.headers() {
                if !HOP_BY_HOP.contains(&name.as_str()) {
                    out.append(name.clone(), value.clone());
                }
            }
        }
        builder
            .body(Body::from_stream(upstream.bytes_stream()))
            .unwrap_or_else(|_| responses::refresh_page())
    }
}
