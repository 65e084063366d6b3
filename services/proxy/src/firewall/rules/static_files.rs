//! Static asset bypass
//!
//! Requests for static assets skip the rest of the chain. Pages load their
//! assets before the browser has had a chance to present the session
//! cookie, so assets cannot be gated on it.

use crate::firewall::{Filter, FilterResult, RequestInfo};
use async_trait::async_trait;

const STATIC_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "svg", "ico", "css", "js", "htm", "html", "txt",
];

pub struct StaticFileFilter;

impl StaticFileFilter {
    fn is_static(path: &str) -> bool {
        let Some((_, ext)) = path.rsplit_once('.') else {
            return false;
        };
        let ext = ext.to_lowercase();
        STATIC_EXTENSIONS.contains(&ext.as_str())
    }
}

#[async_trait]
impl Filter for StaticFileFilter {
    fn name(&self) -> &'static str {
        "static_files"
    }

    async fn handle(&self, req: &RequestInfo) -> FilterResult {
        if Self::is_static(&req.path) {
            return FilterResult::break_loop();
        }
        FilterResult::pass_to_next()
    }
}
