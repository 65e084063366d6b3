//! Sensitive query parameter blocking
//!
//! Part of the reduced crawler chain: crawlers must never be served URLs
//! that carry credentials or tokens in the query string, or those values
//! end up in a search index.

use crate::firewall::{Filter, FilterResult, RequestInfo};
use async_trait::async_trait;
use tracing::info;

const SENSITIVE_PARAMS: &[&str] = &[
    "ps",
    "pw",
    "pwd",
    "pass",
    "password",
    "secret",
    "api_key",
    "tkn",
    "token",
    "access_token",
];

pub struct SensitiveUrlFilter;

#[async_trait]
impl Filter for SensitiveUrlFilter {
    fn name(&self) -> &'static str {
        "sensitive_urls"
    }

    async fn handle(&self, req: &RequestInfo) -> FilterResult {
        for param in SENSITIVE_PARAMS {
            if req.has_query_param(param) {
                info!(
                    hostname = %req.hostname,
                    path = %req.path,
                    param,
                    "Refusing crawler access to sensitive URL"
                );
                return FilterResult::deny();
            }
        }
        FilterResult::pass_to_next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::test_request;

    #[tokio::test]
    async fn test_sensitive_param_is_denied() {
        let filter = SensitiveUrlFilter;
        for param in ["password", "token", "api_key", "pw"] {
            let mut req = test_request("example.com", "/login");
            req.query = vec![(param.to_string(), "hunter2".to_string())];
            let result = filter.handle(&req).await;
            assert!(!result.passed, "{param} should be refused");
        }
    }

    #[tokio::test]
    async fn test_harmless_params_pass() {
        let filter = SensitiveUrlFilter;
        let mut req = test_request("example.com", "/search");
        req.query = vec![
            ("q".to_string(), "rust".to_string()),
            ("page".to_string(), "2".to_string()),
        ];
        let result = filter.handle(&req).await;
        assert!(result.passed);
    }

    #[tokio::test]
    async fn test_value_containing_keyword_is_not_matched() {
        let filter = SensitiveUrlFilter;
        let mut req = test_request("example.com", "/search");
        // only parameter names are inspected
        req.query = vec![("q".to_string(), "password manager".to_string())];
        let result = filter.handle(&req).await;
        assert!(result.passed);
    }
}
