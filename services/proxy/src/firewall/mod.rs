//! Filter chain
//!
//! Each filter inspects the request and reports a `FilterResult`. The chain
//! runs filters in a fixed order; concurrency lives across requests, never
//! inside one request's evaluation. Requests whose user agent matches a
//! known crawler signature run a reduced chain instead, so bots are never
//! issued session cookies but still cannot reach sensitive URLs.

pub mod responses;
pub mod rules;

use crate::store::session::SessionRecord;
use async_trait::async_trait;
use proxywall_common::error::Error;
use proxywall_common::metrics::{FILTER_VERDICTS_TOTAL, REQUESTS_TOTAL};
use tracing::error;

/// Everything a filter may inspect about a request
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: String,
    /// Normalized hostname: port stripped, leading `www.` stripped
    pub hostname: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub user_agent: String,
    pub remote_ip: String,
    /// Session cookie value, when present
    pub sid: Option<String>,
    pub scheme: String,
}

impl RequestInfo {
    pub fn has_query_param(&self, name: &str) -> bool {
        self.query.iter().any(|(k, _)| k == name)
    }
}

/// Terminal response a filter demands instead of forwarding
#[derive(Debug, Clone)]
pub enum AbortAction {
    /// Plain 403
    Forbidden,
    /// Set a session cookie and serve the auto-refresh page
    IssueSession(SessionRecord),
}

/// The inter-filter contract
#[derive(Debug)]
pub struct FilterResult {
    /// This filter did not object
    pub passed: bool,
    /// Skip all remaining filters and allow the request through
    pub break_loop: bool,
    /// Stop the chain and produce this response instead of forwarding
    pub abort: Option<AbortAction>,
    /// Logged, never aborts by itself
    pub error: Option<Error>,
}

impl FilterResult {
    /// Passed, evaluate the next filter
    pub fn pass_to_next() -> Self {
        Self {
            passed: true,
            break_loop: false,
            abort: None,
            error: None,
        }
    }

    /// Definitive allow, skip the rest of the chain
    pub fn break_loop() -> Self {
        Self {
            passed: true,
            break_loop: true,
            abort: None,
            error: None,
        }
    }

    /// Not passed; the chain answers with the default forbidden response
    pub fn deny() -> Self {
        Self {
            passed: false,
            break_loop: false,
            abort: None,
            error: None,
        }
    }

    /// Stop the chain with a specific response
    pub fn abort(action: AbortAction) -> Self {
        Self {
            passed: false,
            break_loop: false,
            abort: Some(action),
            error: None,
        }
    }

    pub fn with_error(mut self, error: Error) -> Self {
        self.error = Some(error);
        self
    }

    fn action_label(&self) -> &'static str {
        if self.abort.is_some() {
            "abort"
        } else if !self.passed {
            "deny"
        } else if self.break_loop {
            "break_loop"
        } else {
            "pass"
        }
    }
}

/// One link of the chain
#[async_trait]
pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, req: &RequestInfo) -> FilterResult;
}

/// What the ingress should do with the request
#[derive(Debug)]
pub enum Decision {
    /// Forward to the origin
    Forward,
    /// Answer with this response instead
    Respond(AbortAction),
}

/// Crawler user-agent signatures; matched case-insensitively as substrings
const BOT_USER_AGENTS: &[&str] = &[
    "googlebot",
    "googlebot-image",
    "googlebot-news",
    "googlebot-video",
    "adsbot-google",
    "mediapartners-google",
    "apis-google",
    "feedfetcher-google",
    "appengine-google",
    "google-read-aloud",
    "google-searchbyimage",
    "google-searchbyvoice",
    "google-favicon",
    "google-searchconsole",
    "google-structureddatatestingtool",
    "google-adwords",
    "ahrefsbot",
    "bingbot",
    "bingpreview",
    "adidxbot",
    "msnbot",
    "slurp",
    "amazonbot",
    "yandexbot",
    "yandeximages",
    "yandexvideo",
    "yandexmedia",
    "yandexblogs",
    "yandexfavicons",
    "yandexwebmaster",
    "yandexpagechecker",
    "yandeximageresizer",
    "yandexdirect",
    "yandexadnet",
    "yandexdirectdyn",
    "yandexmarket",
    "yandexvertis",
    "yandexcalendar",
    "yandexsitelinks",
    "yandexmetrika",
    "yandexnews",
    "yandexcatalog",
    "yandexantivirus",
    "yandexflights",
];

/// Ordered filter chain plus the reduced crawler chain
pub struct FirewallChain {
    filters: Vec<Box<dyn Filter>>,
    bot_filters: Vec<Box<dyn Filter>>,
}

impl FirewallChain {
    pub fn new(filters: Vec<Box<dyn Filter>>, bot_filters: Vec<Box<dyn Filter>>) -> Self {
        Self {
            filters,
            bot_filters,
        }
    }

    fn is_crawler(user_agent: &str) -> bool {
        let ua = user_agent.to_lowercase();
        BOT_USER_AGENTS.iter().any(|sig| ua.contains(sig))
    }

    async fn run(&self, filters: &[Box<dyn Filter>], req: &RequestInfo) -> Decision {
        for filter in filters {
            let result = filter.handle(req).await;
            FILTER_VERDICTS_TOTAL
                .with_label_values(&[filter.name(), result.action_label()])
                .inc();

            if let Some(ref err) = result.error {
                error!(filter = filter.name(), error = %err, "Filter reported an error");
            }

            if let Some(abort) = result.abort {
                return Decision::Respond(abort);
            }
            if result.passed {
                if result.break_loop {
                    return Decision::Forward;
                }
                continue;
            }
            return Decision::Respond(AbortAction::Forbidden);
        }
        Decision::Forward
    }

    /// Top-level entry point invoked by the ingress layer
    pub async fn evaluate(&self, req: &RequestInfo) -> Decision {
        let decision = if Self::is_crawler(&req.user_agent) {
            self.run(&self.bot_filters, req).await
        } else {
            self.run(&self.filters, req).await
        };

        let label = match &decision {
            Decision::Forward => "forwarded",
            Decision::Respond(AbortAction::Forbidden) => "forbidden",
            Decision::Respond(AbortAction::IssueSession(_)) => "session_issued",
        };
        REQUESTS_TOTAL.with_label_values(&[label]).inc();
        decision
    }
}

#[cfg(test)]
pub(crate) fn test_request(hostname: &str, path: &str) -> RequestInfo {
    RequestInfo {
        method: "GET".to_string(),
        hostname: hostname.to_string(),
        path: path.to_string(),
        query: Vec::new(),
        user_agent: "Mozilla/5.0 (X11; Linux x86_64)".to_string(),
        remote_ip: "203.0.113.7".to_string(),
        sid: None,
        scheme: "http".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingFilter {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        result: fn() -> FilterResult,
    }

    #[async_trait]
    impl Filter for CountingFilter {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn handle(&self, _req: &RequestInfo) -> FilterResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn counting(
        name: &'static str,
        result: fn() -> FilterResult,
    ) -> (Box<dyn Filter>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Box::new(CountingFilter {
                name,
                calls: Arc::clone(&calls),
                result,
            }),
            calls,
        )
    }

    #[tokio::test]
    async fn test_break_loop_skips_remaining_filters() {
        let (first, first_calls) = counting("first", FilterResult::break_loop);
        let (second, second_calls) = counting("second", FilterResult::pass_to_next);
        let chain = FirewallChain::new(vec![first, second], vec![]);

        let decision = chain.evaluate(&test_request("example.com", "/")).await;
        assert!(matches!(decision, Decision::Forward));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pass_continues_to_next() {
        let (first, _) = counting("first", FilterResult::pass_to_next);
        let (second, second_calls) = counting("second", FilterResult::pass_to_next);
        let chain = FirewallChain::new(vec![first, second], vec![]);

        let decision = chain.evaluate(&test_request("example.com", "/")).await;
        // chain exhausted without objection: allow
        assert!(matches!(decision, Decision::Forward));
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deny_stops_with_forbidden() {
        let (first, _) = counting("first", FilterResult::deny);
        let (second, second_calls) = counting("second", FilterResult::pass_to_next);
        let chain = FirewallChain::new(vec![first, second], vec![]);

        let decision = chain.evaluate(&test_request("example.com", "/")).await;
        assert!(matches!(decision, Decision::Respond(AbortAction::Forbidden)));
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_abort_takes_precedence() {
        let (first, _) = counting("first", || {
            FilterResult::abort(AbortAction::Forbidden)
        });
        let (second, second_calls) = counting("second", FilterResult::break_loop);
        let chain = FirewallChain::new(vec![first, second], vec![]);

        let decision = chain.evaluate(&test_request("example.com", "/")).await;
        assert!(matches!(decision, Decision::Respond(AbortAction::Forbidden)));
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_crawler_user_agent_runs_reduced_chain() {
        let (main_filter, main_calls) = counting("main", FilterResult::pass_to_next);
        let (bot_filter, bot_calls) = counting("bot", FilterResult::pass_to_next);
        let chain = FirewallChain::new(vec![main_filter], vec![bot_filter]);

        let mut req = test_request("example.com", "/");
        req.user_agent = "Mozilla/5.0 (compatible; Googlebot/2.1)".to_string();

        let decision = chain.evaluate(&req).await;
        assert!(matches!(decision, Decision::Forward));
        assert_eq!(main_calls.load(Ordering::SeqCst), 0);
        assert_eq!(bot_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_filter_error_is_logged_not_fatal() {
        let (first, _) = counting("first", || {
            FilterResult::pass_to_next().with_error(Error::timeout("remote tier read"))
        });
        let (second, second_calls) = counting("second", FilterResult::pass_to_next);
        let chain = FirewallChain::new(vec![first, second], vec![]);

        let decision = chain.evaluate(&test_request("example.com", "/")).await;
        assert!(matches!(decision, Decision::Forward));
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_crawler_match_is_case_insensitive_substring() {
        assert!(FirewallChain::is_crawler("Mozilla/5.0 (compatible; bingbot/2.0)"));
        assert!(FirewallChain::is_crawler("YANDEXBOT/3.0"));
        assert!(!FirewallChain::is_crawler("Mozilla/5.0 (X11; Linux)"));
    }
}
