//! Session cookie checkpoint
//!
//! Last filter of the main chain. A request carrying a valid session cookie
//! falls through and is forwarded. Anything else gets a fresh session
//! record and an auto-refresh page instead of the origin response; the
//! retried request then carries the cookie.

use crate::firewall::{AbortAction, Filter, FilterResult, RequestInfo};
use crate::store::session::SessionStore;
use async_trait::async_trait;
use proxywall_common::metrics::SESSIONS_ISSUED_TOTAL;
use std::sync::Arc;
use tracing::debug;

pub struct CookieCheckpoint {
    sessions: Arc<SessionStore>,
}

impl CookieCheckpoint {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Filter for CookieCheckpoint {
    fn name(&self) -> &'static str {
        "cookie_checkpoint"
    }

    async fn handle(&self, req: &RequestInfo) -> FilterResult {
        if let Some(sid) = &req.sid {
            if self
                .sessions
                .validate(sid, &req.hostname, &req.user_agent)
                .await
            {
                return FilterResult::pass_to_next();
            }
            debug!(hostname = %req.hostname, "Invalid session cookie, reissuing");
        }

        let record = self
            .sessions
            .create(&req.remote_ip, &req.hostname, &req.user_agent);
        self.sessions.store(record.clone());
        SESSIONS_ISSUED_TOTAL
            .with_label_values(&[req.hostname.as_str()])
            .inc();
        FilterResult::abort(AbortAction::IssueSession(record))
    }
}
