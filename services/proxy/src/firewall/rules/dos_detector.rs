//! Rate filter
//!
//! Calm hostnames bypass the session checkpoint entirely. Once a hostname
//! is penalized, or crosses the threshold on this very request, traffic is
//! handed on to the checkpoint so only cookie-bearing clients get through
//! for the penalty lifetime.

use crate::dos::{DosCheck, DosDetector};
use crate::firewall::{Filter, FilterResult, RequestInfo};
use async_trait::async_trait;
use std::sync::Arc;

pub struct DosFilter {
    detector: Arc<DosDetector>,
}

impl DosFilter {
    pub fn new(detector: Arc<DosDetector>) -> Self {
        Self { detector }
    }
}

#[async_trait]
impl Filter for DosFilter {
    fn name(&self) -> &'static str {
        "dos_detector"
    }

    async fn handle(&self, req: &RequestInfo) -> FilterResult {
        match self.detector.check(&req.hostname) {
            DosCheck::Calm => FilterResult::break_loop(),
            DosCheck::Suppressed | DosCheck::ThresholdCrossed { .. } => {
                FilterResult::pass_to_next()
            }
        }
    }
}
