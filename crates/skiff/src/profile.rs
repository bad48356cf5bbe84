//! Web profile: the browsing-engine side of request interception.
//!
//! The engine asks the profile about every request; the profile forwards to
//! whichever interceptor the composition root injected.

use skiff_adblock::{InterceptDecision, RequestInfo, UrlRequestInterceptor};
use std::sync::Arc;
use tracing::trace;

pub struct WebProfile {
    name: String,
    interceptor: Arc<dyn UrlRequestInterceptor>,
}

impl WebProfile {
    pub fn new(name: impl Into<String>, interceptor: Arc<dyn UrlRequestInterceptor>) -> Self {
        Self {
            name: name.into(),
            interceptor,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Called for every outgoing request before it is sent
    pub fn handle_request(&self, info: &RequestInfo) -> InterceptDecision {
        let decision = self.interceptor.intercept_request(info);
        trace!("[{}] {} -> {:?}", self.name, info.request_url, decision);
        decision
    }
}
