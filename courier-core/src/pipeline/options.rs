use crate::retry::RetryOverrides;
use std::time::Duration;

/// Routing and tuning of a single call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Logical service name, the key of the stub cache.
    pub service: String,
    /// Method name, matched case-insensitively by gRPC stubs.
    pub method: String,
    /// Relative timeout; turned into an absolute deadline when the call is prepared.
    pub timeout: Option<Duration>,
    pub retry: Option<RetryOverrides>,
}

impl CallOptions {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            ..Self::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, overrides: RetryOverrides) -> Self {
        self.retry = Some(overrides);
        self
    }
}
