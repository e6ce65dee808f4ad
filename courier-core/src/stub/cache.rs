use super::{ChannelOptions, Stub, StubFactory};
use crate::{BoxError, auth::Credentials};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
#[error("Failed to create a stub for service '{service}': '{source}'")]
pub struct StubCreateError {
    pub service: String,
    #[source]
    pub source: BoxError,
}

/// Memoizes stubs by service name.
///
/// The first request for a service builds the stub with the service's base URL (its
/// override when registered, the default otherwise); every later request returns that same
/// stub, whatever credentials it is called with. Construction happens under the cache lock,
/// so concurrent first requests still build a single stub.
pub struct StubCache {
    factory: Arc<dyn StubFactory>,
    default_base_url: String,
    base_urls: HashMap<String, String>,
    options: ChannelOptions,
    active: Mutex<HashMap<String, Arc<dyn Stub>>>,
}

impl StubCache {
    pub fn new(
        factory: Arc<dyn StubFactory>,
        default_base_url: impl Into<String>,
        options: ChannelOptions,
    ) -> Self {
        Self {
            factory,
            default_base_url: default_base_url.into(),
            base_urls: HashMap::new(),
            options,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Registers per-service base URL overrides.
    pub fn with_base_urls(mut self, base_urls: HashMap<String, String>) -> Self {
        self.base_urls = base_urls;
        self
    }

    /// The base URL stubs for `service` are dialed with.
    pub fn base_url(&self, service: &str) -> &str {
        self.base_urls
            .get(service)
            .map(String::as_str)
            .unwrap_or(&self.default_base_url)
    }

    pub async fn get_stub(
        &self,
        service: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Stub>, StubCreateError> {
        let mut active = self.active.lock().await;

        if let Some(stub) = active.get(service) {
            return Ok(stub.clone());
        }

        let base_url = self.base_url(service);
        tracing::debug!(service, base_url, "creating stub");

        let stub = self
            .factory
            .create(service, base_url, credentials, &self.options)
            .map_err(|source| StubCreateError {
                service: service.to_owned(),
                source,
            })?;

        active.insert(service.to_owned(), stub.clone());
        Ok(stub)
    }

    /// Number of stubs built so far.
    pub async fn len(&self) -> usize {
        self.active.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
