//! # Call Pipeline
//!
//! The [`CallPipeline`] is the entry point for every remote call. A call goes through the
//! same stages whatever its shape:
//!
//! 1. **Sandbox check**: in [`TransportMode::Sandboxed`] the call short-circuits with a
//!    fixed sentinel before anything else happens.
//! 2. **Credentials**: resolved once per pipeline and shared by concurrent callers
//!    ([`CredentialProvider`]).
//! 3. **Stub**: the per-service stub comes from the [`StubCache`].
//! 4. **Deadline**: a relative timeout becomes an absolute deadline.
//! 5. **Sanitization**: internal flags are stripped and the project id placeholder is
//!    substituted ([`crate::request`]).
//! 6. **Dispatch**: unary calls and server streams run through the [`RetryExecutor`];
//!    duplex calls are never retried.
//!
//! Every error a caller sees is decorated into HTTP terms when its status is recognized
//! ([`crate::status`]) and passed through raw otherwise.
//!
//! ```rust,no_run
//! use courier_core::{
//!     auth::{AuthClient, AuthSession},
//!     config::PipelineConfig,
//!     pipeline::{CallOptions, CallPipeline},
//!     proto::ProtoCache,
//!     BoxError,
//! };
//! use std::sync::Arc;
//!
//! struct StaticToken;
//!
//! #[tonic::async_trait]
//! impl AuthClient for StaticToken {
//!     async fn get_auth_client(&self) -> Result<AuthSession, BoxError> {
//!         Ok(AuthSession { access_token: Some("token".into()), project_id: Some("p".into()) })
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::load("courier.json")?;
//! let pipeline = CallPipeline::connect(&config, Arc::new(StaticToken), &ProtoCache::default())?;
//!
//! let topic = pipeline
//!     .call(
//!         CallOptions::new("Publisher", "getTopic"),
//!         serde_json::json!({ "topic": "projects/{{projectId}}/topics/t" }),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```
mod duplex;
mod options;
mod stream;

pub use duplex::*;
pub use options::*;
pub use stream::*;

use crate::{
    auth::{AuthClient, CredentialProvider},
    config::{PipelineConfig, TransportMode},
    deadline,
    error::CallError,
    proto::{ProtoCache, ProtoLoadError},
    request::{self, PrepareError},
    retry::{RetryExecutor, RetryPolicy},
    stub::{CallSettings, GrpcStubFactory, Stub, StubCache, StubFactory},
};
use serde_json::Value;
use std::sync::Arc;

/// Authenticated, retrying front of a set of per-service stubs.
///
/// Cloning is cheap: clones share credentials and stubs, and each carries its own default
/// retry policy.
#[derive(Clone)]
pub struct CallPipeline {
    inner: Arc<PipelineInner>,
    retry: RetryPolicy,
}

pub(crate) struct PipelineInner {
    mode: TransportMode,
    credentials: CredentialProvider,
    stubs: StubCache,
    metadata: Vec<(String, String)>,
}

/// What a live call needs once credentials and the stub are resolved.
pub(crate) struct Prepared {
    pub(crate) stub: Arc<dyn Stub>,
    pub(crate) settings: CallSettings,
}

impl CallPipeline {
    /// Builds a pipeline over an arbitrary stub factory.
    pub fn new(
        config: &PipelineConfig,
        auth: Arc<dyn AuthClient>,
        factory: Arc<dyn StubFactory>,
    ) -> Self {
        let credentials = if config.custom_endpoint {
            CredentialProvider::insecure(config.project_id.clone())
        } else {
            CredentialProvider::new(auth, config.project_id.clone())
        };

        let stubs = StubCache::new(factory, config.base_url.clone(), config.channel_options())
            .with_base_urls(config.base_url_overrides());

        Self {
            inner: Arc::new(PipelineInner {
                mode: config.mode(),
                credentials,
                stubs,
                metadata: config.request_metadata(),
            }),
            retry: RetryPolicy::new(config.max_retries),
        }
    }

    /// Builds a pipeline over gRPC stubs for every service in `config.proto_services`.
    pub fn connect(
        config: &PipelineConfig,
        auth: Arc<dyn AuthClient>,
        protos: &ProtoCache,
    ) -> Result<Self, ProtoLoadError> {
        let factory = GrpcStubFactory::from_config(config, protos)?;
        Ok(Self::new(config, auth, Arc::new(factory)))
    }

    /// Replaces the default retry policy of calls made through this handle.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn mode(&self) -> TransportMode {
        self.inner.mode
    }

    /// The effective project id, see [`CredentialProvider::project_id`].
    pub fn project_id(&self) -> Option<String> {
        self.inner.credentials.project_id()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Issues a unary call.
    ///
    /// Resolves with the response, or with the last (decorated) failure once the retry
    /// policy gives up. In sandbox mode resolves with `Value::Null` immediately.
    pub async fn call(&self, options: CallOptions, request: Value) -> Result<Value, CallError> {
        if self.inner.mode == TransportMode::Sandboxed {
            tracing::debug!(
                service = %options.service,
                method = %options.method,
                "sandboxed call"
            );
            return Ok(Value::Null);
        }

        let prepared = self.inner.prepare(&options).await?;
        let request = self.inner.sanitize(request)?;

        let stub = &prepared.stub;
        let settings = &prepared.settings;
        let method = options.method.as_str();
        let request = &request;

        let mut executor = RetryExecutor::new(self.call_policy(&options));
        executor
            .run(move |attempt| async move {
                tracing::debug!(method, attempt, "unary attempt");
                stub.unary(method, request.clone(), settings).await
            })
            .await
    }

    /// Opens a server stream; see [`ResponseStream`] for the event sequence.
    pub fn call_stream(&self, options: CallOptions, request: Value) -> ResponseStream {
        if self.inner.mode == TransportMode::Sandboxed {
            tracing::debug!(
                service = %options.service,
                method = %options.method,
                "sandboxed stream"
            );
            return ResponseStream::closed();
        }

        let policy = self.call_policy(&options);
        ResponseStream::spawn(self.inner.clone(), policy, options, request)
    }

    /// Opens a bidirectional stream; see [`DuplexCall`].
    pub fn call_duplex(&self, options: CallOptions) -> DuplexCall {
        if self.inner.mode == TransportMode::Sandboxed {
            tracing::debug!(
                service = %options.service,
                method = %options.method,
                "sandboxed duplex"
            );
            return DuplexCall::closed();
        }

        DuplexCall::spawn(self.inner.clone(), options)
    }

    fn call_policy(&self, options: &CallOptions) -> RetryPolicy {
        match &options.retry {
            Some(overrides) => self.retry.merged(overrides),
            None => self.retry.clone(),
        }
    }
}

impl PipelineInner {
    /// Resolves credentials and the stub, and computes the call settings.
    pub(crate) async fn prepare(&self, options: &CallOptions) -> Result<Prepared, CallError> {
        let credentials = self.credentials.get_credentials().await?;
        let stub = self.stubs.get_stub(&options.service, &credentials).await?;

        let settings = CallSettings {
            deadline: options.timeout.and_then(deadline::compute_deadline),
            metadata: self.metadata.clone(),
        };

        Ok(Prepared { stub, settings })
    }

    pub(crate) fn sanitize(&self, request: Value) -> Result<Value, PrepareError> {
        request::sanitize_request(request, self.credentials.project_id().as_deref())
    }
}
