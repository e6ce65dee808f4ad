//! # Stubs
//!
//! A stub is a per-service client able to issue the three call shapes the pipeline
//! supports: unary, server streaming and bidirectional streaming. Stubs are created by a
//! [`StubFactory`] from the service name, the resolved base URL, the call credentials and a
//! fixed set of [`ChannelOptions`], and are memoized by the [`StubCache`].
//!
//! The production factory is [`GrpcStubFactory`], which dials a lazily connected `tonic`
//! channel and transcodes JSON payloads against descriptors loaded from `.proto`
//! descriptor sets. Tests substitute their own factory.
mod cache;
mod grpc;

pub use cache::*;
pub use grpc::*;

use crate::{BoxError, auth::Credentials, grpc::client::GrpcRequestError, status};
use futures_util::stream::BoxStream;
use serde_json::Value;
use std::{sync::Arc, time::Duration};

/// Stream of response messages, terminated by the call's final status.
pub type MessageStream = BoxStream<'static, Result<Value, tonic::Status>>;

/// Outgoing half of a bidirectional call.
pub type RequestStream = BoxStream<'static, Value>;

/// Incoming half of a bidirectional call.
pub type DuplexStream = BoxStream<'static, Result<DuplexFrame, tonic::Status>>;

/// What the incoming half of a bidirectional call carries.
#[derive(Debug)]
pub enum DuplexFrame {
    Message(Value),
    /// The final OK status and its trailing metadata. Always the last frame when present.
    Status(tonic::Status),
}

/// Transport channel options handed to every stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    /// `None` means unlimited.
    pub max_send_message_size: Option<usize>,
    /// `None` means unlimited.
    pub max_receive_message_size: Option<usize>,
    pub initial_reconnect_backoff: Duration,
    pub user_agent: Option<String>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            max_send_message_size: None,
            max_receive_message_size: None,
            initial_reconnect_backoff: Duration::from_millis(5000),
            user_agent: None,
        }
    }
}

/// Per-call settings forwarded to the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSettings {
    /// Absolute deadline of the call.
    pub deadline: Option<tokio::time::Instant>,
    /// Metadata (headers) attached to the call.
    pub metadata: Vec<(String, String)>,
}

#[derive(Debug, thiserror::Error)]
pub enum StubError {
    #[error("RPC failed with status: '{0}'")]
    Status(#[from] tonic::Status),
    #[error("Method '{method}' not found on service '{service}'")]
    MethodNotFound { service: String, method: String },
    #[error("gRPC client request error: '{0}'")]
    Request(#[from] GrpcRequestError),
    #[error(transparent)]
    Other(BoxError),
}

impl StubError {
    /// HTTP decoration of the error, available only for recognized RPC statuses.
    pub fn decorate(&self) -> Option<status::DecoratedStatus> {
        match self {
            StubError::Status(s) => status::decorate_status(&status::StatusLike::from(s)),
            _ => None,
        }
    }
}

/// A per-service client.
#[tonic::async_trait]
pub trait Stub: Send + Sync {
    async fn unary(
        &self,
        method: &str,
        request: Value,
        settings: &CallSettings,
    ) -> Result<Value, StubError>;

    /// Resolves once the server has acknowledged the call.
    async fn server_streaming(
        &self,
        method: &str,
        request: Value,
        settings: &CallSettings,
    ) -> Result<MessageStream, StubError>;

    /// Resolves once the server has acknowledged the call. `requests` is drained as the
    /// server reads it; its end half-closes the call, while dropping the returned stream
    /// before then cancels it.
    async fn bidirectional_streaming(
        &self,
        method: &str,
        requests: RequestStream,
        settings: &CallSettings,
    ) -> Result<DuplexStream, StubError>;
}

/// Constructs stubs. Called at most once per service name by a [`StubCache`].
pub trait StubFactory: Send + Sync {
    fn create(
        &self,
        service: &str,
        base_url: &str,
        credentials: &Credentials,
        options: &ChannelOptions,
    ) -> Result<Arc<dyn Stub>, BoxError>;
}
