//! Caller-visible errors of the call pipeline.
use crate::{
    auth::CredentialsError,
    request::PrepareError,
    resource::ResourceError,
    status::{DecoratedStatus, StatusLike, decorate_status},
    stub::{StubCreateError, StubError},
};

/// Everything a call through the pipeline can fail with.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("Failed to resolve credentials: '{0}'")]
    Credentials(#[from] CredentialsError),

    #[error("Invalid request: '{0}'")]
    Prepare(#[from] PrepareError),

    #[error(transparent)]
    Stub(#[from] StubCreateError),

    /// A recognized status, translated to HTTP terms.
    #[error(transparent)]
    Rpc(DecoratedStatus),

    /// A transport error without a recognized status code, passed through as is.
    #[error("Transport error: '{0}'")]
    Transport(StubError),

    /// An operation reported an error object that carries no recognized status code.
    #[error("Operation failed: {0}")]
    Operation(serde_json::Value),

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl CallError {
    /// Decorates a transport error, falling back to the raw error when its status is not
    /// recognized.
    pub fn from_stub(error: StubError) -> Self {
        match error.decorate() {
            Some(decorated) => CallError::Rpc(decorated),
            None => CallError::Transport(error),
        }
    }

    /// Decorates an error object reported by the server (e.g. an operation's `error`
    /// field), falling back to the raw object.
    pub fn from_error_object(error: serde_json::Value) -> Self {
        match StatusLike::from_json(&error).as_ref().and_then(decorate_status) {
            Some(decorated) => CallError::Rpc(decorated),
            None => CallError::Operation(error),
        }
    }

    /// The decorated status, when this error carries one.
    pub fn status(&self) -> Option<&DecoratedStatus> {
        match self {
            CallError::Rpc(status) => Some(status),
            _ => None,
        }
    }

    /// HTTP-space code of a decorated error.
    pub fn http_code(&self) -> Option<u16> {
        self.status().map(|status| status.code)
    }
}

impl From<tonic::Status> for CallError {
    fn from(status: tonic::Status) -> Self {
        CallError::from_stub(StubError::Status(status))
    }
}
