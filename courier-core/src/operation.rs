//! # Long-running Operations
//!
//! An [`OperationHandle`] tracks one server-side long-running operation through the
//! `Operations` service. Polling is a single-step state machine: every [`Operation::poll`]
//! fetches the operation once and reports one of three outcomes, leaving the polling
//! cadence to the caller.
//!
//! ```rust,no_run
//! use courier_core::operation::{Operation, OperationHandle};
//! # use courier_core::pipeline::CallPipeline;
//! # use std::time::Duration;
//!
//! # async fn run(pipeline: CallPipeline) -> Result<(), courier_core::error::CallError> {
//! let operation = OperationHandle::new(pipeline, "operations/123");
//!
//! let result = loop {
//!     match operation.poll().await? {
//!         Some(done) => break done,
//!         None => tokio::time::sleep(Duration::from_secs(1)).await,
//!     }
//! };
//! # Ok(())
//! # }
//! ```
use crate::{
    error::CallError,
    pipeline::{CallOptions, CallPipeline},
    resource::{MethodSpec, MethodTable, ServiceObject},
};
use serde_json::{Value, json};

/// Logical name of the long-running operations service.
pub const OPERATIONS_SERVICE: &str = "Operations";

/// Capability of anything backed by a long-running operation.
#[tonic::async_trait]
pub trait Operation: Send + Sync {
    /// Fetches the operation once.
    ///
    /// # Returns
    ///
    /// * `Ok(None)` - Still running, poll again later.
    /// * `Ok(Some(metadata))` - Done; the full operation payload.
    /// * `Err(_)` - The fetch failed, or the operation reported an error (decorated when
    ///   its status is recognized).
    async fn poll(&self) -> Result<Option<Value>, CallError>;

    /// Asks the server to cancel the operation.
    async fn cancel(&self) -> Result<Value, CallError>;
}

/// A handle on a named operation. Its only mutable state is the last fetched metadata.
pub struct OperationHandle {
    object: ServiceObject,
}

impl OperationHandle {
    pub fn new(pipeline: CallPipeline, name: impl Into<String>) -> Self {
        let name = name.into();
        let request = json!({ "name": name });

        let methods = MethodTable {
            delete: Some(MethodSpec::detailed(
                OPERATIONS_SERVICE,
                "deleteOperation",
                request.clone(),
            )),
            exists: Some(MethodSpec::Enabled),
            get_metadata: Some(MethodSpec::detailed(
                OPERATIONS_SERVICE,
                "getOperation",
                request,
            )),
            set_metadata: None,
        };

        Self {
            object: ServiceObject::new(pipeline, name, methods),
        }
    }

    /// The operation name.
    pub fn id(&self) -> &str {
        self.object.id()
    }

    /// The metadata of the last successful fetch.
    pub fn metadata(&self) -> Option<Value> {
        self.object.metadata()
    }

    pub async fn get_metadata(&self) -> Result<Value, CallError> {
        self.object.get_metadata().await
    }

    pub async fn delete(&self) -> Result<Value, CallError> {
        self.object.delete().await
    }

    pub async fn exists(&self) -> Result<bool, CallError> {
        self.object.exists().await
    }
}

#[tonic::async_trait]
impl Operation for OperationHandle {
    async fn poll(&self) -> Result<Option<Value>, CallError> {
        let metadata = self.object.get_metadata().await?;
        poll_outcome(metadata)
    }

    async fn cancel(&self) -> Result<Value, CallError> {
        let options = CallOptions::new(OPERATIONS_SERVICE, "cancelOperation");
        self.object
            .pipeline()
            .call(options, json!({ "name": self.id() }))
            .await
    }
}

/// Classifies a fetched operation payload.
pub fn poll_outcome(metadata: Value) -> Result<Option<Value>, CallError> {
    if let Some(error) = metadata.get("error").filter(|e| !e.is_null()) {
        return Err(CallError::from_error_object(error.clone()));
    }

    match metadata.get("done").and_then(Value::as_bool) {
        Some(true) => Ok(Some(metadata)),
        _ => Ok(None),
    }
}
