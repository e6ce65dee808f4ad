//! # Resource Objects
//!
//! A [`ServiceObject`] is a thin CRUD-style wrapper around one remote resource. Which of its
//! methods are available, and which RPC each one issues, is described by a [`MethodTable`]
//! fixed at construction time; every method simply forwards to the [`CallPipeline`].
use crate::{
    error::CallError,
    pipeline::{CallOptions, CallPipeline},
};
use parking_lot::RwLock;
use serde_json::Value;
use std::time::Duration;

/// How a resource method is issued.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodSpec {
    /// Available, derived from another method (e.g. `exists` through `get_metadata`).
    Enabled,
    /// Issued as its own RPC with a fixed base request.
    Detailed { proto: ProtoOpts, request: Value },
}

impl MethodSpec {
    pub fn detailed(service: &str, method: &str, request: Value) -> Self {
        MethodSpec::Detailed {
            proto: ProtoOpts::new(service, method),
            request,
        }
    }
}

/// Routing of a resource method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoOpts {
    pub service: String,
    pub method: String,
    pub timeout: Option<Duration>,
}

impl ProtoOpts {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            timeout: None,
        }
    }

    fn call_options(&self) -> CallOptions {
        let options = CallOptions::new(&self.service, &self.method);
        match self.timeout {
            Some(timeout) => options.timeout(timeout),
            None => options,
        }
    }
}

/// The methods a [`ServiceObject`] supports. `None` means unavailable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodTable {
    pub delete: Option<MethodSpec>,
    pub exists: Option<MethodSpec>,
    pub get_metadata: Option<MethodSpec>,
    pub set_metadata: Option<MethodSpec>,
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Method '{0}' is not available on this resource")]
    Unavailable(&'static str),
    #[error("Method '{0}' must be configured with a request")]
    NotDetailed(&'static str),
}

pub struct ServiceObject {
    pipeline: CallPipeline,
    id: String,
    methods: MethodTable,
    metadata: RwLock<Option<Value>>,
}

impl ServiceObject {
    pub fn new(pipeline: CallPipeline, id: impl Into<String>, methods: MethodTable) -> Self {
        Self {
            pipeline,
            id: id.into(),
            methods,
            metadata: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pipeline(&self) -> &CallPipeline {
        &self.pipeline
    }

    /// The last metadata snapshot fetched or set.
    pub fn metadata(&self) -> Option<Value> {
        self.metadata.read().clone()
    }

    pub async fn delete(&self) -> Result<Value, CallError> {
        let (proto, request) = detailed("delete", self.methods.delete.as_ref())?;
        self.pipeline
            .call(proto.call_options(), request.clone())
            .await
    }

    /// Fetches the resource and caches the response as the metadata snapshot.
    pub async fn get_metadata(&self) -> Result<Value, CallError> {
        let (proto, request) = detailed("get_metadata", self.methods.get_metadata.as_ref())?;
        let metadata = self
            .pipeline
            .call(proto.call_options(), request.clone())
            .await?;

        *self.metadata.write() = Some(metadata.clone());
        Ok(metadata)
    }

    /// Deep-merges `metadata` into the configured request and issues it. The response
    /// becomes the metadata snapshot.
    pub async fn set_metadata(&self, metadata: Value) -> Result<Value, CallError> {
        let (proto, request) = detailed("set_metadata", self.methods.set_metadata.as_ref())?;

        let mut request = request.clone();
        deep_merge(&mut request, metadata);

        let response = self.pipeline.call(proto.call_options(), request).await?;

        *self.metadata.write() = Some(response.clone());
        Ok(response)
    }

    /// Whether the resource exists: a 404 means `false`, any other failure is an error.
    pub async fn exists(&self) -> Result<bool, CallError> {
        let outcome = match &self.methods.exists {
            None => return Err(ResourceError::Unavailable("exists").into()),
            Some(MethodSpec::Enabled) => self.get_metadata().await,
            Some(MethodSpec::Detailed { proto, request }) => {
                self.pipeline
                    .call(proto.call_options(), request.clone())
                    .await
            }
        };

        match outcome {
            Ok(_) => Ok(true),
            Err(error) if error.http_code() == Some(404) => Ok(false),
            Err(error) => Err(error),
        }
    }
}

fn detailed<'a>(
    name: &'static str,
    spec: Option<&'a MethodSpec>,
) -> Result<(&'a ProtoOpts, &'a Value), ResourceError> {
    match spec {
        None => Err(ResourceError::Unavailable(name)),
        Some(MethodSpec::Enabled) => Err(ResourceError::NotDetailed(name)),
        Some(MethodSpec::Detailed { proto, request }) => Ok((proto, request)),
    }
}

/// Recursively merges `source` into `target`: objects merge key by key, anything else in
/// `source` replaces what `target` had.
pub fn deep_merge(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, source) => *target = source,
    }
}
