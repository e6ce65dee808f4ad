//! # Generic gRPC Client
//!
//! This module wraps a standard `tonic` client to provide a generic interface for
//! gRPC communication. It is agnostic to the specific Protobuf messages being exchanged.
//!
//! ## How it works
//!
//! The [`GrpcClient`] utilizes the [`super::codec::DynamicCodec`] to handle serialization.
//! It only needs the `MethodDescriptor` of the call and a `serde_json::Value` payload; the
//! codec validates and transcodes the payload on the way out and back.
//!
//! ## Features
//!
//! * **Dynamic Pathing**: Constructs the HTTP/2 path (e.g., `/package.Service/Method`) at runtime.
//! * **Call Settings**: Attaches the per-call metadata and converts an absolute deadline into
//!   the `grpc-timeout` the transport understands.
//! * **Message Limits**: Applies the channel's send/receive message size limits.
//! * **Access Patterns**: Unary, Server Streaming and Bidirectional Streaming calls.
use super::codec::DynamicCodec;
use crate::{
    BoxError, deadline,
    stub::{CallSettings, ChannelOptions},
};
use futures_util::Stream;
use http_body::Body as HttpBody;
use prost_reflect::MethodDescriptor;
use serde_json::Value;
use std::str::FromStr;
use tonic::{
    Status, Streaming,
    client::GrpcService,
    metadata::{
        MetadataKey, MetadataValue,
        errors::{InvalidMetadataKey, InvalidMetadataValue},
    },
    transport::Channel,
};

#[derive(thiserror::Error, Debug)]
pub enum GrpcRequestError {
    #[error("Internal error, the client was not ready: '{0}'")]
    ClientNotReady(#[source] BoxError),
    #[error("Invalid metadata (header) key '{key}': '{source}'")]
    InvalidMetadataKey {
        key: String,
        source: InvalidMetadataKey,
    },
    #[error("Invalid metadata (header) value for key '{key}': '{source}'")]
    InvalidMetadataValue {
        key: String,
        source: InvalidMetadataValue,
    },
    #[error("Method '{0}' does not form a valid request path")]
    InvalidPath(String),
}

/// A dynamic gRPC client over any tonic service (a `Channel`, an intercepted channel or,
/// in tests, a generated server).
#[derive(Debug, Clone)]
pub struct GrpcClient<S = Channel> {
    client: tonic::client::Grpc<S>,
}

impl<S> GrpcClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S, options: &ChannelOptions) -> Self {
        let client = tonic::client::Grpc::new(service)
            .max_encoding_message_size(options.max_send_message_size.unwrap_or(usize::MAX))
            .max_decoding_message_size(options.max_receive_message_size.unwrap_or(usize::MAX));

        Self { client }
    }

    /// Performs a Unary gRPC call (Single Request -> Single Response).
    ///
    /// # Returns
    /// * `Ok(Ok(Value))` - Successful RPC execution.
    /// * `Ok(Err(Status))` - RPC executed, but server returned an error.
    /// * `Err(GrpcRequestError)` - Failed to build or send the request.
    pub async fn unary(
        &mut self,
        method: MethodDescriptor,
        payload: Value,
        settings: &CallSettings,
    ) -> Result<Result<Value, Status>, GrpcRequestError> {
        self.ready().await?;

        let path = http_path(&method)?;
        let request = build_request(payload, settings)?;
        let codec = DynamicCodec::new(method);

        match self.client.unary(request, path, codec).await {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    /// Performs a Server Streaming gRPC call (Single Request -> Stream of Responses).
    ///
    /// The outer future resolves once the server has answered with its response headers,
    /// which is the acknowledgment that the stream has started.
    pub async fn server_streaming(
        &mut self,
        method: MethodDescriptor,
        payload: Value,
        settings: &CallSettings,
    ) -> Result<Result<Streaming<Value>, Status>, GrpcRequestError> {
        self.ready().await?;

        let path = http_path(&method)?;
        let request = build_request(payload, settings)?;
        let codec = DynamicCodec::new(method);

        match self.client.server_streaming(request, path, codec).await {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    /// Performs a Bidirectional Streaming gRPC call (Stream of Requests -> Stream of Responses).
    pub async fn bidirectional_streaming(
        &mut self,
        method: MethodDescriptor,
        payload_stream: impl Stream<Item = Value> + Send + 'static,
        settings: &CallSettings,
    ) -> Result<Result<Streaming<Value>, Status>, GrpcRequestError> {
        self.ready().await?;

        let path = http_path(&method)?;
        let request = build_request(payload_stream, settings)?;
        let codec = DynamicCodec::new(method);

        match self.client.streaming(request, path, codec).await {
            Ok(response) => Ok(Ok(response.into_inner())),
            Err(status) => Ok(Err(status)),
        }
    }

    async fn ready(&mut self) -> Result<(), GrpcRequestError> {
        self.client
            .ready()
            .await
            .map_err(|e| GrpcRequestError::ClientNotReady(e.into()))
    }
}

fn http_path(method: &MethodDescriptor) -> Result<http::uri::PathAndQuery, GrpcRequestError> {
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    http::uri::PathAndQuery::from_str(&path).map_err(|_| GrpcRequestError::InvalidPath(path))
}

fn build_request<T>(
    payload: T,
    settings: &CallSettings,
) -> Result<tonic::Request<T>, GrpcRequestError> {
    let mut request = tonic::Request::new(payload);

    for (k, v) in &settings.metadata {
        let key =
            MetadataKey::from_str(k).map_err(|source| GrpcRequestError::InvalidMetadataKey {
                key: k.clone(),
                source,
            })?;
        let val = MetadataValue::from_str(v).map_err(|source| {
            GrpcRequestError::InvalidMetadataValue {
                key: k.clone(),
                source,
            }
        })?;
        // `append` keeps repeated keys, metadata pairs are not a map.
        request.metadata_mut().append(key, val);
    }

    if let Some(deadline) = settings.deadline {
        request.set_timeout(deadline::remaining(deadline));
    }

    Ok(request)
}
