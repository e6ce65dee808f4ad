use super::{
    CallSettings, ChannelOptions, DuplexFrame, DuplexStream, MessageStream, RequestStream, Stub,
    StubError, StubFactory,
};
use crate::{
    BoxError,
    auth::Credentials,
    config::PipelineConfig,
    grpc::client::GrpcClient,
    proto::{ProtoCache, ProtoLoadError},
};
use futures_util::StreamExt;
use http_body::Body as HttpBody;
use prost_reflect::{MethodDescriptor, ServiceDescriptor};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use tonic::{
    Code, Request, Status, Streaming,
    client::GrpcService,
    metadata::AsciiMetadataValue,
    service::{Interceptor, interceptor::InterceptedService},
    transport::{Channel, ClientTlsConfig, Endpoint},
};

/// Attaches the `authorization` header of [`Credentials::Ssl`] to every call.
#[derive(Debug, Clone, Default)]
pub struct AuthInterceptor {
    authorization: Option<AsciiMetadataValue>,
}

impl From<&Credentials> for AuthInterceptor {
    fn from(credentials: &Credentials) -> Self {
        match credentials {
            Credentials::Insecure => Self::default(),
            Credentials::Ssl { authorization } => Self {
                authorization: authorization.clone(),
            },
        }
    }
}

impl Interceptor for AuthInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        if let Some(value) = &self.authorization {
            request.metadata_mut().insert("authorization", value.clone());
        }
        Ok(request)
    }
}

/// A [`Stub`] backed by a dynamic gRPC client and the descriptor of its service.
#[derive(Debug, Clone)]
pub struct GrpcStub<S = InterceptedService<Channel, AuthInterceptor>> {
    client: GrpcClient<S>,
    service: ServiceDescriptor,
}

impl<S> GrpcStub<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S, descriptor: ServiceDescriptor, options: &ChannelOptions) -> Self {
        Self {
            client: GrpcClient::new(service, options),
            service: descriptor,
        }
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.service
    }

    /// Method names match case-insensitively, so `getOperation` finds `GetOperation`.
    fn method(&self, name: &str) -> Result<MethodDescriptor, StubError> {
        self.service
            .methods()
            .find(|m| m.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| StubError::MethodNotFound {
                service: self.service.full_name().to_owned(),
                method: name.to_owned(),
            })
    }
}

#[tonic::async_trait]
impl<S> Stub for GrpcStub<S>
where
    S: GrpcService<tonic::body::Body> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    async fn unary(
        &self,
        method: &str,
        request: Value,
        settings: &CallSettings,
    ) -> Result<Value, StubError> {
        let method = self.method(method)?;
        let mut client = self.client.clone();

        Ok(client.unary(method, request, settings).await??)
    }

    async fn server_streaming(
        &self,
        method: &str,
        request: Value,
        settings: &CallSettings,
    ) -> Result<MessageStream, StubError> {
        let method = self.method(method)?;
        let mut client = self.client.clone();

        let stream = client.server_streaming(method, request, settings).await??;
        Ok(stream.boxed())
    }

    async fn bidirectional_streaming(
        &self,
        method: &str,
        requests: RequestStream,
        settings: &CallSettings,
    ) -> Result<DuplexStream, StubError> {
        let method = self.method(method)?;
        let mut client = self.client.clone();

        let stream = client
            .bidirectional_streaming(method, requests, settings)
            .await??;
        Ok(duplex_frames(stream))
    }
}

/// Messages of `stream`, then its OK status carrying the trailers.
fn duplex_frames(stream: Streaming<Value>) -> DuplexStream {
    futures_util::stream::unfold(Some(stream), |state| async move {
        let mut stream = state?;
        match stream.message().await {
            Ok(Some(message)) => Some((Ok(DuplexFrame::Message(message)), Some(stream))),
            Ok(None) => {
                let mut trailers = stream.trailers().await.ok().flatten().unwrap_or_default();
                trailers.remove("grpc-status");
                trailers.remove("grpc-message");
                let status = Status::with_metadata(Code::Ok, "", trailers);
                Some((Ok(DuplexFrame::Status(status)), None))
            }
            Err(status) => Some((Err(status), None)),
        }
    })
    .boxed()
}

/// Builds [`GrpcStub`]s over lazily connected `tonic` channels.
///
/// Every service a pipeline may call must be registered with its descriptor first.
/// [`Credentials::Ssl`] dials TLS with the platform's native roots, while
/// [`Credentials::Insecure`] dials plaintext.
#[derive(Debug, Clone, Default)]
pub struct GrpcStubFactory {
    services: HashMap<String, ServiceDescriptor>,
}

impl GrpcStubFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, name: impl Into<String>, descriptor: ServiceDescriptor) -> Self {
        self.services.insert(name.into(), descriptor);
        self
    }

    /// Registers every entry of `config.proto_services`, loading descriptors through
    /// `protos`.
    pub fn from_config(
        config: &PipelineConfig,
        protos: &ProtoCache,
    ) -> Result<Self, ProtoLoadError> {
        config
            .proto_services
            .iter()
            .try_fold(Self::new(), |factory, (name, entry)| {
                let descriptor =
                    protos.service(&config.protos_dir, entry.path(), entry.package(), name)?;
                Ok(factory.with_service(name.clone(), descriptor))
            })
    }
}

impl StubFactory for GrpcStubFactory {
    fn create(
        &self,
        service: &str,
        base_url: &str,
        credentials: &Credentials,
        options: &ChannelOptions,
    ) -> Result<Arc<dyn Stub>, BoxError> {
        let descriptor = self.services.get(service).cloned().ok_or_else(|| -> BoxError {
            format!("Service '{service}' is not registered").into()
        })?;

        let mut endpoint = Endpoint::from_shared(base_url.to_owned())?;

        if let Some(user_agent) = &options.user_agent {
            endpoint = endpoint.user_agent(user_agent.clone())?;
        }

        if let Credentials::Ssl { .. } = credentials {
            endpoint = endpoint.tls_config(ClientTlsConfig::new().with_native_roots())?;
        }

        let channel = endpoint.connect_lazy();
        let service = InterceptedService::new(channel, AuthInterceptor::from(credentials));

        Ok(Arc::new(GrpcStub::new(service, descriptor, options)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interceptor_attaches_the_bearer_token() {
        let credentials = Credentials::Ssl {
            authorization: Some(AsciiMetadataValue::from_static("Bearer abc")),
        };
        let mut interceptor = AuthInterceptor::from(&credentials);

        let request = interceptor.call(Request::new(())).unwrap();

        assert_eq!(
            request.metadata().get("authorization").unwrap().to_str().unwrap(),
            "Bearer abc"
        );
    }

    #[test]
    fn insecure_interceptor_adds_nothing() {
        let mut interceptor = AuthInterceptor::from(&Credentials::Insecure);

        let request = interceptor.call(Request::new(())).unwrap();

        assert!(request.metadata().get("authorization").is_none());
    }

    #[tokio::test]
    async fn unregistered_services_are_rejected() {
        let factory = GrpcStubFactory::new();

        let result = factory.create(
            "Missing",
            "http://localhost:1",
            &Credentials::Insecure,
            &ChannelOptions::default(),
        );

        assert!(result.is_err());
    }
}
