use courier_core::{
    BoxError, CallError, CallOptions, CallPipeline,
    auth::Credentials,
    config::{ClientInfo, PipelineConfig},
    pipeline::{DuplexEvent, StreamEvent},
    proto::{EmbeddedDescriptorLoader, ProtoCache},
    retry::{Backoff, RetryPolicy},
    status::DecoratedStatus,
    struct_value::{
        self, EncodeOptions, ObjectRef, Struct, Value as ObjectValue, object_to_struct,
        struct_to_object,
    },
    stub::{ChannelOptions, GrpcStub, Stub, StubError, StubFactory},
};
use echo_service::{EchoServiceServer, FILE_DESCRIPTOR_SET, SERVICE_NAME};
use echo_service_impl::EchoServiceImpl;
use fake_transport::FakeAuth;
use futures_util::StreamExt;
use serde_json::json;
use std::{path::Path, sync::Arc, sync::atomic::Ordering};


/// Serves every service name with an in-process echo server.
struct EchoFactory {
    server: EchoServiceServer<EchoServiceImpl>,
    protos: ProtoCache,
}

impl StubFactory for EchoFactory {
    fn create(
        &self,
        _service: &str,
        _base_url: &str,
        _credentials: &Credentials,
        options: &ChannelOptions,
    ) -> Result<Arc<dyn Stub>, BoxError> {
        let descriptor =
            self.protos
                .service(Path::new("protos"), Path::new("echo.proto"), None, SERVICE_NAME)?;
        Ok(Arc::new(GrpcStub::new(self.server.clone(), descriptor, options)))
    }
}

fn setup_pipeline(config: PipelineConfig) -> (CallPipeline, EchoServiceImpl) {
    let service = EchoServiceImpl::default();
    let loader = EmbeddedDescriptorLoader::new(FILE_DESCRIPTOR_SET)
        .expect("Failed to load file descriptor set");
    let factory = EchoFactory {
        server: EchoServiceServer::new(service.clone()),
        protos: ProtoCache::new(Arc::new(loader)),
    };

    let max_retries = config.max_retries;
    let auth = Arc::new(FakeAuth::new(Some("p")));
    let pipeline = CallPipeline::new(&config, auth, Arc::new(factory))
        .with_retry_policy(RetryPolicy::new(max_retries).with_backoff(Backoff::none()));

    (pipeline, service)
}

fn echo_config() -> PipelineConfig {
    PipelineConfig {
        base_url: "http://localhost:50051".to_owned(),
        max_retries: 3,
        ..PipelineConfig::default()
    }
}

fn options(method: &str) -> CallOptions {
    CallOptions::new("Echo", method)
}

#[tokio::test]
async fn test_unary_echo_with_case_insensitive_method() {
    let (pipeline, _) = setup_pipeline(echo_config());

    let response = pipeline
        .call(options("unaryEcho"), json!({ "message": "hello" }))
        .await
        .unwrap();

    assert_eq!(response["message"], "hello");
}

#[tokio::test]
async fn test_struct_attributes_survive_the_wire() {
    let (pipeline, _) = setup_pipeline(echo_config());

    let nested = ObjectRef::new();
    nested.insert("enabled", true);
    nested.insert("payload", vec![1u8, 2, 3]);

    let attributes = ObjectRef::new();
    attributes.insert("count", 3);
    attributes.insert("name", "courier");
    attributes.insert("nothing", ObjectValue::Null);
    attributes.insert("skipped", ObjectValue::Undefined);
    attributes.insert("nested", nested);
    attributes.insert("myself", attributes.clone());

    let options_with_placeholder = EncodeOptions {
        remove_circular: true,
        ..EncodeOptions::default()
    };
    let encoded = object_to_struct(&attributes, options_with_placeholder).unwrap();

    let response = pipeline
        .call(
            options("UnaryEcho"),
            json!({ "message": "attrs", "attributes": encoded.to_proto_json() }),
        )
        .await
        .unwrap();

    let echoed = struct_to_object(&Struct::from_proto_json(&response["attributes"]));

    assert_eq!(echoed.get("count"), Some(ObjectValue::Number(3.0)));
    assert_eq!(echoed.get("name"), Some(ObjectValue::from("courier")));
    assert_eq!(echoed.get("nothing"), Some(ObjectValue::Null));
    assert_eq!(echoed.get("skipped"), None);
    assert_eq!(
        echoed.get("myself"),
        Some(ObjectValue::from(struct_value::CIRCULAR_PLACEHOLDER))
    );

    let Some(ObjectValue::Object(nested)) = echoed.get("nested") else {
        panic!("Expected a nested object");
    };
    assert_eq!(nested.get("enabled"), Some(ObjectValue::Bool(true)));
    // Blobs travel as base64 strings.
    assert_eq!(nested.get("payload"), Some(ObjectValue::from("AQID")));
}

#[tokio::test]
async fn test_pipeline_metadata_reaches_the_server() {
    let config = PipelineConfig {
        client_info: Some(ClientInfo {
            name: "echo".to_owned(),
            version: "0.0.1".to_owned(),
        }),
        metadata: [("x-request-tag".to_owned(), "blue".to_owned())].into(),
        ..echo_config()
    };
    let (pipeline, _) = setup_pipeline(config);

    let response = pipeline
        .call(options("UnaryEcho"), json!({ "message": "headers" }))
        .await
        .unwrap();

    assert!(
        response["attributes"]["x-goog-api-client"]
            .as_str()
            .unwrap()
            .contains("gccl/0.0.1")
    );
    assert_eq!(response["attributes"]["x-request-tag"], "blue");
}

#[tokio::test]
async fn test_server_statuses_are_decorated() {
    let (pipeline, service) = setup_pipeline(echo_config());

    let err = pipeline
        .call(options("UnaryEcho"), json!({ "message": "fail:5" }))
        .await
        .unwrap_err();

    let status = err.status().unwrap();
    assert_eq!(status.code, 404);
    assert_eq!(status.message, "failed with 5");
    assert_eq!(status.rpc_code, 5);
    // Not found is not worth a retry.
    assert_eq!(service.unary_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unavailable_servers_are_retried() {
    let (pipeline, service) = setup_pipeline(echo_config());

    let response = pipeline
        .call(options("UnaryEcho"), json!({ "message": "flaky:2" }))
        .await
        .unwrap();

    assert_eq!(response["message"], "flaky:2");
    assert_eq!(service.unary_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unknown_methods_are_transport_errors() {
    let (pipeline, _) = setup_pipeline(echo_config());

    let err = pipeline
        .call(options("Shout"), json!({ "message": "hello" }))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CallError::Transport(StubError::MethodNotFound { ref method, .. }) if method == "Shout"
    ));
}

#[tokio::test]
async fn test_server_streaming_echo() {
    let (pipeline, _) = setup_pipeline(echo_config());

    let events: Vec<StreamEvent> = pipeline
        .call_stream(options("serverStreamingEcho"), json!({ "message": "hello" }))
        .map(Result::unwrap)
        .collect()
        .await;

    assert_eq!(events.len(), 5);
    assert_eq!(events[0], StreamEvent::Request { attempt: 1 });
    assert_eq!(events[1], StreamEvent::Response(DecoratedStatus::ok()));
    for (i, event) in events[2..].iter().enumerate() {
        let StreamEvent::Data(message) = event else {
            panic!("Expected data, got {event:?}");
        };
        assert_eq!(message["message"], format!("hello - seq {i}"));
    }
}

#[tokio::test]
async fn test_server_stream_broken_midway() {
    let (pipeline, _) = setup_pipeline(echo_config());

    let messages: Vec<_> = pipeline
        .call_stream(options("ServerStreamingEcho"), json!({ "message": "break" }))
        .messages()
        .collect()
        .await;

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].as_ref().unwrap()["message"], "break - seq 0");
    assert_eq!(messages[1].as_ref().unwrap_err().http_code(), Some(503));
}

#[tokio::test]
async fn test_server_stream_rejected_at_start() {
    let (pipeline, _) = setup_pipeline(echo_config());

    let events: Vec<_> = pipeline
        .call_stream(options("ServerStreamingEcho"), json!({ "message": "fail:7" }))
        .collect()
        .await;

    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], Ok(StreamEvent::Request { attempt: 1 })));
    assert_eq!(events[1].as_ref().unwrap_err().http_code(), Some(403));
}

#[tokio::test]
async fn test_bidirectional_echo() {
    let (pipeline, _) = setup_pipeline(echo_config());

    let (mut writer, reader) = pipeline
        .call_duplex(options("bidirectionalEcho"))
        .split();

    writer.send(json!({ "message": "a" })).await.unwrap();
    writer
        .send(json!({ "message": "b", "autoPaginate": true }))
        .await
        .unwrap();
    writer.close();

    let events: Vec<DuplexEvent> = reader.map(Result::unwrap).collect().await;

    assert_eq!(events.len(), 3);
    let DuplexEvent::Data(first) = &events[0] else {
        panic!("Expected data");
    };
    assert_eq!(first["message"], "echo: a");
    let DuplexEvent::Data(second) = &events[1] else {
        panic!("Expected data");
    };
    assert_eq!(second["message"], "echo: b");
    let DuplexEvent::Response(status) = &events[2] else {
        panic!("Expected the final response");
    };
    assert_eq!(status.code, 200);
    assert_eq!(status.rpc_code, 0);
}

#[tokio::test]
async fn test_bidirectional_failure_is_decorated() {
    let (pipeline, _) = setup_pipeline(echo_config());

    let mut duplex = pipeline.call_duplex(options("BidirectionalEcho"));
    duplex.send(json!({ "message": "fail:10" })).await.unwrap();

    let first = duplex.next().await.unwrap();
    duplex.close();

    assert_eq!(first.unwrap_err().http_code(), Some(409));
}
