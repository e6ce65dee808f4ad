use courier_core::{
    CallError, CallOptions,
    config::{ClientInfo, PipelineConfig, ProtoServiceEntry},
    request::PrepareError,
    retry::{Backoff, RetryOverrides},
    stub::StubError,
};
use fake_transport::{FakeAuth, config, harness};
use futures_util::StreamExt;
use serde_json::json;
use std::time::Duration;
use tonic::Status;


#[tokio::test]
async fn test_unary_call_sanitizes_and_returns_the_response() {
    let h = harness(config(3), FakeAuth::new(Some("derived-project")));
    h.stub().push_unary(Ok(json!({ "name": "topics/t" })));

    let response = h
        .pipeline
        .call(
            CallOptions::new("Publisher", "getTopic"),
            json!({
                "topic": "projects/{{projectId}}/topics/t",
                "autoPaginate": true,
                "objectMode": false,
            }),
        )
        .await
        .unwrap();

    assert_eq!(response, json!({ "name": "topics/t" }));

    let calls = h.stub().calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, "getTopic");
    assert_eq!(
        calls[0].request,
        json!({ "topic": "projects/derived-project/topics/t" })
    );
    assert_eq!(calls[0].settings.deadline, None);
    assert_eq!(h.pipeline.project_id().as_deref(), Some("derived-project"));
}

#[tokio::test]
async fn test_configured_project_id_wins_over_the_derived_one() {
    let config = PipelineConfig {
        project_id: Some("configured".to_owned()),
        ..config(0)
    };
    let h = harness(config, FakeAuth::new(Some("derived")));

    h.pipeline
        .call(
            CallOptions::new("Publisher", "getTopic"),
            json!({ "topic": "projects/{{projectId}}" }),
        )
        .await
        .unwrap();

    assert_eq!(h.stub().calls()[0].request["topic"], "projects/configured");
}

#[tokio::test(start_paused = true)]
async fn test_timeout_becomes_an_absolute_deadline() {
    let h = harness(config(0), FakeAuth::new(None));
    let before = tokio::time::Instant::now();

    h.pipeline
        .call(
            CallOptions::new("Publisher", "getTopic").timeout(Duration::from_secs(30)),
            json!({}),
        )
        .await
        .unwrap();

    let deadline = h.stub().calls()[0].settings.deadline.unwrap();
    assert_eq!(deadline - before, Duration::from_secs(30));
}

#[tokio::test]
async fn test_unrepresentable_timeout_leaves_the_deadline_unset() {
    let h = harness(config(0), FakeAuth::new(None));

    h.pipeline
        .call(
            CallOptions::new("Publisher", "getTopic").timeout(Duration::MAX),
            json!({}),
        )
        .await
        .unwrap();

    assert_eq!(h.stub().calls()[0].settings.deadline, None);
}

#[tokio::test]
async fn test_every_call_carries_the_pipeline_metadata() {
    let config = PipelineConfig {
        client_info: Some(ClientInfo {
            name: "pubsub".to_owned(),
            version: "4.5.6".to_owned(),
        }),
        metadata: [("x-goog-request-params".to_owned(), "topic=t".to_owned())].into(),
        ..config(0)
    };
    let h = harness(config, FakeAuth::new(None));

    h.pipeline
        .call(CallOptions::new("Publisher", "getTopic"), json!({}))
        .await
        .unwrap();

    let metadata = &h.stub().calls()[0].settings.metadata;
    assert_eq!(metadata.len(), 2);
    assert_eq!(metadata[0].0, "x-goog-api-client");
    assert!(metadata[0].1.contains("gccl/4.5.6"));
    assert_eq!(metadata[1].1, "topic=t");
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_calls_share_one_credential_fetch_and_one_stub() {
    let h = harness(
        config(0),
        FakeAuth::new(Some("p")).slow(Duration::from_millis(100)),
    );

    let calls = (0..8).map(|_| {
        h.pipeline
            .call(CallOptions::new("Publisher", "getTopic"), json!({}))
    });
    let results = futures_util::future::join_all(calls).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(h.auth.fetches(), 1);
    assert_eq!(h.factory.created().len(), 1);
    assert_eq!(h.stub().calls().len(), 8);
}

#[tokio::test]
async fn test_stubs_are_cached_per_service_with_base_url_overrides() {
    let config = PipelineConfig {
        proto_services: [(
            "Subscriber".to_owned(),
            ProtoServiceEntry::Detailed {
                path: "google/pubsub/v1/pubsub.bin".into(),
                service: Some("pubsub.v1".to_owned()),
                base_url: Some("https://eu.api.example.com".to_owned()),
            },
        )]
        .into(),
        ..config(0)
    };
    let h = harness(config, FakeAuth::new(None));

    for service in ["Publisher", "Publisher", "Subscriber", "Publisher"] {
        h.pipeline
            .call(CallOptions::new(service, "list"), json!({}))
            .await
            .unwrap();
    }

    assert_eq!(
        h.factory.created(),
        vec![
            (
                "Publisher".to_owned(),
                "https://api.example.com".to_owned()
            ),
            (
                "Subscriber".to_owned(),
                "https://eu.api.example.com".to_owned()
            ),
        ]
    );
}

#[tokio::test]
async fn test_retries_stop_after_max_retries_with_the_last_decorated_error() {
    let h = harness(config(2), FakeAuth::new(None));
    for _ in 0..5 {
        h.stub()
            .push_unary(Err(StubError::Status(Status::unavailable("overloaded"))));
    }

    let err = h
        .pipeline
        .call(CallOptions::new("Publisher", "publish"), json!({}))
        .await
        .unwrap_err();

    assert_eq!(h.stub().calls().len(), 3);
    let status = err.status().unwrap();
    assert_eq!(status.code, 503);
    assert_eq!(status.message, "overloaded");
}

#[tokio::test]
async fn test_transient_failures_are_retried_until_success() {
    let h = harness(config(3), FakeAuth::new(None));
    h.stub()
        .push_unary(Err(StubError::Status(Status::internal("oops"))));
    h.stub()
        .push_unary(Err(StubError::Status(Status::resource_exhausted("quota"))));
    h.stub().push_unary(Ok(json!({ "ok": true })));

    let response = h
        .pipeline
        .call(CallOptions::new("Publisher", "publish"), json!({}))
        .await
        .unwrap();

    assert_eq!(response, json!({ "ok": true }));
    assert_eq!(h.stub().calls().len(), 3);
}

#[tokio::test]
async fn test_per_call_retry_overrides_apply() {
    let h = harness(config(5), FakeAuth::new(None));
    for _ in 0..3 {
        h.stub()
            .push_unary(Err(StubError::Status(Status::not_found("missing"))));
    }

    let options = CallOptions::new("Publisher", "getTopic").retry(
        RetryOverrides::default()
            .max_retries(1)
            .should_retry(|status| status.code == 404)
            .backoff(Backoff::none()),
    );
    let err = h.pipeline.call(options, json!({})).await.unwrap_err();

    assert_eq!(h.stub().calls().len(), 2);
    assert_eq!(err.http_code(), Some(404));
}

#[tokio::test]
async fn test_undecoratable_errors_surface_raw_without_retry() {
    let h = harness(config(3), FakeAuth::new(None));
    h.stub()
        .push_unary(Err(StubError::Other("connection reset".into())));

    let err = h
        .pipeline
        .call(CallOptions::new("Publisher", "publish"), json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, CallError::Transport(StubError::Other(_))));
    assert_eq!(h.stub().calls().len(), 1);
}

#[tokio::test]
async fn test_missing_project_id_fails_before_the_transport() {
    let h = harness(config(3), FakeAuth::new(None));

    let err = h
        .pipeline
        .call(
            CallOptions::new("Publisher", "getTopic"),
            json!({ "topic": "projects/{{projectId}}/topics/t" }),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CallError::Prepare(PrepareError::MissingProjectId)
    ));
    assert!(h.stub().calls().is_empty());
}

#[tokio::test]
async fn test_credential_failures_are_surfaced() {
    let h = harness(config(3), FakeAuth::failing());

    let err = h
        .pipeline
        .call(CallOptions::new("Publisher", "getTopic"), json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, CallError::Credentials(_)));
    assert!(h.factory.created().is_empty());
}

#[tokio::test]
async fn test_custom_endpoints_never_consult_the_auth_client() {
    let config = PipelineConfig {
        custom_endpoint: true,
        project_id: Some("emulator".to_owned()),
        ..config(0)
    };
    let h = harness(config, FakeAuth::new(None));

    h.pipeline
        .call(
            CallOptions::new("Publisher", "getTopic"),
            json!({ "topic": "projects/{{projectId}}" }),
        )
        .await
        .unwrap();

    assert_eq!(h.auth.fetches(), 0);
    assert_eq!(h.stub().calls()[0].request["topic"], "projects/emulator");
}

#[tokio::test]
async fn test_sandbox_never_touches_credentials_or_stubs() {
    let config = PipelineConfig {
        sandbox: true,
        ..config(3)
    };
    let h = harness(config, FakeAuth::new(None));
    let options = CallOptions::new("Publisher", "publish");

    let response = h.pipeline.call(options.clone(), json!({})).await.unwrap();
    assert_eq!(response, serde_json::Value::Null);

    let events: Vec<_> = h
        .pipeline
        .call_stream(options.clone(), json!({}))
        .collect()
        .await;
    assert!(events.is_empty());

    let duplex = h.pipeline.call_duplex(options);
    assert!(duplex.send(json!({})).await.is_err());
    let (_writer, reader) = duplex.split();
    assert_eq!(reader.count().await, 0);

    assert_eq!(h.auth.fetches(), 0);
    assert!(h.factory.created().is_empty());
}
