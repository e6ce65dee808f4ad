use super::{CallOptions, PipelineInner};
use crate::{
    error::CallError,
    retry::{RetryExecutor, RetryPolicy},
    status::DecoratedStatus,
    stub::StubError,
};
use futures_util::{Stream, StreamExt, stream::BoxStream};
use serde_json::Value;
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const EVENT_BUFFER: usize = 16;

/// Lifecycle and data events of a server stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// An attempt is being issued (1-based).
    Request { attempt: u32 },
    /// The server acknowledged the stream. Emitted once, before any data.
    Response(DecoratedStatus),
    Data(Value),
}

/// Outward side of a server stream.
///
/// Yields `Request` for every attempt, then `Response` once the server accepts the call,
/// then every `Data` message. The stream ends after the server's final OK status, or after
/// a single `Err` carrying the failure: the exhausted retries, a preparation failure, or a
/// status reported mid-stream (which is never retried).
///
/// Dropping the stream cancels the call.
pub struct ResponseStream {
    events: ReceiverStream<Result<StreamEvent, CallError>>,
}

impl ResponseStream {
    /// A stream that ends without events.
    pub(crate) fn closed() -> Self {
        let (_, rx) = mpsc::channel(1);
        Self {
            events: ReceiverStream::new(rx),
        }
    }

    pub(crate) fn spawn(
        inner: Arc<PipelineInner>,
        policy: RetryPolicy,
        options: CallOptions,
        request: Value,
    ) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(drive(inner, policy, options, request, tx));
        Self {
            events: ReceiverStream::new(rx),
        }
    }

    /// Only the data messages, with lifecycle events filtered out.
    pub fn messages(self) -> BoxStream<'static, Result<Value, CallError>> {
        self.filter_map(|event| async move {
            match event {
                Ok(StreamEvent::Data(value)) => Some(Ok(value)),
                Ok(_) => None,
                Err(error) => Some(Err(error)),
            }
        })
        .boxed()
    }
}

impl Stream for ResponseStream {
    type Item = Result<StreamEvent, CallError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

type EventSender = mpsc::Sender<Result<StreamEvent, CallError>>;

async fn drive(
    inner: Arc<PipelineInner>,
    policy: RetryPolicy,
    options: CallOptions,
    request: Value,
    tx: EventSender,
) {
    let prepared = match inner.prepare(&options).await {
        Ok(prepared) => prepared,
        Err(error) => {
            let _ = tx.send(Err(error)).await;
            return;
        }
    };

    let request = match inner.sanitize(request) {
        Ok(request) => request,
        Err(error) => {
            let _ = tx.send(Err(error.into())).await;
            return;
        }
    };

    let stub = &prepared.stub;
    let settings = &prepared.settings;
    let method = options.method.as_str();
    let request = &request;
    let events = &tx;

    let mut executor = RetryExecutor::new(policy);
    let started = executor
        .run(move |attempt| async move {
            // Undecoratable, so the executor stops instead of retrying.
            if events
                .send(Ok(StreamEvent::Request { attempt }))
                .await
                .is_err()
            {
                return Err(StubError::Other("stream receiver dropped".into()));
            }
            stub.server_streaming(method, request.clone(), settings).await
        })
        .await;

    let mut messages = match started {
        Ok(messages) => messages,
        Err(error) => {
            let _ = tx.send(Err(error)).await;
            return;
        }
    };

    tracing::debug!(method, attempts = executor.attempts(), "stream started");

    if tx
        .send(Ok(StreamEvent::Response(DecoratedStatus::ok())))
        .await
        .is_err()
    {
        return;
    }

    while let Some(message) = messages.next().await {
        let event = match message {
            Ok(value) => Ok(StreamEvent::Data(value)),
            Err(status) => {
                let _ = tx.send(Err(CallError::from(status))).await;
                return;
            }
        };

        if tx.send(event).await.is_err() {
            tracing::debug!(method, "stream receiver dropped, cancelling");
            return;
        }
    }

    tracing::debug!(method, "stream finished");
}
