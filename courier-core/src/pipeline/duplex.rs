use super::{CallOptions, PipelineInner};
use crate::{
    error::CallError,
    request::PrepareError,
    status::{DecoratedStatus, StatusLike, decorate_status},
    stub::{DuplexFrame, RequestStream},
};
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

const WRITE_BUFFER: usize = 16;
const EVENT_BUFFER: usize = 16;

/// What the reading half of a duplex call yields.
#[derive(Debug, Clone, PartialEq)]
pub enum DuplexEvent {
    Data(Value),
    /// The server closed the call with an OK status. Always the last event.
    Response(DecoratedStatus),
}

#[derive(Debug, thiserror::Error)]
#[error("The duplex call is closed for writing")]
pub struct DuplexClosed(pub Value);

/// Writing half of a duplex call.
#[derive(Debug)]
pub struct DuplexWriter {
    tx: Option<mpsc::Sender<Value>>,
}

impl DuplexWriter {
    /// Queues a message. Each message is sanitized like a unary request before it is sent.
    ///
    /// Fails, handing the message back, once the writer is closed or the call has ended.
    pub async fn send(&self, message: Value) -> Result<(), DuplexClosed> {
        match &self.tx {
            Some(tx) => tx.send(message).await.map_err(|e| DuplexClosed(e.0)),
            None => Err(DuplexClosed(message)),
        }
    }

    /// Half-closes the call. Dropping the writer does the same.
    pub fn close(&mut self) {
        self.tx = None;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_none_or(mpsc::Sender::is_closed)
    }
}

/// Reading half of a duplex call.
///
/// Yields every server message, then a final `Response` on OK. A non-OK final status is
/// yielded as a (decorated) `Err` instead, and so is a write that failed sanitization.
pub struct DuplexReader {
    events: ReceiverStream<Result<DuplexEvent, CallError>>,
}

impl Stream for DuplexReader {
    type Item = Result<DuplexEvent, CallError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

/// A bidirectional call: a [`DuplexWriter`] and a [`DuplexReader`] over one stream.
///
/// Duplex calls are never retried. Dropping both halves cancels the call.
pub struct DuplexCall {
    writer: DuplexWriter,
    reader: DuplexReader,
}

impl DuplexCall {
    /// A call whose writer is closed and whose reader ends without events.
    pub(crate) fn closed() -> Self {
        let (_, events) = mpsc::channel(1);
        Self {
            writer: DuplexWriter { tx: None },
            reader: DuplexReader {
                events: ReceiverStream::new(events),
            },
        }
    }

    pub(crate) fn spawn(inner: Arc<PipelineInner>, options: CallOptions) -> Self {
        let (write_tx, write_rx) = mpsc::channel(WRITE_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(drive(inner, options, write_rx, event_tx));

        Self {
            writer: DuplexWriter { tx: Some(write_tx) },
            reader: DuplexReader {
                events: ReceiverStream::new(event_rx),
            },
        }
    }

    pub async fn send(&self, message: Value) -> Result<(), DuplexClosed> {
        self.writer.send(message).await
    }

    pub fn close(&mut self) {
        self.writer.close();
    }

    pub fn split(self) -> (DuplexWriter, DuplexReader) {
        (self.writer, self.reader)
    }
}

impl Stream for DuplexCall {
    type Item = Result<DuplexEvent, CallError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.reader).poll_next(cx)
    }
}

type EventSender = mpsc::Sender<Result<DuplexEvent, CallError>>;

async fn drive(
    inner: Arc<PipelineInner>,
    options: CallOptions,
    writes: mpsc::Receiver<Value>,
    tx: EventSender,
) {
    let prepared = match inner.prepare(&options).await {
        Ok(prepared) => prepared,
        Err(error) => {
            let _ = tx.send(Err(error)).await;
            return;
        }
    };

    // A write that fails sanitization is reported once and leaves the outgoing half pending
    // for good. The call is then dropped, which resets it instead of half-closing it.
    let (failure_tx, mut failure_rx) = oneshot::channel::<PrepareError>();

    let outgoing: RequestStream = futures_util::stream::unfold(
        (writes, inner.clone(), Some(failure_tx)),
        |(mut writes, sanitizer, mut failure_tx)| async move {
            let message = writes.recv().await?;
            match sanitizer.sanitize(message) {
                Ok(message) => Some((message, (writes, sanitizer, failure_tx))),
                Err(error) => {
                    if let Some(failure) = failure_tx.take() {
                        let _ = failure.send(error);
                    }
                    std::future::pending().await
                }
            }
        },
    )
    .boxed();

    let method = options.method.as_str();
    let mut incoming = match prepared
        .stub
        .bidirectional_streaming(method, outgoing, &prepared.settings)
        .await
    {
        Ok(incoming) => incoming,
        Err(error) => {
            let _ = tx.send(Err(CallError::from_stub(error))).await;
            return;
        }
    };

    tracing::debug!(method, "duplex started");

    let mut watch_failures = true;

    loop {
        tokio::select! {
            biased;

            failure = &mut failure_rx, if watch_failures => match failure {
                Ok(error) => {
                    drop(incoming);
                    tracing::debug!(method, "duplex write rejected, cancelling");
                    let _ = tx.send(Err(CallError::from(error))).await;
                    return;
                }
                Err(_) => watch_failures = false,
            },
            message = incoming.next() => {
                let event = match message {
                    Some(Ok(DuplexFrame::Message(value))) => Ok(DuplexEvent::Data(value)),
                    Some(Ok(DuplexFrame::Status(status))) => Ok(DuplexEvent::Response(
                        decorate_status(&StatusLike::from(&status))
                            .unwrap_or_else(DecoratedStatus::ok),
                    )),
                    Some(Err(status)) => Err(CallError::from(status)),
                    // Transports without a final status frame end with a synthetic OK.
                    None => Ok(DuplexEvent::Response(DecoratedStatus::ok())),
                };
                let last = !matches!(event, Ok(DuplexEvent::Data(_)));

                if tx.send(event).await.is_err() {
                    tracing::debug!(method, "duplex reader dropped, cancelling");
                    return;
                }
                if last {
                    tracing::debug!(method, "duplex finished");
                    return;
                }
            }
        }
    }
}
