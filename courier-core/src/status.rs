//! # RPC Status Translation
//!
//! Remote calls fail with a small integer status code (`0..=16`). Application code built on
//! top of this crate reasons in HTTP terms instead, so every status that crosses the
//! pipeline boundary is *decorated*: the RPC code is looked up in a fixed table and the
//! HTTP-space code and message replace the original ones, while every other field of the
//! status is preserved.
//!
//! The same decorated value also drives retry decisions, see [`should_retry`].
use serde_json::{Map, Value};
use std::fmt;

/// An HTTP-space code and its default reason phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpStatus {
    pub code: u16,
    pub message: &'static str,
}

const fn http(code: u16, message: &'static str) -> HttpStatus {
    HttpStatus { code, message }
}

/// RPC status code to HTTP status, indexed by the RPC code.
///
/// Several RPC codes collapse onto the same HTTP code (`6` and `10` are both `409`,
/// `2`, `13` and `15` are all `500`).
pub const GRPC_TO_HTTP: [HttpStatus; 17] = [
    http(200, "OK"),
    http(499, "Client Closed Request"),
    http(500, "Internal Server Error"),
    http(400, "Bad Request"),
    http(504, "Gateway Timeout"),
    http(404, "Not Found"),
    http(409, "Conflict"),
    http(403, "Forbidden"),
    http(429, "Too Many Requests"),
    http(412, "Precondition Failed"),
    http(409, "Conflict"),
    http(400, "Bad Request"),
    http(501, "Not Implemented"),
    http(500, "Internal Server Error"),
    http(503, "Service Unavailable"),
    http(500, "Internal Server Error"),
    http(401, "Unauthorized"),
];

/// HTTP codes that are worth another attempt.
pub const RETRYABLE_HTTP_CODES: [u16; 4] = [429, 500, 502, 503];

/// Looks up the HTTP mapping of an RPC status code.
///
/// Returns `None` for codes outside the table, which means "do not decorate".
pub fn http_status(rpc_code: i32) -> Option<HttpStatus> {
    usize::try_from(rpc_code)
        .ok()
        .and_then(|index| GRPC_TO_HTTP.get(index))
        .copied()
}

/// Whether an HTTP-space code is retry-worthy.
pub fn is_retryable_http_code(code: u16) -> bool {
    RETRYABLE_HTTP_CODES.contains(&code)
}

/// Default retry predicate: true iff the decorated HTTP code is one of
/// [`RETRYABLE_HTTP_CODES`].
pub fn should_retry(status: &DecoratedStatus) -> bool {
    is_retryable_http_code(status.code)
}

/// The shape produced by a failed remote call, or carried by an operation's `error` field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusLike {
    pub code: i32,
    pub message: Option<String>,
    /// Any other field the status carried (metadata, details, ...).
    pub fields: Map<String, Value>,
}

impl StatusLike {
    pub fn new(code: i32) -> Self {
        Self {
            code,
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Reads a status out of a JSON object such as `{"code": 5, "message": "..."}`.
    ///
    /// Returns `None` when the value is not an object or has no integral `code`.
    pub fn from_json(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let code = object.get("code")?.as_i64()?;
        let code = i32::try_from(code).ok()?;

        let message = object
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned);

        let fields = object
            .iter()
            .filter(|(key, _)| *key != "code" && *key != "message")
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Some(Self {
            code,
            message,
            fields,
        })
    }
}

impl From<&tonic::Status> for StatusLike {
    fn from(status: &tonic::Status) -> Self {
        let mut fields = Map::new();

        let metadata: Map<String, Value> = status
            .metadata()
            .iter()
            .filter_map(|entry| match entry {
                tonic::metadata::KeyAndValueRef::Ascii(key, value) => value
                    .to_str()
                    .ok()
                    .map(|v| (key.as_str().to_owned(), Value::String(v.to_owned()))),
                tonic::metadata::KeyAndValueRef::Binary(..) => None,
            })
            .collect();

        if !metadata.is_empty() {
            fields.insert("metadata".to_owned(), Value::Object(metadata));
        }

        Self {
            code: status.code() as i32,
            message: Some(status.message().to_owned()).filter(|m| !m.is_empty()),
            fields,
        }
    }
}

/// A [`StatusLike`] translated into HTTP terms.
///
/// `code` and `message` are the caller-facing values; the original RPC code is kept in
/// `rpc_code` and every extra field of the source status survives in `details`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoratedStatus {
    /// HTTP-space code.
    pub code: u16,
    /// Message taken from the status when present, the table default otherwise.
    pub message: String,
    /// Default reason phrase for `code`.
    pub http_message: &'static str,
    /// The RPC code the decoration started from.
    pub rpc_code: i32,
    pub details: Map<String, Value>,
}

impl DecoratedStatus {
    /// The synthetic `200 OK` used to acknowledge a started stream.
    pub fn ok() -> Self {
        decorate_status(&StatusLike::new(0)).unwrap_or_else(|| Self {
            code: 200,
            message: "OK".to_owned(),
            http_message: "OK",
            rpc_code: 0,
            details: Map::new(),
        })
    }

    /// The merged object view: every original field plus the decorated `code`/`message`.
    pub fn to_json(&self) -> Value {
        let mut object = self.details.clone();
        object.insert("code".to_owned(), Value::from(self.code));
        object.insert("message".to_owned(), Value::String(self.message.clone()));
        Value::Object(object)
    }
}

impl fmt::Display for DecoratedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.code, self.http_message, self.message)
    }
}

impl std::error::Error for DecoratedStatus {}

/// Decorates a status with its HTTP mapping.
///
/// Returns `None` when the code has no table entry; callers must then fall back to the
/// original error.
pub fn decorate_status(status: &StatusLike) -> Option<DecoratedStatus> {
    let http = http_status(status.code)?;

    let message = match status.message.as_deref() {
        Some(raw) if !raw.is_empty() => message_description(raw),
        _ => http.message.to_owned(),
    };

    Some(DecoratedStatus {
        code: http.code,
        message,
        http_message: http.message,
        rpc_code: status.code,
        details: status.fields.clone(),
    })
}

/// Messages may be a JSON object with a `description` field, or plain text.
///
/// Known fragility: any text that happens to parse as a JSON object carrying a string
/// `description` is unwrapped, intended or not.
fn message_description(raw: &str) -> String {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|parsed| {
            parsed
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| raw.to_owned())
}
