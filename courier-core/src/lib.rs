//! # Courier Core
//!
//! `courier_core` is a client-side orchestration layer for gRPC APIs in the Google Cloud
//! style. It sits in front of dynamically described services and takes care of everything
//! between "call method X with payload Y" and the wire.
//!
//! ## Key Components
//!
//! * **[`CallPipeline`]:** The entry point. Resolves credentials once, caches one stub per
//!   service, computes deadlines, sanitizes payloads and drives unary calls, server
//!   streams and duplex streams.
//! * **[`retry`]:** The retry executor and its policy, with exponential backoff.
//! * **[`status`]:** Translation of RPC status codes into HTTP-space errors.
//! * **[`struct_value`]:** A codec between arbitrary object graphs (cycles included) and the
//!   `google.protobuf.Struct` wire model.
//! * **[`operation`]:** Long-running operation handles with a three-outcome poll.
//!
//! ## Transport
//!
//! Real calls go through [`stub::GrpcStub`], a dynamic `tonic` client transcoding
//! `serde_json::Value` payloads against `prost-reflect` descriptors loaded at runtime
//! ([`proto`]). Anything implementing [`stub::StubFactory`] can replace it.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod auth;
pub mod config;
pub mod deadline;
pub mod error;
pub mod grpc;
pub mod operation;
pub mod pipeline;
pub mod proto;
pub mod request;
pub mod resource;
pub mod retry;
pub mod status;
pub mod struct_value;
pub mod stub;

pub use error::CallError;
pub use pipeline::{CallOptions, CallPipeline};

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used at collaborator seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
