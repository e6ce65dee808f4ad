//! # Generic gRPC Transport
//!
//! This module contains the low-level building blocks for performing gRPC calls using
//! dynamic message types.
//!
//! Unlike standard `tonic` clients which are strongly typed (e.g., `HelloRequest`),
//! the components here work with `serde_json::Value` payloads, transcoding them to
//! Protobuf binary format on the fly against descriptors resolved at runtime.
pub mod client;
pub mod codec;
