//! # Dynamic Codec
//!
//! A `tonic::codec::Codec` that lets the stubs exchange `serde_json::Value` payloads with any
//! service, transcoding through `prost_reflect::DynamicMessage` against the descriptors of
//! the method being called.
//!
//! Requests are validated against the input message schema before they are written; a
//! mismatch surfaces as `INVALID_ARGUMENT`, which the status table maps to a
//! non-retryable `400`.
use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor, MethodDescriptor};
use serde_json::Value;
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

/// Codec bound to a single method.
pub struct DynamicCodec {
    method: MethodDescriptor,
}

impl DynamicCodec {
    pub fn new(method: MethodDescriptor) -> Self {
        Self { method }
    }
}

impl Codec for DynamicCodec {
    type Encode = Value;
    type Decode = Value;

    type Encoder = RequestEncoder;
    type Decoder = ResponseDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        RequestEncoder(self.method.input())
    }

    fn decoder(&mut self) -> Self::Decoder {
        ResponseDecoder(self.method.output())
    }
}

/// JSON -> protobuf bytes.
pub struct RequestEncoder(MessageDescriptor);

impl Encoder for RequestEncoder {
    type Item = Value;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        let message = DynamicMessage::deserialize(self.0.clone(), item).map_err(|e| {
            Status::invalid_argument(format!(
                "Request does not match the '{}' schema: {}",
                self.0.full_name(),
                e
            ))
        })?;

        message.encode_raw(dst);
        Ok(())
    }
}

/// Protobuf bytes -> JSON.
pub struct ResponseDecoder(MessageDescriptor);

impl Decoder for ResponseDecoder {
    type Item = Value;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let mut message = DynamicMessage::new(self.0.clone());
        message.merge(src).map_err(|e| {
            Status::internal(format!(
                "Failed to decode a '{}' response: {}",
                self.0.full_name(),
                e
            ))
        })?;

        serde_json::to_value(&message)
            .map(Some)
            .map_err(|e| Status::internal(format!("Failed to map response to JSON: {}", e)))
    }
}
