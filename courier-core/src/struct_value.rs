//! # Struct Codec
//!
//! APIs that accept arbitrary key/value payloads model them as a `google.protobuf.Struct`:
//! a map of tagged values, each of which may itself be a list or another struct.
//!
//! This module converts between application values ([`Value`]) and that tagged
//! representation ([`WireValue`] / [`Struct`]).
//!
//! * **Encoding** ([`StructEncoder`]) walks the value graph. Objects are shared handles
//!   ([`ObjectRef`]) so a graph may contain cycles; the encoder tracks the objects it is
//!   currently inside of and either fails on a cycle or substitutes the `"[Circular]"`
//!   placeholder when [`EncodeOptions::remove_circular`] is set.
//! * **Decoding** ([`decode`]) is total over any well-formed [`WireValue`].
//!
//! `decode(encode(v)) == v` for every acyclic value made of nulls, numbers, strings,
//! booleans, blobs, arrays and objects.
//!
//! ## Example
//!
//! ```rust
//! use courier_core::struct_value::{self, ObjectRef, Value};
//!
//! let user = ObjectRef::new();
//! user.insert("greeting", "Hello!");
//! user.insert("favNumber", 7);
//! user.insert("friendIds", Value::Array(vec![1004.into(), 1006.into()]));
//!
//! let encoded = struct_value::object_to_struct(&user, Default::default()).unwrap();
//! let decoded = struct_value::struct_to_object(&encoded);
//!
//! assert_eq!(decoded, user);
//! ```
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::RwLock;
use prost_types::value::Kind;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Placeholder written in place of a cyclic reference when `remove_circular` is set.
pub const CIRCULAR_PLACEHOLDER: &str = "[Circular]";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error(
        "This object contains a circular reference. To automatically remove it, set the `remove_circular` option to true."
    )]
    CircularReference,
    #[error("Value of type {0} not recognized.")]
    UnrecognizedType(String),
}

/// An application value, the input of the encoder and the output of the decoder.
#[derive(Debug, Clone)]
pub enum Value {
    /// "No value". Skipped when it is an object property, unrecognized anywhere else.
    Undefined,
    Null,
    Number(f64),
    String(String),
    Bool(bool),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Object(ObjectRef),
    /// Anything without a wire representation (dates, handles, ...). Only encodable as
    /// its textual form when [`EncodeOptions::stringify`] is set.
    Opaque { type_name: String, text: String },
}

impl Value {
    pub fn opaque(type_name: impl Into<String>, text: impl Into<String>) -> Self {
        Value::Opaque {
            type_name: type_name.into(),
            text: text.into(),
        }
    }

    fn type_name(&self) -> &str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Opaque { type_name, .. } => type_name,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (
                Value::Opaque {
                    type_name: ta,
                    text: xa,
                },
                Value::Opaque {
                    type_name: tb,
                    text: xb,
                },
            ) => ta == tb && xa == xb,
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value.into())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Value::Object(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(ObjectRef::from_map(
                map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            )),
        }
    }
}

/// A shared, mutable object handle.
///
/// Cloning the handle does not clone the object: two clones are the *same* object, which
/// is what makes cycles expressible and detectable.
#[derive(Clone, Default)]
pub struct ObjectRef(Arc<RwLock<BTreeMap<String, Value>>>);

impl ObjectRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: BTreeMap<String, Value>) -> Self {
        Self(Arc::new(RwLock::new(map)))
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.write().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// A shallow copy of the current properties. Nested objects stay shared.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

/// Structural equality. Cyclic graphs compare equal when they unfold to the same tree.
impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        objects_eq(self, other, &mut HashSet::new())
    }
}

/// Pairs already under comparison are assumed equal, so cycles terminate.
fn objects_eq(a: &ObjectRef, b: &ObjectRef, visiting: &mut HashSet<(usize, usize)>) -> bool {
    if a.ptr_eq(b) || !visiting.insert((a.identity(), b.identity())) {
        return true;
    }

    let (left, right) = (a.entries(), b.entries());
    left.len() == right.len()
        && left
            .iter()
            .zip(&right)
            .all(|((ka, va), (kb, vb))| ka == kb && values_eq(va, vb, visiting))
}

fn values_eq(a: &Value, b: &Value, visiting: &mut HashSet<(usize, usize)>) -> bool {
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| values_eq(x, y, visiting))
        }
        (Value::Object(x), Value::Object(y)) => objects_eq(x, y, visiting),
        _ => a == b,
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Nested objects only print their identity, so cyclic graphs stay printable.
        let mut map = f.debug_map();
        for (key, value) in self.0.read().iter() {
            match value {
                Value::Object(inner) => {
                    map.entry(key, &format_args!("Object@{:#x}", inner.identity()))
                }
                other => map.entry(key, other),
            };
        }
        map.finish()
    }
}

/// A tagged wire value, the payload of a `google.protobuf.Value`.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Null,
    Number(f64),
    String(String),
    Bool(bool),
    Blob(Vec<u8>),
    List(Vec<WireValue>),
    Struct(Struct),
}

/// A map of named wire values, the payload of a `google.protobuf.Struct`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Struct {
    pub fields: BTreeMap<String, WireValue>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Replace cyclic references with [`CIRCULAR_PLACEHOLDER`] instead of failing.
    pub remove_circular: bool,
    /// Encode unrecognized values as their textual form instead of failing.
    pub stringify: bool,
}

/// Recursive encoder from [`Value`] to [`WireValue`].
///
/// The set of objects currently being encoded lives inside the encoder, so each encoder
/// should be used for a single value tree.
#[derive(Debug, Default)]
pub struct StructEncoder {
    options: EncodeOptions,
    in_progress: HashSet<usize>,
}

impl StructEncoder {
    pub fn new(options: EncodeOptions) -> Self {
        Self {
            options,
            in_progress: HashSet::new(),
        }
    }

    /// Encodes every own, defined property of `object` into a [`Struct`].
    pub fn convert(&mut self, object: &ObjectRef) -> Result<Struct, EncodeError> {
        let id = object.identity();
        self.in_progress.insert(id);

        let result = object
            .entries()
            .into_iter()
            .filter(|(_, value)| !matches!(value, Value::Undefined))
            .map(|(key, value)| Ok((key, self.encode_value(&value)?)))
            .collect::<Result<BTreeMap<_, _>, EncodeError>>();

        self.in_progress.remove(&id);

        Ok(Struct { fields: result? })
    }

    pub fn encode_value(&mut self, value: &Value) -> Result<WireValue, EncodeError> {
        let encoded = match value {
            Value::Null => WireValue::Null,
            Value::Number(n) => WireValue::Number(*n),
            Value::String(s) => WireValue::String(s.clone()),
            Value::Bool(b) => WireValue::Bool(*b),
            Value::Bytes(bytes) => WireValue::Blob(bytes.clone()),
            Value::Array(items) => WireValue::List(
                items
                    .iter()
                    .map(|item| self.encode_value(item))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(object) if self.in_progress.contains(&object.identity()) => {
                if !self.options.remove_circular {
                    return Err(EncodeError::CircularReference);
                }
                WireValue::String(CIRCULAR_PLACEHOLDER.to_owned())
            }
            Value::Object(object) => WireValue::Struct(self.convert(object)?),
            Value::Undefined | Value::Opaque { .. } => {
                if !self.options.stringify {
                    return Err(EncodeError::UnrecognizedType(value.type_name().to_owned()));
                }
                WireValue::String(stringify(value))
            }
        };

        Ok(encoded)
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Opaque { text, .. } => text.clone(),
        other => other.type_name().to_owned(),
    }
}

/// Encodes a single value with a fresh encoder.
pub fn encode(value: &Value, options: EncodeOptions) -> Result<WireValue, EncodeError> {
    StructEncoder::new(options).encode_value(value)
}

/// Encodes an object into a [`Struct`] with a fresh encoder.
pub fn object_to_struct(
    object: &ObjectRef,
    options: EncodeOptions,
) -> Result<Struct, EncodeError> {
    StructEncoder::new(options).convert(object)
}

/// Decodes a wire value back into an application value.
pub fn decode(value: &WireValue) -> Value {
    match value {
        WireValue::Struct(s) => Value::Object(struct_to_object(s)),
        WireValue::Null => Value::Null,
        WireValue::List(items) => Value::Array(items.iter().map(decode).collect()),
        WireValue::Number(n) => Value::Number(*n),
        WireValue::String(s) => Value::String(s.clone()),
        WireValue::Bool(b) => Value::Bool(*b),
        WireValue::Blob(bytes) => Value::Bytes(bytes.clone()),
    }
}

/// Condenses a [`Struct`] into a plain object of its decoded values.
pub fn struct_to_object(value: &Struct) -> ObjectRef {
    ObjectRef::from_map(
        value
            .fields
            .iter()
            .map(|(key, field)| (key.clone(), decode(field)))
            .collect(),
    )
}

impl From<WireValue> for prost_types::Value {
    /// Blobs have no `google.protobuf.Value` kind; they travel as base64 strings.
    fn from(value: WireValue) -> Self {
        let kind = match value {
            WireValue::Null => Kind::NullValue(prost_types::NullValue::NullValue as i32),
            WireValue::Number(n) => Kind::NumberValue(n),
            WireValue::String(s) => Kind::StringValue(s),
            WireValue::Bool(b) => Kind::BoolValue(b),
            WireValue::Blob(bytes) => Kind::StringValue(BASE64.encode(bytes)),
            WireValue::List(items) => Kind::ListValue(prost_types::ListValue {
                values: items.into_iter().map(Into::into).collect(),
            }),
            WireValue::Struct(s) => Kind::StructValue(s.into()),
        };

        prost_types::Value { kind: Some(kind) }
    }
}

impl From<Struct> for prost_types::Struct {
    fn from(value: Struct) -> Self {
        prost_types::Struct {
            fields: value
                .fields
                .into_iter()
                .map(|(key, field)| (key, field.into()))
                .collect(),
        }
    }
}

impl From<prost_types::Value> for WireValue {
    fn from(value: prost_types::Value) -> Self {
        match value.kind {
            None | Some(Kind::NullValue(_)) => WireValue::Null,
            Some(Kind::NumberValue(n)) => WireValue::Number(n),
            Some(Kind::StringValue(s)) => WireValue::String(s),
            Some(Kind::BoolValue(b)) => WireValue::Bool(b),
            Some(Kind::ListValue(list)) => {
                WireValue::List(list.values.into_iter().map(Into::into).collect())
            }
            Some(Kind::StructValue(s)) => WireValue::Struct(s.into()),
        }
    }
}

impl From<prost_types::Struct> for Struct {
    fn from(value: prost_types::Struct) -> Self {
        Struct {
            fields: value
                .fields
                .into_iter()
                .map(|(key, field)| (key, field.into()))
                .collect(),
        }
    }
}

impl WireValue {
    /// The proto3 JSON mapping of this value, as sent through a dynamic request body.
    ///
    /// Blobs become base64 strings and non-finite numbers become their string names.
    pub fn to_proto_json(&self) -> serde_json::Value {
        match self {
            WireValue::Null => serde_json::Value::Null,
            WireValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(n.to_string())),
            WireValue::String(s) => serde_json::Value::String(s.clone()),
            WireValue::Bool(b) => serde_json::Value::Bool(*b),
            WireValue::Blob(bytes) => serde_json::Value::String(BASE64.encode(bytes)),
            WireValue::List(items) => {
                serde_json::Value::Array(items.iter().map(WireValue::to_proto_json).collect())
            }
            WireValue::Struct(s) => s.to_proto_json(),
        }
    }

    /// Reads a value from its proto3 JSON mapping.
    pub fn from_proto_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => WireValue::Null,
            serde_json::Value::Bool(b) => WireValue::Bool(*b),
            serde_json::Value::Number(n) => WireValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => WireValue::String(s.clone()),
            serde_json::Value::Array(items) => {
                WireValue::List(items.iter().map(WireValue::from_proto_json).collect())
            }
            serde_json::Value::Object(_) => WireValue::Struct(Struct::from_proto_json(value)),
        }
    }
}

impl Struct {
    pub fn to_proto_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(key, field)| (key.clone(), field.to_proto_json()))
                .collect(),
        )
    }

    /// Reads a struct from its proto3 JSON mapping. Anything but an object is empty.
    pub fn from_proto_json(value: &serde_json::Value) -> Self {
        let fields = value
            .as_object()
            .map(|object| {
                object
                    .iter()
                    .map(|(key, field)| (key.clone(), WireValue::from_proto_json(field)))
                    .collect()
            })
            .unwrap_or_default();

        Struct { fields }
    }
}
