//! Dynamic metadata.
//!
//! Values cross the boundary in the protobuf structured-value encoding:
//! `google.protobuf.Value` for writes and `google.protobuf.Struct` for a whole
//! namespace on reads. On the extension side they are `serde_json` values.

use prost::Message;
use prost_types::value::Kind;
use prost_types::{ListValue, Struct, Value};
use serde::Serialize;
use serde_json::{Map, Number};

use hostlink_capi::AsyncBuffer;
use hostlink_core::{BridgeError, BridgeResult, MetadataError, Operation};

use crate::request::HttpRequest;

/// Largest magnitude at which every integer is exactly representable as `f64`.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0; // 2^53

/// Convert a JSON value into a structured value.
pub fn to_proto_value(value: &serde_json::Value) -> Value {
    let kind = match value {
        serde_json::Value::Null => Kind::NullValue(prost_types::NullValue::NullValue as i32),
        serde_json::Value::Bool(b) => Kind::BoolValue(*b),
        serde_json::Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Kind::StringValue(s.clone()),
        serde_json::Value::Array(items) => Kind::ListValue(ListValue {
            values: items.iter().map(to_proto_value).collect(),
        }),
        serde_json::Value::Object(map) => Kind::StructValue(to_proto_struct(map)),
    };
    Value { kind: Some(kind) }
}

/// Convert a JSON object into a structured value map.
pub fn to_proto_struct(map: &Map<String, serde_json::Value>) -> Struct {
    Struct {
        fields: map
            .iter()
            .map(|(key, value)| (key.clone(), to_proto_value(value)))
            .collect(),
    }
}

/// Convert a structured value into JSON.
///
/// Integral numbers within ±2^53 become JSON integers, other numbers JSON
/// floats. A value without a kind reads as `null`.
pub fn from_proto_value(value: &Value) -> Result<serde_json::Value, MetadataError> {
    Ok(match &value.kind {
        None | Some(Kind::NullValue(_)) => serde_json::Value::Null,
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(*b),
        Some(Kind::NumberValue(n)) => serde_json::Value::Number(number(*n)?),
        Some(Kind::StringValue(s)) => serde_json::Value::String(s.clone()),
        Some(Kind::ListValue(list)) => serde_json::Value::Array(
            list.values
                .iter()
                .map(from_proto_value)
                .collect::<Result<_, _>>()?,
        ),
        Some(Kind::StructValue(fields)) => serde_json::Value::Object(from_proto_struct(fields)?),
    })
}

/// Convert a structured value map into a JSON object.
pub fn from_proto_struct(fields: &Struct) -> Result<Map<String, serde_json::Value>, MetadataError> {
    fields
        .fields
        .iter()
        .map(|(key, value)| Ok((key.clone(), from_proto_value(value)?)))
        .collect()
}

fn number(n: f64) -> Result<Number, MetadataError> {
    if !n.is_finite() {
        return Err(MetadataError::NonFiniteNumber(n));
    }
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return Ok(Number::from(n as i64));
    }
    Number::from_f64(n).ok_or(MetadataError::NonFiniteNumber(n))
}

/// Encode one value for a metadata write.
pub fn encode_value(value: &serde_json::Value) -> Vec<u8> {
    to_proto_value(value).encode_to_vec()
}

/// Decode a namespace read. An empty result is an empty namespace.
pub fn decode_struct(bytes: &[u8]) -> Result<Map<String, serde_json::Value>, MetadataError> {
    if bytes.is_empty() {
        return Ok(Map::new());
    }
    let fields = Struct::decode(bytes)?;
    from_proto_struct(&fields)
}

impl HttpRequest {
    /// Read every key of a metadata namespace.
    ///
    /// The host may complete the read from another thread; the call blocks
    /// until it does, or until the configured wait timeout.
    pub fn get_dynamic_metadata(&self, namespace: &str) -> BridgeResult<Map<String, serde_json::Value>> {
        let bridge = self.bridge();
        let out = AsyncBuffer::new();
        bridge.async_call(self.handle(), Operation::GetDynamicMetadata, |capi, completer| {
            capi.get_dynamic_metadata(self.handle(), namespace, out.clone(), completer)
        })?;

        let bytes = out.take();
        bridge
            .metrics()
            .record_bytes_in(Operation::GetDynamicMetadata, bytes.len());
        decode_struct(&bytes).map_err(|source| {
            let err = BridgeError::Metadata(source);
            bridge.failed(self.handle(), Operation::GetDynamicMetadata, &err);
            err
        })
    }

    /// Store one value under `namespace.key`.
    pub fn set_dynamic_metadata(
        &self,
        namespace: &str,
        key: &str,
        value: &serde_json::Value,
    ) -> BridgeResult<()> {
        let encoded = encode_value(value);
        self.bridge()
            .sync_call(self.handle(), Operation::SetDynamicMetadata, |capi| {
                capi.set_dynamic_metadata(self.handle(), namespace, key, &encoded)
            })?;
        self.bridge()
            .metrics()
            .record_bytes_out(Operation::SetDynamicMetadata, encoded.len());
        Ok(())
    }

    /// Store any serializable value under `namespace.key`.
    pub fn set_dynamic_metadata_as<T: Serialize + ?Sized>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
    ) -> BridgeResult<()> {
        let value = serde_json::to_value(value).map_err(MetadataError::from)?;
        self.set_dynamic_metadata(namespace, key, &value)
    }
}
