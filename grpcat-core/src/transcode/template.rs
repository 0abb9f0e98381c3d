//! JSON skeletons for request messages.
//!
//! `describe --msg-template` prints a JSON object a user can fill in and
//! feed back through `-d`. Every field appears with its default value, and
//! well-known types use their canonical JSON shapes so the template parses
//! back cleanly.
use prost_reflect::{FieldDescriptor, Kind, MessageDescriptor};
use serde_json::{Map, Value, json};
use std::collections::HashSet;

/// Builds the JSON template for a message type.
pub fn message_template(descriptor: &MessageDescriptor) -> Value {
    let mut in_progress = HashSet::new();
    template_for_message(descriptor, &mut in_progress)
}

fn template_for_message(descriptor: &MessageDescriptor, in_progress: &mut HashSet<String>) -> Value {
    match descriptor.full_name() {
        "google.protobuf.Timestamp" => json!("1970-01-01T00:00:00Z"),
        "google.protobuf.Duration" => json!("0s"),
        "google.protobuf.Empty" | "google.protobuf.Struct" => json!({}),
        "google.protobuf.ListValue" => json!([]),
        "google.protobuf.Value" => Value::Null,
        "google.protobuf.Any" => json!({ "@type": "" }),
        "google.protobuf.FieldMask" => json!(""),
        "google.protobuf.DoubleValue" | "google.protobuf.FloatValue" => json!(0),
        "google.protobuf.Int32Value" | "google.protobuf.UInt32Value" => json!(0),
        "google.protobuf.Int64Value" | "google.protobuf.UInt64Value" => json!("0"),
        "google.protobuf.BoolValue" => json!(false),
        "google.protobuf.StringValue" => json!(""),
        "google.protobuf.BytesValue" => Value::Null,
        full_name => {
            if !in_progress.insert(full_name.to_string()) {
                // Recursive message type, stop at an empty object.
                return json!({});
            }
            let mut object = Map::new();
            for field in descriptor.fields() {
                object.insert(
                    field.json_name().to_string(),
                    template_for_field(&field, in_progress),
                );
            }
            in_progress.remove(full_name);
            Value::Object(object)
        }
    }
}

fn template_for_field(field: &FieldDescriptor, in_progress: &mut HashSet<String>) -> Value {
    if field.is_map() {
        return json!({});
    }
    if field.is_list() {
        return json!([]);
    }
    template_for_kind(&field.kind(), in_progress)
}

fn template_for_kind(kind: &Kind, in_progress: &mut HashSet<String>) -> Value {
    match kind {
        Kind::Double | Kind::Float => json!(0),
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => json!(0),
        Kind::Uint32 | Kind::Fixed32 => json!(0),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => json!("0"),
        Kind::Uint64 | Kind::Fixed64 => json!("0"),
        Kind::Bool => json!(false),
        Kind::String => json!(""),
        Kind::Bytes => Value::Null,
        Kind::Message(message) => template_for_message(message, in_progress),
        Kind::Enum(enumeration) => json!(
            enumeration
                .values()
                .next()
                .map(|v| v.name().to_string())
                .unwrap_or_default()
        ),
    }
}
