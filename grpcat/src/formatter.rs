//! Colored rendering of descriptors and statuses for the terminal.
//!
//! `describe` output is proto-shaped but interactive: keywords in cyan,
//! names in green, types in yellow. The plain `.proto` renderer used for
//! schema export lives in `grpcat_core::descriptor::print`.
use colored::{ColoredString, Colorize as _};
use grpcat_core::descriptor::source::Symbol;
use grpcat_core::prost_reflect::{
    EnumDescriptor, EnumValueDescriptor, FieldDescriptor, Kind, MessageDescriptor,
    MethodDescriptor, OneofDescriptor, ServiceDescriptor,
};
use grpcat_core::tonic::Status;

/// Renders the body of a `describe` for any symbol kind.
pub fn describe_symbol(symbol: &Symbol) -> String {
    match symbol {
        Symbol::Service(descriptor) => describe_service(descriptor),
        Symbol::Method(descriptor) => describe_method(descriptor),
        Symbol::Message(descriptor) => describe_message(descriptor),
        Symbol::Field(descriptor) => describe_field(descriptor),
        Symbol::Oneof(descriptor) => describe_oneof(descriptor),
        Symbol::Enum(descriptor) => describe_enum(descriptor),
        Symbol::EnumValue(descriptor) => describe_enum_value(descriptor),
    }
}

/// The grammatical article for a symbol kind, for "X is a service:" lines.
pub fn article(kind: &str) -> &'static str {
    if kind.starts_with('e') { "an" } else { "a" }
}

pub fn format_status(status: &Status) -> String {
    format!(
        "{} code={:?} message={:?}",
        "gRPC Failed:".red().bold(),
        status.code(),
        status.message()
    )
}

fn describe_service(service: &ServiceDescriptor) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} {} {{\n",
        "service".cyan(),
        service.name().green()
    ));
    for method in service.methods() {
        out.push_str("  ");
        out.push_str(&describe_method(&method));
        out.push('\n');
    }
    out.push('}');
    out
}

fn describe_method(method: &MethodDescriptor) -> String {
    let input_stream = if method.is_client_streaming() {
        format!("{} ", "stream".cyan())
    } else {
        String::new()
    };
    let output_stream = if method.is_server_streaming() {
        format!("{} ", "stream".cyan())
    } else {
        String::new()
    };

    format!(
        "{} {} ( {}{} ) {} ( {}{} );",
        "rpc".cyan(),
        method.name().green(),
        input_stream,
        method.input().full_name().yellow(),
        "returns".cyan(),
        output_stream,
        method.output().full_name().yellow()
    )
}

fn describe_message(message: &MessageDescriptor) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} {} {{\n",
        "message".cyan(),
        message.name().green()
    ));
    for field in message.fields() {
        out.push_str("  ");
        out.push_str(&field_line(&field));
        out.push('\n');
    }
    out.push('}');
    out
}

fn field_line(field: &FieldDescriptor) -> String {
    if field.is_map() {
        // map fields point at a synthetic entry message with key/value fields
        if let Kind::Message(entry) = field.kind() {
            return format!(
                "{}<{}, {}> {} = {};",
                "map".cyan(),
                kind_name(&entry.map_entry_key_field().kind()),
                kind_name(&entry.map_entry_value_field().kind()),
                field.name(),
                field.number()
            );
        }
    }

    let label = if field.is_list() {
        format!("{} ", "repeated".cyan())
    } else {
        String::new()
    };
    format!(
        "{}{} {} = {};",
        label,
        kind_name(&field.kind()),
        field.name(),
        field.number()
    )
}

fn kind_name(kind: &Kind) -> ColoredString {
    match kind {
        Kind::Double => "double".yellow(),
        Kind::Float => "float".yellow(),
        Kind::Int32 => "int32".yellow(),
        Kind::Int64 => "int64".yellow(),
        Kind::Uint32 => "uint32".yellow(),
        Kind::Uint64 => "uint64".yellow(),
        Kind::Sint32 => "sint32".yellow(),
        Kind::Sint64 => "sint64".yellow(),
        Kind::Fixed32 => "fixed32".yellow(),
        Kind::Fixed64 => "fixed64".yellow(),
        Kind::Sfixed32 => "sfixed32".yellow(),
        Kind::Sfixed64 => "sfixed64".yellow(),
        Kind::Bool => "bool".yellow(),
        Kind::String => "string".yellow(),
        Kind::Bytes => "bytes".yellow(),
        Kind::Message(message) => message.full_name().yellow(),
        Kind::Enum(enumeration) => enumeration.full_name().yellow(),
    }
}

fn describe_field(field: &FieldDescriptor) -> String {
    field_line(field)
}

fn describe_oneof(oneof: &OneofDescriptor) -> String {
    let mut out = String::new();
    out.push_str(&format!("{} {} {{\n", "oneof".cyan(), oneof.name().green()));
    for field in oneof.fields() {
        out.push_str("  ");
        out.push_str(&field_line(&field));
        out.push('\n');
    }
    out.push('}');
    out
}

fn describe_enum(enumeration: &EnumDescriptor) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} {} {{\n",
        "enum".cyan(),
        enumeration.name().green()
    ));
    for value in enumeration.values() {
        out.push_str(&format!(
            "  {} = {};\n",
            value.name(),
            value.number().to_string().purple()
        ));
    }
    out.push('}');
    out
}

fn describe_enum_value(value: &EnumValueDescriptor) -> String {
    format!("{} = {};", value.name(), value.number().to_string().purple())
}
