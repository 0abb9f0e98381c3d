//! Plain-text rendering of descriptors as `.proto` source.
//!
//! Works directly off the raw `FileDescriptorProto` so the output reflects
//! exactly what the descriptor set carries. Used by schema export and by the
//! verbose event printer; the CLI has its own colored sibling for
//! interactive `describe` output.
use prost_reflect::MethodDescriptor;
use prost_types::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorProto,
    ServiceDescriptorProto, field_descriptor_proto,
};
use std::collections::HashSet;
use std::fmt::Write as _;

/// Renders a whole file as `.proto` source.
pub fn file_to_proto(file: &FileDescriptorProto) -> String {
    let mut out = String::new();
    if !file.syntax().is_empty() {
        let _ = writeln!(out, "syntax = \"{}\";", file.syntax());
        out.push('\n');
    }
    if !file.package().is_empty() {
        let _ = writeln!(out, "package {};", file.package());
        out.push('\n');
    }
    if !file.dependency.is_empty() {
        for dep in &file.dependency {
            let _ = writeln!(out, "import \"{dep}\";");
        }
        out.push('\n');
    }

    let scope = if file.package().is_empty() {
        String::new()
    } else {
        format!("{}.", file.package())
    };

    for message in &file.message_type {
        print_message(&mut out, message, &scope, 0);
        out.push('\n');
    }
    for enumeration in &file.enum_type {
        print_enum(&mut out, enumeration, 0);
        out.push('\n');
    }
    print_extensions(&mut out, &file.extension, 0);
    for service in &file.service {
        print_service(&mut out, service);
        out.push('\n');
    }

    // single trailing newline
    while out.ends_with("\n\n") {
        out.pop();
    }
    out
}

fn indent(out: &mut String, level: usize) {
    for _ in 0..level {
        out.push_str("  ");
    }
}

fn print_message(out: &mut String, message: &DescriptorProto, scope: &str, level: usize) {
    let full_name = format!("{scope}{}", message.name());

    indent(out, level);
    let _ = writeln!(out, "message {} {{", message.name());

    // Map fields reference synthetic nested entry messages; resolve them so
    // the field renders as map<key, value>.
    let map_entries: HashSet<String> = message
        .nested_type
        .iter()
        .filter(|nested| nested.options.as_ref().is_some_and(|o| o.map_entry()))
        .map(|nested| format!("{full_name}.{}", nested.name()))
        .collect();

    let synthetic_oneofs: HashSet<i32> = message
        .field
        .iter()
        .filter(|f| f.proto3_optional())
        .filter_map(|f| f.oneof_index)
        .collect();

    for field in &message.field {
        if field
            .oneof_index
            .is_some_and(|idx| !synthetic_oneofs.contains(&idx))
        {
            continue; // printed inside its oneof block
        }
        print_field(out, field, message, &full_name, &map_entries, level + 1);
    }

    for (index, oneof) in message.oneof_decl.iter().enumerate() {
        let index = index as i32;
        if synthetic_oneofs.contains(&index) {
            continue;
        }
        indent(out, level + 1);
        let _ = writeln!(out, "oneof {} {{", oneof.name());
        for field in message
            .field
            .iter()
            .filter(|f| f.oneof_index == Some(index))
        {
            print_field(out, field, message, &full_name, &map_entries, level + 2);
        }
        indent(out, level + 1);
        out.push_str("}\n");
    }

    for nested in &message.nested_type {
        if nested.options.as_ref().is_some_and(|o| o.map_entry()) {
            continue;
        }
        print_message(out, nested, &format!("{full_name}."), level + 1);
    }
    for enumeration in &message.enum_type {
        print_enum(out, enumeration, level + 1);
    }
    print_extensions(out, &message.extension, level + 1);

    indent(out, level);
    out.push_str("}\n");
}

fn print_field(
    out: &mut String,
    field: &FieldDescriptorProto,
    message: &DescriptorProto,
    message_full_name: &str,
    map_entries: &HashSet<String>,
    level: usize,
) {
    indent(out, level);

    let type_name = trimmed_type_name(field);
    if map_entries.contains(&type_name) {
        if let Some(entry) = message
            .nested_type
            .iter()
            .find(|n| format!("{message_full_name}.{}", n.name()) == type_name)
        {
            let key = entry
                .field
                .iter()
                .find(|f| f.number() == 1)
                .map(trimmed_type_name)
                .unwrap_or_default();
            let value = entry
                .field
                .iter()
                .find(|f| f.number() == 2)
                .map(trimmed_type_name)
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "map<{key}, {value}> {} = {};",
                field.name(),
                field.number()
            );
            return;
        }
    }

    let label = match field.label() {
        field_descriptor_proto::Label::Repeated => "repeated ",
        field_descriptor_proto::Label::Required => "required ",
        field_descriptor_proto::Label::Optional if field.proto3_optional() => "optional ",
        field_descriptor_proto::Label::Optional => "",
    };
    let _ = writeln!(out, "{label}{type_name} {} = {};", field.name(), field.number());
}

fn trimmed_type_name(field: &FieldDescriptorProto) -> String {
    use field_descriptor_proto::Type;
    match field.r#type() {
        Type::Double => "double".to_string(),
        Type::Float => "float".to_string(),
        Type::Int32 => "int32".to_string(),
        Type::Int64 => "int64".to_string(),
        Type::Uint32 => "uint32".to_string(),
        Type::Uint64 => "uint64".to_string(),
        Type::Sint32 => "sint32".to_string(),
        Type::Sint64 => "sint64".to_string(),
        Type::Fixed32 => "fixed32".to_string(),
        Type::Fixed64 => "fixed64".to_string(),
        Type::Sfixed32 => "sfixed32".to_string(),
        Type::Sfixed64 => "sfixed64".to_string(),
        Type::Bool => "bool".to_string(),
        Type::String => "string".to_string(),
        Type::Bytes => "bytes".to_string(),
        Type::Group | Type::Message | Type::Enum => {
            field.type_name().trim_start_matches('.').to_string()
        }
    }
}

fn print_enum(out: &mut String, enumeration: &EnumDescriptorProto, level: usize) {
    indent(out, level);
    let _ = writeln!(out, "enum {} {{", enumeration.name());
    for value in &enumeration.value {
        indent(out, level + 1);
        let _ = writeln!(out, "{} = {};", value.name(), value.number());
    }
    indent(out, level);
    out.push_str("}\n");
}

fn print_extensions(out: &mut String, extensions: &[FieldDescriptorProto], level: usize) {
    let mut extendees: Vec<&str> = Vec::new();
    for extension in extensions {
        if !extendees.contains(&extension.extendee()) {
            extendees.push(extension.extendee());
        }
    }
    for extendee in extendees {
        indent(out, level);
        let _ = writeln!(out, "extend {} {{", extendee.trim_start_matches('.'));
        for extension in extensions.iter().filter(|e| e.extendee() == extendee) {
            indent(out, level + 1);
            let _ = writeln!(
                out,
                "{} {} = {};",
                trimmed_type_name(extension),
                extension.name(),
                extension.number()
            );
        }
        indent(out, level);
        out.push_str("}\n\n");
    }
}

fn print_service(out: &mut String, service: &ServiceDescriptorProto) {
    let _ = writeln!(out, "service {} {{", service.name());
    for method in &service.method {
        let client_stream = if method.client_streaming() { "stream " } else { "" };
        let server_stream = if method.server_streaming() { "stream " } else { "" };
        let _ = writeln!(
            out,
            "  rpc {} ( {client_stream}{} ) returns ( {server_stream}{} );",
            method.name(),
            method.input_type().trim_start_matches('.'),
            method.output_type().trim_start_matches('.'),
        );
    }
    out.push_str("}\n");
}

/// One-line signature of a method, used by the verbose event printer.
pub fn method_signature(method: &MethodDescriptor) -> String {
    let client_stream = if method.is_client_streaming() { "stream " } else { "" };
    let server_stream = if method.is_server_streaming() { "stream " } else { "" };
    format!(
        "rpc {} ( {client_stream}{} ) returns ( {server_stream}{} );",
        method.name(),
        method.input().full_name(),
        method.output().full_name(),
    )
}
