//! # Transcoding
//!
//! The bridge between textual data and [`DynamicMessage`]s, in both
//! directions:
//!
//! * a [`RequestParser`] lazily turns an input stream into a sequence of
//!   request messages;
//! * a [`ResponseFormatter`] renders each response message back into text.
//!
//! Two formats are supported. **JSON** follows the canonical proto3 JSON
//! mapping (well-known types included); multiple messages are simply
//! concatenated values. **Protobuf text** separates messages with the ASCII
//! Record Separator byte (0x1E).
use prost_reflect::{DynamicMessage, MessageDescriptor, SerializeOptions, text_format};
use std::io;
use std::str::FromStr;

pub mod json;
pub mod template;
pub mod text;

pub use json::JsonRequestParser;
pub use text::TextRequestParser;

/// ASCII Record Separator, the delimiter between text-format messages.
pub(crate) const TEXT_SEPARATOR: u8 = 0x1e;

/// The request/response text format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Text,
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Format::Json),
            "text" => Ok(Format::Text),
            other => Err(format!("unknown format: {other}")),
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Json => f.write_str("json"),
            Format::Text => f.write_str("text"),
        }
    }
}

/// Options shared by parsers and formatters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TranscodeOptions {
    /// Emit fields with default values in JSON output.
    pub emit_defaults: bool,
    /// Accept unknown field names in JSON input instead of rejecting them.
    pub allow_unknown_fields: bool,
    /// Prefix text-format messages after the first with the 0x1E separator.
    pub include_text_separator: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RequestParseError {
    #[error("invalid request data: '{0}'")]
    Json(#[source] serde_json::Error),
    #[error("invalid request data: '{0}'")]
    Text(#[source] text_format::ParseError),
    #[error("invalid request data: input is not valid UTF-8")]
    InvalidUtf8,
    #[error("failed to read request data: '{0}'")]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("failed to format response message: '{0}'")]
    Json(#[source] serde_json::Error),
    #[error("formatted response is not valid UTF-8")]
    InvalidUtf8,
}

/// Parses an input stream into request messages, one at a time.
///
/// `next_message` returns `Ok(None)` once input is exhausted, and keeps
/// returning it on further calls. A parse error aborts the whole RPC.
pub trait RequestParser {
    fn next_message(
        &mut self,
        descriptor: &MessageDescriptor,
    ) -> Result<Option<DynamicMessage>, RequestParseError>;

    /// Number of messages parsed so far.
    fn num_requests(&self) -> usize;
}

impl<P: RequestParser + ?Sized> RequestParser for Box<P> {
    fn next_message(
        &mut self,
        descriptor: &MessageDescriptor,
    ) -> Result<Option<DynamicMessage>, RequestParseError> {
        (**self).next_message(descriptor)
    }

    fn num_requests(&self) -> usize {
        (**self).num_requests()
    }
}

/// Renders response messages into strings.
///
/// Stateless except for the separator counter in text mode.
pub enum ResponseFormatter {
    Json { emit_defaults: bool },
    Text {
        include_separator: bool,
        num_formatted: usize,
    },
}

impl ResponseFormatter {
    pub fn json(emit_defaults: bool) -> Self {
        ResponseFormatter::Json { emit_defaults }
    }

    pub fn text(include_separator: bool) -> Self {
        ResponseFormatter::Text {
            include_separator,
            num_formatted: 0,
        }
    }

    pub fn format(&mut self, message: &DynamicMessage) -> Result<String, FormatError> {
        match self {
            ResponseFormatter::Json { emit_defaults } => {
                let mut buf = Vec::new();
                let mut serializer = serde_json::Serializer::with_formatter(
                    &mut buf,
                    serde_json::ser::PrettyFormatter::with_indent(b"  "),
                );
                let options = SerializeOptions::new().skip_default_fields(!*emit_defaults);
                message
                    .serialize_with_options(&mut serializer, &options)
                    .map_err(FormatError::Json)?;
                String::from_utf8(buf).map_err(|_| FormatError::InvalidUtf8)
            }
            ResponseFormatter::Text {
                include_separator,
                num_formatted,
            } => {
                let mut out = String::new();
                if *include_separator && *num_formatted > 0 {
                    out.push(TEXT_SEPARATOR as char);
                }
                let options = text_format::FormatOptions::new().pretty(true);
                let body = message.to_text_format_with_options(&options);
                out.push_str(body.trim_end_matches('\n'));
                *num_formatted += 1;
                Ok(out)
            }
        }
    }
}

/// Builds the request parser and response formatter for the given format,
/// reading request data from `input`.
pub fn request_parser_and_formatter(
    format: Format,
    options: TranscodeOptions,
    input: Box<dyn io::Read + Send>,
) -> (Box<dyn RequestParser + Send>, ResponseFormatter) {
    match format {
        Format::Json => (
            Box::new(JsonRequestParser::new(input, options.allow_unknown_fields)),
            ResponseFormatter::json(options.emit_defaults),
        ),
        Format::Text => (
            Box::new(TextRequestParser::new(input)),
            ResponseFormatter::text(options.include_text_separator),
        ),
    }
}
