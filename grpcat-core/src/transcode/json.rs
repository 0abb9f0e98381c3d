//! JSON request parsing.
//!
//! Input is a lazy sequence of top-level JSON values, concatenated with or
//! without whitespace. Each value decodes into one request message following
//! the canonical proto3 JSON mapping, with `Any` resolved against the
//! message's descriptor pool.
use super::{RequestParseError, RequestParser};
use prost_reflect::{DeserializeOptions, DynamicMessage, MessageDescriptor};
use std::io;

pub struct JsonRequestParser<R: io::Read> {
    values: serde_json::StreamDeserializer<'static, serde_json::de::IoRead<R>, serde_json::Value>,
    allow_unknown_fields: bool,
    request_count: usize,
    done: bool,
}

impl JsonRequestParser<Box<dyn io::Read + Send>> {
    /// Creates a parser reading JSON from `input`. An empty input yields zero
    /// messages: the very first call to `next_message` reports end-of-input.
    pub fn new(input: Box<dyn io::Read + Send>, allow_unknown_fields: bool) -> Self {
        Self {
            values: serde_json::Deserializer::from_reader(input).into_iter(),
            allow_unknown_fields,
            request_count: 0,
            done: false,
        }
    }
}

impl<R: io::Read> RequestParser for JsonRequestParser<R> {
    fn next_message(
        &mut self,
        descriptor: &MessageDescriptor,
    ) -> Result<Option<DynamicMessage>, RequestParseError> {
        if self.done {
            return Ok(None);
        }
        match self.values.next() {
            None => {
                self.done = true;
                Ok(None)
            }
            Some(Err(err)) => {
                self.done = true;
                Err(RequestParseError::Json(err))
            }
            Some(Ok(value)) => {
                self.request_count += 1;
                let options =
                    DeserializeOptions::new().deny_unknown_fields(!self.allow_unknown_fields);
                let message =
                    DynamicMessage::deserialize_with_options(descriptor.clone(), value, &options)
                        .map_err(RequestParseError::Json)?;
                Ok(Some(message))
            }
        }
    }

    fn num_requests(&self) -> usize {
        self.request_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;
    use prost_reflect::DescriptorPool;
    use prost_types::FileDescriptorSet;

    fn request_descriptor() -> MessageDescriptor {
        let set = FileDescriptorSet::decode(interop_service::FILE_DESCRIPTOR_SET)
            .expect("valid descriptor set");
        let pool = DescriptorPool::from_file_descriptor_set(set).expect("valid pool");
        pool.get_message_by_name("grpcat.testing.SimpleRequest")
            .expect("message present")
    }

    fn parser(input: &str, allow_unknown: bool) -> JsonRequestParser<Box<dyn io::Read + Send>> {
        JsonRequestParser::new(Box::new(io::Cursor::new(input.to_string())), allow_unknown)
    }

    #[test]
    fn empty_input_yields_zero_messages() {
        let desc = request_descriptor();
        let mut parser = parser("", false);
        assert!(parser.next_message(&desc).unwrap().is_none());
        // idempotent after end of input
        assert!(parser.next_message(&desc).unwrap().is_none());
        assert_eq!(parser.num_requests(), 0);
    }

    #[test]
    fn parses_concatenated_messages() {
        let desc = request_descriptor();
        let mut parser = parser(
            r#"{"payload":{"body":"YQ=="}} {"payload":{"body":"Yg=="}}{"payload":{"body":"Yw=="}}"#,
            false,
        );
        let mut bodies = Vec::new();
        while let Some(message) = parser.next_message(&desc).unwrap() {
            let value = serde_json::to_value(&message).unwrap();
            bodies.push(value["payload"]["body"].as_str().unwrap().to_string());
        }
        assert_eq!(bodies, vec!["YQ==", "Yg==", "Yw=="]);
        assert_eq!(parser.num_requests(), 3);
    }

    #[test]
    fn rejects_unknown_fields_by_default() {
        let desc = request_descriptor();
        let mut parser = parser(r#"{"no_such_field": 1}"#, false);
        let err = parser.next_message(&desc).unwrap_err();
        assert!(err.to_string().contains("invalid request data"));
    }

    #[test]
    fn accepts_unknown_fields_when_allowed() {
        let desc = request_descriptor();
        let mut parser = parser(r#"{"no_such_field": 1}"#, true);
        assert!(parser.next_message(&desc).unwrap().is_some());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let desc = request_descriptor();
        let mut parser = parser(r#"{"payload": "#, false);
        assert!(parser.next_message(&desc).is_err());
    }
}
