//! Protobuf text-format request parsing.
//!
//! Messages are separated by the ASCII Record Separator byte (0x1E). Empty
//! text is a valid message, so input with no separator yields exactly one
//! message and input ending in a separator yields a final empty message
//! after it.
use super::{RequestParseError, RequestParser, TEXT_SEPARATOR};
use prost_reflect::{DynamicMessage, MessageDescriptor};
use std::io::{self, BufRead, BufReader};

pub struct TextRequestParser<R: io::Read> {
    reader: BufReader<R>,
    request_count: usize,
    done: bool,
}

impl TextRequestParser<Box<dyn io::Read + Send>> {
    pub fn new(input: Box<dyn io::Read + Send>) -> Self {
        Self {
            reader: BufReader::new(input),
            request_count: 0,
            done: false,
        }
    }
}

impl<R: io::Read> RequestParser for TextRequestParser<R> {
    fn next_message(
        &mut self,
        descriptor: &MessageDescriptor,
    ) -> Result<Option<DynamicMessage>, RequestParseError> {
        if self.done {
            return Ok(None);
        }
        let mut buf = Vec::new();
        self.reader.read_until(TEXT_SEPARATOR, &mut buf)?;
        if buf.last() == Some(&TEXT_SEPARATOR) {
            buf.pop();
        } else {
            // End of input reached with no separator: this chunk (possibly
            // empty) is the final message.
            self.done = true;
        }

        self.request_count += 1;
        let text = std::str::from_utf8(&buf).map_err(|_| RequestParseError::InvalidUtf8)?;
        let message = DynamicMessage::parse_text_format(descriptor.clone(), text)
            .map_err(RequestParseError::Text)?;
        Ok(Some(message))
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

    fn parser(input: &[u8]) -> TextRequestParser<Box<dyn io::Read + Send>> {
        TextRequestParser::new(Box::new(io::Cursor::new(input.to_vec())))
    }

    fn drain(parser: &mut impl RequestParser) -> Vec<DynamicMessage> {
        let desc = request_descriptor();
        let mut out = Vec::new();
        while let Some(message) = parser.next_message(&desc).unwrap() {
            out.push(message);
        }
        out
    }

    #[test]
    fn no_separator_yields_one_message() {
        let mut parser = parser(b"payload { body: \"abc\" }");
        let messages = drain(&mut parser);
        assert_eq!(messages.len(), 1);
        assert_eq!(parser.num_requests(), 1);
    }

    #[test]
    fn empty_input_yields_one_empty_message() {
        let mut parser = parser(b"");
        let messages = drain(&mut parser);
        assert_eq!(messages.len(), 1);
        // end of input stays terminal
        assert!(parser.next_message(&request_descriptor()).unwrap().is_none());
    }

    #[test]
    fn separator_splits_messages() {
        let mut parser = parser(b"payload { body: \"a\" }\x1epayload { body: \"b\" }");
        assert_eq!(drain(&mut parser).len(), 2);
    }

    #[test]
    fn trailing_separator_appends_empty_message() {
        let mut parser = parser(b"payload { body: \"a\" }\x1e");
        let messages = drain(&mut parser);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], DynamicMessage::new(request_descriptor()));
    }

    #[test]
    fn invalid_text_is_a_parse_error() {
        let mut parser = parser(b"not a field assignment!");
        let err = parser.next_message(&request_descriptor()).unwrap_err();
        assert!(err.to_string().contains("invalid request data"));
    }
}
