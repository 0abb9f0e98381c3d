use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use grpcat_core::descriptor::source::{FileSource, SourceError};
use grpcat_core::invoke::{InvocationEventHandler, InvokeError, invoke_rpc};
use grpcat_core::transcode::{RequestParseError, RequestParser};
use interop_service::{FILE_DESCRIPTOR_SET, TestServiceServer};
use prost::Message as _;
use prost_reflect::{DynamicMessage, MessageDescriptor, MethodDescriptor};
use prost_types::FileDescriptorSet;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use test_service_impl::TestServiceImpl;
use tonic::{Code, Status, metadata::MetadataMap};

mod test_service_impl;

fn file_source() -> FileSource {
    let set = FileDescriptorSet::decode(FILE_DESCRIPTOR_SET).expect("valid descriptor set");
    FileSource::from_file_descriptor_set(set).expect("valid source")
}

fn server() -> TestServiceServer<TestServiceImpl> {
    TestServiceServer::new(TestServiceImpl)
}

/// Records every event so tests can assert the exact sequence.
#[derive(Default)]
struct EventSpy {
    events: Vec<&'static str>,
    responses: Vec<serde_json::Value>,
    status: Option<Status>,
}

impl InvocationEventHandler for EventSpy {
    fn on_resolve_method(&mut self, _method: &MethodDescriptor) {
        self.events.push("resolve-method");
    }

    fn on_send_headers(&mut self, _metadata: &MetadataMap) {
        self.events.push("send-headers");
    }

    fn on_receive_headers(&mut self, _metadata: &MetadataMap) {
        self.events.push("recv-headers");
    }

    fn on_receive_response(&mut self, response: &DynamicMessage) {
        self.events.push("recv-response");
        self.responses
            .push(serde_json::to_value(response).expect("response serializes"));
    }

    fn on_receive_trailers(&mut self, status: &Status, _metadata: &MetadataMap) {
        self.events.push("recv-trailers");
        self.status = Some(status.clone());
    }
}

impl EventSpy {
    fn assert_grammar(&self, expected_responses: usize) {
        let mut expected = vec!["resolve-method", "send-headers", "recv-headers"];
        expected.extend(std::iter::repeat_n("recv-response", expected_responses));
        expected.push("recv-trailers");
        assert_eq!(self.events, expected);
    }

    fn code(&self) -> Code {
        self.status.as_ref().expect("trailers were delivered").code()
    }
}

/// Feeds a fixed list of JSON values, counting every call for the
/// supplier-invocation properties.
struct ScriptedParser {
    messages: VecDeque<serde_json::Value>,
    calls: Arc<AtomicUsize>,
    parsed: usize,
}

impl ScriptedParser {
    fn new(messages: Vec<serde_json::Value>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                messages: messages.into(),
                calls: calls.clone(),
                parsed: 0,
            },
            calls,
        )
    }
}

impl RequestParser for ScriptedParser {
    fn next_message(
        &mut self,
        descriptor: &MessageDescriptor,
    ) -> Result<Option<DynamicMessage>, RequestParseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.messages.pop_front() {
            None => Ok(None),
            Some(value) => {
                let message = DynamicMessage::deserialize(descriptor.clone(), value)
                    .map_err(RequestParseError::Json)?;
                self.parsed += 1;
                Ok(Some(message))
            }
        }
    }

    fn num_requests(&self) -> usize {
        self.parsed
    }
}

#[tokio::test]
async fn unary_call_round_trips_payload() {
    let source = file_source();
    let body = "SXQncyBCdXNpbmVzcyBUaW1l";
    let (parser, _) = ScriptedParser::new(vec![json!({ "payload": { "body": body } })]);
    let mut spy = EventSpy::default();

    invoke_rpc(
        &source,
        server(),
        "grpcat.testing.TestService/UnaryCall",
        &[],
        None,
        &mut spy,
        parser,
    )
    .await
    .unwrap();

    spy.assert_grammar(1);
    assert_eq!(spy.code(), Code::Ok);
    assert_eq!(spy.responses[0]["payload"]["body"], body);
}

#[tokio::test]
async fn dot_separated_symbols_resolve() {
    let source = file_source();
    let (parser, _) = ScriptedParser::new(vec![json!({})]);
    let mut spy = EventSpy::default();

    invoke_rpc(
        &source,
        server(),
        "grpcat.testing.TestService.UnaryCall",
        &[],
        None,
        &mut spy,
        parser,
    )
    .await
    .unwrap();

    assert_eq!(spy.code(), Code::Ok);
}

#[tokio::test]
async fn client_stream_fail_fast() {
    let source = file_source();
    let (parser, calls) = ScriptedParser::new(vec![
        json!({ "payload": { "body": "YQ==" } }),
        json!({ "payload": { "body": "Yg==" } }),
        json!({ "payload": { "body": "Yw==" } }),
    ]);
    let mut spy = EventSpy::default();

    invoke_rpc(
        &source,
        server(),
        "grpcat.testing.TestService/StreamingInputCall",
        &["fail-early: 3".to_string()],
        None,
        &mut spy,
        parser,
    )
    .await
    .unwrap();

    assert_eq!(spy.responses.len(), 0);
    assert_eq!(spy.code(), Code::InvalidArgument);
    // 3 messages plus at most one end-of-input probe; the server closing
    // early may cut the supplier off sooner.
    assert!(calls.load(Ordering::SeqCst) <= 4);
    // headers (empty) and trailers are still delivered exactly once each
    assert_eq!(
        spy.events
            .iter()
            .filter(|event| **event == "recv-headers")
            .count(),
        1
    );
    assert_eq!(
        spy.events
            .iter()
            .filter(|event| **event == "recv-trailers")
            .count(),
        1
    );
}

#[tokio::test]
async fn client_stream_aggregates_payload_sizes() {
    let source = file_source();
    let (parser, calls) = ScriptedParser::new(vec![
        json!({ "payload": { "body": BASE64.encode("hello") } }),
        json!({ "payload": { "body": BASE64.encode("world!") } }),
    ]);
    let mut spy = EventSpy::default();

    invoke_rpc(
        &source,
        server(),
        "grpcat.testing.TestService/StreamingInputCall",
        &[],
        None,
        &mut spy,
        parser,
    )
    .await
    .unwrap();

    spy.assert_grammar(1);
    assert_eq!(spy.code(), Code::Ok);
    assert_eq!(spy.responses[0]["aggregatedPayloadSize"], 11);
    // N messages plus exactly one end-of-input probe
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn server_stream_delivers_sized_responses_in_order() {
    let source = file_source();
    let sizes = [10, 20, 30, 40, 50];
    let (parser, _) = ScriptedParser::new(vec![json!({
        "responseParameters": sizes.iter().map(|s| json!({ "size": s })).collect::<Vec<_>>(),
    })]);
    let mut spy = EventSpy::default();

    invoke_rpc(
        &source,
        server(),
        "grpcat.testing.TestService/StreamingOutputCall",
        &[],
        None,
        &mut spy,
        parser,
    )
    .await
    .unwrap();

    spy.assert_grammar(sizes.len());
    assert_eq!(spy.code(), Code::Ok);
    for (response, expected) in spy.responses.iter().zip(sizes) {
        let body = response["payload"]["body"].as_str().unwrap();
        assert_eq!(BASE64.decode(body).unwrap().len(), expected);
    }
}

#[tokio::test]
async fn half_duplex_echoes_requests_in_order() {
    let source = file_source();
    let payloads = ["UDE=", "UDI=", "UDM="];
    let messages = payloads
        .iter()
        .map(|body| json!({ "payload": { "body": body } }))
        .collect();
    let (parser, _) = ScriptedParser::new(messages);
    let mut spy = EventSpy::default();

    invoke_rpc(
        &source,
        server(),
        "grpcat.testing.TestService/HalfDuplexCall",
        &[],
        None,
        &mut spy,
        parser,
    )
    .await
    .unwrap();

    spy.assert_grammar(payloads.len());
    assert_eq!(spy.code(), Code::Ok);
    for (response, expected) in spy.responses.iter().zip(payloads) {
        assert_eq!(response["payload"]["body"], expected);
    }
}

#[tokio::test]
async fn full_duplex_supplier_is_called_n_plus_one_times() {
    let source = file_source();
    let (parser, calls) = ScriptedParser::new(vec![json!({}), json!({})]);
    let mut spy = EventSpy::default();

    invoke_rpc(
        &source,
        server(),
        "grpcat.testing.TestService/FullDuplexCall",
        &[],
        None,
        &mut spy,
        parser,
    )
    .await
    .unwrap();

    assert_eq!(spy.code(), Code::Ok);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn parse_error_aborts_call_but_trailers_still_arrive() {
    let source = file_source();
    // the second "message" cannot deserialize into SimpleRequest-like input
    let (parser, _) = ScriptedParser::new(vec![
        json!({ "payload": { "body": "YQ==" } }),
        json!("not an object"),
    ]);
    let mut spy = EventSpy::default();

    let result = invoke_rpc(
        &source,
        server(),
        "grpcat.testing.TestService/StreamingInputCall",
        &[],
        None,
        &mut spy,
        parser,
    )
    .await;

    assert!(matches!(result, Err(InvokeError::Request(_))));
    assert_eq!(
        spy.events
            .iter()
            .filter(|event| **event == "recv-trailers")
            .count(),
        1
    );
}

#[tokio::test]
async fn unknown_service_reports_symbol_not_found() {
    let source = file_source();
    let (parser, _) = ScriptedParser::new(vec![]);
    let mut spy = EventSpy::default();

    let err = invoke_rpc(
        &source,
        server(),
        "grpcat.testing.GhostService/UnaryCall",
        &[],
        None,
        &mut spy,
        parser,
    )
    .await
    .unwrap_err();

    match err {
        InvokeError::Source(SourceError::SymbolNotFound(name)) => {
            assert_eq!(name, "grpcat.testing.GhostService");
        }
        other => panic!("expected SymbolNotFound, got: {other:?}"),
    }
    assert!(spy.events.is_empty());
}

#[tokio::test]
async fn unknown_method_is_an_error() {
    let source = file_source();
    let (parser, _) = ScriptedParser::new(vec![]);
    let mut spy = EventSpy::default();

    let err = invoke_rpc(
        &source,
        server(),
        "grpcat.testing.TestService/GhostMethod",
        &[],
        None,
        &mut spy,
        parser,
    )
    .await
    .unwrap_err();

    assert!(err.to_string().contains("GhostMethod"));
}

#[tokio::test]
async fn missing_separator_is_rejected() {
    let source = file_source();
    let (parser, _) = ScriptedParser::new(vec![]);
    let mut spy = EventSpy::default();

    let err = invoke_rpc(
        &source,
        server(),
        "NoSeparatorHere",
        &[],
        None,
        &mut spy,
        parser,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, InvokeError::InvalidMethodName(_)));
}

#[tokio::test]
async fn reply_headers_are_surfaced_through_events() {
    let source = file_source();
    let (parser, _) = ScriptedParser::new(vec![json!({})]);

    #[derive(Default)]
    struct HeaderSpy {
        header_value: Option<String>,
    }
    impl InvocationEventHandler for HeaderSpy {
        fn on_resolve_method(&mut self, _: &MethodDescriptor) {}
        fn on_send_headers(&mut self, _: &MetadataMap) {}
        fn on_receive_headers(&mut self, metadata: &MetadataMap) {
            self.header_value = metadata
                .get("x-echoed")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
        }
        fn on_receive_response(&mut self, _: &DynamicMessage) {}
        fn on_receive_trailers(&mut self, _: &Status, _: &MetadataMap) {}
    }

    let mut spy = HeaderSpy::default();
    invoke_rpc(
        &source,
        server(),
        "grpcat.testing.TestService/UnaryCall",
        &["reply-with-headers: x-echoed: pong".to_string()],
        None,
        &mut spy,
        parser,
    )
    .await
    .unwrap();

    assert_eq!(spy.header_value.as_deref(), Some("pong"));
}
