//! # RPC Driver
//!
//! [`invoke_rpc`] is the single entry point for performing a call. It
//! resolves the method symbol through a descriptor source, selects the
//! streaming shape from the method descriptor, runs the send and receive
//! loops, and reports progress to an [`InvocationEventHandler`].
//!
//! Event order within one call is fixed: method-resolved, send-headers,
//! receive-headers (empty if the call failed before headers arrived), zero
//! or more responses, then exactly one trailers event. A non-OK gRPC status
//! is not an error return; it arrives through the trailers event and the
//! function returns success. Only transport-level failures and request
//! parse errors are returned as errors.
use crate::BoxError;
use crate::descriptor::print;
use crate::descriptor::source::{DescriptorSource, SourceError, Symbol};
use crate::grpc::client::{GrpcClient, GrpcRequestError};
use crate::metadata::{MetadataError, metadata_from_headers, metadata_to_string};
use crate::transcode::{RequestParseError, RequestParser, ResponseFormatter};
use http_body::Body as HttpBody;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use std::io;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Code, Status, client::GrpcService, metadata::MetadataMap};

/// Sink for the events of one invocation.
///
/// Callbacks run synchronously on the receive side of the call and must not
/// block indefinitely.
pub trait InvocationEventHandler {
    /// The method symbol was resolved to a descriptor. Called exactly once,
    /// first.
    fn on_resolve_method(&mut self, method: &MethodDescriptor);
    /// The request metadata is about to be sent. Called exactly once.
    fn on_send_headers(&mut self, metadata: &MetadataMap);
    /// The response headers arrived. Called exactly once, before any
    /// response; empty when the call failed before headers were received.
    fn on_receive_headers(&mut self, metadata: &MetadataMap);
    /// One response message arrived.
    fn on_receive_response(&mut self, response: &DynamicMessage);
    /// The call finished. Called exactly once, last, with the final status
    /// and trailers.
    fn on_receive_trailers(&mut self, status: &Status, metadata: &MetadataMap);
}

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("given method name '{0}' is not in expected format: 'service/method' or 'service.method'")]
    InvalidMethodName(String),
    #[error("'{0}' is not a service")]
    NotAService(String),
    #[error("service '{service}' does not include a method named '{method}'")]
    MethodNotFound { service: String, method: String },
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Request(#[from] RequestParseError),
    #[error("gRPC request failed: '{0}'")]
    Transport(#[from] GrpcRequestError),
    #[error("expected 1 response message for non-server-streaming method, got {0}")]
    UnexpectedResponseCount(usize),
}

/// Splits `service/method` or `service.method` at the last separator.
fn split_symbol(symbol: &str) -> Option<(&str, &str)> {
    let pos = symbol.rfind(['/', '.'])?;
    let (service, method) = (&symbol[..pos], &symbol[pos + 1..]);
    if service.is_empty() || method.is_empty() {
        return None;
    }
    Some((service, method))
}

/// Invokes `symbol` (`service/method` or `service.method`) over `service`,
/// reading request messages from `parser` and reporting events to `handler`.
///
/// Request messages are pulled lazily: non-client-streaming shapes take
/// exactly one message (end-of-input yields an empty message) and
/// half-close; client-streaming shapes drain the parser from a concurrent
/// sender until end-of-input, so for N messages the parser is called exactly
/// N+1 times. A parser error half-closes the send side, waits for the
/// server's trailers, and is then returned.
pub async fn invoke_rpc<S, H, P>(
    source: &dyn DescriptorSource,
    service: S,
    symbol: &str,
    headers: &[String],
    deadline: Option<Duration>,
    handler: &mut H,
    parser: P,
) -> Result<(), InvokeError>
where
    S: GrpcService<tonic::body::Body> + Send,
    S::Error: Into<BoxError>,
    S::Future: Send,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
    H: InvocationEventHandler,
    P: RequestParser + Send + 'static,
{
    let symbol = symbol.trim_start_matches('.');
    let (service_name, method_name) =
        split_symbol(symbol).ok_or_else(|| InvokeError::InvalidMethodName(symbol.to_string()))?;

    let resolved = source.find_symbol(service_name).await?;
    let Symbol::Service(service_desc) = resolved else {
        return Err(InvokeError::NotAService(service_name.to_string()));
    };
    let method = service_desc
        .methods()
        .find(|m| m.name() == method_name)
        .ok_or_else(|| InvokeError::MethodNotFound {
            service: service_name.to_string(),
            method: method_name.to_string(),
        })?;
    handler.on_resolve_method(&method);

    let metadata = metadata_from_headers(headers)?;
    handler.on_send_headers(&metadata);

    tracing::debug!(
        method = %format!("{}/{}", service_desc.full_name(), method.name()),
        client_streaming = method.is_client_streaming(),
        server_streaming = method.is_server_streaming(),
        "invoking rpc"
    );

    let mut client = GrpcClient::new(service);
    let input = method.input();

    // The sender side. Client-streaming shapes pump the parser from a
    // blocking task (the parser may sit on stdin); the others take a single
    // message up front. Dropping the channel sender half-closes the stream.
    let (tx, rx) = mpsc::channel::<DynamicMessage>(1);
    let (error_tx, mut error_rx) = oneshot::channel::<RequestParseError>();
    let mut sender_task = None;
    let mut parser = parser;
    if method.is_client_streaming() {
        let descriptor = input.clone();
        sender_task = Some(tokio::task::spawn_blocking(move || {
            let error_tx = error_tx;
            loop {
                match parser.next_message(&descriptor) {
                    Ok(Some(message)) => {
                        if tx.blocking_send(message).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        let _ = error_tx.send(err);
                        break;
                    }
                }
            }
        }));
    } else {
        match parser.next_message(&input)? {
            Some(message) => {
                let _ = tx.try_send(message);
            }
            // No request data: send an empty message.
            None => {
                let _ = tx.try_send(DynamicMessage::new(input.clone()));
            }
        }
        drop(tx);
    }

    let call = client
        .streaming(&method, ReceiverStream::new(rx), metadata, deadline)
        .await?;

    let mut response_count = 0usize;
    let (status, trailers) = match call {
        // The call failed before response headers arrived; deliver an empty
        // headers event so the event sequence stays well-formed.
        Err(status) => {
            handler.on_receive_headers(&MetadataMap::new());
            let trailers = status.metadata().clone();
            (status, trailers)
        }
        Ok(response) => {
            handler.on_receive_headers(response.metadata());
            let mut messages = response.into_inner();
            loop {
                match messages.message().await {
                    Ok(Some(message)) => {
                        response_count += 1;
                        handler.on_receive_response(&message);
                    }
                    Ok(None) => match messages.trailers().await {
                        Ok(trailers) => break (Status::ok(""), trailers.unwrap_or_default()),
                        Err(status) => {
                            let trailers = status.metadata().clone();
                            break (status, trailers);
                        }
                    },
                    Err(status) => {
                        let trailers = status.metadata().clone();
                        break (status, trailers);
                    }
                }
            }
        }
    };
    handler.on_receive_trailers(&status, &trailers);

    if let Some(task) = sender_task {
        let _ = task.await;
    }
    if let Ok(err) = error_rx.try_recv() {
        return Err(err.into());
    }
    if status.code() == Code::Ok && !method.is_server_streaming() && response_count != 1 {
        return Err(InvokeError::UnexpectedResponseCount(response_count));
    }
    Ok(())
}

/// An [`InvocationEventHandler`] that writes events to an output stream.
///
/// Only response messages are printed unless `verbose` is set, in which case
/// every event is logged. Response count and final status are recorded for
/// the caller; read them after the invocation completes.
pub struct DefaultEventHandler<'a, W: io::Write> {
    out: &'a mut W,
    formatter: ResponseFormatter,
    verbose: bool,

    /// Number of responses received so far.
    pub num_responses: usize,
    /// Status received at the end of the call, if it finished.
    pub status: Option<Status>,
}

impl<'a, W: io::Write> DefaultEventHandler<'a, W> {
    pub fn new(out: &'a mut W, formatter: ResponseFormatter, verbose: bool) -> Self {
        Self {
            out,
            formatter,
            verbose,
            num_responses: 0,
            status: None,
        }
    }
}

impl<W: io::Write> InvocationEventHandler for DefaultEventHandler<'_, W> {
    fn on_resolve_method(&mut self, method: &MethodDescriptor) {
        if self.verbose {
            let _ = writeln!(
                self.out,
                "\nResolved method descriptor:\n{}",
                print::method_signature(method)
            );
        }
    }

    fn on_send_headers(&mut self, metadata: &MetadataMap) {
        if self.verbose {
            let _ = writeln!(
                self.out,
                "\nRequest metadata to send:\n{}",
                metadata_to_string(metadata)
            );
        }
    }

    fn on_receive_headers(&mut self, metadata: &MetadataMap) {
        if self.verbose {
            let _ = writeln!(
                self.out,
                "\nResponse headers received:\n{}",
                metadata_to_string(metadata)
            );
        }
    }

    fn on_receive_response(&mut self, response: &DynamicMessage) {
        self.num_responses += 1;
        if self.verbose {
            let _ = writeln!(self.out, "\nResponse contents:");
        }
        match self.formatter.format(response) {
            Ok(text) => {
                let _ = writeln!(self.out, "{text}");
            }
            Err(err) => {
                let _ = writeln!(
                    self.out,
                    "Failed to format response message {}: {err}",
                    self.num_responses
                );
            }
        }
    }

    fn on_receive_trailers(&mut self, status: &Status, metadata: &MetadataMap) {
        self.status = Some(status.clone());
        if self.verbose {
            let _ = writeln!(
                self.out,
                "\nResponse trailers received:\n{}",
                metadata_to_string(metadata)
            );
        }
    }
}
