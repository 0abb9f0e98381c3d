//! # Reflection Client
//!
//! This module implements a client for the gRPC Server Reflection Protocol
//! (`grpc.reflection.v1alpha`). It can:
//!
//! 1. **List services**: query the server for all exposed service names.
//! 2. **Resolve symbols**: fetch the `FileDescriptorProto`s defining a
//!    symbol, recursively pulling in any imports the caller does not already
//!    hold so the result is a complete dependency closure.
//! 3. **Resolve extensions**: enumerate extension numbers for a message type
//!    and fetch the files declaring them.
//!
//! A single bidirectional stream is opened lazily on first use and reused
//! for every request until [`ReflectionClient::reset`] or a stream error. The
//! stream carries at most one outstanding request at a time; callers that
//! need concurrency serialize above this client.
//!
//! ## References
//!
//! * [gRPC Server Reflection Protocol](https://github.com/grpc/grpc/blob/master/doc/server-reflection.md)
use crate::BoxError;
use http_body::Body as HttpBody;
use prost::Message;
use prost_types::FileDescriptorProto;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::MetadataMap;
use tonic::transport::Channel;
use tonic::{Code, Status, Streaming, client::GrpcService};
use tonic_reflection::pb::v1alpha::{
    ExtensionRequest, ServerReflectionRequest, ServerReflectionResponse,
    server_reflection_client::ServerReflectionClient, server_reflection_request::MessageRequest,
    server_reflection_response::MessageResponse,
};

/// Errors that can occur during reflection requests.
#[derive(Debug, thiserror::Error)]
pub enum ReflectionError {
    #[error(
        "failed to start a stream request with the reflection server, reflection might not be supported: '{0}'"
    )]
    StreamInitFailed(#[source] Status),

    #[error("the reflection stream returned an error status: '{0}'")]
    StreamFailure(#[source] Status),

    #[error("reflection stream closed unexpectedly")]
    StreamClosed,

    #[error("internal error: failed to send request to reflection stream")]
    SendFailed,

    #[error("server returned reflection error code {code}: {message}")]
    Server { code: i32, message: String },

    #[error("protocol error: received unexpected response type: {0}")]
    UnexpectedResponseType(String),

    #[error("failed to decode FileDescriptorProto: {0}")]
    Decode(#[from] prost::DecodeError),
}

impl ReflectionError {
    /// True when the server answered with `UNIMPLEMENTED`, meaning it does
    /// not expose the reflection service at all.
    pub fn is_unimplemented(&self) -> bool {
        matches!(
            self,
            ReflectionError::StreamInitFailed(status) | ReflectionError::StreamFailure(status)
                if status.code() == Code::Unimplemented
        )
    }

    /// True when the server reported that the requested symbol or file does
    /// not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            ReflectionError::StreamFailure(status) => status.code() == Code::NotFound,
            ReflectionError::Server { code, .. } => *code == Code::NotFound as i32,
            _ => false,
        }
    }
}

// The host field of reflection requests is undocumented and optional; no
// server we know of requires it.
const EMPTY_HOST: &str = "";

struct LiveStream {
    requests: mpsc::Sender<ServerReflectionRequest>,
    responses: Streaming<ServerReflectionResponse>,
}

/// A client for the gRPC Server Reflection Service holding one long-lived
/// stream.
pub struct ReflectionClient<S = Channel> {
    client: ServerReflectionClient<S>,
    metadata: MetadataMap,
    stream: Option<LiveStream>,
}

impl<S> ReflectionClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Creates a new `ReflectionClient` using the provided gRPC service
    /// (e.g., a `Channel`). The stream is opened on first use.
    pub fn new(service: S) -> Self {
        Self {
            client: ServerReflectionClient::new(service),
            metadata: MetadataMap::new(),
            stream: None,
        }
    }

    /// Attaches request metadata sent when the reflection stream is opened.
    pub fn with_metadata(mut self, metadata: MetadataMap) -> Self {
        self.metadata = metadata;
        self
    }

    /// Drops the current stream; the next request opens a fresh one.
    pub fn reset(&mut self) {
        self.stream = None;
    }

    async fn open_stream(&mut self) -> Result<&mut LiveStream, ReflectionError> {
        let live = match self.stream.take() {
            Some(live) => live,
            None => {
                let (tx, rx) = mpsc::channel(16);
                let mut request = tonic::Request::new(ReceiverStream::new(rx));
                *request.metadata_mut() = self.metadata.clone();

                tracing::debug!("opening reflection stream");
                let responses = self
                    .client
                    .server_reflection_info(request)
                    .await
                    .map_err(ReflectionError::StreamInitFailed)?
                    .into_inner();

                LiveStream {
                    requests: tx,
                    responses,
                }
            }
        };
        Ok(self.stream.insert(live))
    }

    /// Sends one request and waits for its response. Any stream-level failure
    /// invalidates the stream so the next request reopens it.
    async fn round_trip(
        &mut self,
        message_request: MessageRequest,
    ) -> Result<MessageResponse, ReflectionError> {
        let result = async {
            let stream = self.open_stream().await?;
            let request = ServerReflectionRequest {
                host: EMPTY_HOST.to_string(),
                message_request: Some(message_request),
            };
            stream
                .requests
                .send(request)
                .await
                .map_err(|_| ReflectionError::SendFailed)?;

            let response = stream
                .responses
                .message()
                .await
                .map_err(ReflectionError::StreamFailure)?
                .ok_or(ReflectionError::StreamClosed)?;

            match response.message_response {
                Some(MessageResponse::ErrorResponse(e)) => Err(ReflectionError::Server {
                    code: e.error_code,
                    message: e.error_message,
                }),
                Some(other) => Ok(other),
                None => Err(ReflectionError::UnexpectedResponseType("empty message".into())),
            }
        }
        .await;

        if result.is_err() {
            self.stream = None;
        }
        result
    }

    async fn file_descriptor_batch(
        &mut self,
        request: MessageRequest,
    ) -> Result<Vec<FileDescriptorProto>, ReflectionError> {
        match self.round_trip(request).await? {
            MessageResponse::FileDescriptorResponse(response) => response
                .file_descriptor_proto
                .iter()
                .map(|raw| FileDescriptorProto::decode(raw.as_ref()).map_err(ReflectionError::from))
                .collect(),
            other => Err(ReflectionError::UnexpectedResponseType(format!("{other:?}"))),
        }
    }

    /// Fetches the file defining `symbol` plus every transitive dependency
    /// not already listed in `known`, in unspecified order.
    pub async fn files_containing_symbol(
        &mut self,
        symbol: &str,
        known: &HashSet<String>,
    ) -> Result<Vec<FileDescriptorProto>, ReflectionError> {
        tracing::debug!(symbol, "resolving symbol via reflection");
        let batch = self
            .file_descriptor_batch(MessageRequest::FileContainingSymbol(symbol.to_string()))
            .await?;
        self.collect_closure(batch, known).await
    }

    /// Fetches the file declaring the extension of `type_name` with the given
    /// number, plus missing dependencies.
    pub async fn files_containing_extension(
        &mut self,
        type_name: &str,
        number: i32,
        known: &HashSet<String>,
    ) -> Result<Vec<FileDescriptorProto>, ReflectionError> {
        let batch = self
            .file_descriptor_batch(MessageRequest::FileContainingExtension(ExtensionRequest {
                containing_type: type_name.to_string(),
                extension_number: number,
            }))
            .await?;
        self.collect_closure(batch, known).await
    }

    /// Expands a first response batch to a full dependency closure by
    /// requesting any imported file that is neither in the batch nor `known`.
    async fn collect_closure(
        &mut self,
        batch: Vec<FileDescriptorProto>,
        known: &HashSet<String>,
    ) -> Result<Vec<FileDescriptorProto>, ReflectionError> {
        let mut collected: Vec<FileDescriptorProto> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut requested: HashSet<String> = HashSet::new();
        let mut queue: Vec<FileDescriptorProto> = batch;

        while !queue.is_empty() {
            let mut missing: Vec<String> = Vec::new();
            for file in queue.drain(..) {
                let name = file.name().to_string();
                if !seen.insert(name) {
                    continue;
                }
                for dep in &file.dependency {
                    if !seen.contains(dep) && !known.contains(dep) && requested.insert(dep.clone())
                    {
                        missing.push(dep.clone());
                    }
                }
                collected.push(file);
            }
            for dep in missing {
                if seen.contains(&dep) {
                    continue;
                }
                let batch = self
                    .file_descriptor_batch(MessageRequest::FileByFilename(dep))
                    .await?;
                queue.extend(batch);
            }
        }
        Ok(collected)
    }

    /// Lists all services exposed by the server.
    pub async fn list_services(&mut self) -> Result<Vec<String>, ReflectionError> {
        match self
            .round_trip(MessageRequest::ListServices(String::new()))
            .await?
        {
            MessageResponse::ListServicesResponse(response) => {
                Ok(response.service.into_iter().map(|s| s.name).collect())
            }
            other => Err(ReflectionError::UnexpectedResponseType(format!("{other:?}"))),
        }
    }

    /// Returns the field numbers of all known extensions of `type_name`.
    pub async fn extension_numbers_for_type(
        &mut self,
        type_name: &str,
    ) -> Result<Vec<i32>, ReflectionError> {
        match self
            .round_trip(MessageRequest::AllExtensionNumbersOfType(
                type_name.to_string(),
            ))
            .await?
        {
            MessageResponse::AllExtensionNumbersResponse(response) => {
                Ok(response.extension_number)
            }
            other => Err(ReflectionError::UnexpectedResponseType(format!("{other:?}"))),
        }
    }
}
