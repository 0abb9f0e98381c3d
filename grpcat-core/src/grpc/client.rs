//! # Generic gRPC Client
//!
//! A thin wrapper over `tonic::client::Grpc` that performs calls described
//! only by a [`MethodDescriptor`].
//!
//! Every RPC shape runs through the single [`GrpcClient::streaming`] entry
//! point: at the HTTP/2 level a unary exchange is simply a stream carrying
//! one message, and driving all four shapes through one path keeps response
//! headers and trailers observable uniformly. The shape-specific rules
//! (one request, one expected response) live in the driver.
use super::codec::DynamicCodec;
use crate::BoxError;
use futures_util::Stream;
use http_body::Body as HttpBody;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use std::str::FromStr;
use std::time::Duration;
use tonic::{Status, Streaming, client::GrpcService, metadata::MetadataMap, transport::Channel};

#[derive(Debug, thiserror::Error)]
pub enum GrpcRequestError {
    #[error("internal error, the client was not ready: '{0}'")]
    ClientNotReady(#[source] BoxError),
}

/// A dynamic gRPC client for an arbitrary method.
pub struct GrpcClient<S = Channel> {
    client: tonic::client::Grpc<S>,
}

impl<S> GrpcClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        let client = tonic::client::Grpc::new(service);
        Self { client }
    }

    /// Performs the call as a bidirectional exchange of dynamic messages.
    ///
    /// # Returns
    /// * `Ok(Ok(response))` - call accepted; headers are on the response, the
    ///   body is a stream of messages followed by trailers.
    /// * `Ok(Err(status))` - the server rejected the call before any
    ///   response message (`status` carries the trailers).
    /// * `Err(GrpcRequestError)` - the transport failed before the call.
    pub async fn streaming(
        &mut self,
        method: &MethodDescriptor,
        requests: impl Stream<Item = DynamicMessage> + Send + 'static,
        metadata: MetadataMap,
        deadline: Option<Duration>,
    ) -> Result<Result<tonic::Response<Streaming<DynamicMessage>>, Status>, GrpcRequestError> {
        self.client
            .ready()
            .await
            .map_err(|e| GrpcRequestError::ClientNotReady(e.into()))?;

        let codec = DynamicCodec::new(method.input(), method.output());
        let path = http_path(method);
        let mut request = tonic::Request::new(requests);
        *request.metadata_mut() = metadata;
        if let Some(deadline) = deadline {
            request.set_timeout(deadline);
        }

        match self.client.streaming(request, path, codec).await {
            Ok(response) => Ok(Ok(response)),
            Err(status) => Ok(Err(status)),
        }
    }
}

fn http_path(method: &MethodDescriptor) -> http::uri::PathAndQuery {
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    http::uri::PathAndQuery::from_str(&path).expect("valid gRPC path")
}
