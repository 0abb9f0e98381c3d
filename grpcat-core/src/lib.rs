//! # Grpcat Core
//!
//! `grpcat-core` is the invocation engine behind the `grpcat` CLI: a dynamic
//! gRPC client able to call any server without compile-time knowledge of the
//! Protobuf schema.
//!
//! ## Key Components
//!
//! * **[`descriptor::source::DescriptorSource`]:** a polymorphic provider of
//!   Protobuf descriptors. Three interchangeable backends exist: compiled
//!   `FileDescriptorSet` files, `.proto` sources compiled on the fly, and the
//!   server's own Reflection service.
//! * **[`transcode`]:** the bridge between textual request/response data
//!   (JSON or the Protobuf text format) and [`prost_reflect::DynamicMessage`].
//! * **[`invoke::invoke_rpc`]:** the RPC driver. It resolves a method symbol,
//!   runs the appropriate streaming shape (unary, client-stream,
//!   server-stream, bidirectional), and reports progress through an
//!   [`invoke::InvocationEventHandler`].
//! * **[`descriptor::export`]:** writes schemas back out, either as a
//!   serialized `FileDescriptorSet` or as pretty-printed `.proto` files.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that
//! consumers use compatible versions of these underlying dependencies.
pub mod descriptor;
pub mod grpc;
pub mod invoke;
pub mod metadata;
pub mod reflection;
pub mod transcode;

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
