//! # Server Reflection
//!
//! A client for the gRPC Server Reflection Protocol
//! (`grpc.reflection.v1alpha.ServerReflection`), used by the
//! reflection-backed descriptor source to discover a server's schema at
//! runtime.
pub mod client;
