//! # Generic gRPC Transport
//!
//! The low-level building blocks for performing gRPC calls with messages
//! whose shape is known only at runtime.
//!
//! Unlike standard `tonic` clients, which are strongly typed against
//! generated structs, the components here move [`prost_reflect::DynamicMessage`]
//! values across the wire, guided by the method's descriptors.
pub mod client;
pub mod codec;
