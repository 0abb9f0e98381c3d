//! # Interop Service
//!
//! **INTERNAL USE ONLY**: This crate exists solely to provide a gRPC server
//! implementation and descriptor set for integration testing the `grpcat`
//! tool. It is not intended for production use.

pub mod pb {
    include!(concat!(env!("OUT_DIR"), "/grpcat.testing.rs"));
}

pub use pb::test_service_server::{TestService, TestServiceServer};
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("descriptors");
