//! # Descriptor Handling
//!
//! Everything schema-related: the polymorphic [`source::DescriptorSource`]
//! that other components resolve symbols through, the schema exporters that
//! write descriptors back out, and a plain-text `.proto` printer.
pub mod export;
pub mod print;
pub mod source;
