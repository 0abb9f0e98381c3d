//! # Dynamic Protobuf Codec
//!
//! An implementation of `tonic::codec::Codec` that moves
//! [`DynamicMessage`] values instead of generated structs, enabling RPC
//! invocation without pre-compiled service stubs.
//!
//! The encoder writes the request message in canonical wire form; the
//! decoder reads response bytes into a `DynamicMessage` for the output
//! descriptor, retaining any unknown fields so they survive round-trips.
use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor, ReflectMessage};
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

/// A codec bridging `DynamicMessage` and the Protobuf binary format.
///
/// It holds the descriptors (schemas) for both the request and the response
/// messages of one method.
pub struct DynamicCodec {
    req_desc: MessageDescriptor,
    res_desc: MessageDescriptor,
}

impl DynamicCodec {
    pub fn new(req_desc: MessageDescriptor, res_desc: MessageDescriptor) -> Self {
        Self { req_desc, res_desc }
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;

    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder(self.req_desc.clone())
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder(self.res_desc.clone())
    }
}

/// Encodes a `DynamicMessage` into Protobuf bytes.
pub struct DynamicEncoder(MessageDescriptor);

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        debug_assert_eq!(item.descriptor(), self.0);
        item.encode_raw(dst);
        Ok(())
    }
}

/// Decodes Protobuf bytes into a `DynamicMessage`.
pub struct DynamicDecoder(MessageDescriptor);

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let mut msg = DynamicMessage::new(self.0.clone());
        msg.merge(src)
            .map_err(|e| Status::internal(format!("failed to decode response message: {e}")))?;
        Ok(Some(msg))
    }
}
