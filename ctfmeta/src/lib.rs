//! This crate holds the type model of a Common Trace Format (CTF) trace.
//!
//! A CTF trace is self-describing: the physical layout of every packet
//! header, packet context, event header and event payload is given by the
//! trace's metadata. The [`Metadata`] type is the in-memory form of that
//! schema, already lowered from TSDL. It can be built programmatically or
//! loaded from a JSON snapshot with [`Metadata::from_json()`].
//!
//! The model is immutable once built and is shared by all decode sessions
//! reading the trace.
//!
//! [`Metadata`]: struct.Metadata.html
//! [`Metadata::from_json()`]: struct.Metadata.html#method.from_json

mod error;
mod metadata;
mod types;

pub use crate::error::MetadataError;
pub use crate::metadata::{EventDefinition, Metadata, StreamDefinition, TraceDefinition};
pub use crate::types::{
    align_up, ArrayLength, ArrayType, ByteOrder, Encoding, EnumMapping, EnumType, Field,
    FloatType, IntegerType, StringType, StructType, TypeNode, VariantType,
};

/// Magic number found in the `magic` field of a CTF trace packet header.
pub const CTF_MAGIC: u64 = 0xC1FC_1FC1;
