//! Decoding of Common Trace Format (CTF) binary streams.
//!
//! A [`CtfDataStream`] reads one physical stream of a trace, driven by the
//! trace's [`ctfmeta::Metadata`]. Event headers are decoded lazily, one at a
//! time, and payloads only on request:
//!
//! ```no_run
//! # fn demo(metadata: &ctfmeta::Metadata) -> ctfdecode::Result<()> {
//! let file = std::io::BufReader::new(std::fs::File::open("channel0_0")?);
//! let mut stream = ctfdecode::CtfDataStream::open(file, metadata)?;
//!
//! while let Some(header) = stream.next_event_header()? {
//!     let payload = stream.read_event(header.definition)?;
//!     println!("{} {}: {:?}", header.clock, header.definition.name, payload);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! [`CtfDataStream`]: struct.CtfDataStream.html

mod bits;
mod config;
mod cursor;
mod decoder;
mod error;
mod packet;
mod stream;
mod value;

pub mod testing_common;

pub use crate::config::DecoderConfig;
pub use crate::cursor::BitCursor;
pub use crate::decoder::TypeDecoder;
pub use crate::error::{DecodeError, Result};
pub use crate::packet::PacketContext;
pub use crate::stream::{CtfDataStream, EventHeader, EventHeaders, StreamState};
pub use crate::value::{Integer, StructValue, Value};
