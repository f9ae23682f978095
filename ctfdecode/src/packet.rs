use crate::value::{StructValue, Value};
use serde::Serialize;

/// The well-known fields of a decoded packet context.
///
/// Fields a stream does not declare read as zero. A context that declares
/// only `packet_size` has content up to the end of the packet; one that
/// declares neither extends to the end of the source.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Default, Serialize)]
pub struct PacketContext {
    pub timestamp_begin: u64,
    pub timestamp_end: u64,
    pub content_size_bits: u64,
    pub packet_size_bits: u64,
    pub events_discarded: u64,
    pub cpu_id: u64,
}

impl PacketContext {
    pub fn from_value(value: &StructValue) -> PacketContext {
        let field = |name: &str| value.get(name).and_then(Value::as_u64);

        let packet_size_bits = field("packet_size");
        let content_size_bits = field("content_size").or(packet_size_bits).unwrap_or(0);

        PacketContext {
            timestamp_begin: field("timestamp_begin").unwrap_or(0),
            timestamp_end: field("timestamp_end").unwrap_or(0),
            content_size_bits,
            packet_size_bits: packet_size_bits.unwrap_or(content_size_bits),
            events_discarded: field("events_discarded").unwrap_or(0),
            cpu_id: field("cpu_id").unwrap_or(0),
        }
    }

    /// Whether the packet has no declared bounds and runs to the end of the
    /// source.
    pub fn is_unbounded(&self) -> bool {
        self.content_size_bits == 0 && self.packet_size_bits == 0
    }
}
