//! Encoding side of the decoder, for tests only.
//!
//! `BitWriter` packs integers at arbitrary bit positions, `encode_struct`
//! lays out a `StructValue` according to a type, and `TraceBuilder`
//! assembles complete streams: trace header, packet contexts with correct
//! content and packet sizes, event records and padding.
//!
//! Nothing here is tuned for speed, and inputs that do not match their type
//! cause panics.

use crate::value::{StructValue, Value};
use ctfmeta::{
    ArrayLength, ByteOrder, EnumType, EventDefinition, FloatType, IntegerType, Metadata,
    StreamDefinition, StructType, TraceDefinition, TypeNode, VariantType, CTF_MAGIC,
};
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    buf: Vec<u8>,
    bit_pos: u64,
}

impl BitWriter {
    pub fn new() -> BitWriter {
        BitWriter::default()
    }

    pub fn position(&self) -> u64 {
        self.bit_pos
    }

    /// Writes the low `size_bits` bits of `value` at the current position.
    pub fn write_bits(&mut self, value: u64, size_bits: u32, byte_order: ByteOrder) {
        assert!(size_bits <= 64);

        let end = self.bit_pos + u64::from(size_bits);
        let needed = ((end + 7) / 8) as usize;
        if self.buf.len() < needed {
            self.buf.resize(needed, 0);
        }

        for i in 0..size_bits {
            let bit = match byte_order {
                ByteOrder::LittleEndian => (value >> i) & 1,
                ByteOrder::BigEndian => (value >> (size_bits - 1 - i)) & 1,
            };
            let pos = self.bit_pos + u64::from(i);
            let shift = match byte_order {
                ByteOrder::LittleEndian => pos % 8,
                ByteOrder::BigEndian => 7 - pos % 8,
            };
            let byte = &mut self.buf[(pos / 8) as usize];
            *byte = (*byte & !(1 << shift)) | ((bit as u8) << shift);
        }

        self.bit_pos = end;
    }

    /// Zero-pads up to the next multiple of `boundary_bits`.
    pub fn align(&mut self, boundary_bits: u32) {
        let aligned = ctfmeta::align_up(self.bit_pos, boundary_bits);
        self.skip(aligned - self.bit_pos);
    }

    pub fn skip(&mut self, bits: u64) {
        self.bit_pos += bits;
        let needed = ((self.bit_pos + 7) / 8) as usize;
        if self.buf.len() < needed {
            self.buf.resize(needed, 0);
        }
    }

    pub fn write_integer(&mut self, ty: &IntegerType, value: u64) {
        self.align(ty.align_bits);
        self.write_bits(value, ty.size_bits, ty.byte_order);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_bits(u64::from(b), 8, ByteOrder::LittleEndian);
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }
}

fn raw_bits(value: &Value) -> u64 {
    match value.as_integer() {
        Some(int) => int.as_i128() as u64,
        None => panic!("expected an integer, found {:?}", value),
    }
}

/// Lays out `value` according to `strct`.
pub fn encode_struct(writer: &mut BitWriter, strct: &StructType, value: &StructValue) {
    writer.align(strct.align_bits());

    for field in &strct.fields {
        let field_value = value
            .get(&field.name)
            .unwrap_or_else(|| panic!("no value for field `{}`", field.name));
        encode_value(writer, &field.ty, field_value);
    }
}

pub fn encode_value(writer: &mut BitWriter, ty: &TypeNode, value: &Value) {
    match ty {
        TypeNode::Integer(int) => writer.write_integer(int, raw_bits(value)),
        TypeNode::Enum(en) => writer.write_integer(&en.underlying, raw_bits(value)),
        TypeNode::Float(float) => {
            writer.align(float.align_bits);
            writer.skip(u64::from(float.size_bits()));
        }
        TypeNode::String(_) => {
            let s = value.as_str().expect("string value");
            writer.align(8);
            writer.write_bytes(s.as_bytes());
            writer.write_bytes(&[0]);
        }
        TypeNode::Struct(strct) => {
            encode_struct(writer, strct, value.as_struct().expect("struct value"))
        }
        TypeNode::Array(array) => {
            let elements = value.as_array().expect("array value");
            if let ArrayLength::Fixed(n) = array.length {
                assert_eq!(elements.len() as u64, n);
            }
            writer.align(array.element.align_bits());
            for element in elements {
                encode_value(writer, &array.element, element);
            }
        }
        TypeNode::Variant(variant) => {
            let (tag, member_value) = value.as_variant().expect("variant value");
            let member = variant
                .get(tag)
                .unwrap_or_else(|| panic!("no variant member `{}`", tag));
            encode_value(writer, member, member_value);
        }
    }
}

/// An event header of the LTTng layout, using the compact form.
pub fn compact_header(id: u64, timestamp: u64) -> StructValue {
    StructValue::new()
        .with("id", Value::Enum {
            value: crate::Integer::Unsigned(id),
            label: Some(Arc::from("compact")),
        })
        .with("v", Value::Variant {
            tag: Arc::from("compact"),
            value: Box::new(StructValue::new().with("timestamp", timestamp).into()),
        })
}

/// An event header of the LTTng layout, using the extended form.
pub fn extended_header(extended_tag: u64, id: u64, timestamp: u64) -> StructValue {
    StructValue::new()
        .with("id", Value::Enum {
            value: crate::Integer::Unsigned(extended_tag),
            label: Some(Arc::from("extended")),
        })
        .with("v", Value::Variant {
            tag: Arc::from("extended"),
            value: Box::new(
                StructValue::new()
                    .with("id", id)
                    .with("timestamp", timestamp)
                    .into(),
            ),
        })
}

/// The LTTng event header: a 5 bit id where 31 selects the extended form,
/// and a 27 bit compact timestamp.
pub fn lttng_event_header() -> StructType {
    let id = EnumType::new(IntegerType::unsigned(5))
        .range("compact", 0, 30)
        .value("extended", 31);
    let v = VariantType::new("id")
        .member(
            "compact",
            StructType::new().field("timestamp", TypeNode::uint(27)),
        )
        .member(
            "extended",
            StructType::new()
                .field("id", TypeNode::uint(32))
                .field("timestamp", TypeNode::uint(64)),
        );

    StructType::new().with_min_align(8).field("id", id).field("v", v)
}

pub fn lttng_packet_context() -> StructType {
    StructType::new()
        .field("timestamp_begin", TypeNode::uint(64))
        .field("timestamp_end", TypeNode::uint(64))
        .field("content_size", TypeNode::uint(64))
        .field("packet_size", TypeNode::uint(64))
        .field("events_discarded", TypeNode::uint(64))
        .field("cpu_id", TypeNode::uint(32))
}

pub const EVENT_SCHED_SWITCH: u64 = 0;
pub const EVENT_IRQ_ENTRY: u64 = 1;
pub const EVENT_SAMPLE: u64 = 2;
pub const EVENT_TAGGED: u64 = 3;
pub const EVENT_STATS: u64 = 40;

/// A small trace with a single stream and a handful of event kinds.
pub fn sample_metadata() -> Metadata {
    let sched_switch = StructType::new()
        .field("prev_comm", TypeNode::string())
        .field("prev_tid", TypeNode::int(32))
        .field("prev_prio", TypeNode::int(32))
        .field("prev_state", TypeNode::int(64))
        .field("next_comm", TypeNode::string())
        .field("next_tid", TypeNode::int(32))
        .field("next_prio", TypeNode::int(32));

    let irq_entry = StructType::new()
        .field("irq", TypeNode::int(32))
        .field("name", TypeNode::ascii_string());

    let sample = StructType::new()
        .field("a", TypeNode::uint(8))
        .field("b", TypeNode::uint(16))
        .field("c", IntegerType::unsigned(32).with_align(32))
        .field("d", TypeNode::uint(3))
        .field("e", TypeNode::int(13))
        .field("f", FloatType::single());

    let kind = EnumType::new(IntegerType::unsigned(8))
        .value("small", 0)
        .value("large", 1);
    let tagged = StructType::new()
        .field("len", TypeNode::uint(8))
        .field("values", TypeNode::sequence(TypeNode::uint(16), "len"))
        .field("kind", kind)
        .field(
            "payload",
            VariantType::new("kind")
                .member("small", TypeNode::uint(8))
                .member("large", TypeNode::uint(64)),
        );

    let stats = StructType::new()
        .field("counts", TypeNode::array(TypeNode::uint(32), 4))
        .field("total", TypeNode::uint(64));

    let events = vec![
        EventDefinition::new(EVENT_SCHED_SWITCH, "sched_switch", sched_switch),
        EventDefinition::new(EVENT_IRQ_ENTRY, "irq_handler_entry", irq_entry),
        EventDefinition::new(EVENT_SAMPLE, "sample", sample),
        EventDefinition::new(EVENT_TAGGED, "tagged", tagged),
        EventDefinition::new(EVENT_STATS, "stats", stats),
    ];

    let stream = StreamDefinition::new(0, lttng_event_header(), lttng_packet_context(), events)
        .expect("sample stream is valid");

    let trace = TraceDefinition {
        packet_header: StructType::new()
            .field("magic", TypeNode::uint(32))
            .field("stream_id", TypeNode::uint(32)),
    };

    Metadata::new(trace, vec![stream]).expect("sample metadata is valid")
}

/// Packet context values chosen by a test. Sizes are filled in by
/// `TraceBuilder`.
#[derive(Debug, Clone, Default)]
pub struct PacketSpec {
    pub timestamp_begin: u64,
    pub timestamp_end: u64,
    pub events_discarded: u64,
    pub cpu_id: u64,
    /// Bytes of padding after the content.
    pub padding_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct EventSpec {
    pub header: StructValue,
    pub event_id: u64,
    pub payload: StructValue,
}

/// Writes a stream of packets for one stream of a trace.
pub struct TraceBuilder<'m> {
    metadata: &'m Metadata,
    stream: &'m StreamDefinition,
    out: Vec<u8>,
}

impl<'m> TraceBuilder<'m> {
    pub fn new(metadata: &'m Metadata, stream_id: u64) -> TraceBuilder<'m> {
        TraceBuilder {
            metadata,
            stream: metadata.stream(stream_id).expect("stream exists"),
            out: Vec::new(),
        }
    }

    /// Appends a packet. The first packet also carries the trace header.
    pub fn packet(&mut self, spec: &PacketSpec, events: &[EventSpec]) -> &mut Self {
        // Sizes are fixed-width fields, so a first pass with zero sizes
        // yields the real layout.
        let content = self.encode_packet(spec, events, 0, 0).position();
        let content_bytes = (content + 7) / 8;
        let packet_size = (content_bytes + spec.padding_bytes) * 8;

        let mut writer = self.encode_packet(spec, events, content, packet_size);
        writer.skip(packet_size - writer.position());

        self.out.extend_from_slice(&writer.into_bytes());
        self
    }

    /// Appends raw bytes, e.g. a truncated packet.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.out.extend_from_slice(bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.out.len()
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    pub fn finish(&self) -> Vec<u8> {
        self.out.clone()
    }

    fn encode_packet(
        &self,
        spec: &PacketSpec,
        events: &[EventSpec],
        content_size: u64,
        packet_size: u64,
    ) -> BitWriter {
        let mut writer = BitWriter::new();

        if self.out.is_empty() {
            let header = trace_header_value(&self.metadata.trace().packet_header, self.stream.id);
            encode_struct(&mut writer, &self.metadata.trace().packet_header, &header);
        }

        let context = packet_context_value(&self.stream.packet_context, spec, content_size, packet_size);
        encode_struct(&mut writer, &self.stream.packet_context, &context);

        for event in events {
            let definition: &EventDefinition =
                self.stream.event(event.event_id).expect("event exists");
            encode_struct(&mut writer, &self.stream.event_header, &event.header);
            encode_struct(&mut writer, &definition.fields, &event.payload);
        }

        writer
    }
}

fn trace_header_value(header: &StructType, stream_id: u64) -> StructValue {
    let mut value = StructValue::new();
    for field in &header.fields {
        let v = match &*field.name {
            "magic" => CTF_MAGIC,
            "stream_id" => stream_id,
            _ => 0,
        };
        value.push(field.name.clone(), Value::from(v));
    }
    value
}

fn packet_context_value(
    context: &StructType,
    spec: &PacketSpec,
    content_size: u64,
    packet_size: u64,
) -> StructValue {
    let mut value = StructValue::new();
    for field in &context.fields {
        let v = match &*field.name {
            "timestamp_begin" => spec.timestamp_begin,
            "timestamp_end" => spec.timestamp_end,
            "content_size" => content_size,
            "packet_size" => packet_size,
            "events_discarded" => spec.events_discarded,
            "cpu_id" => spec.cpu_id,
            _ => 0,
        };
        value.push(field.name.clone(), Value::from(v));
    }
    value
}
