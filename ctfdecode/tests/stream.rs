use ctfdecode::testing_common::{
    compact_header, extended_header, sample_metadata, BitWriter, EventSpec, PacketSpec,
    TraceBuilder, EVENT_IRQ_ENTRY, EVENT_SAMPLE, EVENT_SCHED_SWITCH, EVENT_STATS, EVENT_TAGGED,
};
use ctfdecode::{CtfDataStream, DecodeError, Integer, StreamState, StructValue, Value};
use ctfmeta::{
    ByteOrder, EventDefinition, Metadata, StreamDefinition, StructType, TraceDefinition, TypeNode,
    CTF_MAGIC,
};
use std::io::Cursor;
use std::sync::Arc;

fn irq_entry(irq: i64, name: &str) -> StructValue {
    StructValue::new().with("irq", irq).with("name", name)
}

fn sched_switch(prev: &str, next: &str) -> StructValue {
    StructValue::new()
        .with("prev_comm", prev)
        .with("prev_tid", 41i64)
        .with("prev_prio", 120i64)
        .with("prev_state", 1i64)
        .with("next_comm", next)
        .with("next_tid", 42i64)
        .with("next_prio", -20i64)
}

fn sample(a: u64, e: i64) -> StructValue {
    StructValue::new()
        .with("a", a)
        .with("b", 0xBEEFu64)
        .with("c", 0xDEAD_BEEFu64)
        .with("d", 5u64)
        .with("e", e)
        .with("f", Value::Float)
}

fn tagged(values: &[u64], large: Option<u64>) -> StructValue {
    let (kind, label, payload) = match large {
        Some(v) => (1, "large", Value::from(v)),
        None => (0, "small", Value::from(9u64)),
    };

    StructValue::new()
        .with("len", values.len() as u64)
        .with(
            "values",
            Value::Array(values.iter().map(|&v| Value::from(v)).collect()),
        )
        .with("kind", Value::Enum {
            value: Integer::Unsigned(kind),
            label: Some(Arc::from(label)),
        })
        .with("payload", Value::Variant {
            tag: Arc::from(label),
            value: Box::new(payload),
        })
}

fn stats(counts: [u64; 4]) -> StructValue {
    StructValue::new()
        .with(
            "counts",
            Value::Array(counts.iter().map(|&c| Value::from(c)).collect()),
        )
        .with("total", counts.iter().sum::<u64>())
}

fn event(header: StructValue, event_id: u64, payload: StructValue) -> EventSpec {
    EventSpec {
        header,
        event_id,
        payload,
    }
}

fn two_packet_trace() -> Vec<u8> {
    let metadata = sample_metadata();
    let mut builder = TraceBuilder::new(&metadata, 0);

    builder.packet(
        &PacketSpec {
            timestamp_begin: 100,
            timestamp_end: 200,
            events_discarded: 2,
            cpu_id: 1,
            padding_bytes: 13,
        },
        &[
            event(compact_header(EVENT_IRQ_ENTRY, 110), EVENT_IRQ_ENTRY, irq_entry(7, "eth0")),
            event(
                compact_header(EVENT_SCHED_SWITCH, 120),
                EVENT_SCHED_SWITCH,
                sched_switch("swapper/1", "kworker/1:0"),
            ),
            event(compact_header(EVENT_TAGGED, 130), EVENT_TAGGED, tagged(&[1, 2, 3], Some(1 << 40))),
        ],
    );
    builder.packet(
        &PacketSpec {
            timestamp_begin: 300,
            timestamp_end: 400,
            events_discarded: 5,
            cpu_id: 1,
            padding_bytes: 3,
        },
        &[
            event(compact_header(EVENT_SAMPLE, 310), EVENT_SAMPLE, sample(200, -4096)),
            event(compact_header(EVENT_TAGGED, 320), EVENT_TAGGED, tagged(&[], None)),
            event(extended_header(31, EVENT_STATS, 5000), EVENT_STATS, stats([1, 2, 3, 4])),
        ],
    );

    builder.finish()
}

#[test]
fn multi_packet_stream_decodes_every_event() {
    let metadata = sample_metadata();
    let mut stream = CtfDataStream::open(Cursor::new(two_packet_trace()), &metadata).unwrap();

    assert_eq!(stream.state(), StreamState::PacketReady);
    assert_eq!(stream.trace_header().get("magic").and_then(Value::as_u64), Some(CTF_MAGIC));
    assert_eq!(stream.stream_definition().id, 0);

    let mut seen = Vec::new();
    while let Some(header) = stream.next_event_header().unwrap() {
        assert_eq!(stream.state(), StreamState::EventHeaderReady);
        let payload = stream.read_event(header.definition).unwrap();
        let context = *stream.packet_context();
        seen.push((header.definition.id, header.clock, context, payload));
    }

    assert_eq!(stream.state(), StreamState::EndOfStream);
    assert_eq!(seen.len(), 6);

    let ids: Vec<u64> = seen.iter().map(|(id, ..)| *id).collect();
    assert_eq!(
        ids,
        [EVENT_IRQ_ENTRY, EVENT_SCHED_SWITCH, EVENT_TAGGED, EVENT_SAMPLE, EVENT_TAGGED, EVENT_STATS]
    );

    let clocks: Vec<u64> = seen.iter().map(|(_, clock, ..)| *clock).collect();
    assert_eq!(clocks, [110, 120, 130, 310, 320, 5000]);

    // Packet context values are surfaced as they are stored.
    let (first, second) = (seen[0].2, seen[3].2);
    assert_eq!((first.timestamp_begin, first.timestamp_end), (100, 200));
    assert_eq!(first.events_discarded, 2);
    assert!(first.content_size_bits < first.packet_size_bits);
    assert_eq!((second.timestamp_begin, second.timestamp_end), (300, 400));
    assert_eq!(second.events_discarded, 5);
    assert_eq!(stream.cpu(), 1);
    assert_eq!(stream.packet_index(), 2);

    assert_eq!(seen[0].3, irq_entry(7, "eth0"));
    assert_eq!(seen[1].3, sched_switch("swapper/1", "kworker/1:0"));
    assert_eq!(seen[2].3, tagged(&[1, 2, 3], Some(1 << 40)));
    assert_eq!(seen[3].3, sample(200, -4096));
    assert_eq!(seen[4].3, tagged(&[], None));
    assert_eq!(seen[5].3, stats([1, 2, 3, 4]));

    // Nothing more once the stream has ended.
    assert!(stream.next_event_header().unwrap().is_none());
}

#[test]
fn header_iterator_skips_payloads() {
    let metadata = sample_metadata();
    let mut stream = CtfDataStream::open(Cursor::new(two_packet_trace()), &metadata).unwrap();

    let names: Vec<String> = stream
        .event_headers()
        .map(|header| header.unwrap().definition.name.to_string())
        .collect();

    assert_eq!(
        names,
        ["irq_handler_entry", "sched_switch", "tagged", "sample", "tagged", "stats"]
    );
    assert_eq!(stream.state(), StreamState::EndOfStream);
}

#[test]
fn fast_read_ends_where_full_decode_ends() {
    let metadata = sample_metadata();
    let bytes = two_packet_trace();
    let mut full = CtfDataStream::open(Cursor::new(bytes.clone()), &metadata).unwrap();
    let mut fast = CtfDataStream::open(Cursor::new(bytes), &metadata).unwrap();

    loop {
        let a = full.next_event_header().unwrap();
        let b = fast.next_event_header().unwrap();
        let (a, b) = match (a, b) {
            (Some(a), Some(b)) => (a, b),
            (None, None) => break,
            _ => panic!("streams disagree on the number of events"),
        };
        assert_eq!(a.definition.id, b.definition.id);

        let decoded = full.read_event(a.definition).unwrap();
        let skipped = fast.read_event_fast(b.definition).unwrap();

        if b.definition.is_fixed_size {
            assert!(skipped.is_none());
        } else {
            assert_eq!(skipped, Some(decoded));
        }
        assert_eq!(full.packet_offset_bits(), fast.packet_offset_bits());
        assert_eq!(full.record_bytes(), fast.record_bytes());
    }
}

#[test]
fn extended_header_consumes_only_extended_member() {
    let metadata = sample_metadata();
    let mut builder = TraceBuilder::new(&metadata, 0);
    builder.packet(
        &PacketSpec::default(),
        &[event(extended_header(31, EVENT_STATS, 1 << 33), EVENT_STATS, stats([9, 8, 7, 6]))],
    );

    let mut stream = CtfDataStream::open(Cursor::new(builder.finish()), &metadata).unwrap();
    let start = stream.packet_offset_bits();
    let header = stream.next_event_header().unwrap().unwrap();

    let (tag, member) = header.value.get("v").and_then(Value::as_variant).unwrap();
    assert_eq!(tag, "extended");
    assert_eq!(member.as_struct().unwrap().len(), 2);
    assert_eq!(header.definition.id, EVENT_STATS);
    assert_eq!(header.timestamp, 1 << 33);
    assert_eq!(header.clock, 1 << 33);

    // 5 bit id, padding to the byte, 32 bit id and 64 bit timestamp.
    assert_eq!(stream.packet_offset_bits() - start, 8 + 32 + 64);
    assert_eq!(stream.record_bytes().len(), 13);

    assert_eq!(stream.read_event(header.definition).unwrap(), stats([9, 8, 7, 6]));
}

#[test]
fn compact_timestamps_wrap_into_clock() {
    let metadata = sample_metadata();
    let wrap = 1u64 << 27;
    let mut builder = TraceBuilder::new(&metadata, 0);
    builder.packet(
        &PacketSpec {
            timestamp_begin: wrap - 100,
            ..PacketSpec::default()
        },
        &[
            event(compact_header(EVENT_IRQ_ENTRY, wrap - 28), EVENT_IRQ_ENTRY, irq_entry(1, "a")),
            event(compact_header(EVENT_IRQ_ENTRY, 50), EVENT_IRQ_ENTRY, irq_entry(2, "b")),
            event(compact_header(EVENT_IRQ_ENTRY, 60), EVENT_IRQ_ENTRY, irq_entry(3, "c")),
        ],
    );

    let mut stream = CtfDataStream::open(Cursor::new(builder.finish()), &metadata).unwrap();
    let headers: Vec<(u64, u64)> = stream
        .event_headers()
        .map(|h| h.map(|h| (h.timestamp, h.clock)).unwrap())
        .collect();

    assert_eq!(headers, [(wrap - 28, wrap - 28), (50, wrap + 50), (60, wrap + 60)]);
}

#[test]
fn truncation_at_packet_boundary_ends_stream() {
    let metadata = sample_metadata();
    let mut builder = TraceBuilder::new(&metadata, 0);
    builder.packet(
        &PacketSpec {
            padding_bytes: 8,
            ..PacketSpec::default()
        },
        &[event(compact_header(EVENT_IRQ_ENTRY, 1), EVENT_IRQ_ENTRY, irq_entry(1, "x"))],
    );
    let first_packet = builder.len();
    builder.packet(
        &PacketSpec::default(),
        &[event(compact_header(EVENT_IRQ_ENTRY, 2), EVENT_IRQ_ENTRY, irq_entry(2, "y"))],
    );
    let bytes = builder.finish();

    // Cut exactly after the first packet, and inside the second packet's
    // context.
    for &len in &[first_packet, first_packet + 20] {
        let mut stream =
            CtfDataStream::open(Cursor::new(bytes[..len].to_vec()), &metadata).unwrap();

        let header = stream.next_event_header().unwrap().unwrap();
        assert_eq!(stream.read_event(header.definition).unwrap(), irq_entry(1, "x"));
        assert!(stream.next_event_header().unwrap().is_none());
        assert_eq!(stream.state(), StreamState::EndOfStream);
    }
}

#[test]
fn truncation_inside_a_record_is_corrupt() {
    let metadata = sample_metadata();
    let mut builder = TraceBuilder::new(&metadata, 0);
    builder.packet(
        &PacketSpec::default(),
        &[event(compact_header(EVENT_SAMPLE, 1), EVENT_SAMPLE, sample(1, 1))],
    );
    let bytes = builder.finish();

    // Trace header (8 bytes), packet context (44 bytes), event header
    // (4 bytes), then 3 of the 16 payload bytes.
    let truncated = bytes[..8 + 44 + 4 + 3].to_vec();
    let mut stream = CtfDataStream::open(Cursor::new(truncated), &metadata).unwrap();

    let header = stream.next_event_header().unwrap().unwrap();
    assert_eq!(header.definition.id, EVENT_SAMPLE);

    let err = stream.read_event(header.definition).unwrap_err();
    assert!(matches!(err, DecodeError::CorruptData { .. }), "{:?}", err);
    assert_eq!(stream.state(), StreamState::Failed);
    assert!(matches!(
        stream.next_event_header(),
        Err(DecodeError::SessionFailed)
    ));
}

#[test]
fn unknown_event_id_is_corrupt() {
    let metadata = sample_metadata();
    let mut builder = TraceBuilder::new(&metadata, 0);
    builder.packet(
        &PacketSpec::default(),
        &[event(compact_header(EVENT_IRQ_ENTRY, 1), EVENT_IRQ_ENTRY, irq_entry(1, "x"))],
    );
    let mut bytes = builder.finish();

    // The event header follows the trace header and packet context; its low
    // five bits hold the id.
    bytes[52] = (bytes[52] & !0x1F) | 17;

    let mut stream = CtfDataStream::open(Cursor::new(bytes), &metadata).unwrap();
    let mut headers = stream.event_headers();
    assert!(matches!(headers.next(), Some(Err(DecodeError::CorruptData { .. }))));
    assert!(headers.next().is_none());
}

#[test]
fn read_event_requires_a_header() {
    let metadata = sample_metadata();
    let mut stream = CtfDataStream::open(Cursor::new(two_packet_trace()), &metadata).unwrap();
    let definition = metadata.stream(0).unwrap().event(EVENT_SAMPLE).unwrap();

    assert!(matches!(
        stream.read_event(definition),
        Err(DecodeError::NoPendingEvent)
    ));

    let header = stream.next_event_header().unwrap().unwrap();
    stream.read_event(header.definition).unwrap();
    assert!(matches!(
        stream.read_event(header.definition),
        Err(DecodeError::NoPendingEvent)
    ));
}

#[test]
fn payload_must_match_pending_header() {
    let metadata = sample_metadata();
    let stream_definition = metadata.stream(0).unwrap();
    let wrong = stream_definition.event(EVENT_SAMPLE).unwrap();
    let mut stream = CtfDataStream::open(Cursor::new(two_packet_trace()), &metadata).unwrap();

    let header = stream.next_event_header().unwrap().unwrap();
    assert_eq!(header.definition.id, EVENT_IRQ_ENTRY);

    assert!(matches!(
        stream.read_event(wrong),
        Err(DecodeError::EventMismatch {
            pending: EVENT_IRQ_ENTRY,
            requested: EVENT_SAMPLE,
        })
    ));
    assert!(matches!(
        stream.read_event_fast(wrong),
        Err(DecodeError::EventMismatch { .. })
    ));
    assert_eq!(stream.state(), StreamState::EventHeaderReady);

    assert_eq!(stream.read_event(header.definition).unwrap(), irq_entry(7, "eth0"));
    let next = stream.next_event_header().unwrap().unwrap();
    assert_eq!(next.definition.id, EVENT_SCHED_SWITCH);
}

// Four bit headers and empty payloads, so records end in the middle of a
// byte and packets have no padding at all.
fn nibble_metadata() -> Metadata {
    let events = vec![
        EventDefinition::new(0, "zero", StructType::new()),
        EventDefinition::new(1, "one", StructType::new()),
    ];
    let stream = StreamDefinition::new(
        0,
        StructType::new().field("id", TypeNode::uint(4)),
        StructType::new()
            .field("content_size", TypeNode::uint(64))
            .field("packet_size", TypeNode::uint(64)),
        events,
    )
    .unwrap();
    let trace = TraceDefinition {
        packet_header: StructType::new()
            .field("magic", TypeNode::uint(32))
            .field("stream_id", TypeNode::uint(32)),
    };

    Metadata::new(trace, vec![stream]).unwrap()
}

#[test]
fn sub_byte_records_across_unpadded_packets() {
    let metadata = nibble_metadata();
    let nibble = |id: u64| event(StructValue::new().with("id", id), id, StructValue::new());

    let mut builder = TraceBuilder::new(&metadata, 0);
    builder.packet(&PacketSpec::default(), &[nibble(1), nibble(0)]);
    let first_packet = builder.len();
    builder.packet(&PacketSpec::default(), &[nibble(1), nibble(0)]);
    let bytes = builder.finish();

    // Trace header, context and two nibbles, then context and two nibbles.
    assert_eq!(first_packet, 25);
    assert_eq!(bytes.len(), 25 + 17);

    let mut stream = CtfDataStream::open(Cursor::new(bytes), &metadata).unwrap();
    let ids: Vec<u64> = stream
        .event_headers()
        .map(|header| header.unwrap().definition.id)
        .collect();

    assert_eq!(ids, [1, 0, 1, 0]);
    assert_eq!(stream.state(), StreamState::EndOfStream);
    assert_eq!(stream.packet_index(), 2);
}

fn trace_header(magic: u64, stream_id: u64) -> Vec<u8> {
    let mut writer = BitWriter::new();
    writer.write_bits(magic, 32, ByteOrder::LittleEndian);
    writer.write_bits(stream_id, 32, ByteOrder::LittleEndian);
    writer.write_bytes(&[0; 64]);
    writer.into_bytes()
}

#[test]
fn bad_magic_is_unsupported() {
    let metadata = sample_metadata();
    let result = CtfDataStream::open(Cursor::new(trace_header(0xDEAD_BEEF, 0)), &metadata);
    assert!(matches!(result, Err(DecodeError::FormatUnsupported { .. })));
}

#[test]
fn unknown_stream_is_corrupt() {
    let metadata = sample_metadata();
    let result = CtfDataStream::open(Cursor::new(trace_header(CTF_MAGIC, 9)), &metadata);
    assert!(matches!(result, Err(DecodeError::CorruptData { .. })));
}

#[test]
fn empty_source_has_no_events() {
    let metadata = sample_metadata();
    let mut stream = CtfDataStream::open(Cursor::new(Vec::new()), &metadata).unwrap();

    assert_eq!(stream.state(), StreamState::EndOfStream);
    assert!(stream.next_event_header().unwrap().is_none());
    assert_eq!(stream.into_inner().position(), 0);
}
