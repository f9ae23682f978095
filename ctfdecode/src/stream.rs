//! Decode sessions over one physical CTF stream.
//!
//! A stream starts with the trace packet header, followed by packets. Each
//! packet is a packet context and a run of event records, padded up to the
//! packet size. An event record is an event header followed by the payload
//! of the event the header names.
//!
//! `CtfDataStream` hands out event headers one at a time. Payloads are only
//! decoded when asked for; a payload that is not read is skipped when the
//! next header is requested.

use crate::config::DecoderConfig;
use crate::cursor::BitCursor;
use crate::decoder::TypeDecoder;
use crate::error::{DecodeError, Result};
use crate::packet::PacketContext;
use crate::value::{StructValue, Value};
use ctfmeta::{EventDefinition, Metadata, StreamDefinition, StructType, TypeNode, CTF_MAGIC};
use log::{debug, trace, warn};
use std::io::Read;

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum StreamState {
    Initialized,
    /// A packet context has been decoded and no event header is pending.
    PacketReady,
    /// An event header has been decoded and its payload not yet consumed.
    EventHeaderReady,
    EndOfStream,
    /// A decode error occurred; the session cannot continue.
    Failed,
}

/// A decoded event header.
#[derive(Clone, Debug)]
pub struct EventHeader<'m> {
    pub definition: &'m EventDefinition,
    /// The timestamp as stored in the header, possibly truncated to fewer
    /// than 64 bits.
    pub timestamp: u64,
    /// The full 64 bit clock value reconstructed from `timestamp`.
    pub clock: u64,
    pub value: StructValue,
}

pub struct CtfDataStream<'m, R> {
    cursor: BitCursor<R>,
    metadata: &'m Metadata,
    stream: &'m StreamDefinition,
    config: DecoderConfig,
    trace_header: StructValue,
    packet: PacketContext,
    packet_index: u64,
    state: StreamState,
    pending: Option<&'m EventDefinition>,
    clock: u64,
}

impl<'m, R: Read> CtfDataStream<'m, R> {
    pub fn open(source: R, metadata: &'m Metadata) -> Result<CtfDataStream<'m, R>> {
        CtfDataStream::with_config(source, metadata, DecoderConfig::default())
    }

    /// Decodes the trace header and the first packet context.
    pub fn with_config(
        source: R,
        metadata: &'m Metadata,
        config: DecoderConfig,
    ) -> Result<CtfDataStream<'m, R>> {
        let mut cursor = BitCursor::with_capacity(source, config.initial_buffer_capacity);

        if !cursor.has_more_data()? {
            debug!("empty source, no packets to decode");
            let stream = metadata
                .stream(0)
                .or_else(|| metadata.streams().next())
                .ok_or(DecodeError::EndOfStream)?;

            return Ok(CtfDataStream {
                cursor,
                metadata,
                stream,
                config,
                trace_header: StructValue::new(),
                packet: PacketContext::default(),
                packet_index: 0,
                state: StreamState::EndOfStream,
                pending: None,
                clock: 0,
            });
        }

        let trace_header =
            TypeDecoder::new(&config).decode_struct(&mut cursor, &metadata.trace().packet_header)?;

        if let Some(magic) = trace_header.get("magic").and_then(Value::as_u64) {
            if magic != CTF_MAGIC {
                return Err(DecodeError::unsupported(format!(
                    "bad trace magic {:#x}, expected {:#x}",
                    magic, CTF_MAGIC
                )));
            }
        }

        let stream_id = match trace_header.get("stream_id") {
            Some(value) => value.as_u64().ok_or_else(|| {
                DecodeError::corrupt(0, "trace header `stream_id` is not an unsigned integer")
            })?,
            None => 0,
        };
        let stream = metadata.stream(stream_id).ok_or_else(|| {
            DecodeError::corrupt(0, format!("trace header names unknown stream {}", stream_id))
        })?;

        debug!("decoding stream {} with {} event kinds", stream_id, stream.num_events());

        let mut session = CtfDataStream {
            cursor,
            metadata,
            stream,
            config,
            trace_header,
            packet: PacketContext::default(),
            packet_index: 0,
            state: StreamState::Initialized,
            pending: None,
            clock: 0,
        };

        match session.enter_packet() {
            Ok(true) => session.state = StreamState::PacketReady,
            Ok(false) => session.state = StreamState::EndOfStream,
            Err(e) => return Err(e),
        }

        Ok(session)
    }

    /// Decodes the next event header, moving on to the next packet when the
    /// current one is exhausted. Returns `None` at the end of the stream.
    ///
    /// If the payload of the previous event was not read it is skipped.
    pub fn next_event_header(&mut self) -> Result<Option<EventHeader<'m>>> {
        match self.state {
            StreamState::EndOfStream => return Ok(None),
            StreamState::Failed => return Err(DecodeError::SessionFailed),
            _ => {}
        }

        let result = self.advance();
        match result {
            Ok(header) => {
                self.pending = Some(header.definition);
                self.state = StreamState::EventHeaderReady;
                Ok(Some(header))
            }
            Err(DecodeError::EndOfStream) => {
                debug!("end of stream after {} packets", self.packet_index);
                self.state = StreamState::EndOfStream;
                Ok(None)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Iterates over the remaining event headers, skipping every payload.
    pub fn event_headers(&mut self) -> EventHeaders<'_, 'm, R> {
        EventHeaders { stream: self }
    }

    /// Decodes the payload of the event whose header was returned last.
    /// `definition` must be the one that header named.
    pub fn read_event(&mut self, definition: &EventDefinition) -> Result<StructValue> {
        self.take_pending(definition)?;

        let result = TypeDecoder::new(&self.config).decode_struct(&mut self.cursor, &definition.fields);
        match result {
            Ok(value) => {
                self.state = StreamState::PacketReady;
                Ok(value)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Like `read_event`, but payloads of a fixed size are skipped without
    /// being decoded, in which case `None` is returned. The skipped bytes are
    /// still available through `record_bytes()`.
    pub fn read_event_fast(&mut self, definition: &EventDefinition) -> Result<Option<StructValue>> {
        if !definition.is_fixed_size {
            return self.read_event(definition).map(Some);
        }

        self.take_pending(definition)?;
        match skip_fixed(&mut self.cursor, &definition.fields, definition.fixed_size_bits) {
            Ok(()) => {
                self.state = StreamState::PacketReady;
                Ok(None)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// The raw bytes of the current event record, header included, as far
    /// as it has been consumed.
    pub fn record_bytes(&self) -> &[u8] {
        self.cursor.record_bytes()
    }

    pub fn packet_context(&self) -> &PacketContext {
        &self.packet
    }

    /// Number of packet contexts decoded so far.
    pub fn packet_index(&self) -> u64 {
        self.packet_index
    }

    pub fn stream_definition(&self) -> &'m StreamDefinition {
        self.stream
    }

    pub fn metadata(&self) -> &'m Metadata {
        self.metadata
    }

    pub fn trace_header(&self) -> &StructValue {
        &self.trace_header
    }

    pub fn cpu(&self) -> u64 {
        self.packet.cpu_id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn packet_offset_bits(&self) -> u64 {
        self.cursor.packet_offset_bits()
    }

    /// Bytes consumed from the source so far.
    pub fn stream_offset_bytes(&self) -> u64 {
        self.cursor.stream_offset_bytes()
    }

    pub fn into_inner(self) -> R {
        self.cursor.into_inner()
    }

    fn advance(&mut self) -> Result<EventHeader<'m>> {
        if let Some(definition) = self.pending.take() {
            debug!("skipping unread payload of `{}`", definition.name);
            if definition.is_fixed_size {
                skip_fixed(&mut self.cursor, &definition.fields, definition.fixed_size_bits)?;
            } else {
                TypeDecoder::new(&self.config).decode_struct(&mut self.cursor, &definition.fields)?;
            }
            self.state = StreamState::PacketReady;
        }

        loop {
            if self.cursor.content_exhausted() {
                if !self.cursor.next_packet()? {
                    warn!(
                        "stream ends inside the padding of packet {}",
                        self.packet_index
                    );
                    return Err(DecodeError::EndOfStream);
                }
                if !self.enter_packet()? {
                    return Err(DecodeError::EndOfStream);
                }
                continue;
            }

            // Inside declared content this never fails; a missing record
            // surfaces as truncation when its header is read.
            self.cursor.begin_record();
            if !self.cursor.has_more_data()? {
                return Err(DecodeError::EndOfStream);
            }
            break;
        }

        self.decode_event_header()
    }

    fn decode_event_header(&mut self) -> Result<EventHeader<'m>> {
        let offset = self.cursor.packet_offset_bits();
        let value = TypeDecoder::new(&self.config)
            .decode_struct(&mut self.cursor, &self.stream.event_header)?;

        let (id, timestamp) = header_fields(&self.stream.event_header, &value);
        let id = id.unwrap_or(0);
        let definition = self.stream.event(id).ok_or_else(|| {
            DecodeError::corrupt(
                offset,
                format!("unknown event id {} in stream {}", id, self.stream.id),
            )
        })?;

        let (timestamp, clock) = match timestamp {
            Some((timestamp, size_bits)) => (timestamp, self.update_clock(timestamp, size_bits)),
            None => (0, self.clock),
        };

        trace!(
            "event `{}` (id {}) at bit {}, clock {}",
            definition.name,
            id,
            offset,
            clock
        );

        Ok(EventHeader {
            definition,
            timestamp,
            clock,
            value,
        })
    }

    /// Decodes a packet context at the current position. Returns `false` if
    /// the source ends before one is complete.
    fn enter_packet(&mut self) -> Result<bool> {
        self.cursor.begin_record();
        if !self.cursor.has_more_data()? {
            return Ok(false);
        }

        let context = match TypeDecoder::new(&self.config)
            .decode_struct(&mut self.cursor, &self.stream.packet_context)
        {
            Ok(context) => context,
            Err(DecodeError::CorruptData { .. }) if self.cursor.is_eof() => {
                warn!("stream ends inside the context of packet {}", self.packet_index);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let packet = PacketContext::from_value(&context);
        self.cursor
            .set_packet_bounds(packet.content_size_bits, packet.packet_size_bits)?;

        debug!(
            "packet {}: content {} bits, packet {} bits, cpu {}, {} events discarded",
            self.packet_index,
            packet.content_size_bits,
            packet.packet_size_bits,
            packet.cpu_id,
            packet.events_discarded
        );

        self.packet = packet;
        self.packet_index += 1;
        self.clock = packet.timestamp_begin;
        self.state = StreamState::PacketReady;
        Ok(true)
    }

    /// Extends a timestamp of `size_bits` bits to the full clock, assuming
    /// less than one wrap-around since the previous value.
    fn update_clock(&mut self, timestamp: u64, size_bits: u32) -> u64 {
        if size_bits >= 64 {
            self.clock = timestamp;
            return self.clock;
        }

        let mask = (1u64 << size_bits) - 1;
        let mut clock = (self.clock & !mask) | (timestamp & mask);
        if timestamp & mask < self.clock & mask {
            clock = clock.wrapping_add(mask + 1);
        }

        self.clock = clock;
        clock
    }

    // Misuse leaves the session and the pending header untouched.
    fn take_pending(&mut self, definition: &EventDefinition) -> Result<()> {
        if self.state == StreamState::Failed {
            return Err(DecodeError::SessionFailed);
        }

        let pending = self.pending.ok_or(DecodeError::NoPendingEvent)?;
        if pending.id != definition.id {
            return Err(DecodeError::EventMismatch {
                pending: pending.id,
                requested: definition.id,
            });
        }

        self.pending = None;
        Ok(())
    }

    fn fail(&mut self, error: DecodeError) -> DecodeError {
        debug!(
            "decode failed at byte {} of the source: {}",
            self.cursor.stream_offset_bytes(),
            error
        );
        self.state = StreamState::Failed;
        self.pending = None;
        error
    }
}

pub struct EventHeaders<'s, 'm, R> {
    stream: &'s mut CtfDataStream<'m, R>,
}

impl<'s, 'm, R: Read> Iterator for EventHeaders<'s, 'm, R> {
    type Item = Result<EventHeader<'m>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stream.state == StreamState::Failed {
            return None;
        }
        self.stream.next_event_header().transpose()
    }
}

fn skip_fixed<R: Read>(cursor: &mut BitCursor<R>, fields: &StructType, size_bits: u64) -> Result<()> {
    cursor.align(fields.align_bits())?;
    cursor.read_bits(size_bits)?;
    Ok(())
}

/// Extracts the event id and the timestamp, with its width, from a decoded
/// event header.
///
/// Headers with a variant `v` follow the compact/extended convention: the
/// `"extended"` member carries the real id and a wide timestamp, any other
/// member only a timestamp, with the id taken from the enum `id`.
fn header_fields(ty: &StructType, value: &StructValue) -> (Option<u64>, Option<(u64, u32)>) {
    let top_id = value.get("id").and_then(Value::as_u64);

    let (tag, member) = match value.get("v").and_then(Value::as_variant) {
        Some(selected) => selected,
        None => return (top_id, timestamp_in(Some(ty), Some(value))),
    };

    let member_ty = match ty.get("v") {
        Some(TypeNode::Variant(variant)) => variant.get(tag).and_then(TypeNode::as_struct),
        _ => None,
    };
    let member = member.as_struct();

    let id = if tag == "extended" {
        member.and_then(|m| m.get("id")).and_then(Value::as_u64)
    } else {
        top_id
    };

    (id, timestamp_in(member_ty, member))
}

fn timestamp_in(ty: Option<&StructType>, value: Option<&StructValue>) -> Option<(u64, u32)> {
    let size_bits = ty?.get("timestamp")?.integer_size_bits()?;
    let timestamp = value?.get("timestamp")?.as_u64()?;
    Some((timestamp, size_bits))
}
