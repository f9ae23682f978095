//! The bit cursor owns the record buffer of a decode session and tracks the
//! read position, at bit granularity, relative to the start of the current
//! packet.
//!
//! Bytes are pulled from the underlying source lazily: a read of `n` bits
//! only fetches the bytes needed to cover them. The buffer holds the bytes of
//! the record being decoded; `begin_record()` discards everything before the
//! byte holding the current position so the buffer does not grow with the
//! packet.

use crate::bits;
use crate::error::{DecodeError, Result};
use ctfmeta::ByteOrder;
use std::io::{self, ErrorKind, Read};

#[derive(Debug)]
pub struct BitCursor<R> {
    source: R,
    // Bytes `buffer_base .. buffer_base + buffer.len()` of the current packet.
    buffer: Vec<u8>,
    buffer_base: u64,
    bit_pos: u64,
    record_start: u64,
    content_size_bits: Option<u64>,
    packet_size_bits: Option<u64>,
    stream_offset: u64,
    eof: bool,
}

impl<R: Read> BitCursor<R> {
    pub fn new(source: R) -> BitCursor<R> {
        BitCursor::with_capacity(source, 0)
    }

    pub fn with_capacity(source: R, capacity: usize) -> BitCursor<R> {
        BitCursor {
            source,
            buffer: Vec::with_capacity(capacity),
            buffer_base: 0,
            bit_pos: 0,
            record_start: 0,
            content_size_bits: None,
            packet_size_bits: None,
            stream_offset: 0,
            eof: false,
        }
    }

    /// Advances the position by `n` bits, fetching bytes as needed. Returns
    /// the packet-relative bit offset at which the read began.
    pub fn read_bits(&mut self, n: u64) -> Result<u64> {
        let start = self.bit_pos;
        let end = start + n;

        if let Some(limit) = self.content_size_bits {
            if end > limit {
                return Err(DecodeError::corrupt(
                    start,
                    format!("read of {} bits runs past packet content ({} bits)", n, limit),
                ));
            }
        }

        let needed = (end + 7) / 8;
        let loaded = self.loaded_bytes();
        if needed > loaded && !self.refill((needed - loaded) as usize)? {
            return Err(DecodeError::corrupt(
                start,
                "stream ends in the middle of a record",
            ));
        }

        self.bit_pos = end;
        Ok(start)
    }

    /// Skips padding up to the next multiple of `boundary_bits`.
    pub fn align(&mut self, boundary_bits: u32) -> Result<()> {
        if boundary_bits <= 1 {
            return Ok(());
        }
        if !boundary_bits.is_power_of_two() {
            return Err(DecodeError::unsupported(format!(
                "alignment of {} bits is not a power of two",
                boundary_bits
            )));
        }

        let aligned = ctfmeta::align_up(self.bit_pos, boundary_bits);
        if aligned != self.bit_pos {
            self.read_bits(aligned - self.bit_pos)?;
        }

        Ok(())
    }

    /// Appends `additional` bytes from the source to the buffer. Returns
    /// `false` and sets the end-of-stream flag when the source could not
    /// provide all of them; the bytes it did provide are kept.
    pub fn refill(&mut self, additional: usize) -> Result<bool> {
        if additional == 0 {
            return Ok(true);
        }

        let filled = self.buffer.len();
        let required = filled + additional;

        if required > self.buffer.capacity() {
            // Grow by half again, rounded up to a multiple of 8 bytes.
            let target = (required + required / 2 + 7) & !7;
            self.buffer.reserve_exact(target - filled);
        }

        self.buffer.resize(required, 0);
        let read = read_full(&mut self.source, &mut self.buffer[filled..])?;
        self.buffer.truncate(filled + read);
        self.stream_offset += read as u64;

        if read < additional {
            self.eof = true;
            return Ok(false);
        }

        Ok(true)
    }

    /// Marks the current position as the start of a new record and drops the
    /// bytes preceding it from the buffer.
    pub fn begin_record(&mut self) {
        let keep_from = ((self.bit_pos / 8).saturating_sub(self.buffer_base) as usize)
            .min(self.buffer.len());

        self.buffer.drain(..keep_from);
        self.buffer_base += keep_from as u64;
        self.record_start = self.bit_pos;
    }

    /// Whether another record can start at the current position: either the
    /// current packet declares more content, or the source has at least one
    /// byte after the one holding the position.
    pub fn has_more_data(&mut self) -> Result<bool> {
        // Declared content is there, or reading it fails as truncation.
        if matches!(self.content_size_bits, Some(limit) if self.bit_pos < limit) {
            return Ok(true);
        }

        let next_byte = (self.bit_pos + 7) / 8;
        if next_byte < self.loaded_bytes() {
            return Ok(true);
        }
        if self.eof {
            return Ok(false);
        }

        // Bytes between the position and `next_byte` are already loaded.
        self.refill(1)
    }

    /// Reads an integer of 1 to 64 bits that has already been aligned.
    pub fn read_uint(&mut self, size_bits: u32, byte_order: ByteOrder) -> Result<u64> {
        let start = self.read_bits(u64::from(size_bits))?;
        let (bytes, shift) = self.window(start);

        Ok(if bits::is_fast_path(shift, size_bits) {
            bits::read_aligned(bytes, size_bits, byte_order)
        } else {
            bits::read_unaligned(bytes, shift, size_bits, byte_order)
        })
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        Ok(self.read_uint(8, ByteOrder::LittleEndian)? as u8)
    }

    /// The buffered bytes starting with the one holding `bit_offset`, and the
    /// offset of that bit within the first byte.
    fn window(&self, bit_offset: u64) -> (&[u8], u32) {
        let index = (bit_offset / 8 - self.buffer_base) as usize;
        (&self.buffer[index..], (bit_offset % 8) as u32)
    }

    /// Installs the bounds declared by a freshly decoded packet context.
    /// Zero sizes mean the packet extends to the end of the source.
    pub fn set_packet_bounds(&mut self, content_size_bits: u64, packet_size_bits: u64) -> Result<()> {
        if content_size_bits == 0 && packet_size_bits == 0 {
            self.content_size_bits = None;
            self.packet_size_bits = None;
            return Ok(());
        }

        if content_size_bits > packet_size_bits {
            return Err(DecodeError::corrupt(
                self.bit_pos,
                format!(
                    "content size {} exceeds packet size {}",
                    content_size_bits, packet_size_bits
                ),
            ));
        }

        if content_size_bits < self.bit_pos {
            return Err(DecodeError::corrupt(
                self.bit_pos,
                format!(
                    "content size {} ends before the packet context",
                    content_size_bits
                ),
            ));
        }

        self.content_size_bits = Some(content_size_bits);
        self.packet_size_bits = Some(packet_size_bits);
        Ok(())
    }

    /// Whether the position has reached the end of the current packet's
    /// content.
    pub fn content_exhausted(&self) -> bool {
        matches!(self.content_size_bits, Some(limit) if self.bit_pos >= limit)
    }

    /// Skips the padding of the current packet and resets the position to the
    /// start of the next one. Returns `false` if the source ends first.
    pub fn next_packet(&mut self) -> Result<bool> {
        let packet_end = self.packet_size_bits.map_or(0, |bits| (bits + 7) / 8);
        let loaded = self.loaded_bytes();

        if packet_end > loaded {
            let padding = packet_end - loaded;
            let skipped = io::copy(&mut (&mut self.source).take(padding), &mut io::sink())?;
            self.stream_offset += skipped;

            if skipped < padding {
                self.eof = true;
                return Ok(false);
            }
            self.buffer.clear();
        } else {
            // Bytes past the end of the packet belong to the next one.
            let keep_from = (packet_end.saturating_sub(self.buffer_base) as usize)
                .min(self.buffer.len());
            self.buffer.drain(..keep_from);
        }

        self.buffer_base = 0;
        self.bit_pos = 0;
        self.record_start = 0;
        self.content_size_bits = None;
        self.packet_size_bits = None;
        Ok(true)
    }

    /// The bytes of the record started by the last `begin_record()`, up to
    /// and including the byte holding the current position.
    pub fn record_bytes(&self) -> &[u8] {
        let start = (self.record_start / 8 - self.buffer_base) as usize;
        let end = (((self.bit_pos + 7) / 8 - self.buffer_base) as usize).min(self.buffer.len());
        &self.buffer[start.min(end)..end]
    }

    pub fn packet_offset_bits(&self) -> u64 {
        self.bit_pos
    }

    /// Number of bytes consumed from the source so far.
    pub fn stream_offset_bytes(&self) -> u64 {
        self.stream_offset
    }

    pub fn content_size_bits(&self) -> Option<u64> {
        self.content_size_bits
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn into_inner(self) -> R {
        self.source
    }

    fn loaded_bytes(&self) -> u64 {
        self.buffer_base + self.buffer.len() as u64
    }
}

// Like `Read::read_exact`, but reports how much was read instead of failing
// on a short read.
fn read_full<R: Read>(source: &mut R, mut buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;

    while !buf.is_empty() {
        match source.read(buf) {
            Ok(0) => break,
            Ok(n) => {
                total += n;
                buf = &mut buf[n..];
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }

    Ok(total)
}
