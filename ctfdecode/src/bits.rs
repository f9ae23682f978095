//! Integer extraction from bit-packed byte slices.
//!
//! CTF packs little endian fields least significant bit first: bit `p` of the
//! stream lives in byte `p / 8` at bit `p % 8` counted from the LSB, and the
//! first bit of a field is its least significant bit. Big endian fields are
//! packed the other way around: bit `p` sits at bit `7 - p % 8` and the first
//! bit of a field is its most significant bit.
//!
//! Both functions below take a slice whose first byte holds the first bit of
//! the field. The caller guarantees the slice is long enough.

use byteorder::{BigEndian, ByteOrder as _, LittleEndian};
use ctfmeta::ByteOrder;

/// Whether a field can be read with `read_aligned`.
#[inline]
pub fn is_fast_path(bit_offset: u32, size_bits: u32) -> bool {
    bit_offset == 0 && matches!(size_bits, 8 | 16 | 32 | 64)
}

/// Reads a byte aligned integer of 8, 16, 32 or 64 bits.
#[inline]
pub fn read_aligned(bytes: &[u8], size_bits: u32, byte_order: ByteOrder) -> u64 {
    match (size_bits, byte_order) {
        (8, _) => u64::from(bytes[0]),
        (16, ByteOrder::LittleEndian) => u64::from(LittleEndian::read_u16(bytes)),
        (16, ByteOrder::BigEndian) => u64::from(BigEndian::read_u16(bytes)),
        (32, ByteOrder::LittleEndian) => u64::from(LittleEndian::read_u32(bytes)),
        (32, ByteOrder::BigEndian) => u64::from(BigEndian::read_u32(bytes)),
        (64, ByteOrder::LittleEndian) => LittleEndian::read_u64(bytes),
        (64, ByteOrder::BigEndian) => BigEndian::read_u64(bytes),
        _ => unreachable!("no fast path for {} bit integers", size_bits),
    }
}

/// Reads an integer of 1 to 64 bits starting `bit_offset` (0..8) bits into
/// the first byte of `bytes`.
pub fn read_unaligned(bytes: &[u8], bit_offset: u32, size_bits: u32, byte_order: ByteOrder) -> u64 {
    debug_assert!(bit_offset < 8);
    debug_assert!(size_bits >= 1 && size_bits <= 64);

    let mut value = 0u64;
    let mut done = 0u32;
    let mut pos = bit_offset as usize;

    while done < size_bits {
        let byte = bytes[pos / 8];
        let shift = (pos % 8) as u32;
        let take = (8 - shift).min(size_bits - done);
        let mask = (1u64 << take) - 1;

        match byte_order {
            ByteOrder::LittleEndian => {
                let chunk = u64::from(byte >> shift) & mask;
                value |= chunk << done;
            }
            ByteOrder::BigEndian => {
                let chunk = u64::from(byte >> (8 - shift - take)) & mask;
                value = (value << take) | chunk;
            }
        }

        done += take;
        pos += take as usize;
    }

    value
}

/// Sign-extends the low `size_bits` bits of `raw`.
#[inline]
pub fn sign_extend(raw: u64, size_bits: u32) -> i64 {
    if size_bits >= 64 {
        return raw as i64;
    }

    let sign_bit = 1u64 << (size_bits - 1);
    if raw & sign_bit != 0 {
        (raw | (u64::MAX << size_bits)) as i64
    } else {
        raw as i64
    }
}
