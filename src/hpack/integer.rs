//! RFC 7541 §5.1 integer representation: an N-bit prefix, continued with
//! base-128 groups (7 payload bits + 1 continuation bit) when the value
//! doesn't fit the prefix.

use bytes::{Buf, BufMut, BytesMut};

/// HPACK bounds the accumulator to fit a u32 (RFC 7541 implementation note);
/// this is also our bomb-defense ceiling for a single integer's continuation
/// bytes (~10 of them at most for a 32-bit value).
const MAX_CONTINUATION_BYTES: usize = 10;

/// Encodes `value` with an N-bit prefix, OR'd into the high bits of
/// `prefix_value` (the representation's flag bits, already shifted into
/// place by the caller -- e.g. 0x80 for an indexed field).
pub fn encode(prefix_bits: u8, prefix_value: u8, value: u64, out: &mut BytesMut) {
    debug_assert!(prefix_bits >= 1 && prefix_bits <= 8);
    let max_prefix = (1u64 << prefix_bits) - 1;
    if value < max_prefix {
        out.put_u8(prefix_value | value as u8);
        return;
    }
    out.put_u8(prefix_value | max_prefix as u8);
    let mut remaining = value - max_prefix;
    while remaining >= 128 {
        out.put_u8(((remaining % 128) | 128) as u8);
        remaining /= 128;
    }
    out.put_u8(remaining as u8);
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegerDecodeError {
    #[error("integer prefix truncated")]
    Truncated,
    #[error("integer continuation exceeds {0} bytes")]
    TooLong(usize),
    #[error("integer overflowed u32 accumulator")]
    Overflow,
}

/// Decodes an N-bit-prefix integer from `buf`, where the first byte (the
/// prefix byte) has already been peeked by the caller to extract any flag
/// bits; `prefix_bits` is how many low bits of that first byte hold the
/// integer prefix.
pub fn decode(prefix_bits: u8, first_byte: u8, buf: &mut impl Buf) -> Result<u64, IntegerDecodeError> {
    let max_prefix = (1u64 << prefix_bits) - 1;
    let prefix_value = (first_byte as u64) & max_prefix;
    if prefix_value < max_prefix {
        return Ok(prefix_value);
    }

    let mut value = max_prefix;
    let mut m = 0u32;
    let mut continuation_bytes = 0usize;
    loop {
        if !buf.has_remaining() {
            return Err(IntegerDecodeError::Truncated);
        }
        continuation_bytes += 1;
        if continuation_bytes > MAX_CONTINUATION_BYTES {
            return Err(IntegerDecodeError::TooLong(MAX_CONTINUATION_BYTES));
        }
        let byte = buf.get_u8();
        let addend = ((byte & 0x7f) as u64)
            .checked_shl(m)
            .ok_or(IntegerDecodeError::Overflow)?;
        value = value.checked_add(addend).ok_or(IntegerDecodeError::Overflow)?;
        if value > u32::MAX as u64 {
            return Err(IntegerDecodeError::Overflow);
        }
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        m += 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_value_fits_prefix() {
        // RFC 7541 C.1.1: 10 encoded with a 5-bit prefix is 0b00001010.
        let mut out = BytesMut::new();
        encode(5, 0, 10, &mut out);
        assert_eq!(out.as_ref(), &[0b0000_1010]);
    }

    #[test]
    fn large_value_continues() {
        // RFC 7541 C.1.2: 1337 encoded with a 5-bit prefix is {1f 9a 0a}.
        let mut out = BytesMut::new();
        encode(5, 0, 1337, &mut out);
        assert_eq!(out.as_ref(), &[0x1f, 0x9a, 0x0a]);

        let mut buf = out.freeze();
        let first = buf[0];
        buf.advance(1);
        assert_eq!(decode(5, first, &mut buf).unwrap(), 1337);
    }

    #[test]
    fn continuation_overflow_is_rejected() {
        // All-ones prefix followed by an unbounded run of 0xff continuation bytes.
        let mut bytes = vec![0xffu8; 15];
        bytes[14] = 0x7f; // terminate eventually, but past the cap
        let mut buf = bytes::Bytes::from(bytes);
        let first = buf[0];
        buf.advance(1);
        assert_eq!(decode(7, first, &mut buf).unwrap_err(), IntegerDecodeError::TooLong(MAX_CONTINUATION_BYTES));
    }
}
