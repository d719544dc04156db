//! Prefixed integers (RFC 7541 §5.1).

use crate::error::HpackError;

/// Decode an integer whose first octet carries `prefix_bits` value bits.
///
/// Returns the value and the number of octets consumed. Bits above the
/// prefix in the first octet are ignored.
pub fn decode_integer(input: &[u8], prefix_bits: u8) -> Result<(u64, usize), HpackError> {
    debug_assert!((1..=8).contains(&prefix_bits), "prefix out of range");
    let Some(&first) = input.first() else {
        return Err(HpackError::IntegerTruncated);
    };
    let max_prefix = prefix_max(prefix_bits);
    let mut value = u64::from(first) & max_prefix;
    if value < max_prefix {
        return Ok((value, 1));
    }

    let mut shift = 0u32;
    for (i, &byte) in input.iter().enumerate().skip(1) {
        let chunk = u64::from(byte & 0x7F);
        if shift >= u64::BITS || (chunk << shift) >> shift != chunk {
            return Err(HpackError::IntegerOverflow);
        }
        value = value
            .checked_add(chunk << shift)
            .ok_or(HpackError::IntegerOverflow)?;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }
    Err(HpackError::IntegerTruncated)
}

/// Append `value` with `prefix_bits` bits of prefix. `flags` supplies the
/// bits above the prefix in the first octet.
pub fn encode_integer(value: u64, prefix_bits: u8, flags: u8, out: &mut Vec<u8>) {
    debug_assert!((1..=8).contains(&prefix_bits), "prefix out of range");
    let max_prefix = prefix_max(prefix_bits);
    if value < max_prefix {
        out.push(flags | value as u8);
        return;
    }
    out.push(flags | max_prefix as u8);
    let mut rest = value - max_prefix;
    while rest >= 0x80 {
        out.push((rest & 0x7F) as u8 | 0x80);
        rest >>= 7;
    }
    out.push(rest as u8);
}

fn prefix_max(prefix_bits: u8) -> u64 {
    (1u64 << prefix_bits) - 1
}
