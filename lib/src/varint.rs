//! Unsigned LEB128 integers, the framing primitive of the CAR format.
//!
//! Decoding is implemented over raw buffers so that it can run against both
//! byte-source transports; encoding delegates to [`integer_encoding`].

use bytes::BytesMut;
use integer_encoding::VarInt;

use crate::{source::Source, Error};

/// Most-significant bit of a varint byte, the continuation flag.
const CONTINUATION: u8 = 0b1000_0000;

/// A framing varint never spans more than 9 bytes, which caps the decoded
/// value at exactly `2^63 - 1`.
pub(crate) const MAX_VARINT_LENGTH: usize = 9;

/// Decode a varint from the start of `buffer`.
///
/// Returns the value and the number of bytes consumed. A continuation bit on
/// the 9th byte is rejected; a buffer ending mid-varint reads as truncation.
pub(crate) fn decode(buffer: &[u8]) -> Result<(u64, usize), Error> {
    let mut value = 0u64;
    for (i, &byte) in buffer.iter().take(MAX_VARINT_LENGTH).enumerate() {
        if i == MAX_VARINT_LENGTH - 1 && byte & CONTINUATION != 0 {
            return Err(Error::VarintTooLongError);
        }
        value |= u64::from(byte & !CONTINUATION) << (7 * i);
        if byte & CONTINUATION == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(Error::UnexpectedEndError)
}

/// Read a varint off the source, consuming exactly the encoded length.
pub(crate) async fn read<S: Source>(source: &mut S) -> Result<u64, Error> {
    let peeked = source.upto(MAX_VARINT_LENGTH).await?;
    let (value, consumed) = decode(&peeked)?;
    source.seek(consumed as u64).await?;
    Ok(value)
}

/// Append the minimal varint encoding of `value` to `buffer`.
pub(crate) fn write(buffer: &mut BytesMut, value: u64) {
    let mut scratch = [0u8; 10];
    let encoded = value.encode_var(&mut scratch);
    buffer.extend_from_slice(&scratch[..encoded]);
}
