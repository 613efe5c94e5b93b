//! CAR headers: the CARv1 DAG-CBOR map and the fixed CARv2 preamble.

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use ipld_core::{cid::Cid, codec::Codec};
use serde::{Deserialize, Serialize};
use serde_ipld_dagcbor::codec::DagCborCodec;

use crate::{source::Source, varint, Error};

/// The pragma for a CARv2. This is also a valid CARv1 header, with version 2 and no root CIDs.
pub const PRAGMA: [u8; 11] = [
    0x0a, // unit(10)
    0xa1, // map(1)
    0x67, // string(7)
    0x76, 0x65, 0x72, 0x73, 0x69, 0x6f, 0x6e, // "version"
    0x02, // uint(2)
];

/// Size of the fixed CARv2 record following the pragma:
/// 16 bytes of characteristics and three little-endian u64 fields.
const V2_HEADER_SIZE: usize = 40;

bitflags! {
    /// Characteristics of the enclosed data.
    ///
    /// Only the `fully-indexed` bit is defined by the
    /// [specification](https://ipld.io/specs/transport/car/carv2/#characteristics);
    /// the remaining bits are preserved as read but never interpreted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Characteristics: u128 {
        const FULLY_INDEXED = 1 << 127;
    }
}

impl Characteristics {
    /// Check whether the `fully-indexed` characteristic is set.
    #[inline]
    pub const fn is_fully_indexed(&self) -> bool {
        self.intersects(Self::FULLY_INDEXED)
    }
}

/// CAR header: format version and root CIDs.
///
/// For a CARv2 source the version is 2 and the roots are spliced in from
/// the embedded CARv1 header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Header {
    version: u64,

    /// Root [`Cid`]s for the contained data. May be empty.
    pub roots: Vec<Cid>,
}

impl Header {
    /// Construct a new [`Header`].
    ///
    /// The version is always 1; the writer does not produce CARv2.
    pub fn new(roots: Vec<Cid>) -> Self {
        Self { version: 1, roots }
    }

    /// Archive version, 1 or 2.
    pub fn version(&self) -> u64 {
        self.version
    }
}

/// The fixed-size CARv2 header, read from the 40 bytes following the pragma.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V2Header {
    /// Describes certain features of the enclosed data.
    pub characteristics: Characteristics,
    /// Byte-offset from the beginning of the pragma to the first byte of the CARv1 data payload.
    pub data_offset: u64,
    /// Byte-length of the CARv1 data payload.
    pub data_size: u64,
    /// Byte-offset from the beginning of the pragma to the first byte of the index payload.
    /// This value may be 0 to indicate the absence of index data.
    pub index_offset: u64,
}

/// Read one length-prefixed header frame.
async fn read_raw_header<S: Source>(source: &mut S) -> Result<Bytes, Error> {
    let length = varint::read(source).await?;
    if length == 0 {
        return Err(Error::ZeroLengthHeaderError);
    }
    source.exactly(length as usize).await
}

/// Decode a CARv1 header map.
pub(crate) fn decode_v1_header(buffer: &[u8]) -> Result<Header, Error> {
    let header: Header = DagCborCodec::decode_from_slice(buffer)?;
    if header.version != 1 {
        return Err(Error::UnsupportedVersionError(header.version));
    }
    Ok(header)
}

/// Read the archive header, detecting CARv1 vs CARv2.
///
/// CARv2 is recognised by the exact pragma bytes. Its characteristics
/// record is consumed, the source is positioned at the embedded CARv1
/// payload and bounded to `data_size`, so that framing halts at the end of
/// the payload rather than running into the index.
pub(crate) async fn read_header<S: Source>(
    source: &mut S,
) -> Result<(Header, Option<V2Header>), Error> {
    let buffer = read_raw_header(source).await?;
    if buffer[..] != PRAGMA[1..] {
        return Ok((decode_v1_header(&buffer)?, None));
    }

    let buffer = source.exactly(V2_HEADER_SIZE).await?;
    let header = V2Header {
        characteristics: Characteristics::from_bits_retain(LittleEndian::read_u128(&buffer[..16])),
        data_offset: LittleEndian::read_u64(&buffer[16..24]),
        data_size: LittleEndian::read_u64(&buffer[24..32]),
        index_offset: LittleEndian::read_u64(&buffer[32..40]),
    };

    let position = source.pos();
    if header.data_offset < position {
        return Err(Error::InvalidDataOffsetError(header.data_offset));
    }
    source.seek(header.data_offset - position).await?;
    source.limit(header.data_size);

    let inner = read_raw_header(source).await?;
    if inner[..] == PRAGMA[1..] {
        return Err(Error::UnsupportedVersionError(2));
    }
    let Header { roots, .. } = decode_v1_header(&inner)?;
    Ok((Header { version: 2, roots }, Some(header)))
}
