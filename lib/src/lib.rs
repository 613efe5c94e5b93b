#![warn(unused_crate_dependencies)]

mod cid;
mod frame;
mod header;
mod reader;
mod source;
mod stream;
mod varint;
mod writer;

use std::sync::Arc;

use bytes::Bytes;
use digest::Digest;
use ipld_core::cid::multihash::Multihash;
use sha2::{Sha256, Sha512};

pub use crate::{
    header::{Characteristics, Header, V2Header, PRAGMA},
    reader::Reader,
    source::{BytesSource, Source, StreamSource},
    stream::{BlockStream, CidStream, IndexEntry, Indexer},
    writer::{replace_roots, Writer},
};

// We need to expose this because roots and blocks are `Cid`-addressed.
pub use ipld_core::cid::Cid;

/// Largest section a decoder accepts by default, 32 MiB.
///
/// Section lengths are attacker-controlled on untrusted input; the ceiling
/// keeps a forged length varint from turning into a giant allocation.
pub const DEFAULT_MAX_SECTION_SIZE: u64 = 32 * 1024 * 1024;

/// CAR handling errors.
///
/// Upstream causes are held behind [`Arc`] so errors stay cloneable; an
/// errored streaming surface replays its failure on every subsequent step.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Returned when a header carries a version this crate does not handle.
    ///
    /// Version 1 is decoded directly and version 2 is recognised by its
    /// [pragma](https://ipld.io/specs/transport/car/carv2/#pragma);
    /// anything else ends up here.
    #[error("unsupported CAR version {0}")]
    UnsupportedVersionError(u64),

    /// CIDv0 is recognised by its fixed prefix; otherwise only CIDv1 is
    /// valid inside a section.
    #[error("unsupported CID version {0}")]
    UnsupportedCidVersionError(u64),

    /// The header length varint was 0.
    #[error("invalid CAR header (zero length)")]
    ZeroLengthHeaderError,

    /// A section length varint was 0. Trailing NUL bytes after a valid
    /// archive surface as this error.
    #[error("invalid CAR section (zero length)")]
    ZeroLengthSectionError,

    /// The source ended in the middle of a frame.
    #[error("unexpected end of data")]
    UnexpectedEndError,

    /// A varint carried a continuation bit on its 9th byte; values past
    /// `2^63 - 1` are not representable in the format.
    #[error("varint too long")]
    VarintTooLongError,

    /// A section length exceeded the configured ceiling.
    /// See [`DEFAULT_MAX_SECTION_SIZE`].
    #[error("section length {length} exceeds the maximum of {maximum} bytes")]
    SectionTooLargeError {
        /// Length declared by the section varint.
        length: u64,
        /// Ceiling the decoder was configured with.
        maximum: u64,
    },

    /// A CID was longer than the section said to contain it.
    #[error("CID overruns the declared section length")]
    CidOverrunError,

    /// A multihash declared a digest longer than the 64 bytes a
    /// [`Cid`] can carry.
    #[error("multihash digest length {0} exceeds the maximum of 64 bytes")]
    DigestTooLongError(u64),

    /// [`multihash_of`] only computes the sha2 family.
    #[error("cannot compute multihash code {0:#x}")]
    UnsupportedMultihashError(u64),

    /// A CARv2 `data_offset` pointed before the characteristics record;
    /// sources only seek forward.
    #[error("invalid CARv2 data offset {0}")]
    InvalidDataOffsetError(u64),

    /// Streaming surfaces are single-shot; the lazy sequence can only be
    /// created once.
    #[error("cannot read {0} more than once")]
    AlreadyConsumedError(&'static str),

    /// [`replace_roots`] requires the replacement header to occupy exactly
    /// the bytes of the existing one.
    #[error("replacement header is {received} bytes, the existing header occupies {expected}")]
    HeaderLengthMismatchError {
        /// Framed length of the existing header.
        expected: usize,
        /// Framed length of the replacement.
        received: usize,
    },

    /// The writer was closed, or its output stream was dropped.
    #[error("writer is closed")]
    WriterClosedError,

    /// See [`CodecError`](serde_ipld_dagcbor::error::CodecError) for more information.
    #[error(transparent)]
    CodecError(Arc<serde_ipld_dagcbor::error::CodecError>),

    /// See [`IoError`](std::io::Error) for more information.
    #[error(transparent)]
    IoError(Arc<std::io::Error>),

    /// See [`CidError`](ipld_core::cid::Error) for more information.
    #[error(transparent)]
    CidError(Arc<ipld_core::cid::Error>),

    /// See [`MultihashError`](ipld_core::cid::multihash::Error) for more information.
    #[error(transparent)]
    MultihashError(Arc<ipld_core::cid::multihash::Error>),
}

impl From<serde_ipld_dagcbor::error::CodecError> for Error {
    fn from(error: serde_ipld_dagcbor::error::CodecError) -> Self {
        Self::CodecError(Arc::new(error))
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::IoError(Arc::new(error))
    }
}

impl From<ipld_core::cid::Error> for Error {
    fn from(error: ipld_core::cid::Error) -> Self {
        Self::CidError(Arc::new(error))
    }
}

impl From<ipld_core::cid::multihash::Error> for Error {
    fn from(error: ipld_core::cid::multihash::Error) -> Self {
        Self::MultihashError(Arc::new(error))
    }
}

// Codes as per the multicodec table:
// https://github.com/multiformats/multicodec/blob/c954a787dc6a17d099653e5f90d26fbd177d2074/table.csv

/// Multihash code of sha2-256, the hash CIDv0 mandates.
pub const SHA_256_CODE: u64 = 0x12;
/// Multihash code of sha2-512.
pub const SHA_512_CODE: u64 = 0x13;
/// Codec code of raw, uninterpreted bytes.
pub const RAW_CODE: u64 = 0x55;
/// Codec code of DAG-PB.
pub const DAG_PB_CODE: u64 = 0x70;

/// Hash `bytes` with the multihash function named by `code`.
///
/// The decoder never hashes on its own; this helper backs
/// [`Block::verify`] and is the usual way to mint a [`Cid`] for a payload.
/// Only the sha2 family is computed, anything else fails with
/// [`Error::UnsupportedMultihashError`].
pub fn multihash_of(code: u64, bytes: &[u8]) -> Result<Multihash<64>, Error> {
    let multihash = match code {
        SHA_256_CODE => Multihash::wrap(code, &Sha256::digest(bytes)),
        SHA_512_CODE => Multihash::wrap(code, &Sha512::digest(bytes)),
        other => return Err(Error::UnsupportedMultihashError(other)),
    };
    Ok(multihash?)
}

/// A content-addressed block: a [`Cid`] and the payload it names.
///
/// The pair carries no invariant; the decoder hands payloads over exactly
/// as framed. Whether the payload actually hashes to the CID is the
/// caller's concern, see [`Block::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub cid: Cid,
    pub data: Bytes,
}

impl Block {
    /// Construct a new [`Block`].
    pub fn new(cid: Cid, data: impl Into<Bytes>) -> Self {
        Self {
            cid,
            data: data.into(),
        }
    }

    /// Check that the payload hashes back to the digest carried by the CID.
    pub fn verify(&self) -> Result<bool, Error> {
        let multihash = multihash_of(self.cid.hash().code(), &self.data)?;
        Ok(multihash.digest() == self.cid.hash().digest())
    }
}
