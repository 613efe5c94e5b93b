//! Whole-archive random access.

use std::io;

use bytes::Bytes;
use futures::Stream;
use indexmap::IndexMap;
use ipld_core::cid::Cid;

use crate::{
    frame::{read_section, Mode},
    header::{read_header, Header, V2Header},
    source::{BytesSource, Source, StreamSource},
    Block, Error, DEFAULT_MAX_SECTION_SIZE,
};

/// In-memory form of a whole archive: roots plus a [`Cid`]-addressed map of
/// block payloads.
///
/// Construction drains the source eagerly and rejects as a whole on any
/// framing error; afterwards every operation is synchronous and the reader
/// is immutable. Duplicate CIDs keep the first payload; [`Reader::blocks`]
/// and [`Reader::cids`] emit each CID once, in first-occurrence order.
pub struct Reader {
    header: Header,
    v2_header: Option<V2Header>,
    blocks: IndexMap<Cid, Bytes>,
}

impl Reader {
    /// Index an archive held in memory.
    pub async fn from_bytes(bytes: impl Into<Bytes>) -> Result<Self, Error> {
        Self::from_bytes_with(bytes, None).await
    }

    /// Index an archive held in memory, with a custom section-size ceiling.
    /// If set to `None`, [`DEFAULT_MAX_SECTION_SIZE`] is used.
    pub async fn from_bytes_with(
        bytes: impl Into<Bytes>,
        max_section_size: Option<u64>,
    ) -> Result<Self, Error> {
        Self::build(
            BytesSource::new(bytes),
            max_section_size.unwrap_or(DEFAULT_MAX_SECTION_SIZE),
        )
        .await
    }

    /// Index an archive arriving as a stream of byte chunks.
    pub async fn from_stream<S>(stream: S) -> Result<Self, Error>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
    {
        Self::from_stream_with(stream, None).await
    }

    /// Index a chunked archive, with a custom section-size ceiling.
    /// If set to `None`, [`DEFAULT_MAX_SECTION_SIZE`] is used.
    pub async fn from_stream_with<S>(
        stream: S,
        max_section_size: Option<u64>,
    ) -> Result<Self, Error>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
    {
        Self::build(
            StreamSource::new(stream),
            max_section_size.unwrap_or(DEFAULT_MAX_SECTION_SIZE),
        )
        .await
    }

    async fn build<S: Source>(mut source: S, max_section_size: u64) -> Result<Self, Error> {
        let (header, v2_header) = read_header(&mut source).await?;
        let mut blocks = IndexMap::new();
        while let Some(section) = read_section(&mut source, max_section_size, Mode::Payload).await?
        {
            blocks
                .entry(section.cid)
                .or_insert_with(|| section.payload.unwrap_or_default());
        }
        Ok(Self {
            header,
            v2_header,
            blocks,
        })
    }

    /// Archive version, 1 or 2.
    pub fn version(&self) -> u64 {
        self.header.version()
    }

    /// Root [`Cid`]s listed in the header.
    pub fn roots(&self) -> &[Cid] {
        &self.header.roots
    }

    /// The CARv2 header, for version 2 archives.
    pub fn v2_header(&self) -> Option<&V2Header> {
        self.v2_header.as_ref()
    }

    /// Check whether the archive contains `cid`.
    pub fn has(&self, cid: &Cid) -> bool {
        self.blocks.contains_key(cid)
    }

    /// Get the block stored under `cid`.
    ///
    /// The returned payload shares the archive's buffer.
    pub fn get(&self, cid: &Cid) -> Option<Block> {
        self.blocks.get(cid).map(|data| Block {
            cid: *cid,
            data: data.clone(),
        })
    }

    /// Iterate over the blocks in archive order.
    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.blocks.iter().map(|(cid, data)| Block {
            cid: *cid,
            data: data.clone(),
        })
    }

    /// Iterate over the stored [`Cid`]s in archive order.
    pub fn cids(&self) -> impl Iterator<Item = &Cid> + '_ {
        self.blocks.keys()
    }

    /// Number of distinct blocks in the archive.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Check whether the archive holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
