//! Single-pass streaming surfaces: blocks, CIDs and section locations.

use std::io;

use async_stream::try_stream;
use bytes::Bytes;
use futures::Stream;
use ipld_core::cid::Cid;

use crate::{
    frame::{read_section, Mode, Section},
    header::{read_header, Header, V2Header},
    source::{BytesSource, Source, StreamSource},
    Block, Error, DEFAULT_MAX_SECTION_SIZE,
};

/// Consumption state of a single-shot surface.
#[derive(Debug)]
enum State {
    Fresh,
    Consuming,
    Done,
    Errored(Error),
}

/// Decoded header plus the framing cursor shared by the streaming surfaces.
struct Frames<S> {
    source: S,
    header: Header,
    v2_header: Option<V2Header>,
    max_section_size: u64,
    state: State,
}

impl<S: Source> Frames<S> {
    async fn open(mut source: S) -> Result<Self, Error> {
        let (header, v2_header) = read_header(&mut source).await?;
        Ok(Self {
            source,
            header,
            v2_header,
            max_section_size: DEFAULT_MAX_SECTION_SIZE,
            state: State::Fresh,
        })
    }

    /// Move `Fresh → Consuming`, the transition a lazy sequence makes when
    /// it is created. Anything but a fresh surface is refused, without
    /// touching the source.
    fn begin(&mut self, what: &'static str) -> Result<(), Error> {
        if !matches!(self.state, State::Fresh) {
            return Err(Error::AlreadyConsumedError(what));
        }
        self.state = State::Consuming;
        Ok(())
    }

    /// Pull the next section. After clean exhaustion the surface is `Done`;
    /// after a failure it is `Errored` and replays the same error on every
    /// subsequent step, without reading on.
    async fn advance(&mut self, mode: Mode) -> Result<Option<Section>, Error> {
        match &self.state {
            State::Done => return Ok(None),
            State::Errored(error) => return Err(error.clone()),
            State::Fresh | State::Consuming => {}
        }
        self.state = State::Consuming;
        match read_section(&mut self.source, self.max_section_size, mode).await {
            Ok(Some(section)) => Ok(Some(section)),
            Ok(None) => {
                self.state = State::Done;
                Ok(None)
            }
            Err(error) => {
                self.state = State::Errored(error.clone());
                Err(error)
            }
        }
    }
}

/// Location record for one section, enough for downstream code to seek or
/// mmap the underlying archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub cid: Cid,
    /// Offset of the section start, just before the length varint.
    pub offset: u64,
    /// Total framed length: varint, CID and payload.
    pub length: u64,
    /// Offset of the payload within the archive.
    pub block_offset: u64,
    /// Payload length.
    pub block_length: u64,
}

macro_rules! constructors {
    ($surface:ident) => {
        impl $surface<BytesSource> {
            /// Open an archive held in memory.
            pub async fn from_bytes(bytes: impl Into<Bytes>) -> Result<Self, Error> {
                Ok(Self {
                    frames: Frames::open(BytesSource::new(bytes)).await?,
                })
            }
        }

        impl<S> $surface<StreamSource<S>>
        where
            S: Stream<Item = io::Result<Bytes>> + Unpin,
        {
            /// Open an archive arriving as a stream of byte chunks.
            pub async fn from_stream(stream: S) -> Result<Self, Error> {
                Ok(Self {
                    frames: Frames::open(StreamSource::new(stream)).await?,
                })
            }
        }

        impl<S: Source> $surface<S> {
            /// Replace the section-size ceiling enforced while framing.
            pub fn with_max_section_size(mut self, max_section_size: u64) -> Self {
                self.frames.max_section_size = max_section_size;
                self
            }

            /// The decoded archive header.
            pub fn header(&self) -> &Header {
                &self.frames.header
            }

            /// Archive version, 1 or 2.
            pub fn version(&self) -> u64 {
                self.frames.header.version()
            }

            /// Root [`Cid`]s listed in the header.
            pub fn roots(&self) -> &[Cid] {
                &self.frames.header.roots
            }

            /// The CARv2 header, for version 2 archives.
            pub fn v2_header(&self) -> Option<&V2Header> {
                self.frames.v2_header.as_ref()
            }
        }
    };
}

/// Single-pass iteration over the blocks of an archive.
///
/// The surface is single-shot: [`BlockStream::stream`] can be called once,
/// and after a failure every further pull surfaces the same error.
pub struct BlockStream<S> {
    frames: Frames<S>,
}

constructors!(BlockStream);

impl<S: Source> BlockStream<S> {
    /// Pull the next block off the archive.
    pub async fn next(&mut self) -> Result<Option<Block>, Error> {
        Ok(self.frames.advance(Mode::Payload).await?.map(|section| Block {
            cid: section.cid,
            data: section.payload.unwrap_or_default(),
        }))
    }

    /// The blocks as a lazy sequence, in on-wire order.
    pub fn stream(&mut self) -> Result<impl Stream<Item = Result<Block, Error>> + '_, Error> {
        self.frames.begin("blocks")?;
        Ok(try_stream! {
            while let Some(section) = self.frames.advance(Mode::Payload).await? {
                yield Block {
                    cid: section.cid,
                    data: section.payload.unwrap_or_default(),
                };
            }
        })
    }
}

/// Single-pass iteration over the CIDs of an archive.
///
/// Payload bytes are seeked over, never materialised, which keeps memory
/// flat for archives with large blocks.
pub struct CidStream<S> {
    frames: Frames<S>,
}

constructors!(CidStream);

impl<S: Source> CidStream<S> {
    /// Pull the next CID off the archive.
    pub async fn next(&mut self) -> Result<Option<Cid>, Error> {
        Ok(self
            .frames
            .advance(Mode::Skip)
            .await?
            .map(|section| section.cid))
    }

    /// The CIDs as a lazy sequence, in on-wire order.
    pub fn stream(&mut self) -> Result<impl Stream<Item = Result<Cid, Error>> + '_, Error> {
        self.frames.begin("CIDs")?;
        Ok(try_stream! {
            while let Some(section) = self.frames.advance(Mode::Skip).await? {
                yield section.cid;
            }
        })
    }
}

/// Single-pass indexer: yields the location of every section without
/// keeping any payload.
pub struct Indexer<S> {
    frames: Frames<S>,
}

constructors!(Indexer);

impl<S: Source> Indexer<S> {
    /// Pull the next section location off the archive.
    pub async fn next(&mut self) -> Result<Option<IndexEntry>, Error> {
        Ok(self.frames.advance(Mode::Skip).await?.map(entry))
    }

    /// The section locations as a lazy sequence, in on-wire order.
    pub fn stream(&mut self) -> Result<impl Stream<Item = Result<IndexEntry, Error>> + '_, Error> {
        self.frames.begin("index entries")?;
        Ok(try_stream! {
            while let Some(section) = self.frames.advance(Mode::Skip).await? {
                yield entry(section);
            }
        })
    }
}

fn entry(section: Section) -> IndexEntry {
    IndexEntry {
        cid: section.cid,
        offset: section.offset,
        length: section.length,
        block_offset: section.block_offset,
        block_length: section.block_length,
    }
}
