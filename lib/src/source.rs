//! Forward-only byte sources backing the decoder.
//!
//! The decoder is written once against [`Source`] and served by two
//! transports: [`BytesSource`] over an in-memory buffer and
//! [`StreamSource`] over an asynchronous sequence of byte chunks.

use std::{collections::VecDeque, io};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

use crate::Error;

/// Forward-only view over archive bytes.
///
/// Reads only ever move forward; there is no rewind. A source is created
/// once per archive read and must not be shared between readers.
#[allow(async_fn_in_trait)]
pub trait Source {
    /// Peek at most `n` bytes without consuming them.
    ///
    /// An empty result means the source is exhausted.
    async fn upto(&mut self, n: usize) -> Result<Bytes, Error>;

    /// Consume exactly `n` bytes.
    async fn exactly(&mut self, n: usize) -> Result<Bytes, Error>;

    /// Skip `n` bytes forward without materialising them.
    async fn seek(&mut self, n: u64) -> Result<(), Error>;

    /// Absolute byte offset since the start of the source.
    fn pos(&self) -> u64;

    /// Bound the source to `n` further bytes.
    ///
    /// Reads past the bound behave as if the source ended there, even when
    /// the underlying transport has more data.
    fn limit(&mut self, n: u64);
}

/// [`Source`] over a single in-memory buffer. Never suspends.
#[derive(Debug)]
pub struct BytesSource {
    bytes: Bytes,
    offset: usize,
    limit: Option<u64>,
}

impl BytesSource {
    /// Construct a new [`BytesSource`].
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            offset: 0,
            limit: None,
        }
    }

    fn available(&self) -> usize {
        let rest = self.bytes.len() - self.offset;
        match self.limit {
            Some(limit) => rest.min(limit as usize),
            None => rest,
        }
    }

    fn consume(&mut self, n: usize) {
        self.offset += n;
        if let Some(limit) = &mut self.limit {
            *limit -= n as u64;
        }
    }
}

impl Source for BytesSource {
    async fn upto(&mut self, n: usize) -> Result<Bytes, Error> {
        let n = n.min(self.available());
        Ok(self.bytes.slice(self.offset..self.offset + n))
    }

    async fn exactly(&mut self, n: usize) -> Result<Bytes, Error> {
        if n > self.available() {
            return Err(Error::UnexpectedEndError);
        }
        let bytes = self.bytes.slice(self.offset..self.offset + n);
        self.consume(n);
        Ok(bytes)
    }

    async fn seek(&mut self, n: u64) -> Result<(), Error> {
        if n > self.available() as u64 {
            return Err(Error::UnexpectedEndError);
        }
        self.consume(n as usize);
        Ok(())
    }

    fn pos(&self) -> u64 {
        self.offset as u64
    }

    fn limit(&mut self, n: u64) {
        self.limit = Some(n);
    }
}

/// [`Source`] over an asynchronous sequence of byte chunks.
///
/// Unconsumed chunks sit in a deque with a cursor into the head chunk;
/// fully consumed chunks are discarded eagerly. A request served from a
/// single chunk is a zero-copy slice, only boundary-crossing requests
/// concatenate.
pub struct StreamSource<S> {
    stream: S,
    buffers: VecDeque<Bytes>,
    head: usize,
    buffered: usize,
    position: u64,
    limit: Option<u64>,
    exhausted: bool,
}

impl<S> StreamSource<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    /// Construct a new [`StreamSource`].
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffers: VecDeque::new(),
            head: 0,
            buffered: 0,
            position: 0,
            limit: None,
            exhausted: false,
        }
    }

    fn available(&self) -> usize {
        match self.limit {
            Some(limit) => self.buffered.min(limit as usize),
            None => self.buffered,
        }
    }

    /// Pull chunks until `n` bytes are buffered or the upstream ends.
    ///
    /// Zero-length chunks are legal upstream output and are re-polled.
    async fn fill(&mut self, n: usize) -> Result<usize, Error> {
        let want = match self.limit {
            Some(limit) => n.min(limit as usize),
            None => n,
        };
        while self.buffered < want && !self.exhausted {
            match self.stream.next().await {
                Some(chunk) => {
                    let chunk = chunk?;
                    if chunk.is_empty() {
                        continue;
                    }
                    self.buffered += chunk.len();
                    self.buffers.push_back(chunk);
                }
                None => self.exhausted = true,
            }
        }
        Ok(self.available())
    }

    /// Copy `n` buffered bytes starting at the cursor, without consuming.
    fn assemble(&self, n: usize) -> Bytes {
        let mut out = BytesMut::with_capacity(n);
        let mut skip = self.head;
        for buffer in &self.buffers {
            if out.len() == n {
                break;
            }
            let take = (buffer.len() - skip).min(n - out.len());
            out.extend_from_slice(&buffer[skip..skip + take]);
            skip = 0;
        }
        out.freeze()
    }

    fn consume(&mut self, mut n: usize) {
        self.position += n as u64;
        self.buffered -= n;
        if let Some(limit) = &mut self.limit {
            *limit -= n as u64;
        }
        while n > 0 {
            let head_length = self.buffers[0].len() - self.head;
            if n < head_length {
                self.head += n;
                break;
            }
            n -= head_length;
            self.head = 0;
            self.buffers.pop_front();
        }
    }
}

impl<S> Source for StreamSource<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    async fn upto(&mut self, n: usize) -> Result<Bytes, Error> {
        let n = n.min(self.fill(n).await?);
        if n == 0 {
            return Ok(Bytes::new());
        }
        let head = &self.buffers[0];
        if head.len() - self.head >= n {
            return Ok(head.slice(self.head..self.head + n));
        }
        Ok(self.assemble(n))
    }

    async fn exactly(&mut self, n: usize) -> Result<Bytes, Error> {
        if n == 0 {
            return Ok(Bytes::new());
        }
        if self.fill(n).await? < n {
            return Err(Error::UnexpectedEndError);
        }
        let head = &self.buffers[0];
        let bytes = if head.len() - self.head >= n {
            head.slice(self.head..self.head + n)
        } else {
            self.assemble(n)
        };
        self.consume(n);
        Ok(bytes)
    }

    async fn seek(&mut self, n: u64) -> Result<(), Error> {
        let mut remaining = n;
        while remaining > 0 {
            let available = self.fill(1).await?;
            if available == 0 {
                return Err(Error::UnexpectedEndError);
            }
            let step = remaining.min(available as u64) as usize;
            self.consume(step);
            remaining -= step as u64;
        }
        Ok(())
    }

    fn pos(&self) -> u64 {
        self.position
    }

    fn limit(&mut self, n: u64) {
        self.limit = Some(n);
    }
}
