//! CARv1 encoding: the push-style writer and the frame builders it shares
//! with the in-place root replacement helper.

use bytes::{Bytes, BytesMut};
use integer_encoding::VarInt;
use ipld_core::{cid::Cid, codec::Codec};
use serde_ipld_dagcbor::codec::DagCborCodec;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    header::{decode_v1_header, Header, PRAGMA},
    varint, Block, Error, DEFAULT_MAX_SECTION_SIZE,
};

/// Frames buffered by the output channel before `put` applies backpressure.
const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Encode a length-prefixed header frame.
pub(crate) fn encode_header(header: &Header) -> Result<Bytes, Error> {
    let encoded = DagCborCodec::encode_to_vec(header)?;
    let mut buffer = BytesMut::with_capacity(encoded.len().required_space() + encoded.len());
    varint::write(&mut buffer, encoded.len() as u64);
    buffer.extend_from_slice(&encoded);
    Ok(buffer.freeze())
}

/// Encode one section frame: length varint, CID bytes, payload.
pub(crate) fn encode_section(cid: &Cid, data: &[u8]) -> Bytes {
    let length = cid.encoded_len() + data.len();
    let mut buffer = BytesMut::with_capacity(length.required_space() + length);
    varint::write(&mut buffer, length as u64);
    buffer.extend_from_slice(&cid.to_bytes());
    buffer.extend_from_slice(data);
    buffer.freeze()
}

/// Push-style CARv1 encoder.
///
/// Construction hands back the writer and its output, an asynchronous
/// sequence of encoded frames. The channel between them is bounded:
/// [`Writer::put`] suspends while the consumer lags, and frames are emitted
/// strictly in call order.
pub struct Writer {
    sender: Option<mpsc::Sender<Bytes>>,
    max_section_size: u64,
}

impl Writer {
    /// Construct a new [`Writer`] over `roots`, which may be empty.
    ///
    /// The encoded header frame is queued immediately.
    pub fn create(roots: Vec<Cid>) -> Result<(Self, ReceiverStream<Bytes>), Error> {
        Self::with_parameters(roots, None, None)
    }

    /// Construct a new [`Writer`], using custom parameters.
    /// If set to `None`, the corresponding default value will be used.
    pub fn with_parameters(
        roots: Vec<Cid>,
        max_section_size: Option<u64>,
        capacity: Option<usize>,
    ) -> Result<(Self, ReceiverStream<Bytes>), Error> {
        let header = encode_header(&Header::new(roots))?;
        let (sender, receiver) = mpsc::channel(capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY).max(1));
        // The channel is fresh and holds at least one slot.
        sender.try_send(header).map_err(|_| Error::WriterClosedError)?;
        let writer = Self {
            sender: Some(sender),
            max_section_size: max_section_size.unwrap_or(DEFAULT_MAX_SECTION_SIZE),
        };
        Ok((writer, ReceiverStream::new(receiver)))
    }

    /// Frame one block into the output.
    ///
    /// Resolves once the output channel has accepted the frame. Fails when
    /// the writer is closed, the output was dropped, or the section would
    /// exceed the configured ceiling.
    pub async fn put(&mut self, block: &Block) -> Result<(), Error> {
        let sender = self.sender.as_ref().ok_or(Error::WriterClosedError)?;
        let length = (block.cid.encoded_len() + block.data.len()) as u64;
        if length > self.max_section_size {
            return Err(Error::SectionTooLargeError {
                length,
                maximum: self.max_section_size,
            });
        }
        sender
            .send(encode_section(&block.cid, &block.data))
            .await
            .map_err(|_| Error::WriterClosedError)
    }

    /// End the output stream. Any [`Writer::put`] after this fails.
    pub fn close(&mut self) {
        self.sender = None;
    }
}

/// Rewrite the root CIDs of an encoded CARv1 archive in place.
///
/// The replacement header must occupy exactly as many bytes as the existing
/// one, so roots can only be swapped for roots of equal encoded size.
pub fn replace_roots(archive: &mut [u8], roots: Vec<Cid>) -> Result<(), Error> {
    let (length, consumed) = varint::decode(archive)?;
    if length == 0 {
        return Err(Error::ZeroLengthHeaderError);
    }
    let end = consumed + length as usize;
    if archive.len() < end {
        return Err(Error::UnexpectedEndError);
    }
    let existing = &archive[consumed..end];
    if *existing == PRAGMA[1..] {
        return Err(Error::UnsupportedVersionError(2));
    }
    decode_v1_header(existing)?;

    let replacement = encode_header(&Header::new(roots))?;
    if replacement.len() != end {
        return Err(Error::HeaderLengthMismatchError {
            expected: end,
            received: replacement.len(),
        });
    }
    archive[..end].copy_from_slice(&replacement);
    Ok(())
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use tokio_stream::StreamExt;

    use super::{replace_roots, Writer};
    use crate::{
        multihash_of,
        test_utils::{encode_archive, raw_block},
        Cid, Error, Reader, RAW_CODE, SHA_256_CODE,
    };

    #[tokio::test]
    async fn encode_decode_roundtrip() {
        let blocks = [raw_block(b"first"), raw_block(b""), raw_block(b"third")];
        let archive = encode_archive(vec![blocks[0].cid], &blocks).await;

        let reader = Reader::from_bytes(archive).await.unwrap();
        assert_eq!(reader.roots(), &[blocks[0].cid]);
        assert_eq!(reader.blocks().collect::<Vec<_>>(), blocks);
    }

    #[tokio::test]
    async fn empty_roots_and_no_blocks() {
        let archive = encode_archive(vec![], &[]).await;
        let reader = Reader::from_bytes(archive).await.unwrap();
        assert!(reader.roots().is_empty());
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn backpressure_keeps_the_frame_order() {
        let blocks = (0u8..16).map(|i| raw_block(&[i; 24])).collect::<Vec<_>>();
        let roots = vec![blocks[0].cid];

        // A single-slot channel forces a suspension on every frame.
        let (mut writer, mut output) =
            Writer::with_parameters(roots.clone(), None, Some(1)).unwrap();
        let produce = async {
            for block in &blocks {
                writer.put(block).await.unwrap();
            }
            writer.close();
        };
        let drain = async {
            let mut encoded = BytesMut::new();
            while let Some(frame) = output.next().await {
                encoded.extend_from_slice(&frame);
            }
            encoded.freeze()
        };
        let ((), encoded) = tokio::join!(produce, drain);

        assert_eq!(encoded, encode_archive(roots, &blocks).await);
    }

    #[tokio::test]
    async fn put_after_close() {
        let block = raw_block(b"payload");
        let (mut writer, mut output) = Writer::create(vec![block.cid]).unwrap();
        writer.put(&block).await.unwrap();
        writer.close();

        assert!(matches!(
            writer.put(&block).await,
            Err(Error::WriterClosedError)
        ));
        // The queued frames still drain after close.
        assert!(output.next().await.is_some());
        assert!(output.next().await.is_some());
        assert!(output.next().await.is_none());
    }

    #[tokio::test]
    async fn put_after_the_output_is_dropped() {
        let block = raw_block(b"payload");
        let (mut writer, output) = Writer::create(vec![]).unwrap();
        drop(output);
        assert!(matches!(
            writer.put(&block).await,
            Err(Error::WriterClosedError)
        ));
    }

    #[tokio::test]
    async fn ceiling_is_enforced() {
        let block = raw_block(&[0xaa; 256]);
        let (mut writer, _output) = Writer::with_parameters(vec![], Some(128), None).unwrap();
        assert!(matches!(
            writer.put(&block).await,
            Err(Error::SectionTooLargeError { maximum: 128, .. })
        ));
    }

    #[tokio::test]
    async fn replace_roots_in_place() {
        let blocks = [raw_block(b"first"), raw_block(b"second")];
        let archive = encode_archive(vec![blocks[0].cid], &blocks).await;

        let mut rewritten = archive.to_vec();
        replace_roots(&mut rewritten, vec![blocks[1].cid]).unwrap();

        let reader = Reader::from_bytes(rewritten).await.unwrap();
        assert_eq!(reader.roots(), &[blocks[1].cid]);
        assert_eq!(reader.blocks().collect::<Vec<_>>(), blocks);
    }

    #[tokio::test]
    async fn replace_roots_rejects_a_different_length() {
        let blocks = [raw_block(b"first")];
        let archive = encode_archive(vec![blocks[0].cid], &blocks).await;

        // One root replaced by two cannot fit the original frame.
        let mut rewritten = archive.to_vec();
        let other = Cid::new_v1(RAW_CODE, multihash_of(SHA_256_CODE, b"other").unwrap());
        assert!(matches!(
            replace_roots(&mut rewritten, vec![blocks[0].cid, other]),
            Err(Error::HeaderLengthMismatchError { .. })
        ));
        // A failed replacement leaves the archive untouched.
        assert_eq!(rewritten, archive.to_vec());
    }

    #[tokio::test]
    async fn replace_roots_rejects_v2() {
        let inner = encode_archive(vec![], &[]).await;
        let mut archive = crate::test_utils::v2_wrap(&inner);
        assert!(matches!(
            replace_roots(&mut archive, vec![]),
            Err(Error::UnsupportedVersionError(2))
        ));
    }
}
