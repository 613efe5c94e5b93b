//! Section framing: `varint(length) ‖ cid ‖ payload`.

use bytes::Bytes;
use ipld_core::cid::Cid;

use crate::{cid::read_cid, source::Source, varint, Error};

/// How the framer treats payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Materialise the payload.
    Payload,
    /// Seek over the payload, yielding offsets only.
    Skip,
}

/// One decoded section frame.
#[derive(Debug)]
pub(crate) struct Section {
    pub(crate) cid: Cid,
    /// Offset of the section start, just before the length varint.
    pub(crate) offset: u64,
    /// Total framed length: varint, CID and payload.
    pub(crate) length: u64,
    /// Offset of the payload within the archive.
    pub(crate) block_offset: u64,
    /// Payload length.
    pub(crate) block_length: u64,
    /// Payload bytes, present in [`Mode::Payload`] only.
    pub(crate) payload: Option<Bytes>,
}

/// Read the next section frame, or `None` once the source is exhausted.
///
/// The framer only ever moves forward; it never re-reads.
pub(crate) async fn read_section<S: Source>(
    source: &mut S,
    max_section_size: u64,
    mode: Mode,
) -> Result<Option<Section>, Error> {
    if source.upto(1).await?.is_empty() {
        return Ok(None);
    }

    let offset = source.pos();
    let length = varint::read(source).await?;
    if length == 0 {
        return Err(Error::ZeroLengthSectionError);
    }
    if length > max_section_size {
        return Err(Error::SectionTooLargeError {
            length,
            maximum: max_section_size,
        });
    }

    let cid_offset = source.pos();
    let cid = read_cid(source).await?;
    let cid_length = source.pos() - cid_offset;
    if cid_length > length {
        return Err(Error::CidOverrunError);
    }

    let block_offset = source.pos();
    let block_length = length - cid_length;
    let payload = match mode {
        Mode::Payload => Some(source.exactly(block_length as usize).await?),
        Mode::Skip => {
            source.seek(block_length).await?;
            None
        }
    };

    Ok(Some(Section {
        cid,
        offset,
        length: source.pos() - offset,
        block_offset,
        block_length,
        payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::{read_section, Mode};
    use crate::{
        source::BytesSource,
        test_utils::{encode_archive, raw_block},
        writer::encode_section,
        Error, DEFAULT_MAX_SECTION_SIZE,
    };

    async fn sections_of(archive: &[u8]) -> BytesSource {
        let mut source = BytesSource::new(archive.to_vec());
        crate::header::read_header(&mut source).await.unwrap();
        source
    }

    #[tokio::test]
    async fn frames_in_order() {
        let blocks = [raw_block(b"first"), raw_block(b""), raw_block(b"third")];
        let archive = encode_archive(vec![blocks[0].cid], &blocks).await;

        let mut source = sections_of(&archive).await;
        for block in &blocks {
            let section = read_section(&mut source, DEFAULT_MAX_SECTION_SIZE, Mode::Payload)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(section.cid, block.cid);
            assert_eq!(section.payload.as_ref().unwrap(), &block.data);
            assert_eq!(section.block_length, block.data.len() as u64);
            // The whole frame is the payload, the CID and the length prefix.
            assert!(section.length > section.block_length);
            assert_eq!(
                section.block_offset,
                section.offset + (section.length - section.block_length)
            );
        }
        assert!(read_section(&mut source, DEFAULT_MAX_SECTION_SIZE, Mode::Payload)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn skip_mode_discards_payloads() {
        let blocks = [raw_block(b"first"), raw_block(b"second")];
        let archive = encode_archive(vec![], &blocks).await;

        let mut source = sections_of(&archive).await;
        for block in &blocks {
            let section = read_section(&mut source, DEFAULT_MAX_SECTION_SIZE, Mode::Skip)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(section.cid, block.cid);
            assert!(section.payload.is_none());
            assert_eq!(section.block_length, block.data.len() as u64);
        }
    }

    #[tokio::test]
    async fn zero_length_section() {
        let archive = encode_archive(vec![], &[]).await;
        let mut padded = archive.to_vec();
        padded.extend_from_slice(&[0, 0, 0]);

        let mut source = sections_of(&padded).await;
        assert!(matches!(
            read_section(&mut source, DEFAULT_MAX_SECTION_SIZE, Mode::Payload).await,
            Err(Error::ZeroLengthSectionError)
        ));
    }

    #[tokio::test]
    async fn section_over_the_ceiling() {
        let blocks = [raw_block(&[0xaa; 128])];
        let archive = encode_archive(vec![], &blocks).await;

        let mut source = sections_of(&archive).await;
        assert!(matches!(
            read_section(&mut source, 64, Mode::Payload).await,
            Err(Error::SectionTooLargeError { maximum: 64, .. })
        ));
    }

    #[tokio::test]
    async fn cid_overrunning_the_section() {
        let block = raw_block(b"payload");
        let section = encode_section(&block.cid, &block.data);

        // Shrink the declared length below the encoded CID length.
        let mut forged = vec![4u8];
        forged.extend_from_slice(&section[1..]);

        let mut source = BytesSource::new(forged);
        assert!(matches!(
            read_section(&mut source, DEFAULT_MAX_SECTION_SIZE, Mode::Payload).await,
            Err(Error::CidOverrunError)
        ));
    }

    #[tokio::test]
    async fn truncated_payload() {
        let blocks = [raw_block(b"some payload that gets cut")];
        let archive = encode_archive(vec![], &blocks).await;
        let truncated = &archive[..archive.len() - 3];

        let mut source = sections_of(truncated).await;
        assert!(matches!(
            read_section(&mut source, DEFAULT_MAX_SECTION_SIZE, Mode::Payload).await,
            Err(Error::UnexpectedEndError)
        ));
    }
}
