//! CID parsing straight off a byte source.
//!
//! The decoder does not keep its own multiformats tables; everything past
//! the wire shape is delegated to [`ipld_core::cid`].

use std::io::Cursor;

use ipld_core::cid::{multihash::Multihash, Cid};

use crate::{source::Source, varint, Error};

/// First bytes of a CIDv0: the sha2-256 multihash code and its digest length.
const V0_PROBE: [u8; 2] = [0x12, 0x20];

/// A CIDv0 is a bare sha2-256 multihash, 34 bytes in total.
const V0_LENGTH: usize = 34;

/// Longest digest a [`Multihash`] can carry.
const MAX_DIGEST_LENGTH: u64 = 64;

/// Read a CID at the current cursor position.
///
/// CIDv0 is recognised by its fixed `0x12 0x20` prefix; everything else must
/// be the CIDv1 varint form `version ‖ codec ‖ multihash`. The number of
/// bytes consumed is observable through [`Source::pos`].
pub(crate) async fn read_cid<S: Source>(source: &mut S) -> Result<Cid, Error> {
    let probe = source.upto(V0_PROBE.len()).await?;
    if probe.len() == V0_PROBE.len() && probe[..] == V0_PROBE[..] {
        let buffer = source.exactly(V0_LENGTH).await?;
        return Ok(Cid::read_bytes(Cursor::new(buffer.as_ref()))?);
    }

    let version = varint::read(source).await?;
    if version != 1 {
        return Err(Error::UnsupportedCidVersionError(version));
    }
    let codec = varint::read(source).await?;

    let code = varint::read(source).await?;
    let length = varint::read(source).await?;
    if length > MAX_DIGEST_LENGTH {
        return Err(Error::DigestTooLongError(length));
    }
    let digest = source.exactly(length as usize).await?;
    let multihash = Multihash::wrap(code, &digest)?;

    Ok(Cid::new_v1(codec, multihash))
}
