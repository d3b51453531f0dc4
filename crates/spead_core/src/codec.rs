//! Pure encode/decode functions for SPEAD item pointers and packet headers.
//!
//! See spec.md §4.1. None of these functions perform I/O; they operate on
//! already-buffered bytes or plain integers. Endianness is big-endian on the
//! wire throughout, and decoding never assumes host alignment: multi-byte
//! fields are read through [`octs`]'s `Read`/`Write` traits, which copy
//! byte-by-byte rather than reinterpreting a slice in place.

use core::convert::Infallible;
use derive_more::{Display, Error};
use octs::{BufError, BufTooShortOr, Decode, Encode, FixedEncodeLen, Read, Write};

use crate::packet::{HEADER_LEN, ItemPointer, MAGIC, VERSION};

/// Encodes an item pointer's logical fields into its 64-bit wire
/// representation.
///
/// `address_bits` is the per-stream `heap_address_bits` parameter (spec.md
/// §3); the item ID occupies the remaining `63 - address_bits` bits between
/// the address/value field and the immediate flag.
#[must_use]
pub fn encode_item_pointer(ptr: ItemPointer, address_bits: u32) -> u64 {
    debug_assert!(address_bits < 63, "address_bits must leave room for an ID bit and the immediate flag");
    let address_mask = (1u64 << address_bits) - 1;
    let id_bits = 63 - address_bits;
    let id_mask = (1u64 << id_bits) - 1;

    let mut word = ptr.value & address_mask;
    word |= (ptr.id & id_mask) << address_bits;
    if ptr.is_immediate {
        word |= 1u64 << 63;
    }
    word
}

/// Decodes a 64-bit wire word into an [`ItemPointer`].
///
/// Inverse of [`encode_item_pointer`].
#[must_use]
pub fn decode_item_pointer(word: u64, address_bits: u32) -> ItemPointer {
    debug_assert!(address_bits < 63, "address_bits must leave room for an ID bit and the immediate flag");
    let address_mask = (1u64 << address_bits) - 1;
    let id_bits = 63 - address_bits;
    let id_mask = (1u64 << id_bits) - 1;

    ItemPointer {
        is_immediate: word & (1u64 << 63) != 0,
        id: (word >> address_bits) & id_mask,
        value: word & address_mask,
    }
}

/// The fixed 8-byte packet header (spec.md §3/§6), excluding item pointers
/// and payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// `heap_address_bits / 8`; the width in bytes of the address/immediate
    /// field in each item pointer of this packet.
    pub address_bytes: u8,
    /// Number of item pointers following this header.
    pub n_item_pointers: u16,
}

/// The header's magic or version byte did not match what this crate
/// understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum HeaderError {
    /// Offset 0 was not [`MAGIC`].
    #[display("bad magic byte")]
    BadMagic,
    /// Offset 1 was not [`VERSION`].
    #[display("bad version")]
    BadVersion,
}

impl BufError for HeaderError {}

impl FixedEncodeLen for PacketHeader {
    const ENCODE_LEN: usize = HEADER_LEN;
}

impl Encode for PacketHeader {
    type Error = Infallible;

    fn encode(&self, mut dst: impl Write) -> Result<(), BufTooShortOr<Self::Error>> {
        dst.write(&MAGIC)?;
        dst.write(&VERSION)?;
        dst.write(&(8 - self.address_bytes))?;
        dst.write(&self.address_bytes)?;
        dst.write(&0u8)?;
        dst.write(&0u8)?;
        dst.write(&self.n_item_pointers)?;
        Ok(())
    }
}

impl Decode for PacketHeader {
    type Error = HeaderError;

    fn decode(mut src: impl Read) -> Result<Self, BufTooShortOr<Self::Error>> {
        let magic: u8 = src.read()?;
        if magic != MAGIC {
            return Err(HeaderError::BadMagic.into());
        }
        let version: u8 = src.read()?;
        if version != VERSION {
            return Err(HeaderError::BadVersion.into());
        }
        let _item_pointer_width: u8 = src.read()?;
        let address_bytes: u8 = src.read()?;
        let _reserved0: u8 = src.read()?;
        let _reserved1: u8 = src.read()?;
        let n_item_pointers: u16 = src.read()?;
        Ok(Self {
            address_bytes,
            n_item_pointers,
        })
    }
}

/// Encodes a packet header into its on-wire 8-byte form.
///
/// Thin wrapper over the [`Encode`] impl, matching the free-function
/// signature spec.md §4.1 names.
#[must_use]
pub fn encode_packet_header(address_bytes: u8, n_item_pointers: u16) -> [u8; HEADER_LEN] {
    let header = PacketHeader {
        address_bytes,
        n_item_pointers,
    };
    let mut buf = [0u8; HEADER_LEN];
    header
        .encode(&mut buf[..])
        .expect("fixed-size buffer always fits a fixed-size header");
    buf
}

/// Decodes a packet header from its on-wire 8-byte form.
///
/// Callers are expected to have already checked that at least [`HEADER_LEN`]
/// bytes are available (spec.md §4.4 treats truncation as a parser-level
/// concern distinct from this function's `ErrBadMagic`/`ErrBadVersion`
/// surface); [`crate::recv::parser::parse_packet`] does this before calling
/// in.
///
/// # Errors
///
/// Errors if the magic or version bytes are not recognised.
pub fn decode_packet_header(bytes: &[u8; HEADER_LEN]) -> Result<PacketHeader, HeaderError> {
    PacketHeader::decode(&bytes[..]).map_err(|err| match err {
        BufTooShortOr::TooShort => unreachable!("caller passed exactly HEADER_LEN bytes"),
        BufTooShortOr::Or(err) => err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_pointer_round_trip() {
        let address_bits = 40;
        for ptr in [
            ItemPointer::immediate(0x1000, 0xDEAD_BEEF),
            ItemPointer::addressed(0x2000, 12345),
            ItemPointer::immediate(1, 0),
            ItemPointer::addressed((1u64 << 23) - 1, (1u64 << address_bits) - 1),
        ] {
            let word = encode_item_pointer(ptr, address_bits);
            assert_eq!(ptr, decode_item_pointer(word, address_bits));
        }
    }

    #[test]
    fn item_pointer_immediate_flag_is_top_bit() {
        let word = encode_item_pointer(ItemPointer::immediate(1, 0), 40);
        assert_eq!(1u64 << 63, word & (1u64 << 63));
    }

    #[test]
    fn header_round_trip() {
        let bytes = encode_packet_header(5, 7);
        let header = decode_packet_header(&bytes).unwrap();
        assert_eq!(5, header.address_bytes);
        assert_eq!(7, header.n_item_pointers);
        assert_eq!(MAGIC, bytes[0]);
        assert_eq!(VERSION, bytes[1]);
        assert_eq!(3, bytes[2]);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut bytes = encode_packet_header(5, 0);
        bytes[0] = 0xFF;
        assert_eq!(
            HeaderError::BadMagic,
            decode_packet_header(&bytes).unwrap_err()
        );
    }

    #[test]
    fn header_rejects_bad_version() {
        let mut bytes = encode_packet_header(5, 0);
        bytes[1] = 0xFF;
        assert_eq!(
            HeaderError::BadVersion,
            decode_packet_header(&bytes).unwrap_err()
        );
    }
}
