//! Receive packet parser: §4.4. Parses one raw packet — a UDP datagram, or
//! one TCP-framed payload handed over by [`super::framer::TcpFramer`] — into
//! a structured [`ParsedPacket`].

use octs::Bytes;

use crate::{
    codec::{HeaderError, decode_item_pointer, decode_packet_header},
    error::ParseError,
    packet::{
        HEADER_LEN, HEAP_CNT_ID, HEAP_LENGTH_ID, ITEM_POINTER_LEN, PAYLOAD_LENGTH_ID,
        PAYLOAD_OFFSET_ID, ParsedPacket,
    },
};

/// Parses one raw packet into a [`ParsedPacket`].
///
/// # Errors
///
/// Errors if the header is malformed, the packet is shorter than its header,
/// claimed item pointers, or claimed payload, or a mandatory item pointer
/// (heap cnt, heap length, payload offset, payload length) is absent.
pub fn parse_packet(bytes: &[u8]) -> Result<ParsedPacket, ParseError> {
    if bytes.len() < HEADER_LEN {
        return Err(ParseError::TooShort);
    }
    let header_bytes: [u8; HEADER_LEN] = bytes[..HEADER_LEN]
        .try_into()
        .expect("checked length above");
    let header = decode_packet_header(&header_bytes).map_err(|err| match err {
        HeaderError::BadMagic => ParseError::BadMagic,
        HeaderError::BadVersion => ParseError::BadVersion,
    })?;
    let address_bits = u32::from(header.address_bytes) * 8;

    let pointers_len = usize::from(header.n_item_pointers) * ITEM_POINTER_LEN;
    let pointers_end = HEADER_LEN + pointers_len;
    if bytes.len() < pointers_end {
        return Err(ParseError::TooShort);
    }

    let mut item_pointers = Vec::with_capacity(usize::from(header.n_item_pointers));
    for i in 0..usize::from(header.n_item_pointers) {
        let start = HEADER_LEN + i * ITEM_POINTER_LEN;
        let word_bytes: [u8; ITEM_POINTER_LEN] = bytes[start..start + ITEM_POINTER_LEN]
            .try_into()
            .expect("checked length above");
        let word = u64::from_be_bytes(word_bytes);
        item_pointers.push(decode_item_pointer(word, address_bits));
    }

    let mut heap_cnt = None;
    let mut heap_length = None;
    let mut payload_offset = None;
    let mut payload_length = None;
    for ptr in &item_pointers {
        match ptr.id {
            HEAP_CNT_ID => heap_cnt = Some(ptr.value),
            HEAP_LENGTH_ID => heap_length = Some(ptr.value),
            PAYLOAD_OFFSET_ID => payload_offset = Some(ptr.value),
            PAYLOAD_LENGTH_ID => payload_length = Some(ptr.value),
            _ => {}
        }
    }
    let heap_cnt = heap_cnt.ok_or(ParseError::MissingMandatoryItem)?;
    let heap_length = heap_length.ok_or(ParseError::MissingMandatoryItem)?;
    let payload_offset = payload_offset.ok_or(ParseError::MissingMandatoryItem)?;
    let payload_length = payload_length.ok_or(ParseError::MissingMandatoryItem)?;

    let payload_start = pointers_end;
    let payload_len = usize::try_from(payload_length).map_err(|_| ParseError::TooShort)?;
    let payload_end = payload_start
        .checked_add(payload_len)
        .ok_or(ParseError::TooShort)?;
    if bytes.len() < payload_end {
        return Err(ParseError::TooShort);
    }

    Ok(ParsedPacket {
        heap_cnt,
        heap_length,
        payload_offset,
        payload_length,
        item_pointers,
        payload: Bytes::copy_from_slice(&bytes[payload_start..payload_end]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{generator::PacketGenerator, heap::Heap};

    #[test]
    fn round_trips_a_generated_packet() {
        let mut heap = Heap::new();
        heap.add_immediate(0x1000, 0xDEAD_BEEF);
        heap.add_item(0x2000, octs::Bytes::from(vec![7u8; 32]));
        let mut gen = PacketGenerator::new(heap, 42, 40, 1472).unwrap();
        let packet = gen.next();

        let parsed = parse_packet(&packet.bytes).unwrap();
        assert_eq!(42, parsed.heap_cnt);
        assert_eq!(32, parsed.heap_length);
        assert_eq!(0, parsed.payload_offset);
        assert_eq!(32, parsed.payload_length);
        assert_eq!(32, parsed.payload.len());
    }

    #[test]
    fn rejects_short_header() {
        assert_eq!(ParseError::TooShort, parse_packet(&[0x53, 0x04]).unwrap_err());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut heap = Heap::new();
        heap.add_immediate(0x1000, 1);
        let mut gen = PacketGenerator::new(heap, 1, 40, 1472).unwrap();
        let mut bytes = gen.next().bytes.to_vec();
        bytes[0] = 0xFF;
        assert_eq!(ParseError::BadMagic, parse_packet(&bytes).unwrap_err());
    }

    #[test]
    fn rejects_truncated_payload() {
        let mut heap = Heap::new();
        heap.add_item(0x2000, octs::Bytes::from(vec![1u8; 16]));
        let mut gen = PacketGenerator::new(heap, 1, 40, 1472).unwrap();
        let bytes = gen.next().bytes;
        let truncated = &bytes[..bytes.len() - 4];
        assert_eq!(ParseError::TooShort, parse_packet(truncated).unwrap_err());
    }
}
