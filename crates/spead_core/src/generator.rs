//! Packet generator: fragments a [`Heap`] into a lazy, single-use sequence
//! of packets.
//!
//! See spec.md §4.2.

use octs::{Bytes, BytesMut};

use crate::{
    codec::{encode_item_pointer, encode_packet_header},
    error::ConfigError,
    heap::{Heap, Item},
    packet::{
        HEADER_LEN, HEAP_CNT_ID, HEAP_LENGTH_ID, ITEM_POINTER_LEN, ItemPointer, PAYLOAD_LENGTH_ID,
        PAYLOAD_OFFSET_ID,
    },
};

/// Number of mandatory item pointers present in every packet (heap cnt, heap
/// length, payload offset, payload length).
const MANDATORY_POINTERS: usize = 4;

/// The minimum packet size able to hold just the header and mandatory
/// pointers, with no room for extra pointers or payload.
#[must_use]
pub const fn min_packet_size() -> usize {
    HEADER_LEN + MANDATORY_POINTERS * ITEM_POINTER_LEN
}

/// One packet produced by [`PacketGenerator`].
#[derive(Debug, Clone)]
pub struct Packet {
    /// The fully encoded packet bytes, ready to hand to a transport.
    pub bytes: Bytes,
    /// Whether this is the last packet the generator will produce.
    pub last: bool,
}

/// Fragments a single [`Heap`] into packets, in generator order.
///
/// Single-use: once [`PacketGenerator::has_next`] returns `false`, the
/// generator is exhausted and must be discarded (spec.md §4.2, §9 "Lazy
/// packet sequence").
#[derive(Debug)]
pub struct PacketGenerator {
    heap: Heap,
    heap_cnt: u64,
    address_bits: u32,
    address_bytes: u8,
    max_packet_size: usize,
    heap_length: u64,
    next_item: usize,
    item_started: bool,
    item_sent: u64,
    payload_cursor: u64,
    finished: bool,
}

impl PacketGenerator {
    /// Creates a generator over `heap`, which will be walked in item order
    /// and emitted under heap counter `heap_cnt`.
    ///
    /// # Errors
    ///
    /// Errors if `max_packet_size` cannot hold the header and mandatory item
    /// pointers.
    pub fn new(
        heap: Heap,
        heap_cnt: u64,
        address_bits: u32,
        max_packet_size: usize,
    ) -> Result<Self, ConfigError> {
        let min = min_packet_size();
        if max_packet_size < min {
            return Err(ConfigError::PacketTooSmall {
                size: max_packet_size,
                min,
            });
        }
        let heap_length = heap.payload_len();
        Ok(Self {
            heap,
            heap_cnt,
            address_bits,
            address_bytes: u8::try_from(address_bits / 8).expect("address_bits fits in a byte count"),
            max_packet_size,
            heap_length,
            next_item: 0,
            item_started: false,
            item_sent: 0,
            payload_cursor: 0,
            finished: false,
        })
    }

    /// Whether [`PacketGenerator::next`] may be called again.
    #[must_use]
    pub const fn has_next(&self) -> bool {
        !self.finished
    }

    /// Produces the next packet.
    ///
    /// # Panics
    ///
    /// Panics if [`PacketGenerator::has_next`] is `false`.
    pub fn next(&mut self) -> Packet {
        assert!(self.has_next(), "generator is exhausted");

        let budget_cap = self.max_packet_size - HEADER_LEN - MANDATORY_POINTERS * ITEM_POINTER_LEN;
        let mut budget = budget_cap;
        let packet_payload_offset = self.payload_cursor;
        let mut extra_pointers: Vec<ItemPointer> = Vec::new();
        let mut payload = BytesMut::with_capacity(budget_cap.min(4096));

        loop {
            let Some(item) = self.heap.items().get(self.next_item) else {
                break;
            };
            match item {
                Item::Immediate { id, value } => {
                    if budget < ITEM_POINTER_LEN {
                        break;
                    }
                    extra_pointers.push(ItemPointer::immediate(*id, *value));
                    budget -= ITEM_POINTER_LEN;
                    self.next_item += 1;
                }
                Item::Addressed { id, payload: item_payload } => {
                    if !self.item_started {
                        if budget < ITEM_POINTER_LEN {
                            break;
                        }
                        extra_pointers.push(ItemPointer::addressed(*id, self.payload_cursor));
                        budget -= ITEM_POINTER_LEN;
                        self.item_started = true;
                    }

                    let item_len = item_payload.len() as u64;
                    let remaining = item_len - self.item_sent;
                    if remaining == 0 {
                        self.next_item += 1;
                        self.item_started = false;
                        self.item_sent = 0;
                        continue;
                    }
                    if budget == 0 {
                        break;
                    }

                    let take = remaining.min(budget as u64);
                    let start = self.item_sent as usize;
                    let end = start + take as usize;
                    payload.extend_from_slice(&item_payload[start..end]);
                    self.item_sent += take;
                    self.payload_cursor += take;
                    budget -= take as usize;

                    if self.item_sent == item_len {
                        self.next_item += 1;
                        self.item_started = false;
                        self.item_sent = 0;
                    } else {
                        break;
                    }
                }
            }
        }

        if self.next_item >= self.heap.items().len() {
            self.finished = true;
        }

        let payload = payload.freeze();
        let payload_len = payload.len() as u64;

        let n_item_pointers = u16::try_from(MANDATORY_POINTERS + extra_pointers.len())
            .expect("a single packet cannot hold more than u16::MAX item pointers");

        let mut bytes = BytesMut::with_capacity(HEADER_LEN + n_item_pointers as usize * ITEM_POINTER_LEN + payload.len());
        bytes.extend_from_slice(&encode_packet_header(self.address_bytes, n_item_pointers));

        let mandatory = [
            ItemPointer::immediate(HEAP_CNT_ID, self.heap_cnt),
            ItemPointer::immediate(HEAP_LENGTH_ID, self.heap_length),
            ItemPointer::immediate(PAYLOAD_OFFSET_ID, packet_payload_offset),
            ItemPointer::immediate(PAYLOAD_LENGTH_ID, payload_len),
        ];
        for ptr in mandatory.into_iter().chain(extra_pointers) {
            let word = encode_item_pointer(ptr, self.address_bits);
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        bytes.extend_from_slice(&payload);

        Packet {
            bytes: bytes.freeze(),
            last: self.finished,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_undersized_packets() {
        let heap = Heap::new();
        let err = PacketGenerator::new(heap, 1, 40, min_packet_size() - 1).unwrap_err();
        assert_eq!(
            ConfigError::PacketTooSmall {
                size: min_packet_size() - 1,
                min: min_packet_size(),
            },
            err
        );
    }

    #[test]
    fn empty_heap_produces_one_packet() {
        let heap = Heap::new();
        let mut gen = PacketGenerator::new(heap, 7, 40, 1472).unwrap();
        assert!(gen.has_next());
        let packet = gen.next();
        assert!(packet.last);
        assert!(!gen.has_next());
    }

    #[test]
    fn fragments_across_multiple_packets() {
        let mut heap = Heap::new();
        heap.add_immediate(0x1000, 0xDEAD_BEEF);
        heap.add_item(0x2000, Bytes::from(vec![7u8; 200]));

        let mut gen = PacketGenerator::new(heap, 1, 40, 64).unwrap();
        let mut packets = Vec::new();
        while gen.has_next() {
            packets.push(gen.next());
        }

        assert!(packets.len() > 1);
        assert!(packets.iter().rev().skip(1).all(|p| !p.last));
        assert!(packets.last().unwrap().last);
    }
}
