//! Wire-level packet types: item pointers, mandatory item IDs, and the
//! parsed-packet record produced by [`crate::recv::parser`].

use octs::Bytes;

/// SPEAD magic byte, offset 0 of every packet header.
pub const MAGIC: u8 = 0x53;
/// Protocol version this crate implements.
pub const VERSION: u8 = 0x04;
/// Length in bytes of the fixed packet header (before item pointers).
pub const HEADER_LEN: usize = 8;
/// Length in bytes of one item pointer.
pub const ITEM_POINTER_LEN: usize = 8;

/// Item ID reserved for padding; items with this ID are skipped by both the
/// generator and the parser.
pub const PADDING_ID: u64 = 0x0000;
/// Heap counter, identifying which heap a packet belongs to.
pub const HEAP_CNT_ID: u64 = 0x0001;
/// Total length in bytes of the heap's payload.
pub const HEAP_LENGTH_ID: u64 = 0x0002;
/// Offset in bytes of this packet's payload slice within the heap.
pub const PAYLOAD_OFFSET_ID: u64 = 0x0003;
/// Length in bytes of this packet's payload slice.
pub const PAYLOAD_LENGTH_ID: u64 = 0x0004;
/// Stream control item: marks the start or end of a stream.
pub const STREAM_CTRL_ID: u64 = 0x0005;
/// [`STREAM_CTRL_ID`] value marking the start of a stream.
pub const STREAM_CTRL_START: u64 = 0;
/// [`STREAM_CTRL_ID`] value marking the end of a stream.
pub const STREAM_CTRL_END: u64 = 2;
/// A self-describing item descriptor, see [`crate::frozen::Descriptor`].
pub const DESCRIPTOR_ID: u64 = 0x0006;

/// Descriptor sub-item: item name.
pub const DESCRIPTOR_NAME_ID: u64 = 0x0010;
/// Descriptor sub-item: item description.
pub const DESCRIPTOR_DESCRIPTION_ID: u64 = 0x0011;
/// Descriptor sub-item: item shape list.
pub const DESCRIPTOR_SHAPE_ID: u64 = 0x0012;
/// Descriptor sub-item: item format list.
pub const DESCRIPTOR_FORMAT_ID: u64 = 0x0013;
/// Descriptor sub-item: the ID of the item being described.
pub const DESCRIPTOR_ID_ID: u64 = 0x0014;
/// Descriptor sub-item: a numpy-style dtype header, superseding format/shape.
pub const DESCRIPTOR_DTYPE_ID: u64 = 0x0015;

/// A single decoded item pointer: the tagged 64-bit word described in
/// spec.md §3/§6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemPointer {
    /// Whether the low bits carry an immediate value (`true`) or an address
    /// offset into the heap payload (`false`).
    pub is_immediate: bool,
    /// The item ID.
    pub id: u64,
    /// Either the immediate value, or the address offset, depending on
    /// [`ItemPointer::is_immediate`].
    pub value: u64,
}

impl ItemPointer {
    /// Creates an immediate item pointer.
    #[must_use]
    pub const fn immediate(id: u64, value: u64) -> Self {
        Self {
            is_immediate: true,
            id,
            value,
        }
    }

    /// Creates an addressed item pointer.
    #[must_use]
    pub const fn addressed(id: u64, address: u64) -> Self {
        Self {
            is_immediate: false,
            id,
            value: address,
        }
    }

    /// Whether this pointer is the padding item (ID 0), which both the
    /// generator and the parser must skip over.
    #[must_use]
    pub const fn is_padding(&self) -> bool {
        self.id == PADDING_ID
    }
}

/// A fully parsed SPEAD packet, as produced by [`crate::recv::parser::parse_packet`].
///
/// See spec.md §4.4.
#[derive(Debug, Clone)]
pub struct ParsedPacket {
    /// Heap counter of the heap this packet belongs to.
    pub heap_cnt: u64,
    /// Total length in bytes of the heap's payload, as claimed by this
    /// packet.
    pub heap_length: u64,
    /// Offset in bytes of [`ParsedPacket::payload`] within the heap.
    pub payload_offset: u64,
    /// Length in bytes of [`ParsedPacket::payload`].
    pub payload_length: u64,
    /// All item pointers carried by this packet, mandatory ones included, in
    /// wire order.
    pub item_pointers: Vec<ItemPointer>,
    /// The payload bytes carried by this packet.
    pub payload: Bytes,
}
