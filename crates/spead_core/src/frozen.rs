//! Frozen heap: the immutable, sorted item table produced by the freeze
//! procedure (§4.5), and descriptor extraction (§4.7).
//!
//! Ported from `original_source/src/recv_frozen_heap.cpp`
//! (`frozen_heap::frozen_heap`, `to_descriptor`, `get_descriptors`).

use std::ops::BitOr;

use octs::Bytes;
use tracing::warn;

use crate::{
    packet::{
        DESCRIPTOR_DESCRIPTION_ID, DESCRIPTOR_DTYPE_ID, DESCRIPTOR_FORMAT_ID, DESCRIPTOR_ID,
        DESCRIPTOR_ID_ID, DESCRIPTOR_NAME_ID, DESCRIPTOR_SHAPE_ID, HEADER_LEN, ITEM_POINTER_LEN,
        ItemPointer, PADDING_ID,
    },
    recv::parser::parse_packet,
    recv::partial::PartialHeap,
};

/// Bug-compatibility flags for interoperating with historical senders.
///
/// See spec.md §6 "Receive stream config" and SPEC_FULL.md §C: a plain
/// bitmask newtype rather than pulling in a flags crate for three bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BugCompat(u8);

impl BugCompat {
    /// No quirks enabled.
    pub const NONE: Self = Self(0);
    /// Descriptor `format`/`shape` field widths are fixed (4 and 8 bytes)
    /// rather than derived from `address_bits`.
    pub const DESCRIPTOR_WIDTHS: Self = Self(1 << 0);
    /// The "variable length" flag in a shape field is bit 1 instead of bit 0.
    pub const SHAPE_BIT_1: Self = Self(1 << 1);
    /// Quirks specific to PySPEAD 0.5.2-era senders, tracked but currently
    /// not affecting parsing beyond what the two flags above already cover
    /// (an Open Question decision, see DESIGN.md).
    pub const PYSPEAD_0_5_2: Self = Self(1 << 2);

    /// Whether `self` has every bit set in `flag`.
    #[must_use]
    pub const fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }
}

impl BitOr for BugCompat {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One item in a [`FrozenHeap`]: either the immediate value's big-endian
/// bytes, or a slice of the heap's payload.
#[derive(Debug, Clone)]
pub struct FrozenItem {
    /// Item ID.
    pub id: u64,
    /// Whether this item was carried as an immediate pointer.
    pub is_immediate: bool,
    /// The item's value bytes: `address_bytes` bytes for an immediate, or
    /// the derived-length payload slice for an addressed item.
    pub payload: Bytes,
}

/// An immutable, completed heap: items sorted by `(immediate_flag,
/// address_or_immediate)`, with addressed items' lengths derived from
/// neighbouring pointers.
///
/// See spec.md §3 "Frozen heap" and §4.5 "Freeze procedure".
#[derive(Debug, Clone)]
pub struct FrozenHeap {
    heap_cnt: u64,
    address_bits: u32,
    bug_compat: BugCompat,
    items: Vec<FrozenItem>,
}

impl FrozenHeap {
    /// Runs the freeze procedure over `pointers` collected from a complete
    /// (or forcibly flushed) partial heap, backed by `payload`.
    ///
    /// See spec.md §4.5 "Freeze procedure": pointers are stably sorted by a
    /// mask that preserves the immediate flag and the address/immediate
    /// bits, so all addressed items sort together by address; an addressed
    /// item's length is the gap to the next addressed item's address, or to
    /// the end of the heap for the last one. Zero-length addressed items are
    /// dropped (spec.md §9 "Open question").
    pub(crate) fn freeze(
        heap_cnt: u64,
        address_bits: u32,
        bug_compat: BugCompat,
        payload: Bytes,
        mut pointers: Vec<ItemPointer>,
    ) -> Self {
        let address_bytes = (address_bits / 8) as usize;
        let address_mask = (1u64 << address_bits) - 1;
        pointers.sort_by_key(|ptr| (u64::from(ptr.is_immediate) << 63) | (ptr.value & address_mask));

        let mut items = Vec::with_capacity(pointers.len());
        let mut i = 0;
        while i < pointers.len() {
            let ptr = pointers[i];
            if ptr.is_padding() {
                i += 1;
                continue;
            }
            if ptr.is_immediate {
                let value_be = ptr.value.to_be_bytes();
                let item_payload = Bytes::copy_from_slice(&value_be[8 - address_bytes..]);
                items.push(FrozenItem {
                    id: ptr.id,
                    is_immediate: true,
                    payload: item_payload,
                });
            } else {
                let start = ptr.value;
                let end = pointers
                    .get(i + 1)
                    .filter(|next| !next.is_immediate)
                    .map_or(payload.len() as u64, |next| next.value);
                if start == end {
                    i += 1;
                    continue;
                }
                items.push(FrozenItem {
                    id: ptr.id,
                    is_immediate: false,
                    payload: payload.slice(start as usize..end as usize),
                });
            }
            i += 1;
        }

        Self {
            heap_cnt,
            address_bits,
            bug_compat,
            items,
        }
    }

    /// The heap counter this heap was assembled under.
    #[must_use]
    pub const fn heap_cnt(&self) -> u64 {
        self.heap_cnt
    }

    /// The frozen, sorted item list.
    #[must_use]
    pub fn items(&self) -> &[FrozenItem] {
        &self.items
    }

    /// Interprets this heap's items as an item descriptor.
    ///
    /// See spec.md §4.7: `dtype` (numpy header), if present, supersedes
    /// `format`/`shape`, which are both cleared.
    #[must_use]
    pub fn to_descriptor(&self) -> Descriptor {
        let mut out = Descriptor::default();
        for item in &self.items {
            match item.id {
                DESCRIPTOR_ID_ID => {
                    if item.is_immediate {
                        out.id = load_bytes_be(&item.payload);
                    } else {
                        warn!("ignoring descriptor ID item that is not immediate");
                    }
                }
                DESCRIPTOR_NAME_ID => out.name = String::from_utf8_lossy(&item.payload).into_owned(),
                DESCRIPTOR_DESCRIPTION_ID => {
                    out.description = String::from_utf8_lossy(&item.payload).into_owned();
                }
                DESCRIPTOR_FORMAT_ID => {
                    let field_size = if self.bug_compat.contains(BugCompat::DESCRIPTOR_WIDTHS) {
                        4
                    } else {
                        9 - (self.address_bits as usize / 8)
                    };
                    let mut pos = 0;
                    while pos + field_size <= item.payload.len() {
                        let ty = item.payload[pos] as char;
                        #[expect(clippy::cast_possible_wrap, reason = "field widths stay far below i64::MAX")]
                        let bits = load_bytes_be(&item.payload[pos + 1..pos + field_size]) as i64;
                        out.format.push((ty, bits));
                        pos += field_size;
                    }
                }
                DESCRIPTOR_SHAPE_ID => {
                    let field_size = if self.bug_compat.contains(BugCompat::DESCRIPTOR_WIDTHS) {
                        8
                    } else {
                        1 + (self.address_bits as usize / 8)
                    };
                    let mask = if self.bug_compat.contains(BugCompat::SHAPE_BIT_1) {
                        0b10
                    } else {
                        0b01
                    };
                    let mut pos = 0;
                    while pos + field_size <= item.payload.len() {
                        let variable = item.payload[pos] & mask != 0;
                        #[expect(clippy::cast_possible_wrap, reason = "field widths stay far below i64::MAX")]
                        let size = if variable {
                            -1
                        } else {
                            load_bytes_be(&item.payload[pos + 1..pos + field_size]) as i64
                        };
                        out.shape.push(size);
                        pos += field_size;
                    }
                }
                DESCRIPTOR_DTYPE_ID => {
                    out.numpy_header = String::from_utf8_lossy(&item.payload).into_owned();
                }
                _ => warn!(id = item.id, "unrecognised descriptor item id"),
            }
        }
        if !out.numpy_header.is_empty() {
            out.shape.clear();
            out.format.clear();
        }
        out
    }

    /// Re-parses every embedded descriptor item's payload as one or more
    /// whole packets of its own sub-heap, and interprets the reassembled
    /// heap as a [`Descriptor`].
    ///
    /// See spec.md §4.7 and SPEC_FULL.md §C: grounded in
    /// `recv_frozen_heap.cpp`'s `get_descriptors`, which feeds each
    /// descriptor item's bytes through a private, throwaway receive stream —
    /// here, a loop over successive embedded packets applied to one
    /// [`PartialHeap`].
    #[must_use]
    pub fn descriptors(&self) -> Vec<Descriptor> {
        let mut out = Vec::new();
        for item in &self.items {
            if item.id != DESCRIPTOR_ID {
                continue;
            }
            if let Some(descriptor) = parse_descriptor_sub_heap(&item.payload, self.address_bits, self.bug_compat) {
                out.push(descriptor);
            }
        }
        out
    }
}

/// Feeds `bytes` — a descriptor item's payload, made up of one or more whole
/// embedded packets back to back — through the packet parser until the
/// sub-heap they describe is complete, then freezes it into a [`Descriptor`].
fn parse_descriptor_sub_heap(bytes: &[u8], address_bits: u32, bug_compat: BugCompat) -> Option<Descriptor> {
    let now = std::time::Instant::now();
    let mut sub_heap: Option<PartialHeap> = None;
    let mut offset = 0;
    while offset < bytes.len() {
        let parsed = match parse_packet(&bytes[offset..]) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(?err, "failed to parse embedded descriptor packet");
                return None;
            }
        };
        offset += HEADER_LEN + parsed.item_pointers.len() * ITEM_POINTER_LEN + parsed.payload_length as usize;

        match &mut sub_heap {
            Some(heap) => heap.apply(parsed, now),
            None => {
                let mut heap = PartialHeap::new(&parsed, now);
                heap.apply(parsed, now);
                sub_heap = Some(heap);
            }
        }
        if sub_heap.as_ref().is_some_and(PartialHeap::is_complete) {
            break;
        }
    }

    let sub_heap = sub_heap?;
    if !sub_heap.is_complete() {
        warn!("descriptor sub-heap did not complete from its embedded packets");
        return None;
    }
    let descriptor = sub_heap.freeze(address_bits, bug_compat).to_descriptor();
    if descriptor.id == 0 {
        warn!("incomplete descriptor (no ID)");
        return None;
    }
    Some(descriptor)
}

/// Reads up to 8 bytes as a big-endian number, left-padding with zero.
fn load_bytes_be(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let len = bytes.len().min(8);
    buf[8 - len..].copy_from_slice(&bytes[..len]);
    u64::from_be_bytes(buf)
}

/// A decoded item descriptor: the interpretation of a `DESCRIPTOR_ID` item's
/// sub-heap.
///
/// See spec.md §4.7.
#[derive(Debug, Clone, Default)]
pub struct Descriptor {
    /// The ID of the item this descriptor describes.
    pub id: u64,
    /// The item's name.
    pub name: String,
    /// The item's human-readable description.
    pub description: String,
    /// Per-dimension sizes; `-1` marks a variable-length dimension.
    pub shape: Vec<i64>,
    /// `(type_char, bit_width)` pairs describing the item's encoding.
    pub format: Vec<(char, i64)>,
    /// A numpy-style dtype header, superseding `format`/`shape` when present.
    pub numpy_header: String,
}
