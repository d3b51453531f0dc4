//! Outbound heap data model: [`Heap`] and [`Item`].
//!
//! See spec.md §3 "Heap (outbound)".

use octs::Bytes;

/// One item in an outbound [`Heap`]: either an inline immediate value, or a
/// reference to a payload byte range the caller owns until the heap's
/// completion callback fires (spec.md §5 "Shared resources").
#[derive(Debug, Clone)]
pub enum Item {
    /// An inline value, at most `address_bits` bits wide.
    Immediate {
        /// Item ID. Must be greater than 0.
        id: u64,
        /// The immediate value.
        value: u64,
    },
    /// A reference to a byte range within the heap's payload.
    Addressed {
        /// Item ID. Must be greater than 0.
        id: u64,
        /// The item's payload bytes.
        payload: Bytes,
    },
}

impl Item {
    /// The item's ID.
    #[must_use]
    pub const fn id(&self) -> u64 {
        match self {
            Self::Immediate { id, .. } | Self::Addressed { id, .. } => *id,
        }
    }
}

/// An outbound heap: an ordered sequence of items to be fragmented into
/// packets by [`crate::generator::PacketGenerator`].
///
/// Invariant: every item's ID is greater than 0 (ID 0 is reserved for
/// padding, spec.md §6).
#[derive(Debug, Clone, Default)]
pub struct Heap {
    items: Vec<Item>,
}

impl Heap {
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an immediate item.
    ///
    /// # Panics
    ///
    /// Panics if `id == 0`.
    pub fn add_immediate(&mut self, id: u64, value: u64) -> &mut Self {
        assert!(id != 0, "item ID 0 is reserved for padding");
        self.items.push(Item::Immediate { id, value });
        self
    }

    /// Appends an addressed item backed by `payload`.
    ///
    /// # Panics
    ///
    /// Panics if `id == 0`.
    pub fn add_item(&mut self, id: u64, payload: Bytes) -> &mut Self {
        assert!(id != 0, "item ID 0 is reserved for padding");
        self.items.push(Item::Addressed { id, payload });
        self
    }

    /// The items in this heap, in insertion order.
    #[must_use]
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// The total length in bytes of all addressed items' payloads; this is
    /// the heap's `heap_length` (spec.md §3).
    #[must_use]
    pub fn payload_len(&self) -> u64 {
        self.items
            .iter()
            .map(|item| match item {
                Item::Immediate { .. } => 0,
                Item::Addressed { payload, .. } => payload.len() as u64,
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_len_sums_addressed_items_only() {
        let mut heap = Heap::new();
        heap.add_immediate(1, 42);
        heap.add_item(2, Bytes::from_static(&[0; 10]));
        heap.add_item(3, Bytes::from_static(&[0; 20]));
        assert_eq!(30, heap.payload_len());
    }

    #[test]
    #[should_panic(expected = "padding")]
    fn rejects_id_zero() {
        Heap::new().add_immediate(0, 1);
    }
}
