//! TCP byte-stream reframing: splits a byte stream into length-prefixed
//! SPEAD packets.
//!
//! Ported from `spead2::recv::tcp_reader` (`original_source/src/recv_tcp.cpp`):
//! an 8-byte big-endian length prefix precedes every packet on the wire.
//! Oversized packets are skipped rather than erroring the stream (spec.md's
//! TCP reframing is supplemented from this behaviour — see SPEC_FULL.md §C).

use octs::{Bytes, BytesMut};
use tracing::info;

/// Reframes a TCP byte stream into SPEAD packets.
///
/// Feed received bytes with [`TcpFramer::push`], then drain complete
/// packets with [`TcpFramer::next_packet`] until it returns `None`.
#[derive(Debug)]
pub struct TcpFramer {
    max_size: usize,
    buf: BytesMut,
    head: usize,
    pkt_size: u64,
    to_skip: u64,
}

impl TcpFramer {
    /// Creates a framer that drops (rather than errors on) any packet whose
    /// declared length exceeds `max_size`.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            buf: BytesMut::new(),
            head: 0,
            pkt_size: 0,
            to_skip: 0,
        }
    }

    /// Appends newly received bytes to the internal buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Extracts the next complete packet, or `None` if more data is needed
    /// before one can be produced.
    ///
    /// Call repeatedly until `None` before calling [`TcpFramer::push`]
    /// again.
    pub fn next_packet(&mut self) -> Option<Bytes> {
        loop {
            if self.pkt_size == 0 && self.to_skip == 0 {
                let available = self.buf.len() - self.head;
                if available < 8 {
                    self.compact();
                    return None;
                }
                let len_bytes: [u8; 8] = self.buf[self.head..self.head + 8]
                    .try_into()
                    .expect("exactly 8 bytes sliced");
                let pkt_size = u64::from_be_bytes(len_bytes);
                self.head += 8;
                if pkt_size as usize > self.max_size {
                    info!(
                        pkt_size,
                        max_size = self.max_size,
                        "dropping packet due to truncation"
                    );
                    self.to_skip = pkt_size;
                } else {
                    self.pkt_size = pkt_size;
                }
                continue;
            }

            if self.to_skip > 0 {
                let available = (self.buf.len() - self.head) as u64;
                if available == 0 {
                    self.compact();
                    return None;
                }
                let skip = self.to_skip.min(available);
                self.head += skip as usize;
                self.to_skip -= skip;
                if self.to_skip == 0 {
                    self.pkt_size = 0;
                }
                continue;
            }

            let available = self.buf.len() - self.head;
            if (available as u64) < self.pkt_size {
                self.compact();
                return None;
            }
            let len = self.pkt_size as usize;
            let packet = Bytes::from(self.buf[self.head..self.head + len].to_vec());
            self.head += len;
            self.pkt_size = 0;
            return Some(packet);
        }
    }

    /// Discards already-consumed bytes from the front of the buffer once
    /// more than half of it has been read, mirroring
    /// `tcp_reader::enqueue_receive`'s buffer compaction.
    fn compact(&mut self) {
        if self.head > 0 && self.head * 2 > self.buf.len() {
            let remaining = self.buf.split_off(self.head);
            self.buf = remaining;
            self.head = 0;
        }
    }
}
