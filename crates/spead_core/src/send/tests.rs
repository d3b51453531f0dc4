use std::sync::{Arc, Mutex};

use super::*;
use crate::heap::Heap;

/// A transport that immediately drains `next_packet` and reports success for
/// every packet, recording what it sent for assertions.
#[derive(Clone)]
struct RecordingTransport {
    executor: InlineExecutor,
    sent: Arc<Mutex<Vec<TaggedPacket>>>,
}

impl RecordingTransport {
    fn new() -> Self {
        Self {
            executor: InlineExecutor,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl SendTransport for RecordingTransport {
    type Executor = InlineExecutor;

    fn executor(&self) -> Self::Executor {
        self.executor
    }

    fn async_send_packets(&self, scheduler: SendScheduler<Self>) {
        let mut outcomes = Vec::new();
        while let Some(packet) = scheduler.next_packet() {
            let bytes = packet.bytes.len() as u64;
            let heap_cnt = packet.heap_cnt;
            let last = packet.last;
            self.sent.lock().unwrap().push(packet);
            outcomes.push(PacketOutcome {
                heap_cnt,
                bytes,
                last,
                result: Ok(()),
            });
        }
        scheduler.packets_done(outcomes);
    }
}

fn heap_with_payload(id: u64, len: usize) -> Heap {
    let mut heap = Heap::new();
    heap.add_item(id, octs::Bytes::from(vec![0xAB; len]));
    heap
}

/// A transport that never drains the queue: `async_send_packets` does
/// nothing. Used to keep heaps queued deterministically, without resorting
/// to a rate/burst configuration small enough to stall the pacer —
/// `InlineExecutor::post_delayed` sleeps the calling thread for real, so a
/// tiny `rate` would otherwise block the test for as long as the computed
/// pacer delay.
#[derive(Clone)]
struct StallingTransport {
    executor: InlineExecutor,
}

impl SendTransport for StallingTransport {
    type Executor = InlineExecutor;

    fn executor(&self) -> Self::Executor {
        self.executor
    }

    fn async_send_packets(&self, _scheduler: SendScheduler<Self>) {}
}

#[test]
fn single_heap_completes_successfully() {
    let transport = RecordingTransport::new();
    let scheduler = SendScheduler::new(transport.clone(), SendStreamConfig::default(), 40);

    let (tx, rx) = std::sync::mpsc::channel();
    let heap = heap_with_payload(0x2000, 100);
    let admitted = scheduler.async_send_heap(
        heap,
        move |outcome| {
            tx.send(outcome).unwrap();
        },
        Some(1),
    );
    assert_eq!(AdmitResult::Accepted, admitted);

    let outcome = rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
    assert!(outcome.result.is_ok());
    assert_eq!(100, outcome.bytes_sent);
    assert!(!transport.sent.lock().unwrap().is_empty());

    scheduler.flush();
}

#[test]
fn heaps_complete_in_enqueue_order() {
    let transport = RecordingTransport::new();
    let scheduler = SendScheduler::new(transport, SendStreamConfig::default(), 40);

    let (tx, rx) = std::sync::mpsc::channel();
    for i in 0..3u64 {
        let tx = tx.clone();
        scheduler.async_send_heap(
            heap_with_payload(0x2000, 16),
            move |outcome| tx.send((i, outcome)).unwrap(),
            Some(i + 1),
        );
    }

    let mut order = Vec::new();
    for _ in 0..3 {
        let (i, outcome) = rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        assert!(outcome.result.is_ok());
        order.push(i);
    }
    assert_eq!(vec![0, 1, 2], order);
    scheduler.flush();
}

#[test]
fn queue_overflow_rejects_with_would_block() {
    let transport = StallingTransport {
        executor: InlineExecutor,
    };
    let mut config = SendStreamConfig::default();
    config.set_max_heaps(1).unwrap();
    let scheduler = SendScheduler::new(transport, config, 40);

    let (tx, rx) = std::sync::mpsc::channel();
    let tx2 = tx.clone();
    scheduler.async_send_heap(
        heap_with_payload(0x2000, 4096),
        move |outcome| tx.send(outcome).unwrap(),
        Some(1),
    );
    let admitted = scheduler.async_send_heap(
        heap_with_payload(0x2000, 16),
        move |outcome| tx2.send(outcome).unwrap(),
        Some(2),
    );
    assert_eq!(AdmitResult::Rejected, admitted);

    let outcome = rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
    assert_eq!(Err(crate::error::ErrorKind::WouldBlock), outcome.result);
    assert_eq!(0, outcome.bytes_sent);
}

#[test]
fn stop_cancels_queued_heaps() {
    let transport = StallingTransport {
        executor: InlineExecutor,
    };
    let scheduler = SendScheduler::new(transport, SendStreamConfig::default(), 40);

    let (tx, rx) = std::sync::mpsc::channel();
    scheduler.async_send_heap(
        heap_with_payload(0x2000, 1 << 20),
        move |outcome| tx.send(outcome).unwrap(),
        Some(1),
    );
    scheduler.stop();

    let outcome = rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
    assert_eq!(Err(crate::error::ErrorKind::Cancelled), outcome.result);
}
