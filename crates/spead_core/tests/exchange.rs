//! End-to-end exercises of the packet codec, send scheduler, and receive
//! reassembler against the concrete scenarios in spec.md §8.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use spead_core::{
    Heap, ReceiveStream, ReceiveStreamConfig,
    send::{
        AdmitResult, InlineExecutor, PacketOutcome, SendOutcome, SendScheduler, SendStreamConfig,
        SendTransport, TaggedPacket, ThreadPoolExecutor,
    },
};

/// A transport that drains packets synchronously and reports them all as
/// successfully sent, recording the raw bytes for cross-checking against a
/// [`ReceiveStream`].
#[derive(Clone)]
struct LoopbackTransport {
    executor: InlineExecutor,
    sent: Arc<Mutex<Vec<TaggedPacket>>>,
}

impl LoopbackTransport {
    fn new() -> Self {
        Self {
            executor: InlineExecutor,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl SendTransport for LoopbackTransport {
    type Executor = InlineExecutor;

    fn executor(&self) -> Self::Executor {
        self.executor
    }

    fn async_send_packets(&self, scheduler: SendScheduler<Self>) {
        let mut outcomes = Vec::new();
        while let Some(packet) = scheduler.next_packet() {
            outcomes.push(PacketOutcome {
                heap_cnt: packet.heap_cnt,
                bytes: packet.bytes.len() as u64,
                last: packet.last,
                result: Ok(()),
            });
            self.sent.lock().unwrap().push(packet);
        }
        scheduler.packets_done(outcomes);
    }
}

/// S4 (round-trip UDP): a small heap fragmented over 64-byte packets is
/// reassembled by a [`ReceiveStream`] into a frozen heap with the original
/// items intact.
#[test]
fn s4_round_trip_udp() {
    let transport = LoopbackTransport::new();
    let mut config = SendStreamConfig::default();
    config.set_max_packet_size(64);
    let scheduler = SendScheduler::new(transport.clone(), config, 40);

    let mut heap = Heap::new();
    heap.add_immediate(0x1000, 0xDEAD_BEEF);
    let original_payload: Vec<u8> = (0..200).collect();
    heap.add_item(0x2000, octs::Bytes::from(original_payload.clone()));

    let (tx, rx) = std::sync::mpsc::channel();
    scheduler.async_send_heap(heap, move |outcome| tx.send(outcome).unwrap(), Some(1));
    let outcome: SendOutcome = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(outcome.result.is_ok());

    let received = Arc::new(Mutex::new(Vec::new()));
    let received2 = Arc::clone(&received);
    let mut stream = ReceiveStream::new(ReceiveStreamConfig::default(), 40, move |heap| {
        received2.lock().unwrap().push(heap);
    });

    for packet in transport.sent.lock().unwrap().iter() {
        stream.on_packet(&packet.bytes);
    }

    let received = received.lock().unwrap();
    assert_eq!(1, received.len());
    let frozen = &received[0].frozen;
    assert!(received[0].complete);

    let immediate = frozen.items().iter().find(|item| item.id == 0x1000).unwrap();
    assert!(immediate.is_immediate);
    assert_eq!(0xDEAD_BEEFu64, u64::from_be_bytes({
        let mut buf = [0u8; 8];
        buf[3..].copy_from_slice(&immediate.payload);
        buf
    }));

    let addressed = frozen.items().iter().find(|item| item.id == 0x2000).unwrap();
    assert_eq!(&original_payload[..], &addressed.payload[..]);
}

/// S5 (TCP reframing): two framed packets delivered as arbitrary-size reads
/// still come out as the two original packets, in order.
#[test]
fn s5_tcp_reframing_across_arbitrary_reads() {
    use spead_core::recv::framer::TcpFramer;

    let first = vec![0xAAu8; 40];
    let second = vec![0xBBu8; 60];
    let mut wire = Vec::new();
    wire.extend_from_slice(&(first.len() as u64).to_be_bytes());
    wire.extend_from_slice(&first);
    wire.extend_from_slice(&(second.len() as u64).to_be_bytes());
    wire.extend_from_slice(&second);

    let mut framer = TcpFramer::new(1472);
    let mut extracted = Vec::new();
    for chunk_len in [3, 11, 50, 50, 2] {
        let (chunk, rest) = wire.split_at(chunk_len);
        framer.push(chunk);
        wire = rest.to_vec();
        while let Some(packet) = framer.next_packet() {
            extracted.push(packet);
        }
    }
    assert!(wire.is_empty());

    assert_eq!(2, extracted.len());
    assert_eq!(first.as_slice(), &extracted[0][..]);
    assert_eq!(second.as_slice(), &extracted[1][..]);
}

/// A transport whose executor runs posted tasks on real background threads,
/// so pacing delays (`Executor::post_delayed`) are genuine `thread::sleep`s
/// rather than blocking the enqueuing thread — needed to let several heaps
/// accumulate pacer credit together instead of each draining the queue to
/// `EMPTY` (and resetting the pacer) before the next is enqueued.
#[derive(Clone)]
struct PacedTransport {
    executor: ThreadPoolExecutor,
    first_packet_at: Arc<Mutex<Option<Instant>>>,
}

impl SendTransport for PacedTransport {
    type Executor = ThreadPoolExecutor;

    fn executor(&self) -> Self::Executor {
        self.executor
    }

    fn async_send_packets(&self, scheduler: SendScheduler<Self>) {
        let mut outcomes = Vec::new();
        while let Some(packet) = scheduler.next_packet() {
            self.first_packet_at.lock().unwrap().get_or_insert_with(Instant::now);
            outcomes.push(PacketOutcome {
                heap_cnt: packet.heap_cnt,
                bytes: packet.bytes.len() as u64,
                last: packet.last,
                result: Ok(()),
            });
        }
        scheduler.packets_done(outcomes);
    }
}

/// S1 (pacing): `rate=100000, burst_size=1000, burst_rate_ratio=1.0`; 10
/// heaps each producing 1000 bytes of packets. Elapsed time between
/// first-packet-out and last-callback falls in `[90ms, 110ms]`.
#[test]
fn s1_pacing_bounds_wall_clock_elapsed() {
    let first_packet_at = Arc::new(Mutex::new(None));
    let transport = PacedTransport {
        executor: ThreadPoolExecutor,
        first_packet_at: Arc::clone(&first_packet_at),
    };
    let mut config = SendStreamConfig::default();
    config.set_rate(100_000.0).unwrap();
    config.set_burst_size(1000).unwrap();
    config.set_burst_rate_ratio(1.0).unwrap();
    config.set_max_heaps(10).unwrap();
    let scheduler = SendScheduler::new(transport, config, 40);

    let (tx, rx) = std::sync::mpsc::channel();
    for cnt in 1u64..=10 {
        let tx = tx.clone();
        let mut heap = Heap::new();
        heap.add_item(0x2000, octs::Bytes::from(vec![0u8; 1000]));
        scheduler.async_send_heap(heap, move |outcome| tx.send(outcome).unwrap(), Some(cnt));
    }

    let mut last_callback_at = Instant::now();
    for _ in 0..10 {
        let outcome: SendOutcome = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(outcome.result.is_ok());
        last_callback_at = Instant::now();
    }

    let elapsed = last_callback_at - first_packet_at.lock().unwrap().expect("at least one packet was sent");
    assert!(elapsed >= Duration::from_millis(90), "elapsed too short: {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(110), "elapsed too long: {elapsed:?}");
}

/// S2 (order): callbacks for heaps A, B, C fire in enqueue order regardless
/// of how the transport happens to batch packets.
#[test]
fn s2_callbacks_fire_in_enqueue_order() {
    let transport = LoopbackTransport::new();
    let scheduler = SendScheduler::new(transport, SendStreamConfig::default(), 40);

    let (tx, rx) = std::sync::mpsc::channel();
    for (label, cnt) in [("A", 1u64), ("B", 2), ("C", 3)] {
        let tx = tx.clone();
        let mut heap = Heap::new();
        heap.add_item(0x2000, octs::Bytes::from(vec![0u8; 8]));
        scheduler.async_send_heap(heap, move |_| tx.send(label).unwrap(), Some(cnt));
    }

    let order: Vec<_> = (0..3)
        .map(|_| rx.recv_timeout(Duration::from_secs(1)).unwrap())
        .collect();
    assert_eq!(vec!["A", "B", "C"], order);
}

/// A transport that never drains packets: `async_send_packets` just records
/// that it was asked to send, leaving the heap queued forever. Used to keep
/// the send queue populated so overflow can be observed deterministically
/// under a synchronous [`InlineExecutor`].
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

/// S3 (overflow): with `max_heaps = 2`, a third concurrent heap is rejected
/// and its callback fires once with `WouldBlock` and zero bytes sent.
#[test]
fn s3_queue_overflow_rejects_third_heap() {
    let transport = StallingTransport {
        executor: InlineExecutor,
    };
    let mut config = SendStreamConfig::default();
    config.set_max_heaps(2).unwrap();
    let scheduler = SendScheduler::new(transport, config, 40);

    let (tx, rx) = std::sync::mpsc::channel();
    for cnt in 1u64..=2 {
        let tx = tx.clone();
        let mut heap = Heap::new();
        heap.add_item(0x2000, octs::Bytes::from(vec![0u8; 4096]));
        scheduler.async_send_heap(heap, move |outcome| tx.send(outcome).unwrap(), Some(cnt));
    }

    let mut heap = Heap::new();
    heap.add_item(0x2000, octs::Bytes::from(vec![0u8; 16]));
    let admitted = scheduler.async_send_heap(
        heap,
        {
            let tx = tx.clone();
            move |outcome| tx.send(outcome).unwrap()
        },
        Some(3),
    );
    assert_eq!(AdmitResult::Rejected, admitted);

    let outcome = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(Err(spead_core::ErrorKind::WouldBlock), outcome.result);
    assert_eq!(0, outcome.bytes_sent);
}
