#![doc = include_str!("../README.md")]

pub mod codec;
pub mod error;
pub mod frozen;
pub mod generator;
pub mod heap;
pub mod pacer;
pub mod packet;
pub mod recv;
pub mod send;

pub use error::{ConfigError, ErrorKind, ParseError};
pub use frozen::{BugCompat, Descriptor, FrozenHeap, FrozenItem};
pub use generator::{Packet, PacketGenerator};
pub use heap::{Heap, Item};
pub use packet::{
    DESCRIPTOR_DESCRIPTION_ID, DESCRIPTOR_DTYPE_ID, DESCRIPTOR_FORMAT_ID, DESCRIPTOR_ID,
    DESCRIPTOR_ID_ID, DESCRIPTOR_NAME_ID, DESCRIPTOR_SHAPE_ID, HEAP_CNT_ID, HEAP_LENGTH_ID,
    ItemPointer, PADDING_ID, PAYLOAD_LENGTH_ID, PAYLOAD_OFFSET_ID, ParsedPacket, STREAM_CTRL_END,
    STREAM_CTRL_ID, STREAM_CTRL_START,
};
pub use recv::{DispatchedHeap, ReceiveStream, ReceiveStreamConfig};
pub use send::{
    AdmitResult, Executor, InlineExecutor, SendOutcome, SendScheduler, SendStreamConfig,
    SendTransport,
};
