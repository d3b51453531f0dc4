//! Shared error types used across the send and receive cores.

use derive_more::{Display, Error};

/// Wire-independent error codes surfaced to callers via completion callbacks
/// or stream-level notifications.
///
/// See spec.md §6 "Error codes".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Error)]
pub enum ErrorKind {
    /// The operation could not proceed immediately (e.g. the send queue was
    /// full).
    #[display("would block")]
    WouldBlock,
    /// The operation was cancelled because the owning stream was stopped.
    #[display("cancelled")]
    Cancelled,
    /// The underlying connection was closed.
    #[display("connection closed")]
    ConnectionClosed,
    /// A packet had an invalid magic byte.
    #[display("bad magic byte")]
    BadMagic,
    /// A packet had an unsupported protocol version.
    #[display("bad version")]
    BadVersion,
    /// A packet was shorter than its header or item pointers claimed.
    #[display("truncated packet")]
    TruncatedPacket,
    /// The send queue was full at admission time.
    #[display("queue full")]
    QueueFull,
}

/// Configuration was rejected synchronously at the point it was set.
///
/// See spec.md §7 "Configuration errors".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum ConfigError {
    /// `rate` was negative or non-finite.
    #[display("rate must be non-negative and finite")]
    InvalidRate,
    /// `burst_rate_ratio` was less than `1.0` or non-finite.
    #[display("burst rate ratio must be at least 1.0 and finite")]
    InvalidBurstRateRatio,
    /// `max_heaps` was zero.
    #[display("max_heaps must be positive")]
    ZeroMaxHeaps,
    /// `set_cnt_sequence` was called with `step == 0`.
    #[display("cnt sequence step cannot be 0")]
    ZeroStep,
    /// `max_packet_size` could not fit the mandatory item pointers.
    #[display("max_packet_size {size} is smaller than the minimum packet size {min}")]
    PacketTooSmall {
        /// The configured packet size.
        size: usize,
        /// The minimum packet size (header plus mandatory item pointers).
        min: usize,
    },
}

/// A raw packet could not be parsed into a [`ParsedPacket`].
///
/// See spec.md §4.4.
///
/// [`ParsedPacket`]: crate::packet::ParsedPacket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum ParseError {
    /// The packet was shorter than the fixed header, the claimed item
    /// pointers, or the claimed payload length.
    #[display("packet too short")]
    TooShort,
    /// The header's magic byte was not `0x53`.
    #[display("bad magic byte")]
    BadMagic,
    /// The header's version byte was not `0x04`.
    #[display("bad version")]
    BadVersion,
    /// One of the mandatory item pointers (heap cnt, heap length, payload
    /// offset, payload length) was missing.
    #[display("missing mandatory item pointer")]
    MissingMandatoryItem,
}

impl From<ParseError> for ErrorKind {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::TooShort | ParseError::MissingMandatoryItem => ErrorKind::TruncatedPacket,
            ParseError::BadMagic => ErrorKind::BadMagic,
            ParseError::BadVersion => ErrorKind::BadVersion,
        }
    }
}
