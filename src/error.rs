//! Error types for the MIDI codec and its carrier adapters.

use thiserror::Error;

use crate::message::MessageType;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The underlying hardware adapter failed to initialize or transfer data.
    #[error("transport unavailable")]
    TransportUnavailable,

    /// Undefined status byte, or a status byte that is not allowed in the
    /// current parser state. The receive state has been reset.
    #[error("malformed status byte {0:#04x}")]
    MalformedStatus(u8),

    /// A System Exclusive frame exceeded the configured buffer capacity.
    /// The partial frame has been discarded.
    #[error("buffer overflow while collecting message")]
    BufferOverflow,

    /// Send was called with a channel outside 1..=16.
    #[error("invalid MIDI channel {0}, expected 1..=16")]
    InvalidChannel(u8),

    /// Send was called with a message type the chosen API cannot emit.
    #[error("message type {0:?} not valid for this operation")]
    InvalidType(MessageType),
}

pub type Result<T> = core::result::Result<T, Error>;
