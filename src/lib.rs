//! Transport-agnostic MIDI 1.0 codec.
//!
//! A bidirectional state machine that parses a raw MIDI byte stream into
//! typed [`Message`]s and serializes messages back onto the stream, plus
//! adapters for the three common carriers.
//!
//! # Features
//!
//! - **Streaming parser**: running status, real-time messages interleaved
//!   anywhere (including inside SysEx), arbitrary-length SysEx framing and
//!   malformed-input recovery
//! - **Encoder**: running-status elision, configurable note-off encoding,
//!   NRPN / 14-bit CC / MMC helpers
//! - **Carriers**: raw serial bytes, USB-MIDI 1.0 event packets, BLE-MIDI
//!   1.0 packets with 13-bit timestamps
//! - **Thru**: replays parsed messages to registered sinks, acting as a
//!   non-blocking repeater between carriers
//!
//! Hardware access stays outside the crate: each carrier adapter drives a
//! host-implemented hardware trait ([`SerialHardware`], [`UsbHardware`],
//! [`BleHardware`]).
//!
//! # Example
//!
//! ```ignore
//! use midi_bridge::{Midi, SerialTransport};
//!
//! let mut midi = Midi::new(SerialTransport::new(uart));
//! midi.init()?;
//!
//! midi.send_note_on(60, 100, 1)?;
//!
//! while midi.read()? {
//!     let message = midi.message();
//!     println!("{:?} on channel {}", message.msg_type, message.channel);
//! }
//! ```

pub mod error;
pub use error::{Error, Result};

mod message;
pub use message::{
    channel_from_status, merge_14bit, note_octave, note_tonic, split_14bit, Message, MessageType,
    Note, NoteOffMode, MAX_VALUE_14BIT, MAX_VALUE_7BIT,
};

mod codec;
pub use codec::{Midi, MAX_THRU_SINKS};

pub mod transport;
pub use transport::ble::{BleHardware, BlePacket, BleTransport, BLE_MAX_PACKET_SIZE};
pub use transport::serial::{SerialHardware, SerialTransport};
pub use transport::usb::{UsbHardware, UsbPacket, UsbTransport};
pub use transport::{ThruSink, Transport};
