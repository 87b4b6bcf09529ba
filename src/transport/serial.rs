//! Raw byte-stream carrier (DIN / TRS serial MIDI).
//!
//! The reference semantics for the codec: bytes pass through unmodified and
//! transmissions need no framing.

use crate::error::Result;
use crate::message::MessageType;
use crate::transport::{ThruSink, Transport};

/// Contract the host implements for a serial MIDI peripheral, typically a
/// UART drained from an interrupt-filled ring buffer.
pub trait SerialHardware {
    fn init(&mut self) -> Result<()>;
    fn deinit(&mut self) -> Result<()>;
    fn write(&mut self, byte: u8) -> Result<()>;
    fn read(&mut self) -> Option<u8>;
}

pub struct SerialTransport<H> {
    hwa: H,
}

impl<H: SerialHardware> SerialTransport<H> {
    pub fn new(hwa: H) -> Self {
        Self { hwa }
    }

    #[inline]
    pub fn hardware(&self) -> &H {
        &self.hwa
    }

    #[inline]
    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hwa
    }
}

impl<H: SerialHardware> ThruSink for SerialTransport<H> {
    fn begin_transmission(&mut self, _kind: MessageType) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, byte: u8) -> Result<()> {
        self.hwa.write(byte)
    }

    fn end_transmission(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<H: SerialHardware> Transport for SerialTransport<H> {
    fn init(&mut self) -> Result<()> {
        self.hwa.init()
    }

    fn deinit(&mut self) -> Result<()> {
        self.hwa.deinit()
    }

    fn read(&mut self) -> Option<u8> {
        self.hwa.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct MockSerial {
        rx: VecDeque<u8>,
        tx: Vec<u8>,
    }

    impl SerialHardware for MockSerial {
        fn init(&mut self) -> Result<()> {
            Ok(())
        }

        fn deinit(&mut self) -> Result<()> {
            Ok(())
        }

        fn write(&mut self, byte: u8) -> Result<()> {
            self.tx.push(byte);
            Ok(())
        }

        fn read(&mut self) -> Option<u8> {
            self.rx.pop_front()
        }
    }

    #[test]
    fn test_bytes_pass_through() {
        let mut transport = SerialTransport::new(MockSerial::default());
        transport.hardware_mut().rx.extend([0x90, 0x3C, 0x7F]);

        assert_eq!(transport.read(), Some(0x90));
        assert_eq!(transport.read(), Some(0x3C));
        assert_eq!(transport.read(), Some(0x7F));
        assert_eq!(transport.read(), None);

        transport.begin_transmission(MessageType::NoteOn).unwrap();
        transport.write(0x90).unwrap();
        transport.write(0x3C).unwrap();
        transport.write(0x7F).unwrap();
        transport.end_transmission().unwrap();
        assert_eq!(transport.hardware().tx, vec![0x90, 0x3C, 0x7F]);
    }
}
