//! USB-MIDI 1.0 carrier: 4-byte event packets.
//!
//! Each packet is `[header, data1, data2, data3]`, where the header's high
//! nibble is the virtual cable index and its low nibble the code index
//! number (CIN) selecting the event class. SysEx frames are chunked three
//! payload bytes per packet with dedicated start/continue and end CINs.

use ringbuf::{traits::*, StaticRb};

use crate::error::{Error, Result};
use crate::message::MessageType;
use crate::transport::{ThruSink, Transport};

// Code index numbers from the USB MIDI 1.0 class specification, table 4-1.
const CIN_SYS_COMMON_2BYTE: u8 = 0x2;
const CIN_SYS_COMMON_3BYTE: u8 = 0x3;
const CIN_SYSEX_START: u8 = 0x4;
/// Doubles as "SysEx ends with one byte".
const CIN_SYS_COMMON_1BYTE: u8 = 0x5;
const CIN_SYSEX_END_2BYTE: u8 = 0x6;
const CIN_SYSEX_END_3BYTE: u8 = 0x7;
const CIN_SINGLE_BYTE: u8 = 0xF;

/// One USB-MIDI event packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsbPacket {
    pub data: [u8; 4],
}

impl UsbPacket {
    pub const EVENT: usize = 0;
    pub const DATA1: usize = 1;
    pub const DATA2: usize = 2;
    pub const DATA3: usize = 3;

    pub fn new(data: [u8; 4]) -> Self {
        Self { data }
    }

    /// Virtual cable index from the packet header.
    #[inline]
    pub fn cable(&self) -> u8 {
        self.data[Self::EVENT] >> 4
    }

    /// Code index number from the packet header.
    #[inline]
    pub fn cin(&self) -> u8 {
        self.data[Self::EVENT] & 0x0F
    }
}

/// Contract the host implements for a USB-MIDI endpoint pair.
pub trait UsbHardware {
    fn init(&mut self) -> Result<()>;
    fn deinit(&mut self) -> Result<()>;
    fn write(&mut self, packet: &UsbPacket) -> Result<()>;
    fn read(&mut self) -> Option<UsbPacket>;
}

pub struct UsbTransport<H> {
    hwa: H,
    cable: u8,
    tx_packet: UsbPacket,
    tx_index: usize,
    active_type: MessageType,
    rx: StaticRb<u8, 4>,
}

impl<H: UsbHardware> UsbTransport<H> {
    /// Adapter on virtual cable 0.
    pub fn new(hwa: H) -> Self {
        Self::with_cable(hwa, 0)
    }

    pub fn with_cable(hwa: H, cable: u8) -> Self {
        Self {
            hwa,
            cable: cable & 0x0F,
            tx_packet: UsbPacket::default(),
            tx_index: 0,
            active_type: MessageType::Invalid,
            rx: StaticRb::default(),
        }
    }

    #[inline]
    pub fn hardware(&self) -> &H {
        &self.hwa
    }

    #[inline]
    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hwa
    }

    #[inline]
    fn header(&self, cin: u8) -> u8 {
        (self.cable << 4) | cin
    }

    fn flush(&mut self) -> Result<()> {
        self.hwa.write(&self.tx_packet)
    }
}

/// How many of `data1..data3` carry MIDI payload for a given CIN.
/// `None` for the reserved non-MIDI CINs.
fn payload_len(cin: u8) -> Option<usize> {
    match cin {
        0x5 | 0xF => Some(1),
        0x2 | 0x6 | 0xC | 0xD => Some(2),
        0x3 | 0x4 | 0x7 | 0x8 | 0x9 | 0xA | 0xB | 0xE => Some(3),
        _ => None,
    }
}

impl<H: UsbHardware> ThruSink for UsbTransport<H> {
    fn begin_transmission(&mut self, kind: MessageType) -> Result<()> {
        let cin = match kind {
            kind if kind.is_channel_message() => (kind as u8) >> 4,
            MessageType::SysEx => CIN_SYSEX_START,
            kind if kind.is_system_real_time() => CIN_SINGLE_BYTE,
            MessageType::TuneRequest => CIN_SYS_COMMON_1BYTE,
            MessageType::TimeCodeQuarterFrame | MessageType::SongSelect => CIN_SYS_COMMON_2BYTE,
            MessageType::SongPosition => CIN_SYS_COMMON_3BYTE,
            _ => return Err(Error::InvalidType(kind)),
        };

        self.active_type = kind;
        self.tx_index = 0;
        self.tx_packet = UsbPacket::default();
        self.tx_packet.data[UsbPacket::EVENT] = self.header(cin);

        Ok(())
    }

    fn write(&mut self, byte: u8) -> Result<()> {
        if self.active_type != MessageType::SysEx {
            if self.tx_index >= 3 {
                return Err(Error::BufferOverflow);
            }
            self.tx_packet.data[self.tx_index + 1] = byte;
        } else if byte == 0xF0 {
            self.tx_packet.data[UsbPacket::EVENT] = self.header(CIN_SYSEX_START);
            self.tx_packet.data[UsbPacket::DATA1] = byte;
            self.tx_packet.data[UsbPacket::DATA2] = 0;
            self.tx_packet.data[UsbPacket::DATA3] = 0;
        } else {
            let offset = self.tx_index % 3;

            if byte == 0xF7 {
                // End packet: CIN encodes how many payload bytes it carries.
                self.tx_packet.data[UsbPacket::EVENT] =
                    self.header(CIN_SYS_COMMON_1BYTE + offset as u8);
            }

            match offset {
                0 => {
                    self.tx_packet.data[UsbPacket::DATA1] = byte;
                    self.tx_packet.data[UsbPacket::DATA2] = 0;
                    self.tx_packet.data[UsbPacket::DATA3] = 0;
                }
                1 => {
                    self.tx_packet.data[UsbPacket::DATA2] = byte;
                    self.tx_packet.data[UsbPacket::DATA3] = 0;
                }
                _ => {
                    self.tx_packet.data[UsbPacket::DATA3] = byte;
                    // A full mid-frame packet continues with a fresh start
                    // header; the end packet waits for end_transmission.
                    if byte != 0xF7 {
                        self.flush()?;
                    }
                }
            }
        }

        self.tx_index += 1;
        Ok(())
    }

    fn end_transmission(&mut self) -> Result<()> {
        self.flush()
    }
}

impl<H: UsbHardware> Transport for UsbTransport<H> {
    fn init(&mut self) -> Result<()> {
        self.tx_index = 0;
        self.rx.clear();
        self.hwa.init()
    }

    fn deinit(&mut self) -> Result<()> {
        self.hwa.deinit()
    }

    fn read(&mut self) -> Option<u8> {
        if self.rx.is_empty() {
            let packet = self.hwa.read()?;
            let len = payload_len(packet.cin())?;
            for &byte in &packet.data[1..=len] {
                let _ = self.rx.try_push(byte);
            }
        }

        self.rx.try_pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct MockUsb {
        rx: VecDeque<UsbPacket>,
        tx: Vec<UsbPacket>,
    }

    impl UsbHardware for MockUsb {
        fn init(&mut self) -> Result<()> {
            Ok(())
        }

        fn deinit(&mut self) -> Result<()> {
            Ok(())
        }

        fn write(&mut self, packet: &UsbPacket) -> Result<()> {
            self.tx.push(*packet);
            Ok(())
        }

        fn read(&mut self) -> Option<UsbPacket> {
            self.rx.pop_front()
        }
    }

    #[test]
    fn test_channel_message_packet() {
        let mut transport = UsbTransport::with_cable(MockUsb::default(), 1);

        transport.begin_transmission(MessageType::NoteOn).unwrap();
        transport.write(0x90).unwrap();
        transport.write(0x3C).unwrap();
        transport.write(0x7F).unwrap();
        transport.end_transmission().unwrap();

        assert_eq!(
            transport.hardware().tx,
            vec![UsbPacket::new([0x19, 0x90, 0x3C, 0x7F])]
        );
    }

    #[test]
    fn test_real_time_packet() {
        let mut transport = UsbTransport::new(MockUsb::default());

        transport.begin_transmission(MessageType::Clock).unwrap();
        transport.write(0xF8).unwrap();
        transport.end_transmission().unwrap();

        assert_eq!(
            transport.hardware().tx,
            vec![UsbPacket::new([0x0F, 0xF8, 0x00, 0x00])]
        );
    }

    #[test]
    fn test_sysex_chunking() {
        let mut transport = UsbTransport::new(MockUsb::default());

        transport.begin_transmission(MessageType::SysEx).unwrap();
        for byte in [0xF0, 0x01, 0x02, 0x03, 0x04, 0xF7] {
            transport.write(byte).unwrap();
        }
        transport.end_transmission().unwrap();

        assert_eq!(
            transport.hardware().tx,
            vec![
                UsbPacket::new([0x04, 0xF0, 0x01, 0x02]),
                UsbPacket::new([0x07, 0x03, 0x04, 0xF7]),
            ]
        );
    }

    #[test]
    fn test_sysex_end_with_single_byte() {
        let mut transport = UsbTransport::new(MockUsb::default());

        transport.begin_transmission(MessageType::SysEx).unwrap();
        for byte in [0xF0, 0x01, 0x02, 0xF7] {
            transport.write(byte).unwrap();
        }
        transport.end_transmission().unwrap();

        assert_eq!(
            transport.hardware().tx,
            vec![
                UsbPacket::new([0x04, 0xF0, 0x01, 0x02]),
                UsbPacket::new([0x05, 0xF7, 0x00, 0x00]),
            ]
        );
    }

    #[test]
    fn test_read_unpacks_payload_in_wire_order() {
        let mut transport = UsbTransport::new(MockUsb::default());
        transport
            .hardware_mut()
            .rx
            .push_back(UsbPacket::new([0x18, 0x81, 0x40, 0x00]));

        assert_eq!(transport.read(), Some(0x81));
        assert_eq!(transport.read(), Some(0x40));
        assert_eq!(transport.read(), Some(0x00));
        assert_eq!(transport.read(), None);
    }

    #[test]
    fn test_read_skips_reserved_cins() {
        let mut transport = UsbTransport::new(MockUsb::default());
        transport
            .hardware_mut()
            .rx
            .push_back(UsbPacket::new([0x00, 0x12, 0x34, 0x56]));

        assert_eq!(transport.read(), None);
    }

    #[test]
    fn test_read_two_byte_cin() {
        let mut transport = UsbTransport::new(MockUsb::default());
        transport
            .hardware_mut()
            .rx
            .push_back(UsbPacket::new([0x0C, 0xC1, 0x05, 0x00]));

        assert_eq!(transport.read(), Some(0xC1));
        assert_eq!(transport.read(), Some(0x05));
        assert_eq!(transport.read(), None);
    }
}
