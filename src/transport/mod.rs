//! Byte-stream transport abstraction and the carrier adapters implementing it.
//!
//! The codec drives a [`Transport`]; each carrier adapter maps that byte
//! interface onto its packet format and talks to the host through a
//! carrier-specific hardware trait.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Result;
use crate::message::MessageType;

pub mod ble;
pub mod serial;
pub mod usb;

/// Outbound byte sink, the interface a thru destination must provide.
pub trait ThruSink {
    /// Announces the message type about to be emitted. Packet-oriented
    /// carriers use this to choose a framing header.
    fn begin_transmission(&mut self, kind: MessageType) -> Result<()>;

    fn write(&mut self, byte: u8) -> Result<()>;

    /// Flushes any buffered packet.
    fn end_transmission(&mut self) -> Result<()>;
}

/// Full bidirectional byte-stream interface over one carrier.
pub trait Transport: ThruSink {
    fn init(&mut self) -> Result<()>;

    fn deinit(&mut self) -> Result<()>;

    /// Pulls the next decoded byte from the carrier, `None` when no data is
    /// available.
    fn read(&mut self) -> Option<u8>;
}

// A shared adapter can serve as one codec's transport and another codec's
// thru sink at the same time. Single-threaded: borrows are sequential.
impl<T: ThruSink + ?Sized> ThruSink for Rc<RefCell<T>> {
    fn begin_transmission(&mut self, kind: MessageType) -> Result<()> {
        self.borrow_mut().begin_transmission(kind)
    }

    fn write(&mut self, byte: u8) -> Result<()> {
        self.borrow_mut().write(byte)
    }

    fn end_transmission(&mut self) -> Result<()> {
        self.borrow_mut().end_transmission()
    }
}

impl<T: Transport + ?Sized> Transport for Rc<RefCell<T>> {
    fn init(&mut self) -> Result<()> {
        self.borrow_mut().init()
    }

    fn deinit(&mut self) -> Result<()> {
        self.borrow_mut().deinit()
    }

    fn read(&mut self) -> Option<u8> {
        self.borrow_mut().read()
    }
}
