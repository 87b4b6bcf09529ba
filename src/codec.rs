//! The MIDI codec: streaming parser, serializer and thru fan-out over one
//! transport.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::error::{Error, Result};
use crate::message::{
    channel_from_status, split_14bit, Message, MessageType, NoteOffMode,
};
use crate::transport::{ThruSink, Transport};

/// Capacity of the thru-sink registry.
pub const MAX_THRU_SINKS: usize = 5;

/// Bidirectional MIDI 1.0 codec bound to one [`Transport`].
///
/// Parses the transport's byte stream into [`Message`]s, handling running
/// status, real-time messages interleaved inside other messages, System
/// Exclusive framing and malformed-input recovery; serializes messages back
/// onto the transport with optional running-status elision.
///
/// `SYSEX_CAPACITY` bounds decoded SysEx frames (boundary bytes included);
/// use [`Midi::with_sysex_capacity`] for a non-default size.
pub struct Midi<T, const SYSEX_CAPACITY: usize = 128> {
    transport: T,
    message: Message<SYSEX_CAPACITY>,
    initialized: bool,
    use_running_status: bool,
    recursive_parse: bool,
    running_status_rx: u8,
    running_status_tx: u8,
    pending: [u8; 3],
    pending_expected: usize,
    pending_index: usize,
    note_off_mode: NoteOffMode,
    thru_sinks: [Option<Weak<RefCell<dyn ThruSink>>>; MAX_THRU_SINKS],
}

impl<T: Transport> Midi<T> {
    /// Codec with the default 128-byte SysEx buffer.
    pub fn new(transport: T) -> Self {
        Self::with_sysex_capacity(transport)
    }
}

impl<T: Transport, const SYSEX_CAPACITY: usize> Midi<T, SYSEX_CAPACITY> {
    /// Codec with an explicit SysEx buffer capacity:
    /// `Midi::<_, 256>::with_sysex_capacity(transport)`.
    pub fn with_sysex_capacity(transport: T) -> Self {
        Self {
            transport,
            message: Message::default(),
            initialized: false,
            use_running_status: false,
            recursive_parse: false,
            running_status_rx: MessageType::Invalid as u8,
            running_status_tx: MessageType::Invalid as u8,
            pending: [0; 3],
            pending_expected: 0,
            pending_index: 0,
            note_off_mode: NoteOffMode::default(),
            thru_sinks: std::array::from_fn(|_| None),
        }
    }

    /// Initializes the underlying transport. Idempotent.
    pub fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        self.reset();
        self.transport.init()?;
        self.initialized = true;
        debug!("midi codec initialized");

        Ok(())
    }

    /// Tears down the underlying transport. Idempotent.
    pub fn deinit(&mut self) -> Result<()> {
        if !self.initialized {
            return Ok(());
        }

        self.reset();
        self.initialized = false;
        self.transport.deinit()
    }

    #[inline]
    pub fn initialized(&self) -> bool {
        self.initialized
    }

    /// Abandons any partially received message.
    ///
    /// Clears the receive-side pending state only; the transmit running
    /// status is left alone so the peer stays in sync.
    pub fn reset(&mut self) {
        self.running_status_rx = MessageType::Invalid as u8;
        self.pending_expected = 0;
        self.pending_index = 0;
    }

    #[inline]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[inline]
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The last decoded message. The SysEx buffer inside is reused by the
    /// parser; treat the view as stale after the next parse call.
    #[inline]
    pub fn message(&self) -> &Message<SYSEX_CAPACITY> {
        &self.message
    }

    /// Most recent channel-message status byte accepted on input, or the
    /// `Invalid` wire value (0) when running status is not active.
    #[inline]
    pub fn running_status_rx(&self) -> u8 {
        self.running_status_rx
    }

    /// Enables or disables running-status elision on transmit.
    pub fn set_running_status(&mut self, enabled: bool) {
        self.use_running_status = enabled;
    }

    #[inline]
    pub fn running_status_enabled(&self) -> bool {
        self.use_running_status
    }

    pub fn set_note_off_mode(&mut self, mode: NoteOffMode) {
        self.note_off_mode = mode;
    }

    #[inline]
    pub fn note_off_mode(&self) -> NoteOffMode {
        self.note_off_mode
    }

    /// When enabled, `parse` drains all currently available input instead of
    /// consuming at most one byte per call. Recommended for packet-oriented
    /// carriers; trades throughput fairness for latency on shared loops.
    pub fn set_recursive_parse(&mut self, enabled: bool) {
        self.recursive_parse = enabled;
    }

    #[inline]
    pub fn recursive_parse_enabled(&self) -> bool {
        self.recursive_parse
    }

    // ------------------------------------------------------------------
    // Receive
    // ------------------------------------------------------------------

    /// Parses incoming bytes and replays any completed message to the
    /// registered thru sinks.
    ///
    /// Returns `Ok(true)` exactly when a complete message is available via
    /// [`Midi::message`].
    pub fn read(&mut self) -> Result<bool> {
        if !self.parse()? {
            return Ok(false);
        }

        self.thru();

        Ok(true)
    }

    /// Pulls bytes from the transport and advances the receive state
    /// machine.
    ///
    /// Returns `Ok(true)` when a complete message was decoded, `Ok(false)`
    /// when no byte was available or the pending message is incomplete, and
    /// an error after a recoverable failure (receive state already reset).
    pub fn parse(&mut self) -> Result<bool> {
        loop {
            let Some(byte) = self.transport.read() else {
                return Ok(false);
            };

            if self.parse_byte(byte)? {
                return Ok(true);
            }

            if !self.recursive_parse {
                return Ok(false);
            }
        }
    }

    fn parse_byte(&mut self, byte: u8) -> Result<bool> {
        if self.pending_index == 0 {
            return self.parse_status(byte);
        }

        if byte >= 0x80 {
            match byte {
                // Real-time messages may interleave anywhere, even inside
                // SysEx; the pending message is left untouched.
                0xF8 | 0xFA | 0xFB | 0xFC | 0xFE | 0xFF => {
                    self.message.msg_type = MessageType::from_status(byte);
                    self.message.channel = 0;
                    self.message.data1 = 0;
                    self.message.data2 = 0;
                    self.message.length = 1;
                    self.message.valid = true;
                    return Ok(true);
                }
                // End of exclusive
                0xF7 => {
                    if self.pending[0] != MessageType::SysEx as u8 {
                        self.reset();
                        debug!("unexpected EOX outside a SysEx frame, discarding");
                        return Err(Error::MalformedStatus(byte));
                    }

                    self.message.sysex[self.pending_index] = 0xF7;
                    self.message.msg_type = MessageType::SysEx;
                    self.message.channel = 0;
                    self.message.data1 = 0;
                    self.message.data2 = 0;
                    self.message.length = self.pending_index + 1;
                    self.message.valid = true;
                    self.reset();
                    return Ok(true);
                }
                // The emitter restarted the frame; collect from scratch.
                0xF0 => {
                    self.pending[0] = MessageType::SysEx as u8;
                    self.pending_expected = SYSEX_CAPACITY;
                    self.pending_index = 1;
                    self.message.sysex[0] = MessageType::SysEx as u8;
                    self.running_status_rx = MessageType::Invalid as u8;
                    return Ok(false);
                }
                // Any other status byte aborts the pending message and
                // starts a fresh one, per the MIDI stream rules.
                _ => {
                    self.pending_expected = 0;
                    self.pending_index = 0;
                    return self.parse_status(byte);
                }
            }
        }

        // Data byte for the pending message
        if self.pending[0] == MessageType::SysEx as u8 {
            self.message.sysex[self.pending_index] = byte;

            if self.pending_index >= SYSEX_CAPACITY - 1 {
                // Last byte that fits and still no EOX
                debug!("SysEx frame exceeds {}-byte buffer, discarding", SYSEX_CAPACITY);
                self.reset();
                return Err(Error::BufferOverflow);
            }

            self.pending_index += 1;
            return Ok(false);
        }

        self.pending[self.pending_index] = byte;

        if self.pending_index >= self.pending_expected - 1 {
            self.complete_pending();
            return Ok(true);
        }

        self.pending_index += 1;
        Ok(false)
    }

    /// Handles a byte arriving with no message in progress.
    fn parse_status(&mut self, byte: u8) -> Result<bool> {
        self.pending[0] = byte;

        // Running-status restoration: a data byte in idle state reuses the
        // previous channel-message status.
        if byte < 0x80
            && MessageType::from_status(self.running_status_rx).is_channel_message()
        {
            self.pending[0] = self.running_status_rx;
            self.pending[1] = byte;
            self.pending_index = 1;
        }

        let pending_type = MessageType::from_status(self.pending[0]);

        match pending_type {
            MessageType::Clock
            | MessageType::Start
            | MessageType::Continue
            | MessageType::Stop
            | MessageType::ActiveSensing
            | MessageType::SystemReset
            | MessageType::TuneRequest => {
                // Complete in one byte; running status stays as it was.
                self.message.msg_type = pending_type;
                self.message.channel = 0;
                self.message.data1 = 0;
                self.message.data2 = 0;
                self.message.length = 1;
                self.message.valid = true;
                self.pending_index = 0;
                self.pending_expected = 0;
                return Ok(true);
            }
            MessageType::ProgramChange
            | MessageType::AfterTouchChannel
            | MessageType::TimeCodeQuarterFrame
            | MessageType::SongSelect => {
                self.pending_expected = 2;
            }
            MessageType::NoteOff
            | MessageType::NoteOn
            | MessageType::ControlChange
            | MessageType::PitchBend
            | MessageType::AfterTouchPoly
            | MessageType::SongPosition => {
                self.pending_expected = 3;
            }
            MessageType::SysEx => {
                // Anything between 3 bytes and the buffer capacity
                self.pending_expected = SYSEX_CAPACITY;
                self.running_status_rx = MessageType::Invalid as u8;
                self.message.sysex[0] = MessageType::SysEx as u8;
            }
            _ => {
                debug!("discarding malformed status byte {:#04x}", byte);
                self.reset();
                return Err(Error::MalformedStatus(byte));
            }
        }

        if self.pending_index >= self.pending_expected - 1 {
            // A two-byte message completed through running status
            self.complete_pending();
            return Ok(true);
        }

        self.pending_index += 1;
        Ok(false)
    }

    /// Finalizes the pending channel/common message into `self.message`.
    fn complete_pending(&mut self) {
        let status = self.pending[0];
        let msg_type = MessageType::from_status(status);

        self.message.msg_type = msg_type;
        self.message.channel = if msg_type.is_channel_message() {
            channel_from_status(status)
        } else {
            0
        };
        self.message.data1 = self.pending[1];
        self.message.data2 = if self.pending_expected == 3 {
            self.pending[2]
        } else {
            0
        };
        self.message.length = self.pending_expected;
        self.message.valid = true;

        // Only channel messages keep running status alive
        self.running_status_rx = if msg_type.is_channel_message() {
            status
        } else {
            MessageType::Invalid as u8
        };

        self.pending_index = 0;
        self.pending_expected = 0;
    }

    // ------------------------------------------------------------------
    // Transmit
    // ------------------------------------------------------------------

    /// Sends a raw channel-voice or real-time message.
    ///
    /// `channel` must be 1-16; data bytes are masked to 7 bits. On
    /// validation failure the transmit running status is cleared so the
    /// next message re-sends its status byte.
    pub fn send(
        &mut self,
        kind: MessageType,
        data1: u8,
        data2: u8,
        channel: u8,
    ) -> Result<()> {
        if !(1..=16).contains(&channel) {
            self.running_status_tx = MessageType::Invalid as u8;
            return Err(Error::InvalidChannel(channel));
        }

        if kind.is_system_real_time() {
            return self.send_real_time(kind);
        }

        if !kind.is_channel_message() {
            self.running_status_tx = MessageType::Invalid as u8;
            return Err(Error::InvalidType(kind));
        }

        let data1 = data1 & 0x7F;
        let data2 = data2 & 0x7F;
        let status = kind.status_byte(channel);

        self.transport.begin_transmission(kind)?;

        if self.use_running_status {
            if self.running_status_tx != status {
                // New status: memorize and send it
                self.running_status_tx = status;
                self.transport.write(status)?;
            }
        } else {
            self.transport.write(status)?;
        }

        self.transport.write(data1)?;

        if kind != MessageType::ProgramChange && kind != MessageType::AfterTouchChannel {
            self.transport.write(data2)?;
        }

        self.transport.end_transmission()
    }

    pub fn send_note_on(&mut self, note: u8, velocity: u8, channel: u8) -> Result<()> {
        self.send(MessageType::NoteOn, note, velocity, channel)
    }

    /// Sends a note release, honoring the configured [`NoteOffMode`].
    pub fn send_note_off(&mut self, note: u8, velocity: u8, channel: u8) -> Result<()> {
        match self.note_off_mode {
            NoteOffMode::NoteOff => self.send(MessageType::NoteOff, note, velocity, channel),
            NoteOffMode::NoteOnZeroVelocity => self.send(MessageType::NoteOn, note, 0, channel),
        }
    }

    pub fn send_program_change(&mut self, program: u8, channel: u8) -> Result<()> {
        self.send(MessageType::ProgramChange, program, 0, channel)
    }

    pub fn send_control_change(&mut self, control: u8, value: u8, channel: u8) -> Result<()> {
        self.send(MessageType::ControlChange, control, value, channel)
    }

    /// Sends a 14-bit control change: CC `control` carries the upper seven
    /// bits, CC `control + 32` the lower.
    pub fn send_control_change_14bit(
        &mut self,
        control: u8,
        value: u16,
        channel: u8,
    ) -> Result<()> {
        let (high, low) = split_14bit(value);
        self.send_control_change(control, high, channel)?;
        self.send_control_change(control + 32, low, channel)
    }

    /// Sends channel (monophonic) aftertouch.
    pub fn send_after_touch(&mut self, pressure: u8, channel: u8) -> Result<()> {
        self.send(MessageType::AfterTouchChannel, pressure, 0, channel)
    }

    /// Sends polyphonic aftertouch for a single note.
    pub fn send_after_touch_poly(&mut self, note: u8, pressure: u8, channel: u8) -> Result<()> {
        self.send(MessageType::AfterTouchPoly, note, pressure, channel)
    }

    pub fn send_pitch_bend(&mut self, value: u16, channel: u8) -> Result<()> {
        let (high, low) = split_14bit(value);
        self.send(MessageType::PitchBend, low, high, channel)
    }

    /// Sends a System Exclusive message.
    ///
    /// With `contains_boundaries` the `0xF0`/`0xF7` bytes must already be in
    /// `data`; otherwise they are written around it.
    pub fn send_sysex(&mut self, data: &[u8], contains_boundaries: bool) -> Result<()> {
        self.transport.begin_transmission(MessageType::SysEx)?;

        if !contains_boundaries {
            self.transport.write(0xF0)?;
        }

        for &byte in data {
            self.transport.write(byte)?;
        }

        if !contains_boundaries {
            self.transport.write(0xF7)?;
        }

        self.transport.end_transmission()?;
        self.running_status_tx = MessageType::Invalid as u8;

        Ok(())
    }

    /// Sends an MTC quarter frame from its type (0-7) and value (0-15)
    /// nibbles.
    pub fn send_time_code_quarter_frame(&mut self, mtc_type: u8, value: u8) -> Result<()> {
        let data = ((mtc_type & 0x07) << 4) | (value & 0x0F);
        self.send_common(MessageType::TimeCodeQuarterFrame, u16::from(data))
    }

    /// Sends a Song Position Pointer, `beats` counted from the song start.
    pub fn send_song_position(&mut self, beats: u16) -> Result<()> {
        self.send_common(MessageType::SongPosition, beats)
    }

    pub fn send_song_select(&mut self, song: u8) -> Result<()> {
        self.send_common(MessageType::SongSelect, u16::from(song))
    }

    pub fn send_tune_request(&mut self) -> Result<()> {
        self.send_common(MessageType::TuneRequest, 0)
    }

    /// Sends a System Common message. Common messages terminate running
    /// status on both ends.
    ///
    /// Song Position uses all 14 bits of `data`, written LSB first; the
    /// other kinds use at most the low 7 bits.
    pub fn send_common(&mut self, kind: MessageType, data: u16) -> Result<()> {
        if !kind.is_system_common() {
            return Err(Error::InvalidType(kind));
        }

        self.transport.begin_transmission(kind)?;
        self.transport.write(kind as u8)?;

        match kind {
            MessageType::TimeCodeQuarterFrame | MessageType::SongSelect => {
                self.transport.write((data as u8) & 0x7F)?;
            }
            MessageType::SongPosition => {
                self.transport.write((data & 0x7F) as u8)?;
                self.transport.write(((data >> 7) & 0x7F) as u8)?;
            }
            _ => {}
        }

        self.transport.end_transmission()?;
        self.running_status_tx = MessageType::Invalid as u8;

        Ok(())
    }

    /// Sends a one-byte System Real Time message. Running status is not
    /// affected.
    pub fn send_real_time(&mut self, kind: MessageType) -> Result<()> {
        if !kind.is_system_real_time() {
            return Err(Error::InvalidType(kind));
        }

        self.transport.begin_transmission(kind)?;
        self.transport.write(kind as u8)?;
        self.transport.end_transmission()
    }

    /// Sends an MMC transport-control command to `device_id` (`0x7F` for
    /// all devices).
    pub fn send_mmc(&mut self, device_id: u8, command: MessageType) -> Result<()> {
        if !matches!(
            command,
            MessageType::MmcPlay
                | MessageType::MmcStop
                | MessageType::MmcPause
                | MessageType::MmcRecordStart
                | MessageType::MmcRecordStop
        ) {
            return Err(Error::InvalidType(command));
        }

        let frame = [0xF0, 0x7F, device_id, 0x06, command as u8, 0xF7];
        self.send_sysex(&frame, true)
    }

    /// Sends a non-registered parameter number: CC 99/98 select the
    /// parameter, CC 6 (and CC 38 when `value_14bit`) carry the value.
    pub fn send_nrpn(
        &mut self,
        parameter: u16,
        value: u16,
        channel: u8,
        value_14bit: bool,
    ) -> Result<()> {
        let (parameter_high, parameter_low) = split_14bit(parameter);

        self.send_control_change(99, parameter_high, channel)?;
        self.send_control_change(98, parameter_low, channel)?;

        if !value_14bit {
            return self.send_control_change(6, value as u8, channel);
        }

        let (value_high, value_low) = split_14bit(value);
        self.send_control_change(6, value_high, channel)?;
        self.send_control_change(38, value_low, channel)
    }

    // ------------------------------------------------------------------
    // Thru
    // ------------------------------------------------------------------

    /// Registers a thru sink in the first free slot. Registering the same
    /// sink twice delivers each message once per slot.
    pub fn register_thru(&mut self, sink: &Rc<RefCell<dyn ThruSink>>) {
        for slot in self.thru_sinks.iter_mut() {
            if slot.is_none() {
                *slot = Some(Rc::downgrade(sink));
                return;
            }
        }
        debug!("thru registry full, sink not registered");
    }

    /// Removes every registration of `sink`.
    pub fn unregister_thru(&mut self, sink: &Rc<RefCell<dyn ThruSink>>) {
        let target = Rc::downgrade(sink);
        for slot in self.thru_sinks.iter_mut() {
            if let Some(registered) = slot {
                if registered.ptr_eq(&target) {
                    *slot = None;
                }
            }
        }
    }

    /// Replays the last parsed message to every live sink.
    fn thru(&mut self) {
        for slot in self.thru_sinks.iter() {
            let Some(weak) = slot else { continue };
            let Some(sink) = weak.upgrade() else { continue };

            let mut sink = sink.borrow_mut();
            if let Err(error) = Self::replay(&mut *sink, &self.message) {
                debug!("thru sink write failed: {}", error);
            }
        }
    }

    /// Canonical serialization of a decoded message onto a sink.
    fn replay(sink: &mut dyn ThruSink, message: &Message<SYSEX_CAPACITY>) -> Result<()> {
        sink.begin_transmission(message.msg_type)?;

        if message.msg_type.is_system_real_time() {
            sink.write(message.msg_type as u8)?;
        } else if message.msg_type.is_channel_message() {
            sink.write(message.msg_type.status_byte(message.channel))?;
            if message.length > 1 {
                sink.write(message.data1)?;
            }
            if message.length > 2 {
                sink.write(message.data2)?;
            }
        } else if message.msg_type == MessageType::SysEx {
            for &byte in &message.sysex[..message.length] {
                sink.write(byte)?;
            }
        } else {
            // System common
            sink.write(message.msg_type as u8)?;
            if message.length > 1 {
                sink.write(message.data1)?;
            }
            if message.length > 2 {
                sink.write(message.data2)?;
            }
        }

        sink.end_transmission()
    }
}
