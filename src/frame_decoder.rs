//! Per-transport frame decoder
//!
//! Recovers checksum-verified color frames and `{...}` command documents from
//! an untrusted byte stream. The decoder only consumes what it is given,
//! never waits for more, and resets itself when a link stalls mid-message.
//!
//! Binary frame layout:
//!
//! ```text
//! 0xAD 0xDA | R G B ... (led_count * 3 bytes) | XOR of payload
//! ```

use crate::config::{COMMAND_CLOSE, COMMAND_OPEN, MAGIC1, MAGIC2, MAX_LEDS};
use crate::transport::{TransportId, TransportProfile};
use alloc::vec::Vec;
use embassy_time::Instant;
use smart_leds::RGB8;

/// A validated color update for the whole strip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorFrame {
    /// Transport the frame arrived on
    pub source: TransportId,
    /// When the frame passed validation
    pub received_at: Instant,
    /// Colors in strip order
    pub pixels: Vec<RGB8>,
}

impl ColorFrame {
    fn from_payload(source: TransportId, received_at: Instant, payload: &[u8]) -> Self {
        let pixels = payload
            .chunks_exact(3)
            .map(|rgb| RGB8::new(rgb[0], rgb[1], rgb[2]))
            .collect();
        Self {
            source,
            received_at,
            pixels,
        }
    }
}

/// Output of the decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    Frame(ColorFrame),
    /// Raw command document, braces included
    Command(Vec<u8>),
}

/// Decoder state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Idle,
    GotMagic1,
    ReadingPayload,
    VerifyingChecksum,
    AccumulatingCommand,
    /// Rest of an oversized command, dropped until its braces balance
    SkippingCommand,
}

/// Counters for everything the decoder threw away
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Frames that passed validation
    pub frames: u32,
    pub checksum_failures: u32,
    /// MAGIC1 not followed by MAGIC2
    pub false_starts: u32,
    /// Command documents larger than the transport's capacity
    pub overflows: u32,
    /// Partial messages abandoned after the inactivity window
    pub timeouts: u32,
    /// Raw datagrams shorter than one full frame
    pub short_datagrams: u32,
}

impl DecoderStats {
    /// Color updates the host sent that never reached the strip
    pub fn dropped_frames(&self) -> u32 {
        self.checksum_failures
            .saturating_add(self.short_datagrams)
            .saturating_add(self.timeouts)
    }
}

/// XOR-fold of all payload bytes
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0, |acc, byte| acc ^ byte)
}

/// Build a complete wire frame for `payload`
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.push(MAGIC1);
    frame.push(MAGIC2);
    frame.extend_from_slice(payload);
    frame.push(checksum(payload));
    frame
}

/// Byte-level state machine for one transport
pub struct FrameDecoder {
    source: TransportId,
    profile: TransportProfile,
    state: DecoderState,
    payload: Vec<u8>,
    /// Captured when MAGIC2 arrives, fixed for the rest of the frame
    payload_len: usize,
    command: Vec<u8>,
    depth: usize,
    in_string: bool,
    escaped: bool,
    last_byte: Option<Instant>,
    stats: DecoderStats,
}

impl FrameDecoder {
    pub fn new(source: TransportId) -> Self {
        Self {
            source,
            profile: source.profile(),
            state: DecoderState::Idle,
            payload: Vec::new(),
            payload_len: 0,
            command: Vec::new(),
            depth: 0,
            in_string: false,
            escaped: false,
            last_byte: None,
            stats: DecoderStats::default(),
        }
    }

    pub fn source(&self) -> TransportId {
        self.source
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Drop any partial frame or command and return to `Idle`
    pub fn reset(&mut self) {
        self.state = DecoderState::Idle;
        self.payload.clear();
        self.payload_len = 0;
        self.command.clear();
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
    }

    /// Abandon a partial message if the link went quiet for too long.
    /// Returns true if something was discarded.
    pub fn expire(&mut self, now: Instant) -> bool {
        let window = match self.state {
            DecoderState::Idle => return false,
            DecoderState::AccumulatingCommand | DecoderState::SkippingCommand => {
                self.profile.command_timeout
            }
            _ => self.profile.frame_timeout,
        };
        let Some(last) = self.last_byte else {
            return false;
        };
        if now.saturating_duration_since(last) > window {
            log!(
                "[FRAME] {} stalled in {:?}, discarding partial data",
                self.source.name(),
                self.state
            );
            self.stats.timeouts += 1;
            self.reset();
            return true;
        }
        false
    }

    /// Consume stream bytes. Completed frames and commands are appended to
    /// `events` in arrival order.
    pub fn feed(
        &mut self,
        bytes: &[u8],
        now: Instant,
        led_count: usize,
        events: &mut Vec<DecodeEvent>,
    ) {
        if bytes.is_empty() {
            return;
        }
        self.expire(now);
        for &byte in bytes {
            self.push_byte(byte, now, led_count, events);
        }
        self.last_byte = Some(now);
    }

    /// Consume one whole datagram. Datagram transports carry raw RGB payloads
    /// without magic or checksum, or a single command document.
    pub fn feed_datagram(
        &mut self,
        datagram: &[u8],
        now: Instant,
        led_count: usize,
        events: &mut Vec<DecodeEvent>,
    ) {
        self.last_byte = Some(now);

        if let Some(document) = command_datagram(datagram) {
            if document.len() > self.profile.command_capacity {
                self.stats.overflows += 1;
                return;
            }
            events.push(DecodeEvent::Command(document.to_vec()));
            return;
        }

        let needed = led_count.min(MAX_LEDS) * 3;
        if datagram.len() < needed || needed == 0 {
            self.stats.short_datagrams += 1;
            return;
        }
        self.stats.frames += 1;
        events.push(DecodeEvent::Frame(ColorFrame::from_payload(
            self.source,
            now,
            &datagram[..needed],
        )));
    }

    fn push_byte(
        &mut self,
        byte: u8,
        now: Instant,
        led_count: usize,
        events: &mut Vec<DecodeEvent>,
    ) {
        match self.state {
            DecoderState::Idle => {
                if byte == MAGIC1 {
                    self.state = DecoderState::GotMagic1;
                } else if byte == COMMAND_OPEN {
                    self.command.clear();
                    self.command.push(byte);
                    self.depth = 1;
                    self.in_string = false;
                    self.escaped = false;
                    self.state = DecoderState::AccumulatingCommand;
                }
                // anything else is line noise
            }
            DecoderState::GotMagic1 => {
                if byte == MAGIC2 {
                    self.payload_len = led_count.min(MAX_LEDS) * 3;
                    self.payload.clear();
                    self.payload.reserve(self.payload_len);
                    self.state = if self.payload_len == 0 {
                        DecoderState::VerifyingChecksum
                    } else {
                        DecoderState::ReadingPayload
                    };
                } else {
                    // The byte is not rescanned as a new MAGIC1
                    self.stats.false_starts += 1;
                    self.state = DecoderState::Idle;
                }
            }
            DecoderState::ReadingPayload => {
                self.payload.push(byte);
                if self.payload.len() == self.payload_len {
                    self.state = DecoderState::VerifyingChecksum;
                }
            }
            DecoderState::VerifyingChecksum => {
                if checksum(&self.payload) == byte {
                    self.stats.frames += 1;
                    events.push(DecodeEvent::Frame(ColorFrame::from_payload(
                        self.source,
                        now,
                        &self.payload,
                    )));
                } else {
                    self.stats.checksum_failures += 1;
                }
                self.reset();
            }
            DecoderState::AccumulatingCommand => self.accumulate(byte, events),
            DecoderState::SkippingCommand => {
                if self.closes_document(byte) {
                    self.reset();
                }
            }
        }
    }

    fn accumulate(&mut self, byte: u8, events: &mut Vec<DecodeEvent>) {
        if self.command.len() >= self.profile.command_capacity {
            log!(
                "[FRAME] {} command exceeds {} bytes, skipping it",
                self.source.name(),
                self.profile.command_capacity
            );
            self.stats.overflows += 1;
            self.command.clear();
            self.state = DecoderState::SkippingCommand;
            if self.closes_document(byte) {
                self.reset();
            }
            return;
        }
        self.command.push(byte);

        if self.closes_document(byte) {
            let document = core::mem::take(&mut self.command);
            events.push(DecodeEvent::Command(document));
            self.reset();
        }
    }

    /// Follow string and brace nesting; true when `byte` closes the
    /// outermost object
    fn closes_document(&mut self, byte: u8) -> bool {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = false;
            }
            return false;
        }

        match byte {
            b'"' => self.in_string = true,
            COMMAND_OPEN => self.depth += 1,
            COMMAND_CLOSE => {
                self.depth = self.depth.saturating_sub(1);
                return self.depth == 0;
            }
            _ => {}
        }
        false
    }
}

/// A datagram is a command when it is a brace-delimited UTF-8 document,
/// ignoring surrounding whitespace.
fn command_datagram(datagram: &[u8]) -> Option<&[u8]> {
    let trimmed = datagram.trim_ascii();
    if trimmed.first() != Some(&COMMAND_OPEN) || trimmed.last() != Some(&COMMAND_CLOSE) {
        return None;
    }
    core::str::from_utf8(trimmed).ok()?;
    Some(trimmed)
}
