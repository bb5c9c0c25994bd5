//! Transport identities, per-transport profiles and the link abstraction.
//!
//! A link is anything the controller can poll for bytes without blocking and
//! write replies to. Stream links (USB serial, Bluetooth UART) hand out
//! whatever bytes are buffered; datagram links hand out one whole message per
//! poll.

use crate::BoardError;
use crate::config::{MAX_DATAGRAM, MAX_LEDS};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender, TrySendError};
use embassy_time::Duration;
use serde::Serialize;

/// One of the independent channels the host can drive the strip through.
///
/// The declaration order is the registration order: frames arriving in the
/// same tick are applied serial first, then network, then bluetooth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportId {
    Serial,
    Network,
    Bluetooth,
}

/// How a transport delimits messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Magic-prefixed frames and `{...}` commands embedded in a byte stream
    Stream,
    /// One message per datagram, raw RGB payloads without magic or checksum
    Datagram,
}

/// Command capacity of the stream transports. Fits a `save_map` for the
/// longest strip with the host's `{"x": 255, "y": 255}, ` entries.
pub const STREAM_COMMAND_CAPACITY: usize = 32 + MAX_LEDS * 24;

/// Buffer sizes and inactivity windows for one transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportProfile {
    pub framing: Framing,
    /// Largest command document accepted before the buffer is discarded
    pub command_capacity: usize,
    /// Inactivity window while a binary frame is in progress
    pub frame_timeout: Duration,
    /// Inactivity window while a command document is in progress
    pub command_timeout: Duration,
}

impl TransportId {
    /// All transports in registration order
    pub const ALL: [TransportId; 3] = [
        TransportId::Serial,
        TransportId::Network,
        TransportId::Bluetooth,
    ];

    pub const fn index(self) -> usize {
        match self {
            TransportId::Serial => 0,
            TransportId::Network => 1,
            TransportId::Bluetooth => 2,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            TransportId::Serial => "serial",
            TransportId::Network => "network",
            TransportId::Bluetooth => "bluetooth",
        }
    }

    pub const fn profile(self) -> TransportProfile {
        match self {
            TransportId::Serial => TransportProfile {
                framing: Framing::Stream,
                command_capacity: STREAM_COMMAND_CAPACITY,
                frame_timeout: Duration::from_millis(50),
                command_timeout: Duration::from_millis(100),
            },
            TransportId::Network => TransportProfile {
                framing: Framing::Datagram,
                command_capacity: MAX_DATAGRAM,
                // Datagrams are atomic, nothing can stall half-way
                frame_timeout: Duration::from_millis(0),
                command_timeout: Duration::from_millis(0),
            },
            TransportId::Bluetooth => TransportProfile {
                framing: Framing::Stream,
                command_capacity: STREAM_COMMAND_CAPACITY,
                frame_timeout: Duration::from_millis(100),
                command_timeout: Duration::from_millis(100),
            },
        }
    }
}

/// Non-blocking byte source and reply sink for one transport.
pub trait TransportLink {
    /// Which transport this link carries
    fn id(&self) -> TransportId;

    /// Copy currently available input into `buf` and return how many bytes
    /// were written. Returns 0 when nothing is pending; never waits.
    ///
    /// Datagram links return exactly one datagram per call.
    fn poll(&mut self, buf: &mut [u8]) -> usize;

    /// Queue a reply towards the host.
    fn send(&mut self, data: &[u8]) -> Result<(), BoardError>;
}

/// One UDP payload
pub type Datagram = heapless::Vec<u8, MAX_DATAGRAM>;

const INBOUND_DEPTH: usize = 2;
const OUTBOUND_DEPTH: usize = 4;

/// Mailbox between the UDP server task and the controller loop.
///
/// Only the newest frames matter, so the inbound side is shallow: when the
/// controller falls behind, the oldest waiting datagram is evicted to make
/// room for the new one.
pub struct DatagramQueue {
    inbound: Channel<CriticalSectionRawMutex, Datagram, INBOUND_DEPTH>,
    outbound: Channel<CriticalSectionRawMutex, Datagram, OUTBOUND_DEPTH>,
}

impl DatagramQueue {
    pub const fn new() -> Self {
        Self {
            inbound: Channel::new(),
            outbound: Channel::new(),
        }
    }

    /// Link handed to the controller
    pub fn link(&self) -> DatagramLink<'_> {
        DatagramLink {
            inbound: self.inbound.receiver(),
            outbound: self.outbound.sender(),
        }
    }

    /// Network side: hand a received datagram to the controller.
    /// Returns false if it was rejected or an older datagram had to be
    /// evicted for it.
    pub fn deliver(&self, data: &[u8]) -> bool {
        let Ok(datagram) = Datagram::from_slice(data) else {
            log!("[UDP] Dropping oversized datagram ({} bytes)", data.len());
            return false;
        };
        let Err(TrySendError::Full(datagram)) = self.inbound.try_send(datagram) else {
            return true;
        };
        let _ = self.inbound.try_receive();
        let _ = self.inbound.try_send(datagram);
        false
    }

    /// Network side: next reply waiting to be sent, if any
    pub fn take_reply(&self) -> Option<Datagram> {
        self.outbound.try_receive().ok()
    }
}

impl Default for DatagramQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Controller side of a [`DatagramQueue`]
pub struct DatagramLink<'a> {
    inbound: Receiver<'a, CriticalSectionRawMutex, Datagram, INBOUND_DEPTH>,
    outbound: Sender<'a, CriticalSectionRawMutex, Datagram, OUTBOUND_DEPTH>,
}

impl TransportLink for DatagramLink<'_> {
    fn id(&self) -> TransportId {
        TransportId::Network
    }

    fn poll(&mut self, buf: &mut [u8]) -> usize {
        match self.inbound.try_receive() {
            Ok(datagram) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                len
            }
            Err(_) => 0,
        }
    }

    fn send(&mut self, data: &[u8]) -> Result<(), BoardError> {
        let datagram = Datagram::from_slice(data).map_err(|_| BoardError::UdpError)?;
        self.outbound
            .try_send(datagram)
            .map_err(|_| BoardError::UdpError)
    }
}

/// Push `data` one byte at a time through a FIFO that may be full.
///
/// `try_write` returns false while the FIFO has no room. After `spin_limit`
/// refusals in a row the rest of `data` is abandoned, so a host that stopped
/// reading can never stall the caller.
pub fn write_bounded<F>(data: &[u8], spin_limit: u32, mut try_write: F) -> Result<(), BoardError>
where
    F: FnMut(u8) -> bool,
{
    for &byte in data {
        let mut refusals = 0;
        while !try_write(byte) {
            refusals += 1;
            if refusals >= spin_limit {
                return Err(BoardError::SystemError);
            }
        }
    }
    Ok(())
}
