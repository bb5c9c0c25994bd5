//! Wired stream transports
//!
//! The USB serial/JTAG port carries the serial transport; a Bluetooth SPP
//! module attached to UART1 carries the bluetooth transport. Both are read
//! without blocking.

use crate::BoardError;
use crate::transport::{TransportId, TransportLink, write_bounded};
use esp_hal::Blocking;
use esp_hal::uart::Uart;
use esp_hal::usb_serial_jtag::UsbSerialJtag;

/// FIFO polls per byte before a reply is abandoned, about a millisecond
const TX_SPIN_LIMIT: u32 = 20_000;

/// Serial transport over the on-chip USB serial/JTAG controller
pub struct UsbSerialLink<'d> {
    port: UsbSerialJtag<'d, Blocking>,
    /// The last reply found no reader; later replies get a single try
    host_absent: bool,
}

impl<'d> UsbSerialLink<'d> {
    pub fn new(port: UsbSerialJtag<'d, Blocking>) -> Self {
        Self {
            port,
            host_absent: false,
        }
    }
}

impl TransportLink for UsbSerialLink<'_> {
    fn id(&self) -> TransportId {
        TransportId::Serial
    }

    fn poll(&mut self, buf: &mut [u8]) -> usize {
        let mut len = 0;
        while len < buf.len() {
            match self.port.read_byte() {
                Ok(byte) => {
                    buf[len] = byte;
                    len += 1;
                }
                Err(_) => break,
            }
        }
        len
    }

    fn send(&mut self, data: &[u8]) -> Result<(), BoardError> {
        let spin_limit = if self.host_absent { 1 } else { TX_SPIN_LIMIT };
        let port = &mut self.port;
        let result = write_bounded(data, spin_limit, |byte| port.write_byte_nb(byte).is_ok());
        let _ = self.port.flush_tx_nb();

        if result.is_err() && !self.host_absent {
            log!("[SERIAL] Host is not reading, dropping replies");
        }
        self.host_absent = result.is_err();
        result
    }
}

/// Bluetooth transport: a transparent serial module on a UART
pub struct UartLink<'d> {
    uart: Uart<'d, Blocking>,
}

impl<'d> UartLink<'d> {
    pub fn new(uart: Uart<'d, Blocking>) -> Self {
        Self { uart }
    }
}

impl TransportLink for UartLink<'_> {
    fn id(&self) -> TransportId {
        TransportId::Bluetooth
    }

    fn poll(&mut self, buf: &mut [u8]) -> usize {
        self.uart.read_buffered(buf).unwrap_or(0)
    }

    fn send(&mut self, data: &[u8]) -> Result<(), BoardError> {
        let mut rest = data;
        while !rest.is_empty() {
            let written = self.uart.write(rest).map_err(|_| BoardError::SystemError)?;
            rest = &rest[written..];
        }
        Ok(())
    }
}
