use crate::BoardError;
use crate::config::MAX_LEDS;
use alloc::vec::Vec;
use esp_hal::gpio::Level;
use esp_hal::rmt::{PulseCode, TxChannel};
use smart_leds::{RGB8, SmartLedsWrite};

/// Latch time after the last bit, in 100 ns RMT ticks
const RESET_TICKS: u16 = 800;

/// GRB strip driven straight from an RMT transmit channel
///
/// The channel must be clocked at 10 MHz so one tick is 100 ns.
pub struct RmtStrip<TX>
where
    TX: TxChannel,
{
    channel: Option<TX>,
    pulses: Vec<u32>,
}

impl<TX> RmtStrip<TX>
where
    TX: TxChannel,
{
    pub fn new(channel: TX) -> Self {
        Self {
            channel: Some(channel),
            pulses: Vec::with_capacity(MAX_LEDS * 24 + 1),
        }
    }
}

impl<TX> SmartLedsWrite for RmtStrip<TX>
where
    TX: TxChannel,
{
    type Error = BoardError;
    type Color = RGB8;

    fn write<T, I>(&mut self, iterator: T) -> Result<(), Self::Error>
    where
        T: IntoIterator<Item = I>,
        I: Into<Self::Color>,
    {
        self.pulses.clear();
        for color in iterator {
            let color: RGB8 = color.into();
            for byte in [color.g, color.r, color.b] {
                self.pulses.extend_from_slice(&byte_to_pulses(byte));
            }
        }
        self.pulses
            .push(PulseCode::new(Level::Low, RESET_TICKS, Level::Low, 0));

        // A failed transmit consumes the channel; every later write reports it
        let channel = self.channel.take().ok_or(BoardError::LedError)?;
        let transaction = channel
            .transmit(&self.pulses)
            .map_err(|_| BoardError::LedError)?;
        match transaction.wait() {
            Ok(channel) => {
                self.channel = Some(channel);
                Ok(())
            }
            Err((_, channel)) => {
                self.channel = Some(channel);
                Err(BoardError::LedError)
            }
        }
    }
}

/// One pulse per bit, MSB first
///
/// 1-bit: 600 ns high, 600 ns low. 0-bit: 300 ns high, 900 ns low.
fn byte_to_pulses(byte: u8) -> [u32; 8] {
    let mut pulses = [0u32; 8];
    for (i, pulse) in pulses.iter_mut().enumerate() {
        *pulse = if byte & (0x80 >> i) != 0 {
            PulseCode::new(Level::High, 6, Level::Low, 6)
        } else {
            PulseCode::new(Level::High, 3, Level::Low, 9)
        };
    }
    pulses
}
