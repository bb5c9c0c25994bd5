#![cfg_attr(not(test), no_std)]

//! ESP32-C3 Ambient Light Board Library
//!
//! Protocol engine for a LED strip that mirrors colors sent by a host over
//! wired serial, a UDP socket and a Bluetooth serial module. The core is
//! portable; board glue lives behind the `firmware` feature.

extern crate alloc;

// Must stay above the module list so every module can use `log!`.
#[cfg(feature = "log")]
macro_rules! log {
    ($($arg:tt)*) => {
        esp_println::println!($($arg)*)
    };
}

#[cfg(not(feature = "log"))]
macro_rules! log {
    ($($arg:tt)*) => {{
        let _ = format_args!($($arg)*);
    }};
}

pub mod animation;
pub mod arbiter;
pub mod calibration;
pub mod command;
pub mod config_store;
pub mod device;
pub mod frame_decoder;
pub mod led_control;
pub mod state_machine;
pub mod transport;

#[cfg(feature = "firmware")]
pub mod rmt_strip;
#[cfg(feature = "firmware")]
pub mod serial;
#[cfg(feature = "firmware")]
pub mod udp_server;
#[cfg(feature = "firmware")]
pub mod wifi;

pub use command::{Command, LedMapPoint, ParseError};
pub use config_store::{ConfigStore, MemoryConfigStore};
pub use device::{DeviceController, DeviceState, TickReport};
pub use frame_decoder::{ColorFrame, DecodeEvent, FrameDecoder};
pub use transport::{TransportId, TransportLink};

/// Project version information
pub const VERSION: &str = "0.1.0";

/// Default configuration constants
pub mod config {
    use embassy_time::Duration;

    /// UDP port for the network transport
    pub const UDP_PORT: u16 = 23042;

    /// Default LED data GPIO pin
    pub const LED_DATA_PIN: u8 = 4;

    /// Maximum supported LEDs per strip
    pub const MAX_LEDS: usize = 300;

    /// LED count used until the config store says otherwise
    pub const DEFAULT_LED_COUNT: usize = 60;

    /// First frame marker byte
    pub const MAGIC1: u8 = 0xAD;

    /// Second frame marker byte
    pub const MAGIC2: u8 = 0xDA;

    /// Command documents start with this byte
    pub const COMMAND_OPEN: u8 = b'{';

    /// Command documents end when this byte closes the outermost object
    pub const COMMAND_CLOSE: u8 = b'}';

    /// Largest datagram the network transport accepts
    pub const MAX_DATAGRAM: usize = 1472;

    /// Output goes dark when no valid frame arrived for this long
    pub const SIGNAL_TIMEOUT: Duration = Duration::from_millis(3000);

    /// Calibration blink half-period
    pub const BLINK_INTERVAL: Duration = Duration::from_millis(500);

    /// Interval of the cooperative scheduling loop on the board
    pub const TICK_INTERVAL: Duration = Duration::from_millis(2);

    /// Serial baud rate of the Bluetooth module UART
    pub const BLUETOOTH_BAUD: u32 = 115_200;

    /// GPIO pins of the Bluetooth module UART (board RX, board TX)
    pub const BLUETOOTH_RX_PIN: u8 = 6;
    pub const BLUETOOTH_TX_PIN: u8 = 7;

    /// WiFi configuration
    /// Read from environment variables at compile time
    pub const WIFI_SSID: &str = env!("WIFI_SSID");
    pub const WIFI_PASSWORD: &str = env!("WIFI_PASSWORD");

    /// WiFi connection timeout in milliseconds
    pub const WIFI_CONNECT_TIMEOUT_MS: u32 = 10000;

    /// WiFi reconnection interval in milliseconds
    pub const WIFI_RECONNECT_INTERVAL_MS: u32 = 5000;
}

/// Error types for the ambient light board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardError {
    /// WiFi connection error
    WiFiError,
    /// UDP server error
    UdpError,
    /// LED control error
    LedError,
    /// Protocol parsing error
    ProtocolError,
    /// Rejected or unpersistable setting
    ConfigError,
    /// System error
    SystemError,
}

impl core::fmt::Display for BoardError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            BoardError::WiFiError => "wifi error",
            BoardError::UdpError => "udp error",
            BoardError::LedError => "led output error",
            BoardError::ProtocolError => "protocol error",
            BoardError::ConfigError => "configuration error",
            BoardError::SystemError => "system error",
        };
        f.write_str(text)
    }
}
