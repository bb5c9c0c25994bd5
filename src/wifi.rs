//! WiFi module for ESP32-C3 board
//!
//! Joins the configured network with esp-wifi and reports the DHCP address
//! embassy-net obtained. The network transport stays silent while the link
//! is down; the wired transports are unaffected.

use crate::{BoardError, config};
use embassy_net::Stack;
use embassy_time::{Duration, Timer, with_timeout};
use esp_println::println;
use esp_wifi::wifi::{AuthMethod, ClientConfiguration, Configuration, WifiController};

/// WiFi manager for station mode with DHCP
pub struct WiFiManager<'a> {
    controller: WifiController<'a>,
    stack: Stack<'a>,
    is_connected: bool,
}

impl<'a> WiFiManager<'a> {
    pub fn new(controller: WifiController<'a>, stack: Stack<'a>) -> Self {
        Self {
            controller,
            stack,
            is_connected: false,
        }
    }

    /// Connect to the network, giving up after `WIFI_CONNECT_TIMEOUT_MS`
    pub async fn connect(&mut self, ssid: &str, password: &str) -> Result<(), BoardError> {
        println!("[WIFI] Connecting to WiFi network: {}", ssid);

        let client_config = ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| BoardError::WiFiError)?,
            password: password.try_into().map_err(|_| BoardError::WiFiError)?,
            auth_method: AuthMethod::WPA2Personal,
            ..Default::default()
        };

        self.controller
            .set_configuration(&Configuration::Client(client_config))
            .map_err(|_| BoardError::WiFiError)?;

        if !self.controller.is_started().unwrap_or(false) {
            self.controller
                .start_async()
                .await
                .map_err(|_| BoardError::WiFiError)?;
        }

        let timeout = Duration::from_millis(config::WIFI_CONNECT_TIMEOUT_MS as u64);
        match with_timeout(timeout, self.controller.connect_async()).await {
            Ok(Ok(())) => {
                self.is_connected = true;
                println!("[WIFI] Successfully connected to WiFi network");
                Ok(())
            }
            Ok(Err(e)) => {
                println!("[WIFI] Failed to connect: {:?}", e);
                Err(BoardError::WiFiError)
            }
            Err(_) => {
                println!("[WIFI] No connection after {} ms", config::WIFI_CONNECT_TIMEOUT_MS);
                Err(BoardError::WiFiError)
            }
        }
    }

    /// Current DHCP address, if one was assigned
    pub fn get_ip_address(&self) -> Option<[u8; 4]> {
        if !self.is_connected {
            return None;
        }
        self.stack
            .config_v4()
            .map(|config| config.address.address().octets())
    }

    /// Check if WiFi is connected
    pub fn is_connected(&self) -> bool {
        self.is_connected && self.controller.is_connected().unwrap_or(false)
    }

    /// Refresh the connection flag; returns true when the link just dropped
    pub fn monitor_connection(&mut self) -> bool {
        let current_status = self.controller.is_connected().unwrap_or(false);

        if self.is_connected && !current_status {
            println!("[WIFI] WiFi connection lost!");
            self.is_connected = false;
            return true;
        }
        false
    }

    /// Keep the station connected forever
    pub async fn maintain(&mut self) -> ! {
        let retry = Duration::from_millis(config::WIFI_RECONNECT_INTERVAL_MS as u64);
        loop {
            if !self.is_connected() {
                if self
                    .connect(config::WIFI_SSID, config::WIFI_PASSWORD)
                    .await
                    .is_err()
                {
                    Timer::after(retry).await;
                    continue;
                }
                self.stack.wait_config_up().await;
                if let Some(ip) = self.get_ip_address() {
                    println!(
                        "[DHCP] IP address obtained: {}.{}.{}.{}",
                        ip[0], ip[1], ip[2], ip[3]
                    );
                }
            }

            Timer::after(retry).await;
            self.monitor_connection();
        }
    }
}
