//! UDP transport server
//!
//! Receives datagrams on the configured port and hands them to the controller
//! through a [`DatagramQueue`]. Replies queued by the controller are sent back
//! to whichever host talked to the board last.

use crate::BoardError;
use crate::config::MAX_DATAGRAM;
use crate::transport::DatagramQueue;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpEndpoint, Stack};
use embassy_time::{Duration, with_timeout};
use esp_println::println;

/// How long a receive may block before pending replies are flushed
const REPLY_POLL_INTERVAL: Duration = Duration::from_millis(10);

const SOCKET_BUFFER: usize = 4096;
const SOCKET_PACKETS: usize = 8;

/// UDP server feeding the network transport
pub struct UdpServer<'a> {
    stack: Stack<'a>,
    port: u16,
    queue: &'a DatagramQueue,
    peer: Option<IpEndpoint>,
    received: u32,
    dropped: u32,
}

impl<'a> UdpServer<'a> {
    pub fn new(stack: Stack<'a>, port: u16, queue: &'a DatagramQueue) -> Self {
        Self {
            stack,
            port,
            queue,
            peer: None,
            received: 0,
            dropped: 0,
        }
    }

    /// Get the bound port
    pub fn get_port(&self) -> u16 {
        self.port
    }

    /// Wait for an address, bind and serve forever
    pub async fn run(&mut self) -> Result<(), BoardError> {
        self.stack.wait_config_up().await;
        if let Some(config) = self.stack.config_v4() {
            println!(
                "[UDP] Listening on {}:{}",
                config.address.address(),
                self.port
            );
        }

        let mut rx_buffer = [0; SOCKET_BUFFER];
        let mut tx_buffer = [0; SOCKET_BUFFER];
        let mut rx_meta = [PacketMetadata::EMPTY; SOCKET_PACKETS];
        let mut tx_meta = [PacketMetadata::EMPTY; SOCKET_PACKETS];
        let mut socket = UdpSocket::new(
            self.stack,
            &mut rx_meta,
            &mut rx_buffer,
            &mut tx_meta,
            &mut tx_buffer,
        );

        socket.bind(self.port).map_err(|e| {
            println!("[UDP] Failed to bind to port {}: {:?}", self.port, e);
            BoardError::UdpError
        })?;

        self.packet_loop(&mut socket).await
    }

    async fn packet_loop(&mut self, socket: &mut UdpSocket<'_>) -> Result<(), BoardError> {
        let mut buffer = [0u8; MAX_DATAGRAM];

        loop {
            self.flush_replies(socket).await;

            match with_timeout(REPLY_POLL_INTERVAL, socket.recv_from(&mut buffer)).await {
                Ok(Ok((len, meta))) => {
                    if self.peer != Some(meta.endpoint) {
                        println!("[UDP] Host is now {:?}", meta.endpoint);
                        self.peer = Some(meta.endpoint);
                    }
                    self.received = self.received.wrapping_add(1);
                    if !self.queue.deliver(&buffer[..len]) {
                        self.dropped = self.dropped.wrapping_add(1);
                        if self.dropped % 100 == 1 {
                            println!(
                                "[UDP] Controller busy, {} of {} datagrams evicted unread",
                                self.dropped, self.received
                            );
                        }
                    }
                }
                Ok(Err(e)) => {
                    // Truncated datagrams land here; keep listening
                    println!("[UDP] Error receiving packet: {:?}", e);
                }
                Err(_) => {}
            }
        }
    }

    async fn flush_replies(&mut self, socket: &mut UdpSocket<'_>) {
        while let Some(reply) = self.queue.take_reply() {
            let Some(peer) = self.peer else {
                // Nobody to answer yet, e.g. the boot announcement
                continue;
            };
            if let Err(e) = socket.send_to(&reply, peer).await {
                println!("[UDP] Failed to send reply to {:?}: {:?}", peer, e);
            }
        }
    }
}
