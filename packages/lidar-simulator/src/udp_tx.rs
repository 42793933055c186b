//! UDP transmitter for encoded scan telegrams.
//!
//! Unicasts each telegram to the configured target (the `lidar-edge`
//! ingest socket). Send errors are logged, never panicked on — a
//! dropped scan here is no worse than one the ingest queue would have
//! dropped under backpressure anyway.

use std::net::UdpSocket;

use tracing::{debug, warn};

pub struct UdpTransmitter {
    socket: UdpSocket,
    target: String,
}

impl UdpTransmitter {
    pub fn new(target: &str) -> Result<Self, std::io::Error> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(false)?;
        Ok(Self { socket, target: target.to_string() })
    }

    pub fn send(&self, telegram: &[u8]) {
        match self.socket.send_to(telegram, &self.target) {
            Ok(n) => debug!("udp_tx: sent {n} bytes to {}", self.target),
            Err(e) => warn!("udp_tx: send to {} failed: {e}", self.target),
        }
    }
}
