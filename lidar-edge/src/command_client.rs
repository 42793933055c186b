//! Sensor command channel: an optional TCP client that sends SOPAS ASCII
//! commands to the sensor's command port and reads back its response.
//! Used to point the sensor at this service's UDP ingest port and start
//! scan output; never required for the ingest/evaluate/publish pipeline
//! to run, since the simulator (or a pre-configured sensor) can push
//! scans without it.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{info, warn};

const STX: [u8; 4] = [0x02, 0x02, 0x02, 0x02];
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
const RESPONSE_BUFFER: usize = 4096;

/// A connected command-channel session. Dropping it does not close the
/// socket explicitly; the underlying `TcpStream` closes it on drop.
pub struct CommandClient {
    sensor_ip: String,
    port: u16,
    stream: Option<TcpStream>,
}

impl CommandClient {
    pub fn new(sensor_ip: impl Into<String>, port: u16) -> Self {
        CommandClient { sensor_ip: sensor_ip.into(), port, stream: None }
    }

    pub async fn connect(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.sensor_ip, self.port);
        let stream = TcpStream::connect(&addr)
            .await
            .with_context(|| format!("connecting to sensor command port {addr}"))?;
        info!("command_client: connected to sensor at {addr}");
        self.stream = Some(stream);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.stream = None;
    }

    /// Frames `command` as a SOPAS telegram (STX + BE length + payload +
    /// XOR checksum), sends it, and returns the raw response bytes.
    async fn send_command(&mut self, command: &str) -> Result<Vec<u8>> {
        let stream = self.stream.as_mut().context("command_client: not connected")?;

        let payload = command.as_bytes();
        let length = payload.len() as u32;
        let checksum = payload.iter().fold(0u8, |acc, &b| acc ^ b);

        let mut telegram = Vec::with_capacity(8 + payload.len() + 1);
        telegram.extend_from_slice(&STX);
        telegram.extend_from_slice(&length.to_be_bytes());
        telegram.extend_from_slice(payload);
        telegram.push(checksum);

        stream.write_all(&telegram).await.context("sending command telegram")?;

        let mut buf = vec![0u8; RESPONSE_BUFFER];
        let n = timeout(RESPONSE_TIMEOUT, stream.read(&mut buf))
            .await
            .context("command response timed out")?
            .context("reading command response")?;
        if n == 0 {
            bail!("command_client: sensor closed connection");
        }
        buf.truncate(n);
        Ok(buf)
    }

    /// Points the sensor at `output_ip:output_port` for scan data, then
    /// starts continuous measurement output.
    pub async fn start_scan_output(&mut self, output_ip: &str, output_port: u16) -> Result<()> {
        self.send_command(&format!("sWN ScanDataDestination {output_ip} {output_port}"))
            .await
            .context("configuring scan data destination")?;
        self.send_command("sMN LMCstartmeas").await.context("starting scan output")?;
        Ok(())
    }

    pub async fn stop_scan_output(&mut self) -> Result<()> {
        self.send_command("sMN LMCstopmeas").await.context("stopping scan output")?;
        Ok(())
    }

    /// Sets scan frequency in Hz (12.5, 25, or 50 on the MRS1000).
    pub async fn set_scan_frequency(&mut self, frequency_hz: f32) -> Result<()> {
        let freq_val = (frequency_hz * 100.0) as i32;
        self.send_command(&format!("sWN ScanFrequency {freq_val}"))
            .await
            .context("setting scan frequency")?;
        Ok(())
    }

    /// Reads device identification strings; logs and returns what it
    /// could get instead of failing outright if one query fails.
    pub async fn device_info(&mut self) -> DeviceInfo {
        let device_ident = match self.send_command("sRN DeviceIdent").await {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                warn!("command_client: failed to read device ident: {e}");
                None
            }
        };
        let firmware = match self.send_command("sRN FirmwareVersion").await {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                warn!("command_client: failed to read firmware version: {e}");
                None
            }
        };
        DeviceInfo { device_ident, firmware }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub device_ident: Option<String>,
    pub firmware: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telegram_framing_matches_checksum_rule() {
        let payload = b"sMN LMCstartmeas";
        let checksum = payload.iter().fold(0u8, |acc, &b| acc ^ b);

        let mut telegram = Vec::new();
        telegram.extend_from_slice(&STX);
        telegram.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        telegram.extend_from_slice(payload);
        telegram.push(checksum);

        assert_eq!(&telegram[0..4], &STX);
        assert_eq!(&telegram[8..8 + payload.len()], payload);
        assert_eq!(*telegram.last().unwrap(), checksum);
    }

    #[tokio::test]
    async fn send_command_without_connecting_errors() {
        let mut client = CommandClient::new("127.0.0.1", 2111);
        let result = client.send_command("sMN LMCstartmeas").await;
        assert!(result.is_err());
    }
}
