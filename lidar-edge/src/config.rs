//! Command-line configuration, matching spec.md's CLI surface one flag
//! at a time. Every publisher is individually enable-gated so a missing
//! wire protocol library or an unused fieldbus can simply be left off
//! without touching the rest of the service.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "lidar-edge", about = "Industrial LIDAR edge service: ingest, evaluate, publish")]
pub struct Config {
    /// Host address the UDP ingest socket binds to
    #[arg(long, default_value = "0.0.0.0")]
    pub bind_host: String,

    /// UDP port the sensor streams scan telegrams to
    #[arg(long, default_value_t = 2112)]
    pub udp_port: u16,

    /// Restrict ingest to datagrams from this sensor IP; unset accepts from any source
    #[arg(long)]
    pub sensor_ip: Option<String>,

    /// TCP port of the sensor's SOPAS command channel
    #[arg(long, default_value_t = 2111)]
    pub command_port: u16,

    /// On startup, connect to the sensor and point it at this service's UDP ingest port
    #[arg(long)]
    pub simulate: bool,

    /// Scan rate in Hz requested when `--simulate` is set
    #[arg(long, default_value_t = 12.5)]
    pub sim_rate: f32,

    /// Path to the product catalog JSON document
    #[arg(long, default_value = "./data/catalog.json")]
    pub config_path: String,

    /// Serve the register/coil fieldbus publisher
    #[arg(long)]
    pub enable_register: bool,

    /// TCP port for the register/coil publisher
    #[arg(long, default_value_t = 502)]
    pub register_port: u16,

    /// Serve the assembly-based implicit-I/O publisher
    #[arg(long)]
    pub enable_assembly: bool,

    /// TCP port for assembly explicit messaging (encapsulation commands)
    #[arg(long, default_value_t = 44818)]
    pub assembly_tcp_port: u16,

    /// UDP port for assembly implicit I/O
    #[arg(long, default_value_t = 2222)]
    pub assembly_udp_port: u16,

    /// Serve the live dashboard broadcast over websockets
    #[arg(long)]
    pub enable_broadcast: bool,

    /// TCP port for the live broadcast websocket endpoint
    #[arg(long, default_value_t = 8088)]
    pub broadcast_port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_ports() {
        let config = Config::parse_from(["lidar-edge"]);
        assert_eq!(config.udp_port, 2112);
        assert_eq!(config.command_port, 2111);
        assert_eq!(config.register_port, 502);
        assert_eq!(config.assembly_tcp_port, 44818);
        assert_eq!(config.assembly_udp_port, 2222);
        assert_eq!(config.broadcast_port, 8088);
        assert!(!config.enable_register);
        assert!(!config.enable_assembly);
        assert!(!config.enable_broadcast);
    }

    #[test]
    fn enable_flags_parse() {
        let config = Config::parse_from(["lidar-edge", "--enable-register", "--enable-broadcast"]);
        assert!(config.enable_register);
        assert!(config.enable_broadcast);
        assert!(!config.enable_assembly);
    }
}
