//! EtherNet/IP-style implicit I/O publisher: fixed-layout input/output
//! assemblies exchanged with a PLC, plus the minimal encapsulation
//! commands needed to open a session and identify the device.
//!
//! Two listeners: TCP serves explicit-messaging encapsulation commands
//! (RegisterSession, ListIdentity, ListServices); UDP serves Class 1
//! implicit I/O, keyed by a connection id a PLC obtains out of band.
//! `start` pre-creates one default connection so a PLC can begin
//! exchanging I/O without a working ForwardOpen handshake, which this
//! publisher — like its source — does not implement.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use lidar_types::{ProductConfig, Scan, Statistics, Verdict};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, info, warn};

const VENDOR_ID: u16 = 0xFFFF;
const DEVICE_TYPE: u16 = 0x00;
const PRODUCT_CODE: u16 = 1000;
const REVISION_MAJOR: u8 = 1;
const REVISION_MINOR: u8 = 0;
const SERIAL_NUMBER: u32 = 0x1234_5678;
const PRODUCT_NAME: &str = "MRS1000 LIDAR Sensor";

const CMD_REGISTER_SESSION: u16 = 0x0065;
const CMD_UNREGISTER_SESSION: u16 = 0x0066;
const CMD_LIST_SERVICES: u16 = 0x0004;
const CMD_LIST_IDENTITY: u16 = 0x0063;
const CMD_SEND_RR_DATA: u16 = 0x006F;
const CMD_SEND_UNIT_DATA: u16 = 0x0070;

const DEFAULT_CONNECTION_ID: u32 = 1;
const DEFAULT_RPI_US: u32 = 10_000;

/// Output assembly, PLC to sensor: 32 bytes, little-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputAssembly {
    pub command: u8,
    pub product_id: u8,
    pub zone1_expected_mm: u32,
    pub zone1_tolerance_mm: u32,
    pub zone2_expected_mm: u32,
    pub zone2_tolerance_mm: u32,
}

impl OutputAssembly {
    fn from_bytes(data: &[u8]) -> Self {
        let mut buf = [0u8; 32];
        let n = data.len().min(32);
        buf[..n].copy_from_slice(&data[..n]);
        OutputAssembly {
            command: buf[0],
            product_id: buf[1],
            zone1_expected_mm: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            zone1_tolerance_mm: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            zone2_expected_mm: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            zone2_tolerance_mm: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
        }
    }
}

/// Input assembly, sensor to PLC: 64 bytes, little-endian.
#[derive(Debug, Clone, Copy, Default)]
struct InputAssembly {
    status: u8,
    product_id: u8,
    overall_result: u8,
    zone_count: u8,
    scan_counter: u32,
    good_count: u32,
    bad_count: u32,
    good_rate_pct100: u32,
    zone_measurements_mm: [u32; 4],
    zone_results: [u32; 4],
    timestamp_ms: u32,
    min_distance_mm: u32,
    max_distance_mm: u32,
}

impl InputAssembly {
    fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[0] = self.status;
        out[1] = self.product_id;
        out[2] = self.overall_result;
        out[3] = self.zone_count;
        out[4..8].copy_from_slice(&self.scan_counter.to_le_bytes());
        out[8..12].copy_from_slice(&self.good_count.to_le_bytes());
        out[12..16].copy_from_slice(&self.bad_count.to_le_bytes());
        out[16..20].copy_from_slice(&self.good_rate_pct100.to_le_bytes());
        for i in 0..4 {
            let base = 20 + i * 8;
            out[base..base + 4].copy_from_slice(&self.zone_measurements_mm[i].to_le_bytes());
            out[base + 4..base + 8].copy_from_slice(&self.zone_results[i].to_le_bytes());
        }
        out[52..56].copy_from_slice(&self.timestamp_ms.to_le_bytes());
        out[56..60].copy_from_slice(&self.min_distance_mm.to_le_bytes());
        out[60..64].copy_from_slice(&self.max_distance_mm.to_le_bytes());
        out
    }
}

struct CipConnection {
    connection_id: u32,
    rpi_us: u32,
    addr: Mutex<Option<SocketAddr>>,
    last_update: Mutex<Instant>,
}

/// Shared state behind both the TCP and UDP listeners.
pub struct AssemblyStore {
    input: Mutex<InputAssembly>,
    output: Mutex<OutputAssembly>,
    start_time: Instant,
    sessions: Mutex<HashMap<u32, Instant>>,
    session_counter: AtomicU32,
    connections: Mutex<HashMap<u32, Arc<CipConnection>>>,
}

impl AssemblyStore {
    pub fn new() -> Arc<Self> {
        let store = Arc::new(Self {
            input: Mutex::new(InputAssembly::default()),
            output: Mutex::new(OutputAssembly::default()),
            start_time: Instant::now(),
            sessions: Mutex::new(HashMap::new()),
            session_counter: AtomicU32::new(1),
            connections: Mutex::new(HashMap::new()),
        });
        store.connections.lock().expect("assembly store poisoned").insert(
            DEFAULT_CONNECTION_ID,
            Arc::new(CipConnection {
                connection_id: DEFAULT_CONNECTION_ID,
                rpi_us: DEFAULT_RPI_US,
                addr: Mutex::new(None),
                last_update: Mutex::new(Instant::now()),
            }),
        );
        store
    }

    pub fn update_from_product(&self, product: &ProductConfig, stats: &Statistics, scan: &Scan) {
        let zones = product.published_zones();
        let mut measurements = [0u32; 4];
        let mut results = [0u32; 4];
        for (i, zone) in zones.iter().take(4).enumerate() {
            measurements[i] = (zone.last_measurement_m * 1000.0).max(0.0) as u32;
            results[i] = verdict_code(zone.last_verdict);
        }

        let mut input = self.input.lock().expect("assembly store poisoned");
        input.status = 1;
        input.product_id = product.id as u8;
        input.overall_result = verdict_code(product.last_verdict) as u8;
        input.zone_count = zones.len() as u8;
        input.scan_counter = scan.scan_number as u32;
        input.good_count = stats.good_count as u32;
        input.bad_count = stats.bad_count as u32;
        input.good_rate_pct100 = (stats.good_rate() * 100.0 * 100.0) as u32;
        input.zone_measurements_mm = measurements;
        input.zone_results = results;
        input.timestamp_ms = self.start_time.elapsed().as_millis() as u32;
        input.min_distance_mm = (scan.min_distance_m().unwrap_or(0.0) * 1000.0) as u32;
        input.max_distance_mm = (scan.max_distance_m().unwrap_or(0.0) * 1000.0) as u32;
    }

    fn input_bytes(&self) -> [u8; 64] {
        self.input.lock().expect("assembly store poisoned").to_bytes()
    }
}

fn verdict_code(v: Verdict) -> u32 {
    match v {
        Verdict::Unknown => 0,
        Verdict::Good => 1,
        Verdict::Bad => 2,
        Verdict::NoTarget => 3,
        Verdict::Error => 4,
    }
}

pub struct AssemblyPublisherConfig {
    pub bind_host: String,
    pub tcp_port: u16,
    pub udp_port: u16,
}

/// Output-assembly writes from the PLC arrive here; the caller decides
/// what a nonzero `command`/`product_id` byte should do (e.g. forward
/// to the evaluator's `set_active_product`).
pub type OutputCallback = Box<dyn Fn(OutputAssembly) + Send + Sync>;

pub async fn start(
    config: AssemblyPublisherConfig,
    store: Arc<AssemblyStore>,
    on_output: OutputCallback,
) -> bool {
    let tcp_addr = format!("{}:{}", config.bind_host, config.tcp_port);
    let tcp_listener = match TcpListener::bind(&tcp_addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("assembly publisher: failed to bind TCP {tcp_addr}: {e}, disabling");
            return false;
        }
    };

    let udp_addr = format!("{}:{}", config.bind_host, config.udp_port);
    let udp_socket = match UdpSocket::bind(&udp_addr).await {
        Ok(s) => s,
        Err(e) => {
            warn!("assembly publisher: failed to bind UDP {udp_addr}: {e}, disabling");
            return false;
        }
    };

    info!("assembly publisher listening on tcp {tcp_addr}, udp {udp_addr}");

    let on_output = Arc::new(on_output);

    {
        let store = store.clone();
        tokio::spawn(async move {
            loop {
                match tcp_listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!("assembly publisher: tcp client connected: {peer}");
                        let store = store.clone();
                        tokio::spawn(async move {
                            handle_tcp_client(stream, store).await;
                        });
                    }
                    Err(e) => warn!("assembly publisher: tcp accept error: {e}"),
                }
            }
        });
    }

    {
        let store = store.clone();
        tokio::spawn(async move {
            udp_loop(udp_socket, store, on_output).await;
        });
    }

    true
}

async fn handle_tcp_client(mut stream: TcpStream, store: Arc<AssemblyStore>) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut header = [0u8; 24];
    loop {
        if stream.read_exact(&mut header).await.is_err() {
            break;
        }

        let command = u16::from_le_bytes([header[0], header[1]]);
        let length = u16::from_le_bytes([header[2], header[3]]) as usize;
        let session = u32::from_le_bytes(header[4..8].try_into().unwrap());
        let context: [u8; 8] = header[12..20].try_into().unwrap();

        if length > 0 {
            let mut body = vec![0u8; length];
            if stream.read_exact(&mut body).await.is_err() {
                break;
            }
        }

        let response = process_encapsulation(command, session, context, &store);
        match response {
            Some(bytes) => {
                if stream.write_all(&bytes).await.is_err() {
                    break;
                }
            }
            None if command == CMD_UNREGISTER_SESSION => break,
            None => {}
        }
    }
}

fn process_encapsulation(
    command: u16,
    session: u32,
    context: [u8; 8],
    store: &AssemblyStore,
) -> Option<Vec<u8>> {
    match command {
        CMD_REGISTER_SESSION => {
            let session_id = store.session_counter.fetch_add(1, Ordering::SeqCst);
            store.sessions.lock().expect("assembly store poisoned").insert(session_id, Instant::now());

            let mut out = Vec::with_capacity(28);
            out.extend_from_slice(&CMD_REGISTER_SESSION.to_le_bytes());
            out.extend_from_slice(&4u16.to_le_bytes());
            out.extend_from_slice(&session_id.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&context);
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&1u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            info!("assembly publisher: session registered: {session_id}");
            Some(out)
        }
        CMD_UNREGISTER_SESSION => {
            store.sessions.lock().expect("assembly store poisoned").remove(&session);
            info!("assembly publisher: session unregistered: {session}");
            None
        }
        CMD_LIST_IDENTITY => Some(build_list_identity_response(context)),
        CMD_LIST_SERVICES => Some(build_list_services_response(context)),
        CMD_SEND_RR_DATA | CMD_SEND_UNIT_DATA => None,
        _ => {
            warn!("assembly publisher: unknown EIP command 0x{command:04X}");
            None
        }
    }
}

fn build_list_identity_response(context: [u8; 8]) -> Vec<u8> {
    let mut identity = Vec::new();
    identity.extend_from_slice(&0x0Cu16.to_le_bytes());
    identity.extend_from_slice(&0u16.to_le_bytes());
    identity.extend_from_slice(&1u16.to_le_bytes());
    identity.extend_from_slice(&0u16.to_le_bytes());
    identity.extend_from_slice(&0u16.to_le_bytes());
    identity.extend_from_slice(&0u16.to_le_bytes());
    identity.extend_from_slice(&VENDOR_ID.to_le_bytes());
    identity.extend_from_slice(&DEVICE_TYPE.to_le_bytes());
    identity.extend_from_slice(&PRODUCT_CODE.to_le_bytes());
    identity.extend_from_slice(&(((REVISION_MAJOR as u16) << 8) | REVISION_MINOR as u16).to_le_bytes());
    identity.extend_from_slice(&0u16.to_le_bytes());
    identity.extend_from_slice(&SERIAL_NUMBER.to_le_bytes());
    identity.push(PRODUCT_NAME.len() as u8);
    identity.extend_from_slice(PRODUCT_NAME.as_bytes());
    identity.push(0);

    let length = (identity.len() - 4) as u16;
    identity[2..4].copy_from_slice(&length.to_le_bytes());

    let mut cpf = Vec::new();
    cpf.extend_from_slice(&1u16.to_le_bytes());
    cpf.extend_from_slice(&0u16.to_le_bytes());
    cpf.extend_from_slice(&identity);

    let mut out = Vec::with_capacity(24 + cpf.len());
    out.extend_from_slice(&CMD_LIST_IDENTITY.to_le_bytes());
    out.extend_from_slice(&(cpf.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&context);
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&cpf);
    out
}

fn build_list_services_response(context: [u8; 8]) -> Vec<u8> {
    let mut services = Vec::new();
    services.extend_from_slice(&0x0100u16.to_le_bytes());
    services.extend_from_slice(&20u16.to_le_bytes());
    services.extend_from_slice(&0x0120u16.to_le_bytes());
    services.extend_from_slice(&1u16.to_le_bytes());
    let mut name = [0u8; 16];
    let text = b"Communications";
    name[..text.len()].copy_from_slice(text);
    services.extend_from_slice(&name);

    let mut cpf = Vec::new();
    cpf.extend_from_slice(&1u16.to_le_bytes());
    cpf.extend_from_slice(&services);

    let mut out = Vec::with_capacity(24 + cpf.len());
    out.extend_from_slice(&CMD_LIST_SERVICES.to_le_bytes());
    out.extend_from_slice(&(cpf.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&context);
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&cpf);
    out
}

async fn udp_loop(socket: UdpSocket, store: Arc<AssemblyStore>, on_output: Arc<OutputCallback>) {
    let mut buf = [0u8; 256];
    loop {
        let (n, peer) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                warn!("assembly publisher: udp recv error: {e}");
                continue;
            }
        };

        if let Some(response) = handle_implicit_io(&buf[..n], peer, &store, &on_output) {
            if let Err(e) = socket.send_to(&response, peer).await {
                warn!("assembly publisher: udp send error: {e}");
            }
        }
    }
}

fn handle_implicit_io(
    data: &[u8],
    peer: SocketAddr,
    store: &AssemblyStore,
    on_output: &OutputCallback,
) -> Option<Vec<u8>> {
    if data.len() < 6 {
        return None;
    }
    let seq_count = u16::from_le_bytes([data[0], data[1]]);
    let conn_id = u32::from_le_bytes(data[2..6].try_into().unwrap());

    let conn = store.connections.lock().expect("assembly store poisoned").get(&conn_id).cloned()?;
    *conn.addr.lock().expect("assembly store poisoned") = Some(peer);
    *conn.last_update.lock().expect("assembly store poisoned") = Instant::now();

    if data.len() > 6 {
        let output = OutputAssembly::from_bytes(&data[6..]);
        *store.output.lock().expect("assembly store poisoned") = output;
        on_output(output);
    }

    let input_bytes = store.input_bytes();
    let mut out = Vec::with_capacity(6 + input_bytes.len());
    out.extend_from_slice(&seq_count.to_le_bytes());
    out.extend_from_slice(&conn.connection_id.to_le_bytes());
    out.extend_from_slice(&input_bytes);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lidar_types::{AngularGrid, ProductConfig};

    fn empty_scan() -> Scan {
        Scan {
            timestamp_us: 0,
            scan_number: 7,
            telegram_count: 1,
            device_status: 0,
            frequency_hz: 12.5,
            grid: AngularGrid { start_angle_deg: 0.0, angular_step_deg: 0.25, point_count: 0 },
            points: Vec::new(),
        }
    }

    #[test]
    fn input_assembly_round_trips_scan_counter() {
        let store = AssemblyStore::new();
        let product = ProductConfig::example();
        store.update_from_product(&product, &Statistics::default(), &empty_scan());
        let bytes = store.input_bytes();
        assert_eq!(bytes.len(), 64);
        let scan_counter = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        assert_eq!(scan_counter, 7);
    }

    #[test]
    fn output_assembly_from_bytes_reads_command_and_product() {
        let mut data = vec![0u8; 20];
        data[0] = 2;
        data[1] = 5;
        let output = OutputAssembly::from_bytes(&data);
        assert_eq!(output.command, 2);
        assert_eq!(output.product_id, 5);
    }

    #[test]
    fn default_connection_is_preregistered() {
        let store = AssemblyStore::new();
        assert!(store.connections.lock().unwrap().contains_key(&DEFAULT_CONNECTION_ID));
    }
}
