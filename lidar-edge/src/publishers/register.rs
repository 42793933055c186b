//! Fieldbus register publisher: a Modbus-TCP-style register/coil map served
//! to connection-oriented polling clients.
//!
//! Register map (decimal offsets within the holding-register space):
//! - 0..3: system status, active product id, aggregate verdict, zone count.
//! - 4..9: evaluation/good/bad counts, each `u32` split high/low word.
//! - 100 + 100*z + k: per-zone block (see [`update_from_product`]).
//! - 900: write 1 to reset statistics.
//! - 901: write product id to activate.
//!
//! Coils: 0 system-running, 1 overall GOOD, 2 overall BAD, 10..25 per-zone
//! GOOD, 30..45 per-zone BAD.

use std::sync::{Arc, Mutex};

use lidar_types::{ProductConfig, Statistics, Verdict};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::evaluator::Evaluator;

const STATUS_BASE: usize = 0;
const ZONE_BASE: usize = 100;
const ZONE_SIZE: usize = 100;
const CONTROL_BASE: usize = 900;
const MAX_ZONES: usize = 16;

const COIL_SYSTEM_RUNNING: usize = 0;
const COIL_OVERALL_GOOD: usize = 1;
const COIL_OVERALL_BAD: usize = 2;
const COIL_ZONE_GOOD_BASE: usize = 10;
const COIL_ZONE_BAD_BASE: usize = 30;

const HOLDING_REGISTER_COUNT: usize = 1000;
const COIL_COUNT: usize = 100;

/// Whole-record snapshot of the register/coil space, replaced in full on
/// every verdict update so readers never observe a half-written zone.
pub struct RegisterDataStore {
    holding_registers: Mutex<Vec<u16>>,
    coils: Mutex<Vec<bool>>,
}

impl RegisterDataStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            holding_registers: Mutex::new(vec![0u16; HOLDING_REGISTER_COUNT]),
            coils: Mutex::new(vec![false; COIL_COUNT]),
        })
    }

    pub fn update_from_product(&self, product: &ProductConfig, stats: &Statistics) {
        let mut regs = self.holding_registers.lock().expect("register store poisoned");
        let mut coils = self.coils.lock().expect("register store poisoned");

        regs[STATUS_BASE] = 1;
        regs[STATUS_BASE + 1] = product.id as u16;
        regs[STATUS_BASE + 2] = verdict_code(product.last_verdict);
        regs[STATUS_BASE + 3] = product.zones.len() as u16;

        write_u32(&mut regs, 4, stats.evaluation_count as u32);
        write_u32(&mut regs, 6, stats.good_count as u32);
        write_u32(&mut regs, 8, stats.bad_count as u32);

        coils[COIL_SYSTEM_RUNNING] = true;
        coils[COIL_OVERALL_GOOD] = product.last_verdict == Verdict::Good;
        coils[COIL_OVERALL_BAD] = product.last_verdict == Verdict::Bad;

        for (i, zone) in product.published_zones().iter().enumerate() {
            let base = ZONE_BASE + i * ZONE_SIZE;
            regs[base] = zone.id as u16;
            regs[base + 1] = zone.enabled as u16;
            regs[base + 2] = verdict_code(zone.last_verdict);
            regs[base + 3] = (zone.last_verdict == Verdict::Good) as u16;
            write_f32(&mut regs, base + 4, zone.last_measurement_m);
            write_f32(&mut regs, base + 6, zone.expected_distance_m);
            write_f32(&mut regs, base + 8, zone.tol_plus_m);
            write_f32(&mut regs, base + 10, zone.tol_minus_m);
            write_u32(&mut regs, base + 12, zone.last_point_count as u32);

            coils[COIL_ZONE_GOOD_BASE + i] = zone.last_verdict == Verdict::Good;
            coils[COIL_ZONE_BAD_BASE + i] = zone.last_verdict == Verdict::Bad;
        }

        for i in product.published_zones().len()..MAX_ZONES {
            let base = ZONE_BASE + i * ZONE_SIZE;
            for k in 0..14 {
                regs[base + k] = 0;
            }
            coils[COIL_ZONE_GOOD_BASE + i] = false;
            coils[COIL_ZONE_BAD_BASE + i] = false;
        }
    }

    fn get_holding_registers(&self, address: usize, count: usize) -> Vec<u16> {
        let regs = self.holding_registers.lock().expect("register store poisoned");
        let end = (address + count).min(regs.len());
        if address >= regs.len() {
            return Vec::new();
        }
        regs[address..end].to_vec()
    }

    fn get_coils(&self, address: usize, count: usize) -> Vec<bool> {
        let coils = self.coils.lock().expect("register store poisoned");
        let end = (address + count).min(coils.len());
        if address >= coils.len() {
            return Vec::new();
        }
        coils[address..end].to_vec()
    }

    fn set_holding_register(&self, address: usize, value: u16) {
        let mut regs = self.holding_registers.lock().expect("register store poisoned");
        if address < regs.len() {
            regs[address] = value;
        }
    }

    fn set_coil(&self, address: usize, value: bool) {
        let mut coils = self.coils.lock().expect("register store poisoned");
        if address < coils.len() {
            coils[address] = value;
        }
    }
}

fn verdict_code(v: Verdict) -> u16 {
    match v {
        Verdict::Unknown => 0,
        Verdict::Good => 1,
        Verdict::Bad => 2,
        Verdict::NoTarget => 3,
        Verdict::Error => 4,
    }
}

fn write_u32(regs: &mut [u16], base: usize, value: u32) {
    regs[base] = (value >> 16) as u16;
    regs[base + 1] = (value & 0xFFFF) as u16;
}

fn write_f32(regs: &mut [u16], base: usize, value: f32) {
    let bytes = value.to_be_bytes();
    regs[base] = u16::from_be_bytes([bytes[0], bytes[1]]);
    regs[base + 1] = u16::from_be_bytes([bytes[2], bytes[3]]);
}

pub struct RegisterPublisherConfig {
    pub bind_host: String,
    pub port: u16,
}

/// Binds the register TCP server and subscribes it to the evaluator.
/// Returns `false` (and logs a warning, per the publisher-setup-failure
/// rule) if the port cannot be bound; the rest of the service proceeds.
pub async fn start(
    config: RegisterPublisherConfig,
    store: Arc<RegisterDataStore>,
    evaluator: Arc<Evaluator>,
) -> bool {
    let addr = format!("{}:{}", config.bind_host, config.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("register publisher: failed to bind {addr}: {e}, disabling");
            return false;
        }
    };
    info!("register publisher listening on {addr}");

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("register publisher: client connected: {peer}");
                    let store = store.clone();
                    let evaluator = evaluator.clone();
                    tokio::spawn(async move {
                        handle_client(stream, store, evaluator).await;
                    });
                }
                Err(e) => {
                    warn!("register publisher: accept error: {e}");
                }
            }
        }
    });

    true
}

async fn handle_client(mut stream: TcpStream, store: Arc<RegisterDataStore>, evaluator: Arc<Evaluator>) {
    let mut header = [0u8; 8];
    loop {
        if stream.read_exact(&mut header).await.is_err() {
            break;
        }

        let transaction_id = u16::from_be_bytes([header[0], header[1]]);
        let protocol_id = u16::from_be_bytes([header[2], header[3]]);
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let unit_id = header[6];
        let function_code = header[7];

        if length < 2 {
            break;
        }
        let mut body = vec![0u8; length - 2];
        if !body.is_empty() && stream.read_exact(&mut body).await.is_err() {
            break;
        }

        let response = process_request(function_code, &body, &store, &evaluator);

        if let Some(response) = response {
            let resp_length = (response.len() + 2) as u16;
            let mut out = Vec::with_capacity(8 + response.len());
            out.extend_from_slice(&transaction_id.to_be_bytes());
            out.extend_from_slice(&protocol_id.to_be_bytes());
            out.extend_from_slice(&resp_length.to_be_bytes());
            out.push(unit_id);
            out.push(function_code);
            out.extend_from_slice(&response);

            if stream.write_all(&out).await.is_err() {
                break;
            }
        }
    }
}

fn process_request(
    function_code: u8,
    data: &[u8],
    store: &RegisterDataStore,
    evaluator: &Evaluator,
) -> Option<Vec<u8>> {
    match function_code {
        0x01 => {
            if data.len() < 4 {
                return None;
            }
            let start = u16::from_be_bytes([data[0], data[1]]) as usize;
            let count = u16::from_be_bytes([data[2], data[3]]) as usize;
            let coils = store.get_coils(start, count);
            let byte_count = (count + 7) / 8;
            let mut result = vec![0u8; byte_count];
            for (i, &coil) in coils.iter().enumerate() {
                if coil {
                    result[i / 8] |= 1 << (i % 8);
                }
            }
            let mut out = vec![byte_count as u8];
            out.extend(result);
            Some(out)
        }
        0x03 => {
            if data.len() < 4 {
                return None;
            }
            let start = u16::from_be_bytes([data[0], data[1]]) as usize;
            let count = u16::from_be_bytes([data[2], data[3]]) as usize;
            let registers = store.get_holding_registers(start, count);
            let mut out = vec![(registers.len() * 2) as u8];
            for reg in registers {
                out.extend_from_slice(&reg.to_be_bytes());
            }
            Some(out)
        }
        0x05 => {
            if data.len() < 4 {
                return None;
            }
            let address = u16::from_be_bytes([data[0], data[1]]) as usize;
            let value = u16::from_be_bytes([data[2], data[3]]) == 0xFF00;
            store.set_coil(address, value);
            Some(data[..4].to_vec())
        }
        0x06 => {
            if data.len() < 4 {
                return None;
            }
            let address = u16::from_be_bytes([data[0], data[1]]) as usize;
            let value = u16::from_be_bytes([data[2], data[3]]);

            if address == CONTROL_BASE {
                if value == 1 {
                    evaluator.reset_statistics();
                }
            } else if address == CONTROL_BASE + 1 {
                evaluator.set_active_product(value as u32);
            }

            store.set_holding_register(address, value);
            Some(data[..4].to_vec())
        }
        0x10 => {
            if data.len() < 5 {
                return None;
            }
            let start = u16::from_be_bytes([data[0], data[1]]) as usize;
            let count = u16::from_be_bytes([data[2], data[3]]) as usize;
            for i in 0..count {
                let offset = 5 + i * 2;
                if offset + 2 <= data.len() {
                    let value = u16::from_be_bytes([data[offset], data[offset + 1]]);
                    store.set_holding_register(start + i, value);
                }
            }
            Some(data[..4].to_vec())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lidar_types::ProductConfig;

    #[test]
    fn s6_register_round_trip() {
        let store = RegisterDataStore::new();
        let mut product = ProductConfig::example();
        product.last_verdict = Verdict::Good;
        let mut stats = Statistics::default();
        stats.good_count = 70_000;
        store.update_from_product(&product, &stats);

        let regs = store.get_holding_registers(6, 2);
        assert_eq!(regs, vec![1, 4464]);
        let value = ((regs[0] as u32) << 16) | regs[1] as u32;
        assert_eq!(value, 70_000);
    }

    #[test]
    fn read_coils_fc01_packs_bits() {
        let store = RegisterDataStore::new();
        let mut product = ProductConfig::example();
        product.last_verdict = Verdict::Good;
        store.update_from_product(&product, &Statistics::default());

        let response = process_request(0x01, &[0, 1, 0, 8], &store, &evaluator_stub()).unwrap();
        assert_eq!(response[0], 1);
        assert_eq!(response[1] & 0b1, 0b1);
    }

    #[test]
    fn write_single_coil_fc05_decodes_ff00() {
        let store = RegisterDataStore::new();
        let data = [0, 5, 0xFF, 0x00];
        let response = process_request(0x05, &data, &store, &evaluator_stub()).unwrap();
        assert_eq!(response, data);
        assert_eq!(store.get_coils(5, 1), vec![true]);
    }

    fn evaluator_stub() -> Evaluator {
        Evaluator::load(std::env::temp_dir().join("lidar_register_test_catalog.json"))
    }
}
