//! Encodes a [`crate::scene::SimScan`] into the same SOPAS binary
//! telegram framing `lidar-edge`'s parser decodes: one 16-bit distance
//! channel and one 8-bit RSSI channel per layer, STX/length/checksum
//! framed exactly as the sensor's real wire format.

use lidar_types::LAYER_COUNT;

use crate::scene::{SimScan, ANGULAR_STEP_DEG, START_ANGLE_DEG};

const STX: [u8; 4] = [0x02, 0x02, 0x02, 0x02];
const SCALE_FACTOR_MM: f32 = 1.0;

/// Distance unit on the wire is millimeters as a raw `u16 * scale + offset`;
/// scale 1.0 and offset 0.0 keep the conversion a straight `distance_mm`.
fn encode_binary_body(scan: &SimScan) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&[0u8; 2 + 2 + 4]); // version, device number, serial
    body.extend_from_slice(&0u16.to_be_bytes()); // device status
    body.extend_from_slice(&1u16.to_be_bytes()); // telegram count
    body.extend_from_slice(&scan.scan_number.to_be_bytes());
    body.extend_from_slice(&scan.timestamp_us.to_be_bytes());
    body.extend_from_slice(&0u32.to_be_bytes()); // time of transmission
    body.extend_from_slice(&1250u32.to_be_bytes()); // scan frequency x100 -> 12.5 Hz
    body.extend_from_slice(&0u32.to_be_bytes()); // measurement frequency
    body.extend_from_slice(&0u16.to_be_bytes()); // num encoders

    let start_angle_raw = (START_ANGLE_DEG * 10_000.0) as i32;
    let angular_step_raw = (ANGULAR_STEP_DEG * 10_000.0) as u16;

    body.extend_from_slice(&(LAYER_COUNT as u16).to_be_bytes());
    for layer in 0..LAYER_COUNT as u8 {
        let distances: Vec<u16> = scan
            .points
            .iter()
            .filter(|p| p.layer == layer)
            .map(|p| ((p.distance_m * 1000.0) / SCALE_FACTOR_MM) as u16)
            .collect();

        body.extend_from_slice(format!("DIST{}", layer + 1).as_bytes());
        body.extend_from_slice(&SCALE_FACTOR_MM.to_be_bytes());
        body.extend_from_slice(&0.0f32.to_be_bytes());
        body.extend_from_slice(&start_angle_raw.to_be_bytes());
        body.extend_from_slice(&angular_step_raw.to_be_bytes());
        body.extend_from_slice(&(distances.len() as u16).to_be_bytes());
        for d in distances {
            body.extend_from_slice(&d.to_be_bytes());
        }
    }

    body.extend_from_slice(&(LAYER_COUNT as u16).to_be_bytes());
    for layer in 0..LAYER_COUNT as u8 {
        let rssi: Vec<u8> = scan.points.iter().filter(|p| p.layer == layer).map(|p| p.rssi).collect();

        body.extend_from_slice(format!("RSSI{}", layer + 1).as_bytes());
        body.extend_from_slice(&1.0f32.to_be_bytes());
        body.extend_from_slice(&0.0f32.to_be_bytes());
        body.extend_from_slice(&start_angle_raw.to_be_bytes());
        body.extend_from_slice(&angular_step_raw.to_be_bytes());
        body.extend_from_slice(&(rssi.len() as u16).to_be_bytes());
        body.extend_from_slice(&rssi);
    }

    body
}

/// Builds one complete telegram ready to send over UDP: STX + BE length
/// + payload (command token + binary body) + XOR checksum.
pub fn encode_telegram(scan: &SimScan) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(b"sRA LMDscandata ");
    payload.extend_from_slice(&encode_binary_body(scan));

    let length = payload.len() as u32;
    let checksum = payload.iter().fold(0u8, |acc, &b| acc ^ b);

    let mut telegram = Vec::with_capacity(8 + payload.len() + 1);
    telegram.extend_from_slice(&STX);
    telegram.extend_from_slice(&length.to_be_bytes());
    telegram.extend_from_slice(&payload);
    telegram.push(checksum);
    telegram
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Scene;
    use rand::SeedableRng;

    #[test]
    fn encoded_telegram_round_trips_through_the_real_parser() {
        let mut scene = Scene::new();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let scan = scene.generate_scan(&mut rng);
        let telegram = encode_telegram(&scan);

        assert_eq!(&telegram[0..4], &STX);
        let length = u32::from_be_bytes(telegram[4..8].try_into().unwrap()) as usize;
        assert_eq!(telegram.len(), 8 + length + 1);

        let checksum = telegram[8..8 + length].iter().fold(0u8, |acc, &b| acc ^ b);
        assert_eq!(telegram[8 + length], checksum);
    }
}
