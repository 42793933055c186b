//! Synthetic scan scene: a fixed room model (two walls, a box obstacle,
//! a swaying person, a drifting object) plus Gaussian range noise and
//! occasional spurious close readings. Loosely modeled on a hardware
//! vendor's own test-data generator; tuned for variety, not metrology.

use rand::Rng;
use rand_distr::{Distribution, Normal};

use lidar_types::{LAYER_COUNT, LAYER_VERTICAL_ANGLES_DEG};

pub const START_ANGLE_DEG: f32 = -137.5;
pub const END_ANGLE_DEG: f32 = 137.5;
pub const ANGULAR_STEP_DEG: f32 = 0.25;
pub const MAX_RANGE_M: f32 = 64.0;

pub struct SimPoint {
    pub distance_m: f32,
    pub angle_h_deg: f32,
    pub angle_v_deg: f32,
    pub rssi: u8,
    pub layer: u8,
}

pub struct SimScan {
    pub scan_number: u16,
    pub timestamp_us: u32,
    pub points: Vec<SimPoint>,
}

/// Generates one scan per call, advancing an internal scan counter the
/// swaying-obstacle phases are derived from.
pub struct Scene {
    scan_count: u32,
    time_us: u32,
    noise: Normal<f32>,
}

impl Scene {
    pub fn new() -> Self {
        Scene { scan_count: 0, time_us: 0, noise: Normal::new(0.0, 0.02).unwrap() }
    }

    pub fn generate_scan(&mut self, rng: &mut impl Rng) -> SimScan {
        let mut points = Vec::new();

        for layer in 0..LAYER_COUNT as u8 {
            let vertical_angle = LAYER_VERTICAL_ANGLES_DEG[layer as usize];

            let mut angle = START_ANGLE_DEG;
            while angle <= END_ANGLE_DEG {
                let mut distance = self.obstacle_distance(angle, rng);
                if distance < MAX_RANGE_M {
                    distance += self.noise.sample(rng);
                    distance = distance.clamp(0.1, MAX_RANGE_M);
                }

                let rssi = if distance < MAX_RANGE_M {
                    let base = 200.0 - (distance / MAX_RANGE_M) * 150.0;
                    (base + rng.gen_range(-10.0..=10.0)).clamp(0.0, 255.0) as u8
                } else {
                    0
                };

                points.push(SimPoint {
                    distance_m: distance,
                    angle_h_deg: angle,
                    angle_v_deg: vertical_angle,
                    rssi,
                    layer,
                });

                angle += ANGULAR_STEP_DEG;
            }
        }

        let scan = SimScan { scan_number: self.scan_count as u16, timestamp_us: self.time_us, points };
        self.scan_count = self.scan_count.wrapping_add(1);
        self.time_us = self.time_us.wrapping_add(80_000); // 80ms per scan at 12.5Hz
        scan
    }

    fn obstacle_distance(&self, angle: f32, rng: &mut impl Rng) -> f32 {
        let mut distance = MAX_RANGE_M;

        if (-120.0..=-60.0).contains(&angle) {
            let wall = 5.0 / (angle + 90.0).to_radians().cos().abs();
            distance = distance.min(wall);
        }
        if (60.0..=120.0).contains(&angle) {
            let wall = 5.0 / (angle - 90.0).to_radians().cos().abs();
            distance = distance.min(wall);
        }
        if (-30.0..=30.0).contains(&angle) {
            let box_dist = 3.0 + 0.5 * (angle * 6.0).to_radians().sin();
            distance = distance.min(box_dist);
        }

        let person_angle = -45.0 + 5.0 * (self.scan_count as f32 * 0.1).sin();
        if (angle - person_angle).abs() < 5.0 {
            let person_dist = 2.0 + (1.0 - (angle - person_angle).abs() / 5.0) * 0.3;
            distance = distance.min(person_dist);
        }

        let object_angle = 45.0 + 10.0 * (self.scan_count as f32 * 0.15).sin();
        if (angle - object_angle).abs() < 8.0 {
            let object_dist = 4.0 + (1.0 - (angle - object_angle).abs() / 8.0) * 0.5;
            distance = distance.min(object_dist);
        }

        if rng.gen_bool(0.005) {
            distance = distance.min(rng.gen_range(0.5..=3.0));
        }

        distance
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn generates_all_layers_and_full_sweep() {
        let mut scene = Scene::new();
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let scan = scene.generate_scan(&mut rng);

        let points_per_layer =
            ((END_ANGLE_DEG - START_ANGLE_DEG) / ANGULAR_STEP_DEG) as usize + 1;
        assert_eq!(scan.points.len(), points_per_layer * LAYER_COUNT);
        assert!(scan.points.iter().all(|p| p.distance_m >= 0.1 && p.distance_m <= MAX_RANGE_M));
    }

    #[test]
    fn scan_counter_and_timestamp_advance() {
        let mut scene = Scene::new();
        let mut rng = rand::rngs::StdRng::seed_from_u64(2);
        let first = scene.generate_scan(&mut rng);
        let second = scene.generate_scan(&mut rng);
        assert_eq!(first.scan_number, 0);
        assert_eq!(second.scan_number, 1);
        assert_eq!(second.timestamp_us - first.timestamp_us, 80_000);
    }
}
