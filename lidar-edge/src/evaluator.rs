//! Zone-based measurement evaluation: owns the product catalog and the
//! active-product selector, maps each scan to per-zone and aggregate
//! verdicts, and persists the catalog on every catalog mutation
//! (`add_product`, `remove_product`, `set_active_product`,
//! `reset_statistics`). `evaluate` itself never persists — it runs at scan
//! rate and only updates in-memory verdict/statistics state.
//!
//! Logically single-writer: a mutex guards catalog, active-product id, and
//! statistics. `evaluate` releases the mutex before invoking subscriber
//! callbacks, so a callback can re-enter the evaluator without deadlocking.

use std::sync::Mutex;

use lidar_types::{
    CatalogDocument, MeasurementZone, ProductConfig, Scan, Statistics, Verdict, ZoneStatistic,
};
use tracing::{debug, warn};

use crate::persistence;

type ResultCallback = Box<dyn Fn(&ProductConfig, &Scan) + Send + Sync>;

struct Inner {
    products: Vec<ProductConfig>,
    active_product_id: Option<u32>,
    statistics: Statistics,
}

/// Evaluates scans against a configurable, product-specific measurement
/// program and republishes verdicts to subscribers.
pub struct Evaluator {
    config_path: std::path::PathBuf,
    state: Mutex<Inner>,
    callbacks: Mutex<Vec<ResultCallback>>,
}

impl Evaluator {
    /// Loads the catalog from `config_path` if present; seeds an example
    /// product if the document is absent or empty.
    pub fn load(config_path: impl Into<std::path::PathBuf>) -> Self {
        let config_path = config_path.into();
        let doc = persistence::load_catalog(&config_path);

        let (products, active_product_id) = if doc.products.is_empty() {
            let example = ProductConfig::example();
            let id = example.id;
            (vec![example], Some(id))
        } else {
            (doc.products, doc.active_product_id)
        };

        Evaluator {
            config_path,
            state: Mutex::new(Inner {
                products,
                active_product_id,
                statistics: Statistics::default(),
            }),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Registers a verdict consumer. Invoked synchronously after each
    /// successful `evaluate`, outside the internal lock, with the scan
    /// that produced the verdict.
    pub fn subscribe(&self, callback: impl Fn(&ProductConfig, &Scan) + Send + Sync + 'static) {
        self.callbacks.lock().expect("evaluator lock poisoned").push(Box::new(callback));
    }

    pub fn add_product(&self, product: ProductConfig) {
        {
            let mut state = self.state.lock().expect("evaluator lock poisoned");
            if let Some(existing) = state.products.iter_mut().find(|p| p.id == product.id) {
                *existing = product;
            } else {
                if state.active_product_id.is_none() {
                    state.active_product_id = Some(product.id);
                }
                state.products.push(product);
            }
        }
        self.persist();
    }

    pub fn remove_product(&self, product_id: u32) -> bool {
        let removed = {
            let mut state = self.state.lock().expect("evaluator lock poisoned");
            let before = state.products.len();
            state.products.retain(|p| p.id != product_id);
            let removed = state.products.len() != before;
            if removed && state.active_product_id == Some(product_id) {
                state.active_product_id = state.products.first().map(|p| p.id);
            }
            removed
        };
        if removed {
            self.persist();
        }
        removed
    }

    pub fn get_product(&self, product_id: u32) -> Option<ProductConfig> {
        self.state
            .lock()
            .expect("evaluator lock poisoned")
            .products
            .iter()
            .find(|p| p.id == product_id)
            .cloned()
    }

    pub fn list_products(&self) -> Vec<ProductConfig> {
        self.state.lock().expect("evaluator lock poisoned").products.clone()
    }

    pub fn set_active_product(&self, product_id: u32) -> bool {
        let found = {
            let mut state = self.state.lock().expect("evaluator lock poisoned");
            if state.products.iter().any(|p| p.id == product_id) {
                state.active_product_id = Some(product_id);
                true
            } else {
                false
            }
        };
        if found {
            self.persist();
        }
        found
    }

    pub fn statistics(&self) -> Statistics {
        self.state.lock().expect("evaluator lock poisoned").statistics
    }

    pub fn reset_statistics(&self) {
        self.state.lock().expect("evaluator lock poisoned").statistics.reset();
        self.persist();
    }

    /// Evaluates a scan against the active product. Returns `None` if there
    /// is no active product or it is disabled. Never returns an error: a
    /// scan that cannot be meaningfully evaluated simply produces no
    /// callback and no statistics change (per the evaluator's documented
    /// failure semantics).
    pub fn evaluate(&self, scan: &Scan) -> Option<ProductConfig> {
        let updated = {
            let mut state = self.state.lock().expect("evaluator lock poisoned");
            let active_id = state.active_product_id?;
            let idx = state.products.iter().position(|p| p.id == active_id)?;
            if !state.products[idx].enabled {
                return None;
            }

            let mut all_good = true;
            for zone in state.products[idx].zones.iter_mut() {
                if !zone.enabled {
                    continue;
                }
                let verdict = evaluate_zone(zone, scan);
                if verdict != Verdict::Good {
                    all_good = false;
                }
            }

            let aggregate = if all_good { Verdict::Good } else { Verdict::Bad };
            state.products[idx].last_verdict = aggregate;
            state.products[idx].last_update_us = scan.timestamp_us;
            state.statistics.record(aggregate);

            state.products[idx].clone()
        };

        let callbacks = self.callbacks.lock().expect("evaluator lock poisoned");
        for callback in callbacks.iter() {
            callback(&updated, scan);
        }

        Some(updated)
    }

    fn persist(&self) {
        let state = self.state.lock().expect("evaluator lock poisoned");
        let doc = CatalogDocument {
            active_product_id: state.active_product_id,
            products: state.products.clone(),
        };
        drop(state);
        if let Err(e) = persistence::save_catalog(&self.config_path, &doc) {
            warn!("evaluator: failed to persist catalog: {e}");
        }
    }
}

/// Evaluates one zone against a scan, writing the zone's result cache and
/// returning its verdict.
fn evaluate_zone(zone: &mut MeasurementZone, scan: &Scan) -> Verdict {
    let mut distances: Vec<f32> = scan
        .points
        .iter()
        .filter(|p| zone.layers.contains(&p.layer))
        .filter(|p| zone.in_angle(p.angle_h_deg))
        .filter(|p| zone.in_valid_distance(p.distance_m))
        .map(|p| p.distance_m)
        .collect();

    zone.last_point_count = distances.len();
    zone.last_update_us = scan.timestamp_us;

    if distances.len() < zone.min_points {
        zone.last_measurement_m = 0.0;
        zone.last_verdict = Verdict::NoTarget;
        return Verdict::NoTarget;
    }

    if zone.reject_outliers && distances.len() > 3 {
        distances = reject_outliers(&distances, zone.outlier_std_factor);
        if distances.len() < zone.min_points {
            zone.last_measurement_m = 0.0;
            zone.last_verdict = Verdict::NoTarget;
            return Verdict::NoTarget;
        }
    }

    let measurement = match zone.statistic {
        ZoneStatistic::Median => median(&mut distances),
        ZoneStatistic::Mean => mean(&distances),
    };

    let verdict = zone.verdict_for(measurement);
    zone.last_measurement_m = measurement;
    zone.last_verdict = verdict;
    debug!(
        zone = zone.id,
        measurement, ?verdict, points = distances.len(), "zone evaluated"
    );
    verdict
}

fn mean(distances: &[f32]) -> f32 {
    distances.iter().sum::<f32>() / distances.len() as f32
}

fn median(distances: &mut [f32]) -> f32 {
    distances.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = distances.len();
    if n % 2 == 0 {
        (distances[n / 2 - 1] + distances[n / 2]) / 2.0
    } else {
        distances[n / 2]
    }
}

/// Population standard deviation outlier rejection; skipped if std is
/// negligible (< 1mm) since that indicates essentially no variation.
fn reject_outliers(distances: &[f32], std_factor: f32) -> Vec<f32> {
    if distances.len() < 3 {
        return distances.to_vec();
    }
    let mean_val = mean(distances);
    let variance = distances.iter().map(|d| (d - mean_val).powi(2)).sum::<f32>()
        / distances.len() as f32;
    let std = variance.sqrt();

    if std < 0.001 {
        return distances.to_vec();
    }

    let threshold = std_factor * std;
    distances
        .iter()
        .copied()
        .filter(|d| (d - mean_val).abs() <= threshold)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lidar_types::{AngularGrid, ScanPoint};

    fn scan_with_distances(angle_center: f32, distances: &[f32]) -> Scan {
        let points = distances
            .iter()
            .map(|&d| ScanPoint {
                distance_m: d,
                angle_h_deg: angle_center,
                angle_v_deg: 0.0,
                rssi: 100,
                layer: 0,
            })
            .collect();
        Scan {
            timestamp_us: 1,
            scan_number: 1,
            telegram_count: 1,
            device_status: 0,
            frequency_hz: 12.5,
            grid: AngularGrid { start_angle_deg: 0.0, angular_step_deg: 0.25, point_count: distances.len() as u16 },
            points,
        }
    }

    fn test_zone() -> MeasurementZone {
        MeasurementZone {
            id: 1,
            name: "Test".to_string(),
            enabled: true,
            start_angle_deg: -5.0,
            end_angle_deg: 5.0,
            layers: vec![0, 1, 2, 3],
            expected_distance_m: 1.0,
            tol_plus_m: 0.05,
            tol_minus_m: 0.05,
            min_valid_m: 0.1,
            max_valid_m: 10.0,
            min_points: 1,
            statistic: ZoneStatistic::Mean,
            reject_outliers: false,
            outlier_std_factor: 2.0,
            last_measurement_m: 0.0,
            last_verdict: Verdict::Unknown,
            last_update_us: 0,
            last_point_count: 0,
        }
    }

    #[test]
    fn s2_boundary_good() {
        let mut zone = test_zone();
        let scan = scan_with_distances(0.0, &[1.050]);
        let verdict = evaluate_zone(&mut zone, &scan);
        assert_eq!(verdict, Verdict::Good);
        assert_eq!(zone.last_measurement_m, 1.050);
    }

    #[test]
    fn s3_no_target_on_empty_zone() {
        let mut zone = test_zone();
        zone.min_points = 1;
        let scan = scan_with_distances(0.0, &[]);
        let verdict = evaluate_zone(&mut zone, &scan);
        assert_eq!(verdict, Verdict::NoTarget);
    }

    #[test]
    fn s4_median_of_four() {
        let mut zone = test_zone();
        zone.statistic = ZoneStatistic::Median;
        zone.min_points = 1;
        let scan = scan_with_distances(0.0, &[1.0, 1.1, 1.2, 1.3]);
        evaluate_zone(&mut zone, &scan);
        assert!((zone.last_measurement_m - 1.15).abs() < 1e-5);
    }

    #[test]
    fn s5_outlier_rejection() {
        let mut zone = test_zone();
        zone.reject_outliers = true;
        zone.outlier_std_factor = 2.0;
        zone.min_points = 1;
        let scan = scan_with_distances(0.0, &[1.00, 1.01, 1.02, 5.00]);
        evaluate_zone(&mut zone, &scan);
        assert!((zone.last_measurement_m - 1.01).abs() < 0.01);
    }

    #[test]
    fn evaluate_counts_good_and_bad() {
        let evaluator = Evaluator::load(std::env::temp_dir().join("lidar_test_catalog_1.json"));
        let scan = scan_with_distances(0.0, &[2.0, 2.0, 2.0, 2.0, 2.0]);
        let result = evaluator.evaluate(&scan);
        assert!(result.is_some());
        let stats = evaluator.statistics();
        assert_eq!(stats.good_count + stats.bad_count, stats.evaluation_count);
    }
}
