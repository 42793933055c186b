//! # lidar-types
//!
//! Shared domain types for the lidar edge service.
//!
//! These types are used by:
//! - `lidar-edge`: parsing scans off the wire, evaluating them against a
//!   product catalog, and republishing verdicts on the fieldbus
//! - `lidar-simulator`: generating synthetic scans for development without
//!   physical sensor hardware
//!
//! ## Conventions
//!
//! - Distances are meters unless a field name says otherwise (`_mm`).
//! - Angles are degrees, horizontal angle increasing with scan direction.
//! - Layer indices run `0..LAYER_COUNT`, matching the sensor's fixed vertical
//!   beam spacing (see [`LAYER_VERTICAL_ANGLES_DEG`]).

use serde::{Deserialize, Serialize};

/// Number of vertical scan planes the sensor produces.
pub const LAYER_COUNT: usize = 4;

/// Fixed vertical angle (degrees) of each layer, indexed by layer number.
pub const LAYER_VERTICAL_ANGLES_DEG: [f32; LAYER_COUNT] = [-2.5, -0.833, 0.833, 2.5];

/// At most this many zones are exposed via the fieldbus publishers; extra
/// zones on a product are still evaluated, just not published.
pub const MAX_PUBLISHED_ZONES: usize = 16;

// ── Scan data ──────────────────────────────────────────────────────────────

/// One range sample from a single layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanPoint {
    /// Distance in meters, finite and non-negative.
    pub distance_m: f32,
    /// Horizontal angle in degrees.
    pub angle_h_deg: f32,
    /// Vertical angle in degrees, fixed by layer.
    pub angle_v_deg: f32,
    /// Signal strength, 0-255.
    pub rssi: u8,
    /// Layer index, `0..LAYER_COUNT`.
    pub layer: u8,
}

/// The angular grid shared by every layer of a scan: `angle_h(i) = start_angle_deg + i * angular_step_deg`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngularGrid {
    pub start_angle_deg: f32,
    pub angular_step_deg: f32,
    pub point_count: u16,
}

/// One complete revolution across all layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    /// Device timestamp in microseconds since device start; monotonically
    /// non-decreasing across a session.
    pub timestamp_us: u32,
    /// 16-bit wrapping scan sequence number.
    pub scan_number: u16,
    pub telegram_count: u16,
    pub device_status: u16,
    /// Nominal rotation frequency in Hz.
    pub frequency_hz: f32,
    pub grid: AngularGrid,
    /// Points grouped by layer; within a layer ordered by increasing
    /// horizontal angle.
    pub points: Vec<ScanPoint>,
}

impl Scan {
    /// Points belonging to a single layer, in stored order.
    pub fn layer_points(&self, layer: u8) -> impl Iterator<Item = &ScanPoint> {
        self.points.iter().filter(move |p| p.layer == layer)
    }

    pub fn min_distance_m(&self) -> Option<f32> {
        self.points
            .iter()
            .map(|p| p.distance_m)
            .fold(None, |acc, d| Some(acc.map_or(d, |a: f32| a.min(d))))
    }

    pub fn max_distance_m(&self) -> Option<f32> {
        self.points
            .iter()
            .map(|p| p.distance_m)
            .fold(None, |acc, d| Some(acc.map_or(d, |a: f32| a.max(d))))
    }
}

// ── Verdicts ───────────────────────────────────────────────────────────────

/// Per-zone or aggregate pass/fail tag. NO_TARGET is distinct from BAD: it
/// means insufficient evidence was collected, not that a measurement was out
/// of spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Unknown,
    Good,
    Bad,
    NoTarget,
    Error,
}

impl Default for Verdict {
    fn default() -> Self {
        Verdict::Unknown
    }
}

/// Which aggregate statistic a zone uses to reduce its collected distances
/// to a single measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneStatistic {
    Median,
    Mean,
}

// ── Zones and products ──────────────────────────────────────────────────────

/// An angular wedge of the horizontal field with a distance acceptance rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementZone {
    pub id: u32,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub start_angle_deg: f32,
    pub end_angle_deg: f32,
    pub layers: Vec<u8>,
    pub expected_distance_m: f32,
    pub tol_plus_m: f32,
    pub tol_minus_m: f32,
    pub min_valid_m: f32,
    pub max_valid_m: f32,
    pub min_points: usize,
    pub statistic: ZoneStatistic,
    pub reject_outliers: bool,
    pub outlier_std_factor: f32,

    /// Mutable result cache, updated on every evaluation of this zone.
    #[serde(default)]
    pub last_measurement_m: f32,
    #[serde(default)]
    pub last_verdict: Verdict,
    #[serde(default)]
    pub last_update_us: u32,
    #[serde(default)]
    pub last_point_count: usize,
}

fn default_true() -> bool {
    true
}

impl MeasurementZone {
    pub fn in_angle(&self, angle_h_deg: f32) -> bool {
        self.start_angle_deg <= angle_h_deg && angle_h_deg <= self.end_angle_deg
    }

    pub fn in_valid_distance(&self, distance_m: f32) -> bool {
        self.min_valid_m <= distance_m && distance_m <= self.max_valid_m
    }

    /// GOOD iff `expected - tol_minus <= measurement <= expected + tol_plus`,
    /// inclusive at both bounds.
    pub fn verdict_for(&self, measurement_m: f32) -> Verdict {
        let lo = self.expected_distance_m - self.tol_minus_m;
        let hi = self.expected_distance_m + self.tol_plus_m;
        if lo <= measurement_m && measurement_m <= hi {
            Verdict::Good
        } else {
            Verdict::Bad
        }
    }
}

/// An ordered measurement program: a ranked sequence of zones plus catalog
/// metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductConfig {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub zones: Vec<MeasurementZone>,

    #[serde(default)]
    pub last_verdict: Verdict,
    #[serde(default)]
    pub last_update_us: u32,
}

impl ProductConfig {
    /// Zones actually exposed on the fieldbus publishers (first
    /// [`MAX_PUBLISHED_ZONES`]); extras are still evaluated.
    pub fn published_zones(&self) -> &[MeasurementZone] {
        let n = self.zones.len().min(MAX_PUBLISHED_ZONES);
        &self.zones[..n]
    }

    /// A factory measurement program matching three zones in front, left,
    /// and right of the sensor, used to seed an empty catalog.
    pub fn example() -> Self {
        ProductConfig {
            id: 1,
            name: "Example Product".to_string(),
            description: "Factory default three-zone program".to_string(),
            enabled: true,
            zones: vec![
                MeasurementZone {
                    id: 1,
                    name: "Front Center".to_string(),
                    enabled: true,
                    start_angle_deg: -15.0,
                    end_angle_deg: 15.0,
                    layers: vec![0, 1, 2, 3],
                    expected_distance_m: 2.0,
                    tol_plus_m: 0.1,
                    tol_minus_m: 0.1,
                    min_valid_m: 0.1,
                    max_valid_m: 10.0,
                    min_points: 5,
                    statistic: ZoneStatistic::Median,
                    reject_outliers: true,
                    outlier_std_factor: 2.0,
                    last_measurement_m: 0.0,
                    last_verdict: Verdict::Unknown,
                    last_update_us: 0,
                    last_point_count: 0,
                },
                MeasurementZone {
                    id: 2,
                    name: "Left Side".to_string(),
                    enabled: true,
                    start_angle_deg: -60.0,
                    end_angle_deg: -30.0,
                    layers: vec![0, 1, 2, 3],
                    expected_distance_m: 3.0,
                    tol_plus_m: 0.15,
                    tol_minus_m: 0.15,
                    min_valid_m: 0.1,
                    max_valid_m: 10.0,
                    min_points: 5,
                    statistic: ZoneStatistic::Median,
                    reject_outliers: true,
                    outlier_std_factor: 2.0,
                    last_measurement_m: 0.0,
                    last_verdict: Verdict::Unknown,
                    last_update_us: 0,
                    last_point_count: 0,
                },
                MeasurementZone {
                    id: 3,
                    name: "Right Side".to_string(),
                    enabled: true,
                    start_angle_deg: 30.0,
                    end_angle_deg: 60.0,
                    layers: vec![0, 1, 2, 3],
                    expected_distance_m: 3.0,
                    tol_plus_m: 0.15,
                    tol_minus_m: 0.15,
                    min_valid_m: 0.1,
                    max_valid_m: 10.0,
                    min_points: 5,
                    statistic: ZoneStatistic::Median,
                    reject_outliers: true,
                    outlier_std_factor: 2.0,
                    last_measurement_m: 0.0,
                    last_verdict: Verdict::Unknown,
                    last_update_us: 0,
                    last_point_count: 0,
                },
            ],
            last_verdict: Verdict::Unknown,
            last_update_us: 0,
        }
    }
}

// ── Statistics ───────────────────────────────────────────────────────────────

/// Monotone evaluation counters. NO_TARGET and ERROR do not increment
/// `good_count` or `bad_count`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub evaluation_count: u64,
    pub good_count: u64,
    pub bad_count: u64,
}

impl Statistics {
    pub fn good_rate(&self) -> f64 {
        if self.evaluation_count == 0 {
            0.0
        } else {
            self.good_count as f64 / self.evaluation_count as f64
        }
    }

    pub fn record(&mut self, verdict: Verdict) {
        self.evaluation_count += 1;
        match verdict {
            Verdict::Good => self.good_count += 1,
            Verdict::Bad => self.bad_count += 1,
            Verdict::NoTarget | Verdict::Error | Verdict::Unknown => {}
        }
    }

    pub fn reset(&mut self) {
        *self = Statistics::default();
    }
}

// ── Catalog ──────────────────────────────────────────────────────────────────

/// On-disk catalog document: `{ active_product_id, products: [...] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub active_product_id: Option<u32>,
    pub products: Vec<ProductConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_for_boundary_is_good() {
        let mut zone = ProductConfig::example().zones.remove(0);
        zone.expected_distance_m = 1.0;
        zone.tol_plus_m = 0.05;
        zone.tol_minus_m = 0.05;
        assert_eq!(zone.verdict_for(1.05), Verdict::Good);
        assert_eq!(zone.verdict_for(0.95), Verdict::Good);
        assert_eq!(zone.verdict_for(1.0501), Verdict::Bad);
    }

    #[test]
    fn statistics_good_bad_sum_to_evaluations() {
        let mut stats = Statistics::default();
        stats.record(Verdict::Good);
        stats.record(Verdict::Bad);
        stats.record(Verdict::NoTarget);
        stats.record(Verdict::Error);
        assert_eq!(stats.evaluation_count, 4);
        assert_eq!(stats.good_count + stats.bad_count, 2);
    }

    #[test]
    fn example_product_has_three_zones() {
        let p = ProductConfig::example();
        assert_eq!(p.zones.len(), 3);
        assert_eq!(p.zones[0].expected_distance_m, 2.0);
    }

    #[test]
    fn published_zones_caps_at_max() {
        let mut p = ProductConfig::example();
        for i in 4..20 {
            let mut z = p.zones[0].clone();
            z.id = i;
            p.zones.push(z);
        }
        assert_eq!(p.zones.len(), 19);
        assert_eq!(p.published_zones().len(), MAX_PUBLISHED_ZONES);
    }
}
