//! UDP ingest pipeline: owns the sensor socket and the [`Framer`], applies
//! an optional source-IP filter, and hands parsed scans to the async side of
//! the service through a bounded, drop-oldest channel.
//!
//! Runs on a dedicated blocking thread (per §5 of the design: the ingest
//! thread is the only suspension point for live data and the only writer to
//! the Framer buffer). A UDP recv error never crashes the thread — it is
//! logged and the loop continues.

use std::collections::VecDeque;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lidar_types::Scan;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::telegram::framer::Framer;
use crate::telegram::parser::{self, ParseError};

/// Scans queued between the ingest thread and the evaluator are bounded;
/// on overflow the oldest queued scan is dropped in favor of the new one.
pub const INGEST_QUEUE_CAPACITY: usize = 100;

/// Bounded scan queue between the blocking ingest thread and the async
/// evaluator loop. Mirrors the Python receiver's
/// `queue.Queue(maxsize=100)` with explicit drop-oldest-on-full eviction,
/// which a plain `tokio::sync::mpsc` channel cannot express since only the
/// receiving side can pop.
pub struct ScanQueue {
    inner: Mutex<VecDeque<Scan>>,
    capacity: usize,
    notify: Notify,
}

impl ScanQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
        })
    }

    /// Pushes a scan, discarding the oldest queued scan first if full.
    pub fn push_drop_oldest(&self, scan: Scan) {
        let mut guard = self.inner.lock().expect("scan queue mutex poisoned");
        if guard.len() >= self.capacity {
            guard.pop_front();
        }
        guard.push_back(scan);
        drop(guard);
        self.notify.notify_one();
    }

    /// Awaits and pops the oldest queued scan.
    pub async fn recv(&self) -> Scan {
        loop {
            if let Some(scan) = self.pop() {
                return scan;
            }
            // Register for notification before re-checking, so a push that
            // races with the check above is never missed.
            let notified = self.notify.notified();
            if let Some(scan) = self.pop() {
                return scan;
            }
            notified.await;
        }
    }

    fn pop(&self) -> Option<Scan> {
        self.inner.lock().expect("scan queue mutex poisoned").pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("scan queue mutex poisoned").len()
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub bind_host: String,
    pub udp_port: u16,
    /// Only accept packets from this source IP, if set.
    pub sensor_ip: Option<String>,
    pub buffer_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            udp_port: 2112,
            sensor_ip: None,
            buffer_size: 65535,
        }
    }
}

/// Running totals, mirroring the Python receiver's `get_stats()`.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub packets_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub scans_parsed: AtomicU64,
    pub parse_errors: AtomicU64,
}

impl IngestStats {
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            scans_parsed: self.scans_parsed.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct IngestStatsSnapshot {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub scans_parsed: u64,
    pub parse_errors: u64,
}

/// Starts the ingest thread. Returns the scan queue and a shared stats
/// handle, or `None` if the socket could not be bound (fatal per §7 — the
/// caller should treat a `None` here as a fatal startup failure).
pub fn start(config: IngestConfig) -> Option<(Arc<ScanQueue>, Arc<IngestStats>)> {
    let addr = format!("{}:{}", config.bind_host, config.udp_port);
    let socket = match UdpSocket::bind(&addr) {
        Ok(s) => {
            info!("📡 ingest listening on UDP {addr}");
            s
        }
        Err(e) => {
            error!("ingest: failed to bind UDP {addr}: {e}");
            return None;
        }
    };

    let queue = ScanQueue::new(INGEST_QUEUE_CAPACITY);
    let stats = Arc::new(IngestStats::default());
    let thread_queue = queue.clone();
    let thread_stats = stats.clone();

    std::thread::spawn(move || receive_loop(socket, config, thread_queue, thread_stats));

    Some((queue, stats))
}

fn receive_loop(
    socket: UdpSocket,
    config: IngestConfig,
    queue: Arc<ScanQueue>,
    stats: Arc<IngestStats>,
) {
    let mut framer = Framer::new();
    let mut buf = vec![0u8; config.buffer_size];

    loop {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e) => {
                warn!("ingest: UDP recv error: {e}");
                continue;
            }
        };

        if let Some(ref sensor_ip) = config.sensor_ip {
            if &src.ip().to_string() != sensor_ip {
                continue;
            }
        }

        stats.packets_received.fetch_add(1, Ordering::Relaxed);
        stats.bytes_received.fetch_add(len as u64, Ordering::Relaxed);

        for payload in framer.feed(&buf[..len]) {
            match parser::parse_payload(&payload) {
                Ok(scan) => {
                    stats.scans_parsed.fetch_add(1, Ordering::Relaxed);
                    queue.push_drop_oldest(scan);
                }
                Err(e) => {
                    stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                    log_parse_error(&e);
                }
            }
        }
    }
}

fn log_parse_error(e: &ParseError) {
    debug!("ingest: parse error: {e}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_sensor_port() {
        let cfg = IngestConfig::default();
        assert_eq!(cfg.udp_port, 2112);
        assert_eq!(cfg.bind_host, "0.0.0.0");
        assert!(cfg.sensor_ip.is_none());
    }

    #[test]
    fn stats_snapshot_reflects_counters() {
        let stats = IngestStats::default();
        stats.packets_received.fetch_add(3, Ordering::Relaxed);
        stats.scans_parsed.fetch_add(2, Ordering::Relaxed);
        let snap = stats.snapshot();
        assert_eq!(snap.packets_received, 3);
        assert_eq!(snap.scans_parsed, 2);
    }
}
