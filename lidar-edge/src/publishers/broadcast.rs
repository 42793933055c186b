//! Live broadcast: fan-out of verdict snapshots to an unbounded set of
//! dashboard subscribers over plain axum websockets. A failed send marks
//! its subscriber dead; dead subscribers are removed at the end of one
//! fan-out pass, never mid-iteration, so a slow write on subscriber N
//! never skips delivery to subscriber N+1.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use lidar_types::{ProductConfig, Statistics};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

/// One JSON frame sent to every connected dashboard on each verdict.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastFrame {
    pub product_id: u32,
    pub product_name: String,
    pub verdict: lidar_types::Verdict,
    pub zones: Vec<ZoneFrame>,
    pub statistics: Statistics,
    pub timestamp_us: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneFrame {
    pub id: u32,
    pub name: String,
    pub verdict: lidar_types::Verdict,
    pub measurement_m: f32,
    pub point_count: usize,
}

impl BroadcastFrame {
    pub fn from_product(product: &ProductConfig, statistics: &Statistics) -> Self {
        BroadcastFrame {
            product_id: product.id,
            product_name: product.name.clone(),
            verdict: product.last_verdict,
            zones: product
                .published_zones()
                .iter()
                .map(|z| ZoneFrame {
                    id: z.id,
                    name: z.name.clone(),
                    verdict: z.last_verdict,
                    measurement_m: z.last_measurement_m,
                    point_count: z.last_point_count,
                })
                .collect(),
            statistics: *statistics,
            timestamp_us: product.last_update_us,
        }
    }
}

struct Subscriber {
    sender: mpsc::UnboundedSender<String>,
}

/// Registry of connected dashboard subscribers plus the last frame sent,
/// so a newly connected subscriber gets an immediate snapshot instead of
/// waiting for the next verdict.
pub struct BroadcastHub {
    subscribers: Mutex<Vec<Subscriber>>,
    last_frame: Mutex<Option<String>>,
}

impl BroadcastHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: Mutex::new(Vec::new()),
            last_frame: Mutex::new(None),
        })
    }

    /// Serializes `frame`, fans it out to every subscriber, then prunes
    /// dead ones. Never called from inside the evaluator's lock.
    pub async fn publish(&self, frame: &BroadcastFrame) {
        let payload = match serde_json::to_string(frame) {
            Ok(p) => p,
            Err(e) => {
                warn!("broadcast: failed to serialize frame: {e}");
                return;
            }
        };
        *self.last_frame.lock().await = Some(payload.clone());

        let mut subscribers = self.subscribers.lock().await;
        let mut dead = Vec::new();
        for (i, sub) in subscribers.iter().enumerate() {
            if sub.sender.send(payload.clone()).is_err() {
                dead.push(i);
            }
        }
        for &i in dead.iter().rev() {
            subscribers.remove(i);
        }
    }

    async fn register(&self) -> (mpsc::UnboundedReceiver<String>, Option<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push(Subscriber { sender: tx });
        let snapshot = self.last_frame.lock().await.clone();
        (rx, snapshot)
    }
}

pub fn router(hub: Arc<BroadcastHub>) -> Router {
    Router::new()
        .route("/ws", get(upgrade))
        .with_state(hub)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}

async fn upgrade(ws: WebSocketUpgrade, State(hub): State<Arc<BroadcastHub>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(mut socket: WebSocket, hub: Arc<BroadcastHub>) {
    let (mut rx, snapshot) = hub.register().await;

    if let Some(snapshot) = snapshot {
        if socket.send(Message::Text(snapshot)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(payload) => {
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("broadcast: client read error: {e}");
                        break;
                    }
                }
            }
        }
    }
}

pub struct BroadcastPublisherConfig {
    pub bind_host: String,
    pub port: u16,
}

pub async fn start(config: BroadcastPublisherConfig, hub: Arc<BroadcastHub>) -> bool {
    let addr = format!("{}:{}", config.bind_host, config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("broadcast publisher: failed to bind {addr}: {e}, disabling");
            return false;
        }
    };
    info!("broadcast publisher listening on ws://{addr}/ws");

    let app = router(hub);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("broadcast publisher: server error: {e}");
        }
    });

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use lidar_types::ProductConfig;

    #[tokio::test]
    async fn new_subscriber_receives_last_frame_on_connect() {
        let hub = BroadcastHub::new();
        let product = ProductConfig::example();
        let frame = BroadcastFrame::from_product(&product, &Statistics::default());
        hub.publish(&frame).await;

        let (_, snapshot) = hub.register().await;
        assert!(snapshot.is_some());
        assert!(snapshot.unwrap().contains("Example Product"));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let hub = BroadcastHub::new();
        let product = ProductConfig::example();
        let frame = BroadcastFrame::from_product(&product, &Statistics::default());
        hub.publish(&frame).await;
    }

    #[tokio::test]
    async fn dead_subscriber_is_pruned_after_fan_out() {
        let hub = BroadcastHub::new();
        let (rx, _) = hub.register().await;
        drop(rx);

        let product = ProductConfig::example();
        let frame = BroadcastFrame::from_product(&product, &Statistics::default());
        hub.publish(&frame).await;

        assert_eq!(hub.subscribers.lock().await.len(), 0);
    }
}
