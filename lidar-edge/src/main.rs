mod command_client;
mod config;
mod error;
mod evaluator;
mod ingest;
mod persistence;
mod publishers;
mod telegram;

use std::sync::Arc;

use clap::Parser;
use lidar_types::Verdict;
use tracing::{error, info, warn};

use command_client::CommandClient;
use config::Config;
use evaluator::Evaluator;
use ingest::IngestConfig;
use publishers::assembly::{AssemblyPublisherConfig, AssemblyStore, OutputAssembly};
use publishers::broadcast::{BroadcastFrame, BroadcastHub, BroadcastPublisherConfig};
use publishers::register::{RegisterDataStore, RegisterPublisherConfig};

#[tokio::main]
async fn main() {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lidar_edge=info".into()),
        )
        .init();

    info!("lidar-edge v{} starting", env!("CARGO_PKG_VERSION"));

    let evaluator = Arc::new(Evaluator::load(config.config_path.clone()));

    let Some((queue, ingest_stats)) = ingest::start(IngestConfig {
        bind_host: config.bind_host.clone(),
        udp_port: config.udp_port,
        sensor_ip: config.sensor_ip.clone(),
        buffer_size: 65535,
    }) else {
        error!("fatal: could not bind UDP ingest socket, exiting");
        std::process::exit(1);
    };

    if config.simulate {
        if let Some(sensor_ip) = config.sensor_ip.clone() {
            let output_ip = config.bind_host.clone();
            let udp_port = config.udp_port;
            let command_port = config.command_port;
            let sim_rate = config.sim_rate;
            tokio::spawn(async move {
                let mut client = CommandClient::new(sensor_ip, command_port);
                if let Err(e) = client.connect().await {
                    warn!("simulate: failed to connect to sensor command port: {e}");
                    return;
                }
                if let Err(e) = client.set_scan_frequency(sim_rate).await {
                    warn!("simulate: failed to set scan frequency: {e}");
                }
                if let Err(e) = client.start_scan_output(&output_ip, udp_port).await {
                    warn!("simulate: failed to start scan output: {e}");
                }
            });
        } else {
            warn!("--simulate set but --sensor-ip is unset, skipping command channel setup");
        }
    }

    let register_store = if config.enable_register {
        let store = RegisterDataStore::new();
        let enabled = publishers::register::start(
            RegisterPublisherConfig { bind_host: config.bind_host.clone(), port: config.register_port },
            store.clone(),
            evaluator.clone(),
        )
        .await;
        enabled.then_some(store)
    } else {
        None
    };

    let assembly_store = if config.enable_assembly {
        let store = AssemblyStore::new();
        let output_evaluator = evaluator.clone();
        let on_output: publishers::assembly::OutputCallback = Box::new(move |output: OutputAssembly| {
            match output.command {
                1 => output_evaluator.reset_statistics(),
                2 => {
                    output_evaluator.set_active_product(output.product_id as u32);
                }
                _ => {}
            }
        });
        let enabled = publishers::assembly::start(
            AssemblyPublisherConfig {
                bind_host: config.bind_host.clone(),
                tcp_port: config.assembly_tcp_port,
                udp_port: config.assembly_udp_port,
            },
            store.clone(),
            on_output,
        )
        .await;
        enabled.then_some(store)
    } else {
        None
    };

    let broadcast_hub = if config.enable_broadcast {
        let hub = BroadcastHub::new();
        let enabled = publishers::broadcast::start(
            BroadcastPublisherConfig { bind_host: config.bind_host.clone(), port: config.broadcast_port },
            hub.clone(),
        )
        .await;
        enabled.then_some(hub)
    } else {
        None
    };

    evaluator.subscribe({
        let register_store = register_store.clone();
        let assembly_store = assembly_store.clone();
        let broadcast_hub = broadcast_hub.clone();
        let evaluator_stats = evaluator.clone();
        move |product, scan| {
            let stats = evaluator_stats.statistics();

            if let Some(store) = &register_store {
                store.update_from_product(product, &stats);
            }
            if let Some(store) = &assembly_store {
                store.update_from_product(product, &stats, scan);
            }
            if let Some(hub) = &broadcast_hub {
                let frame = BroadcastFrame::from_product(product, &stats);
                let hub = hub.clone();
                tokio::spawn(async move { hub.publish(&frame).await });
            }
            if product.last_verdict == Verdict::Bad {
                warn!(product = product.id, "verdict BAD");
            }
        }
    });

    info!("lidar-edge ready, awaiting scans on UDP {}:{}", config.bind_host, config.udp_port);

    tokio::spawn({
        let ingest_stats = ingest_stats.clone();
        async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                let snap = ingest_stats.snapshot();
                info!(
                    packets = snap.packets_received,
                    scans = snap.scans_parsed,
                    errors = snap.parse_errors,
                    "ingest stats"
                );
            }
        }
    });

    let main_loop = tokio::spawn(async move {
        loop {
            let scan = queue.recv().await;
            evaluator.evaluate(&scan);
        }
    });

    tokio::select! {
        _ = main_loop => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, exiting");
        }
    }
}
