//! lidar-sim — scan telegram simulator for lidar-edge development and
//! testing, standing in for the physical sensor.
//!
//! Runs one loop: generate a synthetic scan at the configured rate,
//! encode it as a SOPAS telegram, send it over UDP to the target
//! address (normally the `lidar-edge` service's ingest port).

mod scene;
mod telegram;
mod udp_tx;

use clap::Parser;
use rand::SeedableRng;
use tracing::info;

use scene::Scene;
use udp_tx::UdpTransmitter;

#[derive(Parser, Debug)]
#[command(name = "lidar-sim", about = "Scan telegram simulator for lidar-edge")]
struct Args {
    /// Address to send telegrams to (normally lidar-edge's UDP ingest port)
    #[arg(long, default_value = "127.0.0.1:2112")]
    target: String,

    /// Scan rate in Hz
    #[arg(long, default_value_t = 12.5)]
    rate: f32,

    /// Random seed; unset draws from the OS entropy source
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lidar_simulator=info".into()),
        )
        .init();

    let args = Args::parse();

    info!("lidar-sim starting — target {}, {} Hz", args.target, args.rate);

    let transmitter = match UdpTransmitter::new(&args.target) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("lidar-sim: failed to open UDP socket: {e}");
            std::process::exit(1);
        }
    };

    let mut scene = Scene::new();
    let mut rng = match args.seed {
        Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
        None => rand::rngs::StdRng::from_entropy(),
    };

    let period = std::time::Duration::from_secs_f32(1.0 / args.rate.max(0.1));
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;
        let scan = scene.generate_scan(&mut rng);
        let wire = telegram::encode_telegram(&scan);
        transmitter.send(&wire);
    }
}
