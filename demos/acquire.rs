//! Acquire synchronized color+depth pairs and print a summary of each.
//!
//! Usage: cargo run --example acquire [pairs]
//!        RGBD_BACKEND=freenect cargo run --features freenect --example acquire
//!
//! Defaults to the simulated sensor. Stops after `pairs` pairs (default 300)
//! or when the event pump faults.

use rgbd_bridge::{Driver, LifecycleController, SessionConfig, SimDriver};
use std::sync::Arc;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[cfg_attr(not(feature = "freenect"), allow(unused_variables))]
fn make_driver(config: &SessionConfig) -> Result<Arc<dyn Driver>, String> {
    let backend = std::env::var("RGBD_BACKEND").unwrap_or_else(|_| "synthetic".into());
    match backend.as_str() {
        "synthetic" => Ok(Arc::new(
            SimDriver::new().synthetic(Duration::from_millis(33)),
        )),
        #[cfg(feature = "freenect")]
        "freenect" => rgbd_bridge::FreenectDriver::init(config.driver_log_level)
            .map(|d| Arc::new(d) as Arc<dyn Driver>)
            .map_err(|e| format!("libfreenect init failed: {}", e)),
        other => Err(format!("unknown or unavailable backend '{}'", other)),
    }
}

fn main() {
    env_logger::init();

    let limit: u64 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(300);

    let config = SessionConfig::from_env();
    let driver = match make_driver(&config) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let mut rgbd = LifecycleController::new(driver, config);
    if let Err(e) = rgbd.init() {
        eprintln!("Failed to start sensor: {}", e);
        std::process::exit(1);
    }

    println!("Acquiring {} pairs...", limit);

    let start = Instant::now();
    let mut count: u64 = 0;
    let mut last_report = Instant::now();

    while count < limit {
        if let Some(fault) = rgbd.pump_fault() {
            eprintln!("Event pump stopped: {}", fault);
            break;
        }

        let Some(pair) = rgbd.try_acquire_pair() else {
            std::thread::sleep(POLL_INTERVAL);
            continue;
        };
        count += 1;

        let (cx, cy) = (pair.depth.width / 2, pair.depth.height / 2);
        // Raw 0 means no reading.
        let meters = pair
            .depth
            .depth_mm(cx, cy)
            .filter(|&mm| mm != 0)
            .map(|mm| mm as f32 / 1000.0);

        if count % 30 == 1 {
            println!(
                "pair {:<6} color#{:<6} depth#{:<6} skew={:>6}us  center={:?}  bgr={:?}",
                count,
                pair.color.sequence,
                pair.depth.sequence,
                pair.skew().as_micros(),
                meters,
                pair.color.pixel(cx, cy),
            );
        }

        let now = Instant::now();
        if now.duration_since(last_report) >= Duration::from_secs(3) {
            let elapsed = start.elapsed().as_secs_f64();
            println!("--- {} pairs in {:.1}s ({:.1} Hz) ---", count, elapsed, count as f64 / elapsed);
            last_report = now;
        }
    }

    if let Some(stats) = rgbd.stats() {
        println!(
            "color: {} written, {} overwritten | depth: {} written, {} overwritten",
            stats.color.written, stats.color.overwritten, stats.depth.written, stats.depth.overwritten
        );
    }

    let elapsed = start.elapsed().as_secs_f64();
    println!(
        "\nTotal: {} pairs in {:.1}s ({:.1} Hz)",
        count,
        elapsed,
        count as f64 / elapsed
    );

    rgbd.shutdown();
}
