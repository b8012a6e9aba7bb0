//! Full acquisition path against the simulated sensor.

use rgbd_bridge::{
    ColorFormat, DepthFormat, DeviceSession, Driver, LifecycleController, Resolution,
    SessionConfig, SessionState, SimDriver, SimEvent, Stream,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const W: usize = 640;
const H: usize = 480;

fn rgb_frame() -> Vec<u8> {
    (0..W * H)
        .flat_map(|i| [(i % 251) as u8, (i % 13) as u8, (i % 7) as u8])
        .collect()
}

fn depth_frame() -> Vec<u16> {
    (0..W * H).map(|i| 800 + (i % 1000) as u16).collect()
}

#[test]
fn test_single_pair_then_empty() {
    let _ = env_logger::builder().is_test(true).try_init();

    let sim = Arc::new(SimDriver::new());
    let mut session = DeviceSession::open(sim.clone(), 0).unwrap();
    session
        .configure(Resolution::Medium, ColorFormat::Rgb8, DepthFormat::Depth16)
        .unwrap();
    session.start().unwrap();
    assert_eq!(session.state(), SessionState::Streaming);

    let exchange = session.exchange();
    assert!(exchange.try_acquire_pair().is_none());

    let rgb = rgb_frame();
    let depth = depth_frame();
    sim.push_color(rgb.clone(), 1000);
    sim.push_depth(depth.clone(), 1001);
    sim.process_events().unwrap();

    let pair = exchange.try_acquire_pair().expect("pair after both callbacks");
    assert_eq!((pair.color.width, pair.color.height), (W, H));
    assert_eq!(pair.color.timestamp, 1000);
    assert_eq!(pair.depth.timestamp, 1001);
    assert_eq!(pair.depth.data, depth);

    // Canonical channel order is BGR.
    for (px, bgr) in rgb.chunks_exact(3).zip(pair.color.data.chunks_exact(3)) {
        assert_eq!(bgr, [px[2], px[1], px[0]]);
    }

    assert!(exchange.try_acquire_pair().is_none());

    session.stop();
    assert_eq!(session.state(), SessionState::Closed);
    assert!(!sim.is_claimed());
    assert!(sim.running().is_empty());
}

#[test]
fn test_controller_round_trip_through_pump() {
    let _ = env_logger::builder().is_test(true).try_init();

    let sim = Arc::new(SimDriver::new());
    let mut rgbd = LifecycleController::new(sim.clone(), SessionConfig::default());
    rgbd.init().unwrap();
    assert!(rgbd.is_pumping());

    sim.push_color(rgb_frame(), 7);
    sim.push_depth(depth_frame(), 7);

    let deadline = Instant::now() + Duration::from_secs(2);
    let pair = loop {
        if let Some(pair) = rgbd.try_acquire_pair() {
            break pair;
        }
        assert!(Instant::now() < deadline, "pump never delivered a pair");
        std::thread::sleep(Duration::from_millis(5));
    };
    assert_eq!(pair.color.sequence, 1);
    assert_eq!(pair.depth.sequence, 1);
    assert_eq!(pair.depth.depth_mm(0, 0), Some(800));
    assert!(rgbd.try_acquire_pair().is_none());

    rgbd.shutdown();
    assert_eq!(rgbd.state(), SessionState::Closed);
    assert!(!rgbd.is_pumping());
    assert!(!sim.is_claimed());

    let journal = sim.journal();
    assert_eq!(journal.first(), Some(&SimEvent::DeviceOpened(0)));
    assert_eq!(journal.last(), Some(&SimEvent::DeviceClosed));
    assert!(journal.iter().any(|e| matches!(
        e,
        SimEvent::StreamStopped {
            stream: Stream::Color,
            pump_busy: false,
            ..
        }
    )));
}
