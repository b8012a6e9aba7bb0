use crate::config::SessionConfig;
use crate::driver::Driver;
use crate::error::{PumpError, RgbdError, StartError};
use crate::exchange::{ExchangeStats, FrameExchange};
use crate::pump::EventPump;
use crate::session::DeviceSession;
use crate::types::{SessionState, SynchronizedPair};
use crate::Result;
use crossbeam_channel::Receiver;
use std::sync::Arc;

/// Owns a session and its event pump and drives them through the only valid
/// order.
///
/// Bring-up: open, configure, start streams, start pump. Teardown: stop and
/// join the pump, stop streams, close the device, release the driver
/// context. A failure partway through bring-up unwinds whatever was already
/// acquired before the error is returned, and leaves the controller closed.
///
/// ```no_run
/// use rgbd_bridge::{LifecycleController, SessionConfig, SimDriver};
/// use std::sync::Arc;
///
/// let mut rgbd = LifecycleController::new(Arc::new(SimDriver::new()), SessionConfig::default());
/// rgbd.init().unwrap();
/// if let Some(pair) = rgbd.try_acquire_pair() {
///     println!("color #{} depth #{}", pair.color.sequence, pair.depth.sequence);
/// }
/// rgbd.shutdown();
/// ```
pub struct LifecycleController {
    config: SessionConfig,
    driver: Option<Arc<dyn Driver>>,
    session: Option<DeviceSession>,
    pump: Option<EventPump>,
    exchange: Option<FrameExchange>,
    closed: bool,
}

impl LifecycleController {
    pub fn new(driver: Arc<dyn Driver>, config: SessionConfig) -> Self {
        Self {
            config,
            driver: Some(driver),
            session: None,
            pump: None,
            exchange: None,
            closed: false,
        }
    }

    /// Open, configure and start the sensor, then start pumping events.
    pub fn init(&mut self) -> Result<()> {
        if self.closed {
            return Err(RgbdError::Closed);
        }
        if self.session.is_some() {
            return Err(StartError::InvalidState(self.state()).into());
        }
        let driver = self.driver.take().ok_or(RgbdError::Closed)?;

        match bring_up(driver, &self.config) {
            Ok((session, pump)) => {
                self.exchange = Some(session.exchange().with_max_skew(self.config.max_skew));
                self.session = Some(session);
                self.pump = Some(pump);
                Ok(())
            }
            Err(e) => {
                log::warn!("Sensor init failed, session closed: {}", e);
                self.closed = true;
                Err(e)
            }
        }
    }

    /// Tear everything down. Safe to call repeatedly, and before or after a
    /// failed [`init`](Self::init).
    pub fn shutdown(&mut self) {
        if self.closed && self.session.is_none() && self.pump.is_none() {
            return;
        }

        if let Some(pump) = self.pump.as_mut() {
            pump.stop();
            if let Some(fault) = pump.fault() {
                log::warn!("Event pump had stopped on fault: {}", fault);
            }
        }
        self.pump = None;

        if let Some(mut session) = self.session.take() {
            session.stop();
        }
        self.exchange = None;
        self.driver = None;
        self.closed = true;
        log::info!("RGB-D session shut down");
    }

    /// Take a synchronized pair if one is ready. Never blocks.
    pub fn try_acquire_pair(&self) -> Option<SynchronizedPair> {
        self.exchange.as_ref()?.try_acquire_pair()
    }

    /// A consumer handle that can be moved to another thread.
    pub fn exchange(&self) -> Option<FrameExchange> {
        self.exchange.clone()
    }

    pub fn state(&self) -> SessionState {
        match &self.session {
            Some(session) => session.state(),
            None if self.closed => SessionState::Closed,
            None => SessionState::Uninitialized,
        }
    }

    /// True while the event pump is alive.
    pub fn is_pumping(&self) -> bool {
        self.pump.as_ref().is_some_and(EventPump::is_running)
    }

    /// The driver fault that killed the event pump. The caller is expected
    /// to [`shutdown`](Self::shutdown); the pump is never restarted.
    pub fn pump_fault(&self) -> Option<PumpError> {
        self.pump.as_ref()?.fault()
    }

    pub fn pump_faults(&self) -> Option<Receiver<PumpError>> {
        self.pump.as_ref().map(EventPump::faults)
    }

    pub fn stats(&self) -> Option<ExchangeStats> {
        self.exchange.as_ref().map(FrameExchange::stats)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// On any error the partially built session is dropped here, which stops
// started streams and closes the device.
fn bring_up(
    driver: Arc<dyn Driver>,
    config: &SessionConfig,
) -> Result<(DeviceSession, EventPump)> {
    let mut session = DeviceSession::open(driver, config.device_index)?;
    session.configure(config.resolution, config.color_format, config.depth_format)?;
    session.start()?;

    let driver = session
        .driver()
        .ok_or(StartError::InvalidState(session.state()))?;
    let pump = EventPump::spawn(driver, config.pump_idle).map_err(StartError::PumpSpawn)?;

    Ok((session, pump))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DeviceError, DriverError};
    use crate::session::DeviceSession;
    use crate::sim::{SimDriver, SimEvent};
    use crate::types::{Resolution, Stream};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    fn controller(driver: &Arc<SimDriver>) -> LifecycleController {
        LifecycleController::new(driver.clone(), SessionConfig::default())
    }

    fn wait_for_pair(rgbd: &LifecycleController) -> SynchronizedPair {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(pair) = rgbd.try_acquire_pair() {
                return pair;
            }
            assert!(Instant::now() < deadline, "no pair within 2s");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_init_then_shutdown() {
        let driver = Arc::new(SimDriver::new());
        let mut rgbd = controller(&driver);
        assert_eq!(rgbd.state(), SessionState::Uninitialized);

        rgbd.init().unwrap();
        assert_eq!(rgbd.state(), SessionState::Streaming);
        assert!(rgbd.is_pumping());

        rgbd.shutdown();
        assert_eq!(rgbd.state(), SessionState::Closed);
        assert!(!driver.is_claimed());
        assert!(rgbd.try_acquire_pair().is_none());
    }

    #[test]
    fn test_init_order() {
        let driver = Arc::new(SimDriver::new());
        let mut rgbd = controller(&driver);
        rgbd.init().unwrap();

        let journal = driver.journal();
        assert_eq!(
            &journal[..6],
            &[
                SimEvent::DeviceOpened(0),
                SimEvent::ColorModeSet(Resolution::Medium, crate::ColorFormat::Rgb8),
                SimEvent::DepthModeSet(Resolution::Medium, crate::DepthFormat::Depth16),
                SimEvent::CallbacksSet,
                SimEvent::StreamStarted(Stream::Color),
                SimEvent::StreamStarted(Stream::Depth),
            ]
        );
    }

    #[test]
    fn test_pairs_flow_through_pump() {
        let driver = Arc::new(SimDriver::new());
        let mut rgbd = controller(&driver);
        rgbd.init().unwrap();

        let pixels = Resolution::Medium.pixels();
        driver.push_color(vec![200; pixels * 3], 11);
        driver.push_depth(vec![1200; pixels], 12);

        let pair = wait_for_pair(&rgbd);
        assert_eq!(pair.color.timestamp, 11);
        assert_eq!(pair.depth.timestamp, 12);
        assert_eq!(pair.depth.depth_mm(5, 5), Some(1200));
        assert!(rgbd.try_acquire_pair().is_none());

        rgbd.shutdown();
    }

    #[test]
    fn test_partial_start_failure_releases_device() {
        let driver = Arc::new(SimDriver::new().fail_start(Stream::Depth));
        let mut rgbd = controller(&driver);

        let err = rgbd.init().unwrap_err();
        assert!(matches!(
            err,
            RgbdError::Start(StartError::StreamStartFailed {
                stream: Stream::Depth,
                source: DriverError::Status(_),
            })
        ));
        assert_eq!(rgbd.state(), SessionState::Closed);
        assert!(driver.running().is_empty());
        assert!(!driver.is_claimed());
        assert!(!rgbd.is_pumping());

        let journal = driver.journal();
        assert!(journal.contains(&SimEvent::StreamStarted(Stream::Color)));
        assert!(journal
            .iter()
            .any(|e| matches!(e, SimEvent::StreamStopped { stream: Stream::Color, .. })));
        assert_eq!(journal.last(), Some(&SimEvent::DeviceClosed));

        // Device is claimable again.
        let reopened = DeviceSession::open(driver.clone(), 0);
        assert!(reopened.is_ok());
    }

    #[test]
    fn test_open_failure_surfaces_device_error() {
        let driver = Arc::new(SimDriver::new().with_devices(0));
        let mut rgbd = controller(&driver);
        let err = rgbd.init().unwrap_err();
        assert!(matches!(err, RgbdError::Device(DeviceError::NoDeviceFound)));
        assert_eq!(rgbd.state(), SessionState::Closed);
    }

    #[test]
    fn test_unsupported_mode_closes_device() {
        let driver = Arc::new(SimDriver::new());
        let config = SessionConfig {
            resolution: Resolution::Low,
            ..SessionConfig::default()
        };
        let mut rgbd = LifecycleController::new(driver.clone(), config);
        assert!(matches!(rgbd.init(), Err(RgbdError::Config(_))));
        assert!(!driver.is_claimed());
    }

    #[test]
    fn test_init_twice_rejected() {
        let driver = Arc::new(SimDriver::new());
        let mut rgbd = controller(&driver);
        rgbd.init().unwrap();
        assert!(matches!(
            rgbd.init(),
            Err(RgbdError::Start(StartError::InvalidState(SessionState::Streaming)))
        ));
        rgbd.shutdown();
        assert!(matches!(rgbd.init(), Err(RgbdError::Closed)));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let driver = Arc::new(SimDriver::new());
        let mut rgbd = controller(&driver);
        rgbd.init().unwrap();
        rgbd.shutdown();
        rgbd.shutdown();
        assert_eq!(rgbd.state(), SessionState::Closed);

        let closes = driver
            .journal()
            .iter()
            .filter(|e| **e == SimEvent::DeviceClosed)
            .count();
        assert_eq!(closes, 1);
    }

    #[test]
    fn test_shutdown_without_init() {
        let driver = Arc::new(SimDriver::new());
        let mut rgbd = controller(&driver);
        rgbd.shutdown();
        assert_eq!(rgbd.state(), SessionState::Closed);
        rgbd.shutdown();
        assert_eq!(rgbd.state(), SessionState::Closed);
        assert!(driver.journal().is_empty());
    }

    #[test]
    fn test_no_callbacks_after_shutdown() {
        let driver = Arc::new(SimDriver::new().with_idle_wait(Duration::from_micros(200)));
        let config = SessionConfig {
            pump_idle: Duration::ZERO,
            ..SessionConfig::default()
        };
        let mut rgbd = LifecycleController::new(driver.clone(), config);
        rgbd.init().unwrap();

        let pixels = Resolution::Medium.pixels();
        let done = Arc::new(AtomicBool::new(false));
        let burst = {
            let driver = driver.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                let mut ts = 0u32;
                while !done.load(Ordering::Acquire) {
                    ts = ts.wrapping_add(1);
                    driver.push_color(vec![ts as u8; pixels * 3], ts);
                    driver.push_depth(vec![ts as u16; pixels], ts);
                }
            })
        };

        while driver.frames_delivered() < 20 {
            std::thread::sleep(Duration::from_millis(1));
        }
        rgbd.shutdown();

        let delivered = driver.frames_delivered();
        let processed = driver.events_processed();
        std::thread::sleep(Duration::from_millis(20));
        done.store(true, Ordering::Release);
        burst.join().unwrap();

        assert_eq!(driver.frames_delivered(), delivered);
        assert_eq!(driver.events_processed(), processed);

        let stops: Vec<_> = driver
            .journal()
            .into_iter()
            .filter_map(|e| match e {
                SimEvent::StreamStopped {
                    pump_busy,
                    events_processed,
                    ..
                } => Some((pump_busy, events_processed)),
                _ => None,
            })
            .collect();
        assert_eq!(stops.len(), 2);
        for (pump_busy, events_at_stop) in stops {
            assert!(!pump_busy, "stream stopped while events were processing");
            assert_eq!(events_at_stop, processed, "pump ran after streams stopped");
        }
    }

    #[test]
    fn test_pump_fault_is_observable() {
        let driver = Arc::new(SimDriver::new().fail_events_after(5, -4));
        let mut rgbd = controller(&driver);
        rgbd.init().unwrap();

        let fault = rgbd
            .pump_faults()
            .unwrap()
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert_eq!(fault, PumpError::EventsFailed(DriverError::Status(-4)));
        assert_eq!(rgbd.pump_fault(), Some(fault));

        rgbd.shutdown();
        assert_eq!(rgbd.state(), SessionState::Closed);
        assert!(!driver.is_claimed());
    }

    #[test]
    fn test_skew_bound_from_config() {
        let driver = Arc::new(SimDriver::new());
        let config = SessionConfig {
            max_skew: Some(Duration::from_millis(15)),
            ..SessionConfig::default()
        };
        let mut rgbd = LifecycleController::new(driver, config);
        rgbd.init().unwrap();
        assert_eq!(
            rgbd.exchange().unwrap().max_skew(),
            Some(Duration::from_millis(15))
        );
    }
}
