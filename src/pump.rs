use crate::driver::Driver;
use crate::error::PumpError;
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Dedicated thread that drives the driver's blocking event processing.
///
/// Producer callbacks run on this thread, inside `process_events`. The loop
/// checks the stop flag once per iteration, so stopping takes at most one
/// in-flight driver call plus one idle sleep. A driver fault ends the loop;
/// it is not retried.
pub struct EventPump {
    stop_flag: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    fault: Arc<Mutex<Option<PumpError>>>,
    faults: Receiver<PumpError>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl EventPump {
    /// Spawn the pump thread. `idle` is the pause between successful calls.
    pub fn spawn(driver: Arc<dyn Driver>, idle: Duration) -> std::io::Result<EventPump> {
        let (sender, faults) = crossbeam_channel::bounded(1);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let fault = Arc::new(Mutex::new(None));

        let ctx = PumpContext {
            driver,
            idle,
            stop_flag: stop_flag.clone(),
            running: running.clone(),
            fault: fault.clone(),
            sender,
        };

        let thread = std::thread::Builder::new()
            .name("rgbd-events".into())
            .spawn(move || event_loop(ctx))?;

        Ok(EventPump {
            stop_flag,
            running,
            fault,
            faults,
            thread: Some(thread),
        })
    }

    /// True until the loop exits, by stop or by fault.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The fault that ended the loop, if any.
    pub fn fault(&self) -> Option<PumpError> {
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receives the fault once, when the loop dies. Usable with `select!`.
    pub fn faults(&self) -> Receiver<PumpError> {
        self.faults.clone()
    }

    /// Signal the loop to stop and wait for the thread. Idempotent.
    ///
    /// Once this returns no producer callback is running or will run from
    /// this pump.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Event pump thread panicked");
                self.running.store(false, Ordering::Release);
            }
        }
    }

    pub fn is_joined(&self) -> bool {
        self.thread.is_none()
    }
}

impl Drop for EventPump {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PumpContext {
    driver: Arc<dyn Driver>,
    idle: Duration,
    stop_flag: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    fault: Arc<Mutex<Option<PumpError>>>,
    sender: Sender<PumpError>,
}

fn event_loop(ctx: PumpContext) {
    log::info!("Event pump started");

    loop {
        if ctx.stop_flag.load(Ordering::Acquire) {
            log::info!("Event pump stopping (stop flag set)");
            break;
        }

        if let Err(e) = ctx.driver.process_events() {
            let err = PumpError::EventsFailed(e);
            log::error!("{}; event pump exiting", err);
            *ctx.fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
            let _ = ctx.sender.try_send(err);
            break;
        }

        if !ctx.idle.is_zero() {
            std::thread::sleep(ctx.idle);
        }
    }

    ctx.running.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverError;
    use crate::sim::SimDriver;

    #[test]
    fn test_stop_joins_thread() {
        let driver = Arc::new(SimDriver::new());
        let mut pump = EventPump::spawn(driver.clone(), Duration::from_millis(1)).unwrap();
        assert!(pump.is_running());

        pump.stop();
        assert!(pump.is_joined());
        assert!(!pump.is_running());
        assert!(pump.fault().is_none());

        let calls = driver.events_processed();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(driver.events_processed(), calls);

        pump.stop();
    }

    #[test]
    fn test_fault_ends_loop() {
        let driver = Arc::new(SimDriver::new().fail_events_after(3, -9));
        let pump = EventPump::spawn(driver.clone(), Duration::ZERO).unwrap();

        let err = pump
            .faults()
            .recv_timeout(Duration::from_secs(2))
            .expect("fault reported");
        assert_eq!(err, PumpError::EventsFailed(DriverError::Status(-9)));

        while pump.is_running() {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(pump.fault(), Some(err));
        assert_eq!(driver.events_processed(), 4);
    }
}
