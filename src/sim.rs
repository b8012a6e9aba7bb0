//! Hardware-free sensor backend.
//!
//! `SimDriver` behaves like a single-context sensor driver: devices are
//! claimed once, modes come from a fixed table, and frames reach the
//! registered callbacks only from inside `process_events`, exactly as a
//! real driver's USB completion handlers would. Faults can be injected at
//! start and in the event loop, and every lifecycle call is journaled.

use crate::driver::Driver;
use crate::error::DriverError;
use crate::session::StreamCallbacks;
use crate::types::{ColorFormat, DepthFormat, Resolution, Stream, Streams};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const EBUSY: i32 = -16;
const ENODEV: i32 = -19;
const EIO: i32 = -5;

/// Frames a stream may have queued before the oldest is dropped.
const MAX_PENDING: usize = 4;

/// Lifecycle calls observed by a [`SimDriver`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    DeviceOpened(u32),
    ColorModeSet(Resolution, ColorFormat),
    DepthModeSet(Resolution, DepthFormat),
    CallbacksSet,
    CallbacksCleared,
    StreamStarted(Stream),
    /// `pump_busy` is true if a `process_events` call was in flight;
    /// `events_processed` is the number of such calls made so far.
    StreamStopped {
        stream: Stream,
        pump_busy: bool,
        events_processed: u64,
    },
    DeviceClosed,
}

struct Synthetic {
    interval: Duration,
    last: Option<Instant>,
    tick: u32,
}

struct SimState {
    devices: u32,
    claimed: bool,
    color_modes: Vec<(Resolution, ColorFormat)>,
    depth_modes: Vec<(Resolution, DepthFormat)>,
    resolution: Option<Resolution>,
    running: Streams,
    fail_start: Streams,
    fail_events_after: Option<(u64, i32)>,
    pending_color: VecDeque<(Vec<u8>, u32)>,
    pending_depth: VecDeque<(Vec<u16>, u32)>,
    synthetic: Option<Synthetic>,
}

/// A simulated RGB-D sensor.
pub struct SimDriver {
    state: Mutex<SimState>,
    callbacks: Mutex<Option<Arc<StreamCallbacks>>>,
    journal: Mutex<Vec<SimEvent>>,
    in_events: AtomicBool,
    events_processed: AtomicU64,
    frames_delivered: AtomicU64,
    idle_wait: Duration,
}

impl SimDriver {
    /// One device offering 640x480 color (RGB, YUV), 1280x1024 RGB color and
    /// 640x480 depth (plain, registered).
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                devices: 1,
                claimed: false,
                color_modes: vec![
                    (Resolution::Medium, ColorFormat::Rgb8),
                    (Resolution::Medium, ColorFormat::YuvRgb),
                    (Resolution::High, ColorFormat::Rgb8),
                ],
                depth_modes: vec![
                    (Resolution::Medium, DepthFormat::Depth16),
                    (Resolution::Medium, DepthFormat::Registered),
                ],
                resolution: None,
                running: Streams::empty(),
                fail_start: Streams::empty(),
                fail_events_after: None,
                pending_color: VecDeque::new(),
                pending_depth: VecDeque::new(),
                synthetic: None,
            }),
            callbacks: Mutex::new(None),
            journal: Mutex::new(Vec::new()),
            in_events: AtomicBool::new(false),
            events_processed: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
            idle_wait: Duration::from_millis(1),
        }
    }

    pub fn with_devices(self, devices: u32) -> Self {
        self.lock_state().devices = devices;
        self
    }

    /// Make `start_stream(stream)` fail.
    pub fn fail_start(self, stream: Stream) -> Self {
        self.lock_state().fail_start |= stream.flag();
        self
    }

    /// Let `calls` event-processing calls succeed, then fail with `code`.
    pub fn fail_events_after(self, calls: u64, code: i32) -> Self {
        self.lock_state().fail_events_after = Some((calls, code));
        self
    }

    /// Emit a generated color + depth frame every `interval` while both
    /// streams run.
    pub fn synthetic(self, interval: Duration) -> Self {
        self.lock_state().synthetic = Some(Synthetic {
            interval,
            last: None,
            tick: 0,
        });
        self
    }

    /// How long an idle `process_events` call blocks.
    pub fn with_idle_wait(mut self, wait: Duration) -> Self {
        self.idle_wait = wait;
        self
    }

    /// Queue a raw RGB color frame for the next `process_events`.
    /// Dropped if the color stream is not running. At most a few frames are
    /// held per stream; older ones are discarded first.
    pub fn push_color(&self, rgb: Vec<u8>, timestamp: u32) {
        let mut state = self.lock_state();
        if state.running.contains(Streams::COLOR) {
            if state.pending_color.len() == MAX_PENDING {
                state.pending_color.pop_front();
            }
            state.pending_color.push_back((rgb, timestamp));
        }
    }

    /// Queue a raw depth frame for the next `process_events`.
    pub fn push_depth(&self, depth: Vec<u16>, timestamp: u32) {
        let mut state = self.lock_state();
        if state.running.contains(Streams::DEPTH) {
            if state.pending_depth.len() == MAX_PENDING {
                state.pending_depth.pop_front();
            }
            state.pending_depth.push_back((depth, timestamp));
        }
    }

    pub fn journal(&self) -> Vec<SimEvent> {
        lock(&self.journal).clone()
    }

    pub fn is_claimed(&self) -> bool {
        self.lock_state().claimed
    }

    pub fn running(&self) -> Streams {
        self.lock_state().running
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::Acquire)
    }

    /// Frames handed to the callbacks so far, both streams.
    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Acquire)
    }

    fn record(&self, event: SimEvent) {
        lock(&self.journal).push(event);
    }

    fn lock_state(&self) -> MutexGuard<'_, SimState> {
        lock(&self.state)
    }

    fn generate(state: &mut SimState, now: Instant) {
        let (Some(res), Some(synth)) = (state.resolution, state.synthetic.as_mut()) else {
            return;
        };
        if state.running != (Streams::COLOR | Streams::DEPTH) {
            return;
        }
        if let Some(last) = synth.last {
            if now.duration_since(last) < synth.interval {
                return;
            }
        }
        synth.last = Some(now);
        synth.tick = synth.tick.wrapping_add(1);
        let tick = synth.tick;

        let (w, h) = (res.width(), res.height());
        let mut rgb = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                rgb.extend_from_slice(&[
                    (x * 255 / w) as u8,
                    (y * 255 / h) as u8,
                    (tick % 256) as u8,
                ]);
            }
        }
        // A plane receding left to right, 500 mm to 4500 mm.
        let depth = (0..w * h)
            .map(|i| 500 + ((i % w) * 4000 / w) as u16)
            .collect();

        state.pending_color.push_back((rgb, tick));
        state.pending_depth.push_back((depth, tick));
    }
}

impl Default for SimDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for SimDriver {
    fn device_count(&self) -> Result<u32, DriverError> {
        Ok(self.lock_state().devices)
    }

    fn open_device(&self, index: u32) -> Result<(), DriverError> {
        let mut state = self.lock_state();
        if index >= state.devices {
            return Err(DriverError::Status(ENODEV));
        }
        if state.claimed {
            return Err(DriverError::Status(EBUSY));
        }
        state.claimed = true;
        drop(state);
        self.record(SimEvent::DeviceOpened(index));
        Ok(())
    }

    fn set_color_mode(
        &self,
        resolution: Resolution,
        format: ColorFormat,
    ) -> Result<(), DriverError> {
        let mut state = self.lock_state();
        if !state.color_modes.contains(&(resolution, format)) {
            return Err(DriverError::Unsupported);
        }
        state.resolution = Some(resolution);
        drop(state);
        self.record(SimEvent::ColorModeSet(resolution, format));
        Ok(())
    }

    fn set_depth_mode(
        &self,
        resolution: Resolution,
        format: DepthFormat,
    ) -> Result<(), DriverError> {
        if !self.lock_state().depth_modes.contains(&(resolution, format)) {
            return Err(DriverError::Unsupported);
        }
        self.record(SimEvent::DepthModeSet(resolution, format));
        Ok(())
    }

    fn set_callbacks(&self, callbacks: Arc<StreamCallbacks>) {
        *lock(&self.callbacks) = Some(callbacks);
        self.record(SimEvent::CallbacksSet);
    }

    fn clear_callbacks(&self) {
        lock(&self.callbacks).take();
        self.record(SimEvent::CallbacksCleared);
    }

    fn start_stream(&self, stream: Stream) -> Result<(), DriverError> {
        let mut state = self.lock_state();
        if !state.claimed {
            return Err(DriverError::Status(ENODEV));
        }
        if state.fail_start.contains(stream.flag()) {
            return Err(DriverError::Status(EIO));
        }
        state.running |= stream.flag();
        drop(state);
        self.record(SimEvent::StreamStarted(stream));
        Ok(())
    }

    fn stop_stream(&self, stream: Stream) -> Result<(), DriverError> {
        let pump_busy = self.in_events.load(Ordering::Acquire);
        let events_processed = self.events_processed();
        let mut state = self.lock_state();
        state.running.remove(stream.flag());
        match stream {
            Stream::Color => state.pending_color.clear(),
            Stream::Depth => state.pending_depth.clear(),
        }
        drop(state);
        self.record(SimEvent::StreamStopped {
            stream,
            pump_busy,
            events_processed,
        });
        Ok(())
    }

    fn close_device(&self) -> Result<(), DriverError> {
        let mut state = self.lock_state();
        state.claimed = false;
        state.running = Streams::empty();
        state.pending_color.clear();
        state.pending_depth.clear();
        drop(state);
        self.record(SimEvent::DeviceClosed);
        Ok(())
    }

    fn process_events(&self) -> Result<(), DriverError> {
        self.in_events.store(true, Ordering::Release);
        let result = self.dispatch_pending();
        self.in_events.store(false, Ordering::Release);
        result
    }
}

impl SimDriver {
    fn dispatch_pending(&self) -> Result<(), DriverError> {
        let calls = self.events_processed.fetch_add(1, Ordering::AcqRel);

        let (color, depth) = {
            let mut state = self.lock_state();
            if let Some((after, code)) = state.fail_events_after {
                if calls >= after {
                    return Err(DriverError::Status(code));
                }
            }
            Self::generate(&mut state, Instant::now());
            (
                std::mem::take(&mut state.pending_color),
                std::mem::take(&mut state.pending_depth),
            )
        };

        if color.is_empty() && depth.is_empty() {
            std::thread::sleep(self.idle_wait);
            return Ok(());
        }

        let Some(callbacks) = lock(&self.callbacks).clone() else {
            return Ok(());
        };
        let delivered = (color.len() + depth.len()) as u64;
        for (rgb, ts) in color {
            callbacks.on_color(&rgb, ts);
        }
        for (samples, ts) in depth {
            callbacks.on_depth(&samples, ts);
        }
        self.frames_delivered.fetch_add(delivered, Ordering::AcqRel);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::FrameSlot;

    #[test]
    fn test_frames_only_flow_from_process_events() {
        let driver = SimDriver::new();
        let color = Arc::new(FrameSlot::new());
        let depth = Arc::new(FrameSlot::new());
        driver.open_device(0).unwrap();
        driver
            .set_color_mode(Resolution::Medium, ColorFormat::Rgb8)
            .unwrap();
        driver.set_callbacks(Arc::new(StreamCallbacks::new(
            Resolution::Medium,
            color.clone(),
            depth.clone(),
        )));
        driver.start_stream(Stream::Color).unwrap();

        driver.push_color(vec![9; Resolution::Medium.pixels() * 3], 1);
        driver.push_depth(vec![1; Resolution::Medium.pixels()], 1);
        assert!(!color.is_fresh());

        driver.process_events().unwrap();
        assert!(color.is_fresh());
        // Depth was never started, so its frame was dropped.
        assert!(!depth.is_fresh());
        assert_eq!(driver.frames_delivered(), 1);
    }

    #[test]
    fn test_event_fault_injection() {
        let driver = SimDriver::new().fail_events_after(2, -7);
        assert!(driver.process_events().is_ok());
        assert!(driver.process_events().is_ok());
        assert_eq!(driver.process_events(), Err(DriverError::Status(-7)));
    }

    #[test]
    fn test_synthetic_generator() {
        let driver = SimDriver::new().synthetic(Duration::ZERO);
        let color = Arc::new(FrameSlot::new());
        let depth = Arc::new(FrameSlot::new());
        driver.open_device(0).unwrap();
        driver
            .set_color_mode(Resolution::Medium, ColorFormat::Rgb8)
            .unwrap();
        driver
            .set_depth_mode(Resolution::Medium, DepthFormat::Depth16)
            .unwrap();
        driver.set_callbacks(Arc::new(StreamCallbacks::new(
            Resolution::Medium,
            color.clone(),
            depth.clone(),
        )));
        driver.start_stream(Stream::Color).unwrap();
        driver.start_stream(Stream::Depth).unwrap();

        driver.process_events().unwrap();
        let c = color.try_read().unwrap();
        let d = depth.try_read().unwrap();
        assert_eq!(c.timestamp, d.timestamp);
        assert_eq!(d.depth_mm(0, 0), Some(500));
        // Generated as RGB (0, 0, tick), stored as BGR.
        assert_eq!(c.pixel(0, 0), Some([1, 0, 0]));
    }

    #[test]
    fn test_unsupported_modes() {
        let driver = SimDriver::new();
        assert_eq!(
            driver.set_color_mode(Resolution::Low, ColorFormat::Rgb8),
            Err(DriverError::Unsupported)
        );
        assert_eq!(
            driver.set_depth_mode(Resolution::High, DepthFormat::Depth16),
            Err(DriverError::Unsupported)
        );
    }
}
