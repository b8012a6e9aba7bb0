use crate::driver::Driver;
use crate::error::{ConfigError, DeviceError, DriverError, StartError};
use crate::exchange::FrameExchange;
use crate::slot::FrameSlot;
use crate::types::{
    ColorFormat, ColorFrame, DepthFormat, DepthFrame, Resolution, SessionState, Stream, Streams,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Producer entry points handed to the driver.
///
/// Holds the owning session's slots so a backend can dispatch its
/// fixed-signature callbacks back into the session. Each call copies the
/// driver-owned buffer, since that buffer is only valid for the duration of
/// the callback, and then writes the matching slot.
pub struct StreamCallbacks {
    resolution: Resolution,
    color: Arc<FrameSlot<ColorFrame>>,
    depth: Arc<FrameSlot<DepthFrame>>,
    color_seq: AtomicU64,
    depth_seq: AtomicU64,
}

impl StreamCallbacks {
    pub fn new(
        resolution: Resolution,
        color: Arc<FrameSlot<ColorFrame>>,
        depth: Arc<FrameSlot<DepthFrame>>,
    ) -> Self {
        Self {
            resolution,
            color,
            depth,
            color_seq: AtomicU64::new(0),
            depth_seq: AtomicU64::new(0),
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// One color frame arrived: `raw` is RGB, 3 bytes per pixel.
    pub fn on_color(&self, raw: &[u8], timestamp: u32) {
        let expected = self.resolution.pixels() * 3;
        if raw.len() < expected {
            log::debug!(
                "Dropping short color frame: {} of {} bytes (ts={})",
                raw.len(),
                expected,
                timestamp
            );
            return;
        }

        let frame = ColorFrame {
            width: self.resolution.width(),
            height: self.resolution.height(),
            data: rgb_to_bgr(&raw[..expected]),
            timestamp,
            sequence: self.color_seq.fetch_add(1, Ordering::Relaxed) + 1,
            received_at: Instant::now(),
        };
        self.color.write(frame);
    }

    /// One depth frame arrived: `raw` holds millimeter samples.
    pub fn on_depth(&self, raw: &[u16], timestamp: u32) {
        let expected = self.resolution.pixels();
        if raw.len() < expected {
            log::debug!(
                "Dropping short depth frame: {} of {} samples (ts={})",
                raw.len(),
                expected,
                timestamp
            );
            return;
        }

        let frame = DepthFrame {
            width: self.resolution.width(),
            height: self.resolution.height(),
            data: raw[..expected].to_vec(),
            timestamp,
            sequence: self.depth_seq.fetch_add(1, Ordering::Relaxed) + 1,
            received_at: Instant::now(),
        };
        self.depth.write(frame);
    }
}

/// Swap the red and blue channel of packed 3-byte pixels.
pub fn rgb_to_bgr(rgb: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rgb.len());
    for px in rgb.chunks_exact(3) {
        out.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    out
}

/// An opened sensor: the claimed device, its stream modes and the two frame
/// slots its callbacks write into.
///
/// The session owns the driver context. Dropping it stops any running
/// streams, closes the device and releases the context. Whoever drives
/// `process_events` on another thread must have stopped doing so first.
pub struct DeviceSession {
    driver: Option<Arc<dyn Driver>>,
    index: u32,
    state: SessionState,
    running: Streams,
    resolution: Option<Resolution>,
    color: Arc<FrameSlot<ColorFrame>>,
    depth: Arc<FrameSlot<DepthFrame>>,
}

impl DeviceSession {
    /// Enumerate devices and claim device `index`.
    pub fn open(driver: Arc<dyn Driver>, index: u32) -> Result<DeviceSession, DeviceError> {
        let count = driver
            .device_count()
            .map_err(|source| DeviceError::OpenFailed { index, source })?;
        if count == 0 {
            return Err(DeviceError::NoDeviceFound);
        }

        driver
            .open_device(index)
            .map_err(|source| DeviceError::OpenFailed { index, source })?;

        log::info!("Opened RGB-D device {} ({} attached)", index, count);

        Ok(DeviceSession {
            driver: Some(driver),
            index,
            state: SessionState::Uninitialized,
            running: Streams::empty(),
            resolution: None,
            color: Arc::new(FrameSlot::new()),
            depth: Arc::new(FrameSlot::new()),
        })
    }

    /// Select both stream modes. Must precede [`start`](Self::start).
    pub fn configure(
        &mut self,
        resolution: Resolution,
        color_format: ColorFormat,
        depth_format: DepthFormat,
    ) -> Result<(), ConfigError> {
        if self.state != SessionState::Uninitialized {
            return Err(ConfigError::InvalidState(self.state));
        }
        let driver = self
            .driver
            .as_ref()
            .ok_or(ConfigError::InvalidState(self.state))?;

        driver
            .set_color_mode(resolution, color_format)
            .map_err(|e| match e {
                DriverError::Unsupported => ConfigError::unsupported_color(resolution, color_format),
                source => ConfigError::Driver {
                    stream: Stream::Color,
                    source,
                },
            })?;
        driver
            .set_depth_mode(resolution, depth_format)
            .map_err(|e| match e {
                DriverError::Unsupported => ConfigError::unsupported_depth(resolution, depth_format),
                source => ConfigError::Driver {
                    stream: Stream::Depth,
                    source,
                },
            })?;

        log::info!(
            "Configured {}x{} color={:?} depth={:?}",
            resolution.width(),
            resolution.height(),
            color_format,
            depth_format
        );
        self.resolution = Some(resolution);
        self.state = SessionState::Configured;
        Ok(())
    }

    /// Register the producer callbacks and start color, then depth.
    ///
    /// If either stream fails, whatever did start is stopped again before
    /// the error is returned and the session is left `Stopped`.
    pub fn start(&mut self) -> Result<(), StartError> {
        let resolution = match (self.state, self.resolution) {
            (SessionState::Configured, Some(resolution)) => resolution,
            _ => return Err(StartError::InvalidState(self.state)),
        };
        let driver = self
            .driver
            .clone()
            .ok_or(StartError::InvalidState(self.state))?;

        driver.set_callbacks(Arc::new(StreamCallbacks::new(
            resolution,
            self.color.clone(),
            self.depth.clone(),
        )));

        for stream in [Stream::Color, Stream::Depth] {
            if let Err(source) = driver.start_stream(stream) {
                log::warn!(
                    "{} stream failed to start ({}), rolling back {:?}",
                    stream,
                    source,
                    self.running
                );
                self.stop_streams();
                driver.clear_callbacks();
                self.state = SessionState::Stopped;
                return Err(StartError::StreamStartFailed { stream, source });
            }
            self.running |= stream.flag();
        }

        log::info!("Streaming color + depth from device {}", self.index);
        self.state = SessionState::Streaming;
        Ok(())
    }

    /// Stop any running streams and close the device. Idempotent.
    pub fn stop(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        self.stop_streams();
        if self.state < SessionState::Stopped {
            self.state = SessionState::Stopped;
        }

        if let Some(driver) = self.driver.take() {
            driver.clear_callbacks();
            match driver.close_device() {
                Ok(()) => log::info!("Closed RGB-D device {}", self.index),
                Err(e) => log::warn!("Closing device {} failed: {}", self.index, e),
            }
            // Last reference releases the driver context.
            drop(driver);
        }
        self.state = SessionState::Closed;
    }

    fn stop_streams(&mut self) {
        let Some(driver) = self.driver.as_ref() else {
            return;
        };
        for stream in [Stream::Depth, Stream::Color] {
            if self.running.contains(stream.flag()) {
                if let Err(e) = driver.stop_stream(stream) {
                    log::warn!("Stopping {} stream failed: {}", stream, e);
                }
                self.running.remove(stream.flag());
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn running_streams(&self) -> Streams {
        self.running
    }

    pub fn device_index(&self) -> u32 {
        self.index
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    /// Consumer view of this session's slots.
    pub fn exchange(&self) -> FrameExchange {
        FrameExchange::new(self.color.clone(), self.depth.clone())
    }

    pub(crate) fn driver(&self) -> Option<Arc<dyn Driver>> {
        self.driver.clone()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.stop();
    }
}
