use crate::types::{ColorFormat, DepthFormat, Resolution, SessionState, Stream};
use std::fmt;

/// Status reported by a sensor backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("mode not offered by the firmware")]
    Unsupported,

    #[error("driver returned status {0}")]
    Status(i32),
}

/// Failures while locating and claiming the sensor.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Driver context init failed: {0}")]
    ContextInit(#[source] DriverError),

    #[error("No RGB-D device found")]
    NoDeviceFound,

    #[error("Could not open device {index}: {source}")]
    OpenFailed {
        index: u32,
        #[source]
        source: DriverError,
    },
}

/// Failures while negotiating stream modes.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unsupported {stream} mode: {resolution:?} {format}")]
    UnsupportedMode {
        stream: Stream,
        resolution: Resolution,
        format: String,
    },

    #[error("Setting {stream} mode failed: {source}")]
    Driver {
        stream: Stream,
        #[source]
        source: DriverError,
    },

    #[error("Cannot configure a session in state {0:?}")]
    InvalidState(SessionState),
}

impl ConfigError {
    pub(crate) fn unsupported_color(resolution: Resolution, format: ColorFormat) -> Self {
        ConfigError::UnsupportedMode {
            stream: Stream::Color,
            resolution,
            format: format!("{:?}", format),
        }
    }

    pub(crate) fn unsupported_depth(resolution: Resolution, format: DepthFormat) -> Self {
        ConfigError::UnsupportedMode {
            stream: Stream::Depth,
            resolution,
            format: format!("{:?}", format),
        }
    }
}

/// Failures while bringing the streams up.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("{stream} stream failed to start: {source}")]
    StreamStartFailed {
        stream: Stream,
        #[source]
        source: DriverError,
    },

    #[error("Failed to spawn event pump thread: {0}")]
    PumpSpawn(#[source] std::io::Error),

    #[error("Cannot start a session in state {0:?}")]
    InvalidState(SessionState),
}

/// Fault reported by the driver's event-processing call. Terminal for the pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PumpError {
    #[error("Event processing failed: {0}")]
    EventsFailed(DriverError),
}

/// Any error surfaced by the acquisition bridge.
#[derive(Debug, thiserror::Error)]
pub enum RgbdError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Start(#[from] StartError),

    #[error(transparent)]
    Pump(#[from] PumpError),

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Session already shut down")]
    Closed,

    #[error("Backend not available: {0}")]
    BackendUnavailable(&'static str),

    #[error("Buffer too small: need {needed} elements, got {given}")]
    BufferTooSmall { needed: usize, given: usize },
}

/// Thread-safe last-error storage for the C FFI layer.
pub(crate) struct LastError {
    message: std::sync::Mutex<String>,
}

impl LastError {
    pub const fn new() -> Self {
        Self {
            message: std::sync::Mutex::new(String::new()),
        }
    }

    pub fn set(&self, err: &RgbdError) {
        if let Ok(mut msg) = self.message.lock() {
            *msg = fmt::format(format_args!("{}\0", err));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut msg) = self.message.lock() {
            msg.clear();
        }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_char {
        match self.message.lock() {
            Ok(msg) if !msg.is_empty() => msg.as_ptr() as *const std::ffi::c_char,
            _ => std::ptr::null(),
        }
    }
}
