use std::fmt;
use std::time::Instant;

/// Sensor resolution tier.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    /// 320x240.
    Low = 0,
    /// 640x480.
    Medium = 1,
    /// 1280x1024.
    High = 2,
}

impl Resolution {
    pub fn width(self) -> usize {
        match self {
            Resolution::Low => 320,
            Resolution::Medium => 640,
            Resolution::High => 1280,
        }
    }

    pub fn height(self) -> usize {
        match self {
            Resolution::Low => 240,
            Resolution::Medium => 480,
            Resolution::High => 1024,
        }
    }

    /// Number of pixels in one frame.
    pub fn pixels(self) -> usize {
        self.width() * self.height()
    }
}

/// Color stream format as delivered by the sensor.
///
/// Both formats arrive as 3x8-bit pixels in RGB order and are normalized to
/// BGR before they reach a slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorFormat {
    /// Raw RGB from the Bayer pipeline.
    Rgb8 = 0,
    /// On-camera YUV, converted to RGB by the driver.
    YuvRgb = 1,
}

/// Depth stream format. Every variant yields 16-bit millimeter values.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthFormat {
    /// Millimeters from the sensor plane.
    Depth16 = 0,
    /// Millimeters, registered to the color camera's viewpoint.
    Registered = 1,
}

/// One of the two sensor streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Color,
    Depth,
}

impl Stream {
    pub(crate) fn flag(self) -> Streams {
        match self {
            Stream::Color => Streams::COLOR,
            Stream::Depth => Streams::DEPTH,
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Color => f.write_str("color"),
            Stream::Depth => f.write_str("depth"),
        }
    }
}

bitflags::bitflags! {
    /// Set of streams currently running on a device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Streams: u8 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
    }
}

/// Session lifecycle. Transitions only move forward.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Uninitialized = 0,
    Configured = 1,
    Streaming = 2,
    Stopped = 3,
    Closed = 4,
}

/// Verbosity of the sensor driver's own logging.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverLogLevel {
    Fatal = 0,
    Error = 1,
    Warning = 2,
    Notice = 3,
    Info = 4,
    Debug = 5,
}

/// A color frame, pixels stored row-major in BGR order.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorFrame {
    pub width: usize,
    pub height: usize,
    /// `width * height * 3` bytes, BGR.
    pub data: Vec<u8>,
    /// Driver timestamp, passed through untouched.
    pub timestamp: u32,
    /// Per-stream arrival counter, starting at 1.
    pub sequence: u64,
    /// Host time at which the producer callback ran.
    pub received_at: Instant,
}

impl ColorFrame {
    /// BGR triple at (x, y), or `None` when out of bounds.
    pub fn pixel(&self, x: usize, y: usize) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y * self.width + x) * 3;
        let px = self.data.get(offset..offset + 3)?;
        Some([px[0], px[1], px[2]])
    }
}

/// A depth frame of raw 16-bit millimeter distances. Zero means no reading.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthFrame {
    pub width: usize,
    pub height: usize,
    /// `width * height` samples, row-major.
    pub data: Vec<u16>,
    pub timestamp: u32,
    pub sequence: u64,
    pub received_at: Instant,
}

impl DepthFrame {
    pub fn depth_mm(&self, x: usize, y: usize) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(y * self.width + x).copied()
    }
}

/// One color and one depth frame handed out together by a single poll.
#[derive(Debug, Clone, PartialEq)]
pub struct SynchronizedPair {
    pub color: ColorFrame,
    pub depth: DepthFrame,
}

impl SynchronizedPair {
    /// Host arrival gap between the two frames.
    pub fn skew(&self) -> std::time::Duration {
        arrival_gap(self.color.received_at, self.depth.received_at)
    }
}

pub(crate) fn arrival_gap(a: Instant, b: Instant) -> std::time::Duration {
    if a > b {
        a - b
    } else {
        b - a
    }
}

/// An attached sensor as seen on the USB bus.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub address: u8,
}
