//! # rgbd-bridge - RGB-D acquisition bridge for Kinect-class sensors
//!
//! Turns a driver that reports color and depth frames through asynchronous
//! callbacks into a pull interface. Provides:
//! - Single-frame "latest wins" slots filled from driver callbacks
//! - A background event pump driving the driver's event loop
//! - Non-blocking acquisition of synchronized color+depth pairs
//! - Ordered init and teardown with no callbacks after shutdown
//! - A libfreenect backend (`freenect` feature) and a simulated sensor
//! - C FFI for integration with C/C++ consumers
//!
//! ## Quick Start
//! ```no_run
//! use rgbd_bridge::{LifecycleController, SessionConfig, SimDriver};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let driver = Arc::new(SimDriver::new().synthetic(Duration::from_millis(33)));
//! let mut rgbd = LifecycleController::new(driver, SessionConfig::from_env());
//! rgbd.init().unwrap();
//!
//! loop {
//!     if let Some(pair) = rgbd.try_acquire_pair() {
//!         println!("depth at center: {:?} mm", pair.depth.depth_mm(320, 240));
//!         break;
//!     }
//!     std::thread::sleep(Duration::from_millis(5));
//! }
//! rgbd.shutdown();
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod exchange;
pub mod ffi;
#[cfg(feature = "freenect")]
pub mod freenect;
pub mod lifecycle;
pub mod pump;
pub mod session;
pub mod sim;
pub mod slot;
pub mod types;
pub mod usb;

pub use config::SessionConfig;
pub use driver::Driver;
pub use error::{ConfigError, DeviceError, DriverError, PumpError, RgbdError, StartError};
pub use exchange::{ExchangeStats, FrameExchange};
#[cfg(feature = "freenect")]
pub use freenect::FreenectDriver;
pub use lifecycle::LifecycleController;
pub use pump::EventPump;
pub use session::{DeviceSession, StreamCallbacks};
pub use sim::{SimDriver, SimEvent};
pub use slot::{FrameSlot, SlotStats};
pub use types::*;

/// Result type alias for rgbd-bridge operations.
pub type Result<T> = std::result::Result<T, RgbdError>;
