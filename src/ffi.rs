//! C FFI layer for rgbd-bridge.
//!
//! Provides an opaque handle-based API for C/C++ consumers.
//! The generated C header is written to `include/rgbd_bridge.h` by cbindgen.

use crate::config::SessionConfig;
use crate::driver::Driver;
use crate::error::{LastError, RgbdError};
use crate::lifecycle::LifecycleController;
use crate::sim::SimDriver;
use std::ffi::{c_char, c_int};
use std::sync::Arc;
use std::time::Duration;

/// Last error message for C consumers.
static LAST_ERROR: LastError = LastError::new();

/// libfreenect hardware backend (requires the `freenect` feature).
pub const RGBD_BACKEND_FREENECT: c_int = 0;
/// Simulated sensor emitting a generated pair every ~33 ms.
pub const RGBD_BACKEND_SYNTHETIC: c_int = 1;

/// Opaque session handle for C consumers.
pub struct RgbdSession(LifecycleController);

/// Metadata for a pair copied out by `rgbd_try_acquire_pair`.
#[repr(C)]
pub struct RgbdPairInfo {
    pub width: u32,
    pub height: u32,
    /// Driver timestamps, passed through.
    pub color_timestamp: u32,
    pub depth_timestamp: u32,
    pub color_sequence: u64,
    pub depth_sequence: u64,
    /// Host arrival gap between the two frames, microseconds.
    pub skew_us: u64,
}

/// An attached Kinect camera in C-compatible layout.
#[repr(C)]
pub struct RgbdDeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub address: u8,
}

fn make_driver(backend: c_int, config: &SessionConfig) -> crate::Result<Arc<dyn Driver>> {
    match backend {
        RGBD_BACKEND_SYNTHETIC => Ok(Arc::new(
            SimDriver::new().synthetic(Duration::from_millis(33)),
        )),
        RGBD_BACKEND_FREENECT => freenect_driver(config),
        _ => Err(RgbdError::BackendUnavailable("unknown backend id")),
    }
}

#[cfg(feature = "freenect")]
fn freenect_driver(config: &SessionConfig) -> crate::Result<Arc<dyn Driver>> {
    let driver = crate::freenect::FreenectDriver::init(config.driver_log_level)
        .map_err(crate::error::DeviceError::ContextInit)?;
    Ok(Arc::new(driver))
}

#[cfg(not(feature = "freenect"))]
fn freenect_driver(_config: &SessionConfig) -> crate::Result<Arc<dyn Driver>> {
    Err(RgbdError::BackendUnavailable(
        "built without the `freenect` feature",
    ))
}

/// Create a session for `backend`, configured from `RGBD_*` environment
/// variables. Nothing is opened until `rgbd_session_init`.
/// Returns NULL on error (check rgbd_last_error()).
#[no_mangle]
pub extern "C" fn rgbd_session_new(backend: c_int) -> *mut RgbdSession {
    let config = SessionConfig::from_env();
    match make_driver(backend, &config) {
        Ok(driver) => Box::into_raw(Box::new(RgbdSession(LifecycleController::new(
            driver, config,
        )))),
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

/// Open, configure and start the sensor.
/// Returns 0 on success, -1 on error.
///
/// # Safety
/// `session` must be a pointer returned by `rgbd_session_new`, or null.
#[no_mangle]
pub unsafe extern "C" fn rgbd_session_init(session: *mut RgbdSession) -> c_int {
    if session.is_null() {
        return -1;
    }
    let session = &mut *session;
    match session.0.init() {
        Ok(()) => 0,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Copy the latest synchronized pair into caller buffers.
///
/// `color_out` receives `width * height * 3` BGR bytes, `depth_out`
/// receives `width * height` millimeter samples. `info` may be null.
/// Returns 1 if a pair was copied, 0 if none is ready, -1 on error.
/// Buffers are checked before anything is consumed.
///
/// # Safety
/// `color_out` must be writable for `color_len` bytes and `depth_out` for
/// `depth_len` samples. `info` must be valid or null.
#[no_mangle]
pub unsafe extern "C" fn rgbd_try_acquire_pair(
    session: *const RgbdSession,
    color_out: *mut u8,
    color_len: usize,
    depth_out: *mut u16,
    depth_len: usize,
    info: *mut RgbdPairInfo,
) -> c_int {
    if session.is_null() || color_out.is_null() || depth_out.is_null() {
        return -1;
    }
    let session = &*session;

    let pixels = session.0.config().resolution.pixels();
    for (needed, given) in [(pixels * 3, color_len), (pixels, depth_len)] {
        if given < needed {
            LAST_ERROR.set(&RgbdError::BufferTooSmall { needed, given });
            return -1;
        }
    }

    let Some(pair) = session.0.try_acquire_pair() else {
        return 0;
    };

    std::ptr::copy_nonoverlapping(pair.color.data.as_ptr(), color_out, pair.color.data.len());
    std::ptr::copy_nonoverlapping(pair.depth.data.as_ptr(), depth_out, pair.depth.data.len());

    if !info.is_null() {
        info.write(RgbdPairInfo {
            width: pair.color.width as u32,
            height: pair.color.height as u32,
            color_timestamp: pair.color.timestamp,
            depth_timestamp: pair.depth.timestamp,
            color_sequence: pair.color.sequence,
            depth_sequence: pair.depth.sequence,
            skew_us: pair.skew().as_micros() as u64,
        });
    }
    1
}

/// Current lifecycle state (0 = uninitialized .. 4 = closed), -1 if null.
///
/// # Safety
/// `session` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn rgbd_session_state(session: *const RgbdSession) -> c_int {
    if session.is_null() {
        return -1;
    }
    (*session).0.state() as c_int
}

/// True if the event pump stopped on a driver fault. The session should then
/// be shut down; it is not resumable.
///
/// # Safety
/// `session` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn rgbd_pump_faulted(session: *const RgbdSession) -> bool {
    if session.is_null() {
        return false;
    }
    match (*session).0.pump_fault() {
        Some(fault) => {
            LAST_ERROR.set(&RgbdError::Pump(fault));
            true
        }
        None => false,
    }
}

/// Stop streaming and close the device. Safe to call more than once.
///
/// # Safety
/// `session` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn rgbd_shutdown(session: *mut RgbdSession) {
    if !session.is_null() {
        (*session).0.shutdown();
    }
}

/// Shut down (if needed) and free a session.
///
/// # Safety
/// `session` must be a pointer returned by `rgbd_session_new`, or null.
#[no_mangle]
pub unsafe extern "C" fn rgbd_session_free(session: *mut RgbdSession) {
    if !session.is_null() {
        drop(Box::from_raw(session));
    }
}

/// List attached Kinect cameras.
///
/// Writes up to `max` entries into `out`. Returns the number of devices found,
/// or -1 on error.
///
/// # Safety
/// `out` must point to an array of at least `max` `RgbdDeviceInfo` elements, or be null.
#[no_mangle]
pub unsafe extern "C" fn rgbd_list_devices(out: *mut RgbdDeviceInfo, max: c_int) -> c_int {
    match crate::usb::list_devices() {
        Ok(devices) => {
            let count = devices.len().min(max.max(0) as usize);
            if !out.is_null() {
                for (i, dev) in devices.iter().take(count).enumerate() {
                    out.add(i).write(RgbdDeviceInfo {
                        vendor_id: dev.vendor_id,
                        product_id: dev.product_id,
                        bus_number: dev.bus_number,
                        address: dev.address,
                    });
                }
            }
            count as c_int
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Get the last error message. Returns NULL if no error.
/// The returned pointer is valid until the next rgbd-bridge API call.
#[no_mangle]
pub extern "C" fn rgbd_last_error() -> *const c_char {
    LAST_ERROR.as_ptr()
}

/// Forget the last error message.
#[no_mangle]
pub extern "C" fn rgbd_clear_error() {
    LAST_ERROR.clear();
}
