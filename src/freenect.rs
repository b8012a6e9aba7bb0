//! libfreenect backend.
//!
//! Links the system `libfreenect`. The library calls its frame callbacks
//! from inside `freenect_process_events` with only a device pointer, so the
//! session's [`StreamCallbacks`] is parked in the device's user-data slot
//! and recovered by static trampolines.

use crate::driver::Driver;
use crate::error::DriverError;
use crate::session::StreamCallbacks;
use crate::types::{ColorFormat, DepthFormat, DriverLogLevel, Resolution, Stream};
use std::ffi::{c_int, c_void};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[repr(C)]
struct FreenectContext {
    _private: [u8; 0],
}

#[repr(C)]
struct FreenectDevice {
    _private: [u8; 0],
}

/// Mirrors `freenect_frame_mode`.
#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
struct FrameMode {
    reserved: u32,
    resolution: c_int,
    format: i32,
    bytes: i32,
    width: i16,
    height: i16,
    data_bits_per_pixel: i8,
    padding_bits_per_pixel: i8,
    framerate: i8,
    is_valid: i8,
}

type FrameCallback = Option<unsafe extern "C" fn(*mut FreenectDevice, *mut c_void, u32)>;

const SUBDEVICE_CAMERA: c_int = 0x02;

const VIDEO_RGB: c_int = 0;
const VIDEO_YUV_RGB: c_int = 5;
const DEPTH_REGISTERED: c_int = 4;
const DEPTH_MM: c_int = 5;

#[link(name = "freenect")]
extern "C" {
    fn freenect_init(ctx: *mut *mut FreenectContext, usb_ctx: *mut c_void) -> c_int;
    fn freenect_shutdown(ctx: *mut FreenectContext) -> c_int;
    fn freenect_set_log_level(ctx: *mut FreenectContext, level: c_int);
    fn freenect_select_subdevices(ctx: *mut FreenectContext, subdevs: c_int);
    fn freenect_process_events(ctx: *mut FreenectContext) -> c_int;
    fn freenect_num_devices(ctx: *mut FreenectContext) -> c_int;
    fn freenect_open_device(
        ctx: *mut FreenectContext,
        dev: *mut *mut FreenectDevice,
        index: c_int,
    ) -> c_int;
    fn freenect_close_device(dev: *mut FreenectDevice) -> c_int;
    fn freenect_set_user(dev: *mut FreenectDevice, user: *mut c_void);
    fn freenect_get_user(dev: *mut FreenectDevice) -> *mut c_void;
    fn freenect_set_video_callback(dev: *mut FreenectDevice, cb: FrameCallback);
    fn freenect_set_depth_callback(dev: *mut FreenectDevice, cb: FrameCallback);
    fn freenect_find_video_mode(res: c_int, fmt: c_int) -> FrameMode;
    fn freenect_find_depth_mode(res: c_int, fmt: c_int) -> FrameMode;
    fn freenect_set_video_mode(dev: *mut FreenectDevice, mode: FrameMode) -> c_int;
    fn freenect_set_depth_mode(dev: *mut FreenectDevice, mode: FrameMode) -> c_int;
    fn freenect_start_video(dev: *mut FreenectDevice) -> c_int;
    fn freenect_start_depth(dev: *mut FreenectDevice) -> c_int;
    fn freenect_stop_video(dev: *mut FreenectDevice) -> c_int;
    fn freenect_stop_depth(dev: *mut FreenectDevice) -> c_int;
}

fn check(status: c_int) -> Result<(), DriverError> {
    if status < 0 {
        Err(DriverError::Status(status))
    } else {
        Ok(())
    }
}

/// A libfreenect context with at most one open device.
pub struct FreenectDriver {
    ctx: *mut FreenectContext,
    dev: Mutex<*mut FreenectDevice>,
    // Keeps the pointer stored in the device's user slot alive.
    callbacks: Mutex<Option<Arc<StreamCallbacks>>>,
}

// libfreenect allows process_events on one thread while another starts,
// stops and closes; the device pointer itself is guarded by `dev`.
unsafe impl Send for FreenectDriver {}
unsafe impl Sync for FreenectDriver {}

impl FreenectDriver {
    /// Create the process's driver context, restricted to the camera
    /// subdevice.
    pub fn init(log_level: DriverLogLevel) -> Result<FreenectDriver, DriverError> {
        let mut ctx = std::ptr::null_mut();
        // SAFETY: out-pointer to a local; a null USB context lets libfreenect create its own.
        check(unsafe { freenect_init(&mut ctx, std::ptr::null_mut()) })?;
        if ctx.is_null() {
            return Err(DriverError::Status(-1));
        }

        // SAFETY: ctx was just initialized.
        unsafe {
            freenect_set_log_level(ctx, log_level as c_int);
            freenect_select_subdevices(ctx, SUBDEVICE_CAMERA);
        }
        log::info!("libfreenect context initialized (log level {:?})", log_level);

        Ok(FreenectDriver {
            ctx,
            dev: Mutex::new(std::ptr::null_mut()),
            callbacks: Mutex::new(None),
        })
    }

    fn lock_dev(&self) -> MutexGuard<'_, *mut FreenectDevice> {
        self.dev.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn device(&self) -> Result<*mut FreenectDevice, DriverError> {
        let dev = *self.lock_dev();
        if dev.is_null() {
            Err(DriverError::Status(-1))
        } else {
            Ok(dev)
        }
    }
}

impl Driver for FreenectDriver {
    fn device_count(&self) -> Result<u32, DriverError> {
        // SAFETY: ctx is valid for the lifetime of self.
        let n = unsafe { freenect_num_devices(self.ctx) };
        check(n)?;
        Ok(n as u32)
    }

    fn open_device(&self, index: u32) -> Result<(), DriverError> {
        let mut slot = self.lock_dev();
        if !slot.is_null() {
            return Err(DriverError::Status(-16));
        }
        let mut dev = std::ptr::null_mut();
        // SAFETY: ctx is valid; dev is an out-pointer to a local.
        check(unsafe { freenect_open_device(self.ctx, &mut dev, index as c_int) })?;
        *slot = dev;
        Ok(())
    }

    fn set_color_mode(
        &self,
        resolution: Resolution,
        format: ColorFormat,
    ) -> Result<(), DriverError> {
        let fmt = match format {
            ColorFormat::Rgb8 => VIDEO_RGB,
            ColorFormat::YuvRgb => VIDEO_YUV_RGB,
        };
        // SAFETY: pure table lookup.
        let mode = unsafe { freenect_find_video_mode(resolution as c_int, fmt) };
        if mode.is_valid == 0 {
            return Err(DriverError::Unsupported);
        }
        let dev = self.device()?;
        // SAFETY: dev is open; mode came from libfreenect's own table.
        check(unsafe { freenect_set_video_mode(dev, mode) })
    }

    fn set_depth_mode(
        &self,
        resolution: Resolution,
        format: DepthFormat,
    ) -> Result<(), DriverError> {
        let fmt = match format {
            DepthFormat::Depth16 => DEPTH_MM,
            DepthFormat::Registered => DEPTH_REGISTERED,
        };
        // SAFETY: pure table lookup.
        let mode = unsafe { freenect_find_depth_mode(resolution as c_int, fmt) };
        if mode.is_valid == 0 {
            return Err(DriverError::Unsupported);
        }
        let dev = self.device()?;
        // SAFETY: as above.
        check(unsafe { freenect_set_depth_mode(dev, mode) })
    }

    fn set_callbacks(&self, callbacks: Arc<StreamCallbacks>) {
        let Ok(dev) = self.device() else {
            return;
        };
        let user = Arc::as_ptr(&callbacks) as *mut c_void;
        *self.callbacks.lock().unwrap_or_else(PoisonError::into_inner) = Some(callbacks);
        // SAFETY: `user` stays valid while `self.callbacks` holds the Arc.
        unsafe {
            freenect_set_user(dev, user);
            freenect_set_video_callback(dev, Some(video_trampoline));
            freenect_set_depth_callback(dev, Some(depth_trampoline));
        }
    }

    fn clear_callbacks(&self) {
        if let Ok(dev) = self.device() {
            // SAFETY: dev is open.
            unsafe {
                freenect_set_video_callback(dev, None);
                freenect_set_depth_callback(dev, None);
                freenect_set_user(dev, std::ptr::null_mut());
            }
        }
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn start_stream(&self, stream: Stream) -> Result<(), DriverError> {
        let dev = self.device()?;
        // SAFETY: dev is open.
        check(unsafe {
            match stream {
                Stream::Color => freenect_start_video(dev),
                Stream::Depth => freenect_start_depth(dev),
            }
        })
    }

    fn stop_stream(&self, stream: Stream) -> Result<(), DriverError> {
        let dev = self.device()?;
        // SAFETY: dev is open.
        check(unsafe {
            match stream {
                Stream::Color => freenect_stop_video(dev),
                Stream::Depth => freenect_stop_depth(dev),
            }
        })
    }

    fn close_device(&self) -> Result<(), DriverError> {
        let mut slot = self.lock_dev();
        if slot.is_null() {
            return Ok(());
        }
        let dev = std::mem::replace(&mut *slot, std::ptr::null_mut());
        // SAFETY: dev was opened by us and is no longer reachable through self.
        check(unsafe { freenect_close_device(dev) })
    }

    fn process_events(&self) -> Result<(), DriverError> {
        // SAFETY: ctx is valid for the lifetime of self.
        check(unsafe { freenect_process_events(self.ctx) })
    }
}

impl Drop for FreenectDriver {
    fn drop(&mut self) {
        if let Err(e) = self.close_device() {
            log::warn!("Closing device on context release failed: {}", e);
        }
        // SAFETY: no device remains open and nobody else can reach ctx.
        unsafe {
            freenect_shutdown(self.ctx);
        }
        log::info!("libfreenect context released");
    }
}

unsafe extern "C" fn video_trampoline(dev: *mut FreenectDevice, data: *mut c_void, timestamp: u32) {
    let user = freenect_get_user(dev) as *const StreamCallbacks;
    if user.is_null() || data.is_null() {
        return;
    }
    let callbacks = &*user;
    let len = callbacks.resolution().pixels() * 3;
    let raw = std::slice::from_raw_parts(data as *const u8, len);
    callbacks.on_color(raw, timestamp);
}

unsafe extern "C" fn depth_trampoline(dev: *mut FreenectDevice, data: *mut c_void, timestamp: u32) {
    let user = freenect_get_user(dev) as *const StreamCallbacks;
    if user.is_null() || data.is_null() {
        return;
    }
    let callbacks = &*user;
    let len = callbacks.resolution().pixels();
    let raw = std::slice::from_raw_parts(data as *const u16, len);
    callbacks.on_depth(raw, timestamp);
}
