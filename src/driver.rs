//! The narrow seam between the acquisition core and a sensor backend.

use crate::error::DriverError;
use crate::session::StreamCallbacks;
use crate::types::{ColorFormat, DepthFormat, Resolution, Stream};
use std::sync::Arc;

/// A sensor driver context with at most one claimed device.
///
/// All methods take `&self`: the event pump thread calls `process_events`
/// while the controlling thread drives the lifecycle. Backends deliver frames
/// by calling into the registered [`StreamCallbacks`], and only from inside
/// `process_events`.
pub trait Driver: Send + Sync {
    /// Number of attached devices.
    fn device_count(&self) -> Result<u32, DriverError>;

    /// Claim device `index`.
    fn open_device(&self, index: u32) -> Result<(), DriverError>;

    /// Select the color mode. `Err(DriverError::Unsupported)` if the
    /// firmware does not offer it.
    fn set_color_mode(&self, resolution: Resolution, format: ColorFormat)
        -> Result<(), DriverError>;

    /// Select the depth mode.
    fn set_depth_mode(&self, resolution: Resolution, format: DepthFormat)
        -> Result<(), DriverError>;

    /// Route both streams' frames to `callbacks`.
    fn set_callbacks(&self, callbacks: Arc<StreamCallbacks>);

    /// Forget the registered callbacks.
    fn clear_callbacks(&self);

    fn start_stream(&self, stream: Stream) -> Result<(), DriverError>;

    fn stop_stream(&self, stream: Stream) -> Result<(), DriverError>;

    /// Release the claimed device.
    fn close_device(&self) -> Result<(), DriverError>;

    /// Handle pending USB events, dispatching any completed frames.
    ///
    /// May block for a driver-defined timeout.
    fn process_events(&self) -> Result<(), DriverError>;
}
