use crate::types::DeviceInfo;
use crate::Result;

/// Microsoft vendor ID.
pub const VID: u16 = 0x045E;
/// Kinect for Xbox 360 camera.
pub const PID_CAMERA: u16 = 0x02AE;
/// Kinect for Windows camera.
pub const PID_CAMERA_K4W: u16 = 0x02BF;

/// Check whether a USB descriptor belongs to a Kinect camera endpoint.
/// The motor and audio endpoints enumerate separately and are skipped.
pub fn is_kinect_camera(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == VID && (product_id == PID_CAMERA || product_id == PID_CAMERA_K4W)
}

/// List attached Kinect cameras without opening them.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let mut devices = Vec::new();

    for device in rusb::devices()?.iter() {
        let desc = match device.device_descriptor() {
            Ok(desc) => desc,
            Err(e) => {
                log::warn!(
                    "Skipping USB device {}:{}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                );
                continue;
            }
        };

        if !is_kinect_camera(desc.vendor_id(), desc.product_id()) {
            continue;
        }

        devices.push(DeviceInfo {
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
            bus_number: device.bus_number(),
            address: device.address(),
        });
    }

    log::debug!("Found {} Kinect camera(s)", devices.len());
    Ok(devices)
}
