//! List all connected Kinect cameras.

fn main() {
    env_logger::init();

    match rgbd_bridge::usb::list_devices() {
        Ok(devices) => {
            println!("Found {} Kinect camera(s):", devices.len());
            for (i, dev) in devices.iter().enumerate() {
                println!(
                    "  [{}] {:04x}:{:04x}  Bus={} Addr={}",
                    i, dev.vendor_id, dev.product_id, dev.bus_number, dev.address
                );
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
