//! KPod identity and USB presence probing.

use tracing::debug;

/// Microchip USB Vendor ID (used by Elecraft)
pub const KPOD_VID: u16 = 0x04d8;
/// KPod USB Product ID
pub const KPOD_PID: u16 = 0xf12d;

/// Where a matching device sits on the USB bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbLocation {
    pub bus: u8,
    pub address: u8,
}

/// Find the first USB device with the given ids via USB enumeration.
///
/// This does not open the device, so it succeeds even when the HID node is
/// not accessible to the current user.
#[must_use]
pub fn find_usb(vendor_id: u16, product_id: u16) -> Option<UsbLocation> {
    let devices = match rusb::devices() {
        Ok(d) => d,
        Err(e) => {
            debug!(error = %e, "Failed to enumerate USB devices");
            return None;
        }
    };

    for device in devices.iter() {
        let Ok(desc) = device.device_descriptor() else {
            continue;
        };

        if desc.vendor_id() == vendor_id && desc.product_id() == product_id {
            return Some(UsbLocation { bus: device.bus_number(), address: device.address() });
        }
    }

    None
}

/// Check if a KPod with the given ids is currently on the bus.
#[must_use]
pub fn is_kpod_connected(vendor_id: u16, product_id: u16) -> bool {
    find_usb(vendor_id, product_id).is_some()
}
