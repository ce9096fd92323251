//! Report transport.
//!
//! The driver only needs to push an 8-byte command and pull an 8-byte
//! response. [`Transport`] is that contract; [`HidTransport`] implements it
//! on top of `hidapi`.

use std::time::Duration;

use hidapi::{HidApi, HidDevice};
use kpod_core::{Command, REPORT_LEN, Response};
use tracing::{debug, info};

use crate::error::{HidError, HidResult};

/// Blocking report I/O with one device.
pub trait Transport {
    /// Send one 8-byte command report.
    ///
    /// # Errors
    /// Returns [`HidError::IoFailure`] if the report could not be sent whole.
    fn write(&mut self, command: &Command) -> HidResult<()>;

    /// Receive one 8-byte response report. `None` blocks indefinitely.
    ///
    /// # Errors
    /// Returns [`HidError::Timeout`] if nothing arrived in time, or
    /// [`HidError::IoFailure`] on a failed or short read.
    fn read(&mut self, timeout: Option<Duration>) -> HidResult<Response>;

    /// Release the device. Calling it again is a no-op.
    fn close(&mut self);
}

/// `hidapi` backed transport.
pub struct HidTransport {
    device: Option<HidDevice>,
    _api: HidApi,
}

impl HidTransport {
    /// Open the first HID device matching the ids.
    ///
    /// # Errors
    /// Returns [`HidError::DeviceNotFound`] if no matching device can be opened.
    pub fn open(vendor_id: u16, product_id: u16) -> HidResult<Self> {
        let api = HidApi::new().map_err(|e| {
            debug!(error = %e, "Failed to initialize hidapi");
            HidError::DeviceNotFound
        })?;

        let device = api.open(vendor_id, product_id).map_err(|e| {
            debug!(error = %e, vendor_id, product_id, "Failed to open HID device");
            HidError::DeviceNotFound
        })?;

        info!(
            vendor_id = %format!("{vendor_id:04x}"),
            product_id = %format!("{product_id:04x}"),
            "KPod opened"
        );
        Ok(Self { device: Some(device), _api: api })
    }

    fn device(&self) -> HidResult<&HidDevice> {
        self.device.as_ref().ok_or_else(|| HidError::IoFailure("device closed".to_string()))
    }
}

impl Transport for HidTransport {
    fn write(&mut self, command: &Command) -> HidResult<()> {
        // Report id 0: the KPod uses unnumbered reports
        let mut buf = [0u8; REPORT_LEN + 1];
        buf[1..].copy_from_slice(command.as_bytes());

        let written = self.device()?.write(&buf).map_err(|e| HidError::IoFailure(e.to_string()))?;
        if written < REPORT_LEN {
            return Err(HidError::IoFailure(format!("short write: {written} bytes")));
        }
        Ok(())
    }

    fn read(&mut self, timeout: Option<Duration>) -> HidResult<Response> {
        let timeout_ms = timeout.map_or(-1, |t| i32::try_from(t.as_millis()).unwrap_or(i32::MAX));

        let mut buf = [0u8; REPORT_LEN];
        let read = self
            .device()?
            .read_timeout(&mut buf, timeout_ms)
            .map_err(|e| HidError::IoFailure(e.to_string()))?;

        match read {
            0 if timeout.is_some() => Err(HidError::Timeout),
            REPORT_LEN => Ok(Response::new(buf)),
            n => Err(HidError::IoFailure(format!("short read: {n} bytes"))),
        }
    }

    fn close(&mut self) {
        if self.device.take().is_some() {
            debug!("KPod closed");
        }
    }
}
