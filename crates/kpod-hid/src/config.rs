//! Driver configuration.

use std::time::Duration;

use crate::device::{KPOD_PID, KPOD_VID};

/// Default delay between two polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Settings for one [`crate::Driver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Sleep between polls. Best effort, drifts under load.
    pub poll_interval: Duration,
    /// Read timeout for each response; `None` blocks until the device answers
    pub read_timeout: Option<Duration>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            vendor_id: KPOD_VID,
            product_id: KPOD_PID,
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_timeout: None,
        }
    }
}

impl DriverConfig {
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }
}
