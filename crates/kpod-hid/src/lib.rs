//! KPod HID - Elecraft KPod transport and polling driver.
//!
//! This crate owns the I/O side of the pod: a narrow [`Transport`] contract
//! with an `hidapi` implementation, and the [`Driver`] that configures the
//! device, polls it from a dedicated thread and hands decoded events to an
//! [`EventSink`].
//!
//! Shutdown is cooperative. [`Driver::close`] clears a flag and waits for the
//! poll thread, so a device that never answers a read will hold the close
//! until the read returns. Set [`DriverConfig::read_timeout`] to bound it.

pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod sink;
pub mod transport;

pub use config::DriverConfig;
pub use device::{KPOD_PID, KPOD_VID, is_kpod_connected};
pub use driver::Driver;
pub use error::{HidError, HidResult};
pub use sink::{ChannelSink, DriverEvent, EventSink, FnSink, LogSink, StopReason};
pub use transport::{HidTransport, Transport};
