//! KPod Core - wire protocol and decode state for the Elecraft KPod.
//!
//! This crate holds everything that can be described without touching a USB
//! device: the 8-byte command and response reports, the control bitfield
//! layout, and the [`DeviceState`] machine that turns update reports into
//! [`PodEvent`]s. The I/O side lives in `kpod-hid`.

pub mod command;
pub mod error;
pub mod event;
pub mod report;
pub mod state;

pub use command::{Command, Opcode, REPORT_LEN};
pub use error::{Error, Result};
pub use event::PodEvent;
pub use report::{Controls, Response, UpdateReport};
pub use state::{DeviceState, ROCKER_SENTINEL};
