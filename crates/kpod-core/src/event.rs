//! Events raised by the KPod driver.

use serde::{Deserialize, Serialize};

/// A discrete change reported by the pod.
///
/// Events are plain values: produced by [`crate::DeviceState::apply`] and
/// handed to the consumer straight away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum PodEvent {
    /// One or more buttons are asserted
    Button { buttons: u8, tap_hold: bool },
    /// The encoder moved; carries the cumulative position
    Rotate { position: i64 },
    /// The rocker switch moved to a new position
    Rocker { position: u8 },
}
