//! Running device state and update decoding.

use tracing::trace;

use crate::event::PodEvent;
use crate::report::UpdateReport;

/// Initial rocker value. Outside the physical 0-2 range so the first real
/// reading always raises a rocker event.
pub const ROCKER_SENTINEL: u8 = 3;

/// Mutable state of one pod, owned by the polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    encoder: i64,
    rocker: u8,
    mute: bool,
    scale: u8,
}

impl DeviceState {
    /// Fresh state for a device configured with `mute` and `scale`.
    #[must_use]
    pub const fn new(mute: bool, scale: u8) -> Self {
        Self { encoder: 0, rocker: ROCKER_SENTINEL, mute, scale }
    }

    /// Cumulative encoder position.
    #[must_use]
    pub const fn encoder(&self) -> i64 {
        self.encoder
    }

    /// Last observed rocker position.
    #[must_use]
    pub const fn rocker(&self) -> u8 {
        self.rocker
    }

    #[must_use]
    pub const fn mute(&self) -> bool {
        self.mute
    }

    #[must_use]
    pub const fn scale(&self) -> u8 {
        self.scale
    }

    /// Fold one update into the state and return the events it raises,
    /// in rotate, button, rocker order.
    ///
    /// - a non-zero tick delta moves the encoder and raises `Rotate`
    /// - a non-zero button mask raises `Button` (level, so a held button
    ///   repeats on every poll)
    /// - a rocker value different from the stored one raises `Rocker`
    pub fn apply(&mut self, report: &UpdateReport) -> Vec<PodEvent> {
        let mut events = Vec::new();

        if report.ticks != 0 {
            self.encoder += i64::from(report.ticks);
            events.push(PodEvent::Rotate { position: self.encoder });
        }

        let controls = report.controls;
        let buttons = controls.buttons();
        if buttons != 0 {
            events.push(PodEvent::Button { buttons, tap_hold: controls.tap_hold() });
        }

        let rocker = controls.rocker();
        if rocker != self.rocker {
            trace!(from = self.rocker, to = rocker, "Rocker moved");
            self.rocker = rocker;
            events.push(PodEvent::Rocker { position: rocker });
        }

        events
    }
}

impl Default for DeviceState {
    /// State after the startup configure: muted, scale 0.
    fn default() -> Self {
        Self::new(true, 0)
    }
}
