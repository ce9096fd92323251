//! Event delivery.
//!
//! The driver raises events through the [`EventSink`] hooks and never knows
//! what is on the other side. Hooks run on the poll thread, so a sink that
//! feeds a UI or an async runtime should hand the value off rather than do
//! the work inline; [`ChannelSink`] does exactly that.

use kpod_core::PodEvent;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};

/// Why the poll loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// `stop`/`close` was called
    Requested,
    /// A read or write failed
    Transport(String),
    /// The loop panicked, typically inside a sink hook
    Panicked(String),
}

/// Receiver of pod events. Every hook defaults to doing nothing.
pub trait EventSink: Send + Sync {
    /// One or more buttons are asserted.
    fn on_button(&self, buttons: u8, tap_hold: bool) {
        let _ = (buttons, tap_hold);
    }

    /// The encoder moved to cumulative `position`.
    fn on_rotate(&self, position: i64) {
        let _ = position;
    }

    /// The rocker moved to `position`.
    fn on_rocker(&self, position: u8) {
        let _ = position;
    }

    /// The poll loop has ended and the device is closed.
    fn on_stopped(&self, reason: &StopReason) {
        let _ = reason;
    }
}

/// Route a decoded event to the matching hook.
pub(crate) fn dispatch(sink: &dyn EventSink, event: PodEvent) {
    match event {
        PodEvent::Button { buttons, tap_hold } => sink.on_button(buttons, tap_hold),
        PodEvent::Rotate { position } => sink.on_rotate(position),
        PodEvent::Rocker { position } => sink.on_rocker(position),
    }
}

/// Everything a sink can observe, as one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    Pod(PodEvent),
    Stopped(StopReason),
}

/// Logs every event. Handy for bring-up.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn on_button(&self, buttons: u8, tap_hold: bool) {
        info!(buttons = %format!("{buttons:04b}"), tap_hold, "Button");
    }

    fn on_rotate(&self, position: i64) {
        info!(position, "Rotated");
    }

    fn on_rocker(&self, position: u8) {
        info!(position, "Rocker");
    }

    fn on_stopped(&self, reason: &StopReason) {
        info!(?reason, "KPod driver stopped");
    }
}

/// Adapts a closure taking [`DriverEvent`] into a sink.
pub struct FnSink<F> {
    f: F,
}

impl<F> FnSink<F>
where
    F: Fn(DriverEvent) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> EventSink for FnSink<F>
where
    F: Fn(DriverEvent) + Send + Sync,
{
    fn on_button(&self, buttons: u8, tap_hold: bool) {
        (self.f)(DriverEvent::Pod(PodEvent::Button { buttons, tap_hold }));
    }

    fn on_rotate(&self, position: i64) {
        (self.f)(DriverEvent::Pod(PodEvent::Rotate { position }));
    }

    fn on_rocker(&self, position: u8) {
        (self.f)(DriverEvent::Pod(PodEvent::Rocker { position }));
    }

    fn on_stopped(&self, reason: &StopReason) {
        (self.f)(DriverEvent::Stopped(reason.clone()));
    }
}

/// Forwards events into a tokio channel without blocking the poll thread.
///
/// Pod events that do not fit are dropped with a warning. The stop notice is
/// the last thing the poll thread sends, so it waits for room instead; the
/// hook must therefore not be called from inside a tokio runtime.
pub struct ChannelSink {
    tx: mpsc::Sender<DriverEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver that will get its events.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DriverEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    fn send(&self, event: DriverEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => warn!(?event, "Event channel full, dropping event"),
            Err(TrySendError::Closed(event)) => warn!(?event, "Event channel closed, dropping event"),
        }
    }
}

impl EventSink for ChannelSink {
    fn on_button(&self, buttons: u8, tap_hold: bool) {
        self.send(DriverEvent::Pod(PodEvent::Button { buttons, tap_hold }));
    }

    fn on_rotate(&self, position: i64) {
        self.send(DriverEvent::Pod(PodEvent::Rotate { position }));
    }

    fn on_rocker(&self, position: u8) {
        self.send(DriverEvent::Pod(PodEvent::Rocker { position }));
    }

    fn on_stopped(&self, reason: &StopReason) {
        let event = DriverEvent::Stopped(reason.clone());
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                if self.tx.blocking_send(event).is_err() {
                    warn!(?reason, "Event channel closed, dropping stop notice");
                }
            }
            Err(TrySendError::Closed(_)) => {
                warn!(?reason, "Event channel closed, dropping stop notice");
            }
        }
    }
}
