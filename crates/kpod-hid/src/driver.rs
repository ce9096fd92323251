//! KPod polling driver.
//!
//! One [`Driver`] owns one device. Construction opens the transport,
//! silences the pod and starts a `kpod-poll` thread; from then on all
//! decoding and state updates happen on that thread and reach the outside
//! world only through the [`EventSink`] hooks.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use kpod_core::{Command, DeviceState, Response, UpdateReport};
use parking_lot::RwLock;
use tracing::{debug, error, info, trace, warn};

use crate::config::DriverConfig;
use crate::error::{HidError, HidResult};
use crate::sink::{EventSink, StopReason, dispatch};
use crate::transport::{HidTransport, Transport};

/// Mute is forced on at startup so the pod does not beep.
const STARTUP_MUTE: bool = true;
/// Scale applied at startup.
const STARTUP_SCALE: u8 = 0;

/// State visible to both the owner and the poll thread.
struct Shared {
    running: AtomicBool,
    sink: RwLock<Option<Arc<dyn EventSink>>>,
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn sink(&self) -> Option<Arc<dyn EventSink>> {
        self.sink.read().clone()
    }

    fn emit(&self, event: kpod_core::PodEvent) {
        match self.sink() {
            Some(sink) => dispatch(sink.as_ref(), event),
            None => trace!(?event, "No event receiver, dropping event"),
        }
    }

    fn notify_stopped(&self, reason: &StopReason) {
        if let Some(sink) = self.sink() {
            sink.on_stopped(reason);
        }
    }
}

/// Transport wrapper that closes the device exactly once, on drop at the
/// latest.
struct Link<T: Transport> {
    transport: T,
    closed: bool,
}

impl<T: Transport> Link<T> {
    fn new(transport: T) -> Self {
        Self { transport, closed: false }
    }

    /// Write a command and read its response.
    fn transact(&mut self, command: &Command, timeout: Option<Duration>) -> HidResult<Response> {
        self.transport.write(command)?;
        self.transport.read(timeout)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.transport.close();
        }
    }
}

impl<T: Transport> Drop for Link<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Handle to a running KPod driver.
pub struct Driver {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver").finish_non_exhaustive()
    }
}

impl Driver {
    /// Open the KPod described by `config` over `hidapi` and start polling.
    ///
    /// # Errors
    /// Returns [`HidError::DeviceNotFound`] if no matching device can be
    /// opened, or [`HidError::DeviceInitFailure`] if the startup configure
    /// command fails.
    pub fn open(config: DriverConfig, sink: Option<Arc<dyn EventSink>>) -> HidResult<Self> {
        let (vendor_id, product_id) = (config.vendor_id, config.product_id);
        Self::start(move || HidTransport::open(vendor_id, product_id), config, sink)
    }

    /// Start a driver on a transport produced by `open`.
    ///
    /// `open` runs on the poll thread, so the transport never crosses
    /// threads. This call still waits for open and configure to finish and
    /// reports their errors synchronously; no polling happens on failure.
    ///
    /// # Errors
    /// Returns whatever `open` fails with, or
    /// [`HidError::DeviceInitFailure`] if configuring the device fails.
    pub fn start<T, F>(
        open: F,
        config: DriverConfig,
        sink: Option<Arc<dyn EventSink>>,
    ) -> HidResult<Self>
    where
        T: Transport + 'static,
        F: FnOnce() -> HidResult<T> + Send + 'static,
    {
        let shared = Arc::new(Shared { running: AtomicBool::new(true), sink: RwLock::new(sink) });
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<HidResult<()>>(1);

        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("kpod-poll".to_string())
            .spawn(move || {
                let link = match open_and_configure(open, config.read_timeout) {
                    Ok(link) => link,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                run_poll_thread(link, &thread_shared, &config);
            })
            .map_err(|e| HidError::DeviceInitFailure(format!("Failed to spawn poll thread: {e}")))?;

        let startup = ready_rx.recv().unwrap_or_else(|_| {
            Err(HidError::DeviceInitFailure("poll thread exited during startup".to_string()))
        });

        if let Err(e) = startup {
            shared.running.store(false, Ordering::Release);
            let _ = thread.join();
            return Err(e);
        }

        debug!("KPod poll thread started");
        Ok(Self { shared, thread: Some(thread) })
    }

    /// Replace the event receiver. `None` detaches it; events raised
    /// meanwhile are dropped.
    pub fn set_event_receiver(&self, sink: Option<Arc<dyn EventSink>>) {
        *self.shared.sink.write() = sink;
    }

    /// Ask the poll loop to exit at its next iteration. Does not wait.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
    }

    /// Stop polling and wait for the poll thread to close the device.
    ///
    /// Waits at most one poll interval plus one round trip, unless the
    /// device stops answering a read without a timeout configured. Calling
    /// it again is a no-op.
    pub fn close(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("KPod poll thread panicked");
        }
    }

    /// Whether the poll thread is still alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_and_configure<T, F>(open: F, timeout: Option<Duration>) -> HidResult<Link<T>>
where
    T: Transport,
    F: FnOnce() -> HidResult<T>,
{
    let mut link = Link::new(open()?);

    let configure = Command::configure(STARTUP_SCALE, STARTUP_MUTE)?;
    let reply = link
        .transact(&configure, timeout)
        .map_err(|e| HidError::DeviceInitFailure(format!("configure failed: {e}")))?;
    // The firmware's echo is not checked; a stray reply does not fail startup
    trace!(
        ?reply,
        echo_matches = reply.opcode_byte() == configure.opcode_byte(),
        "Configure reply"
    );

    debug!(mute = STARTUP_MUTE, scale = STARTUP_SCALE, "KPod configured");
    Ok(link)
}

/// Body of the poll thread. Always closes the link and reports why it ended.
fn run_poll_thread<T: Transport>(mut link: Link<T>, shared: &Shared, config: &DriverConfig) {
    let mut state = DeviceState::new(STARTUP_MUTE, STARTUP_SCALE);

    let outcome =
        panic::catch_unwind(AssertUnwindSafe(|| poll_loop(&mut link, &mut state, shared, config)));

    let reason = match outcome {
        Ok(Ok(())) => {
            info!("KPod polling stopped");
            StopReason::Requested
        }
        Ok(Err(e)) => {
            error!(error = %e, "KPod polling failed");
            StopReason::Transport(e.to_string())
        }
        Err(payload) if !shared.is_running() => {
            debug!(panic = %panic_message(payload.as_ref()), "Ignoring panic during shutdown");
            StopReason::Requested
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(panic = %message, "KPod polling panicked");
            StopReason::Panicked(message)
        }
    };

    shared.running.store(false, Ordering::Release);
    link.close();
    shared.notify_stopped(&reason);
}

fn poll_loop<T: Transport>(
    link: &mut Link<T>,
    state: &mut DeviceState,
    shared: &Shared,
    config: &DriverConfig,
) -> HidResult<()> {
    let request = Command::get_update();

    while shared.is_running() {
        thread::sleep(config.poll_interval);

        let response = link.transact(&request, config.read_timeout)?;
        let report = match UpdateReport::decode(&response) {
            Ok(report) => report,
            Err(e) => {
                trace!(error = %e, ?response, "Discarding stale response");
                continue;
            }
        };

        for event in state.apply(&report) {
            shared.emit(event);
        }
    }

    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{DriverEvent, FnSink};
    use assert_matches::assert_matches;
    use kpod_core::PodEvent;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    /// One scripted write/read exchange.
    enum Step {
        Reply([u8; 8]),
        FailWrite,
        FailRead,
        /// Announce the read on `entered`, wait on `release`, then panic
        BlockThenPanic { entered: std_mpsc::Sender<()>, release: std_mpsc::Receiver<()> },
    }

    #[derive(Default)]
    struct Script {
        steps: Mutex<VecDeque<Step>>,
        writes: Mutex<Vec<[u8; 8]>>,
        closes: AtomicUsize,
        /// Answer idle updates once the steps run out instead of failing
        idle_forever: bool,
    }

    impl Script {
        fn new(steps: Vec<Step>, idle_forever: bool) -> Arc<Self> {
            Arc::new(Self { steps: Mutex::new(steps.into()), idle_forever, ..Self::default() })
        }

        fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    struct FakeTransport(Arc<Script>);

    impl Transport for FakeTransport {
        fn write(&mut self, command: &Command) -> HidResult<()> {
            self.0.writes.lock().push(*command.as_bytes());
            let mut steps = self.0.steps.lock();
            if matches!(steps.front(), Some(Step::FailWrite)) {
                steps.pop_front();
                return Err(HidError::IoFailure("write failed".to_string()));
            }
            Ok(())
        }

        fn read(&mut self, _timeout: Option<Duration>) -> HidResult<Response> {
            let step = self.0.steps.lock().pop_front();
            match step {
                Some(Step::Reply(bytes)) => Ok(Response::new(bytes)),
                Some(Step::FailRead | Step::FailWrite) => {
                    Err(HidError::IoFailure("read failed".to_string()))
                }
                Some(Step::BlockThenPanic { entered, release }) => {
                    let _ = entered.send(());
                    let _ = release.recv();
                    panic!("device vanished mid-read");
                }
                None if self.0.idle_forever => Ok(Response::new(update(0, 0))),
                None => Err(HidError::IoFailure("device gone".to_string())),
            }
        }

        fn close(&mut self) {
            self.0.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Transport that must stay on the thread that created it.
    struct ThreadBoundTransport {
        inner: FakeTransport,
        _not_send: std::rc::Rc<()>,
    }

    impl Transport for ThreadBoundTransport {
        fn write(&mut self, command: &Command) -> HidResult<()> {
            self.inner.write(command)
        }

        fn read(&mut self, timeout: Option<Duration>) -> HidResult<Response> {
            self.inner.read(timeout)
        }

        fn close(&mut self) {
            self.inner.close();
        }
    }

    fn update(ticks: i16, controls: u8) -> [u8; 8] {
        let [lo, hi] = ticks.to_le_bytes();
        [b'u', lo, hi, controls, 0, 0, 0, 0]
    }

    fn configure_ack() -> Step {
        Step::Reply([b'C', 1, 0, 0, 0, 0, 0, 0])
    }

    fn fast_config() -> DriverConfig {
        DriverConfig::default().with_poll_interval(Duration::from_millis(1))
    }

    fn recording_sink() -> (Arc<dyn EventSink>, std_mpsc::Receiver<DriverEvent>) {
        let (tx, rx) = std_mpsc::channel();
        let sink = FnSink::new(move |event| {
            let _ = tx.send(event);
        });
        (Arc::new(sink), rx)
    }

    fn start(script: &Arc<Script>, sink: Option<Arc<dyn EventSink>>) -> HidResult<Driver> {
        let transport = FakeTransport(Arc::clone(script));
        Driver::start(move || Ok(transport), fast_config(), sink)
    }

    /// Collect events until the driver reports it stopped.
    fn events_until_stopped(rx: &std_mpsc::Receiver<DriverEvent>) -> Vec<DriverEvent> {
        let mut events = Vec::new();
        loop {
            let event = rx.recv_timeout(RECV_TIMEOUT).expect("driver should report events");
            let done = matches!(event, DriverEvent::Stopped(_));
            events.push(event);
            if done {
                return events;
            }
        }
    }

    #[test]
    fn test_missing_device_fails_without_polling() {
        let (sink, rx) = recording_sink();
        let result = Driver::start(
            || Err::<FakeTransport, _>(HidError::DeviceNotFound),
            fast_config(),
            Some(sink),
        );

        assert_matches!(result, Err(HidError::DeviceNotFound));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_configure_failure_closes_transport() {
        let script = Script::new(vec![Step::FailWrite], false);

        let result = start(&script, None);

        assert_matches!(result, Err(HidError::DeviceInitFailure(_)));
        assert_eq!(script.closes(), 1);
        assert_eq!(script.writes.lock().len(), 1);
    }

    #[test]
    fn test_mutes_device_before_polling() {
        let script = Script::new(vec![configure_ack(), Step::Reply(update(0, 0))], false);
        let (sink, rx) = recording_sink();

        let mut driver = start(&script, Some(sink)).expect("driver should start");
        events_until_stopped(&rx);
        driver.close();

        let writes = script.writes.lock();
        assert_eq!(writes[0], [b'C', 0x01, 0, 0, 0, 0, 0, 0]);
        assert!(writes[1..].iter().all(|w| *w == [b'u', 0, 0, 0, 0, 0, 0, 0]));
        assert_eq!(writes.len(), 3);
    }

    #[test]
    fn test_updates_become_events() {
        let script = Script::new(
            vec![
                configure_ack(),
                Step::Reply(update(0, 0x20)),
                Step::Reply(update(3, 0x20)),
                // stale reply: ignored, no state change
                Step::Reply([b'=', 0x10, 0, 0x4f, 0, 0, 0, 0]),
                Step::Reply(update(0, 0x20 | 0x02)),
                Step::Reply(update(-5, 0x40 | 0x10 | 0x01)),
                Step::Reply(update(0, 0x40)),
            ],
            false,
        );
        let (sink, rx) = recording_sink();

        let mut driver = start(&script, Some(sink)).expect("driver should start");
        let events = events_until_stopped(&rx);
        driver.close();

        assert_eq!(
            events,
            vec![
                DriverEvent::Pod(PodEvent::Rocker { position: 1 }),
                DriverEvent::Pod(PodEvent::Rotate { position: 3 }),
                DriverEvent::Pod(PodEvent::Button { buttons: 2, tap_hold: false }),
                DriverEvent::Pod(PodEvent::Rotate { position: -2 }),
                DriverEvent::Pod(PodEvent::Button { buttons: 1, tap_hold: true }),
                DriverEvent::Pod(PodEvent::Rocker { position: 2 }),
                DriverEvent::Stopped(StopReason::Transport("I/O failure: device gone".to_string())),
            ]
        );
    }

    #[test]
    fn test_io_failure_ends_loop_and_closes_once() {
        let script = Script::new(
            vec![configure_ack(), Step::Reply(update(0, 0)), Step::FailRead],
            false,
        );
        let (sink, rx) = recording_sink();

        let mut driver = start(&script, Some(sink)).expect("driver should start");
        let events = events_until_stopped(&rx);
        assert_matches!(events.last(), Some(DriverEvent::Stopped(StopReason::Transport(_))));

        driver.close();
        driver.close();
        assert!(!driver.is_running());
        assert_eq!(script.closes(), 1);
        // nothing polled after the failure
        assert_eq!(script.writes.lock().len(), 3);
    }

    #[test]
    fn test_close_stops_running_loop() {
        let script = Script::new(vec![configure_ack()], true);
        let (sink, rx) = recording_sink();

        let mut driver = start(&script, Some(sink)).expect("driver should start");
        assert!(driver.is_running());

        // first idle update reports the rocker leaving the sentinel
        assert_eq!(
            rx.recv_timeout(RECV_TIMEOUT).ok(),
            Some(DriverEvent::Pod(PodEvent::Rocker { position: 0 }))
        );

        driver.close();

        assert!(!driver.is_running());
        assert_eq!(script.closes(), 1);
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events, vec![DriverEvent::Stopped(StopReason::Requested)]);
    }

    #[test]
    fn test_receiver_can_be_swapped() {
        let script = Script::new(vec![configure_ack()], true);

        let mut driver = start(&script, None).expect("driver should start");
        let (sink, rx) = recording_sink();
        driver.set_event_receiver(Some(sink));
        driver.close();

        assert_eq!(rx.try_iter().last(), Some(DriverEvent::Stopped(StopReason::Requested)));
    }

    #[test]
    fn test_panicking_sink_is_fatal_to_loop() {
        let script = Script::new(vec![configure_ack(), Step::Reply(update(1, 0))], true);
        let (tx, rx) = std_mpsc::channel();
        let sink = FnSink::new(move |event| {
            if matches!(event, DriverEvent::Pod(PodEvent::Rotate { .. })) {
                panic!("receiver blew up");
            }
            let _ = tx.send(event);
        });

        let mut driver = start(&script, Some(Arc::new(sink))).expect("driver should start");
        let events = events_until_stopped(&rx);
        driver.close();

        assert_eq!(
            events.last(),
            Some(&DriverEvent::Stopped(StopReason::Panicked("receiver blew up".to_string())))
        );
        assert_eq!(script.closes(), 1);
    }

    #[test]
    fn test_drop_requests_stop() {
        let script = Script::new(vec![configure_ack()], true);
        let (sink, rx) = recording_sink();

        let driver = start(&script, Some(sink)).expect("driver should start");
        drop(driver);

        let events = events_until_stopped(&rx);
        assert_eq!(events.last(), Some(&DriverEvent::Stopped(StopReason::Requested)));
    }

    #[test]
    fn test_write_failure_ends_loop_and_closes_once() {
        let script = Script::new(
            vec![configure_ack(), Step::Reply(update(0, 0)), Step::FailWrite],
            false,
        );
        let (sink, rx) = recording_sink();

        let mut driver = start(&script, Some(sink)).expect("driver should start");
        let events = events_until_stopped(&rx);
        assert_matches!(events.last(), Some(DriverEvent::Stopped(StopReason::Transport(_))));

        driver.close();
        driver.close();
        assert_eq!(script.closes(), 1);
        assert_eq!(script.writes.lock().len(), 3);
    }

    #[test]
    fn test_panic_after_stop_is_reported_as_requested() {
        let (entered_tx, entered_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel();
        let script = Script::new(
            vec![
                configure_ack(),
                Step::BlockThenPanic { entered: entered_tx, release: release_rx },
            ],
            false,
        );
        let (sink, rx) = recording_sink();

        let mut driver = start(&script, Some(sink)).expect("driver should start");
        entered_rx.recv_timeout(RECV_TIMEOUT).expect("poll loop should reach the read");

        driver.stop();
        release_tx.send(()).expect("read should still be waiting");

        let events = events_until_stopped(&rx);
        driver.close();

        assert_eq!(events.last(), Some(&DriverEvent::Stopped(StopReason::Requested)));
        assert_eq!(script.closes(), 1);
    }

    #[test]
    fn test_configure_reply_echo_is_not_enforced() {
        let script = Script::new(
            vec![Step::Reply([b'u', 0, 0, 0, 0, 0, 0, 0]), Step::Reply(update(2, 0))],
            false,
        );
        let (sink, rx) = recording_sink();

        let mut driver = start(&script, Some(sink)).expect("driver should start");
        let events = events_until_stopped(&rx);
        driver.close();

        assert_eq!(events[0], DriverEvent::Pod(PodEvent::Rotate { position: 2 }));
    }

    #[test]
    fn test_transport_need_not_be_send() {
        let script = Script::new(vec![configure_ack(), Step::Reply(update(-1, 0))], false);
        let (sink, rx) = recording_sink();

        let thread_script = Arc::clone(&script);
        let mut driver = Driver::start(
            move || {
                Ok(ThreadBoundTransport {
                    inner: FakeTransport(thread_script),
                    _not_send: std::rc::Rc::new(()),
                })
            },
            fast_config(),
            Some(sink),
        )
        .expect("driver should start");
        let events = events_until_stopped(&rx);
        driver.close();

        assert_eq!(events[0], DriverEvent::Pod(PodEvent::Rotate { position: -1 }));
        assert_eq!(script.closes(), 1);
    }
}
