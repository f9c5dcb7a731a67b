//! A worker that periodically writes a payload to a serial port.
//!
//! The worker starts suspended and blocks on a condition variable until it is resumed. While
//! active it writes the payload, waits for the configured delay, and repeats. Whether it is active
//! is only checked between cycles, so suspending it takes effect once the current wait is over.
//! Stopping it wakes it immediately from either wait and waits for it to exit.

use tracing::{debug, trace, warn};

use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{join_worker, Data, PortWriter};

/// What the transmit worker sends and how long it waits after each send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransmitSettings {
    pub payload: Data,
    pub delay: Duration,
}

/// Settings shared between a session and its transmit worker. The worker reads them once per
/// cycle, so changes apply from the next cycle on.
pub type SharedSettings = Arc<Mutex<TransmitSettings>>;

/// The scheduling state of a transmit worker.
#[derive(Debug, Default)]
struct LoopState {
    /// Whether the worker is sending. It waits without sending while this is false.
    active: bool,
    /// Whether the worker must exit.
    terminated: bool,
}

/// The state of a transmit worker together with the condition variable used to wake it.
#[derive(Default)]
struct Monitor {
    state: Mutex<LoopState>,
    wakeup: Condvar,
}

impl Monitor {
    fn lock(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `f` to the state and wakes the worker. The state is changed under the same lock the
    /// worker waits with, so the wakeup cannot be missed.
    fn update<F: FnOnce(&mut LoopState)>(&self, f: F) {
        let mut state = self.lock();
        f(&mut state);
        self.wakeup.notify_all();
    }

    /// Blocks until the worker is active or terminated. Returns whether it was terminated.
    fn wait_until_active(&self) -> bool {
        let state = self
            .wakeup
            .wait_while(self.lock(), |s| !s.active && !s.terminated)
            .unwrap_or_else(PoisonError::into_inner);
        state.terminated
    }

    /// Blocks for `delay` unless the worker is terminated first. Returns whether it was
    /// terminated.
    fn sleep(&self, delay: Duration) -> bool {
        let (state, _) = self
            .wakeup
            .wait_timeout_while(self.lock(), delay, |s| !s.terminated)
            .unwrap_or_else(PoisonError::into_inner);
        state.terminated
    }
}

/// A background thread that repeatedly writes a payload to a serial port while resumed.
///
/// The worker exits when it is [stopped][Self::stop] or dropped. Only `stop` waits for it.
pub struct TransmitWorker {
    monitor: Arc<Monitor>,
    /// The worker thread. `None` once the worker has been stopped.
    handle: Option<JoinHandle<()>>,
}

impl TransmitWorker {
    /// Spawns a suspended worker that writes through `writer`, which was opened at `path`,
    /// according to `settings`.
    pub fn spawn(writer: PortWriter, path: &str, settings: SharedSettings) -> io::Result<Self> {
        let monitor = Arc::new(Monitor::default());
        let monitor_clone = monitor.clone();
        let handle = thread::Builder::new()
            .name(format!("serial-tx {}", path))
            .spawn(move || run(&monitor_clone, &writer, &settings))?;

        Ok(TransmitWorker {
            monitor,
            handle: Some(handle),
        })
    }

    /// Starts sending. The first write happens right away if the worker was waiting.
    pub fn resume(&self) {
        self.monitor.update(|s| s.active = true);
    }

    /// Stops sending after the current cycle.
    pub fn suspend(&self) {
        self.monitor.update(|s| s.active = false);
    }

    /// Returns whether the worker is set to send.
    pub fn is_active(&self) -> bool {
        self.monitor.lock().active
    }

    /// Returns whether the worker thread is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Signals the worker to exit, waking it from any wait, and waits until it has released its
    /// write handle. An in-progress write is completed first.
    pub fn stop(mut self) {
        self.monitor.update(|s| s.terminated = true);
        if let Some(handle) = self.handle.take() {
            join_worker(handle);
        }
    }
}

impl Drop for TransmitWorker {
    fn drop(&mut self) {
        self.monitor.update(|s| s.terminated = true);
    }
}

/// Runs the send loop until the worker is terminated.
///
/// Writes go straight to the port's write half rather than through the session's send path, so
/// they never open the port. The worker only exists while its session is open, which makes the
/// two equivalent.
fn run(monitor: &Monitor, writer: &PortWriter, settings: &SharedSettings) {
    debug!("transmit worker started");

    loop {
        if monitor.wait_until_active() {
            break;
        }

        let TransmitSettings { payload, delay } =
            settings.lock().unwrap_or_else(PoisonError::into_inner).clone();

        // Write failures only affect this cycle
        match writer.send(&payload) {
            Ok(()) => trace!(bytes = payload.len(), "periodic send"),
            Err(e) => warn!(error = %e, "periodic send failed"),
        }

        if monitor.sleep(delay) {
            break;
        }
    }

    debug!("transmit worker stopped");
}

#[cfg(test)]
mod tests {
    use mock::serial::TestPort;
    use serialport::SerialPort;

    use crate::serial::{OpenPortFn, Port};

    use super::*;

    const DELAY: Duration = Duration::from_millis(40);

    /// Spawns a worker on `test_port` sending `[1, 2]` every `DELAY`.
    fn spawn_worker(test_port: &TestPort) -> (TransmitWorker, SharedSettings) {
        let test_port = test_port.clone();
        let open_fn: OpenPortFn = Box::new(move |_: &str, _: u32| test_port.try_clone());
        let (_, writer) = Port::open("fakeport", 9600, &open_fn).unwrap().split();

        let settings = Arc::new(Mutex::new(TransmitSettings {
            payload: vec![1, 2],
            delay: DELAY,
        }));
        let worker = TransmitWorker::spawn(writer, "fakeport", settings.clone()).unwrap();

        (worker, settings)
    }

    #[test]
    fn test_starts_suspended() {
        let test_port = TestPort::new().unwrap();
        let (worker, _) = spawn_worker(&test_port);

        thread::sleep(DELAY * 2);

        assert!(!worker.is_active());
        assert!(worker.is_running());
        assert!(test_port.writes().is_empty());
    }

    #[test]
    fn test_resume() {
        let test_port = TestPort::new().unwrap();
        let (worker, _) = spawn_worker(&test_port);

        worker.resume();
        assert!(worker.is_active());
        thread::sleep(DELAY * 3);

        let writes = test_port.writes();
        assert!(writes.len() >= 2);
        assert!(writes.iter().all(|w| w.data == vec![1, 2]));
        for pair in writes.windows(2) {
            assert!(pair[1].at - pair[0].at >= DELAY);
        }
    }

    #[test]
    fn test_suspend() {
        let test_port = TestPort::new().unwrap();
        let (worker, _) = spawn_worker(&test_port);

        worker.resume();
        thread::sleep(DELAY * 2);
        worker.suspend();
        assert!(!worker.is_active());

        // Sending stops once the current wait ends
        thread::sleep(DELAY * 2);
        let count = test_port.writes().len();
        thread::sleep(DELAY * 3);
        assert_eq!(count, test_port.writes().len());

        // The worker can be resumed again
        worker.resume();
        thread::sleep(DELAY / 2);
        assert!(test_port.writes().len() > count);
    }

    #[test]
    fn test_settings_apply_next_cycle() {
        let test_port = TestPort::new().unwrap();
        let (worker, settings) = spawn_worker(&test_port);

        worker.resume();
        thread::sleep(DELAY / 2);
        settings.lock().unwrap().payload = vec![9];
        thread::sleep(DELAY * 2);

        let data = test_port.written_data();
        assert_eq!(vec![1, 2], data[0]);
        assert_eq!(&vec![9], data.last().unwrap());
    }

    #[test]
    fn test_write_errors_are_dropped() {
        let test_port = TestPort::new().unwrap();
        let (worker, _) = spawn_worker(&test_port);

        test_port.set_write_error(true);
        worker.resume();
        thread::sleep(DELAY * 2);
        assert!(worker.is_running());

        // Sending continues once writes succeed again
        test_port.set_write_error(false);
        thread::sleep(DELAY * 2);
        assert!(!test_port.writes().is_empty());
    }

    #[test]
    fn test_stop_while_suspended() {
        let test_port = TestPort::new().unwrap();
        let (worker, _) = spawn_worker(&test_port);
        let monitor = worker.monitor.clone();

        worker.stop();

        assert!(monitor.lock().terminated);
        assert_eq!(1, Arc::strong_count(&monitor));
        // The worker's write handle was closed before `stop` returned
        assert_eq!(1, test_port.handle_count());
    }

    #[test]
    fn test_stop_while_sleeping() {
        let test_port = TestPort::new().unwrap();
        let (worker, settings) = spawn_worker(&test_port);
        let monitor = worker.monitor.clone();

        settings.lock().unwrap().delay = Duration::from_secs(60);
        worker.resume();
        thread::sleep(DELAY / 2);
        worker.stop();

        // The worker exits without finishing its wait
        assert_eq!(1, Arc::strong_count(&monitor));
        assert_eq!(1, test_port.writes().len());
    }

    #[test]
    fn test_drop_stops_worker() {
        let test_port = TestPort::new().unwrap();
        let (worker, _) = spawn_worker(&test_port);
        let monitor = worker.monitor.clone();

        worker.resume();
        drop(worker);

        // Dropping signals the worker without waiting for it
        assert!(monitor.lock().terminated);
        thread::sleep(DELAY);
        assert_eq!(1, Arc::strong_count(&monitor));
    }
}
