//! A worker that continuously reads from a serial port.

use serialport::SerialPort;
use tokio::sync::watch::{self, Receiver, Sender};
use tracing::{debug, error, trace};

use std::io::{self, Read};
use std::thread::{self, JoinHandle};

use super::{join_worker, READ_BUF_SIZE};
use crate::listener::{DataListener, ListenerSlot, ReceivedChunk};

/// A background thread that reads from the read half of a serial port and hands every non-empty
/// read to a [`DataListener`].
///
/// The worker stops when [`stop`][Self::stop] is called or the worker is dropped, and also stops
/// on its own if a read fails. The read half of the port is closed when the worker exits.
pub struct ReceiveWorker {
    /// A sender for the termination signal.
    terminate_tx: Sender<()>,
    /// The worker thread.
    handle: JoinHandle<()>,
}

impl ReceiveWorker {
    /// Spawns a worker that reads from `port`, which was opened at `path`, and reports data to the
    /// listener in `listener`.
    pub fn spawn(
        port: Box<dyn SerialPort>,
        path: String,
        listener: ListenerSlot<dyn DataListener>,
    ) -> io::Result<Self> {
        let (terminate_tx, terminate_rx) = watch::channel(());
        let handle = thread::Builder::new()
            .name(format!("serial-rx {}", path))
            .spawn(move || run(port, path, listener, terminate_rx))?;

        Ok(ReceiveWorker {
            terminate_tx,
            handle,
        })
    }

    /// Returns whether the worker is still reading.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stops the worker and waits for it to exit, which happens once its current read times out
    /// and any listener call in progress returns. When called from the worker's own thread, the
    /// worker exits after the current listener call instead.
    pub fn stop(self) {
        // Fails only if the worker already exited
        let _ = self.terminate_tx.send(());
        join_worker(self.handle);
    }
}

/// Runs the read loop until `terminate_rx` is signalled or closed, or a read fails.
fn run(
    mut port: Box<dyn SerialPort>,
    path: String,
    listener: ListenerSlot<dyn DataListener>,
    terminate_rx: Receiver<()>,
) {
    let mut read_buf = vec![0u8; READ_BUF_SIZE];
    debug!(port = %path, "receive worker started");

    loop {
        // Watch for termination signal
        if terminate_rx.has_changed().unwrap_or(true) {
            debug!(port = %path, "receive worker stopped");
            return;
        }

        match port.read(&mut read_buf) {
            // Nothing was received
            Ok(0) => {}
            Ok(bytes) => {
                trace!(port = %path, bytes, "received data");
                let chunk = ReceivedChunk::new(path.as_str(), read_buf[..bytes].to_vec());
                listener.dispatch(&chunk);
            }
            Err(e) => match e.kind() {
                // Ignore temporary read failures
                io::ErrorKind::WouldBlock
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::TimedOut => {},
                _ => {
                    // The session stays open; only an explicit close clears it
                    error!(port = %path, error = %e, "read failed, no longer receiving");
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use mock::serial::TestPort;

    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;

    const FAKE_PORT: &str = "fakeport";

    /// Spawns a worker on `test_port` and returns it with the list of chunks it reports.
    fn spawn_worker(test_port: &TestPort) -> (ReceiveWorker, Arc<Mutex<Vec<ReceivedChunk>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let listener: ListenerSlot<dyn DataListener> = ListenerSlot::new(Some(Arc::new(
            move |chunk: &ReceivedChunk| received_clone.lock().unwrap().push(chunk.clone()),
        )));

        let worker = ReceiveWorker::spawn(
            Box::new(test_port.clone()),
            FAKE_PORT.to_string(),
            listener,
        ).unwrap();

        (worker, received)
    }

    #[test]
    fn test_receive() {
        let test_port = TestPort::new().unwrap();
        let (worker, received) = spawn_worker(&test_port);

        test_port.push_incoming(&[1, 2, 3]);
        thread::sleep(Duration::from_millis(50));

        assert_eq!(
            vec![ReceivedChunk::new(FAKE_PORT, vec![1, 2, 3])],
            *received.lock().unwrap(),
        );
        assert!(worker.is_running());
        worker.stop();
    }

    #[test]
    fn test_receive_splits_large_reads() {
        let test_port = TestPort::new().unwrap();
        let (worker, received) = spawn_worker(&test_port);

        test_port.push_incoming(&[7; READ_BUF_SIZE + 10]);
        thread::sleep(Duration::from_millis(50));

        let lens = received.lock().unwrap().iter().map(ReceivedChunk::len).collect::<Vec<_>>();
        assert_eq!(vec![READ_BUF_SIZE, 10], lens);
        worker.stop();
    }

    #[test]
    fn test_empty_reads_are_ignored() {
        let test_port = TestPort::new().unwrap();
        // Reads return no data while no device is connected
        test_port.set_device_dsr(false);
        let (worker, received) = spawn_worker(&test_port);

        test_port.push_incoming(&[1, 2, 3]);
        thread::sleep(Duration::from_millis(50));

        assert!(received.lock().unwrap().is_empty());
        assert!(worker.is_running());
        worker.stop();
    }

    #[test]
    fn test_stop() {
        let test_port = TestPort::new().unwrap();
        let (worker, received) = spawn_worker(&test_port);
        assert!(worker.is_running());

        let ReceiveWorker { terminate_tx, handle } = worker;
        terminate_tx.send(()).unwrap();
        handle.join().unwrap();

        // Data arriving after the worker stopped is not read
        test_port.push_incoming(&[1, 2, 3]);
        thread::sleep(Duration::from_millis(20));
        assert!(received.lock().unwrap().is_empty());
        assert_eq!(3, test_port.pending_incoming());
    }

    #[test]
    fn test_stop_releases_port() {
        let test_port = TestPort::new().unwrap();
        let (worker, _) = spawn_worker(&test_port);
        assert_eq!(2, test_port.handle_count());

        worker.stop();

        // The worker's handle was closed before `stop` returned
        assert_eq!(1, test_port.handle_count());
    }

    #[test]
    fn test_stop_waits_for_listener() {
        let test_port = TestPort::new().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let listener: ListenerSlot<dyn DataListener> = ListenerSlot::new(Some(Arc::new(
            move |chunk: &ReceivedChunk| {
                thread::sleep(Duration::from_millis(100));
                received_clone.lock().unwrap().push(chunk.clone());
            },
        )));
        let worker = ReceiveWorker::spawn(
            Box::new(test_port.clone()),
            FAKE_PORT.to_string(),
            listener,
        ).unwrap();

        test_port.push_incoming(&[1]);
        thread::sleep(Duration::from_millis(30));
        worker.stop();

        // The chunk being handled was delivered before `stop` returned
        assert_eq!(1, received.lock().unwrap().len());
        assert_eq!(1, test_port.handle_count());
    }

    #[test]
    fn test_drop_stops_worker() {
        let test_port = TestPort::new().unwrap();
        let (worker, _) = spawn_worker(&test_port);

        let ReceiveWorker { terminate_tx, handle } = worker;
        // A closed channel is treated as a termination signal
        drop(terminate_tx);
        handle.join().unwrap();
    }

    #[test]
    fn test_read_error_stops_worker() {
        let test_port = TestPort::new().unwrap();
        let (worker, received) = spawn_worker(&test_port);

        test_port.set_has_error(true);
        thread::sleep(Duration::from_millis(50));

        assert!(!worker.is_running());
        assert!(received.lock().unwrap().is_empty());

        // Stopping a worker that already exited is harmless
        worker.stop();
    }
}
