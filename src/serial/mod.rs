//! Serial port access and the background workers that drive an open port.

mod port;
mod receiver;
mod transmitter;

use tracing::error;

use std::thread::{self, JoinHandle};

pub use port::{open_serial_port, OpenPortFn, Port, PortWriter, READ_TIMEOUT};
pub(crate) use receiver::ReceiveWorker;
pub(crate) use transmitter::{SharedSettings, TransmitSettings, TransmitWorker};

/// The message type used for data read from or written to the serial port.
pub type Data = Vec<u8>;

/// The capacity of the buffer used for each read from the serial port.
pub const READ_BUF_SIZE: usize = 512;

/// Waits for a worker thread that was told to exit. A worker stopped from its own thread (e.g. by a
/// listener) is not waited for, and releases its half of the port when it returns.
fn join_worker(handle: JoinHandle<()>) {
    if handle.thread().id() == thread::current().id() {
        return;
    }

    let name = handle.thread().name().unwrap_or("worker").to_string();
    if handle.join().is_err() {
        error!(thread = %name, "worker thread panicked");
    }
}
