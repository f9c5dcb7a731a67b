//! Mock types for testing.

pub mod serial;

use serialport::{ErrorKind, SerialPort};

use std::io;
use std::sync::{Arc, Mutex};

use crate::serial::TestPort;

/// The path and baud rate of every attempt to open a port, in order.
pub type OpenLog = Arc<Mutex<Vec<(String, u32)>>>;

/// Returns a function for opening serial ports that always hands out a handle to `port`, and a log
/// of the paths and baud rates it was called with.
pub fn open_test_port(
    port: &TestPort,
) -> (
    impl Fn(&str, u32) -> serialport::Result<Box<dyn SerialPort>> + Send + Sync + 'static,
    OpenLog,
) {
    let port = port.clone();
    let log = OpenLog::default();
    let log_clone = log.clone();

    let open_fn = move |path: &str, baud_rate: u32| {
        log_clone.lock().unwrap().push((path.to_string(), baud_rate));
        port.try_clone()
    };

    (open_fn, log)
}

/// Returns a function for opening serial ports that hands out a handle to `port` only while no
/// other handle opened through it is still alive, like a device opened in exclusive mode.
pub fn open_exclusive(
    port: &TestPort,
) -> impl Fn(&str, u32) -> serialport::Result<Box<dyn SerialPort>> + Send + Sync + 'static {
    let port = port.clone();
    let closed_handles = port.handle_count();

    move |path: &str, _: u32| {
        if port.handle_count() > closed_handles {
            Err(serialport::Error::new(
                ErrorKind::Io(io::ErrorKind::Other),
                format!("{} is busy", path),
            ))
        } else {
            port.try_clone()
        }
    }
}

/// Returns a function for opening serial ports that always fails with an error of `kind`.
pub fn open_failing(
    kind: ErrorKind,
) -> impl Fn(&str, u32) -> serialport::Result<Box<dyn SerialPort>> + Send + Sync + 'static {
    move |path: &str, _: u32| Err(serialport::Error::new(kind, format!("cannot open {}", path)))
}

/// Returns a function for opening serial ports that fails because access to the device is denied.
pub fn open_permission_denied(
) -> impl Fn(&str, u32) -> serialport::Result<Box<dyn SerialPort>> + Send + Sync + 'static {
    open_failing(ErrorKind::Io(io::ErrorKind::PermissionDenied))
}
