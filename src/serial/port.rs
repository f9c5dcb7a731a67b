//! Abstractions for working with serial ports.

use serialport::{ClearBuffer, SerialPort};

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A function for opening serial ports given a path and a baud rate.
pub type OpenPortFn =
    Box<dyn Fn(&str, u32) -> serialport::Result<Box<dyn SerialPort>> + Send + Sync>;

/// How long a read from the serial port blocks before giving up. This bounds how long the receive
/// worker takes to notice that it must stop.
pub const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// An open serial port, made of a read half and a write half that refer to the same device.
///
/// The halves are separate handles so that a read blocked on the device never holds up a write.
pub struct Port {
    /// The path the port was opened at.
    path: String,
    /// The handle used for reading.
    reader: Box<dyn SerialPort>,
    /// The handle used for writing.
    writer: PortWriter,
}

impl Port {
    /// Opens the serial port at `path` with `baud_rate` by calling `open_fn`. The port's timeout
    /// is set to [`READ_TIMEOUT`] whatever `open_fn` configured.
    pub fn open(path: &str, baud_rate: u32, open_fn: &OpenPortFn) -> serialport::Result<Self> {
        let mut reader = open_fn(path, baud_rate)?;
        // Set before cloning so both halves share it
        reader.set_timeout(READ_TIMEOUT)?;
        let writer = reader.try_clone()?;

        Ok(Port {
            path: path.to_string(),
            reader,
            writer: PortWriter::new(writer),
        })
    }

    /// Returns the path the port was opened at.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Splits the port into its read half and its write half. The device is closed once both
    /// halves (and every clone of the write half) have been dropped.
    pub fn split(self) -> (Box<dyn SerialPort>, PortWriter) {
        (self.reader, self.writer)
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port").field("path", &self.path).finish_non_exhaustive()
    }
}

/// The write half of an open serial port. Clones share the same handle, and writes made from
/// different threads are serialized.
#[derive(Clone)]
pub struct PortWriter(Arc<Mutex<Box<dyn SerialPort>>>);

impl PortWriter {
    fn new(port: Box<dyn SerialPort>) -> Self {
        PortWriter(Arc::new(Mutex::new(port)))
    }

    /// Writes all of `data` to the serial port.
    pub fn send(&self, data: &[u8]) -> io::Result<()> {
        let mut port = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let mut remaining = data;

        while !remaining.is_empty() {
            match write(&mut **port, remaining) {
                Ok(Some(rest)) => remaining = rest,
                Ok(None) => break,
                // Retry writes interrupted by a signal
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

/// Attempts to open the serial port at the provided path.
pub fn open_serial_port(path: &str, baud_rate: u32) -> serialport::Result<Box<dyn SerialPort>> {
    serialport::new(path, baud_rate)
        .timeout(READ_TIMEOUT)
        .open()
        .and_then(|p| {
            // Clear the serial port buffers to avoid reading garbage data
            p.clear(ClearBuffer::All).map(|_| p)
        })
}

/// Writes `data` to `out`. Returns `Ok(None)` if all the data was successfully written, or
/// `Ok(Some)` with the remaining data otherwise.
fn write<F: Write>(mut out: F, data: &[u8]) -> io::Result<Option<&[u8]>> {
    let bytes = out.write(data)?;

    if bytes == 0 {
        Err(io::ErrorKind::WriteZero.into())
    } else if bytes < data.len() {
        Ok(Some(&data[bytes..]))
    } else {
        Ok(None)
    }
}
