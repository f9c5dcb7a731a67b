//! A mock serial port implementation.

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// How long a read waits for data before timing out until another timeout is set.
pub const READ_TIMEOUT: Duration = Duration::from_millis(5);

/// A single write made to a [`TestPort`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRecord {
    /// When the write happened.
    pub at: Instant,
    /// The bytes that were written.
    pub data: Vec<u8>,
}

/// A serial port implementation backed by memory. Data to be read is injected with
/// [`push_incoming`][Self::push_incoming] and every write is recorded. This type is a handle that
/// can be cloned to control the port from multiple locations.
#[derive(Clone)]
pub struct TestPort {
    /// Data waiting to be read from the port.
    incoming: Arc<Mutex<Vec<u8>>>,
    /// Every write made to the port, in order.
    writes: Arc<Mutex<Vec<WriteRecord>>>,
    /// Whether written data is also queued to be read, like a loop-back cable.
    loopback: Arc<AtomicBool>,
    /// Whether the port has an error. Simulates a physical disconnect if `true`.
    has_error: Arc<AtomicBool>,
    /// Whether writes fail while reads keep working.
    write_error: Arc<AtomicBool>,
    /// Whether a device is connected to the port. If `false`, reads always return no data.
    device_dsr: Arc<AtomicBool>,
    /// How long a read waits for data before timing out.
    timeout: Arc<Mutex<Duration>>,
}

impl TestPort {
    /// Returns a new `TestPort` that has no errors, has a device connected, and does not echo.
    pub fn new() -> serialport::Result<Self> {
        Ok(Self {
            incoming: Arc::new(Mutex::new(Vec::new())),
            writes: Arc::new(Mutex::new(Vec::new())),
            loopback: Arc::new(false.into()),
            has_error: Arc::new(false.into()),
            write_error: Arc::new(false.into()),
            device_dsr: Arc::new(true.into()),
            timeout: Arc::new(Mutex::new(READ_TIMEOUT)),
        })
    }

    /// Returns a new `TestPort` that echoes everything written to it.
    pub fn loopback() -> serialport::Result<Self> {
        let port = Self::new()?;
        port.loopback.store(true, Ordering::SeqCst);
        Ok(port)
    }

    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::SeqCst)
    }

    pub fn set_has_error(&self, has_error: bool) {
        self.has_error.store(has_error, Ordering::SeqCst);
    }

    pub fn set_write_error(&self, write_error: bool) {
        self.write_error.store(write_error, Ordering::SeqCst);
    }

    pub fn device_dsr(&self) -> bool {
        self.device_dsr.load(Ordering::SeqCst)
    }

    pub fn set_device_dsr(&self, device_dsr: bool) {
        self.device_dsr.store(device_dsr, Ordering::SeqCst);
    }

    /// Returns the number of live handles to the port, including this one.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.incoming)
    }

    /// Queues `data` to be returned by subsequent reads.
    pub fn push_incoming(&self, data: &[u8]) {
        self.incoming().extend_from_slice(data);
    }

    /// Returns the number of queued bytes that have not been read yet.
    pub fn pending_incoming(&self) -> usize {
        self.incoming().len()
    }

    /// Returns every write made to the port so far.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().unwrap().clone()
    }

    /// Returns the data of every write made to the port so far.
    pub fn written_data(&self) -> Vec<Vec<u8>> {
        self.writes().into_iter().map(|w| w.data).collect()
    }

    // Returns `Err` if the `has_error` flag is true, or `Ok` otherwise (even if `device_dsr` is
    // false).
    pub fn try_access(&self) -> io::Result<()> {
        if self.has_error() {
            Err(io::ErrorKind::BrokenPipe.into())
        } else {
            Ok(())
        }
    }

    fn incoming(&self) -> MutexGuard<Vec<u8>> {
        self.incoming.lock().unwrap()
    }
}

impl Write for TestPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.try_access()?;
        if self.write_error.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }

        self.writes.lock().unwrap().push(WriteRecord {
            at: Instant::now(),
            data: buf.to_vec(),
        });
        if self.loopback.load(Ordering::SeqCst) {
            self.push_incoming(buf);
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.try_access()
    }
}

impl Read for TestPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.try_access()?;

        // Simulate a disconnected device by reading nothing
        if !self.device_dsr() {
            thread::sleep(self.timeout());
            return Ok(0);
        }

        let bytes = {
            let mut port_buf = self.incoming();

            // Read bytes equal to the smaller of the lengths of the target buffer and the internal
            // buffer
            let bytes = buf.len().min(port_buf.len());
            buf[..bytes].copy_from_slice(&port_buf[..bytes]);
            port_buf.drain(..bytes);

            bytes
        };

        if bytes == 0 {
            thread::sleep(self.timeout());
            Err(io::ErrorKind::TimedOut.into())
        } else {
            Ok(bytes)
        }
    }
}

impl SerialPort for TestPort {
    fn name(&self) -> Option<String> {
        None
    }

    fn baud_rate(&self) -> serialport::Result<u32> {
        self.try_access().map(|_| 9600).map_err(Into::into)
    }

    fn data_bits(&self) -> serialport::Result<DataBits> {
        self.try_access().map(|_| DataBits::Eight).map_err(Into::into)
    }

    fn flow_control(&self) -> serialport::Result<FlowControl> {
        self.try_access().map(|_| FlowControl::None).map_err(Into::into)
    }

    fn parity(&self) -> serialport::Result<Parity> {
        self.try_access().map(|_| Parity::None).map_err(Into::into)
    }

    fn timeout(&self) -> Duration {
        *self.timeout.lock().unwrap()
    }

    fn set_baud_rate(&mut self, _baud_rate: u32) -> serialport::Result<()> {
        self.try_access().map_err(Into::into)
    }

    fn stop_bits(&self) -> serialport::Result<StopBits> {
        self.try_access().map(|_| StopBits::One).map_err(Into::into)
    }

    fn set_data_bits(&mut self, _data_bits: DataBits) -> serialport::Result<()> {
        self.try_access().map_err(Into::into)
    }

    fn set_flow_control(&mut self, _flow_control: FlowControl) -> serialport::Result<()> {
        self.try_access().map_err(Into::into)
    }

    fn set_parity(&mut self, _parity: Parity) -> serialport::Result<()> {
        self.try_access().map_err(Into::into)
    }

    fn set_stop_bits(&mut self, _stop_bits: StopBits) -> serialport::Result<()> {
        self.try_access().map_err(Into::into)
    }

    fn set_timeout(&mut self, timeout: Duration) -> serialport::Result<()> {
        self.try_access()?;
        *self.timeout.lock().unwrap() = timeout;
        Ok(())
    }

    fn write_request_to_send(&mut self, _level: bool) -> serialport::Result<()> {
        self.try_access().map_err(Into::into)
    }

    fn write_data_terminal_ready(&mut self, _level: bool) -> serialport::Result<()> {
        self.try_access().map_err(Into::into)
    }

    fn read_clear_to_send(&mut self) -> serialport::Result<bool> {
        self.try_access().map(|_| true).map_err(Into::into)
    }

    fn read_ring_indicator(&mut self) -> serialport::Result<bool> {
        self.try_access().map(|_| true).map_err(Into::into)
    }

    fn read_carrier_detect(&mut self) -> serialport::Result<bool> {
        self.try_access().map(|_| true).map_err(Into::into)
    }

    fn bytes_to_read(&self) -> serialport::Result<u32> {
        self.try_access().map(|_| self.pending_incoming() as u32).map_err(Into::into)
    }

    fn bytes_to_write(&self) -> serialport::Result<u32> {
        self.try_access().map(|_| 0).map_err(Into::into)
    }

    fn read_data_set_ready(&mut self) -> serialport::Result<bool> {
        self.try_access().map(|_| self.device_dsr()).map_err(Into::into)
    }

    fn clear(&self, buffer_to_clear: ClearBuffer) -> serialport::Result<()> {
        self.try_access()?;
        if let ClearBuffer::Input | ClearBuffer::All = buffer_to_clear {
            self.incoming().clear();
        }
        Ok(())
    }

    fn try_clone(&self) -> serialport::Result<Box<dyn SerialPort>> {
        Ok(Box::new(self.clone()))
    }

    fn set_break(&self) -> serialport::Result<()> {
        self.try_access().map_err(Into::into)
    }

    fn clear_break(&self) -> serialport::Result<()> {
        self.try_access().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_new() {
        let port = TestPort::new().unwrap();

        assert!(!port.has_error());
        assert!(port.device_dsr());
        assert!(port.writes().is_empty());
    }

    #[test]
    fn test_port_write_is_recorded() {
        let mut port = TestPort::new().unwrap();

        port.write(&[1, 2, 3]).unwrap();
        port.write(&[4, 5, 6]).unwrap();

        assert_eq!(vec![vec![1, 2, 3], vec![4, 5, 6]], port.written_data());
        let writes = port.writes();
        assert!(writes[0].at <= writes[1].at);
        // Writes are not echoed unless the port is a loop-back port
        assert_eq!(0, port.pending_incoming());
    }

    #[test]
    fn test_port_read() {
        let mut port = TestPort::new().unwrap();

        port.push_incoming(&[1, 2, 3]);

        let mut buf = [0; 4];
        assert_eq!(3, port.read(&mut buf).unwrap());
        assert_eq!(&[1, 2, 3, 0], &buf);
        // Read data is cleared
        assert_eq!(0, port.pending_incoming());

        port.push_incoming(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(4, port.read(&mut buf).unwrap());
        assert_eq!(&[1, 2, 3, 4], &buf);
        // Data that could not fit in the target buffer remains
        assert_eq!(&[5, 6][..], &*port.incoming());
    }

    #[test]
    fn test_port_read_times_out_when_empty() {
        let mut port = TestPort::new().unwrap();

        let mut buf = [0; 4];
        let err = port.read(&mut buf).unwrap_err();
        assert_eq!(io::ErrorKind::TimedOut, err.kind());
    }

    #[test]
    fn test_port_loopback() {
        let mut port = TestPort::loopback().unwrap();

        port.write(&[7, 8]).unwrap();

        let mut buf = [0; 4];
        assert_eq!(2, port.read(&mut buf).unwrap());
        assert_eq!(&[7, 8], &buf[..2]);
    }

    #[test]
    fn test_port_error() {
        let mut port = TestPort::new().unwrap();

        port.set_has_error(true);

        assert!(port.try_access().is_err());
        assert!(port.write(&[]).is_err());
        assert!(port.read(&mut []).is_err());
    }

    #[test]
    fn test_port_write_error() {
        let mut port = TestPort::new().unwrap();
        port.push_incoming(&[1]);

        port.set_write_error(true);

        assert!(port.write(&[1]).is_err());
        assert!(port.writes().is_empty());
        // Reads are unaffected
        let mut buf = [0; 1];
        assert_eq!(1, port.read(&mut buf).unwrap());
    }

    #[test]
    fn test_port_device_dsr() {
        let mut port = TestPort::new().unwrap();

        assert!(port.read_data_set_ready().unwrap());

        port.set_device_dsr(false);
        port.push_incoming(&[1, 2, 3]);

        assert!(!port.read_data_set_ready().unwrap());

        // The port can be accessed even when no device is connected, but no data will ever be
        // returned to be read
        assert!(port.try_access().is_ok());

        let mut buf = [0; 3];
        assert_eq!(0, port.read(&mut buf).unwrap());
        assert_eq!([0; 3], buf);
    }

    #[test]
    fn test_port_clone() {
        let port = TestPort::new().unwrap();
        let mut port_clone = port.try_clone().unwrap();
        assert_eq!(2, port.handle_count());

        port_clone.write(&[1, 2, 3]).unwrap();
        port_clone.set_timeout(Duration::ZERO).unwrap();

        // Changes to a clone of the port affect the original copy
        assert_eq!(vec![vec![1, 2, 3]], port.written_data());
        assert_eq!(Duration::ZERO, port.timeout());

        drop(port_clone);
        assert_eq!(1, port.handle_count());
    }
}
