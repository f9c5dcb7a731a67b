//! The serial session façade. See [`SerialSession`].

use tracing::{debug, error, info, warn};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::{self, SessionConfig};
use crate::encoding;
use crate::error::{ConfigError, OpenError, SendError};
use crate::listener::{DataListener, ListenerSlot, StateListener};
use crate::serial::{
    open_serial_port,
    Data,
    OpenPortFn,
    Port,
    PortWriter,
    ReceiveWorker,
    SharedSettings,
    TransmitSettings,
    TransmitWorker,
};

/// Everything that exists only while the serial port is open. The device is closed once all three
/// are gone.
struct OpenState {
    /// The write half of the port, shared with the transmit worker.
    writer: PortWriter,
    /// The worker owning the read half of the port.
    receiver: ReceiveWorker,
    /// The periodic send worker.
    transmitter: TransmitWorker,
}

/// A managed serial line.
///
/// While open, a background thread continuously reads from the port and reports every chunk of
/// data to the [`DataListener`], and a second thread can be resumed to write a payload at a fixed
/// interval. Opening and closing are reported to the [`StateListener`]. Both listeners are
/// optional.
///
/// The session is driven from a single thread; listeners run on the session's background threads.
pub struct SerialSession {
    /// The path of the serial device.
    port: String,
    /// The baud rate the device is opened with.
    baud_rate: u32,
    /// The periodic send payload and delay, shared with the transmit worker.
    settings: SharedSettings,
    /// The function used to open the device.
    open_fn: OpenPortFn,
    data_listener: ListenerSlot<dyn DataListener>,
    state_listener: Option<Arc<dyn StateListener>>,
    /// The open port and its workers, or `None` if the session is closed.
    state: Option<OpenState>,
}

impl SerialSession {
    /// Returns a closed session for `config` that opens real serial ports.
    pub fn new(config: SessionConfig) -> Result<Self, ConfigError> {
        Builder::from_config(config).build()
    }

    /// Returns a builder for a session on the device at `port`.
    pub fn builder(port: impl Into<String>) -> Builder {
        Builder::from_config(SessionConfig::new(port))
    }

    /// Opens the serial port and starts receiving.
    ///
    /// The outcome is also reported to the state listener: `on_open(true, "")` on success, or
    /// `on_open(false, reason)` describing the [`OpenError`]. Calling this on an open session
    /// leaves the port untouched and reports success again.
    pub fn open(&mut self) -> Result<(), OpenError> {
        if self.is_open() {
            debug!(port = %self.port, "serial port already open");
            self.notify_open(Ok(()));
            return Ok(());
        }

        self.open_port().map(|_| ())
    }

    /// Opens the port, which must be closed, and reports the outcome.
    fn open_port(&mut self) -> Result<&OpenState, OpenError> {
        match self.start() {
            Ok(state) => {
                info!(port = %self.port, baud_rate = self.baud_rate, "serial port opened");
                self.notify_open(Ok(()));
                Ok(&*self.state.insert(state))
            }
            Err(e) => {
                error!(
                    port = %self.port,
                    baud_rate = self.baud_rate,
                    error = %e,
                    "failed to open serial port"
                );
                self.notify_open(Err(&e));
                Err(e)
            }
        }
    }

    /// Opens the device and spawns both workers. The transmit worker starts suspended.
    fn start(&self) -> Result<OpenState, OpenError> {
        let port = Port::open(&self.port, self.baud_rate, &self.open_fn)?;
        let (reader, writer) = port.split();

        let receiver = ReceiveWorker::spawn(reader, self.port.clone(), self.data_listener.clone())?;
        // If this fails, dropping `receiver` stops it
        let transmitter = TransmitWorker::spawn(writer.clone(), &self.port, self.settings.clone())?;

        Ok(OpenState {
            writer,
            receiver,
            transmitter,
        })
    }

    /// Stops both workers, releases the serial port, and reports the closure. Closing a closed
    /// session only reports the closure.
    ///
    /// This waits for the workers to exit, which takes at most one read timeout plus the time the
    /// data listener needs for a chunk it is handling. No data is reported after this returns, and
    /// the device can be opened again right away. A data listener that closes the session from
    /// its own thread is not waited for.
    pub fn close(&mut self) {
        match self.state.take() {
            Some(state) => {
                state.stop();
                info!(port = %self.port, "serial port closed");
            }
            None => debug!(port = %self.port, "serial port already closed"),
        }

        if let Some(listener) = &self.state_listener {
            listener.on_close();
        }
    }

    /// Returns whether the serial port is open.
    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    /// Returns whether the session is open and still receiving. An open session stops receiving
    /// if a read fails, and stays open until [`close`][Self::close] is called.
    pub fn is_receiving(&self) -> bool {
        self.state.as_ref().map_or(false, |s| s.receiver.is_running())
    }

    /// Writes `data` to the serial port, opening the session first if it is closed.
    ///
    /// Failures are logged and returned, and leave the session as it was.
    pub fn send_now(&mut self, data: &[u8]) -> Result<(), SendError> {
        let writer = match &self.state {
            Some(state) => state.writer.clone(),
            None => self.open_port()?.writer.clone(),
        };

        writer.send(data).map_err(|e| {
            warn!(port = %self.port, error = %e, "failed to write to serial port");
            e.into()
        })
    }

    /// Sends the bytes encoded by a string of two digit hexadecimal numbers. See
    /// [`encoding::parse_hex`].
    pub fn send_hex(&mut self, hex: &str) -> Result<(), SendError> {
        self.send_now(&encoding::parse_hex(hex))
    }

    /// Sends the UTF-8 bytes of `text`.
    pub fn send_text(&mut self, text: &str) -> Result<(), SendError> {
        self.send_now(text.as_bytes())
    }

    /// Starts writing the payload periodically. Does nothing while the session is closed.
    pub fn start_periodic_send(&self) {
        if let Some(state) = &self.state {
            debug!(port = %self.port, "periodic send started");
            state.transmitter.resume();
        }
    }

    /// Stops periodic writing once the current cycle completes. Does nothing while the session is
    /// closed.
    pub fn stop_periodic_send(&self) {
        if let Some(state) = &self.state {
            debug!(port = %self.port, "periodic send stopped");
            state.transmitter.suspend();
        }
    }

    /// Returns whether periodic sending is running.
    pub fn is_periodic_sending(&self) -> bool {
        self.state
            .as_ref()
            .map_or(false, |s| s.transmitter.is_active() && s.transmitter.is_running())
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Sets the path of the serial device. Fails without changing anything if the session is
    /// open.
    pub fn set_port(&mut self, port: impl Into<String>) -> Result<(), ConfigError> {
        let port = port.into();
        self.ensure_closed("port")?;
        config::validate_port(&port)?;
        self.port = port;
        Ok(())
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Sets the baud rate. Fails without changing anything if the session is open.
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), ConfigError> {
        self.ensure_closed("baud rate")?;
        config::validate_baud_rate(baud_rate)?;
        self.baud_rate = baud_rate;
        Ok(())
    }

    /// Like [`set_baud_rate`][Self::set_baud_rate], but parses the baud rate from a decimal
    /// string.
    pub fn set_baud_rate_str(&mut self, baud_rate: &str) -> Result<(), ConfigError> {
        self.ensure_closed("baud rate")?;
        self.baud_rate = config::parse_baud_rate(baud_rate)?;
        Ok(())
    }

    /// Returns the periodic send payload.
    pub fn payload(&self) -> Data {
        self.settings().payload.clone()
    }

    /// Sets the periodic send payload. Takes effect from the next send.
    pub fn set_payload(&self, payload: impl Into<Data>) {
        self.settings().payload = payload.into();
    }

    /// Sets the periodic send payload from a string of two digit hexadecimal numbers.
    pub fn set_payload_hex(&self, hex: &str) {
        self.set_payload(encoding::parse_hex(hex));
    }

    /// Sets the periodic send payload to the UTF-8 bytes of `text`.
    pub fn set_payload_text(&self, text: &str) {
        self.set_payload(text.as_bytes());
    }

    /// Returns the delay after each periodic send.
    pub fn send_delay(&self) -> Duration {
        self.settings().delay
    }

    /// Sets the delay after each periodic send. Takes effect from the next send.
    pub fn set_send_delay(&self, delay: Duration) {
        self.settings().delay = delay;
    }

    /// Returns a snapshot of the session's configuration.
    pub fn config(&self) -> SessionConfig {
        let settings = self.settings();

        SessionConfig {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            payload: settings.payload.clone(),
            send_delay: settings.delay,
        }
    }

    /// Replaces the data listener. A running receive worker uses the new listener from its next
    /// read.
    pub fn set_data_listener(&self, listener: Option<Arc<dyn DataListener>>) {
        self.data_listener.set(listener);
    }

    /// Replaces the state listener.
    pub fn set_state_listener(&mut self, listener: Option<Arc<dyn StateListener>>) {
        self.state_listener = listener;
    }

    fn settings(&self) -> MutexGuard<'_, TransmitSettings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_closed(&self, what: &'static str) -> Result<(), ConfigError> {
        if self.is_open() {
            Err(ConfigError::PortOpen(what))
        } else {
            Ok(())
        }
    }

    fn notify_open(&self, result: Result<(), &OpenError>) {
        if let Some(listener) = &self.state_listener {
            match result {
                Ok(()) => listener.on_open(true, ""),
                Err(e) => listener.on_open(false, &e.to_string()),
            }
        }
    }
}

impl Drop for SerialSession {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state.stop();
        }
    }
}

impl OpenState {
    /// Stops both workers and releases the device.
    fn stop(self) {
        let OpenState { writer, receiver, transmitter } = self;

        // The transmit worker wakes at once, so it does not hold up the receive worker
        transmitter.stop();
        receiver.stop();
        drop(writer);
    }
}

/// A builder for a [`SerialSession`].
pub struct Builder {
    config: SessionConfig,
    open_fn: Option<OpenPortFn>,
    data_listener: Option<Arc<dyn DataListener>>,
    state_listener: Option<Arc<dyn StateListener>>,
}

impl Builder {
    fn from_config(config: SessionConfig) -> Self {
        Builder {
            config,
            open_fn: None,
            data_listener: None,
            state_listener: None,
        }
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.config.baud_rate = baud_rate;
        self
    }

    /// Sets the periodic send payload.
    pub fn payload(mut self, payload: impl Into<Data>) -> Self {
        self.config.payload = payload.into();
        self
    }

    /// Sets the delay after each periodic send.
    pub fn send_delay(mut self, delay: Duration) -> Self {
        self.config.send_delay = delay;
        self
    }

    pub fn data_listener(mut self, listener: Arc<dyn DataListener>) -> Self {
        self.data_listener = Some(listener);
        self
    }

    pub fn state_listener(mut self, listener: Arc<dyn StateListener>) -> Self {
        self.state_listener = Some(listener);
        self
    }

    /// Uses `open_fn` instead of [`open_serial_port`] to open the device.
    pub fn open_fn<F>(mut self, open_fn: F) -> Self
    where
        F: Fn(&str, u32) -> serialport::Result<Box<dyn serialport::SerialPort>>
            + Send
            + Sync
            + 'static,
    {
        self.open_fn = Some(Box::new(open_fn));
        self
    }

    /// Returns a closed session, or `Err` if the port path is empty or the baud rate is zero.
    pub fn build(self) -> Result<SerialSession, ConfigError> {
        self.config.validate()?;

        let SessionConfig { port, baud_rate, payload, send_delay } = self.config;

        Ok(SerialSession {
            port,
            baud_rate,
            settings: Arc::new(Mutex::new(TransmitSettings {
                payload,
                delay: send_delay,
            })),
            open_fn: self.open_fn.unwrap_or_else(|| Box::new(open_serial_port) as OpenPortFn),
            data_listener: ListenerSlot::new(self.data_listener),
            state_listener: self.state_listener,
            state: None,
        })
    }
}
