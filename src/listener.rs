//! Listener traits through which a [`SerialSession`][crate::SerialSession] reports received data
//! and state changes.

use std::sync::{Arc, PoisonError, RwLock};

use crate::encoding;
use crate::serial::Data;

/// One read's worth of data received from a serial port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedChunk {
    /// The path of the port the data was read from.
    port: String,
    /// The bytes that were read.
    data: Data,
}

impl ReceivedChunk {
    pub fn new(port: impl Into<String>, data: Data) -> Self {
        ReceivedChunk {
            port: port.into(),
            data,
        }
    }

    /// Returns the path of the port the data was read from.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Returns the bytes that were read.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the number of bytes that were read.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the data formatted as hexadecimal.
    pub fn to_hex(&self) -> String {
        encoding::to_hex(&self.data)
    }

    /// Returns the data decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Consumes the chunk and returns the bytes that were read.
    pub fn into_data(self) -> Data {
        self.data
    }
}

/// Receives data read from a serial port.
///
/// [`on_received`][Self::on_received] is called on the session's receive thread, and the next
/// read does not start until it returns.
pub trait DataListener: Send + Sync {
    /// Called once for every read that returned data.
    fn on_received(&self, chunk: &ReceivedChunk);
}

impl<F> DataListener for F
where
    F: Fn(&ReceivedChunk) + Send + Sync,
{
    fn on_received(&self, chunk: &ReceivedChunk) {
        self(chunk)
    }
}

/// Receives notifications of a session opening and closing.
pub trait StateListener: Send + Sync {
    /// Called once for every call to [`open`][crate::SerialSession::open], including the implicit
    /// open performed when sending on a closed session. `reason` is empty on success and describes
    /// the failure otherwise.
    fn on_open(&self, success: bool, reason: &str);

    /// Called once for every call to [`close`][crate::SerialSession::close].
    fn on_close(&self);
}

/// A replaceable listener shared between a session and its workers.
pub(crate) struct ListenerSlot<L: ?Sized>(Arc<RwLock<Option<Arc<L>>>>);

impl<L: ?Sized> ListenerSlot<L> {
    pub fn new(listener: Option<Arc<L>>) -> Self {
        ListenerSlot(Arc::new(RwLock::new(listener)))
    }

    /// Returns the current listener, if any.
    pub fn get(&self) -> Option<Arc<L>> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replaces the current listener. Holders of other handles to this slot see the change on
    /// their next [`get`][Self::get].
    pub fn set(&self, listener: Option<Arc<L>>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = listener;
    }
}

impl<L: ?Sized> Clone for ListenerSlot<L> {
    fn clone(&self) -> Self {
        ListenerSlot(self.0.clone())
    }
}

impl ListenerSlot<dyn DataListener> {
    /// Hands `chunk` to the current listener. Does nothing if there is none.
    pub fn dispatch(&self, chunk: &ReceivedChunk) {
        // The lock is released before calling out so a listener can replace itself
        if let Some(listener) = self.get() {
            listener.on_received(chunk);
        }
    }
}
