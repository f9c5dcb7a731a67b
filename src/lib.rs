//! Management of a single serial line. A [`SerialSession`] opens and closes the device,
//! continuously receives incoming bytes on a background thread, and can write a fixed payload at a
//! configurable interval on a second one. Received data and open/close events are reported to
//! listeners.
//!
//! ```no_run
//! use std::sync::Arc;
//! use serial_line::{ReceivedChunk, SerialSession};
//!
//! let mut session = SerialSession::builder("/dev/ttyUSB0")
//!     .baud_rate(115_200)
//!     .data_listener(Arc::new(|chunk: &ReceivedChunk| println!("{}", chunk.to_hex())))
//!     .build()?;
//!
//! session.open()?;
//! session.send_hex("01 02 03")?;
//! session.start_periodic_send();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod config;
pub mod encoding;
mod error;
mod listener;
pub mod serial;
mod session;

pub use config::{SessionConfig, DEFAULT_BAUD_RATE, DEFAULT_PAYLOAD, DEFAULT_SEND_DELAY};
pub use error::{ConfigError, OpenError, SendError};
pub use listener::{DataListener, ReceivedChunk, StateListener};
pub use session::{Builder, SerialSession};
