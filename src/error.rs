use serialport::ErrorKind;
use thiserror::Error;

use std::io;

/// Why a serial port could not be opened.
#[derive(Debug, Error)]
pub enum OpenError {
    /// There is no read/write access to the device.
    #[error("no read/write permission for the serial port: {0}")]
    PermissionDenied(String),

    /// The device exists but communication with it could not be set up.
    #[error("serial port I/O failure: {0}")]
    Io(String),

    /// The path or baud rate is not usable.
    #[error("invalid serial port parameters: {0}")]
    InvalidParameter(String),

    /// Any other failure.
    #[error("failed to open serial port: {0}")]
    Unclassified(String),
}

impl From<serialport::Error> for OpenError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
                OpenError::PermissionDenied(e.description)
            }
            ErrorKind::Io(_) | ErrorKind::NoDevice => OpenError::Io(e.description),
            ErrorKind::InvalidInput => OpenError::InvalidParameter(e.description),
            _ => OpenError::Unclassified(e.description),
        }
    }
}

impl From<io::Error> for OpenError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::PermissionDenied => OpenError::PermissionDenied(e.to_string()),
            io::ErrorKind::InvalidInput => OpenError::InvalidParameter(e.to_string()),
            _ => OpenError::Io(e.to_string()),
        }
    }
}

/// Why data could not be sent.
#[derive(Debug, Error)]
pub enum SendError {
    /// The session was closed and opening it failed.
    #[error(transparent)]
    Open(#[from] OpenError),

    #[error("failed to write to serial port: {0}")]
    Io(#[from] io::Error),
}

/// A rejected configuration change.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cannot change the {0} while the serial port is open")]
    PortOpen(&'static str),

    #[error("serial port path is empty")]
    EmptyPort,

    #[error("invalid baud rate: {0:?}")]
    InvalidBaudRate(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(kind: ErrorKind) -> OpenError {
        serialport::Error::new(kind, "details").into()
    }

    #[test]
    fn test_classify_serialport_error() {
        assert!(matches!(
            classify(ErrorKind::Io(io::ErrorKind::PermissionDenied)),
            OpenError::PermissionDenied(_),
        ));
        assert!(matches!(classify(ErrorKind::Io(io::ErrorKind::BrokenPipe)), OpenError::Io(_)));
        assert!(matches!(classify(ErrorKind::NoDevice), OpenError::Io(_)));
        assert!(matches!(classify(ErrorKind::InvalidInput), OpenError::InvalidParameter(_)));
        assert!(matches!(classify(ErrorKind::Unknown), OpenError::Unclassified(_)));
    }

    #[test]
    fn test_classify_io_error() {
        let e: OpenError = io::Error::from(io::ErrorKind::PermissionDenied).into();
        assert!(matches!(e, OpenError::PermissionDenied(_)));

        let e: OpenError = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert!(matches!(e, OpenError::Io(_)));
    }

    #[test]
    fn test_reasons_are_distinct() {
        let reasons = [
            classify(ErrorKind::Io(io::ErrorKind::PermissionDenied)).to_string(),
            classify(ErrorKind::NoDevice).to_string(),
            classify(ErrorKind::InvalidInput).to_string(),
            classify(ErrorKind::Unknown).to_string(),
        ];

        for (i, reason) in reasons.iter().enumerate() {
            assert!(reason.ends_with("details"));
            assert!(reasons[i + 1..].iter().all(|other| other != reason));
        }
    }
}
