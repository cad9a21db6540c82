//! Errors surfaced by the holder and reader flows.
//!
//! Module level errors fold into [Error]; [Error::user_message] is the short text shown to
//! the person operating the device.
use std::time::Duration;

use crate::definitions::{device_engagement, device_request, device_response, session};
use crate::{cbor, cose, transport, x509};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed engagement: {0}")]
    MalformedEngagement(String),
    #[error("scan payload is not an mdoc engagement")]
    InvalidScanPayload,
    #[error("no usable transport offered by the peer")]
    NoUsableTransport,
    #[error("connection aborted")]
    ConnectionAborted,
    #[error("failed to decrypt session message")]
    DecryptionFailed,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("not allowed in state {0}")]
    InvalidState(String),
    #[error("protocol failure: {0}")]
    ProtocolFailure(String),
}

impl Error {
    pub fn user_message(&self) -> String {
        match self {
            Error::MalformedEngagement(_) => "The QR code could not be read".into(),
            Error::InvalidScanPayload => "Not an mdoc QR code".into(),
            Error::NoUsableTransport => "No supported way to connect to the other device".into(),
            Error::ConnectionAborted => "Connection aborted".into(),
            Error::DecryptionFailed => "Could not decrypt the message from the other device".into(),
            Error::Timeout(_) => "Timed out waiting for the other device".into(),
            Error::InvalidState(state) => format!("Busy ({state})"),
            Error::ProtocolFailure(message) => format!("Something went wrong: {message}"),
        }
    }
}

impl From<device_engagement::Error> for Error {
    fn from(e: device_engagement::Error) -> Self {
        match e {
            device_engagement::Error::InvalidScanPayload => Error::InvalidScanPayload,
            other => Error::MalformedEngagement(other.to_string()),
        }
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        match e {
            transport::Error::ConnectionAborted => Error::ConnectionAborted,
            transport::Error::Timeout(after) => Error::Timeout(after),
            other => Error::ProtocolFailure(other.to_string()),
        }
    }
}

impl From<session::Error> for Error {
    fn from(e: session::Error) -> Self {
        match e {
            session::Error::DecryptionFailed => Error::DecryptionFailed,
            other => Error::ProtocolFailure(other.to_string()),
        }
    }
}

macro_rules! protocol_failure_from {
    ($($t:ty),*) => {
        $(impl From<$t> for Error {
            fn from(e: $t) -> Self {
                Error::ProtocolFailure(e.to_string())
            }
        })*
    };
}

protocol_failure_from!(
    cbor::CborError,
    cose::Error,
    x509::Error,
    device_request::Error,
    device_response::Error
);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn engagement_errors_map_to_kinds() {
        assert!(matches!(
            Error::from(device_engagement::Error::InvalidScanPayload),
            Error::InvalidScanPayload
        ));
        assert!(matches!(
            Error::from(device_engagement::Error::InvalidBase64),
            Error::MalformedEngagement(_)
        ));
        assert!(matches!(
            Error::from(transport::Error::Timeout(Duration::from_secs(1))),
            Error::Timeout(_)
        ));
        assert_eq!(Error::InvalidScanPayload.user_message(), "Not an mdoc QR code");
    }
}
