//! Error taxonomy.
//!
//! | Type | Policy |
//! |---|---|
//! | [`ConnectionError`] | Recoverable; drives retry/backoff and surfaces only as a connection-state change. |
//! | [`ProtocolError`] | Logged and dropped per message; never ends a session. |
//! | [`DeviceError`] | Degrades the affected component to disabled or simulated. |
//! | [`CommandError`] | Sends while disconnected; dropped silently. |
//! | [`InvariantError`] | Programming error; raised only when a snapshot is assembled. |

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection refused: {0}")]
    Refused(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("transport backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unknown message type '{0}'")]
    UnknownType(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("input device unplugged: {0}")]
    Unplugged(String),

    #[error("device backend unavailable: {0}")]
    BackendUnavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("command dropped: no active connection")]
    NotConnected,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantError {
    #[error("robot state requires 12 motors, got {0}")]
    MotorCount(usize),

    #[error("robot state requires 4 feet, got {0}")]
    FootCount(usize),
}

/// Umbrella error used at crate boundaries.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Invariant(#[from] InvariantError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}
