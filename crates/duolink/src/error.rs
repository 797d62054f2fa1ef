// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the link.
//!
//! Every receive-path error is logged and swallowed (the frame is dropped,
//! the state machine untouched). Transmit-path errors degrade link quality
//! but are never fatal. Only boolean outcomes cross the public API.

use core::fmt;

/// Result type for link operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error type for link operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Radio driver failed to initialise
    RadioInitFailed,

    /// Radio refused the requested channel
    ChannelSetFailed,

    /// Peer registration with the radio failed
    PeerRegisterFailed,

    /// Frame CRC trailer did not match
    BadCrc,

    /// Frame shorter than the padded minimum plus trailer
    ShortFrame,

    /// Unknown frame type tag or record field tag
    UnknownType,

    /// Frame arrived in a state that cannot use it
    UnexpectedState,

    /// Record field tag did not match the requested type
    TypeMismatch,

    /// No room left in the outbound record buffer
    BufferFull,

    /// Persistence backend read/write/erase failed
    PersistenceFailed,

    /// Unicast send was not confirmed within the send timeout
    TxTimeout,

    /// Platform entropy source failed to yield key material
    EntropyFailed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::RadioInitFailed => write!(f, "Radio initialisation failed"),
            Error::ChannelSetFailed => write!(f, "Channel change refused"),
            Error::PeerRegisterFailed => write!(f, "Peer registration failed"),
            Error::BadCrc => write!(f, "Frame CRC mismatch"),
            Error::ShortFrame => write!(f, "Frame below minimum size"),
            Error::UnknownType => write!(f, "Unknown type tag"),
            Error::UnexpectedState => write!(f, "Frame not usable in current state"),
            Error::TypeMismatch => write!(f, "Field type mismatch"),
            Error::BufferFull => write!(f, "Outbound record buffer full"),
            Error::PersistenceFailed => write!(f, "Persistence operation failed"),
            Error::TxTimeout => write!(f, "Send confirmation timed out"),
            Error::EntropyFailed => write!(f, "Entropy source failed"),
        }
    }
}

impl std::error::Error for Error {}
