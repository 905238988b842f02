//! # IEC 62056-21 Error Handling
//!
//! This module defines the [`Error`] enum, which represents the different
//! error types that can occur while talking to a tariff device.

use thiserror::Error;

/// Represents the different error types that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The session has no transport; call `reset` with a fresh link.
    #[error("connection is not set for tariff device")]
    NoConnection,

    /// A received frame had an unrecognised lead byte or a missing delimiter.
    #[error("invalid frame")]
    InvalidFrame,

    /// Checksum mismatch on a received frame. The payload is still delivered
    /// inside the error so the caller can decide what to do with it.
    #[error("checksum failed")]
    Bcc {
        /// The frame payload that failed verification.
        data: Vec<u8>,
    },

    /// The peer answered with NAK; surfaced only after retry exhaustion.
    #[error("nak received")]
    Nak,

    /// Password authentication failed; programming mode was not entered.
    #[error("invalid password")]
    InvalidPassword,

    /// The meter answered the password exchange with a break command.
    #[error("device sent break")]
    DeviceBreak,

    /// The meter rejected the password with an error text of its own.
    #[error("password rejected by device: {0}")]
    PasswordRejected(String),

    /// Option selection was attempted against a meter not in mode C.
    #[error("option selection is available for mode C only")]
    ModeCOnly,

    /// Malformed data-set boundaries, too-short identity and similar
    /// marshalling failures.
    #[error("codec error: {0}")]
    Codec(String),

    /// The per-frame read or write deadline lapsed.
    #[error("i/o timeout")]
    Timeout,

    /// Transport error other than a timeout.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
