//! IEC 62056-21 Protocol Constants
//!
//! Control characters and protocol defaults used throughout the crate.
//! The character names follow the standard's terminology.

use std::time::Duration;

/// Start of header, leads a command frame.
pub const SOH: u8 = 0x01;

/// Start of text, leads a data frame (and a command payload).
pub const STX: u8 = 0x02;

/// End of text, terminates a data or command frame before the checksum.
pub const ETX: u8 = 0x03;

/// Acknowledge; also the lead byte of an option-select message.
pub const ACK: u8 = 0x06;

/// Line feed, second half of the frame terminator.
pub const LF: u8 = 0x0a;

/// Carriage return, first half of the frame terminator.
pub const CR: u8 = 0x0d;

/// Negative acknowledge, requests a repetition.
pub const NAK: u8 = 0x15;

/// `!` marks the end of a data block and of a request message.
pub const END: u8 = 0x21;

/// `(` front boundary of a data set.
pub const FB: u8 = 0x28;

/// `)` rear boundary of a data set.
pub const RB: u8 = 0x29;

/// `*` separates value and unit inside a data set.
pub const STAR: u8 = 0x2a;

/// `/` starts a request message and an identification response.
pub const START: u8 = 0x2f;

/// `?` transmission request command in the request message.
pub const TRC: u8 = 0x3f;

/// Default per-frame i/o timeout.
pub const DEFAULT_RW_TIMEOUT: Duration = Duration::from_secs(5);

/// Inactivity timeout after which the meter drops out of programming mode.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// All modes open the conversation at 300 baud.
pub const HANDSHAKE_BAUD_RATE: u32 = 300;

/// Mode D transmits unsolicited at a fixed 2400 baud.
pub const MODE_D_BAUD_RATE: u32 = 2400;

/// A frame answered with NAK is repeated at most this many times in total.
pub const MAX_SEND_ATTEMPTS: usize = 5;
