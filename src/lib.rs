//! # iec62056-rs - A Rust Crate for IEC 62056-21 Meter Communication
//!
//! The iec62056-rs crate provides a client implementation of the
//! IEC 62056-21 protocol ("Direct local data exchange") used to read and
//! program electricity meters, speaking over a byte-oriented transport such
//! as a TCP socket bridging an RS-485 line.
//!
//! ## Features
//!
//! - Identification handshake with protocol modes A, B, C and D
//! - Data read-out decoded into data blocks, lines and `address(value*unit)`
//!   data sets
//! - Mode C option selection and programming-mode entry with password
//!   authentication (clear-text P1 or operand-encoded P2)
//! - Programming commands (read, write, execute, break) with NAK retries
//!   and checksum verification
//! - Optional software parity translation for 8-bit-clean RS-485 bridges
//! - Per-frame diagnostic hex dumps through the `log` facade
//!
//! ## Usage
//!
//! ```no_run
//! use iec62056_rs::{tcp, TariffDevice};
//!
//! fn main() -> Result<(), iec62056_rs::Error> {
//!     let link = tcp::dial("192.0.2.10:8000")?;
//!     let mut meter = TariffDevice::new(link);
//!     let block = meter.read_out()?;
//!     for line in &block.lines {
//!         for set in &line.sets {
//!             println!("{} = {} {}", set.address, set.value, set.unit);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod constants;
pub mod error;
pub mod logging;
pub mod message;
pub mod mock;
pub mod tariff_device;
pub mod tcp;
pub mod transport;

pub use error::Error;
pub use logging::init_logger;
pub use message::{
    Command, CommandId, DataBlock, DataLine, DataSet, Identity, OptionId, OptionSelectMessage,
    Pcc, ProtocolMode,
};
pub use tariff_device::{PasswordFn, TariffDevice};
pub use tcp::{dial, Dialer, TcpPort};
pub use transport::{Link, LinkConfig, Port};
