//! Logging support: logger initialisation and the wire-frame hex dump.
//!
//! Every completed protocol frame can be emitted to the [`log`] facade under
//! the [`FRAME_LOG_TARGET`] target at debug level, one record per frame.
//! Enable it with e.g. `RUST_LOG=iec62056::frame=debug`.

use std::fmt::Write as _;

/// Log target carrying raw frame dumps.
pub const FRAME_LOG_TARGET: &str = "iec62056::frame";

/// Initializes the logger with the `env_logger` crate.
pub fn init_logger() {
    env_logger::init();
}

/// Formats a frame dump: a `request`/`response` label line followed by the
/// frame bytes, 16 per line, as hex on the left and an ASCII rendering on
/// the right with non-printable bytes replaced by `.`.
pub fn format_frame(label: &str, data: &[u8]) -> String {
    let mut out = String::with_capacity(label.len() + 1 + data.len() * 5);
    out.push_str(label);
    out.push('\n');
    for chunk in data.chunks(16) {
        for byte in chunk {
            let _ = write!(out, "{byte:02X} ");
        }
        for _ in 0..58usize.saturating_sub(3 * chunk.len()) {
            out.push(' ');
        }
        for &byte in chunk {
            out.push(if (0x20..0x7f).contains(&byte) {
                byte as char
            } else {
                '.'
            });
        }
        out.push('\n');
    }
    out
}
