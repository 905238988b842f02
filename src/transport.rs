//! Byte transport adapter and framed I/O.
//!
//! [`Port`] is the capability set a byte transport has to offer: blocking
//! reads and writes with per-operation timeouts, an advisory baud rate, and
//! shutdown. [`crate::tcp::TcpPort`] talks to an RS-485 bridge over TCP;
//! [`crate::mock::MockPort`] scripts conversations for tests; a serial port
//! implementation would be the variant where `set_baud_rate` actually
//! touches the line.
//!
//! [`Link`] layers framing on top of a port: deadline arming, read
//! buffering, optional software parity translation, a per-frame diagnostic
//! log, and the two rules that govern every frame — the lead byte of a
//! received frame selects its terminator, the lead byte of a sent frame
//! selects its suffix (checksum or CR LF).

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use log::{debug, log_enabled, Level};

use crate::constants::{
    ACK, CR, DEFAULT_RW_TIMEOUT, ETX, HANDSHAKE_BAUD_RATE, LF, NAK, SOH, START, STX,
};
use crate::error::Error;
use crate::logging::{format_frame, FRAME_LOG_TARGET};
use crate::message::bcc;

/// Blocking byte transport under a [`Link`].
pub trait Port: Read + Write {
    /// Bounds a single read call. `None` blocks indefinitely.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Bounds a single write call. `None` blocks indefinitely.
    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Switches the nominal line rate. Byte-stream transports with no line
    /// of their own keep the default no-op.
    fn set_baud_rate(&mut self, _baud_rate: u32) -> io::Result<()> {
        Ok(())
    }

    /// Tears the transport down.
    fn shutdown(&mut self) -> io::Result<()>;
}

/// Software parity encoding for 7E1 links behind 8-bit-clean bridges: bit 7
/// carries the parity of the lower seven bits, making the wire byte's total
/// bit count even.
pub fn parity_send(byte: u8) -> u8 {
    if byte.count_ones() & 1 == 1 {
        byte | 0x80
    } else {
        byte
    }
}

/// Strips the parity bit of an incoming wire byte.
pub fn parity_recv(byte: u8) -> u8 {
    byte & 0x7f
}

/// Configuration for a [`Link`].
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Per-frame i/o timeout; zero selects the 5 s default.
    pub rw_timeout: Duration,
    /// Enables software parity translation on reads and writes.
    pub sw_parity: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            rw_timeout: DEFAULT_RW_TIMEOUT,
            sw_parity: false,
        }
    }
}

/// A framed connection to a tariff device over some [`Port`].
pub struct Link<P: Port> {
    port: P,
    rw_timeout: Duration,
    sw_parity: bool,
    /// Decoded bytes received but not yet consumed. Survives `prepare_read`
    /// so back-to-back frames arriving in one segment are not lost.
    rx: VecDeque<u8>,
    /// Bytes of the frame being assembled for the next flush.
    tx: Vec<u8>,
    /// Logical bytes of the in-flight frame, for the diagnostic dump.
    frame_log: Vec<u8>,
    read_deadline: Instant,
    write_deadline: Instant,
    baud_rate: u32,
}

impl<P: Port> Link<P> {
    pub fn new(port: P) -> Self {
        Self::with_config(port, LinkConfig::default())
    }

    pub fn with_config(port: P, config: LinkConfig) -> Self {
        let rw_timeout = if config.rw_timeout.is_zero() {
            DEFAULT_RW_TIMEOUT
        } else {
            config.rw_timeout
        };
        let now = Instant::now();
        Link {
            port,
            rw_timeout,
            sw_parity: config.sw_parity,
            rx: VecDeque::new(),
            tx: Vec::new(),
            frame_log: Vec::new(),
            read_deadline: now,
            write_deadline: now,
            baud_rate: HANDSHAKE_BAUD_RATE,
        }
    }

    /// Current nominal baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Switches the nominal baud rate; a no-op at the wire for TCP ports.
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), Error> {
        self.port.set_baud_rate(baud_rate)?;
        self.baud_rate = baud_rate;
        Ok(())
    }

    /// Closes the underlying port.
    pub fn close(&mut self) -> Result<(), Error> {
        self.port.shutdown()?;
        Ok(())
    }

    /// Arms the read deadline and resets the frame log. Call once before the
    /// sequential reads of a frame.
    pub fn prepare_read(&mut self) {
        self.frame_log.clear();
        self.read_deadline = Instant::now() + self.rw_timeout;
    }

    /// Arms the write deadline, resets the frame log and drops any pending
    /// unflushed bytes. Call once before the sequential writes of a frame.
    pub fn prepare_write(&mut self) {
        self.frame_log.clear();
        self.tx.clear();
        self.write_deadline = Instant::now() + self.rw_timeout;
    }

    fn fill(&mut self) -> Result<(), Error> {
        let remaining = self
            .read_deadline
            .checked_duration_since(Instant::now())
            .filter(|left| !left.is_zero())
            .ok_or(Error::Timeout)?;
        self.port.set_read_timeout(Some(remaining))?;

        let mut chunk = [0u8; 256];
        let n = match self.port.read(&mut chunk) {
            Ok(0) => {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                )))
            }
            Ok(n) => n,
            Err(err)
                if err.kind() == io::ErrorKind::TimedOut
                    || err.kind() == io::ErrorKind::WouldBlock =>
            {
                return Err(Error::Timeout)
            }
            Err(err) => return Err(Error::Io(err)),
        };
        for &byte in &chunk[..n] {
            self.rx.push_back(if self.sw_parity {
                parity_recv(byte)
            } else {
                byte
            });
        }
        Ok(())
    }

    /// Reads a single byte under the armed deadline.
    pub fn read_byte(&mut self) -> Result<u8, Error> {
        loop {
            if let Some(byte) = self.rx.pop_front() {
                self.frame_log.push(byte);
                return Ok(byte);
            }
            self.fill()?;
        }
    }

    /// Reads bytes up to and including `delim` under the armed deadline.
    pub fn read_until(&mut self, delim: u8) -> Result<Vec<u8>, Error> {
        let mut data = Vec::new();
        loop {
            let byte = self.read_byte()?;
            data.push(byte);
            if byte == delim {
                return Ok(data);
            }
        }
    }

    /// Appends bytes to the pending frame.
    pub fn write_all(&mut self, data: &[u8]) {
        self.tx.extend_from_slice(data);
        self.frame_log.extend_from_slice(data);
    }

    /// Appends a single byte to the pending frame.
    pub fn write_byte(&mut self, byte: u8) {
        self.tx.push(byte);
        self.frame_log.push(byte);
    }

    /// Sends the pending frame under the armed write deadline.
    pub fn flush(&mut self) -> Result<(), Error> {
        let remaining = self
            .write_deadline
            .checked_duration_since(Instant::now())
            .filter(|left| !left.is_zero())
            .ok_or(Error::Timeout)?;
        self.port.set_write_timeout(Some(remaining))?;

        let pending = std::mem::take(&mut self.tx);
        let result = if self.sw_parity {
            let wire: Vec<u8> = pending.iter().copied().map(parity_send).collect();
            self.port.write_all(&wire)
        } else {
            self.port.write_all(&pending)
        };
        match result.and_then(|()| self.port.flush()) {
            Ok(()) => Ok(()),
            Err(err)
                if err.kind() == io::ErrorKind::TimedOut
                    || err.kind() == io::ErrorKind::WouldBlock =>
            {
                Err(Error::Timeout)
            }
            Err(err) => Err(Error::Io(err)),
        }
    }

    /// Emits the buffered frame as a `request` record and resets the buffer.
    pub fn log_request(&mut self) {
        self.emit_frame("request");
    }

    /// Emits the buffered frame as a `response` record and resets the buffer.
    pub fn log_response(&mut self) {
        self.emit_frame("response");
    }

    fn emit_frame(&mut self, label: &str) {
        if log_enabled!(target: FRAME_LOG_TARGET, Level::Debug) {
            debug!(target: FRAME_LOG_TARGET, "{}", format_frame(label, &self.frame_log));
        }
        self.frame_log.clear();
    }

    /// Reads one frame. The lead byte classifies it:
    ///
    /// * NAK — the frame is the NAK itself, reported as [`Error::Nak`];
    /// * ACK — the frame is the ACK itself, returned as-is;
    /// * STX or SOH — data or command frame up to and including ETX,
    ///   followed by the checksum byte; a mismatch is reported as
    ///   [`Error::Bcc`] with the payload inside;
    /// * `/` — identification frame up to and including LF.
    ///
    /// Everything else fails with [`Error::InvalidFrame`]. The returned
    /// payload excludes the lead byte (except for the bare ACK).
    pub fn read_frame(&mut self) -> Result<Vec<u8>, Error> {
        self.prepare_read();
        let head = self.read_byte()?;
        let data = match head {
            NAK => return Err(Error::Nak),
            ACK => vec![ACK],
            STX | SOH => {
                let data = self.read_until(ETX)?;
                let check = self.read_byte()?;
                if check != bcc(&data) {
                    return Err(Error::Bcc { data });
                }
                data
            }
            START => self.read_until(LF)?,
            _ => return Err(Error::InvalidFrame),
        };
        self.log_response();
        Ok(data)
    }

    /// Writes one frame. The lead byte selects the suffix: SOH gets the
    /// checksum over everything after it, `/` and ACK get CR LF, anything
    /// else goes out bare. An empty frame is a no-op.
    pub fn write_frame(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }
        self.prepare_write();
        self.write_all(data);
        match data[0] {
            SOH => self.write_byte(bcc(&data[1..])),
            START | ACK => self.write_all(&[CR, LF]),
            _ => {}
        }
        self.flush()?;
        self.log_request();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPort;

    fn link(port: &MockPort) -> Link<MockPort> {
        Link::new(port.clone())
    }

    #[test]
    fn parity_wire_byte_has_even_bit_count() {
        for byte in 0..=u8::MAX {
            let wire = parity_send(byte);
            assert_eq!(wire.count_ones() % 2, 0, "byte {byte:#04x}");
            assert_eq!(wire & 0x7f, byte & 0x7f);
            assert_eq!(parity_recv(wire), byte & 0x7f);
        }
    }

    #[test]
    fn read_frame_ack() {
        let port = MockPort::new();
        port.queue_rx(&[ACK]);
        assert_eq!(link(&port).read_frame().unwrap(), vec![ACK]);
    }

    #[test]
    fn read_frame_nak() {
        let port = MockPort::new();
        port.queue_rx(&[NAK]);
        assert!(matches!(link(&port).read_frame(), Err(Error::Nak)));
    }

    #[test]
    fn read_frame_stx_verifies_checksum() {
        let port = MockPort::new();
        let mut payload = b"Data()!\r\n".to_vec();
        payload.push(ETX);
        port.queue_rx(&[STX]);
        port.queue_rx(&payload);
        port.queue_rx(&[bcc(&payload)]);
        assert_eq!(link(&port).read_frame().unwrap(), payload);
    }

    #[test]
    fn read_frame_bcc_mismatch_still_delivers_payload() {
        let port = MockPort::new();
        let mut payload = b"Data()!\r\n".to_vec();
        payload.push(ETX);
        port.queue_rx(&[STX]);
        port.queue_rx(&payload);
        port.queue_rx(&[bcc(&payload) ^ 0x01]);
        match link(&port).read_frame() {
            Err(Error::Bcc { data }) => assert_eq!(data, payload),
            other => panic!("expected Bcc error, got {other:?}"),
        }
    }

    #[test]
    fn read_frame_identification() {
        let port = MockPort::new();
        port.queue_rx(b"/iek6test\r\n");
        assert_eq!(link(&port).read_frame().unwrap(), b"iek6test\r\n");
    }

    #[test]
    fn read_frame_rejects_unknown_head() {
        let port = MockPort::new();
        port.queue_rx(b"\r\n");
        assert!(matches!(link(&port).read_frame(), Err(Error::InvalidFrame)));
    }

    #[test]
    fn read_frame_times_out_on_silence() {
        let port = MockPort::new();
        assert!(matches!(link(&port).read_frame(), Err(Error::Timeout)));
    }

    #[test]
    fn write_frame_appends_checksum_after_soh() {
        let port = MockPort::new();
        let frame = [SOH, b'R', b'1', ETX];
        link(&port).write_frame(&frame).unwrap();
        let mut expected = frame.to_vec();
        expected.push(bcc(&frame[1..]));
        assert_eq!(port.tx_data(), expected);
    }

    #[test]
    fn write_frame_appends_crlf_after_request_and_ack() {
        let port = MockPort::new();
        link(&port).write_frame(b"/?!").unwrap();
        assert_eq!(port.tx_data(), b"/?!\r\n");

        let port = MockPort::new();
        link(&port).write_frame(&[ACK, b'0', b'6', b'0']).unwrap();
        assert_eq!(port.tx_data(), vec![ACK, b'0', b'6', b'0', CR, LF]);
    }

    #[test]
    fn write_frame_leaves_other_frames_bare() {
        let port = MockPort::new();
        link(&port).write_frame(b"raw").unwrap();
        assert_eq!(port.tx_data(), b"raw");
    }

    #[test]
    fn write_frame_empty_is_a_no_op() {
        let port = MockPort::new();
        link(&port).write_frame(&[]).unwrap();
        assert!(port.tx_data().is_empty());
    }

    #[test]
    fn parity_translation_on_both_directions() {
        let port = MockPort::new();
        let mut link = Link::with_config(
            port.clone(),
            LinkConfig {
                sw_parity: true,
                ..LinkConfig::default()
            },
        );

        // incoming bytes arrive with bit 7 forced high; the link strips it
        let ident: Vec<u8> = b"/ABC6dev\r\n".iter().map(|&b| b | 0x80).collect();
        port.queue_rx(&ident);
        assert_eq!(link.read_frame().unwrap(), b"ABC6dev\r\n");

        // outgoing bytes carry the parity bit
        link.write_frame(b"/?!").unwrap();
        assert_eq!(port.tx_data(), vec![0xaf, 0x3f, 0x21, 0x8d, 0x0a]);
    }

    #[test]
    fn buffered_input_survives_prepare_read() {
        let port = MockPort::new();
        port.queue_rx(b"/iek6test\r\n/iek6test\r\n");
        let mut link = link(&port);
        assert_eq!(link.read_frame().unwrap(), b"iek6test\r\n");
        assert_eq!(link.read_frame().unwrap(), b"iek6test\r\n");
    }

    #[test]
    fn set_baud_rate_tracks_nominal_rate() {
        let port = MockPort::new();
        let mut link = link(&port);
        assert_eq!(link.baud_rate(), 300);
        link.set_baud_rate(9600).unwrap();
        assert_eq!(link.baud_rate(), 9600);
        assert_eq!(port.baud_rates(), vec![9600]);
    }
}
