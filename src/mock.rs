//! Mock port implementation for testing.
//!
//! [`MockPort`] scripts a tariff-device conversation without hardware or a
//! network: tests queue the meter's bytes up front, run the client against
//! the port, then inspect what was written and which baud rates were
//! selected. Handles are cheap clones sharing the same buffers, so a test
//! can keep one for inspection while the link owns another.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::transport::Port;

/// In-memory scripted byte port.
#[derive(Clone, Default)]
pub struct MockPort {
    /// Bytes the fake meter will answer with.
    rx: Arc<Mutex<VecDeque<u8>>>,
    /// Bytes the client wrote.
    tx: Arc<Mutex<Vec<u8>>>,
    /// Baud rates selected over the lifetime of the port.
    baud_rates: Arc<Mutex<Vec<u32>>>,
    /// Error injected into the next read or write.
    next_error: Arc<Mutex<Option<io::Error>>>,
}

impl MockPort {
    pub fn new() -> Self {
        MockPort::default()
    }

    /// Queues bytes to be read by the client.
    pub fn queue_rx(&self, data: &[u8]) {
        self.rx.lock().unwrap().extend(data.iter().copied());
    }

    /// Everything the client has written so far.
    pub fn tx_data(&self) -> Vec<u8> {
        self.tx.lock().unwrap().clone()
    }

    /// Number of queued bytes the client has not consumed.
    pub fn rx_remaining(&self) -> usize {
        self.rx.lock().unwrap().len()
    }

    /// Baud rates selected so far, in order.
    pub fn baud_rates(&self) -> Vec<u32> {
        self.baud_rates.lock().unwrap().clone()
    }

    /// Injects an error into the next read or write call.
    pub fn set_next_error(&self, error: io::Error) {
        *self.next_error.lock().unwrap() = Some(error);
    }

    /// Clears all buffers and recorded state.
    pub fn clear(&self) {
        self.rx.lock().unwrap().clear();
        self.tx.lock().unwrap().clear();
        self.baud_rates.lock().unwrap().clear();
        *self.next_error.lock().unwrap() = None;
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(error) = self.next_error.lock().unwrap().take() {
            return Err(error);
        }
        let mut rx = self.rx.lock().unwrap();
        if rx.is_empty() {
            // a silent meter looks like a lapsed deadline to the caller
            return Err(io::Error::new(io::ErrorKind::TimedOut, "mock rx exhausted"));
        }
        let n = rx.len().min(buf.len());
        for slot in buf.iter_mut().take(n) {
            *slot = rx.pop_front().unwrap_or_default();
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(error) = self.next_error.lock().unwrap().take() {
            return Err(error);
        }
        self.tx.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn set_write_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        self.baud_rates.lock().unwrap().push(baud_rate);
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_and_read() {
        let mut port = MockPort::new();
        port.queue_rx(&[0x01, 0x02, 0x03]);
        let mut buf = [0u8; 8];
        assert_eq!(port.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[0x01, 0x02, 0x03]);
    }

    #[test]
    fn exhausted_rx_reports_timeout() {
        let mut port = MockPort::new();
        let err = port.read(&mut [0u8; 1]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn writes_are_captured_across_clones() {
        let port = MockPort::new();
        let mut writer = port.clone();
        writer.write_all(&[0xaa, 0xbb]).unwrap();
        assert_eq!(port.tx_data(), vec![0xaa, 0xbb]);
    }

    #[test]
    fn injected_error_fires_once() {
        let mut port = MockPort::new();
        port.set_next_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(port.write(&[0x00]).is_err());
        assert!(port.write(&[0x00]).is_ok());
    }

    #[test]
    fn baud_rate_switches_are_recorded() {
        let mut port = MockPort::new();
        port.set_baud_rate(300).unwrap();
        port.set_baud_rate(9600).unwrap();
        assert_eq!(port.baud_rates(), vec![300, 9600]);
    }
}
