//! TCP transport binding.
//!
//! Meters are usually reached through an RS-485/TCP bridge, so the crate
//! ships a [`Port`] built on `std::net::TcpStream`. Nagle's algorithm is
//! disabled; the protocol is strictly request/response and latency matters
//! more than throughput. Baud-rate switches are accepted and ignored — the
//! bridge runs the physical line at its own fixed rate.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::Error;
use crate::transport::{Link, LinkConfig, Port};

/// TCP implementation of [`Port`].
#[derive(Debug)]
pub struct TcpPort {
    stream: TcpStream,
}

impl TcpPort {
    /// Connects to `socket` (`host:port`).
    pub fn connect<A: ToSocketAddrs>(socket: A) -> io::Result<Self> {
        Self::from_stream(TcpStream::connect(socket)?)
    }

    /// Connects to `socket` with a connection timeout, trying each resolved
    /// address in turn.
    pub fn connect_timeout<A: ToSocketAddrs>(socket: A, timeout: Duration) -> io::Result<Self> {
        let mut last_error = None;
        for addr in socket.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Self::from_stream(stream),
                Err(err) => last_error = Some(err),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no socket addresses resolved")
        }))
    }

    fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        Ok(TcpPort { stream })
    }

    /// Remote address of the connection.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }
}

impl Read for TcpPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Port for TcpPort {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_write_timeout(timeout)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Both)
    }
}

/// Options for connecting to a tariff device over TCP.
#[derive(Debug, Clone, Default)]
pub struct Dialer {
    /// TCP connection timeout; `None` uses the operating system default.
    pub connect_timeout: Option<Duration>,
    /// Per-frame i/o timeout; zero selects the 5 s default.
    pub rw_timeout: Duration,
    /// Enables software parity translation for bridges that forward raw
    /// 8-bit bytes of a 7E1 line.
    pub sw_parity: bool,
}

impl Dialer {
    /// Connects and wraps the stream in a framed [`Link`].
    pub fn dial<A: ToSocketAddrs>(&self, socket: A) -> Result<Link<TcpPort>, Error> {
        let port = match self.connect_timeout {
            Some(timeout) => TcpPort::connect_timeout(socket, timeout)?,
            None => TcpPort::connect(socket)?,
        };
        Ok(Link::with_config(
            port,
            LinkConfig {
                rw_timeout: self.rw_timeout,
                sw_parity: self.sw_parity,
            },
        ))
    }
}

/// Connects to `socket` with default dialer options.
pub fn dial<A: ToSocketAddrs>(socket: A) -> Result<Link<TcpPort>, Error> {
    Dialer::default().dial(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn dial_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut link = dial(addr).unwrap();
        let (_server, _) = listener.accept().unwrap();
        // baud switching must be accepted even though TCP ignores it
        link.set_baud_rate(9600).unwrap();
        link.close().unwrap();
    }

    #[test]
    fn connect_timeout_is_honoured() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let dialer = Dialer {
            connect_timeout: Some(Duration::from_secs(1)),
            ..Dialer::default()
        };
        assert!(dialer.dial(addr).is_ok());
    }
}
