//! The tariff-device session: a client driving one IEC 62056-21
//! conversation at a time.
//!
//! [`TariffDevice`] owns a framed [`Link`] and sequences the multi-mode
//! handshake, mode C option negotiation, programming-mode entry with
//! password exchange, command dispatch with NAK retries, and the
//! programming-session idle clock. The meter's operating mode is learned
//! from the identification response and decides the rest of the flow:
//! modes A and B fall straight into the data read-out (and programming
//! mode), mode C waits for an option-select, mode D talks unsolicited and
//! is served by [`TariffDevice::immediate_read_out`].

use std::time::{Duration, Instant};

use crate::constants::{
    ACK, CR, DEFAULT_IDLE_TIMEOUT, END, HANDSHAKE_BAUD_RATE, LF, MAX_SEND_ATTEMPTS,
    MODE_D_BAUD_RATE,
};
use crate::error::Error;
use crate::message::{
    self, Command, CommandId, DataBlock, DataSet, Identity, OptionId, OptionSelectMessage, Pcc,
    ProtocolMode, BREAK_FRAME,
};
use crate::transport::{Link, Port};

/// Password callback. Receives the operand data set sent by the meter (the
/// address field is already cleared) and returns the encoded value together
/// with the command to deliver it: [`CommandId::P1`] for clear-text
/// passwords, [`CommandId::P2`] for values encoded with the operand.
pub type PasswordFn = Box<dyn FnMut(DataSet) -> (DataSet, CommandId)>;

/// A client session with one tariff device.
pub struct TariffDevice<P: Port> {
    link: Option<Link<P>>,
    address: String,
    password: Option<PasswordFn>,
    idle_timeout: Duration,
    programming_mode: bool,
    last_activity: Instant,
    identity: Option<Identity>,
}

impl<P: Port> TariffDevice<P> {
    /// Creates a session for the broadcast address.
    pub fn new(link: Link<P>) -> Self {
        TariffDevice {
            link: Some(link),
            address: String::new(),
            password: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            programming_mode: false,
            last_activity: Instant::now(),
            identity: None,
        }
    }

    /// Creates a session addressing one device on a multi-drop line.
    pub fn with_address(link: Link<P>, address: impl Into<String>) -> Self {
        let mut device = Self::new(link);
        device.address = address.into();
        device
    }

    /// Creates a session with a password callback for programming mode.
    pub fn with_password(
        link: Link<P>,
        address: impl Into<String>,
        password: PasswordFn,
    ) -> Self {
        let mut device = Self::with_address(link, address);
        device.password = Some(password);
        device
    }

    /// Inactivity window after which the meter is assumed to have left
    /// programming mode. Zero selects the 120 s default.
    pub fn set_idle_timeout(&mut self, timeout: Duration) {
        self.idle_timeout = timeout;
    }

    /// Replaces the transport and forgets everything known about the meter.
    pub fn reset(&mut self, link: Link<P>) {
        self.link = Some(link);
        self.identity = None;
        self.programming_mode = false;
    }

    /// Closes the transport. Operations fail with [`Error::NoConnection`]
    /// until [`TariffDevice::reset`] installs a new one.
    pub fn close(&mut self) -> Result<(), Error> {
        match self.link.take() {
            Some(mut link) => link.close(),
            None => Ok(()),
        }
    }

    /// Forgets the programming-mode state without touching the meter.
    pub fn drop_programming_mode(&mut self) {
        self.programming_mode = false;
    }

    /// The cached identity, running the handshake if none is cached yet.
    pub fn identity(&mut self) -> Result<Identity, Error> {
        if let Some(id) = &self.identity {
            return Ok(id.clone());
        }
        let (id, _) = self.handshake()?;
        Ok(id)
    }

    /// Whether the meter currently accepts programming commands.
    pub fn is_in_programming_mode(&self) -> bool {
        if self.identity.is_none() || !self.programming_mode {
            return false;
        }
        self.last_activity.elapsed() < self.effective_idle_timeout()
    }

    /// Performs the data read-out for modes A, B and C.
    pub fn read_out(&mut self) -> Result<DataBlock, Error> {
        let (id, block) = self.handshake()?;
        if id.mode != ProtocolMode::C {
            return block.ok_or_else(|| Error::Codec("handshake returned no data block".into()));
        }
        let block = self.option(OptionSelectMessage {
            option: OptionId::DataReadOut,
            pcc: Pcc::Normal,
            bri: id.bri,
            skip_handshake: true,
        })?;
        block.ok_or_else(|| Error::Codec("read-out returned no data block".into()))
    }

    /// Mode D entry point: the meter drives the conversation without a
    /// request. Reads the unsolicited identification and data block at
    /// 2400 baud, caches and returns the identity alongside the block.
    pub fn immediate_read_out(&mut self) -> Result<(Identity, DataBlock), Error> {
        let link = self.link.as_mut().ok_or(Error::NoConnection)?;
        link.set_baud_rate(MODE_D_BAUD_RATE)?;

        let data = link.read_frame()?;
        let mut id = message::parse_identity(&data)?;
        id.mode = ProtocolMode::D;

        link.prepare_read();
        if link.read_byte()? != CR || link.read_byte()? != LF {
            return Err(Error::InvalidFrame);
        }
        let body = link.read_until(END)?;
        link.read_until(LF)?;
        link.log_response();

        let block = message::parse_data_block(&body)?;
        self.identity = Some(id.clone());
        Ok((id, block))
    }

    /// Sends a mode C option-select message and returns the decoded
    /// response block, or `None` when the option opened programming mode.
    pub fn option(&mut self, mut o: OptionSelectMessage) -> Result<Option<DataBlock>, Error> {
        let id = match self.identity.clone() {
            Some(id) if o.skip_handshake => id,
            _ => self.handshake()?.0,
        };
        if id.mode != ProtocolMode::C {
            return Err(Error::ModeCOnly);
        }
        o.bri = id.bri;
        let msg = message::pack_option_select(&o);

        // The option's outcome re-establishes programming mode, not the act
        // of asking for it.
        self.programming_mode = false;

        // Not the retry wrapper: the baud switch has to land between the
        // write and the read.
        let link = self.link.as_mut().ok_or(Error::NoConnection)?;
        link.write_frame(&msg)?;
        link.set_baud_rate(message::decode_baud_rate(id.bri))?;
        let data = link.read_frame()?;
        self.last_activity = Instant::now();

        if o.option == OptionId::ProgrammingMode {
            self.pass_exchange(&data)?;
            return Ok(None);
        }
        Ok(Some(message::parse_data_block(&data)?))
    }

    /// Executes a programming command and decodes the response block.
    /// `B0` is always a break, whatever the session state.
    pub fn command(&mut self, command: Command) -> Result<DataBlock, Error> {
        if command.id == CommandId::B0 {
            self.send_break()?;
            return Ok(DataBlock::default());
        }
        if !self.is_in_programming_mode() {
            self.enter_programming_mode()?;
        }
        let msg = message::pack_command(&command);
        let data = self.cmd(&msg)?;
        message::parse_data_block(&data)
    }

    /// Transmits the break command and forgets the session state, whether
    /// or not the write went through.
    pub fn send_break(&mut self) -> Result<(), Error> {
        let result = match self.link.as_mut() {
            Some(link) => link.write_frame(BREAK_FRAME),
            None => Err(Error::NoConnection),
        };
        self.identity = None;
        self.programming_mode = false;
        result
    }

    fn enter_programming_mode(&mut self) -> Result<(), Error> {
        let (id, _) = self.handshake()?;
        match id.mode {
            ProtocolMode::C => {
                self.option(OptionSelectMessage {
                    option: OptionId::ProgrammingMode,
                    pcc: Pcc::Normal,
                    bri: id.bri,
                    skip_handshake: true,
                })?;
                Ok(())
            }
            ProtocolMode::B if self.password.is_some() => {
                let payload = message::pack_data_set(&DataSet::default());
                self.pass_exchange(&payload)
            }
            // modes A and B without a password are already in programming
            // mode after the handshake
            _ => Ok(()),
        }
    }

    fn pass_exchange(&mut self, payload: &[u8]) -> Result<(), Error> {
        let mut operand = if payload.is_empty() {
            DataSet::default()
        } else {
            message::parse_data_set(payload)?
        };
        // the operand address is not echoed back to the meter
        operand.address.clear();

        let password = match self.password.as_mut() {
            Some(password) => password,
            None => {
                self.programming_mode = true;
                return Ok(());
            }
        };
        let (value, id) = password(operand);
        let msg = message::pack_command(&Command {
            id,
            payload: Some(value),
        });
        let data = match self.cmd(&msg) {
            Ok(data) => data,
            Err(Error::Nak) => return Err(Error::InvalidPassword),
            Err(err) => return Err(err),
        };

        if data.first() == Some(&ACK) {
            self.programming_mode = true;
            return Ok(());
        }
        if data.starts_with(b"B0") {
            return Err(Error::DeviceBreak);
        }
        match message::parse_data_set(&data) {
            Ok(set) if !set.value.is_empty() => Err(Error::PasswordRejected(set.value)),
            _ => Err(Error::InvalidPassword),
        }
    }

    fn handshake(&mut self) -> Result<(Identity, Option<DataBlock>), Error> {
        self.identity = None;
        self.programming_mode = false;

        self.link_mut()?.set_baud_rate(HANDSHAKE_BAUD_RATE)?;
        let request = message::pack_request(&self.address);
        let data = self.cmd(&request)?;
        let id = message::parse_identity(&data)?;

        if id.mode == ProtocolMode::C {
            // the meter now awaits our option-select
            self.identity = Some(id.clone());
            return Ok((id, None));
        }

        // modes A and B follow up with the data block; mode B sends it at
        // the rate proposed by the bri byte, then the line returns to 300
        let link = self.link_mut()?;
        if id.mode == ProtocolMode::B {
            link.set_baud_rate(message::decode_baud_rate(id.bri))?;
        }
        let read = link.read_frame();
        if id.mode == ProtocolMode::B {
            link.set_baud_rate(HANDSHAKE_BAUD_RATE)?;
        }
        let data = read?;

        self.last_activity = Instant::now();
        self.programming_mode = true;
        let block = message::parse_data_block(&data)?;
        self.identity = Some(id.clone());
        Ok((id, Some(block)))
    }

    /// Sends a frame and reads the matching response, repeating on NAK up
    /// to the attempt cap. Success refreshes the idle clock.
    fn cmd(&mut self, msg: &[u8]) -> Result<Vec<u8>, Error> {
        for _ in 0..MAX_SEND_ATTEMPTS {
            self.link_mut()?.write_frame(msg)?;
            match self.link_mut()?.read_frame() {
                Ok(data) => {
                    self.last_activity = Instant::now();
                    return Ok(data);
                }
                Err(Error::Nak) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(Error::Nak)
    }

    fn link_mut(&mut self) -> Result<&mut Link<P>, Error> {
        self.link.as_mut().ok_or(Error::NoConnection)
    }

    fn effective_idle_timeout(&self) -> Duration {
        if self.idle_timeout.is_zero() {
            DEFAULT_IDLE_TIMEOUT
        } else {
            self.idle_timeout
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPort;

    fn device(port: &MockPort) -> TariffDevice<MockPort> {
        TariffDevice::new(Link::new(port.clone()))
    }

    fn identity(mode: ProtocolMode, bri: u8) -> Identity {
        Identity {
            manufacturer: "iek".into(),
            device: "test".into(),
            mode,
            bri,
        }
    }

    #[test]
    fn new_session_defaults() {
        let port = MockPort::new();
        let device = device(&port);
        assert_eq!(device.address, "");
        assert_eq!(device.idle_timeout, DEFAULT_IDLE_TIMEOUT);
        assert!(!device.programming_mode);
        assert!(device.identity.is_none());
    }

    #[test]
    fn with_address_sets_request_address() {
        let port = MockPort::new();
        let device = TariffDevice::with_address(Link::new(port.clone()), "12345678");
        assert_eq!(device.address, "12345678");
    }

    #[test]
    fn programming_mode_requires_identity_flag_and_freshness() {
        let port = MockPort::new();
        let mut device = device(&port);

        // flag without identity
        device.programming_mode = true;
        assert!(!device.is_in_programming_mode());

        // identity and fresh activity
        device.identity = Some(identity(ProtocolMode::C, b'6'));
        device.last_activity = Instant::now();
        assert!(device.is_in_programming_mode());

        // cleared flag
        device.drop_programming_mode();
        assert!(!device.is_in_programming_mode());

        // stale activity
        device.programming_mode = true;
        device.idle_timeout = Duration::from_millis(5);
        std::thread::sleep(Duration::from_millis(15));
        assert!(!device.is_in_programming_mode());
    }

    #[test]
    fn zero_idle_timeout_means_default() {
        let port = MockPort::new();
        let mut device = device(&port);
        device.identity = Some(identity(ProtocolMode::A, b'X'));
        device.programming_mode = true;
        device.last_activity = Instant::now();
        device.set_idle_timeout(Duration::ZERO);
        assert!(device.is_in_programming_mode());
    }

    #[test]
    fn reset_replaces_link_and_clears_state() {
        let port = MockPort::new();
        let mut device = device(&port);
        device.identity = Some(identity(ProtocolMode::C, b'6'));
        device.programming_mode = true;

        device.reset(Link::new(MockPort::new()));
        assert!(device.identity.is_none());
        assert!(!device.programming_mode);
    }

    #[test]
    fn closed_session_reports_no_connection() {
        let port = MockPort::new();
        let mut device = device(&port);
        device.close().unwrap();
        assert!(matches!(device.read_out(), Err(Error::NoConnection)));
        assert!(matches!(device.send_break(), Err(Error::NoConnection)));
    }
}
