//! # IEC 62056-21 Message Codec
//!
//! Binary marshalling for every message kind exchanged with a tariff
//! device: request, identification, option-select, data set / line / block,
//! and programming commands. Incoming messages are decoded with `nom` from
//! the complete frame payload delivered by the framed reader; outgoing
//! messages are packed into plain byte vectors and handed to the framed
//! writer, which appends the checksum or CR LF suffix.
//!
//! A data set is the atomic unit of meter data and reads
//! `address(value*unit)` on the wire. Data sets concatenate into data
//! lines, data lines joined by CR LF form the data block that makes up a
//! read-out.

use nom::bytes::complete::{tag, take, take_until};
use nom::IResult;

use crate::constants::{ACK, CR, END, ETX, FB, LF, RB, SOH, STAR, START, STX, TRC};
use crate::error::Error;

/// Protocol operating mode, derived from the baud-rate indicator of the
/// identification message (mode D is stamped by the immediate read-out).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolMode {
    A,
    B,
    C,
    D,
}

/// Protocol control character of an option-select message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pcc {
    /// `'0'`, the standard protocol procedure.
    Normal,
    /// `'1'`, manufacturer-defined secondary procedure.
    Secondary,
}

impl Pcc {
    pub fn as_byte(self) -> u8 {
        match self {
            Pcc::Normal => b'0',
            Pcc::Secondary => b'1',
        }
    }
}

/// Selector byte of a mode C option-select message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionId {
    /// `'0'`, request the data read-out.
    DataReadOut,
    /// `'1'`, enter programming mode.
    ProgrammingMode,
    /// `'6'`..`'9'`, manufacturer-defined operation.
    Option6,
    Option7,
    Option8,
    Option9,
}

impl OptionId {
    pub fn as_byte(self) -> u8 {
        match self {
            OptionId::DataReadOut => b'0',
            OptionId::ProgrammingMode => b'1',
            OptionId::Option6 => b'6',
            OptionId::Option7 => b'7',
            OptionId::Option8 => b'8',
            OptionId::Option9 => b'9',
        }
    }
}

/// Two-letter programming command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandId {
    P0,
    P1,
    P2,
    W1,
    W2,
    R1,
    R2,
    E2,
    B0,
}

impl CommandId {
    pub fn code(self) -> [u8; 2] {
        match self {
            CommandId::P0 => *b"P0",
            CommandId::P1 => *b"P1",
            CommandId::P2 => *b"P2",
            CommandId::W1 => *b"W1",
            CommandId::W2 => *b"W2",
            CommandId::R1 => *b"R1",
            CommandId::R2 => *b"R2",
            CommandId::E2 => *b"E2",
            CommandId::B0 => *b"B0",
        }
    }
}

/// A single `address(value*unit)` tuple. All fields may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataSet {
    pub address: String,
    pub value: String,
    pub unit: String,
}

/// An ordered sequence of data sets forming one logical line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataLine {
    pub sets: Vec<DataSet>,
}

/// An ordered sequence of data lines forming a message body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataBlock {
    pub lines: Vec<DataLine>,
}

/// A meter command to send while in programming mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub id: CommandId,
    pub payload: Option<DataSet>,
}

/// Mode C option negotiation message. The baud-rate indicator is filled in
/// by the session from the cached identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSelectMessage {
    pub option: OptionId,
    pub pcc: Pcc,
    pub(crate) bri: u8,
    pub(crate) skip_handshake: bool,
}

impl OptionSelectMessage {
    pub fn new(option: OptionId, pcc: Pcc) -> Self {
        OptionSelectMessage {
            option,
            pcc,
            bri: 0,
            skip_handshake: false,
        }
    }
}

/// Parsed identification response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Three-character manufacturer code.
    pub manufacturer: String,
    /// Device identification string.
    pub device: String,
    /// Operating mode encoded by the baud-rate indicator.
    pub mode: ProtocolMode,
    /// Raw baud-rate indicator byte.
    pub bri: u8,
}

/// The pre-built break command frame; the framed writer appends the BCC.
pub(crate) const BREAK_FRAME: &[u8] = &[SOH, b'B', b'0', ETX];

/// Block check character: longitudinal sum masked to 7 bits.
pub fn bcc(data: &[u8]) -> u8 {
    let mut check: u8 = 0;
    for &byte in data {
        check = check.wrapping_add(byte);
    }
    check & 0x7f
}

/// Operating mode encoded by a baud-rate indicator byte.
pub fn decode_mode(bri: u8) -> ProtocolMode {
    match bri {
        b'0'..=b'9' => ProtocolMode::C,
        b'A'..=b'I' => ProtocolMode::B,
        _ => ProtocolMode::A,
    }
}

/// Baud rate proposed by a baud-rate indicator byte; 300 for anything
/// outside the indexed table.
pub fn decode_baud_rate(bri: u8) -> u32 {
    match bri {
        b'A' | b'1' => 600,
        b'B' | b'2' => 1200,
        b'C' | b'3' => 2400,
        b'D' | b'4' => 4800,
        b'E' | b'5' => 9600,
        _ => 300,
    }
}

/// Packs a request message `/?address!`. The address is empty for a
/// broadcast request.
pub fn pack_request(address: &str) -> Vec<u8> {
    let mut msg = Vec::with_capacity(address.len() + 3);
    msg.push(START);
    msg.push(TRC);
    msg.extend_from_slice(address.as_bytes());
    msg.push(END);
    msg
}

/// Packs a data set. A fully empty set packs to zero bytes, not to `()`.
pub fn pack_data_set(set: &DataSet) -> Vec<u8> {
    if set.address.is_empty() && set.value.is_empty() && set.unit.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(set.address.len() + set.value.len() + set.unit.len() + 3);
    out.extend_from_slice(set.address.as_bytes());
    out.push(FB);
    out.extend_from_slice(set.value.as_bytes());
    if !set.unit.is_empty() {
        out.push(STAR);
        out.extend_from_slice(set.unit.as_bytes());
    }
    out.push(RB);
    out
}

/// Packs a command frame `SOH cmd [STX payload] ETX`. The STX section is
/// omitted when the payload is absent or packs to zero bytes.
pub fn pack_command(command: &Command) -> Vec<u8> {
    let payload = command
        .payload
        .as_ref()
        .map(pack_data_set)
        .unwrap_or_default();
    let code = command.id.code();
    let mut out = Vec::with_capacity(payload.len() + 6);
    out.push(SOH);
    out.extend_from_slice(&code);
    if !payload.is_empty() {
        out.push(STX);
        out.extend_from_slice(&payload);
    }
    out.push(ETX);
    out
}

/// Packs an option-select message `ACK pcc bri option`.
pub fn pack_option_select(message: &OptionSelectMessage) -> Vec<u8> {
    vec![
        ACK,
        message.pcc.as_byte(),
        message.bri,
        message.option.as_byte(),
    ]
}

fn set_boundaries(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    let (input, address) = take_until(&b"("[..])(input)?;
    let (input, _) = tag(&b"("[..])(input)?;
    let (input, inner) = take_until(&b")"[..])(input)?;
    let (input, _) = tag(&b")"[..])(input)?;
    Ok((input, (address, inner)))
}

/// Decodes a single data set.
pub fn parse_data_set(input: &[u8]) -> Result<DataSet, Error> {
    if !input.contains(&FB) {
        return Err(Error::Codec("front boundary is missing".into()));
    }
    let (_, (address, inner)) =
        set_boundaries(input).map_err(|_| Error::Codec("rear boundary is missing".into()))?;
    let (value, unit) = match inner.iter().position(|&byte| byte == STAR) {
        Some(split) => (&inner[..split], &inner[split + 1..]),
        None => (inner, &inner[..0]),
    };
    Ok(DataSet {
        address: String::from_utf8_lossy(address).into_owned(),
        value: String::from_utf8_lossy(value).into_owned(),
        unit: String::from_utf8_lossy(unit).into_owned(),
    })
}

/// Decodes a data line by scanning tokens that end at each rear boundary.
/// A tail with no rear boundary is the block end marker, not a set.
pub fn parse_data_line(input: &[u8]) -> Result<DataLine, Error> {
    let mut sets = Vec::new();
    let mut rest = input;
    while let Some(end) = rest.iter().position(|&byte| byte == RB) {
        sets.push(parse_data_set(&rest[..=end])?);
        rest = &rest[end + 1..];
    }
    Ok(DataLine { sets })
}

/// Decodes a data block: CR LF separated data lines, with the trailing ETX
/// stripped and terminator-only lines skipped.
pub fn parse_data_block(input: &[u8]) -> Result<DataBlock, Error> {
    let body = match input.last() {
        Some(&ETX) => &input[..input.len() - 1],
        _ => input,
    };
    let mut lines = Vec::new();
    for raw in body.split(|&byte| byte == LF) {
        let raw = match raw.last() {
            Some(&CR) => &raw[..raw.len() - 1],
            _ => raw,
        };
        if raw.is_empty() {
            continue;
        }
        let line = parse_data_line(raw)?;
        if !line.sets.is_empty() {
            lines.push(line);
        }
    }
    Ok(DataBlock { lines })
}

fn identity_header(input: &[u8]) -> IResult<&[u8], (&[u8], u8)> {
    let (input, manufacturer) = take(3usize)(input)?;
    let (input, bri) = nom::number::complete::u8(input)?;
    Ok((input, (manufacturer, bri)))
}

/// Decodes an identification response: three manufacturer characters, the
/// baud-rate indicator, then the device id up to the trailing CR LF.
pub fn parse_identity(input: &[u8]) -> Result<Identity, Error> {
    let (device, (manufacturer, bri)) =
        identity_header(input).map_err(|_| Error::Codec("identity message too short".into()))?;
    let device = match device.len() {
        0..=1 => &device[..0],
        len => &device[..len - 2],
    };
    Ok(Identity {
        manufacturer: String::from_utf8_lossy(manufacturer).into_owned(),
        device: String::from_utf8_lossy(device).into_owned(),
        mode: decode_mode(bri),
        bri,
    })
}
