//! FINS commands and request construction.
//!
//! A [`Request`] is the structured, already-validated form of one FINS command.
//! It records what the caller asked for (command code, options, address and
//! data) and knows how to serialize its command body. The header, and with it
//! the SID, is added by the connection at transmit time.
//!
//! # Command Codes
//!
//! | Code | Command |
//! |------|---------|
//! | 0101 | Memory area read |
//! | 0102 | Memory area write |
//! | 0103 | Memory area fill |
//! | 0104 | Multiple memory area read |
//! | 0105 | Memory area transfer |
//! | 0401 | Run |
//! | 0402 | Stop |
//! | 0501 | CPU unit data read |
//! | 0601 | Controller status read |
//!
//! # Example
//!
//! ```
//! use omron_fins_link::{CommandCode, CommandOptions, Request};
//!
//! let request = Request::write("D100", vec![0x1234, 0x5678], CommandOptions::default()).unwrap();
//! assert_eq!(request.command, CommandCode::MEMORY_AREA_WRITE);
//! assert_eq!(request.command.to_string(), "0102");
//! assert_eq!(request.address.as_deref(), Some("D100"));
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::{FinsError, Result};
use crate::header::NodeAddress;
use crate::memory::MemoryAddress;

/// Maximum number of words that can be read/written in a single command.
pub const MAX_WORDS_PER_COMMAND: u16 = 999;

/// Program number meaning "the current program" for run/stop.
const CURRENT_PROGRAM: [u8; 2] = [0xFF, 0xFF];

/// A FINS command code: main request code (MRC) and sub request code (SRC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandCode {
    /// Main request code.
    pub mrc: u8,
    /// Sub request code.
    pub src: u8,
}

impl CommandCode {
    /// Memory area read (0101).
    pub const MEMORY_AREA_READ: Self = Self::new(0x01, 0x01);
    /// Memory area write (0102).
    pub const MEMORY_AREA_WRITE: Self = Self::new(0x01, 0x02);
    /// Memory area fill (0103).
    pub const MEMORY_AREA_FILL: Self = Self::new(0x01, 0x03);
    /// Multiple memory area read (0104).
    pub const MULTIPLE_MEMORY_AREA_READ: Self = Self::new(0x01, 0x04);
    /// Memory area transfer (0105).
    pub const MEMORY_AREA_TRANSFER: Self = Self::new(0x01, 0x05);
    /// Run (0401).
    pub const RUN: Self = Self::new(0x04, 0x01);
    /// Stop (0402).
    pub const STOP: Self = Self::new(0x04, 0x02);
    /// CPU unit data read (0501).
    pub const CPU_UNIT_DATA_READ: Self = Self::new(0x05, 0x01);
    /// Controller status read (0601).
    pub const CONTROLLER_STATUS_READ: Self = Self::new(0x06, 0x01);

    /// Creates a command code from MRC and SRC.
    pub const fn new(mrc: u8, src: u8) -> Self {
        Self { mrc, src }
    }

    /// Returns the command code as MRC/SRC bytes.
    pub fn to_bytes(self) -> [u8; 2] {
        [self.mrc, self.src]
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.mrc, self.src)
    }
}

impl Serialize for CommandCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// PLC operating mode for the run command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlcMode {
    /// Debug mode - step execution.
    Debug,
    /// Monitor mode - run with monitoring enabled.
    #[default]
    Monitor,
    /// Run mode - normal execution.
    Run,
}

impl PlcMode {
    /// Returns the FINS code for this mode.
    pub(crate) fn code(self) -> u8 {
        match self {
            PlcMode::Debug => 0x01,
            PlcMode::Monitor => 0x02,
            PlcMode::Run => 0x04,
        }
    }
}

/// Data carried by a write request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum WriteData {
    /// 16-bit words, written to a word address.
    Words(Vec<u16>),
    /// Bit values, written to a bit address.
    Bits(Vec<bool>),
}

impl WriteData {
    /// Number of elements to write.
    pub fn len(&self) -> usize {
        match self {
            WriteData::Words(words) => words.len(),
            WriteData::Bits(bits) => bits.len(),
        }
    }

    /// Returns `true` if there is nothing to write.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<u16>> for WriteData {
    fn from(words: Vec<u16>) -> Self {
        WriteData::Words(words)
    }
}

impl From<&[u16]> for WriteData {
    fn from(words: &[u16]) -> Self {
        WriteData::Words(words.to_vec())
    }
}

impl From<u16> for WriteData {
    fn from(word: u16) -> Self {
        WriteData::Words(vec![word])
    }
}

impl From<Vec<bool>> for WriteData {
    fn from(bits: Vec<bool>) -> Self {
        WriteData::Bits(bits)
    }
}

impl From<bool> for WriteData {
    fn from(bit: bool) -> Self {
        WriteData::Bits(vec![bit])
    }
}

/// Per-request options recorded on the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandOptions {
    /// Overrides the connection timeout for this request.
    #[serde(with = "crate::config::opt_millis")]
    pub timeout: Option<Duration>,
    /// Overrides the destination node for this request.
    pub destination: Option<NodeAddress>,
    /// Operating mode for the run command (default: monitor).
    pub mode: Option<PlcMode>,
}

/// Operation-specific parameters of a request.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RequestKind {
    Read {
        address: MemoryAddress,
        count: u16,
    },
    Write {
        address: MemoryAddress,
        data: WriteData,
    },
    Fill {
        address: MemoryAddress,
        value: u16,
        count: u16,
    },
    MultipleRead {
        addresses: Vec<MemoryAddress>,
    },
    Transfer {
        source: MemoryAddress,
        destination: MemoryAddress,
        count: u16,
    },
    Run {
        mode: PlcMode,
    },
    Stop,
    CpuUnitDataRead,
    ControllerStatusRead,
}

/// A validated FINS request, ready to be submitted on a connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Command code of the request.
    pub command: CommandCode,
    /// Options the request was built with.
    pub options: CommandOptions,
    /// Address string as given by the caller, for memory commands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Data to be written, for write commands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_to_be_written: Option<WriteData>,
    #[serde(skip)]
    pub(crate) kind: RequestKind,
}

fn parse_address(address: &str) -> Result<MemoryAddress> {
    if address.trim().is_empty() {
        return Err(FinsError::invalid_parameter("address", "address is not valid"));
    }
    address.parse()
}

fn check_count(count: u16) -> Result<()> {
    if count == 0 || count > MAX_WORDS_PER_COMMAND {
        return Err(FinsError::invalid_parameter(
            "count",
            format!("must be 1-{MAX_WORDS_PER_COMMAND}"),
        ));
    }
    Ok(())
}

impl Request {
    fn new(kind: RequestKind, command: CommandCode, options: CommandOptions) -> Self {
        Self {
            command,
            options,
            address: None,
            data_to_be_written: None,
            kind,
        }
    }

    /// Builds a memory area read of `count` elements starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is empty or invalid, or count is 0 or > 999.
    pub fn read(address: &str, count: u16, options: CommandOptions) -> Result<Self> {
        let parsed = parse_address(address)?;
        check_count(count)?;
        let mut request = Self::new(
            RequestKind::Read {
                address: parsed,
                count,
            },
            CommandCode::MEMORY_AREA_READ,
            options,
        );
        request.address = Some(address.to_string());
        Ok(request)
    }

    /// Builds a memory area write.
    ///
    /// Word data requires a word address. Word data written to a bit address
    /// is written as one bit per word (non-zero = ON).
    ///
    /// # Errors
    ///
    /// Returns an error if the address is empty or invalid, the data is empty
    /// or longer than 999 elements, or bit data targets a word address.
    pub fn write(address: &str, data: impl Into<WriteData>, options: CommandOptions) -> Result<Self> {
        let parsed = parse_address(address)?;
        let data = data.into();
        if data.is_empty() {
            return Err(FinsError::invalid_parameter("data", "data is not valid"));
        }
        if data.len() > MAX_WORDS_PER_COMMAND as usize {
            return Err(FinsError::invalid_parameter(
                "data",
                format!("must be 1-{MAX_WORDS_PER_COMMAND} elements"),
            ));
        }
        if parsed.bit.is_none() && matches!(data, WriteData::Bits(_)) {
            return Err(FinsError::invalid_parameter(
                "data",
                "bit data requires a bit address",
            ));
        }

        let mut request = Self::new(
            RequestKind::Write {
                address: parsed,
                data: data.clone(),
            },
            CommandCode::MEMORY_AREA_WRITE,
            options,
        );
        request.address = Some(address.to_string());
        request.data_to_be_written = Some(data);
        Ok(request)
    }

    /// Builds a memory area fill of `count` words with `value`.
    pub fn fill(address: &str, value: u16, count: u16, options: CommandOptions) -> Result<Self> {
        let parsed = parse_address(address)?;
        if parsed.bit.is_some() {
            return Err(FinsError::invalid_addressing("fill requires a word address"));
        }
        check_count(count)?;
        let mut request = Self::new(
            RequestKind::Fill {
                address: parsed,
                value,
                count,
            },
            CommandCode::MEMORY_AREA_FILL,
            options,
        );
        request.address = Some(address.to_string());
        request.data_to_be_written = Some(WriteData::Words(vec![value]));
        Ok(request)
    }

    /// Builds a multiple memory area read; one element per address.
    pub fn read_multiple(addresses: &[&str], options: CommandOptions) -> Result<Self> {
        if addresses.is_empty() {
            return Err(FinsError::invalid_parameter("addresses", "must not be empty"));
        }
        let parsed = addresses
            .iter()
            .map(|a| parse_address(a))
            .collect::<Result<Vec<_>>>()?;
        let mut request = Self::new(
            RequestKind::MultipleRead { addresses: parsed },
            CommandCode::MULTIPLE_MEMORY_AREA_READ,
            options,
        );
        request.address = Some(addresses.join(","));
        Ok(request)
    }

    /// Builds a memory area transfer of `count` words from `source` to `destination`.
    pub fn transfer(
        source: &str,
        destination: &str,
        count: u16,
        options: CommandOptions,
    ) -> Result<Self> {
        let src = parse_address(source)?;
        let dst = parse_address(destination)?;
        if src.bit.is_some() || dst.bit.is_some() {
            return Err(FinsError::invalid_addressing("transfer requires word addresses"));
        }
        check_count(count)?;
        let mut request = Self::new(
            RequestKind::Transfer {
                source: src,
                destination: dst,
                count,
            },
            CommandCode::MEMORY_AREA_TRANSFER,
            options,
        );
        request.address = Some(format!("{source}->{destination}"));
        Ok(request)
    }

    /// Builds a run command; the mode comes from `options.mode`.
    pub fn run(options: CommandOptions) -> Self {
        let mode = options.mode.unwrap_or_default();
        Self::new(RequestKind::Run { mode }, CommandCode::RUN, options)
    }

    /// Builds a stop command.
    pub fn stop(options: CommandOptions) -> Self {
        Self::new(RequestKind::Stop, CommandCode::STOP, options)
    }

    /// Builds a CPU unit data read.
    pub fn cpu_unit_data_read(options: CommandOptions) -> Self {
        Self::new(
            RequestKind::CpuUnitDataRead,
            CommandCode::CPU_UNIT_DATA_READ,
            options,
        )
    }

    /// Builds a controller status read.
    pub fn status(options: CommandOptions) -> Self {
        Self::new(
            RequestKind::ControllerStatusRead,
            CommandCode::CONTROLLER_STATUS_READ,
            options,
        )
    }

    /// Appends the command code and parameters (everything after the header).
    pub(crate) fn encode_body(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.extend_from_slice(&self.command.to_bytes());
        match &self.kind {
            RequestKind::Read { address, count } => {
                let (code, addr) = address.encode()?;
                bytes.push(code);
                bytes.extend_from_slice(&addr);
                bytes.extend_from_slice(&count.to_be_bytes());
            }
            RequestKind::Write { address, data } => {
                let (code, addr) = address.encode()?;
                bytes.push(code);
                bytes.extend_from_slice(&addr);
                bytes.extend_from_slice(&(data.len() as u16).to_be_bytes());
                match (address.bit, data) {
                    (None, WriteData::Words(words)) => {
                        for word in words {
                            bytes.extend_from_slice(&word.to_be_bytes());
                        }
                    }
                    (Some(_), WriteData::Words(words)) => {
                        bytes.extend(words.iter().map(|w| u8::from(*w != 0)));
                    }
                    (Some(_), WriteData::Bits(bits)) => {
                        bytes.extend(bits.iter().map(|b| u8::from(*b)));
                    }
                    (None, WriteData::Bits(_)) => {
                        return Err(FinsError::invalid_parameter(
                            "data",
                            "bit data requires a bit address",
                        ));
                    }
                }
            }
            RequestKind::Fill {
                address,
                value,
                count,
            } => {
                let (code, addr) = address.encode()?;
                bytes.push(code);
                bytes.extend_from_slice(&addr);
                bytes.extend_from_slice(&count.to_be_bytes());
                bytes.extend_from_slice(&value.to_be_bytes());
            }
            RequestKind::MultipleRead { addresses } => {
                for address in addresses {
                    let (code, addr) = address.encode()?;
                    bytes.push(code);
                    bytes.extend_from_slice(&addr);
                }
            }
            RequestKind::Transfer {
                source,
                destination,
                count,
            } => {
                let (src_code, src_addr) = source.encode()?;
                let (dst_code, dst_addr) = destination.encode()?;
                bytes.push(src_code);
                bytes.extend_from_slice(&src_addr);
                bytes.push(dst_code);
                bytes.extend_from_slice(&dst_addr);
                bytes.extend_from_slice(&count.to_be_bytes());
            }
            RequestKind::Run { mode } => {
                bytes.extend_from_slice(&CURRENT_PROGRAM);
                bytes.push(mode.code());
            }
            RequestKind::Stop => bytes.extend_from_slice(&CURRENT_PROGRAM),
            RequestKind::CpuUnitDataRead | RequestKind::ControllerStatusRead => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryArea;

    fn body(request: &Request) -> Vec<u8> {
        let mut bytes = Vec::new();
        request.encode_body(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_command_code_display() {
        assert_eq!(CommandCode::MEMORY_AREA_WRITE.to_string(), "0102");
        assert_eq!(CommandCode::CONTROLLER_STATUS_READ.to_string(), "0601");
        assert_eq!(
            serde_json::to_string(&CommandCode::RUN).unwrap(),
            "\"0401\""
        );
    }

    #[test]
    fn test_write_words_body() {
        let request = Request::write("D100", vec![0x1234, 0x5678], CommandOptions::default()).unwrap();
        assert_eq!(body(&request), hex::decode("0102820064000002 12345678".replace(' ', "")).unwrap());
        assert_eq!(
            request.data_to_be_written,
            Some(WriteData::Words(vec![0x1234, 0x5678]))
        );
    }

    #[test]
    fn test_write_bits_body() {
        let request = Request::write("W1.03", vec![true, false], CommandOptions::default()).unwrap();
        assert_eq!(body(&request), hex::decode("0102310001030002 0100".replace(' ', "")).unwrap());
    }

    #[test]
    fn test_write_words_to_bit_address() {
        let request = Request::write("CIO0.00", vec![0u16, 7], CommandOptions::default()).unwrap();
        assert_eq!(body(&request)[8..], [0x00, 0x01]);
    }

    #[test]
    fn test_write_validation() {
        let opts = CommandOptions::default;
        assert!(matches!(
            Request::write("", 1u16, opts()),
            Err(FinsError::InvalidParameter { .. })
        ));
        assert!(matches!(
            Request::write("D0", Vec::<u16>::new(), opts()),
            Err(FinsError::InvalidParameter { .. })
        ));
        assert!(Request::write("D0", vec![0u16; 1000], opts()).is_err());
        assert!(Request::write("D0", true, opts()).is_err());
        assert!(Request::write("Q7", 1u16, opts()).is_err());
    }

    #[test]
    fn test_read_body() {
        let request = Request::read("DM100", 10, CommandOptions::default()).unwrap();
        assert_eq!(body(&request), hex::decode("010182006400000a").unwrap());
        assert!(Request::read("D0", 0, CommandOptions::default()).is_err());
        assert!(Request::read("D0", 1000, CommandOptions::default()).is_err());
    }

    #[test]
    fn test_fill_body() {
        let request = Request::fill("D100", 0xABCD, 50, CommandOptions::default()).unwrap();
        assert_eq!(body(&request), hex::decode("01038200640000 32abcd".replace(' ', "")).unwrap());
        assert!(Request::fill("H0.1", 0, 1, CommandOptions::default()).is_err());
    }

    #[test]
    fn test_read_multiple_body() {
        let request = Request::read_multiple(&["D100", "CIO0.05"], CommandOptions::default()).unwrap();
        assert_eq!(body(&request), hex::decode("010482006400300000 05".replace(' ', "")).unwrap());
        assert!(Request::read_multiple(&[], CommandOptions::default()).is_err());
    }

    #[test]
    fn test_transfer_body() {
        let request = Request::transfer("D100", "D200", 10, CommandOptions::default()).unwrap();
        assert_eq!(
            body(&request),
            hex::decode("0105820064008200c800000a".replace(' ', "")).unwrap()
        );
    }

    #[test]
    fn test_run_defaults_to_monitor() {
        let request = Request::run(CommandOptions::default());
        assert_eq!(body(&request), vec![0x04, 0x01, 0xFF, 0xFF, 0x02]);

        let request = Request::run(CommandOptions {
            mode: Some(PlcMode::Run),
            ..CommandOptions::default()
        });
        assert_eq!(body(&request)[4], 0x04);
    }

    #[test]
    fn test_control_bodies() {
        assert_eq!(body(&Request::stop(CommandOptions::default())), vec![0x04, 0x02, 0xFF, 0xFF]);
        assert_eq!(body(&Request::status(CommandOptions::default())), vec![0x06, 0x01]);
        assert_eq!(
            body(&Request::cpu_unit_data_read(CommandOptions::default())),
            vec![0x05, 0x01]
        );
    }

    #[test]
    fn test_request_serializes_caller_fields() {
        let request = Request::write("D5", 42u16, CommandOptions::default()).unwrap();
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["command"], "0102");
        assert_eq!(json["address"], "D5");
        assert_eq!(json["dataToBeWritten"], serde_json::json!([42]));
        assert_eq!(
            request.kind,
            RequestKind::Write {
                address: MemoryAddress::word(MemoryArea::DM, 5),
                data: WriteData::Words(vec![42]),
            }
        );
    }
}
