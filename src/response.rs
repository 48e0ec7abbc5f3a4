//! Decoded FINS responses.
//!
//! | Component | Size | Description |
//! |-----------|------|-------------|
//! | Header | 10 bytes | FINS header, ICF has the response bit set |
//! | MRC | 1 byte | Main Response Code (echo of the command) |
//! | SRC | 1 byte | Sub Response Code (echo of the command) |
//! | Main Code | 1 byte | End code, main part |
//! | Sub Code | 1 byte | End code, sub part |
//! | Data | Variable | Response data (if any) |

use std::fmt;

use serde::{Serialize, Serializer};

use crate::command::CommandCode;
use crate::error::{fins_error_description, FinsError, Result};
use crate::header::{FinsHeader, FINS_HEADER_SIZE};

/// Minimum response size: header (10) + MRC + SRC + main code + sub code.
pub const MIN_RESPONSE_SIZE: usize = FINS_HEADER_SIZE + 4;

/// End code value of a successful exchange (`"0000"`).
pub const END_CODE_SUCCESS: u16 = 0x0000;

/// A FINS end code (main code and sub code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndCode {
    /// Main code.
    pub main: u8,
    /// Sub code.
    pub sub: u8,
}

impl EndCode {
    /// Creates an end code.
    pub const fn new(main: u8, sub: u8) -> Self {
        Self { main, sub }
    }

    /// End code as a 16-bit value.
    pub fn value(self) -> u16 {
        u16::from_be_bytes([self.main, self.sub])
    }

    /// Returns `true` only for `0000`.
    ///
    /// A normal completion that carries the relay error bit or a CPU error
    /// flag (`0040`, `0080`, `8000`) is not a success.
    pub fn is_success(self) -> bool {
        self.value() == END_CODE_SUCCESS
    }

    /// Human readable description of this end code.
    pub fn description(self) -> &'static str {
        fins_error_description(self.main, self.sub)
    }
}

impl fmt::Display for EndCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.main, self.sub)
    }
}

impl Serialize for EndCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A decoded FINS response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Service ID echoed by the PLC.
    pub sid: u8,
    /// Command code the response answers.
    pub command: CommandCode,
    /// End code.
    pub end_code: EndCode,
    /// Human readable end-code description.
    pub end_code_description: String,
    /// Response data after the end code.
    pub data: Vec<u8>,
}

impl Response {
    /// Parses a FINS response frame.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::InvalidResponse` if the frame is too short or is not
    /// a response.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_link::{CommandCode, Response};
    ///
    /// let bytes = [
    ///     0xC0, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x0A, 0x00, 0x07, // header, SID 7
    ///     0x01, 0x02, // MRC, SRC
    ///     0x00, 0x00, // end code
    /// ];
    /// let response = Response::from_bytes(&bytes).unwrap();
    /// assert_eq!(response.sid, 7);
    /// assert_eq!(response.command, CommandCode::MEMORY_AREA_WRITE);
    /// assert_eq!(response.end_code.to_string(), "0000");
    /// ```
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_RESPONSE_SIZE {
            return Err(FinsError::invalid_response(format!(
                "response too short: expected at least {} bytes, got {}",
                MIN_RESPONSE_SIZE,
                data.len()
            )));
        }

        let header = FinsHeader::from_bytes(&data[..FINS_HEADER_SIZE])?;
        if !header.is_response() {
            return Err(FinsError::invalid_response(format!(
                "ICF 0x{:02X} is not a response",
                header.icf
            )));
        }

        let end_code = EndCode::new(data[FINS_HEADER_SIZE + 2], data[FINS_HEADER_SIZE + 3]);
        Ok(Self {
            sid: header.sid,
            command: CommandCode::new(data[FINS_HEADER_SIZE], data[FINS_HEADER_SIZE + 1]),
            end_code,
            end_code_description: end_code.description().to_string(),
            data: data[MIN_RESPONSE_SIZE..].to_vec(),
        })
    }

    /// Returns whether the end code indicates normal completion.
    pub fn is_success(&self) -> bool {
        self.end_code.is_success()
    }

    /// Converts response data to big-endian words.
    ///
    /// # Errors
    ///
    /// Returns an error if the data length is odd.
    pub fn to_words(&self) -> Result<Vec<u16>> {
        if self.data.len() % 2 != 0 {
            return Err(FinsError::invalid_response(
                "data length must be even for word conversion",
            ));
        }

        Ok(self
            .data
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect())
    }

    /// Converts response data to bit values, one per byte.
    pub fn to_bits(&self) -> Vec<bool> {
        self.data.iter().map(|b| *b != 0).collect()
    }
}
