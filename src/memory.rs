//! Memory areas and string addresses.
//!
//! Requests carry their target address as a string such as `"D100"` or
//! `"CIO0.05"`. [`MemoryAddress`] parses that form into an area, a word and an
//! optional bit so the codec can build the frame.
//!
//! | Prefix | Area | Word Access | Bit Access |
//! |--------|------|:-----------:|:----------:|
//! | `C`, `CIO` | [`MemoryArea::CIO`] | ✓ | ✓ |
//! | `W`, `WR` | [`MemoryArea::WR`] | ✓ | ✓ |
//! | `H`, `HR` | [`MemoryArea::HR`] | ✓ | ✓ |
//! | `D`, `DM` | [`MemoryArea::DM`] | ✓ | ✗ |
//! | `A`, `AR` | [`MemoryArea::AR`] | ✓ | ✓ |
//!
//! # Example
//!
//! ```
//! use omron_fins_link::{MemoryAddress, MemoryArea};
//!
//! let addr: MemoryAddress = "D100".parse().unwrap();
//! assert_eq!(addr.area, MemoryArea::DM);
//! assert_eq!(addr.word, 100);
//! assert_eq!(addr.bit, None);
//!
//! let bit: MemoryAddress = "CIO0.05".parse().unwrap();
//! assert_eq!(bit.bit, Some(5));
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{FinsError, Result};

/// Memory areas available in Omron PLCs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryArea {
    /// CIO (Core I/O) area - general purpose I/O and internal relays.
    CIO,
    /// WR (Work) area - work bits/words.
    WR,
    /// HR (Holding) area - holding bits/words that retain values.
    HR,
    /// DM (Data Memory) area - word-only data storage.
    DM,
    /// AR (Auxiliary Relay) area - system status and control bits/words.
    AR,
}

impl MemoryArea {
    /// Returns the FINS code for word access to this memory area.
    pub(crate) fn word_code(self) -> u8 {
        match self {
            MemoryArea::CIO => 0xB0,
            MemoryArea::WR => 0xB1,
            MemoryArea::HR => 0xB2,
            MemoryArea::DM => 0x82,
            MemoryArea::AR => 0xB3,
        }
    }

    /// Returns the FINS code for bit access to this memory area.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::InvalidAddressing` for the DM area.
    pub(crate) fn bit_code(self) -> Result<u8> {
        match self {
            MemoryArea::CIO => Ok(0x30),
            MemoryArea::WR => Ok(0x31),
            MemoryArea::HR => Ok(0x32),
            MemoryArea::DM => Err(FinsError::invalid_addressing(
                "DM area does not support bit access",
            )),
            MemoryArea::AR => Ok(0x33),
        }
    }

    /// Returns whether this memory area supports bit access.
    pub fn supports_bit_access(self) -> bool {
        !matches!(self, MemoryArea::DM)
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_uppercase().as_str() {
            "C" | "CIO" => Some(MemoryArea::CIO),
            "W" | "WR" => Some(MemoryArea::WR),
            "H" | "HR" => Some(MemoryArea::HR),
            "D" | "DM" => Some(MemoryArea::DM),
            "A" | "AR" => Some(MemoryArea::AR),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryArea::CIO => write!(f, "CIO"),
            MemoryArea::WR => write!(f, "WR"),
            MemoryArea::HR => write!(f, "HR"),
            MemoryArea::DM => write!(f, "DM"),
            MemoryArea::AR => write!(f, "AR"),
        }
    }
}

/// A parsed PLC memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryAddress {
    /// Memory area.
    pub area: MemoryArea,
    /// Word offset within the area.
    pub word: u16,
    /// Bit position (0-15) for bit addresses.
    pub bit: Option<u8>,
}

impl MemoryAddress {
    /// Creates a word address.
    pub fn word(area: MemoryArea, word: u16) -> Self {
        Self {
            area,
            word,
            bit: None,
        }
    }

    /// Creates a bit address.
    ///
    /// # Errors
    ///
    /// Returns an error if `bit > 15` or the area has no bit access.
    pub fn bit(area: MemoryArea, word: u16, bit: u8) -> Result<Self> {
        if bit > 15 {
            return Err(FinsError::invalid_parameter("bit", "must be 0-15"));
        }
        area.bit_code()?;
        Ok(Self {
            area,
            word,
            bit: Some(bit),
        })
    }

    /// Returns the area code and the 3 address bytes (word high, word low, bit).
    pub(crate) fn encode(self) -> Result<(u8, [u8; 3])> {
        let [hi, lo] = self.word.to_be_bytes();
        match self.bit {
            Some(bit) => Ok((self.area.bit_code()?, [hi, lo, bit])),
            None => Ok((self.area.word_code(), [hi, lo, 0x00])),
        }
    }
}

impl FromStr for MemoryAddress {
    type Err = FinsError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let split = s
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| FinsError::invalid_addressing(format!("'{s}' has no word offset")))?;
        let (prefix, rest) = s.split_at(split);

        let area = MemoryArea::from_prefix(prefix)
            .ok_or_else(|| FinsError::invalid_addressing(format!("unknown area '{prefix}'")))?;

        let (word, bit) = match rest.split_once('.') {
            Some((word, bit)) => (word, Some(bit)),
            None => (rest, None),
        };
        let word: u16 = word
            .parse()
            .map_err(|_| FinsError::invalid_addressing(format!("invalid word offset in '{s}'")))?;

        match bit {
            Some(bit) => {
                let bit: u8 = bit
                    .parse()
                    .map_err(|_| FinsError::invalid_addressing(format!("invalid bit in '{s}'")))?;
                Self::bit(area, word, bit)
            }
            None => Ok(Self::word(area, word)),
        }
    }
}

impl fmt::Display for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bit {
            Some(bit) => write!(f, "{}{}.{:02}", self.area, self.word, bit),
            None => write!(f, "{}{}", self.area, self.word),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_codes() {
        assert_eq!(MemoryArea::CIO.word_code(), 0xB0);
        assert_eq!(MemoryArea::DM.word_code(), 0x82);
        assert_eq!(MemoryArea::AR.word_code(), 0xB3);
    }

    #[test]
    fn test_dm_has_no_bit_code() {
        assert!(MemoryArea::DM.bit_code().is_err());
        assert_eq!(MemoryArea::HR.bit_code().unwrap(), 0x32);
    }

    #[test]
    fn test_parse_short_and_long_prefixes() {
        let d: MemoryAddress = "D100".parse().unwrap();
        let dm: MemoryAddress = "DM100".parse().unwrap();
        assert_eq!(d, dm);
        assert_eq!(d, MemoryAddress::word(MemoryArea::DM, 100));

        let w: MemoryAddress = "w3".parse().unwrap();
        assert_eq!(w.area, MemoryArea::WR);
    }

    #[test]
    fn test_parse_bit() {
        let addr: MemoryAddress = "CIO0.05".parse().unwrap();
        assert_eq!(addr, MemoryAddress::bit(MemoryArea::CIO, 0, 5).unwrap());
        assert_eq!(addr.to_string(), "CIO0.05");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("".parse::<MemoryAddress>().is_err());
        assert!("X100".parse::<MemoryAddress>().is_err());
        assert!("D".parse::<MemoryAddress>().is_err());
        assert!("H10.16".parse::<MemoryAddress>().is_err());
        assert!("D10.1".parse::<MemoryAddress>().is_err());
        assert!("D70000".parse::<MemoryAddress>().is_err());
    }

    #[test]
    fn test_encode() {
        let (code, bytes) = MemoryAddress::word(MemoryArea::DM, 0x1234).encode().unwrap();
        assert_eq!(code, 0x82);
        assert_eq!(bytes, [0x12, 0x34, 0x00]);

        let (code, bytes) = "W1.15".parse::<MemoryAddress>().unwrap().encode().unwrap();
        assert_eq!(code, 0x31);
        assert_eq!(bytes, [0x00, 0x01, 0x0F]);
    }
}
