//! FINS header structures and node addressing.
//!
//! Every FINS frame starts with a 10-byte header:
//!
//! | Byte | Field | Description |
//! |------|-------|-------------|
//! | 0 | ICF | Information Control Field |
//! | 1 | RSV | Reserved (always 0x00) |
//! | 2 | GCT | Gateway Count |
//! | 3 | DNA | Destination Network Address |
//! | 4 | DA1 | Destination Node Address |
//! | 5 | DA2 | Destination Unit Address |
//! | 6 | SNA | Source Network Address |
//! | 7 | SA1 | Source Node Address |
//! | 8 | SA2 | Source Unit Address |
//! | 9 | SID | Service ID |
//!
//! The SID byte is what the connection uses to pair a reply with its request.
//!
//! # Example
//!
//! ```
//! use omron_fins_link::{FinsHeader, NodeAddress};
//!
//! let source = NodeAddress::new(0, 1, 0);
//! let destination = NodeAddress::new(0, 10, 0);
//!
//! let header = FinsHeader::new_command(destination, source, 0x01);
//! assert_eq!(header.to_bytes().len(), 10);
//! assert!(!header.is_response());
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{FinsError, Result};

/// FINS header size in bytes.
pub const FINS_HEADER_SIZE: usize = 10;

/// ICF for a command that requires a response.
const ICF_COMMAND: u8 = 0x80;
/// ICF for a response.
const ICF_RESPONSE: u8 = 0xC0;
/// Response flag within the ICF.
const ICF_RESPONSE_BIT: u8 = 0x40;
/// Maximum number of bridges a frame may cross.
const GATEWAY_COUNT: u8 = 0x02;

/// Node address for FINS communication.
///
/// Represents a network/node/unit address in the FINS protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    /// Network address (0 = local network).
    pub network: u8,
    /// Node address.
    pub node: u8,
    /// Unit address (0 = CPU unit).
    pub unit: u8,
}

impl NodeAddress {
    /// Creates a new node address.
    pub fn new(network: u8, node: u8, unit: u8) -> Self {
        Self {
            network,
            node,
            unit,
        }
    }

    /// Creates a local node address (network 0, node 0, unit 0).
    pub fn local() -> Self {
        Self::new(0, 0, 0)
    }
}

impl Default for NodeAddress {
    fn default() -> Self {
        Self::local()
    }
}

/// FINS command/response header (10 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinsHeader {
    /// Information Control Field.
    pub icf: u8,
    /// Reserved byte (always 0x00).
    pub rsv: u8,
    /// Gateway Count.
    pub gct: u8,
    /// Destination Network Address.
    pub dna: u8,
    /// Destination Node Address.
    pub da1: u8,
    /// Destination Unit Address.
    pub da2: u8,
    /// Source Network Address.
    pub sna: u8,
    /// Source Node Address.
    pub sa1: u8,
    /// Source Unit Address.
    pub sa2: u8,
    /// Service ID (used to match responses with requests).
    pub sid: u8,
}

impl FinsHeader {
    /// Creates a command header that asks for a response.
    pub fn new_command(destination: NodeAddress, source: NodeAddress, sid: u8) -> Self {
        Self {
            icf: ICF_COMMAND,
            rsv: 0x00,
            gct: GATEWAY_COUNT,
            dna: destination.network,
            da1: destination.node,
            da2: destination.unit,
            sna: source.network,
            sa1: source.node,
            sa2: source.unit,
            sid,
        }
    }

    /// Creates the header a PLC would send back for `command`.
    ///
    /// Source and destination are swapped and the SID is echoed.
    ///
    /// ```
    /// use omron_fins_link::{FinsHeader, NodeAddress};
    ///
    /// let cmd = FinsHeader::new_command(NodeAddress::new(0, 10, 0), NodeAddress::new(0, 1, 0), 7);
    /// let reply = FinsHeader::response_to(&cmd);
    /// assert!(reply.is_response());
    /// assert_eq!(reply.sid, 7);
    /// assert_eq!(reply.destination(), cmd.source());
    /// ```
    pub fn response_to(command: &FinsHeader) -> Self {
        Self {
            icf: ICF_RESPONSE,
            rsv: 0x00,
            gct: GATEWAY_COUNT,
            dna: command.sna,
            da1: command.sa1,
            da2: command.sa2,
            sna: command.dna,
            sa1: command.da1,
            sa2: command.da2,
            sid: command.sid,
        }
    }

    /// Serializes the header to bytes.
    pub fn to_bytes(self) -> [u8; FINS_HEADER_SIZE] {
        [
            self.icf, self.rsv, self.gct, self.dna, self.da1, self.da2, self.sna, self.sa1,
            self.sa2, self.sid,
        ]
    }

    /// Parses a header from bytes.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::InvalidResponse` if the slice is too short.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < FINS_HEADER_SIZE {
            return Err(FinsError::invalid_response(format!(
                "header too short: expected {} bytes, got {}",
                FINS_HEADER_SIZE,
                data.len()
            )));
        }

        Ok(Self {
            icf: data[0],
            rsv: data[1],
            gct: data[2],
            dna: data[3],
            da1: data[4],
            da2: data[5],
            sna: data[6],
            sa1: data[7],
            sa2: data[8],
            sid: data[9],
        })
    }

    /// Returns whether this is a response header.
    pub fn is_response(self) -> bool {
        (self.icf & ICF_RESPONSE_BIT) != 0
    }

    /// Returns the destination node address.
    pub fn destination(self) -> NodeAddress {
        NodeAddress::new(self.dna, self.da1, self.da2)
    }

    /// Returns the source node address.
    pub fn source(self) -> NodeAddress {
        NodeAddress::new(self.sna, self.sa1, self.sa2)
    }
}
