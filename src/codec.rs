//! Frame codec seam between structured requests/responses and bytes.
//!
//! The connection never looks inside a frame beyond what [`FrameCodec`]
//! gives it: bytes to send for a request, and a decoded [`Response`] (with its
//! SID) for bytes received. [`FinsCodec`] is the standard FINS implementation.

use std::fmt;

use crate::command::Request;
use crate::error::Result;
use crate::header::{FinsHeader, FINS_HEADER_SIZE};
use crate::response::Response;

/// Encodes requests and decodes responses for a connection.
pub trait FrameCodec: Send + Sync + fmt::Debug {
    /// Serializes `request` behind `header` (which carries the SID).
    fn encode(&self, header: FinsHeader, request: &Request) -> Result<Vec<u8>>;

    /// Decodes one received frame.
    fn decode(&self, frame: &[u8]) -> Result<Response>;
}

/// Standard FINS frame codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinsCodec;

impl FrameCodec for FinsCodec {
    fn encode(&self, header: FinsHeader, request: &Request) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(FINS_HEADER_SIZE + 16);
        bytes.extend_from_slice(&header.to_bytes());
        request.encode_body(&mut bytes)?;
        Ok(bytes)
    }

    fn decode(&self, frame: &[u8]) -> Result<Response> {
        Response::from_bytes(frame)
    }
}
