//! Two-byte request framing.
//!
//! # Wire Format
//! ```text
//! [0] request type: 'M' (music) | 'V' (video) | 'P' (photo)
//! [1] base cost:    ASCII '1'..='9'
//! ```
//!
//! A request is either fully valid or rejected. There is no partial parse.

use std::fmt;

use thiserror::Error;

/// Exact length of a request on the wire.
pub const REQUEST_LEN: usize = 2;

/// Malformed or missing request bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Client closed or failed before sending two bytes.
    #[error("client sent fewer than {REQUEST_LEN} request bytes")]
    ShortRead,
    /// First byte is not a known request type.
    #[error("unknown request type byte {0:#04x}")]
    UnknownType(u8),
    /// Second byte is not an ASCII digit in 1..=9.
    #[error("invalid base cost byte {0:#04x}")]
    InvalidCost(u8),
}

/// Media class of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    Music,
    Video,
    Photo,
}

impl RequestType {
    /// Decode the type byte.
    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            b'M' => Ok(RequestType::Music),
            b'V' => Ok(RequestType::Video),
            b'P' => Ok(RequestType::Photo),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            RequestType::Music => b'M',
            RequestType::Video => b'V',
            RequestType::Photo => b'P',
        }
    }

    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::Music => "music",
            RequestType::Video => "video",
            RequestType::Photo => "photo",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-supplied cost scalar, always within 1..=9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BaseCost(u8);

impl BaseCost {
    /// Decode an ASCII digit byte.
    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            b'1'..=b'9' => Ok(BaseCost(byte - b'0')),
            other => Err(ProtocolError::InvalidCost(other)),
        }
    }

    /// Build from a numeric value, rejecting anything outside 1..=9.
    pub fn new(value: u8) -> Option<Self> {
        (1..=9).contains(&value).then_some(BaseCost(value))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn as_byte(self) -> u8 {
        b'0' + self.0
    }
}

/// A validated client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Request {
    pub kind: RequestType,
    pub base_cost: BaseCost,
}

impl Request {
    pub fn new(kind: RequestType, base_cost: BaseCost) -> Self {
        Self { kind, base_cost }
    }

    /// Parse the raw request bytes. Type is checked before cost.
    pub fn parse(bytes: [u8; REQUEST_LEN]) -> Result<Self, ProtocolError> {
        let kind = RequestType::from_byte(bytes[0])?;
        let base_cost = BaseCost::from_byte(bytes[1])?;
        Ok(Self { kind, base_cost })
    }

    /// Encode back to the exact bytes forwarded to the backend.
    pub fn to_bytes(self) -> [u8; REQUEST_LEN] {
        [self.kind.as_byte(), self.base_cost.as_byte()]
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.as_byte() as char, self.base_cost.get())
    }
}
