//! Possible ZIP compression methods.

use std::fmt;

/// Identifies the storage format used to compress a file within a ZIP
/// archive.
///
/// A salvage decoder only ever inflates, so only the two methods every
/// ZIP writer emits are supported. Anything else is reported, not decoded.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum CompressionMethod {
    /// Store the file as is
    Stored,
    /// Compress the file using Deflate
    Deflated,
    /// Unsupported compression method
    Unsupported(u16),
}

impl CompressionMethod {
    pub(crate) const STORE: u16 = 0;
    pub(crate) const DEFLATE: u16 = 8;

    /// Converts a u16 from the wire to its corresponding CompressionMethod
    pub const fn parse_from_u16(val: u16) -> Self {
        match val {
            Self::STORE => CompressionMethod::Stored,
            Self::DEFLATE => CompressionMethod::Deflated,
            v => CompressionMethod::Unsupported(v),
        }
    }

    /// Converts a CompressionMethod to its u16 wire representation
    pub const fn serialize_to_u16(self) -> u16 {
        match self {
            CompressionMethod::Stored => Self::STORE,
            CompressionMethod::Deflated => Self::DEFLATE,
            CompressionMethod::Unsupported(v) => v,
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CompressionMethod::Stored => write!(f, "Stored"),
            CompressionMethod::Deflated => write!(f, "Deflated"),
            CompressionMethod::Unsupported(v) => write!(f, "Unsupported({v})"),
        }
    }
}
