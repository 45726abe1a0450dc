//! Wire-format structures consumed by the salvage decoder.
//!
//! Everything here is little-endian and bit-exact per APPNOTE. Only the
//! structures a forward-only reader can meet are kept: the local file
//! header, the data descriptor, and the signatures that terminate a scan.

use crate::result::{ZipError, ZipResult};
use std::io::{self, Read};
use std::mem;

pub(crate) type Magic = u32;

pub(crate) const LOCAL_FILE_HEADER_SIGNATURE: Magic = 0x04034b50;
pub(crate) const CENTRAL_DIRECTORY_HEADER_SIGNATURE: Magic = 0x02014b50;
pub(crate) const DATA_DESCRIPTOR_SIGNATURE: Magic = 0x08074b50;

/// Sentinel in a 32-bit size field announcing a ZIP64 upgrade.
pub(crate) const ZIP64_BYTES_THR: u64 = u32::MAX as u64;

/// General-purpose bit 0: the entry body is encrypted.
pub(crate) const GP_FLAG_ENCRYPTED: u16 = 1 << 0;
/// General-purpose bit 3: sizes and CRC live in a trailing data descriptor.
pub(crate) const GP_FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
/// General-purpose bit 11: the entry name is UTF-8.
pub(crate) const GP_FLAG_UTF8: u16 = 1 << 11;

/// Convert all the fields of a struct *from* little-endian representations.
macro_rules! from_le {
    ($obj:ident, $field:ident, $type:ty) => {
        $obj.$field = <$type>::from_le($obj.$field);
    };
    ($obj:ident, [($field:ident, $type:ty) $(,)?]) => {
        from_le![$obj, $field, $type];
    };
    ($obj:ident, [($field:ident, $type:ty), $($rest:tt),+ $(,)?]) => {
        from_le![$obj, $field, $type];
        from_le!($obj, [$($rest),+]);
    };
}

/// A fixed-size region of the wire format, deserialized by pointer cast.
///
/// The blocks are `repr(packed)` so their in-memory layout is exactly the
/// on-disk layout; `from_le` then fixes up endianness field by field.
pub(crate) trait FixedSizeBlock: Sized + Copy {
    fn from_le(self) -> Self;

    fn deserialize(block: &[u8]) -> Self {
        assert_eq!(block.len(), mem::size_of::<Self>());
        let block_ptr: *const Self = block.as_ptr().cast();
        unsafe { block_ptr.read() }
    }

    fn interpret(block: &[u8]) -> Self {
        Self::deserialize(block).from_le()
    }

    fn parse<T: Read>(reader: &mut T, what: &'static str) -> ZipResult<Self> {
        let mut block = vec![0u8; mem::size_of::<Self>()];
        reader.read_exact(&mut block).map_err(|e| eof_means(e, what))?;
        Ok(Self::interpret(&block))
    }
}

/// Map a short read to the truncation error for the structure being read.
pub(crate) fn eof_means(e: io::Error, what: &'static str) -> ZipError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ZipError::UnexpectedEof(what)
    } else {
        ZipError::Io(e)
    }
}

/// Fixed portion of a local file header, after the 4-byte signature.
///
/// The signature itself is consumed separately: it may arrive either from
/// the stream cursor or from the signature scanner, which has already eaten
/// it by the time the next header is parsed.
#[derive(Copy, Clone, Debug)]
#[repr(packed)]
pub(crate) struct ZipLocalEntryBlock {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
}

impl FixedSizeBlock for ZipLocalEntryBlock {
    #[inline(always)]
    fn from_le(mut self) -> Self {
        from_le![
            self,
            [
                (version_needed, u16),
                (flags, u16),
                (compression_method, u16),
                (last_mod_time, u16),
                (last_mod_date, u16),
                (crc32, u32),
                (compressed_size, u32),
                (uncompressed_size, u32),
                (file_name_length, u16),
                (extra_field_length, u16),
            ]
        ];
        self
    }
}

/// The 12-byte data descriptor trailer, without its optional signature.
#[derive(Copy, Clone, Debug)]
#[repr(packed)]
pub(crate) struct ZipDataDescriptorBlock {
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

impl FixedSizeBlock for ZipDataDescriptorBlock {
    #[inline(always)]
    fn from_le(mut self) -> Self {
        from_le![
            self,
            [
                (crc32, u32),
                (compressed_size, u32),
                (uncompressed_size, u32),
            ]
        ];
        self
    }
}

/// Helper methods for reading little endian numbers from a byte stream.
pub(crate) trait LittleEndianReadExt: Read {
    fn read_u16_le(&mut self) -> io::Result<u16> {
        let mut out = [0u8; 2];
        self.read_exact(&mut out)?;
        Ok(u16::from_le_bytes(out))
    }

    fn read_u32_le(&mut self) -> io::Result<u32> {
        let mut out = [0u8; 4];
        self.read_exact(&mut out)?;
        Ok(u32::from_le_bytes(out))
    }

    fn read_u64_le(&mut self) -> io::Result<u64> {
        let mut out = [0u8; 8];
        self.read_exact(&mut out)?;
        Ok(u64::from_le_bytes(out))
    }
}

impl<R: Read> LittleEndianReadExt for R {}
