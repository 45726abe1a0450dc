//! Types for extra fields

use std::io::Cursor;

use log::debug;

use crate::result::{invalid_archive, ZipResult};
use crate::spec::LittleEndianReadExt;
use crate::types::EntryData;

mod extended_timestamp;
mod zip64;

// re-export
pub use extended_timestamp::ExtendedTimestamp;
pub use zip64::Zip64ExtraField;

/// contains one extra field
#[derive(Debug, Clone)]
pub enum ExtraField {
    /// ZIP64 extended information, upgrading the 32-bit sizes
    Zip64(Zip64ExtraField),

    /// extended timestamp, as described in <https://libzip.org/specifications/extrafld.txt>
    ExtendedTimestamp(ExtendedTimestamp),
}

/// Extra-field IDs this crate recognizes
#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum UsedExtraField {
    /// ZIP64 extended information extra field
    Zip64ExtendedInfo = 0x0001,
    /// Windows NT security descriptor (binary ACL)
    NtfsAcl = 0x4453,
    /// extended timestamp
    /// from https://libzip.org/specifications/extrafld.txt
    ExtendedTimestamp = 0x5455,
    /// Info-ZIP UNIX (newer UID/GID)
    UnixUidGid = 0x7875,
}

/// Walk the TLV records of a local-header extra-field region, updating the
/// entry in place.
///
/// ZIP64 upgrades the sizes, the extended timestamp resolves Unix times,
/// ACL and uid/gid records are logged and skipped, everything else is
/// skipped by length. A tail of fewer than 4 bytes cannot hold another
/// record header and is drained silently.
pub(crate) fn parse_extra_fields(data: &mut EntryData, region: &[u8]) -> ZipResult<()> {
    let len = region.len() as u64;
    let mut reader = Cursor::new(region);

    while len - reader.position() >= 4 {
        let id = reader.read_u16_le()?;
        let size = reader.read_u16_le()?;
        if u64::from(size) > len - reader.position() {
            return invalid_archive("extra field record overruns the extra region");
        }

        match id {
            id if id == UsedExtraField::Zip64ExtendedInfo as u16 => {
                let field = Zip64ExtraField::try_from_reader(
                    &mut reader,
                    size,
                    data.uncompressed_size,
                    data.compressed_size,
                )?;
                if let Some(uncompressed) = field.uncompressed_size() {
                    data.uncompressed_size = uncompressed;
                }
                if let Some(compressed) = field.compressed_size() {
                    data.compressed_size = compressed;
                }
                data.extra_fields.push(ExtraField::Zip64(field));
            }
            id if id == UsedExtraField::ExtendedTimestamp as u16 => {
                let field = ExtendedTimestamp::try_from_reader(&mut reader, size)?;
                data.extra_fields.push(ExtraField::ExtendedTimestamp(field));
            }
            id if id == UsedExtraField::NtfsAcl as u16 => {
                debug!("skipping NTFS ACL extra field ({size} bytes)");
                reader.set_position(reader.position() + u64::from(size));
            }
            id if id == UsedExtraField::UnixUidGid as u16 => {
                debug!("skipping Info-ZIP Unix uid/gid extra field ({size} bytes)");
                reader.set_position(reader.position() + u64::from(size));
            }
            _ => {
                // Other fields are ignored
                reader.set_position(reader.position() + u64::from(size));
            }
        }
    }

    Ok(())
}
