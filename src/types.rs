//! Types that specify what is contained in a ZIP.

use std::fmt;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use crate::compression::CompressionMethod;
use crate::extra_fields::{parse_extra_fields, ExtraField};
use crate::result::ZipResult;
use crate::spec::{self, eof_means, ZipLocalEntryBlock};

/// Representation of a moment in time.
///
/// Zip files use an old format from DOS to store timestamps,
/// with its own set of peculiarities.
/// For example, it has a resolution of 2 seconds!
///
/// # Warning
///
/// Because there is no timezone associated with the [`DateTime`], they should ideally only
/// be used for user-facing descriptions.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DateTime {
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
}

impl Default for DateTime {
    /// Constructs an 'default' datetime of 1980-01-01 00:00:00
    fn default() -> DateTime {
        DateTime {
            year: 1980,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        }
    }
}

impl fmt::Display for DateTime {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

impl DateTime {
    /// Converts an msdos (u16, u16) pair to a DateTime object if it represents a valid date and
    /// time.
    pub fn try_from_msdos(datepart: u16, timepart: u16) -> Option<DateTime> {
        let seconds = (timepart & 0b0000000000011111) << 1;
        let minutes = (timepart & 0b0000011111100000) >> 5;
        let hours = (timepart & 0b1111100000000000) >> 11;
        let days = datepart & 0b0000000000011111;
        let months = (datepart & 0b0000000111100000) >> 5;
        let years = (datepart & 0b1111111000000000) >> 9;
        Self::from_date_and_time(
            years + 1980,
            months as u8,
            days as u8,
            hours as u8,
            minutes as u8,
            seconds as u8,
        )
    }

    /// Constructs a DateTime from a specific date and time
    ///
    /// The bounds are:
    /// * year: [1980, 2107]
    /// * month: [1, 12]
    /// * day: [1, 31]
    /// * hour: [0, 23]
    /// * minute: [0, 59]
    /// * second: [0, 60]
    pub fn from_date_and_time(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) -> Option<DateTime> {
        if (1980..=2107).contains(&year)
            && (1..=12).contains(&month)
            && (1..=31).contains(&day)
            && hour <= 23
            && minute <= 59
            && second <= 60
        {
            Some(DateTime {
                year,
                month,
                day,
                hour,
                minute,
                second,
            })
        } else {
            None
        }
    }

    /// Get the year. There is no epoch, i.e. 2018 will be returned as 2018.
    pub const fn year(&self) -> u16 {
        self.year
    }

    /// Get the month, where 1 = january and 12 = december
    pub const fn month(&self) -> u8 {
        self.month
    }

    /// Get the day
    pub const fn day(&self) -> u8 {
        self.day
    }

    /// Get the hour
    pub const fn hour(&self) -> u8 {
        self.hour
    }

    /// Get the minute
    pub const fn minute(&self) -> u8 {
        self.minute
    }

    /// Get the second
    pub const fn second(&self) -> u8 {
        self.second
    }
}

/// Everything a local file header tells us about one archive member.
///
/// For data-descriptor entries the size and CRC fields hold the header
/// sentinels (zero) until the trailing descriptor has been discovered;
/// [`SalvageEntry`](crate::read::SalvageEntry) upgrades them before they
/// are handed to the caller.
#[derive(Debug, Clone)]
pub struct EntryData {
    /// Decoded name of the file, with a single leading `/` stripped
    pub file_name: Box<str>,
    /// Raw file name bytes, as stored in the header
    pub file_name_raw: Box<[u8]>,
    /// True if general-purpose bit 11 marked the name as UTF-8
    pub is_utf8: bool,
    /// True if the file is encrypted (traditional PKWARE cipher)
    pub encrypted: bool,
    /// True if the file uses a trailing data descriptor
    pub using_data_descriptor: bool,
    /// Compression method used to store the file
    pub compression_method: CompressionMethod,
    /// Raw MS-DOS modification time word
    pub dos_time: u16,
    /// Raw MS-DOS modification date word
    pub dos_date: u16,
    /// CRC32 checksum
    pub crc32: u32,
    /// Size of the file in the ZIP
    pub compressed_size: u64,
    /// Size of the file when extracted
    pub uncompressed_size: u64,
    /// Recognized extra-field records
    pub extra_fields: Vec<ExtraField>,
}

impl EntryData {
    /// Read the variable-length tail of a local file header (name bytes and
    /// extra-field region) and assemble the entry metadata.
    ///
    /// The file name is left undecoded; `decode_file_name` runs afterwards
    /// so a name-decoding failure still leaves the sizes needed to skip the
    /// body.
    pub(crate) fn from_local_block<R: Read>(
        block: ZipLocalEntryBlock,
        reader: &mut R,
    ) -> ZipResult<Self> {
        let mut file_name_raw = vec![0u8; block.file_name_length as usize];
        reader
            .read_exact(&mut file_name_raw)
            .map_err(|e| eof_means(e, "entry name"))?;

        let mut extra_region = vec![0u8; block.extra_field_length as usize];
        reader
            .read_exact(&mut extra_region)
            .map_err(|e| eof_means(e, "extra field"))?;

        let flags = block.flags;
        let mut data = EntryData {
            file_name: Box::default(),
            file_name_raw: file_name_raw.into_boxed_slice(),
            is_utf8: flags & spec::GP_FLAG_UTF8 != 0,
            encrypted: flags & spec::GP_FLAG_ENCRYPTED != 0,
            using_data_descriptor: flags & spec::GP_FLAG_DATA_DESCRIPTOR != 0,
            compression_method: CompressionMethod::parse_from_u16(block.compression_method),
            dos_time: block.last_mod_time,
            dos_date: block.last_mod_date,
            crc32: block.crc32,
            compressed_size: block.compressed_size as u64,
            uncompressed_size: block.uncompressed_size as u64,
            extra_fields: Vec::new(),
        };
        parse_extra_fields(&mut data, &extra_region)?;
        Ok(data)
    }

    /// Decode the raw name bytes with bit 11 deciding between UTF-8 and the
    /// injected legacy decoder, then strip one leading `/`.
    pub(crate) fn decode_file_name(
        &mut self,
        decode: &mut dyn FnMut(&[u8]) -> ZipResult<String>,
    ) -> ZipResult<()> {
        let name = if self.is_utf8 {
            String::from_utf8_lossy(&self.file_name_raw).into_owned()
        } else {
            decode(&self.file_name_raw)?
        };
        self.file_name = name.strip_prefix('/').unwrap_or(&name).into();
        Ok(())
    }

    /// True when the name denotes a directory entry (trailing `/`).
    pub fn is_dir(&self) -> bool {
        self.file_name.ends_with('/')
    }

    /// MS-DOS modification timestamp, if the stored one is a valid date.
    pub fn last_modified(&self) -> Option<DateTime> {
        DateTime::try_from_msdos(self.dos_date, self.dos_time)
    }

    /// Modification time as Unix seconds, from the extended-timestamp field.
    pub fn last_modification_time(&self) -> Option<u32> {
        self.extended_timestamp().and_then(|ts| ts.mod_time())
    }

    /// Access time as Unix seconds, from the extended-timestamp field.
    pub fn last_access_time(&self) -> Option<u32> {
        self.extended_timestamp().and_then(|ts| ts.ac_time())
    }

    /// Creation time as Unix seconds, from the extended-timestamp field.
    pub fn creation_time(&self) -> Option<u32> {
        self.extended_timestamp().and_then(|ts| ts.cr_time())
    }

    fn extended_timestamp(&self) -> Option<&crate::extra_fields::ExtendedTimestamp> {
        self.extra_fields.iter().find_map(|field| match field {
            ExtraField::ExtendedTimestamp(ts) => Some(ts),
            _ => None,
        })
    }

    /// The byte the 12-byte encryption header must end with.
    pub(crate) fn password_check_byte(&self) -> u8 {
        (self.dos_time >> 8) as u8
    }
}

/// Rewrite an entry name so it stays below the extraction directory.
///
/// `..` components become `__`, root and prefix components are dropped, and
/// a name with nothing left maps to `_`. A single leading `/` has already
/// been stripped during name decoding; this handles what remains.
pub fn sanitize_path(name: &str) -> PathBuf {
    let name = name.replace('\\', "/");
    let mut out = Vec::new();
    for component in Path::new(&name).components() {
        match component {
            Component::Normal(part) => out.push(part.to_os_string()),
            Component::ParentDir => {
                // a/.. cancels out; a leading .. is defused instead
                if out.is_empty() || out.last().is_some_and(|p| p == "__") {
                    out.push("__".into());
                } else {
                    out.pop();
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    if out.is_empty() {
        return PathBuf::from("_");
    }
    out.iter().collect()
}
