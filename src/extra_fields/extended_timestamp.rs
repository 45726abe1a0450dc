use std::io::Read;

use crate::result::{invalid_archive, ZipResult};
use crate::spec::LittleEndianReadExt;

/// extended timestamp, as described in <https://libzip.org/specifications/extrafld.txt>
#[derive(Debug, Clone)]
pub struct ExtendedTimestamp {
    mod_time: Option<u32>,
    ac_time: Option<u32>,
    cr_time: Option<u32>,
}

impl ExtendedTimestamp {
    /// creates an extended timestamp struct by reading the required bytes from the reader.
    ///
    /// This method assumes that the length has already been read, therefore
    /// it must be passed as an argument.
    ///
    /// The flags byte announces which timestamps follow, but local-header
    /// records are allowed to carry fewer values than the flags claim (the
    /// flags describe the central-directory record). A timestamp whose four
    /// bytes are not present is simply reported as absent.
    pub fn try_from_reader<R>(reader: &mut R, len: u16) -> ZipResult<Self>
    where
        R: Read,
    {
        if len == 0 {
            return invalid_archive("extended timestamp field is empty");
        }
        let mut flags = [0u8];
        reader.read_exact(&mut flags)?;
        let flags = flags[0];
        let mut remaining = len as usize - 1;

        let mut read_if = |present: bool| -> ZipResult<Option<u32>> {
            if present && remaining >= size_of::<u32>() {
                remaining -= size_of::<u32>();
                Ok(Some(reader.read_u32_le()?))
            } else {
                Ok(None)
            }
        };

        let mod_time = read_if(flags & 0b0000_0001 != 0)?;
        let ac_time = read_if(flags & 0b0000_0010 != 0)?;
        let cr_time = read_if(flags & 0b0000_0100 != 0)?;

        if remaining > 0 {
            // ignore undocumented bytes
            reader.read_exact(&mut vec![0; remaining])?;
        }

        Ok(Self {
            mod_time,
            ac_time,
            cr_time,
        })
    }

    /// returns the last modification timestamp, if defined, as UNIX epoch seconds
    #[must_use]
    pub fn mod_time(&self) -> Option<u32> {
        self.mod_time
    }

    /// returns the last access timestamp, if defined, as UNIX epoch seconds
    #[must_use]
    pub fn ac_time(&self) -> Option<u32> {
        self.ac_time
    }

    /// returns the creation timestamp, if defined, as UNIX epoch seconds
    #[must_use]
    pub fn cr_time(&self) -> Option<u32> {
        self.cr_time
    }
}
