//! A library for recovering the contents of broken ZIP archives.
//!
//! Ordinary ZIP readers start from the central directory at the end of the
//! file. When an archive is truncated, still being downloaded, or had its
//! tail overwritten, that index is gone and those readers give up even
//! though every entry body may still be intact. This crate reads strictly
//! forward instead: it parses each local file header as it appears and
//! streams the body through the decompressor. When an entry's sizes are
//! only recorded in a trailing data descriptor, it finds the boundary by
//! scanning for the next header signature and validating the descriptor
//! against the byte count.
//!
//! Supported on the way through: Store and Deflate bodies, ZIP64 size
//! upgrades, extended timestamps, and traditional PKWARE encryption.
//! Writing archives, random access, and the AE-x encryption schemes are
//! out of scope.
//!
//! ```no_run
//! use std::fs::File;
//! use std::io;
//!
//! # fn main() -> zip_salvage::ZipResult<()> {
//! let mut archive = zip_salvage::SalvageArchive::new(File::open("broken.zip")?);
//! while let Some(mut entry) = archive.next_entry()? {
//!     if !entry.is_dir() {
//!         let mut out = Vec::new();
//!         io::copy(&mut entry, &mut out)?;
//!         println!("{}: {} bytes", entry.name(), out.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod compression;
mod cp437;
mod crc32;
pub mod extra_fields;
pub mod read;
pub mod result;
mod spec;
mod types;
mod zipcrypto;

pub use crate::compression::CompressionMethod;
pub use crate::crc32::Crc32Reader;
pub use crate::extra_fields::ExtraField;
pub use crate::read::{SalvageArchive, SalvageEntry};
pub use crate::result::{ZipError, ZipResult};
pub use crate::types::{sanitize_path, DateTime, EntryData};
