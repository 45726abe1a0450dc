//! Types for salvage-reading ZIP archives
//!
//! Nothing here touches a central directory: entries are recovered by
//! walking the stream forward, one local file header at a time, which is
//! what makes truncated and partially downloaded archives readable.

use std::io::{self, BufReader, Read};

use flate2::read::DeflateDecoder;
use log::debug;

use crate::compression::CompressionMethod;
use crate::cp437::decode_cp437;
use crate::result::{ZipError, ZipResult};
use crate::spec::{self, FixedSizeBlock, Magic, ZipLocalEntryBlock};
use crate::types::EntryData;
use crate::zipcrypto::{PasswordHolder, ZipCryptoReader};

pub(crate) mod pipe;
pub(crate) mod scanner;

use pipe::{PipeReader, ScanTask};
use scanner::{scan_to_signature, ScanFound};

/// Decoder for entry names whose UTF-8 flag is unset.
type NameDecoder = Box<dyn FnMut(&[u8]) -> ZipResult<String>>;

/// Streaming decoder over a byte source that may be missing its central
/// directory.
///
/// Entries are produced strictly in stream order. Each call to
/// [`next_entry`](Self::next_entry) first disposes of the previous entry,
/// draining whatever the caller left unread, so an entry can always be
/// skipped by simply not reading it.
///
/// ```no_run
/// use std::fs::File;
/// use std::io;
///
/// # fn main() -> zip_salvage::ZipResult<()> {
/// let mut archive = zip_salvage::SalvageArchive::new(File::open("broken.zip")?);
/// while let Some(mut entry) = archive.next_entry()? {
///     println!("{}", entry.name());
///     io::copy(&mut entry, &mut io::sink())?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct SalvageArchive<R: Read> {
    /// Vacated while a background scan task owns the stream.
    reader: Option<BufReader<R>>,
    scan_task: Option<ScanTask<R>>,
    /// Unread tail of a bounded body, drained before the next header.
    remaining_before_next_entry: u64,
    /// A signature the scanner already consumed on the previous boundary.
    pending_signature: Option<Magic>,
    finished: bool,
    passwords: PasswordHolder,
    decode_name: NameDecoder,
}

impl<R: Read> SalvageArchive<R> {
    /// Create a decoder over `reader`, which is buffered internally.
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(BufReader::new(reader)),
            scan_task: None,
            remaining_before_next_entry: 0,
            pending_signature: None,
            finished: false,
            passwords: PasswordHolder::new(),
            decode_name: Box::new(|raw| Ok(decode_cp437(raw))),
        }
    }

    /// Install the password source for encrypted entries.
    ///
    /// The callback receives the entry name and whether this is a retry
    /// after a failed check. It runs on first use and on retries; in
    /// between, the last password is reused.
    pub fn set_password_provider<F>(&mut self, provider: F)
    where
        F: FnMut(&str, bool) -> io::Result<Vec<u8>> + 'static,
    {
        self.passwords.set_provider(Box::new(provider));
    }

    /// Replace the decoder used for names without the UTF-8 flag.
    ///
    /// The default interprets them as IBM codepage 437.
    pub fn set_name_decoder<F>(&mut self, decode: F)
    where
        F: FnMut(&[u8]) -> ZipResult<String> + 'static,
    {
        self.decode_name = Box::new(decode);
    }
}

impl<R: Read + Send + 'static> SalvageArchive<R> {
    /// Advance to the next entry.
    ///
    /// `Ok(None)` means the archive is over: either a central directory
    /// header was reached or the stream ended cleanly on an entry boundary.
    /// Errors for which [`ZipError::is_entry_scoped`] returns true leave
    /// the decoder positioned so that iteration can continue; all other
    /// errors are terminal.
    pub fn next_entry(&mut self) -> ZipResult<Option<SalvageEntry<'_, R>>> {
        // Worked around via raw pointer: `self` must stay reborrowed for the
        // lifetime of the returned `SalvageEntry` to satisfy the Ok arm, but
        // that reborrow also (conservatively) covers the Err arm, where we
        // still need to flip `finished` on `self`. The two accesses never
        // actually alias at runtime since they're mutually exclusive branches.
        let this: *mut Self = self;
        match unsafe { &mut *this }.next_entry_inner() {
            Ok(entry) => Ok(entry),
            Err(e) => {
                if !e.is_entry_scoped() {
                    unsafe {
                        (*this).finished = true;
                    }
                }
                Err(e)
            }
        }
    }

    fn next_entry_inner(&mut self) -> ZipResult<Option<SalvageEntry<'_, R>>> {
        self.finish_previous_entry()?;
        if self.finished {
            return Ok(None);
        }

        let signature = match self.pending_signature.take() {
            Some(signature) => signature,
            None => match self.read_signature()? {
                Some(signature) => signature,
                None => {
                    self.finished = true;
                    return Ok(None);
                }
            },
        };
        match signature {
            spec::LOCAL_FILE_HEADER_SIGNATURE => {}
            spec::CENTRAL_DIRECTORY_HEADER_SIGNATURE => {
                debug!("central directory reached, archive is over");
                self.finished = true;
                return Ok(None);
            }
            other => {
                debug!("expected a header signature, found {other:#010x}");
                return Err(ZipError::SignatureNotFound);
            }
        }

        let reader = self
            .reader
            .as_mut()
            .expect("stream reader is present between entries");
        let block = ZipLocalEntryBlock::parse(reader, "local file header")?;
        let mut data = EntryData::from_local_block(block, reader)?;
        if let Err(e) = data.decode_file_name(&mut self.decode_name) {
            self.skip_entry_body(&data)?;
            return Err(e);
        }
        debug!(
            "entry {:?}: method {}, encrypted: {}, data descriptor: {}",
            data.file_name, data.compression_method, data.encrypted, data.using_data_descriptor
        );

        if data.is_dir() {
            // Directory bodies are empty, but the stream still has to be
            // advanced past the trailer the writer put there.
            self.skip_entry_body(&data)?;
            return Ok(Some(SalvageEntry {
                data,
                body: EntryBody::Empty,
                deferred: None,
            }));
        }

        if let CompressionMethod::Unsupported(code) = data.compression_method {
            self.skip_entry_body(&data)?;
            return Err(ZipError::UnsupportedMethod(code));
        }

        if data.using_data_descriptor {
            let stream = self
                .reader
                .take()
                .expect("stream reader is present between entries");
            let (task, pipe_reader) = ScanTask::spawn(stream)?;
            self.scan_task = Some(task);
            debug!("scanning ahead for the descriptor of {:?}", data.file_name);

            let source = construct_crypto_reader(&data, pipe_reader, &mut self.passwords)?;
            let body = construct_decompressing_reader(data.compression_method, source)?;

            let Self {
                ref mut reader,
                ref mut scan_task,
                ..
            } = *self;
            let task = scan_task.as_mut().expect("scan task was just spawned");
            return Ok(Some(SalvageEntry {
                data,
                body: EntryBody::Piped(body),
                deferred: Some(Deferred {
                    task,
                    reader_slot: reader,
                }),
            }));
        }

        let Self {
            ref mut reader,
            ref mut remaining_before_next_entry,
            ref mut passwords,
            ..
        } = *self;
        let reader = reader
            .as_mut()
            .expect("stream reader is present between entries");
        let limited = DrainWrapper::new(data.compressed_size, remaining_before_next_entry, reader);
        let source = construct_crypto_reader(&data, limited, passwords)?;
        let body = construct_decompressing_reader(data.compression_method, source)?;
        Ok(Some(SalvageEntry {
            data,
            body: EntryBody::Bounded(body),
            deferred: None,
        }))
    }

    /// Dispose of the previous entry: collect a finished (or abandoned)
    /// scan task, then drain whatever is left of a bounded body.
    fn finish_previous_entry(&mut self) -> ZipResult<()> {
        if let Some(mut task) = self.scan_task.take() {
            let outcome = task.wait(&mut self.reader)?;
            self.note_boundary(outcome.found);
        }
        if self.remaining_before_next_entry > 0 {
            let reader = self
                .reader
                .as_mut()
                .expect("stream reader is present between entries");
            io::copy(
                &mut reader.by_ref().take(self.remaining_before_next_entry),
                &mut io::sink(),
            )?;
            self.remaining_before_next_entry = 0;
        }
        Ok(())
    }

    /// Advance the stream past the body of an entry that will not be read:
    /// a directory, or one that failed before its body reader was built.
    fn skip_entry_body(&mut self, data: &EntryData) -> ZipResult<()> {
        let reader = self
            .reader
            .as_mut()
            .expect("stream reader is present between entries");
        if data.using_data_descriptor {
            let outcome = scan_to_signature(reader, &mut io::sink())?;
            self.note_boundary(outcome.found);
        } else if data.compressed_size > 0 {
            io::copy(
                &mut reader.by_ref().take(data.compressed_size),
                &mut io::sink(),
            )?;
        }
        Ok(())
    }

    fn note_boundary(&mut self, found: ScanFound) {
        self.pending_signature = match found {
            ScanFound::LocalHeader => Some(spec::LOCAL_FILE_HEADER_SIGNATURE),
            ScanFound::CentralHeader => Some(spec::CENTRAL_DIRECTORY_HEADER_SIGNATURE),
            ScanFound::Eof => {
                self.finished = true;
                None
            }
        };
    }

    /// Read the next 4-byte signature. `Ok(None)` is a clean end of input;
    /// a partial signature is a truncation error.
    fn read_signature(&mut self) -> ZipResult<Option<Magic>> {
        let reader = self
            .reader
            .as_mut()
            .expect("stream reader is present between entries");
        let mut bytes = [0u8; 4];
        let mut filled = 0usize;
        while filled < bytes.len() {
            match reader.read(&mut bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        match filled {
            0 => Ok(None),
            4 => Ok(Some(Magic::from_le_bytes(bytes))),
            _ => Err(ZipError::UnexpectedEof("entry signature")),
        }
    }
}

/// One recovered archive member, readable as its decompressed body.
///
/// For entries that use a data descriptor the size and CRC accessors are
/// late-bound: asking for them finishes the body first (discarding any
/// unread remainder) and then waits for the boundary scan to publish the
/// descriptor.
pub struct SalvageEntry<'a, R: Read> {
    data: EntryData,
    body: EntryBody<'a, R>,
    deferred: Option<Deferred<'a, R>>,
}

struct Deferred<'a, R> {
    task: &'a mut ScanTask<R>,
    reader_slot: &'a mut Option<BufReader<R>>,
}

enum EntryBody<'a, R: Read> {
    /// Directory entries have no body.
    Empty,
    /// Body bounded by the header's compressed size.
    Bounded(EntryReader<MaybeDecrypted<DrainWrapper<'a, &'a mut BufReader<R>>>>),
    /// Body fed by the background boundary scan.
    Piped(EntryReader<MaybeDecrypted<PipeReader>>),
}

impl<R: Read> Read for EntryBody<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            EntryBody::Empty => Ok(0),
            EntryBody::Bounded(r) => r.read(buf),
            EntryBody::Piped(r) => r.read(buf),
        }
    }
}

impl<R: Read> Read for SalvageEntry<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.body.read(buf)
    }
}

impl<R: Read> SalvageEntry<'_, R> {
    /// Decoded entry name, with a single leading `/` stripped.
    pub fn name(&self) -> &str {
        &self.data.file_name
    }

    /// True when this is a directory entry (name ends in `/`).
    pub fn is_dir(&self) -> bool {
        self.data.is_dir()
    }

    /// The method the body was stored with.
    pub fn compression_method(&self) -> CompressionMethod {
        self.data.compression_method
    }

    /// True when the body was encrypted with the traditional cipher.
    pub fn encrypted(&self) -> bool {
        self.data.encrypted
    }

    /// Full header metadata.
    pub fn data(&self) -> &EntryData {
        &self.data
    }

    /// MS-DOS modification timestamp, when the stored one is valid.
    pub fn last_modified(&self) -> Option<crate::types::DateTime> {
        self.data.last_modified()
    }

    /// Modification time as Unix seconds, from the extended timestamp.
    pub fn last_modification_time(&self) -> Option<u32> {
        self.data.last_modification_time()
    }

    /// Access time as Unix seconds, from the extended timestamp.
    pub fn last_access_time(&self) -> Option<u32> {
        self.data.last_access_time()
    }

    /// Creation time as Unix seconds, from the extended timestamp.
    pub fn creation_time(&self) -> Option<u32> {
        self.data.creation_time()
    }
}

impl<R: Read + Send + 'static> SalvageEntry<'_, R> {
    /// Expected CRC-32 of the decompressed body.
    ///
    /// Verification is the caller's choice; pipe the body through
    /// [`Crc32Reader`](crate::Crc32Reader) to get the actual value.
    pub fn crc32(&mut self) -> ZipResult<u32> {
        self.resolve_descriptor()?;
        Ok(self.data.crc32)
    }

    /// Size of the stored (compressed, possibly encrypted) body.
    pub fn compressed_size(&mut self) -> ZipResult<u64> {
        self.resolve_descriptor()?;
        Ok(self.data.compressed_size)
    }

    /// Size of the body once decompressed.
    pub fn original_size(&mut self) -> ZipResult<u64> {
        self.resolve_descriptor()?;
        Ok(self.data.uncompressed_size)
    }

    /// For a descriptor entry, finish the body and adopt the descriptor
    /// values; everything else already has them from the header.
    fn resolve_descriptor(&mut self) -> ZipResult<()> {
        let Some(deferred) = self.deferred.take() else {
            return Ok(());
        };
        // Closing the pipe lets the producer finish in discard mode if the
        // body was not read to the end.
        self.body = EntryBody::Empty;
        let outcome = deferred.task.wait(deferred.reader_slot)?;
        if let Some(descriptor) = outcome.descriptor {
            self.data.crc32 = descriptor.crc32;
            self.data.compressed_size = u64::from(descriptor.compressed_size);
            self.data.uncompressed_size = u64::from(descriptor.uncompressed_size);
        }
        Ok(())
    }
}

/// Limit reader for bounded bodies that reports the unread remainder back
/// to the archive when dropped, so the next entry can drain past it.
struct DrainWrapper<'a, R> {
    full_extent: u64,
    current_progress: u64,
    remaining_to_notify: &'a mut u64,
    inner: R,
}

impl<'a, R> DrainWrapper<'a, R> {
    fn new(extent: u64, remaining_to_notify: &'a mut u64, inner: R) -> Self {
        Self {
            full_extent: extent,
            current_progress: 0,
            remaining_to_notify,
            inner,
        }
    }

    fn remaining(&self) -> u64 {
        debug_assert!(self.current_progress <= self.full_extent);
        self.full_extent - self.current_progress
    }
}

impl<R: Read> Read for DrainWrapper<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let to_read = usize::try_from(self.remaining())
            .unwrap_or(usize::MAX)
            .min(buf.len());
        if to_read == 0 {
            return Ok(0);
        }

        let count = self.inner.read(&mut buf[..to_read])?;
        if count == 0 {
            // to_read was > 0, so the stream ended inside the body
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended inside an entry body",
            ));
        }
        self.current_progress += count as u64;
        Ok(count)
    }
}

impl<R> Drop for DrainWrapper<'_, R> {
    fn drop(&mut self) {
        assert_eq!(
            0, *self.remaining_to_notify,
            "the previous entry must be drained before a new one starts"
        );
        *self.remaining_to_notify = self.remaining();
    }
}

enum MaybeDecrypted<R> {
    Plain(R),
    Encrypted(ZipCryptoReader<R>),
}

impl<R: Read> Read for MaybeDecrypted<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            MaybeDecrypted::Plain(r) => r.read(buf),
            MaybeDecrypted::Encrypted(r) => r.read(buf),
        }
    }
}

fn construct_crypto_reader<R: Read>(
    data: &EntryData,
    reader: R,
    passwords: &mut PasswordHolder,
) -> ZipResult<MaybeDecrypted<R>> {
    if !data.encrypted {
        return Ok(MaybeDecrypted::Plain(reader));
    }
    let reader = ZipCryptoReader::open(
        reader,
        &data.file_name,
        data.password_check_byte(),
        passwords,
    )?;
    Ok(MaybeDecrypted::Encrypted(reader))
}

enum EntryReader<R> {
    Stored(R),
    Deflated(DeflateDecoder<R>),
}

impl<R: Read> Read for EntryReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            EntryReader::Stored(r) => r.read(buf),
            EntryReader::Deflated(r) => r.read(buf),
        }
    }
}

fn construct_decompressing_reader<R: Read>(
    compression_method: CompressionMethod,
    reader: R,
) -> ZipResult<EntryReader<R>> {
    match compression_method {
        CompressionMethod::Stored => Ok(EntryReader::Stored(reader)),
        CompressionMethod::Deflated => Ok(EntryReader::Deflated(DeflateDecoder::new(reader))),
        CompressionMethod::Unsupported(code) => Err(ZipError::UnsupportedMethod(code)),
    }
}
