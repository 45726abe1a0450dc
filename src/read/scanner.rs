//! Forward signature scanning with data-descriptor validation.
//!
//! When an entry uses a data descriptor its compressed size is unknown at
//! header time, so the body's end can only be recognized from the stream
//! itself: the next local-file-header or central-directory signature,
//! preceded by a descriptor whose compressed-size field equals the number
//! of payload bytes seen since the previous boundary. Requiring that match
//! is what makes a `PK\x03\x04` sequence inside compressed data harmless.

use std::io::{self, BufRead, Write};

use log::debug;

use crate::spec::{
    CENTRAL_DIRECTORY_HEADER_SIGNATURE, DATA_DESCRIPTOR_SIGNATURE, FixedSizeBlock,
    LOCAL_FILE_HEADER_SIGNATURE, ZipDataDescriptorBlock,
};

/// Capacity of the sliding window.
const WINDOW_CAPACITY: usize = 100;

/// Bytes kept resident across a flush so a trailer that straddles the flush
/// point stays parseable: candidate signature, signed descriptor, and the
/// terminating signature.
const WINDOW_RETAIN: usize = 24;

/// Length of a descriptor plus the terminating signature.
const PLAIN_TRAILER: usize = 16;

/// Same, when the descriptor carries its own `PK\x07\x08` signature.
const SIGNED_TRAILER: usize = 20;

/// What the scan ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanFound {
    /// A local file header: another entry follows.
    LocalHeader,
    /// A central directory header: the archive's entries are over.
    CentralHeader,
    /// The stream ended before any boundary was seen.
    Eof,
}

/// Result of one body scan.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScanOutcome {
    pub found: ScanFound,
    /// The validated descriptor, when one preceded the signature.
    pub descriptor: Option<ZipDataDescriptorBlock>,
}

/// Scan forward to the next entry boundary, copying payload bytes to `sink`.
///
/// Every byte that is not part of the discovered trailer (descriptor,
/// optional descriptor signature, terminating header signature) is written
/// to the sink. On EOF the whole window is flushed and `ScanFound::Eof` is
/// reported; the caller decides whether a truncated last entry is an error.
pub(crate) fn scan_to_signature<R: BufRead, W: Write>(
    reader: &mut R,
    sink: &mut W,
) -> io::Result<ScanOutcome> {
    let local_sig = LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes();
    let central_sig = CENTRAL_DIRECTORY_HEADER_SIGNATURE.to_le_bytes();
    let descriptor_sig = DATA_DESCRIPTOR_SIGNATURE.to_le_bytes();

    let mut window: Vec<u8> = Vec::with_capacity(WINDOW_CAPACITY);
    let mut count: u64 = 0;

    loop {
        let Some(byte) = next_byte(reader)? else {
            sink.write_all(&window)?;
            debug!("input ended after {count} scanned bytes with no boundary");
            return Ok(ScanOutcome {
                found: ScanFound::Eof,
                descriptor: None,
            });
        };
        window.push(byte);
        count += 1;
        let len = window.len();

        // The fourth byte of either signature is the earliest moment a
        // boundary can complete.
        if (byte == 0x04 || byte == 0x02) && len >= 4 {
            let tail = &window[len - 4..];
            let found = if tail == local_sig {
                Some(ScanFound::LocalHeader)
            } else if tail == central_sig {
                Some(ScanFound::CentralHeader)
            } else {
                None
            };
            if let Some(found) = found {
                if len >= SIGNED_TRAILER
                    && window[len - SIGNED_TRAILER..len - PLAIN_TRAILER] == descriptor_sig
                {
                    let descriptor =
                        ZipDataDescriptorBlock::interpret(&window[len - PLAIN_TRAILER..len - 4]);
                    if u64::from(descriptor.compressed_size) == count - SIGNED_TRAILER as u64 {
                        sink.write_all(&window[..len - SIGNED_TRAILER])?;
                        debug!("found {found:?} after {} payload bytes (signed descriptor)",
                            count - SIGNED_TRAILER as u64);
                        return Ok(ScanOutcome {
                            found,
                            descriptor: Some(descriptor),
                        });
                    }
                }
                if len >= PLAIN_TRAILER {
                    let descriptor =
                        ZipDataDescriptorBlock::interpret(&window[len - PLAIN_TRAILER..len - 4]);
                    if u64::from(descriptor.compressed_size) == count - PLAIN_TRAILER as u64 {
                        sink.write_all(&window[..len - PLAIN_TRAILER])?;
                        debug!("found {found:?} after {} payload bytes",
                            count - PLAIN_TRAILER as u64);
                        return Ok(ScanOutcome {
                            found,
                            descriptor: Some(descriptor),
                        });
                    }
                }
                // A signature whose descriptor does not account for the
                // bytes seen so far is payload that happens to contain
                // "PK": keep scanning.
            }
        }

        if window.len() >= WINDOW_CAPACITY {
            let flush = window.len() - WINDOW_RETAIN;
            sink.write_all(&window[..flush])?;
            window.drain(..flush);
        }
    }
}

fn next_byte<R: BufRead>(reader: &mut R) -> io::Result<Option<u8>> {
    loop {
        match reader.fill_buf() {
            Ok([]) => return Ok(None),
            Ok(buf) => {
                let byte = buf[0];
                reader.consume(1);
                return Ok(Some(byte));
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn descriptor(crc32: u32, compressed: u32, uncompressed: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&crc32.to_le_bytes());
        out.extend_from_slice(&compressed.to_le_bytes());
        out.extend_from_slice(&uncompressed.to_le_bytes());
        out
    }

    fn scan(stream: &[u8]) -> (io::Result<ScanOutcome>, Vec<u8>) {
        let mut sink = Vec::new();
        let mut reader = io::Cursor::new(stream);
        let outcome = scan_to_signature(&mut reader, &mut sink);
        (outcome, sink)
    }

    #[test]
    fn local_header_after_plain_descriptor() {
        let mut stream = b"HOGEHOGE".to_vec();
        stream.extend_from_slice(&descriptor(0, 8, 8));
        stream.extend_from_slice(b"PK\x03\x04");

        let (outcome, sink) = scan(&stream);
        let outcome = outcome.unwrap();
        assert_eq!(outcome.found, ScanFound::LocalHeader);
        assert_eq!(u64::from(outcome.descriptor.unwrap().compressed_size), 8);
        assert_eq!(sink, b"HOGEHOGE");
    }

    #[test]
    fn local_header_after_signed_descriptor() {
        let mut stream = b"HOGEHOGE".to_vec();
        stream.extend_from_slice(b"PK\x07\x08");
        stream.extend_from_slice(&descriptor(0xabad1dea, 8, 8));
        stream.extend_from_slice(b"PK\x03\x04");

        let (outcome, sink) = scan(&stream);
        let outcome = outcome.unwrap();
        assert_eq!(outcome.found, ScanFound::LocalHeader);
        let desc = outcome.descriptor.unwrap();
        assert_eq!({ desc.crc32 }, 0xabad1dea);
        assert_eq!({ desc.compressed_size }, 8);
        assert_eq!(sink, b"HOGEHOGE");
    }

    #[test]
    fn central_header_terminates() {
        let mut stream = b"HOGEHOGE".to_vec();
        stream.extend_from_slice(&descriptor(0, 8, 8));
        stream.extend_from_slice(b"PK\x01\x02");

        let (outcome, sink) = scan(&stream);
        assert_eq!(outcome.unwrap().found, ScanFound::CentralHeader);
        assert_eq!(sink, b"HOGEHOGE");
    }

    #[test]
    fn embedded_signature_is_not_a_boundary() {
        // The payload contains PK\x03\x04, but the 12 bytes before it do
        // not form a descriptor matching the running count.
        let payload = b"ABCDEFGHIJKLPK\x03\x04WXYZ";
        let mut stream = payload.to_vec();
        stream.extend_from_slice(&descriptor(0, payload.len() as u32, 0));
        stream.extend_from_slice(b"PK\x03\x04");

        let (outcome, sink) = scan(&stream);
        assert_eq!(outcome.unwrap().found, ScanFound::LocalHeader);
        assert_eq!(sink, payload);
    }

    #[test]
    fn empty_payload() {
        let mut stream = descriptor(0, 0, 0);
        stream.extend_from_slice(b"PK\x03\x04");

        let (outcome, sink) = scan(&stream);
        let outcome = outcome.unwrap();
        assert_eq!(outcome.found, ScanFound::LocalHeader);
        assert_eq!(u64::from(outcome.descriptor.unwrap().compressed_size), 0);
        assert!(sink.is_empty());
    }

    #[test]
    fn eof_flushes_everything() {
        let (outcome, sink) = scan(b"truncated archive tail");
        let outcome = outcome.unwrap();
        assert_eq!(outcome.found, ScanFound::Eof);
        assert!(outcome.descriptor.is_none());
        assert_eq!(sink, b"truncated archive tail");
    }

    #[test]
    fn payload_larger_than_the_window() {
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let mut stream = payload.clone();
        stream.extend_from_slice(b"PK\x07\x08");
        stream.extend_from_slice(&descriptor(77, payload.len() as u32, 0));
        stream.extend_from_slice(b"PK\x03\x04");

        let (outcome, sink) = scan(&stream);
        let outcome = outcome.unwrap();
        assert_eq!(outcome.found, ScanFound::LocalHeader);
        assert_eq!({ outcome.descriptor.unwrap().crc32 }, 77);
        assert_eq!(sink, payload);
    }
}
