//! Byte pipe and background task plumbing for descriptor bodies.
//!
//! An entry that uses a data descriptor has no length to bound its body
//! with, so a producer thread runs the signature scanner over the stream
//! while the consumer inflates the payload as it arrives. The channel is
//! bounded, which is all the backpressure needed: the producer stalls once
//! the consumer falls a few chunks behind.

use std::io::{self, BufReader, Read, Write};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use super::scanner::{scan_to_signature, ScanOutcome};
use crate::result::{ZipError, ZipResult};

/// Chunks in flight before the producer blocks.
const PIPE_CAPACITY: usize = 32;

pub(crate) fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = sync_channel(PIPE_CAPACITY);
    (
        PipeWriter { tx: Some(tx) },
        PipeReader {
            rx,
            chunk: Vec::new(),
            pos: 0,
        },
    )
}

/// Producer half. Once the reading half is gone, writes turn into silent
/// discards: the scan must still run to the boundary so the archive knows
/// where the next entry starts, even when nobody wants the payload.
pub(crate) struct PipeWriter {
    tx: Option<SyncSender<Vec<u8>>>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(tx) = &self.tx {
            if tx.send(buf.to_vec()).is_err() {
                self.tx = None;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Consumer half; reports EOF once the producer is done and drained.
pub(crate) struct PipeReader {
    rx: Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.chunk.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let count = (self.chunk.len() - self.pos).min(buf.len());
        buf[..count].copy_from_slice(&self.chunk[self.pos..self.pos + count]);
        self.pos += count;
        Ok(count)
    }
}

/// One background scan over the stream reader, which the task owns for the
/// duration and returns through its join value together with the outcome.
pub(crate) struct ScanTask<R> {
    handle: Option<JoinHandle<(BufReader<R>, io::Result<ScanOutcome>)>>,
    outcome: Option<ScanOutcome>,
}

impl<R: Read + Send + 'static> ScanTask<R> {
    pub fn spawn(mut reader: BufReader<R>) -> io::Result<(ScanTask<R>, PipeReader)> {
        let (mut writer, pipe_reader) = pipe();
        let handle = thread::Builder::new()
            .name("descriptor-scan".into())
            .spawn(move || {
                let outcome = scan_to_signature(&mut reader, &mut writer);
                (reader, outcome)
            })?;
        Ok((
            ScanTask {
                handle: Some(handle),
                outcome: None,
            },
            pipe_reader,
        ))
    }

    /// Join the producer exactly once, hand the stream reader back through
    /// `reader_slot`, and memoize the outcome for every later call.
    ///
    /// Joining is the ordering primitive here: the descriptor and the
    /// has-next flag become observable only after the producer has written
    /// and closed the last payload byte.
    pub fn wait(&mut self, reader_slot: &mut Option<BufReader<R>>) -> ZipResult<ScanOutcome> {
        if let Some(handle) = self.handle.take() {
            let (reader, result) = handle
                .join()
                .map_err(|_| io::Error::other("descriptor scan task panicked"))?;
            *reader_slot = Some(reader);
            self.outcome = Some(result?);
        }
        match self.outcome {
            Some(outcome) => Ok(outcome),
            None => Err(ZipError::Io(io::Error::other(
                "descriptor scan failed earlier",
            ))),
        }
    }
}

impl<R> Drop for ScanTask<R> {
    fn drop(&mut self) {
        // An archive dropped mid-entry still joins its producer; by then
        // the pipe reader is gone, so the scan finishes in discard mode.
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
