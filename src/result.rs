//! Error types that can be emitted from this library

use displaydoc::Display;
use thiserror::Error;

use std::borrow::Cow;
use std::io;

/// Generic result type with ZipError as its error variant
pub type ZipResult<T> = Result<T, ZipError>;

/// Error type for salvage decoding
#[derive(Debug, Display, Error)]
#[non_exhaustive]
pub enum ZipError {
    /// i/o error: {0}
    Io(#[from] io::Error),

    /// no local file header signature where one was expected
    SignatureNotFound,

    /// unexpected end of input while reading {0}
    UnexpectedEof(&'static str),

    /// invalid Zip archive: {0}
    InvalidArchive(Cow<'static, str>),

    /// compression method {0} is not supported
    UnsupportedMethod(u16),

    /// entry {0} is encrypted and no password was supplied
    PasswordRequired(Box<str>),

    /// wrong password for entry {0}
    InvalidPassword(Box<str>),

    /// entry name could not be decoded: {0}
    NameDecode(Cow<'static, str>),
}

pub(crate) fn invalid_archive<T, M: Into<Cow<'static, str>>>(message: M) -> ZipResult<T> {
    Err(ZipError::InvalidArchive(message.into()))
}

impl From<ZipError> for io::Error {
    fn from(err: ZipError) -> io::Error {
        let kind = match &err {
            ZipError::Io(err) => err.kind(),
            ZipError::SignatureNotFound
            | ZipError::InvalidArchive(_)
            | ZipError::NameDecode(_) => io::ErrorKind::InvalidData,
            ZipError::UnexpectedEof(_) => io::ErrorKind::UnexpectedEof,
            ZipError::UnsupportedMethod(_) => io::ErrorKind::Unsupported,
            ZipError::PasswordRequired(_) | ZipError::InvalidPassword(_) => {
                io::ErrorKind::InvalidInput
            }
        };

        io::Error::new(kind, err)
    }
}

impl ZipError {
    /// True for errors scoped to a single entry, where the decoder has
    /// positioned itself so that iteration can continue with the next one.
    pub fn is_entry_scoped(&self) -> bool {
        matches!(
            self,
            ZipError::UnsupportedMethod(_)
                | ZipError::PasswordRequired(_)
                | ZipError::InvalidPassword(_)
                | ZipError::NameDecode(_)
        )
    }
}
