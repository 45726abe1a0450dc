//! Implementation of the ZipCrypto algorithm
//!
//! The following paper was used to implement the ZipCrypto algorithm:
//! <https://courses.cs.ut.ee/MTAT.07.022/2015_fall/uploads/Main/dmitri-report-f15-16.pdf>

use std::io::{self, Read};
use std::num::Wrapping;

use log::debug;

use crate::result::{ZipError, ZipResult};
use crate::spec::eof_means;

/// Number of bytes in the encryption header preceding the ciphertext.
pub(crate) const ENCRYPTION_HEADER_LEN: usize = 12;

/// Total password attempts, counting the first.
const MAX_PASSWORD_ATTEMPTS: usize = 3;

/// Standard CRC32 lookup table (polynomial 0xEDB88320), used raw by the key
/// schedule, without the pre/post inversion a whole-buffer CRC applies.
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0u32;
    while i < 256 {
        let mut crc = i;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB88320;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
};

/// The three 32-bit rolling keys of the traditional PKWARE cipher.
#[derive(Clone, Copy)]
struct ZipCryptoKeys {
    key_0: Wrapping<u32>,
    key_1: Wrapping<u32>,
    key_2: Wrapping<u32>,
}

impl ZipCryptoKeys {
    fn new() -> ZipCryptoKeys {
        ZipCryptoKeys {
            key_0: Wrapping(0x12345678),
            key_1: Wrapping(0x23456789),
            key_2: Wrapping(0x34567890),
        }
    }

    fn derive(password: &[u8]) -> ZipCryptoKeys {
        let mut keys = ZipCryptoKeys::new();
        for &byte in password {
            keys.update(byte);
        }
        keys
    }

    fn crc32_step(crc: Wrapping<u32>, input: u8) -> Wrapping<u32> {
        Wrapping(CRC32_TABLE[((crc.0 ^ input as u32) & 0xff) as usize] ^ (crc.0 >> 8))
    }

    fn update(&mut self, plain: u8) {
        self.key_0 = Self::crc32_step(self.key_0, plain);
        self.key_1 = (self.key_1 + (self.key_0 & Wrapping(0xff))) * Wrapping(0x08088405)
            + Wrapping(1);
        self.key_2 = Self::crc32_step(self.key_2, (self.key_1 >> 24).0 as u8);
    }

    fn stream_byte(&self) -> u8 {
        let t = self.key_2.0 | 2;
        (t.wrapping_mul(t ^ 1) >> 8) as u8
    }

    fn decrypt_byte(&mut self, cipher: u8) -> u8 {
        let plain = cipher ^ self.stream_byte();
        self.update(plain);
        plain
    }

    #[cfg(test)]
    fn encrypt_byte(&mut self, plain: u8) -> u8 {
        let cipher = plain ^ self.stream_byte();
        self.update(plain);
        cipher
    }
}

/// Remembers the password for an archive so each encrypted entry does not
/// prompt again. The provider is invoked on first use and whenever a check
/// failure asks for a retry.
pub(crate) struct PasswordHolder {
    provider: Option<PasswordProvider>,
    last: Option<Vec<u8>>,
}

pub(crate) type PasswordProvider = Box<dyn FnMut(&str, bool) -> io::Result<Vec<u8>>>;

impl PasswordHolder {
    pub fn new() -> Self {
        PasswordHolder {
            provider: None,
            last: None,
        }
    }

    pub fn set_provider(&mut self, provider: PasswordProvider) {
        self.provider = Some(provider);
    }

    fn ask(&mut self, name: &str, retry: bool) -> ZipResult<Vec<u8>> {
        if !retry {
            if let Some(last) = &self.last {
                return Ok(last.clone());
            }
        }
        let Some(provider) = self.provider.as_mut() else {
            return Err(ZipError::PasswordRequired(name.into()));
        };
        let password = provider(name, retry)?;
        self.last = Some(password.clone());
        Ok(password)
    }
}

/// Decrypting adapter over the raw ciphertext of one entry.
///
/// Construction consumes and checks the 12-byte encryption header. The last
/// plaintext byte of the header must equal the high byte of the entry's
/// MS-DOS time word; a mismatch resets the keys and asks the password
/// holder to retry, up to three attempts in total.
pub(crate) struct ZipCryptoReader<R> {
    inner: R,
    keys: ZipCryptoKeys,
}

impl<R: Read> ZipCryptoReader<R> {
    pub fn open(
        mut inner: R,
        name: &str,
        check_byte: u8,
        passwords: &mut PasswordHolder,
    ) -> ZipResult<ZipCryptoReader<R>> {
        let mut header = [0u8; ENCRYPTION_HEADER_LEN];
        inner
            .read_exact(&mut header)
            .map_err(|e| eof_means(e, "encryption header"))?;

        for attempt in 0..MAX_PASSWORD_ATTEMPTS {
            let password = passwords.ask(name, attempt > 0)?;
            let mut keys = ZipCryptoKeys::derive(&password);
            let mut last_byte = 0u8;
            for &byte in &header {
                last_byte = keys.decrypt_byte(byte);
            }
            if last_byte == check_byte {
                return Ok(ZipCryptoReader { inner, keys });
            }
            debug!(
                "password check failed for {name:?} (attempt {} of {MAX_PASSWORD_ATTEMPTS})",
                attempt + 1
            );
        }
        Err(ZipError::InvalidPassword(name.into()))
    }
}

impl<R: Read> Read for ZipCryptoReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        for byte in &mut buf[..count] {
            *byte = self.keys.decrypt_byte(*byte);
        }
        Ok(count)
    }
}

/// Encrypt one entry body for test archives: 11 filler bytes plus the check
/// byte, then the payload, all through the stream cipher.
#[cfg(test)]
pub(crate) fn encrypt_for_test(password: &[u8], check_byte: u8, plaintext: &[u8]) -> Vec<u8> {
    let mut keys = ZipCryptoKeys::derive(password);
    let mut header = [0xa5u8; ENCRYPTION_HEADER_LEN];
    header[ENCRYPTION_HEADER_LEN - 1] = check_byte;

    let mut out = Vec::with_capacity(ENCRYPTION_HEADER_LEN + plaintext.len());
    for &byte in header.iter().chain(plaintext) {
        out.push(keys.encrypt_byte(byte));
    }
    out
}
