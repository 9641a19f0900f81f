//! Content fingerprints used for deduplication and change detection.
//!
//! All digests are lowercase hex SHA-256. Byte streams are hashed in a
//! single pass; property bags are hashed over a canonical, key-sorted JSON
//! encoding so insertion order never matters.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::types::resource::PropertyValue;

/// Digest of an in-memory byte slice.
pub fn digest_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Digest of a byte stream, read to the end exactly once.
///
/// The reader is taken by value and dropped before returning, on success
/// and on error alike.
pub fn digest_reader<R: Read>(mut reader: R) -> Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Digest of a property bag, independent of key order.
pub fn digest_properties<'a, I, K>(properties: I) -> Result<String>
where
    I: IntoIterator<Item = (K, &'a PropertyValue)>,
    K: AsRef<str>,
{
    let canonical: BTreeMap<String, &PropertyValue> = properties
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_string(), v))
        .collect();
    let mut hasher = Sha256::new();
    serde_json::to_writer(&mut hasher, &canonical).map_err(io::Error::from)?;
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// DigestWriter
// ---------------------------------------------------------------------------

/// A writer that hashes everything passing through to an inner writer.
pub struct DigestWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        DigestWriter {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Flush the inner writer and return it with the digest and byte count.
    pub fn finish(mut self) -> io::Result<(W, String, u64)> {
        self.inner.flush()?;
        Ok((self.inner, hex::encode(self.hasher.finalize()), self.written))
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
