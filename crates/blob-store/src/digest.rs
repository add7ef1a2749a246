//! Single-pass MD5 + SHA-1 + SHA-256 digests over async byte sources.

use std::fmt;

use md5::Md5;
use parking_lot::Mutex;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{BlobStoreError, Result};

/// Read chunk size used while hashing.
const CHUNK_SIZE: usize = 64 * 1024;

/// Idle accumulator sets kept around for reuse.
const MAX_IDLE: usize = 32;

/// The three-hash fingerprint of a byte stream.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest {
    pub md5: [u8; 16],
    pub sha1: [u8; 20],
    pub sha256: [u8; 32],
}

impl ContentDigest {
    /// Rebuild a digest from raw column values, checking their lengths.
    pub fn from_slices(md5: &[u8], sha1: &[u8], sha256: &[u8]) -> Result<Self> {
        let wrong = |name: &str, len: usize| {
            BlobStoreError::CorruptRecord(format!("{} digest has {} bytes", name, len))
        };
        Ok(Self {
            md5: md5.try_into().map_err(|_| wrong("md5", md5.len()))?,
            sha1: sha1.try_into().map_err(|_| wrong("sha1", sha1.len()))?,
            sha256: sha256.try_into().map_err(|_| wrong("sha256", sha256.len()))?,
        })
    }

    pub fn md5_hex(&self) -> String {
        hex::encode(self.md5)
    }

    pub fn sha1_hex(&self) -> String {
        hex::encode(self.sha1)
    }

    pub fn sha256_hex(&self) -> String {
        hex::encode(self.sha256)
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentDigest")
            .field("md5", &self.md5_hex())
            .field("sha1", &self.sha1_hex())
            .field("sha256", &self.sha256_hex())
            .finish()
    }
}

/// One set of hash states plus the read buffer that feeds them.
struct Accumulators {
    md5: Md5,
    sha1: Sha1,
    sha256: Sha256,
    buf: Box<[u8]>,
}

impl Accumulators {
    fn new() -> Self {
        Self {
            md5: Md5::new(),
            sha1: Sha1::new(),
            sha256: Sha256::new(),
            buf: vec![0u8; CHUNK_SIZE].into_boxed_slice(),
        }
    }

    fn update(&mut self, len: usize) {
        let chunk = &self.buf[..len];
        self.md5.update(chunk);
        self.sha1.update(chunk);
        self.sha256.update(chunk);
    }

    fn finalize(&mut self) -> ContentDigest {
        ContentDigest {
            md5: self.md5.finalize_reset().into(),
            sha1: self.sha1.finalize_reset().into(),
            sha256: self.sha256.finalize_reset().into(),
        }
    }

    fn reset(&mut self) {
        Digest::reset(&mut self.md5);
        Digest::reset(&mut self.sha1);
        Digest::reset(&mut self.sha256);
    }
}

/// Pooled accumulator set; reset and handed back to the pool on drop.
struct Pooled<'a> {
    engine: &'a DigestEngine,
    inner: Option<Accumulators>,
}

impl Pooled<'_> {
    fn get(&mut self) -> &mut Accumulators {
        self.inner
            .as_mut()
            .expect("accumulators are only taken in drop")
    }
}

impl Drop for Pooled<'_> {
    fn drop(&mut self) {
        if let Some(mut acc) = self.inner.take() {
            acc.reset();
            let mut idle = self.engine.idle.lock();
            if idle.len() < MAX_IDLE {
                idle.push(acc);
            }
        }
    }
}

/// Computes [`ContentDigest`]s, reusing hash state between calls.
///
/// Safe to share between tasks; every call gets its own accumulator set.
#[derive(Default)]
pub struct DigestEngine {
    idle: Mutex<Vec<Accumulators>>,
}

impl fmt::Debug for DigestEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestEngine")
            .field("idle", &self.idle.lock().len())
            .finish()
    }
}

impl DigestEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self) -> Pooled<'_> {
        let acc = self.idle.lock().pop().unwrap_or_else(Accumulators::new);
        Pooled {
            engine: self,
            inner: Some(acc),
        }
    }

    /// Read `source` to the end once, returning its digest and length.
    ///
    /// An empty source is not an error; callers enforce their own minimum
    /// size.
    pub async fn compute_digest<R>(&self, source: &mut R) -> Result<(ContentDigest, u64)>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut pooled = self.acquire();
        let acc = pooled.get();
        let mut read: u64 = 0;

        loop {
            let n = source
                .read(&mut acc.buf)
                .await
                .map_err(BlobStoreError::Read)?;
            if n == 0 {
                break;
            }
            acc.update(n);
            read += n as u64;
        }

        Ok((acc.finalize(), read))
    }

    /// Number of accumulator sets waiting for reuse.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }
}
