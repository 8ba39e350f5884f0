//! Byte Reader
//!
//! Asynchronous ranged reads from the two kinds of segment sources:
//!
//! - local FITS files, via cached `tokio::fs::File` handles and positional reads
//! - `s3:` object URLs, via cached object-store clients and ranged GETs
//!
//! ## Handle caching
//!
//! Opening a file or constructing an S3 client is much more expensive than one
//! ranged read, and a render touches the same few hundred URLs over and over.
//! Handles are therefore cached per URL and dropped (which closes them) after one
//! minute without use. Creation runs under the cache lock, so concurrent readers
//! of a new URL share a single open instead of racing.
//!
//! ## Wire order
//!
//! Returned buffers are raw FITS bytes, i.e. big-endian. Decoding to host-native
//! samples happens downstream in the decompressor.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use focaltile_core::{Error, Result};
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use crate::s3::{map_store_error, open_object};

const DEFAULT_IDLE_EXPIRY: Duration = Duration::from_secs(60);

struct CachedHandle<T> {
    handle: T,
    last_used: Instant,
}

type FileHandle = Arc<Mutex<tokio::fs::File>>;
type StoreHandle = (Arc<dyn ObjectStore>, ObjectPath);

/// Ranged byte access with per-URL handle caching.
pub struct ByteReader {
    files: Mutex<HashMap<String, CachedHandle<FileHandle>>>,
    stores: Mutex<HashMap<String, CachedHandle<StoreHandle>>>,
    idle_expiry: Duration,
}

impl Default for ByteReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteReader {
    pub fn new() -> Self {
        Self::with_idle_expiry(DEFAULT_IDLE_EXPIRY)
    }

    /// Cache handles for a non-default idle window. Used by tests; production
    /// readers keep the one-minute default.
    pub fn with_idle_expiry(idle_expiry: Duration) -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            stores: Mutex::new(HashMap::new()),
            idle_expiry,
        }
    }

    /// Read up to `length` bytes starting at `offset`.
    ///
    /// A short buffer is returned when the source ends inside the range; callers
    /// that need the full range must check the length.
    pub async fn read(&self, url: &str, offset: u64, length: usize) -> Result<Bytes> {
        if url.starts_with("s3:") {
            self.read_object(url, offset, length).await
        } else {
            self.read_file(url, offset, length).await
        }
    }

    /// Current length of the source in bytes, used as a freshness witness.
    pub async fn len(&self, url: &str) -> Result<u64> {
        if url.starts_with("s3:") {
            let (store, path) = self.store_for(url).await?;
            let meta = store
                .head(&path)
                .await
                .map_err(|e| map_store_error(url, e))?;
            Ok(meta.size)
        } else {
            let meta = tokio::fs::metadata(url)
                .await
                .map_err(|e| Error::Io(format!("cannot stat {url}: {e}")))?;
            Ok(meta.len())
        }
    }

    async fn read_object(&self, url: &str, offset: u64, length: usize) -> Result<Bytes> {
        let (store, path) = self.store_for(url).await?;
        let range = offset..offset + length as u64;
        let bytes = store
            .get_range(&path, range)
            .await
            .map_err(|e| map_store_error(url, e))?;
        tracing::trace!(url, offset, length = bytes.len(), "object range read");
        Ok(bytes)
    }

    async fn read_file(&self, url: &str, offset: u64, length: usize) -> Result<Bytes> {
        let handle = self.file_for(url).await?;
        let mut file = handle.lock().await;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| Error::Io(format!("cannot seek {url}: {e}")))?;

        let mut buf = vec![0u8; length];
        let mut filled = 0;
        while filled < length {
            let n = file
                .read(&mut buf[filled..])
                .await
                .map_err(|e| Error::from(e))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        tracing::trace!(url, offset, length = filled, "file range read");
        Ok(Bytes::from(buf))
    }

    async fn file_for(&self, url: &str) -> Result<FileHandle> {
        let mut files = self.files.lock().await;
        sweep_idle(&mut files, self.idle_expiry);

        if let Some(cached) = files.get_mut(url) {
            cached.last_used = Instant::now();
            return Ok(cached.handle.clone());
        }

        let file = tokio::fs::File::open(url)
            .await
            .map_err(|e| Error::Io(format!("cannot open {url}: {e}")))?;
        let handle = Arc::new(Mutex::new(file));
        files.insert(
            url.to_string(),
            CachedHandle {
                handle: handle.clone(),
                last_used: Instant::now(),
            },
        );
        Ok(handle)
    }

    async fn store_for(&self, url: &str) -> Result<StoreHandle> {
        let mut stores = self.stores.lock().await;
        sweep_idle(&mut stores, self.idle_expiry);

        if let Some(cached) = stores.get_mut(url) {
            cached.last_used = Instant::now();
            return Ok(cached.handle.clone());
        }

        let handle = open_object(url)?;
        stores.insert(
            url.to_string(),
            CachedHandle {
                handle: handle.clone(),
                last_used: Instant::now(),
            },
        );
        Ok(handle)
    }

    /// Number of live handles of each kind, for tests and stats.
    pub async fn cached_handles(&self) -> (usize, usize) {
        (self.files.lock().await.len(), self.stores.lock().await.len())
    }
}

fn sweep_idle<T>(cache: &mut HashMap<String, CachedHandle<T>>, idle_expiry: Duration) {
    let now = Instant::now();
    cache.retain(|url, cached| {
        let keep = now.duration_since(cached.last_used) < idle_expiry;
        if !keep {
            tracing::debug!(url = %url, "closing idle handle");
        }
        keep
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch_file(contents: &[u8]) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(contents)
            .unwrap();
        (dir, path.to_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn test_ranged_file_read() {
        let (_dir, path) = scratch_file(b"0123456789abcdef");
        let reader = ByteReader::new();

        let bytes = reader.read(&path, 4, 6).await.unwrap();
        assert_eq!(&bytes[..], b"456789");
    }

    #[tokio::test]
    async fn test_read_past_end_is_short() {
        let (_dir, path) = scratch_file(b"0123456789");
        let reader = ByteReader::new();

        let bytes = reader.read(&path, 8, 16).await.unwrap();
        assert_eq!(&bytes[..], b"89");
    }

    #[tokio::test]
    async fn test_len_reports_current_size() {
        let (_dir, path) = scratch_file(b"0123456789");
        let reader = ByteReader::new();
        assert_eq!(reader.len(&path).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let reader = ByteReader::new();
        let err = reader.read("/no/such/file.fits", 0, 16).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn test_handle_reused_across_reads() {
        let (_dir, path) = scratch_file(b"0123456789");
        let reader = ByteReader::new();

        reader.read(&path, 0, 4).await.unwrap();
        reader.read(&path, 4, 4).await.unwrap();
        assert_eq!(reader.cached_handles().await, (1, 0));
    }

    #[tokio::test]
    async fn test_idle_handle_evicted() {
        let (_dir, path) = scratch_file(b"0123456789");
        let reader = ByteReader::with_idle_expiry(Duration::from_millis(20));

        reader.read(&path, 0, 4).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        // next access sweeps the stale handle before re-opening
        reader.read(&path, 0, 4).await.unwrap();
        assert_eq!(reader.cached_handles().await, (1, 0));
    }

    #[tokio::test]
    async fn test_object_url_without_credentials_fails_cleanly() {
        let reader = ByteReader::new();
        let err = reader
            .read("s3:nocreds_ep/bucket/object.fits", 0, 16)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nocreds_ep"));
    }
}
