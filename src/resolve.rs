//! Asset resolution.
//!
//! The decoders never perform their own network or disk I/O; every asset
//! arrives through the [`Resolver`] capability. The filesystem
//! implementation memory-maps by default with a buffered fallback.
//! Transport to remote storage lives outside this crate.

use std::cell::Cell;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use memmap2::Mmap;

use crate::util::{Error, Result};

/// Capability to fetch raw asset bytes by URI.
pub trait Resolver {
    fn resolve(&self, uri: &str) -> Result<Vec<u8>>;
}

impl<R: Resolver + ?Sized> Resolver for &R {
    fn resolve(&self, uri: &str) -> Result<Vec<u8>> {
        (**self).resolve(uri)
    }
}

/// Resolver over a local directory tree.
pub struct FileResolver {
    root: PathBuf,
    use_mmap: bool,
}

impl FileResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), use_mmap: true }
    }

    /// Disable memory mapping and fall back to buffered reads.
    pub fn without_mmap(mut self) -> Self {
        self.use_mmap = false;
        self
    }

    fn open(&self, path: &Path) -> Result<File> {
        File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(path.to_path_buf())
            } else {
                Error::Io(e)
            }
        })
    }
}

impl Resolver for FileResolver {
    fn resolve(&self, uri: &str) -> Result<Vec<u8>> {
        let path = self.root.join(uri);
        let file = self.open(&path)?;
        let size = file.metadata()?.len();
        if self.use_mmap && size > 0 {
            // Safety: the file is opened read-only for the mapping's lifetime.
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::MmapFailed(e.to_string()))?;
            Ok(mmap.to_vec())
        } else {
            Ok(std::fs::read(&path)?)
        }
    }
}

/// Cooperative cancellation flag shared between a conversion task and its
/// owner. Checked between asset fetches; in-flight fetches are not aborted.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Fail with [`Error::Cancelled`] once the flag is set. Loaders call
    /// this before scheduling each further asset.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Client for SVF2 shared-asset storage.
///
/// The upstream protocol allows at most one outstanding batch request per
/// connection: a new batch must not be issued while a previous batch's
/// responses are still being collected. Violations are programmer errors,
/// not retryable conditions.
pub struct SharedAssetClient<R: Resolver> {
    resolver: R,
    batch_pending: Cell<bool>,
}

impl<R: Resolver> SharedAssetClient<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver, batch_pending: Cell::new(false) }
    }

    /// Begin collecting a batch of shared assets. Returns
    /// [`Error::BatchPending`] if a previous batch is still open.
    pub fn request_batch<'a>(&'a self, uris: &'a [String]) -> Result<Batch<'a, R>> {
        if self.batch_pending.replace(true) {
            return Err(Error::BatchPending);
        }
        Ok(Batch { client: self, uris, next: 0 })
    }
}

/// In-flight batch of shared-asset responses. Dropping the batch releases
/// the connection for the next one.
pub struct Batch<'a, R: Resolver> {
    client: &'a SharedAssetClient<R>,
    uris: &'a [String],
    next: usize,
}

impl<R: Resolver> Iterator for Batch<'_, R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let uri = self.uris.get(self.next)?;
        self.next += 1;
        Some(self.client.resolver.resolve(uri))
    }
}

impl<R: Resolver> Drop for Batch<'_, R> {
    fn drop(&mut self) {
        self.client.batch_pending.set(false);
    }
}
