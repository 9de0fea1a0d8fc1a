//! Static asset resolution against the built client directory
//!
//! Request paths are decoded and normalized before they touch the
//! filesystem; a path that would leave the assets root never resolves.

use std::io::{self, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::body::Body;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::trace;

/// The subset of file metadata the dispatcher needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetMetadata {
    pub is_dir: bool,
    pub len: u64,
    pub modified: Option<SystemTime>,
}

impl From<std::fs::Metadata> for AssetMetadata {
    fn from(metadata: std::fs::Metadata) -> Self {
        Self {
            is_dir: metadata.is_dir(),
            len: metadata.len(),
            modified: metadata.modified().ok(),
        }
    }
}

// ============================================================================
// AssetFs trait and implementations
// ============================================================================

/// Read-only filesystem access for static serving
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssetFs: Send + Sync {
    /// Metadata of `path`, following symlinks
    async fn metadata(&self, path: &Path) -> io::Result<AssetMetadata>;

    /// Open `path` as a streaming body
    ///
    /// The file handle is owned by the body and closed when it is dropped.
    async fn open(&self, path: &Path) -> io::Result<Body>;

    /// Open `len` bytes of `path` starting at byte `start`
    async fn open_range(&self, path: &Path, start: u64, len: u64) -> io::Result<Body>;
}

/// Tokio filesystem implementation of AssetFs
#[derive(Default, Clone)]
pub struct TokioAssetFs;

impl TokioAssetFs {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AssetFs for TokioAssetFs {
    async fn metadata(&self, path: &Path) -> io::Result<AssetMetadata> {
        Ok(tokio::fs::metadata(path).await?.into())
    }

    async fn open(&self, path: &Path) -> io::Result<Body> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Body::from_stream(ReaderStream::new(file)))
    }

    async fn open_range(&self, path: &Path, start: u64, len: u64) -> io::Result<Body> {
        let mut file = tokio::fs::File::open(path).await?;
        file.seek(SeekFrom::Start(start)).await?;
        Ok(Body::from_stream(ReaderStream::new(file.take(len))))
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// A regular file under the assets root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAsset {
    pub path: PathBuf,
    pub metadata: AssetMetadata,
}

impl ResolvedAsset {
    /// Weak validator derived from size and modification time
    pub fn etag(&self) -> String {
        match self.metadata.modified.and_then(|m| m.duration_since(UNIX_EPOCH).ok()) {
            Some(mtime) => format!("W/\"{:x}-{:x}\"", self.metadata.len, mtime.as_millis()),
            None => format!("W/\"{:x}\"", self.metadata.len),
        }
    }
}

/// Outcome of resolving a request path
#[derive(Debug)]
pub enum AssetLookup {
    Found(ResolvedAsset),
    /// No servable file: missing, a directory, or a rejected path
    NotFound,
    /// The filesystem failed for a reason other than absence
    Fault(io::Error),
}

/// Resolves request paths to files under a fixed root
pub struct StaticAssetResolver {
    root: PathBuf,
    fs: Arc<dyn AssetFs>,
}

impl StaticAssetResolver {
    pub fn new(root: impl Into<PathBuf>, fs: Arc<dyn AssetFs>) -> Self {
        Self {
            root: root.into(),
            fs,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn resolve(&self, request_path: &str) -> AssetLookup {
        let Some(relative) = sanitize_path(request_path) else {
            trace!("Rejected request path {:?}", request_path);
            return AssetLookup::NotFound;
        };
        let path = self.root.join(relative);

        match self.fs.metadata(&path).await {
            Ok(metadata) if metadata.is_dir => AssetLookup::NotFound,
            Ok(metadata) => AssetLookup::Found(ResolvedAsset { path, metadata }),
            Err(e) if is_absent(&e) => AssetLookup::NotFound,
            Err(e) => AssetLookup::Fault(e),
        }
    }

    pub async fn open(&self, asset: &ResolvedAsset) -> io::Result<Body> {
        self.fs.open(&asset.path).await
    }

    /// Open the inclusive byte range `start..=end` of `asset`
    pub async fn open_range(&self, asset: &ResolvedAsset, start: u64, end: u64) -> io::Result<Body> {
        self.fs.open_range(&asset.path, start, end - start + 1).await
    }
}

fn is_absent(e: &io::Error) -> bool {
    // `/app.js/x` fails with ENOTDIR rather than ENOENT
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

/// Turn a URL path into a root-relative filesystem path
///
/// Returns `None` for undecodable paths and for any path containing a
/// segment that could escape the root (`..`, backslashes, NUL, or a
/// platform prefix such as `C:`).
pub fn sanitize_path(request_path: &str) -> Option<PathBuf> {
    let decoded = urlencoding::decode(request_path).ok()?;

    let mut relative = PathBuf::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s if s.contains('\\') || s.contains('\0') => return None,
            s => {
                let mut components = Path::new(s).components();
                match (components.next(), components.next()) {
                    (Some(Component::Normal(_)), None) => relative.push(s),
                    _ => return None,
                }
            }
        }
    }
    Some(relative)
}
