//! Path jail: read-only access confined to one root directory.
//!
//! Paths are canonicalized (symlinks, `.` and `..` resolved) and must land on the root or a
//! descendant of it, compared component by component so `/data-other` is not inside `/data`.

use std::io;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum JailError {
    #[error("path escapes the data root: {0}")]
    PathEscape(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// A path proven to be inside the jail root. Only [`PathJail::resolve`] creates one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JailedPath(PathBuf);

impl JailedPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

/// What a read returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JailContent {
    /// Full file content, unchanged.
    File(Vec<u8>),
    /// Entry names in directory enumeration order (non-recursive).
    Directory(Vec<String>),
}

/// Confines reads to a canonical root directory.
#[derive(Debug, Clone)]
pub struct PathJail {
    root: PathBuf,
}

impl PathJail {
    /// Canonicalize `root`; it must exist and be a directory.
    pub fn new(root: &Path) -> Result<Self, JailError> {
        let canonical = std::fs::canonicalize(root).map_err(|e| io_error(root, e))?;
        if !canonical.is_dir() {
            return Err(JailError::UnsupportedType(canonical.display().to_string()));
        }
        Ok(Self { root: canonical })
    }

    /// Canonical root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a caller-supplied path against the root. `""` is the root itself.
    /// An absolute path is taken as-is and must still land inside the root.
    /// A path that does not exist resolves through its deepest existing ancestor; reading it then fails with not-found.
    pub fn resolve(&self, user_path: &str) -> Result<JailedPath, JailError> {
        let joined = self.root.join(user_path);
        let resolved = canonicalize_lenient(&joined, user_path)?;
        if resolved.starts_with(&self.root) {
            Ok(JailedPath(resolved))
        } else {
            log::warn!("jail: rejected {:?} (resolves to {})", user_path, resolved.display());
            Err(JailError::PathEscape(user_path.to_string()))
        }
    }

    /// Read a resolved path: file bytes or directory entry names.
    pub async fn read(&self, path: &JailedPath) -> Result<JailContent, JailError> {
        let p = path.as_path();
        let meta = match tokio::fs::metadata(p).await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(JailError::NotFound(self.display_relative(p)))
            }
            Err(e) => return Err(io_error(p, e)),
        };
        if meta.is_file() {
            let bytes = tokio::fs::read(p).await.map_err(|e| io_error(p, e))?;
            Ok(JailContent::File(bytes))
        } else if meta.is_dir() {
            let mut entries = tokio::fs::read_dir(p).await.map_err(|e| io_error(p, e))?;
            let mut names = Vec::new();
            while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(p, e))? {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
            Ok(JailContent::Directory(names))
        } else {
            Err(JailError::UnsupportedType(self.display_relative(p)))
        }
    }

    /// Path relative to the root, for error messages that should not reveal the host layout.
    fn display_relative(&self, p: &Path) -> String {
        p.strip_prefix(&self.root)
            .map(|r| r.display().to_string())
            .unwrap_or_else(|_| p.display().to_string())
    }
}

fn io_error(path: &Path, source: io::Error) -> JailError {
    JailError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Canonicalize `path`; when it does not exist, canonicalize the deepest existing ancestor and
/// apply the remaining components lexically.
pub(crate) fn canonicalize_lenient(path: &Path, user_path: &str) -> Result<PathBuf, JailError> {
    match std::fs::canonicalize(path) {
        Ok(p) => return Ok(p),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            // A symlink that cannot be resolved (e.g. a loop) is not a readable file type.
            let is_link = std::fs::symlink_metadata(path)
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(false);
            if is_link {
                return Err(JailError::UnsupportedType(user_path.to_string()));
            }
            return Err(io_error(path, e));
        }
    }

    let components: Vec<Component<'_>> = path.components().collect();
    let mut split = components.len();
    let mut existing = path.to_path_buf();
    while split > 0 {
        existing = components[..split].iter().collect();
        if std::fs::metadata(&existing).is_ok() {
            break;
        }
        split -= 1;
    }

    let mut out = std::fs::canonicalize(&existing).map_err(|e| io_error(&existing, e))?;
    for c in &components[split..] {
        match c {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            Component::Normal(s) => out.push(s),
            Component::RootDir | Component::Prefix(_) => {}
        }
    }
    Ok(out)
}
