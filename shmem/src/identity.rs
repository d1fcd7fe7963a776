//! Queue identity and the names derived from it.
//!
//! Every process that talks to a queue starts from a filesystem path. The
//! path is canonicalized first, so `./q.bin`, `q.bin` and `/abs/dir/q.bin`
//! resolve to the same store and the same four synchronization primitives.

use std::env;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::QueueError;

/// Longest sanitized base name. Leaves room for the leading `/`, the
/// primitive suffix and the `sem.` prefix the C library adds, within
/// `NAME_MAX`.
const MAX_BASE_LEN: usize = 200;
const HASH_SUFFIX_LEN: usize = 17;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SyncKind {
    Empty,
    Full,
    Mutex,
    Ready,
}

impl SyncKind {
    pub const ALL: [SyncKind; 4] = [SyncKind::Empty, SyncKind::Full, SyncKind::Mutex, SyncKind::Ready];

    pub fn suffix(self) -> &'static str {
        match self {
            SyncKind::Empty => "_empty",
            SyncKind::Full => "_full",
            SyncKind::Mutex => "_mutex",
            SyncKind::Ready => "_ready",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueIdentity {
    path: PathBuf,
    base: String,
}

impl QueueIdentity {
    pub fn resolve(path: impl AsRef<Path>) -> Result<QueueIdentity, QueueError> {
        let path = canonicalize(path.as_ref())?;
        let base = sanitize(&path.to_string_lossy());
        Ok(QueueIdentity { path, base })
    }

    /// Canonical absolute path. The file-backed store lives here.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn base_name(&self) -> &str {
        &self.base
    }

    /// Name of the shared memory segment holding header and slots.
    pub fn store_name(&self) -> String {
        format!("/{}", self.base)
    }

    pub fn sync_name(&self, kind: SyncKind) -> String {
        format!("/{}{}", self.base, kind.suffix())
    }
}

impl fmt::Display for QueueIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Absolute, lexically normalized path whose parent directory has been
/// resolved through the filesystem. The final component may not exist yet.
fn canonicalize(path: &Path) -> Result<PathBuf, QueueError> {
    let invalid = |reason: String| QueueError::InvalidIdentity {
        path: path.display().to_string(),
        reason,
    };

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map_err(|e| invalid(format!("no current directory: {}", e)))?
            .join(path)
    };
    let normalized = normalize(&absolute);

    let file_name = normalized
        .file_name()
        .ok_or_else(|| invalid("path has no file name".to_string()))?
        .to_owned();
    let parent = normalized
        .parent()
        .ok_or_else(|| invalid("path has no parent directory".to_string()))?;
    let parent = parent
        .canonicalize()
        .map_err(|e| invalid(format!("cannot resolve {}: {}", parent.display(), e)))?;
    Ok(parent.join(file_name))
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn sanitize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    if cleaned.len() <= MAX_BASE_LEN {
        return cleaned;
    }
    // Keep the most specific end of the path and disambiguate with a hash
    // of the whole thing.
    let keep = MAX_BASE_LEN - HASH_SUFFIX_LEN;
    let tail = &cleaned[cleaned.len() - keep..];
    format!("{}_{:016x}", tail, fnv1a(raw.as_bytes()))
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
