//! Ownership remapping for imported trees.
//!
//! Imported trees come from outside the host's trust boundary, so every
//! entry's owner is moved into a reserved id range before the tree is copied
//! into a volume.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::os::unix::fs::{lchown, MetadataExt};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::infrastructure::audit::{log_audit, AuditEvent};

/// Errors raised while namespacing a tree.
#[derive(Debug, Error)]
pub enum NamespaceError {
    /// Walking the tree failed.
    #[error("walking {path}: {source}")]
    Walk {
        /// Tree root.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: walkdir::Error,
    },
    /// Reading or rewriting an entry failed. Ownership already rewritten in
    /// the same pass has been restored.
    #[error("{op} {path}: {source}")]
    Io {
        /// Operation being attempted.
        op: &'static str,
        /// Entry path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Rewrites ownership of a tree into a sandbox-safe range.
pub trait Namespacer: Send + Sync + std::fmt::Debug {
    /// Stable fingerprint of the rewrite policy.
    fn cache_key(&self) -> String;

    /// Remaps every entry under `tree`. Must be idempotent and must leave the
    /// tree untouched when it fails.
    ///
    /// # Errors
    ///
    /// Returns an error if any entry cannot be remapped.
    fn namespace(&self, tree: &Path) -> Result<(), NamespaceError>;
}

/// Namespacer that leaves ownership alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNamespacer;

impl Namespacer for NoopNamespacer {
    fn cache_key(&self) -> String {
        "noop".to_string()
    }

    fn namespace(&self, _tree: &Path) -> Result<(), NamespaceError> {
        Ok(())
    }
}

/// A contiguous block of ids, `[base, base + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    base: u32,
    size: u32,
}

impl IdRange {
    /// Creates a range. A zero size is widened to one id.
    #[must_use]
    pub fn new(base: u32, size: u32) -> Self {
        let size = size.clamp(1, (u32::MAX - base).max(1));
        Self { base, size }
    }

    /// Whether `id` already falls inside the range.
    #[must_use]
    pub fn contains(&self, id: u32) -> bool {
        id >= self.base && id - self.base < self.size
    }

    /// Maps a host id into the range.
    ///
    /// Ids already in range are kept, which makes the mapping idempotent.
    /// Ids below `size` are offset by `base`; anything larger collapses onto
    /// the last id of the range.
    #[must_use]
    pub fn translate(&self, id: u32) -> u32 {
        if self.contains(id) {
            id
        } else if id < self.size {
            self.base + id
        } else {
            self.base + self.size - 1
        }
    }
}

/// Maps uids and gids into fixed ranges.
#[derive(Debug, Clone, Copy)]
pub struct UidNamespacer {
    uids: IdRange,
    gids: IdRange,
}

impl UidNamespacer {
    /// Namespacer for the given uid and gid ranges.
    #[must_use]
    pub fn new(uids: IdRange, gids: IdRange) -> Self {
        Self { uids, gids }
    }

    /// Chowns every out-of-range entry, recording original owners in
    /// `rewritten` so the caller can undo a partial pass.
    fn rewrite(
        &self,
        tree: &Path,
        rewritten: &mut Vec<(PathBuf, u32, u32)>,
    ) -> Result<(), NamespaceError> {
        for entry in WalkDir::new(tree).follow_links(false) {
            let entry = entry.map_err(|source| NamespaceError::Walk {
                path: tree.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            let meta = fs::symlink_metadata(path).map_err(|source| NamespaceError::Io {
                op: "stat",
                path: path.to_path_buf(),
                source,
            })?;

            let (uid, gid) = (meta.uid(), meta.gid());
            let (new_uid, new_gid) = (self.uids.translate(uid), self.gids.translate(gid));
            if (uid, gid) == (new_uid, new_gid) {
                continue;
            }

            lchown(path, Some(new_uid), Some(new_gid)).map_err(|source| NamespaceError::Io {
                op: "chown",
                path: path.to_path_buf(),
                source,
            })?;
            rewritten.push((path.to_path_buf(), uid, gid));
        }
        Ok(())
    }
}

impl Namespacer for UidNamespacer {
    fn cache_key(&self) -> String {
        format!(
            "uid-v1:{}+{}:{}+{}",
            self.uids.base, self.uids.size, self.gids.base, self.gids.size
        )
    }

    fn namespace(&self, tree: &Path) -> Result<(), NamespaceError> {
        let mut rewritten = Vec::new();
        let result = self.rewrite(tree, &mut rewritten);

        if result.is_err() {
            for (path, uid, gid) in rewritten.iter().rev() {
                if let Err(e) = lchown(path, Some(*uid), Some(*gid)) {
                    warn!("Failed to restore ownership of {:?}: {}", path, e);
                }
            }
        } else {
            debug!("Namespaced {} entries under {:?}", rewritten.len(), tree);
        }

        result
    }
}

/// Remembers which trees were already namespaced under which policy.
///
/// Holds one entry per tree path: the namespacer's cache key plus a
/// fingerprint of the tree's content and ownership after the last rewrite.
/// Any change to either forces a rewrite and replaces the entry.
#[derive(Debug, Default)]
pub struct NamespaceCache {
    seen: Mutex<HashMap<PathBuf, String>>,
}

impl NamespaceCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespaces `tree` unless an identical tree was already namespaced with
    /// the same policy. Returns whether a rewrite happened.
    ///
    /// Callers must serialise calls for the same tree.
    ///
    /// # Errors
    ///
    /// Returns an error if fingerprinting or namespacing fails.
    pub fn ensure_namespaced(
        &self,
        namespacer: &dyn Namespacer,
        tree: &Path,
    ) -> Result<bool, NamespaceError> {
        let policy = namespacer.cache_key();
        let before = format!("{policy}:{}", tree_fingerprint(tree)?);
        if self.seen.lock().get(tree) == Some(&before) {
            debug!("Tree {:?} already namespaced under {}", tree, policy);
            return Ok(false);
        }

        namespacer.namespace(tree)?;

        let after = format!("{policy}:{}", tree_fingerprint(tree)?);
        self.seen.lock().insert(tree.to_path_buf(), after);

        info!("Namespaced import tree {:?} under {}", tree, policy);
        log_audit(&AuditEvent::TreeNamespaced {
            path: tree.display().to_string(),
            policy,
        });
        Ok(true)
    }

    /// Number of remembered trees.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Whether no tree has been remembered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

/// SHA-256 over every entry's relative path, type, mode, owner and content.
///
/// # Errors
///
/// Returns an error if the tree cannot be walked or a file cannot be read.
pub fn tree_fingerprint(path: &Path) -> Result<String, NamespaceError> {
    let mut hasher = Sha256::new();
    let io_err = |op: &'static str, p: &Path| {
        let p = p.to_path_buf();
        move |source| NamespaceError::Io { op, path: p, source }
    };

    for entry in WalkDir::new(path).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|source| NamespaceError::Walk {
            path: path.to_path_buf(),
            source,
        })?;
        let file_path = entry.path();
        let meta = fs::symlink_metadata(file_path).map_err(io_err("stat", file_path))?;

        let relative = file_path.strip_prefix(path).unwrap_or(file_path);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0]);
        hasher.update(meta.mode().to_le_bytes());
        hasher.update(meta.uid().to_le_bytes());
        hasher.update(meta.gid().to_le_bytes());

        if meta.file_type().is_symlink() {
            let target = fs::read_link(file_path).map_err(io_err("readlink", file_path))?;
            hasher.update(target.to_string_lossy().as_bytes());
        } else if meta.is_file() {
            let mut file = fs::File::open(file_path).map_err(io_err("open", file_path))?;
            let mut buffer = [0u8; 8192];
            loop {
                let bytes_read = file
                    .read(&mut buffer)
                    .map_err(io_err("read", file_path))?;
                if bytes_read == 0 {
                    break;
                }
                hasher.update(&buffer[..bytes_read]);
            }
        }
    }

    Ok(hex::encode(hasher.finalize()))
}
