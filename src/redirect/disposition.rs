use std::io;
use std::path::Path;

use crate::error::{RedirectError, RedirectResult};
use crate::mtab::MountTable;

/// What currently occupies a path inside the checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoPathDisposition {
    DoesNotExist,
    IsSymlink,
    IsBindMount,
    IsEmptyDirectory,
    IsNonEmptyDirectory,
    IsFile,
}

impl RepoPathDisposition {
    /// Classify `path` without modifying anything.
    ///
    /// A dangling symlink is reported as `IsSymlink`, not `DoesNotExist`.
    pub fn analyze(path: &Path, mount_table: &dyn MountTable) -> RedirectResult<Self> {
        let metadata = match std::fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::DoesNotExist),
            Err(e) => {
                return Err(RedirectError::io(format!("Failed to stat {}", path.display()), e));
            }
        };

        if metadata.file_type().is_symlink() {
            return Ok(Self::IsSymlink);
        }

        if metadata.is_dir() {
            if is_bind_mount(path, mount_table) {
                return Ok(Self::IsBindMount);
            }
            return if is_empty_dir(path)? {
                Ok(Self::IsEmptyDirectory)
            } else {
                Ok(Self::IsNonEmptyDirectory)
            };
        }

        Ok(Self::IsFile)
    }
}

/// Detect the common form of a bind mount in the checkout: the parent
/// directory has a different device number than the mount point.
///
/// This cannot see a bind mount of one part of the checkout onto another, and
/// it cannot tell a bind mount from any other filesystem mounted at `path`.
pub fn is_bind_mount(path: &Path, mount_table: &dyn MountTable) -> bool {
    let Some(parent) = path.parent() else {
        return false;
    };
    match (mount_table.lstat(parent), mount_table.lstat(path)) {
        (Ok(parent_stat), Ok(stat)) => parent_stat.dev != stat.dev,
        _ => false,
    }
}

fn is_empty_dir(path: &Path) -> RedirectResult<bool> {
    let mut entries = std::fs::read_dir(path)
        .map_err(|e| RedirectError::io(format!("Failed to list {}", path.display()), e))?;
    Ok(entries.next().is_none())
}
