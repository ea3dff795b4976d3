use std::path::Path;

use crate::error::{RedirectError, RedirectResult};

/// Create `link` pointing at `target`, creating the parent of `link` first.
pub fn create(link: &Path, target: &Path) -> RedirectResult<()> {
    if let Some(parent) = link.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| RedirectError::io(format!("Failed to create {}", parent.display()), e))?;
    }
    platform_symlink(target, link).map_err(|e| {
        RedirectError::io(
            format!("Failed to link {} -> {}", link.display(), target.display()),
            e,
        )
    })
}

/// Remove the symlink itself, never what it points at.
pub fn remove(link: &Path) -> RedirectResult<()> {
    platform_unlink(link)
        .map_err(|e| RedirectError::io(format!("Failed to remove {}", link.display()), e))
}

#[cfg(unix)]
fn platform_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn platform_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

#[cfg(not(any(unix, windows)))]
fn platform_symlink(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "symlinks are not supported"))
}

#[cfg(windows)]
fn platform_unlink(link: &Path) -> std::io::Result<()> {
    // Directory symlinks are removed with RemoveDirectory.
    std::fs::remove_dir(link).or_else(|_| std::fs::remove_file(link))
}

#[cfg(not(windows))]
fn platform_unlink(link: &Path) -> std::io::Result<()> {
    std::fs::remove_file(link)
}
