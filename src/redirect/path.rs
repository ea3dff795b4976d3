use std::path::{Component, Path, PathBuf};

use crate::error::{RedirectError, RedirectResult};

/// Resolve `path` the way the kernel would, without requiring it to exist.
///
/// The longest existing prefix is canonicalized (following symlinks in it);
/// the remaining components are applied lexically.
pub fn resolve_lenient(path: &Path) -> PathBuf {
    let components: Vec<Component<'_>> = path.components().collect();

    for split in (1..=components.len()).rev() {
        let prefix: PathBuf = components[..split].iter().collect();
        if let Ok(mut resolved) = std::fs::canonicalize(&prefix) {
            push_lexically(&mut resolved, &components[split..]);
            return resolved;
        }
    }

    let mut resolved = PathBuf::new();
    push_lexically(&mut resolved, &components);
    resolved
}

fn push_lexically(base: &mut PathBuf, components: &[Component<'_>]) {
    for component in components {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                base.pop();
            }
            other => base.push(other.as_os_str()),
        }
    }
}

/// Like [`resolve_lenient`], but a final symlink is not followed: the
/// redirected path itself is commonly a symlink to its scratch target.
fn resolve_parent_lenient(path: &Path) -> PathBuf {
    match (path.parent(), path.components().next_back()) {
        (Some(parent), Some(Component::Normal(name))) => resolve_lenient(parent).join(name),
        _ => resolve_lenient(path),
    }
}

/// Turn a user-supplied path into a clean repo-relative path.
///
/// Absolute paths must resolve to a location inside the checkout. Relative
/// paths are taken relative to the checkout root and must already be in
/// canonical form: `..` segments and symlinked parent directories are
/// rejected rather than silently rewritten.
pub fn resolve_repo_relative_path(
    checkout_root: &Path,
    user_path: &Path,
) -> RedirectResult<PathBuf> {
    let repo_rel = if user_path.is_absolute() {
        let resolved = resolve_parent_lenient(user_path);
        resolved.strip_prefix(checkout_root).map(Path::to_path_buf).map_err(|_| {
            RedirectError::PathValidation(format!(
                "The redirection path `{}` doesn't resolve to a path inside the repo `{}`",
                user_path.display(),
                checkout_root.display()
            ))
        })?
    } else {
        let resolved = resolve_parent_lenient(&checkout_root.join(user_path));
        let canonical_rel = resolved.strip_prefix(checkout_root).map_err(|_| {
            RedirectError::PathValidation(format!(
                "The redirection path `{}` doesn't resolve to a path inside the repo `{}`",
                user_path.display(),
                checkout_root.display()
            ))
        })?;

        let requested: PathBuf =
            user_path.components().filter(|c| !matches!(c, Component::CurDir)).collect();
        if canonical_rel != requested {
            return Err(RedirectError::PathValidation(format!(
                "The redirection path `{}` doesn't resolve to a canonical path within the repo. \
                 Specify the canonical path `{}` instead",
                user_path.display(),
                canonical_rel.display()
            )));
        }
        requested
    };

    if repo_rel.as_os_str().is_empty() {
        return Err(RedirectError::PathValidation(
            "The checkout root itself cannot be redirected".to_string(),
        ));
    }

    Ok(repo_rel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn checkout() -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(tmp.path()).unwrap();
        (tmp, root)
    }

    #[test]
    fn test_resolve_lenient_missing_tail() {
        let (_tmp, root) = checkout();
        std::fs::create_dir(root.join("a")).unwrap();
        assert_eq!(resolve_lenient(&root.join("a/b/../c/./d")), root.join("a/c/d"));
    }

    #[test]
    fn test_relative_path_accepted() {
        let (_tmp, root) = checkout();
        let rel = resolve_repo_relative_path(&root, Path::new("buck-out")).unwrap();
        assert_eq!(rel, PathBuf::from("buck-out"));

        let rel = resolve_repo_relative_path(&root, Path::new("./tools/out")).unwrap();
        assert_eq!(rel, PathBuf::from("tools/out"));
    }

    #[test]
    fn test_absolute_path_inside_checkout() {
        let (_tmp, root) = checkout();
        let rel = resolve_repo_relative_path(&root, &root.join("a/b")).unwrap();
        assert_eq!(rel, PathBuf::from("a/b"));
    }

    #[test]
    fn test_absolute_path_outside_checkout() {
        let (_tmp, root) = checkout();
        let other = tempfile::tempdir().unwrap();
        let err = resolve_repo_relative_path(&root, &other.path().join("x")).unwrap_err();
        assert!(err.to_string().contains("doesn't resolve to a path inside the repo"));
    }

    #[test]
    fn test_dotdot_is_rejected() {
        let (_tmp, root) = checkout();
        let err = resolve_repo_relative_path(&root, Path::new("a/../b")).unwrap_err();
        assert!(err.to_string().contains("Specify the canonical path `b` instead"));

        let err = resolve_repo_relative_path(&root, Path::new("../escape")).unwrap_err();
        assert!(matches!(err, RedirectError::PathValidation(_)));
    }

    #[test]
    fn test_checkout_root_is_rejected() {
        let (_tmp, root) = checkout();
        assert!(resolve_repo_relative_path(&root, &root).is_err());
        assert!(resolve_repo_relative_path(&root, Path::new(".")).is_err());
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinked_parent_is_rejected() {
        let (_tmp, root) = checkout();
        std::fs::create_dir(root.join("real")).unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("link")).unwrap();

        let err = resolve_repo_relative_path(&root, Path::new("link/out")).unwrap_err();
        assert!(err.to_string().contains("`real/out`"));
    }

    #[test]
    #[cfg(unix)]
    fn test_final_symlink_is_not_followed() {
        let (_tmp, root) = checkout();
        let scratch = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(scratch.path(), root.join("out")).unwrap();

        let rel = resolve_repo_relative_path(&root, Path::new("out")).unwrap();
        assert_eq!(rel, PathBuf::from("out"));
    }

    proptest! {
        #[test]
        fn plain_relative_paths_are_unchanged(
            segments in prop::collection::vec("[a-z][a-z0-9_-]{0,7}", 1..5)
        ) {
            let (_tmp, root) = checkout();
            let user_path: PathBuf = segments.iter().collect();
            let rel = resolve_repo_relative_path(&root, &user_path).unwrap();
            prop_assert_eq!(rel, user_path);
        }

        #[test]
        fn any_parent_segment_is_rejected(
            before in prop::collection::vec("[a-z]{1,6}", 0..3),
            after in prop::collection::vec("[a-z]{1,6}", 1..3),
        ) {
            let (_tmp, root) = checkout();
            let mut user_path: PathBuf = before.iter().collect();
            user_path.push("..");
            user_path.extend(after.iter());
            prop_assert!(resolve_repo_relative_path(&root, &user_path).is_err());
        }
    }
}
