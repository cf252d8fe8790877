//! Path canonicalization that tolerates targets which do not exist yet.
//!
//! `Path::canonicalize` fails for a file that is about to be created, so the longest
//! existing ancestor is canonicalized (resolving symlinks) and the remaining
//! components are applied lexically.

use std::path::{Component, Path, PathBuf};

/// Apply `.` and `..` components without touching the filesystem.
///
/// `..` at the root stays at the root.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let at_root = matches!(
                    out.components().next_back(),
                    None | Some(Component::RootDir) | Some(Component::Prefix(_))
                );
                if !at_root {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize `path`, resolving symlinks in every existing prefix.
pub fn resolve_lenient(path: &Path) -> PathBuf {
    for ancestor in path.ancestors() {
        if ancestor.as_os_str().is_empty() {
            break;
        }
        let Ok(canonical) = ancestor.canonicalize() else {
            continue;
        };
        let rest = path.strip_prefix(ancestor).unwrap_or_else(|_| Path::new(""));
        if rest.as_os_str().is_empty() {
            return canonical;
        }

        let joined = normalize_lexically(&canonical.join(rest));
        // `missing/../existing_link` can land on an existing symlink again
        let has_parent_hops = rest.components().any(|c| c == Component::ParentDir);
        if has_parent_hops {
            if let Ok(again) = joined.canonicalize() {
                return again;
            }
        }
        return joined;
    }
    normalize_lexically(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(
            normalize_lexically(Path::new("/ws/src/../secrets.txt")),
            PathBuf::from("/ws/secrets.txt")
        );
        assert_eq!(
            normalize_lexically(Path::new("/../../etc")),
            PathBuf::from("/etc")
        );
        assert_eq!(
            normalize_lexically(Path::new("/ws/./a/b/..")),
            PathBuf::from("/ws/a")
        );
    }

    #[test]
    fn test_resolve_missing_file_under_existing_dir() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::create_dir(root.join("src")).unwrap();

        let resolved = resolve_lenient(&dir.path().join("src/new/module.py"));
        assert_eq!(resolved, root.join("src/new/module.py"));
    }

    #[test]
    fn test_resolve_parent_hops_past_missing_component() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();

        let resolved = resolve_lenient(&dir.path().join("missing/../../escape.txt"));
        let expected = root.parent().unwrap().join("escape.txt");
        assert_eq!(resolved, expected);
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_follows_symlinks() {
        let outside = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let resolved = resolve_lenient(&dir.path().join("link/file.txt"));
        assert_eq!(
            resolved,
            outside.path().canonicalize().unwrap().join("file.txt")
        );
    }
}
