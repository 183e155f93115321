//! Root-relative path conversion for manifest persistence.
//!
//! Conversions are segment-aware: paths are lexically normalized (`.` dropped,
//! `..` folded) before any prefix comparison, so sibling directories that
//! share a textual prefix (`/a/proj` vs `/a/project`) never alias each other.
//! No filesystem access happens here; these functions are pure.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Errors from path relativization.
#[derive(Error, Debug)]
pub enum PathError {
    #[error("path {path} is not under root {root}")]
    NotUnderRoot { root: PathBuf, path: PathBuf },

    #[error("invalid path {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

impl PathError {
    fn invalid(path: &Path, reason: impl Into<String>) -> Self {
        PathError::Invalid {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Lexically normalize an absolute path: drop `.` components and fold `..`
/// into their parent. Fails if the path is not absolute, is empty, or if `..`
/// would climb above the filesystem root.
pub fn normalize(path: &Path) -> Result<PathBuf, PathError> {
    if path.as_os_str().is_empty() {
        return Err(PathError::invalid(path, "empty path"));
    }
    if !path.is_absolute() {
        return Err(PathError::invalid(path, "expected an absolute path"));
    }

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                // Popping the root itself would escape the filesystem
                if !pop_normal(&mut out) {
                    return Err(PathError::invalid(path, "'..' escapes the filesystem root"));
                }
            }
            Component::Normal(segment) => out.push(segment),
        }
    }
    Ok(out)
}

/// Pop the last component only if it is a normal segment.
fn pop_normal(path: &mut PathBuf) -> bool {
    match path.components().next_back() {
        Some(Component::Normal(_)) => path.pop(),
        _ => false,
    }
}

/// Convert an absolute path into a path relative to `root`.
///
/// Both inputs are normalized first. A path that is not strictly under `root`
/// (including the root itself) fails with [`PathError::NotUnderRoot`].
pub fn to_relative(root: &Path, absolute: &Path) -> Result<PathBuf, PathError> {
    let root = normalize(root)?;
    let absolute = normalize(absolute)?;

    let relative = absolute
        .strip_prefix(&root)
        .map_err(|_| PathError::NotUnderRoot {
            root: root.clone(),
            path: absolute.clone(),
        })?;

    if relative.as_os_str().is_empty() {
        return Err(PathError::NotUnderRoot {
            root,
            path: absolute.clone(),
        });
    }
    Ok(relative.to_path_buf())
}

/// Rejoin a root-relative path produced by [`to_relative`] to its root.
///
/// Rejects absolute "relative" inputs and any `..` traversal that would land
/// outside `root`.
pub fn to_absolute(root: &Path, relative: &Path) -> Result<PathBuf, PathError> {
    let root = normalize(root)?;
    if relative.as_os_str().is_empty() {
        return Err(PathError::invalid(relative, "empty path"));
    }
    if relative.is_absolute() {
        return Err(PathError::invalid(relative, "expected a root-relative path"));
    }

    let joined = normalize(&root.join(relative))?;
    if !joined.starts_with(&root) {
        return Err(PathError::NotUnderRoot { root, path: joined });
    }
    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_under_root() {
        let root = Path::new("/proj");
        let path = Path::new("/proj/config/in.json");

        let relative = to_relative(root, path).unwrap();
        assert_eq!(relative, Path::new("config/in.json"));

        let back = to_absolute(root, &relative).unwrap();
        assert_eq!(back, normalize(path).unwrap());
    }

    #[test]
    fn round_trip_normalizes_dot_segments() {
        let root = Path::new("/proj");
        let path = Path::new("/proj/./config/../config/in.json");

        let relative = to_relative(root, path).unwrap();
        assert_eq!(relative, Path::new("config/in.json"));
        assert_eq!(
            to_absolute(root, &relative).unwrap(),
            Path::new("/proj/config/in.json")
        );
    }

    #[test]
    fn path_outside_root_is_rejected() {
        let err = to_relative(Path::new("/a/b"), Path::new("/c/d.txt")).unwrap_err();
        assert!(matches!(err, PathError::NotUnderRoot { .. }));
    }

    #[test]
    fn sibling_directory_sharing_a_prefix_is_not_under_root() {
        // A character-prefix strip would wrongly accept this
        let err = to_relative(Path::new("/a/proj"), Path::new("/a/project/in.json")).unwrap_err();
        assert!(matches!(err, PathError::NotUnderRoot { .. }));
    }

    #[test]
    fn root_itself_is_not_under_root() {
        let err = to_relative(Path::new("/proj"), Path::new("/proj")).unwrap_err();
        assert!(matches!(err, PathError::NotUnderRoot { .. }));
    }

    #[test]
    fn relative_input_where_absolute_required_is_invalid() {
        let err = to_relative(Path::new("/proj"), Path::new("config/in.json")).unwrap_err();
        assert!(matches!(err, PathError::Invalid { .. }));

        let err = normalize(Path::new("")).unwrap_err();
        assert!(matches!(err, PathError::Invalid { .. }));
    }

    #[test]
    fn to_absolute_rejects_absolute_relative_path() {
        let err = to_absolute(Path::new("/proj"), Path::new("/etc/passwd")).unwrap_err();
        assert!(matches!(err, PathError::Invalid { .. }));
    }

    #[test]
    fn to_absolute_rejects_traversal_above_root() {
        let err = to_absolute(Path::new("/proj"), Path::new("../other/in.json")).unwrap_err();
        assert!(matches!(err, PathError::NotUnderRoot { .. }));
    }

    #[test]
    fn parent_escaping_filesystem_root_is_invalid() {
        let err = normalize(Path::new("/../up.json")).unwrap_err();
        assert!(matches!(err, PathError::Invalid { .. }));
    }
}
