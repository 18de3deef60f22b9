//! Filesystem security policy enforcement.
//!
//! Paths handed to sandbox file operations are interpreted inside the
//! environment (always POSIX), so normalization here is purely lexical and
//! independent of the host OS. Symbolic links are resolved by the backend and
//! re-checked with [`ensure_within`].

use crate::{Error, Result};

/// Resolve `raw_path` against `root` and confine it to `root`.
///
/// Relative paths are joined onto `root`; absolute paths are taken as-is.
/// `.` and `..` are collapsed. The result must equal `root` or be nested
/// under it.
pub fn resolve(raw_path: &str, root: &str) -> Result<String> {
    if raw_path.trim().is_empty() {
        return Err(Error::invalid_request("Path must not be empty"));
    }
    if raw_path.contains('\0') {
        return Err(Error::invalid_request("Path must not contain NUL bytes"));
    }

    let root = normalize(root);
    let joined = if raw_path.starts_with('/') {
        raw_path.to_string()
    } else {
        format!("{}/{}", root, raw_path)
    };
    let resolved = normalize(&joined);

    ensure_within(&resolved, &root).map_err(|_| Error::path_escape(raw_path, root.as_str()))?;
    Ok(resolved)
}

/// Verify that an already-normalized absolute path is `root` or below it.
pub fn ensure_within(path: &str, root: &str) -> Result<()> {
    let root = normalize(root);
    let inside = if root == "/" {
        path.starts_with('/')
    } else {
        path == root
            || path
                .strip_prefix(root.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    };

    if inside {
        Ok(())
    } else {
        Err(Error::path_escape(path, root))
    }
}

/// Lexically normalize an absolute POSIX path.
///
/// `..` at the filesystem root stays at the root, as the kernel does.
fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_paths_resolve_under_root() {
        assert_eq!(resolve("notes.txt", "/workspace").unwrap(), "/workspace/notes.txt");
        assert_eq!(resolve("src/app.js", "/workspace").unwrap(), "/workspace/src/app.js");
        assert_eq!(resolve("./local.txt", "/workspace").unwrap(), "/workspace/local.txt");
        assert_eq!(resolve(".", "/workspace").unwrap(), "/workspace");
    }

    #[test]
    fn test_absolute_paths_inside_root() {
        assert_eq!(
            resolve("/workspace/sub/../notes.txt", "/workspace").unwrap(),
            "/workspace/notes.txt"
        );
        assert_eq!(resolve("/workspace", "/workspace/").unwrap(), "/workspace");
        assert_eq!(resolve("/workspace//a///b", "/workspace").unwrap(), "/workspace/a/b");
    }

    #[test]
    fn test_traversal_rejection() {
        assert!(matches!(
            resolve("../../etc/passwd", "/workspace"),
            Err(Error::PathEscape { .. })
        ));
        assert!(matches!(
            resolve("src/../../etc/passwd", "/workspace"),
            Err(Error::PathEscape { .. })
        ));
        assert!(matches!(
            resolve("/etc/passwd", "/workspace"),
            Err(Error::PathEscape { .. })
        ));
        assert!(matches!(
            resolve("/workspace/../etc", "/workspace"),
            Err(Error::PathEscape { .. })
        ));
    }

    #[test]
    fn test_sibling_prefix_is_not_inside() {
        assert!(resolve("/workspace2/file", "/workspace").is_err());
        assert!(resolve("../workspace-evil/x", "/workspace").is_err());
    }

    #[test]
    fn test_invalid_input() {
        assert!(matches!(resolve("", "/workspace"), Err(Error::InvalidRequest(_))));
        assert!(matches!(resolve("   ", "/workspace"), Err(Error::InvalidRequest(_))));
        assert!(matches!(resolve("a\0b", "/workspace"), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_ensure_within() {
        assert!(ensure_within("/workspace/a", "/workspace").is_ok());
        assert!(ensure_within("/workspace", "/workspace").is_ok());
        assert!(ensure_within("/etc/shadow", "/workspace").is_err());
        assert!(ensure_within("/anything", "/").is_ok());
    }
}
