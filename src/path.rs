//! Parent-path arithmetic for the per-owner hierarchy.
//!
//! Every node stores the path of the directory that contains it plus its own
//! name. The root directory is the only node without a parent: its path is
//! [`NO_PARENT`] and its name is [`ROOT_NAME`]. Nodes directly under the root
//! carry the path `/`.
//!
//! ```text
//! node          stored (path, name)     children carry path
//! root          ("", "/")               "/"
//! /docs         ("/", "docs")           "/docs"
//! /docs/a       ("/docs", "a")          "/docs/a"
//! ```

use crate::error::{DriveError, Result};

/// Name of every owner's root directory.
pub const ROOT_NAME: &str = "/";

/// Stored path of the root directory ("no parent").
pub const NO_PARENT: &str = "";

/// Path carried by nodes that live directly under the root.
pub const ROOT_PATH: &str = "/";

const SEPARATOR: char = '/';

/// Canonicalises a client-supplied directory path.
///
/// Accepts `/`, `/a`, `/a/b/`, `//a//b` and returns `/`, `/a`, `/a/b`,
/// `/a/b`. The empty string is kept as [`NO_PARENT`] so the root itself can
/// be addressed. Relative paths and `.`/`..` segments are rejected.
pub fn normalize(path: &str) -> Result<String> {
    if path.is_empty() {
        return Ok(NO_PARENT.to_string());
    }
    if !path.starts_with(SEPARATOR) {
        return Err(DriveError::InvalidPath(format!("{path} is not absolute")));
    }

    let mut out = String::with_capacity(path.len());
    for segment in path.split(SEPARATOR).filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." {
            return Err(DriveError::InvalidPath(format!(
                "{path} contains a relative segment"
            )));
        }
        out.push(SEPARATOR);
        out.push_str(segment);
    }

    if out.is_empty() {
        out.push_str(ROOT_PATH);
    }
    Ok(out)
}

/// Checks a single node name (not a path).
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(SEPARATOR) {
        return Err(DriveError::InvalidPath(format!("invalid name {name:?}")));
    }
    Ok(())
}

/// Returns the stored `(path, name)` of the directory whose children carry
/// `path`, or `None` for [`NO_PARENT`] (the root has no parent).
///
/// `path` must already be normalised.
pub fn parent_of(path: &str) -> Option<(String, String)> {
    if path == NO_PARENT {
        return None;
    }
    if path == ROOT_PATH {
        return Some((NO_PARENT.to_string(), ROOT_NAME.to_string()));
    }

    // Normalised, so there is a leading separator and no trailing one.
    let idx = path.rfind(SEPARATOR)?;
    let name = &path[idx + 1..];
    let parent = if idx == 0 { ROOT_PATH } else { &path[..idx] };
    Some((parent.to_string(), name.to_string()))
}

/// The path carried by children of the directory stored as `(path, name)`.
///
/// This is also the directory's display form in listings.
pub fn child_path(path: &str, name: &str) -> String {
    match path {
        NO_PARENT => ROOT_PATH.to_string(),
        ROOT_PATH => format!("{ROOT_PATH}{name}"),
        _ => format!("{path}{SEPARATOR}{name}"),
    }
}

/// True when `path` equals `ancestor` or lies somewhere beneath it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor == ROOT_PATH {
        return path.starts_with(SEPARATOR);
    }
    path == ancestor
        || (path.starts_with(ancestor) && path[ancestor.len()..].starts_with(SEPARATOR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("///").unwrap(), "/");
        assert_eq!(normalize("/docs/").unwrap(), "/docs");
        assert_eq!(normalize("//a//b").unwrap(), "/a/b");
        assert_eq!(normalize("").unwrap(), NO_PARENT);
        assert!(normalize("docs").is_err());
        assert!(normalize("/a/../b").is_err());
        assert!(normalize("/a/./b").is_err());
    }

    #[test]
    fn test_parent_of_root_boundary() {
        // The root is its own terminal ancestor.
        assert_eq!(parent_of(NO_PARENT), None);
        // Nodes directly under the root bump the root's own row.
        assert_eq!(
            parent_of("/"),
            Some((NO_PARENT.to_string(), ROOT_NAME.to_string()))
        );
        assert_eq!(
            parent_of("/docs"),
            Some(("/".to_string(), "docs".to_string()))
        );
        assert_eq!(
            parent_of("/a/b/c"),
            Some(("/a/b".to_string(), "c".to_string()))
        );
    }

    #[test]
    fn test_child_path_inverts_parent_of() {
        for path in ["/", "/docs", "/a/b/c"] {
            let (parent, name) = parent_of(path).unwrap();
            assert_eq!(child_path(&parent, &name), path);
        }
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("notes.txt").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("/docs", "/docs"));
        assert!(is_within("/docs/a", "/docs"));
        assert!(!is_within("/docsx", "/docs"));
        assert!(!is_within("/papers", "/docs"));
        assert!(is_within("/anything", "/"));
    }
}
