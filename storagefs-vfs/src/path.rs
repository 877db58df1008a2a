//! Path normalization.
//!
//! Every operation first turns its path argument into a virtual path: a
//! `/`-rooted string with no trailing separator (except root itself), no
//! empty, `.` or `..` segments. Inputs come in three shapes:
//!
//! - absolute virtual paths (`/users/42`)
//! - names relative to the current directory (`report.csv`)
//! - physical paths under the configured root (`/data/media/users/42`),
//!   which some protocol handlers pass down after resolving paths themselves
//!
//! Normalization never fails. A physical path that cannot be made relative
//! to the root is treated as virtual.

use std::path::{Path, PathBuf};

pub const SEPARATOR: char = '/';
pub const ROOT: &str = "/";

/// True when the expression names a directory explicitly (`dir/`).
pub fn has_dir_marker(path: &str) -> bool {
    path.len() > 1 && path.ends_with(SEPARATOR)
}

/// Collapse an absolute path string into canonical virtual form.
/// `..` never climbs above root.
pub fn canonicalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(SEPARATOR) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        ROOT.to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathNormalizer {
    root: Option<PathBuf>,
}

impl PathNormalizer {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    /// Configured physical root, if any.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Canonical virtual path for `path`, resolving relative names against `cwd`.
    ///
    /// The input is collapsed before it is compared against the root, so
    /// `/x/../data/media/a` and `/data/media/../media/a` both land on `/a`.
    pub fn normalize(&self, path: &str, cwd: &str) -> String {
        if path.is_empty() || path == ROOT {
            return ROOT.to_string();
        }
        let mut canonical = if path.starts_with(SEPARATOR) {
            canonicalize(path)
        } else {
            let base = if cwd.is_empty() { ROOT } else { cwd };
            canonicalize(&format!(
                "{}/{}",
                base.trim_end_matches(SEPARATOR),
                path.trim_start_matches(SEPARATOR)
            ))
        };
        // Fold until nothing under the root remains, so the result is a fixed point.
        while let Some(virtual_path) = self.physical_to_virtual(&canonical) {
            canonical = virtual_path;
        }
        canonical
    }

    /// Virtual form of a canonical path under the root, or `None` when the
    /// path is not under it.
    fn physical_to_virtual(&self, canonical: &str) -> Option<String> {
        let root = canonicalize(self.root.as_deref()?.to_str()?);
        if root == ROOT {
            return None;
        }
        let relative = Path::new(canonical).strip_prefix(&root).ok()?;
        Some(canonicalize(&format!("/{}", relative.to_str()?)))
    }

    /// Physical location of a virtual path under the root.
    pub fn to_physical(&self, virtual_path: &str) -> Option<PathBuf> {
        let root = self.root.as_deref()?;
        let canonical = canonicalize(virtual_path);
        let relative = canonical.trim_start_matches(SEPARATOR);
        if relative.is_empty() {
            Some(root.to_path_buf())
        } else {
            Some(root.join(relative))
        }
    }
}
