// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Workspace confinement.
//!
//! Every path a job or file command touches is resolved (symlinks and `..`
//! included) and must stay under the canonical workspace root.

use std::path::{Component, Path, PathBuf};

use tether_core::TetherError;

/// A canonicalized workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRoot {
    root: PathBuf,
}

impl WorkspaceRoot {
    /// Canonicalize `root`. Fails if it does not exist or is not a directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, TetherError> {
        let root = root.as_ref();
        let canonical = std::fs::canonicalize(root).map_err(|e| {
            TetherError::Config(format!("workspace root {}: {e}", root.display()))
        })?;
        if !canonical.is_dir() {
            return Err(TetherError::Config(format!(
                "workspace root {} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root: canonical })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve an operator-supplied relative path inside the workspace.
    ///
    /// Absolute paths are refused. The target need not exist; its deepest
    /// existing ancestor is canonicalized so symlinks cannot escape.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, TetherError> {
        let raw = raw.trim();
        let candidate = Path::new(raw);
        if candidate.is_absolute() {
            return Err(TetherError::WorkspaceViolation {
                path: raw.to_string(),
            });
        }
        let resolved = resolve_lenient(&self.root.join(candidate));
        if self.contains(&resolved) {
            Ok(resolved)
        } else {
            Err(TetherError::WorkspaceViolation {
                path: raw.to_string(),
            })
        }
    }

    /// Check an already-absolute directory, such as a job working directory.
    pub fn confine(&self, dir: &Path) -> Result<PathBuf, TetherError> {
        let resolved = resolve_lenient(dir);
        if self.contains(&resolved) {
            Ok(resolved)
        } else {
            Err(TetherError::WorkspaceViolation {
                path: dir.display().to_string(),
            })
        }
    }

    pub fn contains(&self, resolved: &Path) -> bool {
        resolved.starts_with(&self.root)
    }

    /// Display form relative to the root, `.` for the root itself.
    pub fn relative(&self, resolved: &Path) -> String {
        match resolved.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => resolved.display().to_string(),
        }
    }
}

/// Canonicalize the longest existing prefix of `path` and append the rest
/// after lexical `.`/`..` normalization.
fn resolve_lenient(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }

    let normalized = normalize_lexically(path);
    let mut existing = normalized.as_path();
    let mut tail = Vec::new();
    loop {
        if let Ok(base) = std::fs::canonicalize(existing) {
            let mut out = base;
            for part in tail.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => return normalized,
        }
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
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
