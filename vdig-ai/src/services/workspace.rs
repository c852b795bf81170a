//! Workspace name resolution
//!
//! A workspace is a named storage area. The engine only records the name and
//! asks the resolver for a directory when a task needs to read or write files.

use std::path::{Path, PathBuf};

/// Maps workspace names to existing directories
pub trait WorkspaceResolver: Send + Sync {
    /// Directory of an existing workspace, `None` if unknown
    fn resolve(&self, name: &str) -> Option<PathBuf>;

    fn exists(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Workspace names currently present, sorted
    fn list(&self) -> std::io::Result<Vec<String>>;
}

/// Workspaces are the sub-directories of one root folder
#[derive(Debug, Clone)]
pub struct DirectoryWorkspaces {
    root: PathBuf,
}

impl DirectoryWorkspaces {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains("..")
}

impl WorkspaceResolver for DirectoryWorkspaces {
    fn resolve(&self, name: &str) -> Option<PathBuf> {
        if !is_plain_name(name) {
            return None;
        }
        let dir = self.root.join(name);
        dir.is_dir().then_some(dir)
    }

    fn list(&self) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if !name.starts_with('.') {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
