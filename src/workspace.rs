//! File-backed workspace for generated capabilities.
//!
//! Layout under the workspace root:
//! - `capabilities/<name>.rs`: generated capability sources
//! - `capabilities/DEPENDENCIES`: one dependency per line, append-only

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::WorkspaceError;

/// Well-known workspace paths.
pub mod paths {
    pub const CAPABILITIES: &str = "capabilities";
    pub const DEPENDENCIES: &str = "capabilities/DEPENDENCIES";
}

const SOURCE_EXTENSION: &str = "rs";

/// Workspace holding generated capability sources and their dependency manifest.
pub struct CapabilityWorkspace {
    base_path: PathBuf,
}

impl CapabilityWorkspace {
    /// Create a new workspace rooted at `base_path`.
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a relative workspace path to an absolute path.
    pub fn resolve_path(&self, relative: &str) -> PathBuf {
        self.base_path.join(relative)
    }

    /// Ensure the workspace directory structure exists.
    pub async fn ensure_dirs(&self) -> Result<(), WorkspaceError> {
        fs::create_dir_all(self.resolve_path(paths::CAPABILITIES)).await?;
        Ok(())
    }

    /// Write a generated capability, replacing any previous version. Returns its path.
    pub async fn write_capability(&self, name: &str, source: &str) -> Result<PathBuf, WorkspaceError> {
        validate_name(name)?;
        self.ensure_dirs().await?;
        let path = self.resolve_path(&format!(
            "{}/{name}.{SOURCE_EXTENSION}",
            paths::CAPABILITIES
        ));
        fs::write(&path, source).await?;
        tracing::info!(capability = %name, path = %path.display(), "Wrote capability source");
        Ok(path)
    }

    /// Source of a previously written capability, or `None` if there is none by that name.
    pub async fn read_capability(&self, name: &str) -> Result<Option<String>, WorkspaceError> {
        validate_name(name)?;
        let path = self.resolve_path(&format!(
            "{}/{name}.{SOURCE_EXTENSION}",
            paths::CAPABILITIES
        ));
        match fs::read_to_string(&path).await {
            Ok(source) => Ok(Some(source)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Names of capabilities written so far, sorted.
    pub async fn list_capabilities(&self) -> Result<Vec<String>, WorkspaceError> {
        let dir = self.resolve_path(paths::CAPABILITIES);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        let mut read_dir = fs::read_dir(&dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(SOURCE_EXTENSION)
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Dependencies currently recorded in the manifest.
    pub async fn dependencies(&self) -> Result<Vec<String>, WorkspaceError> {
        let path = self.resolve_path(paths::DEPENDENCIES);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).await?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Append dependencies not already in the manifest. Returns the ones added.
    pub async fn append_dependencies(&self, deps: &[String]) -> Result<Vec<String>, WorkspaceError> {
        let existing = self.dependencies().await?;
        let mut added: Vec<String> = Vec::new();
        for dep in deps.iter().map(|d| d.trim()).filter(|d| !d.is_empty()) {
            if !existing.iter().any(|e| e == dep) && !added.iter().any(|a| a == dep) {
                added.push(dep.to_string());
            }
        }
        if added.is_empty() {
            return Ok(added);
        }

        self.ensure_dirs().await?;
        let mut content = existing.join("\n");
        for dep in &added {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(dep);
        }
        content.push('\n');
        fs::write(self.resolve_path(paths::DEPENDENCIES), content).await?;
        tracing::info!(count = added.len(), "Updated dependency manifest");
        Ok(added)
    }
}

/// Capability names become file stems, so only `[a-z0-9_]` starting with a letter is accepted.
fn validate_name(name: &str) -> Result<(), WorkspaceError> {
    let valid = name.chars().next().is_some_and(|c| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(WorkspaceError::InvalidName(name.to_string()))
    }
}
