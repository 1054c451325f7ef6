//! File capabilities sandboxed to an allowed directory.
//!
//! Every path is resolved against the sandbox root and rejected if it
//! escapes it, including escapes through not-yet-existing parents.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::capabilities::capability::{
    Arguments, Capability, CapabilityContext, CapabilityOutput, ParamType, ParameterSchema,
    require_str,
};
use crate::error::CapabilityError;

/// Maximum file size for reading (1MB).
const MAX_READ_SIZE: u64 = 1024 * 1024;

/// Maximum file size for writing (5MB).
const MAX_WRITE_SIZE: usize = 5 * 1024 * 1024;

/// Resolve `.` and `..` without touching the filesystem.
fn normalize_lexical(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if components
                    .last()
                    .is_some_and(|c| matches!(c, Component::Normal(_)))
                {
                    components.pop();
                }
            }
            Component::CurDir => {}
            other => components.push(other),
        }
    }
    components.iter().collect()
}

/// Canonicalize the nearest existing ancestor and re-append the missing tail.
fn resolve_through_ancestors(path: &Path) -> PathBuf {
    let mut ancestor = path;
    let mut tail = Vec::new();
    loop {
        if ancestor.exists() {
            let mut result = ancestor
                .canonicalize()
                .unwrap_or_else(|_| ancestor.to_path_buf());
            for part in tail.into_iter().rev() {
                result.push(part);
            }
            return result;
        }
        if let Some(name) = ancestor.file_name() {
            tail.push(name);
        }
        match ancestor.parent() {
            Some(parent) if parent != ancestor => ancestor = parent,
            _ => return path.to_path_buf(),
        }
    }
}

fn validate_path(capability: &str, path_str: &str, root: &Path) -> Result<PathBuf, CapabilityError> {
    let requested = PathBuf::from(path_str);
    let joined = if requested.is_absolute() {
        requested
    } else {
        root.join(requested)
    };
    let resolved = resolve_through_ancestors(&normalize_lexical(&joined));
    let root = root
        .canonicalize()
        .unwrap_or_else(|_| normalize_lexical(root));

    if !resolved.starts_with(&root) {
        return Err(CapabilityError::NotAuthorized {
            name: capability.to_string(),
            reason: format!("path is outside the allowed directory: {path_str}"),
        });
    }
    Ok(resolved)
}

fn io_failed(capability: &str, what: &str, e: std::io::Error) -> CapabilityError {
    CapabilityError::ExecutionFailed {
        name: capability.to_string(),
        reason: format!("{what}: {e}"),
    }
}

// ── ReadFile ────────────────────────────────────────────────────────

/// Read a file inside the allowed directory.
#[derive(Debug)]
pub struct ReadFile {
    root: PathBuf,
}

impl ReadFile {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Capability for ReadFile {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file in the allowed directory."
    }

    fn tags(&self) -> &[&str] {
        &["triage"]
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new().required("path", ParamType::String, "Path to the file to read")
    }

    async fn invoke(
        &self,
        args: Arguments,
        _ctx: &CapabilityContext,
    ) -> Result<CapabilityOutput, CapabilityError> {
        let path_str = require_str(self.name(), &args, "path")?;
        let path = validate_path(self.name(), path_str, &self.root)?;

        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| io_failed(self.name(), "cannot access file", e))?;
        if metadata.len() > MAX_READ_SIZE {
            return Err(CapabilityError::ExecutionFailed {
                name: self.name().to_string(),
                reason: format!(
                    "file too large ({} bytes, maximum {MAX_READ_SIZE})",
                    metadata.len()
                ),
            });
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| io_failed(self.name(), "failed to read file", e))?;
        Ok(CapabilityOutput::Text(content))
    }
}

// ── WriteFile ───────────────────────────────────────────────────────

/// Create a new file inside the allowed directory. Existing files are left alone.
#[derive(Debug)]
pub struct WriteFile {
    root: PathBuf,
}

impl WriteFile {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Capability for WriteFile {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create a NEW file in the allowed directory, only when the user explicitly asks for one."
    }

    fn tags(&self) -> &[&str] {
        &["triage"]
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("path", ParamType::String, "Path of the file to create")
            .optional("content", ParamType::String, "Initial file content")
    }

    async fn invoke(
        &self,
        args: Arguments,
        _ctx: &CapabilityContext,
    ) -> Result<CapabilityOutput, CapabilityError> {
        let path_str = require_str(self.name(), &args, "path")?;
        let content = args.get("content").and_then(|v| v.as_str()).unwrap_or("");
        if content.len() > MAX_WRITE_SIZE {
            return Err(CapabilityError::ExecutionFailed {
                name: self.name().to_string(),
                reason: format!("content too large ({} bytes)", content.len()),
            });
        }

        let path = validate_path(self.name(), path_str, &self.root)?;
        if fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(CapabilityOutput::text(format!(
                "File already exists: {}",
                path.display()
            )));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failed(self.name(), "failed to create directories", e))?;
        }
        fs::write(&path, content)
            .await
            .map_err(|e| io_failed(self.name(), "failed to write file", e))?;

        tracing::info!(path = %path.display(), bytes = content.len(), "Created file");
        Ok(CapabilityOutput::Structured(serde_json::json!({
            "path": path.display().to_string(),
            "bytes_written": content.len(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> Arguments {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::from(*v)))
            .collect()
    }

    fn ctx() -> CapabilityContext {
        CapabilityContext::new("t", Default::default())
    }

    #[tokio::test]
    async fn write_then_read_inside_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let write = WriteFile::new(dir.path().to_path_buf());
        let read = ReadFile::new(dir.path().to_path_buf());

        write
            .invoke(args(&[("path", "notes/a.txt"), ("content", "hello")]), &ctx())
            .await
            .unwrap();
        let output = read.invoke(args(&[("path", "notes/a.txt")]), &ctx()).await.unwrap();
        assert_eq!(output.render().unwrap(), "hello");
    }

    #[tokio::test]
    async fn write_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "original").unwrap();
        let write = WriteFile::new(dir.path().to_path_buf());

        let output = write
            .invoke(args(&[("path", "a.txt"), ("content", "new")]), &ctx())
            .await
            .unwrap();
        assert!(output.render().unwrap().starts_with("File already exists"));
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "original");
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let read = ReadFile::new(dir.path().to_path_buf());
        let err = read
            .invoke(args(&[("path", "../../etc/passwd")]), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::NotAuthorized { .. }));

        let write = WriteFile::new(dir.path().to_path_buf());
        let err = write
            .invoke(args(&[("path", "missing/../../../escape.txt")]), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::NotAuthorized { .. }));
    }

    #[tokio::test]
    async fn absolute_path_outside_sandbox_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let read = ReadFile::new(dir.path().to_path_buf());
        let err = read
            .invoke(args(&[("path", "/etc/hostname")]), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::NotAuthorized { .. }));
    }
}
