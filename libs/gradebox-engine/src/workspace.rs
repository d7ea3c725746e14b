//! Per-request staging directory.
//!
//! A `Workspace` exclusively owns a uniquely-named child of the scratch root.
//! Dropping it removes the whole tree, so every exit path of the pipeline
//! (success, error, timeout, panic unwind) releases it.

use std::fs;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to create workspace under {root}: {source}")]
    Create {
        root: PathBuf,
        source: std::io::Error,
    },
    #[error("refusing to stage file outside the workspace: {0}")]
    EscapingPath(String),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to open permissions on {path}: {source}")]
    Permissions {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A file to materialize, path relative to the workspace root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: String,
    pub contents: String,
}

impl StagedFile {
    pub fn new(path: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl Workspace {
    /// Allocate a fresh, uniquely-named directory under `scratch_root`
    pub fn create(scratch_root: &Path) -> Result<Self, WorkspaceError> {
        let create_err = |source| WorkspaceError::Create {
            root: scratch_root.to_path_buf(),
            source,
        };
        fs::create_dir_all(scratch_root).map_err(create_err)?;
        let dir = tempfile::Builder::new()
            .prefix("gradebox-")
            .tempdir_in(scratch_root)
            .map_err(create_err)?;
        let path = dir.path().to_path_buf();
        debug!(workspace = %path.display(), "Workspace allocated");
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write every file, creating parent directories as needed
    pub fn stage(&self, files: &[StagedFile]) -> Result<(), WorkspaceError> {
        write_files(&self.path, files)
    }

    /// Open the tree to the unprivileged in-container user. Build tools
    /// write intermediate artifacts back into the mount.
    pub fn make_writable(&self) -> Result<(), WorkspaceError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            for entry in WalkDir::new(&self.path) {
                let entry = entry.map_err(|e| WorkspaceError::Permissions {
                    path: self.path.clone(),
                    source: e.into(),
                })?;
                let mode = if entry.file_type().is_dir() { 0o777 } else { 0o666 };
                fs::set_permissions(entry.path(), fs::Permissions::from_mode(mode)).map_err(
                    |source| WorkspaceError::Permissions {
                        path: entry.path().to_path_buf(),
                        source,
                    },
                )?;
            }
        }
        Ok(())
    }

    /// Remove the tree now and report failures. Drop does the same silently.
    pub fn close(mut self) -> std::io::Result<()> {
        match self.dir.take() {
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }
}

/// `relative` joined onto `root`, refusing empty, absolute and `..` paths
pub fn contained_path(root: &Path, relative: &str) -> Result<PathBuf, WorkspaceError> {
    let rel = Path::new(relative);
    let inside = !relative.is_empty()
        && rel
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !inside {
        return Err(WorkspaceError::EscapingPath(relative.to_string()));
    }
    Ok(root.join(rel))
}

/// Materialize `files` below `root`. Every path is checked before anything
/// is written.
pub fn write_files(root: &Path, files: &[StagedFile]) -> Result<(), WorkspaceError> {
    let targets = files
        .iter()
        .map(|file| contained_path(root, &file.path))
        .collect::<Result<Vec<_>, _>>()?;
    for (file, target) in files.iter().zip(targets) {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| WorkspaceError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&target, &file.contents).map_err(|source| WorkspaceError::Write {
            path: target.clone(),
            source,
        })?;
    }
    Ok(())
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                // Best effort: the container may have left files we cannot delete
                warn!(workspace = %path.display(), error = %e, "Failed to remove workspace");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(root: &Path) -> usize {
        fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn test_workspaces_are_unique_and_removed_on_drop() {
        let scratch = tempfile::tempdir().unwrap();
        let a = Workspace::create(scratch.path()).unwrap();
        let b = Workspace::create(scratch.path()).unwrap();

        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(scratch.path()));
        assert_eq!(entries(scratch.path()), 2);

        drop(a);
        drop(b);
        assert_eq!(entries(scratch.path()), 0);
    }

    #[test]
    fn test_stage_writes_nested_files() {
        let scratch = tempfile::tempdir().unwrap();
        let ws = Workspace::create(scratch.path()).unwrap();
        ws.stage(&[
            StagedFile::new("solution.py", "def f():\n    return 1\n"),
            StagedFile::new("src/test/java/SolutionTest.java", "class SolutionTest {}"),
        ])
        .unwrap();

        assert_eq!(
            fs::read_to_string(ws.path().join("solution.py")).unwrap(),
            "def f():\n    return 1\n"
        );
        assert!(ws.path().join("src/test/java/SolutionTest.java").is_file());
    }

    #[test]
    fn test_stage_rejects_escaping_paths() {
        let scratch = tempfile::tempdir().unwrap();
        let ws = Workspace::create(scratch.path()).unwrap();

        for bad in ["../evil.js", "/etc/passwd", "a/../../b", ""] {
            assert!(matches!(
                ws.stage(&[StagedFile::new(bad, "x")]),
                Err(WorkspaceError::EscapingPath(_))
            ));
        }
    }

    #[test]
    fn test_write_files_checks_every_path_first() {
        let out = tempfile::tempdir().unwrap();
        let files = [
            StagedFile::new("pom.xml", "<project/>"),
            StagedFile::new("../escape.txt", "x"),
        ];

        assert!(matches!(
            write_files(out.path(), &files),
            Err(WorkspaceError::EscapingPath(path)) if path == "../escape.txt"
        ));
        assert!(!out.path().join("pom.xml").exists());
        assert!(!out.path().parent().unwrap().join("escape.txt").exists());
        assert_eq!(
            contained_path(out.path(), "./src/Main.java").unwrap(),
            out.path().join("./src/Main.java")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_make_writable_opens_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let scratch = tempfile::tempdir().unwrap();
        let ws = Workspace::create(scratch.path()).unwrap();
        ws.stage(&[StagedFile::new("Tests/Tests.csproj", "<Project />")]).unwrap();
        ws.make_writable().unwrap();

        let dir_mode = fs::metadata(ws.path().join("Tests")).unwrap().permissions().mode();
        let file_mode = fs::metadata(ws.path().join("Tests/Tests.csproj")).unwrap().permissions().mode();
        let root_mode = fs::metadata(ws.path()).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o777);
        assert_eq!(root_mode & 0o777, 0o777);
        assert_eq!(file_mode & 0o777, 0o666);
    }

    #[test]
    fn test_close_removes_tree() {
        let scratch = tempfile::tempdir().unwrap();
        let ws = Workspace::create(scratch.path()).unwrap();
        ws.stage(&[StagedFile::new("a/b/c.txt", "x")]).unwrap();
        let path = ws.path().to_path_buf();

        ws.close().unwrap();
        assert!(!path.exists());
    }
}
