//! File-addressed artifact container.
//!
//! A [`Workspace`] maps relative file names to text content and can optionally
//! be bound to a directory, in which case every injection writes through to
//! disk. [`SharedWorkspace`] is the aliasing handle used when several sub-tasks
//! co-write one artifact tree.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::WorkspaceError;

/// Relative file name -> file content.
pub type FileMap = BTreeMap<String, String>;

/// Mutable, file-addressed artifact container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    files: FileMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    root: Option<PathBuf>,
}

/// Point-in-time copy of a workspace's files.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceSnapshot(FileMap);

impl WorkspaceSnapshot {
    pub fn files(&self) -> &FileMap {
        &self.0
    }
}

impl Workspace {
    /// Creates an empty in-memory workspace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty workspace projected onto `root`.
    ///
    /// The directory is created lazily on the first injection.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            files: FileMap::new(),
            root: Some(root.into()),
        }
    }

    /// Directory this workspace writes through to, if any.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Injects a batch of named files, overwriting existing entries.
    ///
    /// All names are validated before anything is written, so an invalid name
    /// leaves the workspace untouched.
    pub fn inject_files(&mut self, files: &FileMap) -> Result<(), WorkspaceError> {
        for name in files.keys() {
            validate_relative(name)?;
        }
        for (name, content) in files {
            if let Some(root) = &self.root {
                write_file(root, name, content)?;
            }
            self.files.insert(name.clone(), content.clone());
        }
        debug!(count = files.len(), "Injected files into workspace");
        Ok(())
    }

    /// Seeds the workspace with every UTF-8 file found under `dir`.
    ///
    /// Returns the number of files injected. Non-UTF-8 files are skipped.
    pub fn inject_from_dir(&mut self, dir: &Path) -> Result<usize, WorkspaceError> {
        let mut seeded = FileMap::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(dir)
                .map_err(|e| WorkspaceError::InvalidPath {
                    path: entry.path().display().to_string(),
                    reason: e.to_string(),
                })?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            match fs::read_to_string(entry.path()) {
                Ok(content) => {
                    seeded.insert(name, content);
                }
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    debug!(file = %name, "Skipping non-UTF-8 template file");
                }
                Err(e) => return Err(e.into()),
            }
        }
        let count = seeded.len();
        self.inject_files(&seeded)?;
        Ok(count)
    }

    /// Returns the content of `name`.
    pub fn get_file(&self, name: &str) -> Result<&str, WorkspaceError> {
        self.files
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| WorkspaceError::NotFound(name.to_string()))
    }

    /// Returns the content of `name`, or `default` when it is absent.
    pub fn get_file_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.files.get(name).map(String::as_str).unwrap_or(default)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn files(&self) -> &FileMap {
        &self.files
    }

    pub fn file_names(&self) -> Vec<&str> {
        self.files.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Returns `(name, content)` for every file matching a glob-like pattern.
    ///
    /// `*` and `?` do not cross `/`; `**` matches any path segment sequence.
    pub fn files_matching(&self, pattern: &str) -> Result<Vec<(&str, &str)>, WorkspaceError> {
        let matcher = compile_glob(pattern)?;
        Ok(self
            .files
            .iter()
            .filter(|(name, _)| matcher.is_match(name))
            .map(|(name, content)| (name.as_str(), content.as_str()))
            .collect())
    }

    /// Concatenates every file matching `pattern` with `File:` headers.
    pub fn get_codes(&self, pattern: &str) -> Result<String, WorkspaceError> {
        Ok(render_files(self.files_matching(pattern)?))
    }

    /// Human-readable concatenation of all files, sorted by name.
    pub fn all_codes(&self) -> String {
        render_files(
            self.files
                .iter()
                .map(|(name, content)| (name.as_str(), content.as_str())),
        )
    }

    /// Copies the current file set.
    pub fn snapshot(&self) -> WorkspaceSnapshot {
        WorkspaceSnapshot(self.files.clone())
    }

    /// Reverts to `snapshot`, including the bound directory.
    ///
    /// Files created after the snapshot are deleted from disk; files that
    /// existed are rewritten with their snapshot content.
    pub fn restore(&mut self, snapshot: WorkspaceSnapshot) -> Result<(), WorkspaceError> {
        if let Some(root) = &self.root {
            for name in self.files.keys() {
                if !snapshot.0.contains_key(name) {
                    let path = root.join(name);
                    if path.exists() {
                        fs::remove_file(path)?;
                    }
                }
            }
            for (name, content) in &snapshot.0 {
                if self.files.get(name) != Some(content) {
                    write_file(root, name, content)?;
                }
            }
        }
        self.files = snapshot.0;
        Ok(())
    }

    /// Writes every file below `dir`, creating parent directories as needed.
    pub fn materialize(&self, dir: &Path) -> Result<(), WorkspaceError> {
        fs::create_dir_all(dir)?;
        for (name, content) in &self.files {
            write_file(dir, name, content)?;
        }
        Ok(())
    }
}

/// Aliasing handle over a [`Workspace`].
///
/// Cloning the handle shares the underlying workspace; use [`SharedWorkspace::ptr_eq`]
/// to tell whether two sub-tasks write into the same artifact tree.
#[derive(Debug, Clone, Default)]
pub struct SharedWorkspace(Arc<RwLock<Workspace>>);

impl SharedWorkspace {
    pub fn new(workspace: Workspace) -> Self {
        Self(Arc::new(RwLock::new(workspace)))
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Workspace> {
        self.0.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, Workspace> {
        self.0.write().await
    }

    /// Owned copy of the current workspace state.
    pub async fn cloned(&self) -> Workspace {
        self.0.read().await.clone()
    }

    pub fn ptr_eq(&self, other: &SharedWorkspace) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Workspace> for SharedWorkspace {
    fn from(workspace: Workspace) -> Self {
        Self::new(workspace)
    }
}

fn render_files<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut out = String::new();
    for (name, content) in files {
        out.push_str("File: ");
        out.push_str(name);
        out.push('\n');
        out.push_str(content);
        out.push('\n');
    }
    out
}

/// Checks that `name` is a non-empty relative path that stays inside the workspace.
pub fn validate_relative(name: &str) -> Result<(), WorkspaceError> {
    let invalid = |reason: &str| WorkspaceError::InvalidPath {
        path: name.to_string(),
        reason: reason.to_string(),
    };
    if name.trim().is_empty() {
        return Err(invalid("empty file name"));
    }
    for component in Path::new(name).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err(invalid("parent directory references are not allowed")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("absolute paths are not allowed"))
            }
        }
    }
    Ok(())
}

fn write_file(root: &Path, name: &str, content: &str) -> Result<(), WorkspaceError> {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, content)?;
    Ok(())
}

/// Translates a glob-like pattern into an anchored regex.
pub(crate) fn compile_glob(pattern: &str) -> Result<Regex, WorkspaceError> {
    let mut expr = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                // `**/` also matches zero directories.
                if chars.peek() == Some(&'/') {
                    chars.next();
                    expr.push_str("(?:.*/)?");
                } else {
                    expr.push_str(".*");
                }
            }
            '*' => expr.push_str("[^/]*"),
            '?' => expr.push_str("[^/]"),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| WorkspaceError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(pairs: &[(&str, &str)]) -> FileMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_inject_overwrites() {
        let mut ws = Workspace::new();
        ws.inject_files(&files(&[("a.py", "one"), ("b.py", "two")]))
            .expect("inject");
        ws.inject_files(&files(&[("a.py", "uno")])).expect("inject");

        assert_eq!(ws.len(), 2);
        assert_eq!(ws.get_file("a.py").expect("a.py"), "uno");
        assert_eq!(ws.get_file("b.py").expect("b.py"), "two");
    }

    #[test]
    fn test_get_file_not_found_and_default() {
        let ws = Workspace::new();
        assert!(matches!(
            ws.get_file("missing.py"),
            Err(WorkspaceError::NotFound(name)) if name == "missing.py"
        ));
        assert_eq!(ws.get_file_or("missing.py", "fallback"), "fallback");
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let mut ws = Workspace::new();
        let result = ws.inject_files(&files(&[("ok.py", "x"), ("../evil.py", "y")]));
        assert!(matches!(result, Err(WorkspaceError::InvalidPath { .. })));
        assert!(ws.is_empty(), "nothing may be written when a name is invalid");

        assert!(ws.inject_files(&files(&[("/etc/passwd", "x")])).is_err());
    }

    #[test]
    fn test_glob_patterns() {
        let mut ws = Workspace::new();
        ws.inject_files(&files(&[
            ("model_lgb.py", "lgb"),
            ("model_xgb.py", "xgb"),
            ("model_test.txt", "t"),
            ("spec/model.md", "spec"),
            ("main.py", "main"),
        ]))
        .expect("inject");

        let names: Vec<&str> = ws
            .files_matching("model_*.py")
            .expect("pattern")
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["model_lgb.py", "model_xgb.py"]);

        assert_eq!(ws.files_matching("*.md").expect("pattern").len(), 0);
        assert_eq!(ws.files_matching("**/*.md").expect("pattern").len(), 1);
        assert_eq!(ws.files_matching("ma?n.py").expect("pattern").len(), 1);
    }

    #[test]
    fn test_get_codes_format() {
        let mut ws = Workspace::new();
        ws.inject_files(&files(&[("b.py", "B"), ("a.py", "A")]))
            .expect("inject");

        assert_eq!(ws.get_codes("a.py").expect("pattern"), "File: a.py\nA\n");
        assert_eq!(ws.all_codes(), "File: a.py\nA\nFile: b.py\nB\n");
    }

    #[test]
    fn test_write_through_and_restore() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut ws = Workspace::with_root(dir.path().join("ws"));
        ws.inject_files(&files(&[("load_data.py", "v1")]))
            .expect("inject");
        let snapshot = ws.snapshot();

        ws.inject_files(&files(&[("load_data.py", "v2"), ("pkg/new.py", "new")]))
            .expect("inject");
        assert_eq!(
            fs::read_to_string(dir.path().join("ws/pkg/new.py")).expect("read"),
            "new"
        );

        ws.restore(snapshot.clone()).expect("restore");
        assert_eq!(ws.snapshot(), snapshot);
        assert!(!dir.path().join("ws/pkg/new.py").exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("ws/load_data.py")).expect("read"),
            "v1"
        );
    }

    #[test]
    fn test_inject_from_dir_and_materialize() {
        let template = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(template.path().join("spec")).expect("mkdir");
        fs::write(template.path().join("spec/workflow.md"), "# spec").expect("write");
        fs::write(template.path().join("load_data.py"), "def load(): ...").expect("write");

        let mut ws = Workspace::new();
        let count = ws.inject_from_dir(template.path()).expect("seed");
        assert_eq!(count, 2);
        assert_eq!(ws.get_file("spec/workflow.md").expect("spec"), "# spec");

        let out = tempfile::tempdir().expect("tempdir");
        ws.materialize(out.path()).expect("materialize");
        assert!(out.path().join("spec/workflow.md").exists());
        assert!(out.path().join("load_data.py").exists());
    }

    #[tokio::test]
    async fn test_shared_workspace_aliases() {
        let shared = SharedWorkspace::new(Workspace::new());
        let alias = shared.clone();
        alias
            .write()
            .await
            .inject_files(&files(&[("feature.py", "x")]))
            .expect("inject");

        assert!(shared.ptr_eq(&alias));
        assert!(shared.read().await.contains("feature.py"));
        assert!(!shared.ptr_eq(&SharedWorkspace::default()));
    }
}
