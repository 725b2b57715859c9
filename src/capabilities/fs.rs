//! File system capabilities. Relative paths resolve against the workspace.

use super::{CapabilityContext, OperationSet};
use crate::error::{AppError, Result};
use crate::registry::{BoundArgs, OperationDescriptor, ParamType, ParameterSpec};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glob::{MatchOptions, Pattern};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

/// Upper bound on paths returned by `find_files`.
const MAX_MATCHES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsOp {
    CreateFile,
    ReadFile,
    AppendToFile,
    DeleteFile,
    ListFiles,
    CreateDirectory,
    GetCurrentDirectory,
    CopyFile,
    MoveFile,
    CreateTempFile,
    FindFiles,
    GetFileInfo,
}

#[async_trait]
impl OperationSet for FsOp {
    const ALL: &'static [Self] = &[
        FsOp::CreateFile,
        FsOp::ReadFile,
        FsOp::AppendToFile,
        FsOp::DeleteFile,
        FsOp::ListFiles,
        FsOp::CreateDirectory,
        FsOp::GetCurrentDirectory,
        FsOp::CopyFile,
        FsOp::MoveFile,
        FsOp::CreateTempFile,
        FsOp::FindFiles,
        FsOp::GetFileInfo,
    ];

    fn describe(self) -> OperationDescriptor {
        let filepath = || ParameterSpec::required("filepath", ParamType::Str);
        let content = || ParameterSpec::required("content", ParamType::Str);
        match self {
            FsOp::CreateFile => OperationDescriptor::new(
                "create_file",
                "Create a new file with specified content at any path",
                "file_system",
            )
            .param(filepath())
            .param(content())
            .examples(&[
                "create a Python script",
                "save configuration file",
                "write documentation",
                "create HTML page",
            ])
            .keywords(&["create", "file", "write", "save", "new"]),
            FsOp::ReadFile => OperationDescriptor::new(
                "read_file",
                "Read and return the complete content of any file",
                "file_system",
            )
            .param(filepath())
            .examples(&[
                "read configuration",
                "load source code",
                "view file contents",
                "inspect logs",
            ])
            .keywords(&["read", "file", "content", "load", "view"]),
            FsOp::AppendToFile => OperationDescriptor::new(
                "append_to_file",
                "Add content to the end of an existing file",
                "file_system",
            )
            .param(filepath())
            .param(content())
            .examples(&[
                "add logs to file",
                "append data",
                "update configuration",
                "add code snippet",
            ])
            .keywords(&["append", "add", "update", "extend"]),
            FsOp::DeleteFile => OperationDescriptor::new(
                "delete_file",
                "Remove a file from the filesystem",
                "file_system",
            )
            .param(filepath())
            .examples(&[
                "remove temporary file",
                "cleanup old data",
                "delete backup",
                "remove logs",
            ])
            .keywords(&["delete", "remove", "cleanup", "unlink"]),
            FsOp::ListFiles => OperationDescriptor::new(
                "list_files",
                "List files and directories with optional pattern filtering",
                "file_system",
            )
            .param(ParameterSpec::with_default("directory", ParamType::Str, json!(".")))
            .param(ParameterSpec::with_default("pattern", ParamType::Str, json!("*")))
            .examples(&[
                "browse project files",
                "find all Python files",
                "list directory contents",
                "find *.json files",
            ])
            .keywords(&["list", "browse", "directory", "find", "search"]),
            FsOp::CreateDirectory => OperationDescriptor::new(
                "create_directory",
                "Create a new directory with all parent directories",
                "file_system",
            )
            .param(ParameterSpec::required("directory", ParamType::Str))
            .examples(&[
                "make project folder",
                "create nested directories",
                "setup workspace",
                "organize files",
            ])
            .keywords(&["mkdir", "directory", "folder", "create"]),
            FsOp::GetCurrentDirectory => OperationDescriptor::new(
                "get_current_directory",
                "Get the workspace directory that relative paths resolve against",
                "file_system",
            )
            .examples(&["where am I", "show working directory", "print workspace path"])
            .keywords(&["pwd", "cwd", "directory", "workspace", "current"]),
            FsOp::CopyFile => OperationDescriptor::new(
                "copy_file",
                "Copy a file from source to destination location",
                "file_system",
            )
            .param(ParameterSpec::required("source", ParamType::Str))
            .param(ParameterSpec::required("destination", ParamType::Str))
            .examples(&[
                "backup configuration",
                "duplicate file",
                "copy template",
                "clone script",
            ])
            .keywords(&["copy", "duplicate", "backup", "clone"]),
            FsOp::MoveFile => OperationDescriptor::new(
                "move_file",
                "Move or rename a file from source to destination",
                "file_system",
            )
            .param(ParameterSpec::required("source", ParamType::Str))
            .param(ParameterSpec::required("destination", ParamType::Str))
            .examples(&[
                "rename file",
                "move to different folder",
                "reorganize files",
                "relocate data",
            ])
            .keywords(&["move", "rename", "relocate", "transfer"]),
            FsOp::CreateTempFile => OperationDescriptor::new(
                "create_temp_file",
                "Create a temporary file with content and return its path",
                "file_system",
            )
            .param(content())
            .param(ParameterSpec::with_default("suffix", ParamType::Str, json!(".txt")))
            .examples(&["scratch file", "temporary output", "stash intermediate data"])
            .keywords(&["temp", "temporary", "scratch", "file"]),
            FsOp::FindFiles => OperationDescriptor::new(
                "find_files",
                "Search for files matching a pattern recursively",
                "file_system",
            )
            .param(ParameterSpec::required("pattern", ParamType::Str))
            .param(ParameterSpec::with_default("directory", ParamType::Str, json!(".")))
            .param(ParameterSpec::with_default("recursive", ParamType::Bool, json!(true)))
            .examples(&[
                "find all Python files",
                "search for config files",
                "locate images",
                "find by extension",
            ])
            .keywords(&["find", "search", "locate", "pattern", "recursive"]),
            FsOp::GetFileInfo => OperationDescriptor::new(
                "get_file_info",
                "Get detailed metadata about a file or directory",
                "file_system",
            )
            .param(filepath())
            .examples(&[
                "check file size",
                "view permissions",
                "get creation date",
                "file statistics",
            ])
            .keywords(&["info", "metadata", "stats", "properties", "details"]),
        }
    }

    async fn run(self, ctx: &CapabilityContext, args: BoundArgs) -> Result<Value> {
        match self {
            FsOp::CreateFile => {
                let path = ctx.path(args.str("filepath")?);
                let content = args.str("content")?;
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, content).await?;
                Ok(json!({ "path": shown(&path), "bytes_written": content.len() }))
            }
            FsOp::ReadFile => {
                let path = ctx.path(args.str("filepath")?);
                let content = tokio::fs::read_to_string(&path).await?;
                Ok(json!(content))
            }
            FsOp::AppendToFile => {
                let path = ctx.path(args.str("filepath")?);
                let content = args.str("content")?;
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await?;
                file.write_all(content.as_bytes()).await?;
                file.flush().await?;
                Ok(json!({ "path": shown(&path), "bytes_appended": content.len() }))
            }
            FsOp::DeleteFile => {
                let path = ctx.path(args.str("filepath")?);
                tokio::fs::remove_file(&path).await?;
                Ok(json!({ "deleted": shown(&path) }))
            }
            FsOp::ListFiles => {
                let directory = ctx.path(args.str("directory")?);
                list_files(&directory, args.str("pattern")?).await
            }
            FsOp::CreateDirectory => {
                let path = ctx.path(args.str("directory")?);
                tokio::fs::create_dir_all(&path).await?;
                Ok(json!({ "path": shown(&path) }))
            }
            FsOp::GetCurrentDirectory => {
                let dir = &ctx.config.workspace_dir;
                let dir = tokio::fs::canonicalize(dir)
                    .await
                    .unwrap_or_else(|_| dir.clone());
                Ok(json!(shown(&dir)))
            }
            FsOp::CopyFile => {
                let source = ctx.path(args.str("source")?);
                let destination = into_directory(&source, ctx.path(args.str("destination")?));
                let bytes = tokio::fs::copy(&source, &destination).await?;
                Ok(json!({ "source": shown(&source), "destination": shown(&destination), "bytes": bytes }))
            }
            FsOp::MoveFile => {
                let source = ctx.path(args.str("source")?);
                let destination = into_directory(&source, ctx.path(args.str("destination")?));
                move_file(&source, &destination).await?;
                Ok(json!({ "source": shown(&source), "destination": shown(&destination) }))
            }
            FsOp::CreateTempFile => {
                let suffix = args.str("suffix")?;
                if suffix.contains(['/', '\\', '\0']) {
                    return Err(AppError::InvalidArgument(format!(
                        "suffix '{}' must not contain path separators",
                        suffix
                    )));
                }
                let path = std::env::temp_dir()
                    .join(format!("toolhub-{}{}", uuid::Uuid::new_v4().simple(), suffix));
                tokio::fs::write(&path, args.str("content")?).await?;
                Ok(json!({ "path": shown(&path) }))
            }
            FsOp::FindFiles => {
                let directory = ctx.path(args.str("directory")?);
                let matches = find_files(&directory, args.str("pattern")?, args.bool("recursive")?).await?;
                Ok(json!({
                    "directory": shown(&directory),
                    "count": matches.len(),
                    "matches": matches,
                }))
            }
            FsOp::GetFileInfo => {
                let path = ctx.path(args.str("filepath")?);
                file_info(&path).await
            }
        }
    }
}

pub(crate) fn shown(path: &Path) -> String {
    path.display().to_string()
}

/// `destination` itself, or `destination/<source name>` when it is a directory.
fn into_directory(source: &Path, destination: PathBuf) -> PathBuf {
    match source.file_name() {
        Some(name) if destination.is_dir() => destination.join(name),
        _ => destination,
    }
}

async fn move_file(source: &Path, destination: &Path) -> Result<()> {
    if let Err(rename_err) = tokio::fs::rename(source, destination).await {
        // Rename fails across file systems; fall back to copy and delete.
        tracing::debug!(error = %rename_err, "Rename failed, copying instead");
        tokio::fs::copy(source, destination)
            .await
            .map_err(|_| AppError::from(rename_err))?;
        tokio::fs::remove_file(source).await?;
    }
    Ok(())
}

async fn list_files(directory: &Path, pattern: &str) -> Result<Value> {
    if !directory.is_dir() {
        return Err(AppError::capability(format!(
            "Directory does not exist: {}",
            directory.display()
        )));
    }
    let matcher = name_pattern(pattern)?;
    let include_hidden = pattern.starts_with('.');
    let directory = directory.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let mut entries = Vec::new();
        for entry in WalkDir::new(&directory).min_depth(1).max_depth(1) {
            let entry = entry.map_err(walk_error)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if (!include_hidden && name.starts_with('.'))
                || !matcher.matches_with(&name, MATCH_OPTIONS)
            {
                continue;
            }
            // A link to a directory reports as a directory; a dangling link as itself.
            let metadata = match std::fs::metadata(entry.path()) {
                Ok(metadata) => metadata,
                Err(_) => entry.metadata().map_err(walk_error)?,
            };
            entries.push(if metadata.is_dir() {
                json!({ "name": name, "type": "directory" })
            } else {
                json!({ "name": name, "type": "file", "size": metadata.len() })
            });
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        Ok(json!({ "directory": shown(&directory), "entries": entries }))
    })
    .await
    .map_err(|e| AppError::capability(format!("list_files task failed: {}", e)))?
}

/// Paths under `root` (relative to it) whose name matches `pattern`.
///
/// A pattern containing `/` is matched against the whole relative path.
/// Symlinked directories are not descended into.
pub(crate) async fn find_files(root: &Path, pattern: &str, recursive: bool) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Err(AppError::capability(format!(
            "Directory does not exist: {}",
            root.display()
        )));
    }
    let matcher = name_pattern(pattern)?;
    let match_full_path = pattern.contains('/');
    let root = root.to_path_buf();
    let pattern = pattern.to_string();

    tokio::task::spawn_blocking(move || {
        let walker = WalkDir::new(&root)
            .min_depth(1)
            .max_depth(if recursive { usize::MAX } else { 1 })
            .follow_links(false);

        let mut matches = Vec::new();
        for entry in walker {
            let entry = entry.map_err(walk_error)?;
            let relative = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            let subject = if match_full_path {
                relative.clone()
            } else {
                entry.file_name().to_string_lossy().into_owned()
            };

            if matcher.matches_with(&subject, MATCH_OPTIONS) {
                matches.push(relative);
                if matches.len() >= MAX_MATCHES {
                    tracing::warn!(pattern = %pattern, "find_files hit the match limit");
                    break;
                }
            }
        }
        matches.sort();
        Ok(matches)
    })
    .await
    .map_err(|e| AppError::capability(format!("find_files task failed: {}", e)))?
}

/// Wildcards never cross `/`; `**` spans directories.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

fn name_pattern(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern)
        .map_err(|e| AppError::InvalidArgument(format!("Invalid pattern '{}': {}", pattern, e)))
}

fn walk_error(err: walkdir::Error) -> AppError {
    match err.into_io_error() {
        Some(io) => AppError::from(io),
        None => AppError::capability("Filesystem loop while walking directory"),
    }
}

async fn file_info(path: &Path) -> Result<Value> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        AppError::capability(format!("File does not exist: {} ({})", path.display(), e))
    })?;
    let absolute = tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf());

    Ok(json!({
        "path": shown(&absolute),
        "size": metadata.len(),
        "type": if metadata.is_dir() { "directory" } else { "file" },
        "modified": metadata.modified().ok().map(timestamp),
        "created": metadata.created().ok().map(timestamp),
        "permissions": permissions(&metadata),
    }))
}

fn timestamp(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339()
}

#[cfg(unix)]
fn permissions(metadata: &std::fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    format!("{:03o}", metadata.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn permissions(metadata: &std::fs::Metadata) -> String {
    if metadata.permissions().readonly() {
        "readonly".to_string()
    } else {
        "readwrite".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::testing;
    use tempfile::tempdir;

    #[test]
    fn test_name_patterns() {
        let matches = |p: &str, s: &str| name_pattern(p).unwrap().matches_with(s, MATCH_OPTIONS);

        assert!(matches("*.py", "main.py"));
        assert!(!matches("*.py", "main.pyc"));
        assert!(!matches("*.py", "src/main.py"));

        assert!(matches("data_?.[cj]s[!x]", "data_1.csv"));
        assert!(matches("data_?.[cj]s[!x]", "data_a.jsn"));
        assert!(!matches("data_?.[cj]s[!x]", "data_1.csx"));

        assert!(matches("src/**/*.rs", "src/lib.rs"));
        assert!(matches("src/**/*.rs", "src/a/b/mod.rs"));

        assert!(matches!(name_pattern("[abc"), Err(AppError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_create_read_append_delete() {
        let dir = tempdir().unwrap();
        let ctx = testing::context(dir.path());

        testing::run(
            FsOp::CreateFile,
            &ctx,
            json!({ "filepath": "nested/dir/notes.txt", "content": "one" }),
        )
        .await
        .unwrap();
        testing::run(
            FsOp::AppendToFile,
            &ctx,
            json!({ "filepath": "nested/dir/notes.txt", "content": "+two" }),
        )
        .await
        .unwrap();

        let content = testing::run(FsOp::ReadFile, &ctx, json!({ "filepath": "nested/dir/notes.txt" }))
            .await
            .unwrap();
        assert_eq!(content, json!("one+two"));

        testing::run(FsOp::DeleteFile, &ctx, json!({ "filepath": "nested/dir/notes.txt" }))
            .await
            .unwrap();
        let err = testing::run(FsOp::ReadFile, &ctx, json!({ "filepath": "nested/dir/notes.txt" }))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::CapabilityError(_)));
    }

    #[tokio::test]
    async fn test_list_files_filters_by_pattern() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("b.txt"), "x").unwrap();
        std::fs::write(dir.path().join(".hidden.json"), "{}").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let ctx = testing::context(dir.path());

        let out = testing::run(FsOp::ListFiles, &ctx, json!({ "pattern": "*.json" }))
            .await
            .unwrap();
        assert_eq!(out["entries"], json!([{ "name": "a.json", "type": "file", "size": 2 }]));

        let out = testing::run(FsOp::ListFiles, &ctx, json!({})).await.unwrap();
        let names: Vec<&str> = out["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.json", "b.txt", "sub"]);
    }

    #[tokio::test]
    async fn test_find_files_recursive_and_flat() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/deep")).unwrap();
        std::fs::write(dir.path().join("top.py"), "").unwrap();
        std::fs::write(dir.path().join("src/a.py"), "").unwrap();
        std::fs::write(dir.path().join("src/deep/b.py"), "").unwrap();
        std::fs::write(dir.path().join("src/deep/c.rs"), "").unwrap();

        let all = find_files(dir.path(), "*.py", true).await.unwrap();
        assert_eq!(all, vec!["src/a.py", "src/deep/b.py", "top.py"]);

        let flat = find_files(dir.path(), "*.py", false).await.unwrap();
        assert_eq!(flat, vec!["top.py"]);

        let nested = find_files(dir.path(), "src/**/*.rs", true).await.unwrap();
        assert_eq!(nested, vec!["src/deep/c.rs"]);

        let err = find_files(dir.path(), "[abc", true).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_find_files_does_not_follow_directory_links() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        std::fs::write(outside.path().join("secret.py"), "").unwrap();
        std::fs::write(dir.path().join("own.py"), "").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("linked")).unwrap();

        let found = find_files(dir.path(), "*.py", true).await.unwrap();
        assert_eq!(found, vec!["own.py"]);
    }

    #[tokio::test]
    async fn test_copy_and_move_into_directory() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "data").unwrap();
        std::fs::create_dir(dir.path().join("backup")).unwrap();
        let ctx = testing::context(dir.path());

        testing::run(FsOp::CopyFile, &ctx, json!({ "source": "a.txt", "destination": "backup" }))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("backup/a.txt")).unwrap(), "data");

        testing::run(FsOp::MoveFile, &ctx, json!({ "source": "a.txt", "destination": "b.txt" }))
            .await
            .unwrap();
        assert!(!dir.path().join("a.txt").exists());
        assert!(dir.path().join("b.txt").exists());
    }

    #[tokio::test]
    async fn test_file_info_and_temp_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "12345").unwrap();
        let ctx = testing::context(dir.path());

        let info = testing::run(FsOp::GetFileInfo, &ctx, json!({ "filepath": "f.txt" }))
            .await
            .unwrap();
        assert_eq!(info["size"], 5);
        assert_eq!(info["type"], "file");
        assert!(info["modified"].is_string());

        let tmp = testing::run(FsOp::CreateTempFile, &ctx, json!({ "content": "scratch", "suffix": ".md" }))
            .await
            .unwrap();
        let path = PathBuf::from(tmp["path"].as_str().unwrap());
        assert!(path.to_string_lossy().ends_with(".md"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "scratch");
        std::fs::remove_file(path).unwrap();

        let err = testing::run(FsOp::CreateTempFile, &ctx, json!({ "content": "x", "suffix": "/../x" }))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }
}
