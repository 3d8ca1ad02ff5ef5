use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, error};
use walkdir::WalkDir;

use crate::errors::AppError;
use crate::models::{FileInfo, FileListing, Message};

/// Enumerates a project's files and renders them as the context message that
/// opens every upstream transcript.
#[async_trait]
pub trait ProjectSource: Send + Sync {
    async fn list_files(&self, project_dir: &str) -> Result<FileListing, AppError>;

    async fn context_message(&self, project_dir: &str) -> Result<Message, AppError>;
}

/// Reads projects from directories below a fixed root.
#[derive(Debug, Clone)]
pub struct FsProjectSource {
    root: PathBuf,
}

impl FsProjectSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves `project_dir` below the root, rejecting anything that could escape it.
    fn resolve(&self, project_dir: &str) -> Result<PathBuf, AppError> {
        let rel = Path::new(project_dir);
        let all_normal = rel.components().all(|c| matches!(c, Component::Normal(_)));
        if project_dir.trim().is_empty() || !all_normal {
            return Err(AppError::configuration(format!(
                "Invalid project directory '{project_dir}'"
            )));
        }
        Ok(self.root.join(rel))
    }

    /// Creates the project directory if needed and returns every regular file
    /// below it as `(relative name, absolute path, size)`, sorted by name.
    async fn collect(&self, project_dir: &str) -> Result<Vec<(String, PathBuf, u64)>, AppError> {
        let base = self.resolve(project_dir)?;
        tokio::fs::create_dir_all(&base).await.map_err(|e| {
            error!("Failed to create project directory {}: {e}", base.display());
            AppError::configuration(format!("Failed to read directory {project_dir}: {e}"))
        })?;

        let walk_base = base.clone();
        let mut files = tokio::task::spawn_blocking(move || walk_files(&walk_base))
            .await
            .map_err(|e| AppError::Unexpected(format!("Directory walk panicked: {e}")))?
            .map_err(|e| {
                error!("Failed to walk {}: {e}", base.display());
                AppError::configuration(format!("Failed to read directory {project_dir}: {e}"))
            })?;
        files.sort_by(|a, b| a.0.cmp(&b.0));
        debug!("Found {} files in project {project_dir}", files.len());
        Ok(files)
    }
}

/// Regular files below `base`. Symlinks are not followed, so a link cannot pull
/// files from outside the project into the listing.
fn walk_files(base: &Path) -> Result<Vec<(String, PathBuf, u64)>, walkdir::Error> {
    let mut files = Vec::new();
    for entry in WalkDir::new(base).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry.metadata()?.len();
        let name = entry
            .path()
            .strip_prefix(base)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.push((name, entry.into_path(), size));
    }
    Ok(files)
}

#[async_trait]
impl ProjectSource for FsProjectSource {
    async fn list_files(&self, project_dir: &str) -> Result<FileListing, AppError> {
        let files: Vec<FileInfo> = self
            .collect(project_dir)
            .await?
            .into_iter()
            .map(|(name, _, size)| FileInfo { name, size })
            .collect();
        let total_size = files.iter().map(|f| f.size).sum();
        Ok(FileListing { files, total_size })
    }

    async fn context_message(&self, project_dir: &str) -> Result<Message, AppError> {
        let mut body = String::from("Here are the current project files:\n");
        for (name, path, size) in self.collect(project_dir).await? {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| AppError::configuration(format!("Failed to read {name}: {e}")))?;
            match String::from_utf8(bytes) {
                Ok(text) => body.push_str(&format!("\n### {name}\n```\n{text}\n```\n")),
                Err(_) => body.push_str(&format!("\n### {name}\n(binary file, {})\n", format_file_size(size))),
            }
        }
        Ok(Message::user(body))
    }
}

/// Renders a byte count the way the file list shows it, e.g. `1.5 KB`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_sizes() {
        assert_eq!(format_file_size(0), "0 Bytes");
        assert_eq!(format_file_size(512), "512 Bytes");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(1024 * 1024), "1 MB");
    }

    #[tokio::test]
    async fn rejects_paths_escaping_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let source = FsProjectSource::new(dir.path());
        for bad in ["", "../etc", "/abs", "a/../../b"] {
            let err = source.list_files(bad).await.unwrap_err();
            assert!(err.is_configuration(), "{bad} should be rejected");
        }
    }

    #[tokio::test]
    async fn lists_nested_files_and_renders_context() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("demo");
        std::fs::create_dir_all(project.join("src")).unwrap();
        std::fs::write(project.join("README.md"), "hello").unwrap();
        std::fs::write(project.join("src/main.rs"), "fn main() {}").unwrap();

        let source = FsProjectSource::new(dir.path());
        let listing = source.list_files("demo").await.unwrap();
        let names: Vec<_> = listing.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["README.md", "src/main.rs"]);
        assert_eq!(listing.total_size, 5 + 12);

        let ctx = source.context_message("demo").await.unwrap();
        assert!(ctx.content.contains("### src/main.rs\n```\nfn main() {}\n```"));
        assert!(ctx.is_complete);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinked_directories_are_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "s3cret").unwrap();
        let project = dir.path().join("demo");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::write(project.join("a.txt"), "a").unwrap();
        std::os::unix::fs::symlink(outside.path(), project.join("linked")).unwrap();

        let source = FsProjectSource::new(dir.path());
        let listing = source.list_files("demo").await.unwrap();
        let names: Vec<_> = listing.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a.txt"]);
        assert!(!source.context_message("demo").await.unwrap().content.contains("s3cret"));
    }

    #[tokio::test]
    async fn missing_project_directory_is_created_empty() {
        let dir = tempfile::tempdir().unwrap();
        let source = FsProjectSource::new(dir.path());
        let listing = source.list_files("fresh").await.unwrap();
        assert!(listing.files.is_empty());
        assert!(dir.path().join("fresh").is_dir());
    }
}
