//! Document sources: where raw content comes from.
//!
//! A [`DocumentSource`] enumerates and fetches documents by stable source
//! key. The filesystem source walks a root directory with include/exclude
//! globs and uses the root-relative path (with `/` separators) as the key,
//! so keys stay stable across machines and re-scans.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::SourceConfig;

/// One enumerable document, identified by its source key.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub source_key: String,
    pub modified: Option<chrono::DateTime<chrono::Utc>>,
}

/// Raw bytes of a fetched document, tagged with a content type for the
/// extractor registry.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub source_key: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// List available documents, sorted by source key for determinism.
    async fn list(&self) -> Result<Vec<SourceEntry>>;

    /// Fetch one document's raw bytes by its source key.
    async fn fetch(&self, source_key: &str) -> Result<RawDocument>;
}

/// Directory-walking source. Hidden VCS internals are excluded by default;
/// config globs narrow or widen the set further.
pub struct FilesystemSource {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl FilesystemSource {
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let fs = config
            .filesystem
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("source.filesystem section is required"))?;
        if fs.root.as_os_str().is_empty() {
            bail!("source.filesystem.root is required");
        }
        let root = fs.root.clone();

        let include = build_globset(&fs.include_globs)?;

        let mut exclude_patterns = fs.exclude_globs.clone();
        for default in ["**/.git/**", "**/.hg/**", "**/.svn/**", "**/node_modules/**"] {
            if !exclude_patterns.iter().any(|p| p == default) {
                exclude_patterns.push(default.to_string());
            }
        }
        let exclude = build_globset(&exclude_patterns)?;

        Ok(Self {
            root,
            include,
            exclude,
            follow_symlinks: fs.follow_symlinks,
        })
    }

    fn content_type_for(path: &Path) -> &'static str {
        match path.extension().and_then(|e| e.to_str()) {
            Some("md") | Some("markdown") => "text/markdown",
            _ => "text/plain",
        }
    }

    fn relative_key(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if key.is_empty() {
            None
        } else {
            Some(key)
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .with_context(|| format!("Invalid glob pattern: {}", pattern))?;
        builder.add(glob);
    }
    builder.build().context("Failed to build glob set")
}

#[async_trait]
impl DocumentSource for FilesystemSource {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn list(&self) -> Result<Vec<SourceEntry>> {
        if !self.root.is_dir() {
            bail!("Source root is not a directory: {}", self.root.display());
        }

        let mut entries = Vec::new();
        let walker = WalkDir::new(&self.root).follow_links(self.follow_symlinks);
        for entry in walker {
            let entry = entry.context("Failed to walk source directory")?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(key) = self.relative_key(entry.path()) else {
                continue;
            };
            if self.exclude.is_match(&key) || !self.include.is_match(&key) {
                continue;
            }

            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(chrono::DateTime::<chrono::Utc>::from);
            entries.push(SourceEntry {
                source_key: key,
                modified,
            });
        }

        entries.sort_by(|a, b| a.source_key.cmp(&b.source_key));
        Ok(entries)
    }

    async fn fetch(&self, source_key: &str) -> Result<RawDocument> {
        if source_key.split('/').any(|part| part == "..") {
            bail!("Source key must not traverse outside the root: {}", source_key);
        }

        let path = self.root.join(source_key);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read source file: {}", path.display()))?;

        Ok(RawDocument {
            source_key: source_key.to_string(),
            content_type: Self::content_type_for(&path).to_string(),
            bytes,
        })
    }
}

/// Create the source named by the configuration.
pub fn create_source(config: &SourceConfig) -> Result<std::sync::Arc<dyn DocumentSource>> {
    if config.filesystem.is_some() {
        return Ok(std::sync::Arc::new(FilesystemSource::from_config(config)?));
    }
    bail!("No document source configured; add a [source.filesystem] section");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilesystemSourceConfig, SourceConfig};
    use std::fs;

    fn source_for(root: &Path) -> FilesystemSource {
        let config = SourceConfig {
            filesystem: Some(FilesystemSourceConfig {
                root: root.to_path_buf(),
                include_globs: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
                exclude_globs: vec!["drafts/**".to_string()],
                follow_symlinks: false,
            }),
        };
        FilesystemSource::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_list_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::create_dir_all(dir.path().join("drafts")).unwrap();
        fs::write(dir.path().join("b.md"), "b").unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("docs/c.md"), "c").unwrap();
        fs::write(dir.path().join("skip.rs"), "code").unwrap();
        fs::write(dir.path().join("drafts/d.md"), "draft").unwrap();

        let source = source_for(dir.path());
        let entries = source.list().await.unwrap();
        let keys: Vec<&str> = entries.iter().map(|e| e.source_key.as_str()).collect();
        assert_eq!(keys, vec!["a.txt", "b.md", "docs/c.md"]);
    }

    #[tokio::test]
    async fn test_fetch_assigns_content_type() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.md"), "# Notes").unwrap();
        fs::write(dir.path().join("plain.txt"), "plain").unwrap();

        let source = source_for(dir.path());
        let md = source.fetch("notes.md").await.unwrap();
        assert_eq!(md.content_type, "text/markdown");
        assert_eq!(md.bytes, b"# Notes");

        let txt = source.fetch("plain.txt").await.unwrap();
        assert_eq!(txt.content_type, "text/plain");
    }

    #[tokio::test]
    async fn test_fetch_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_for(dir.path());
        assert!(source.fetch("nope.md").await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_for(dir.path());
        assert!(source.fetch("../outside.md").await.is_err());
    }
}
