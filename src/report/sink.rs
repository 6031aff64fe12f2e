use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;

/// Where finished reports end up. Only `save` writes anything.
#[async_trait]
pub trait ExportSink: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }

    /// Returns a human-readable location for the saved document.
    async fn save(&self, bytes: &[u8], filename: &str) -> anyhow::Result<String>;
}

/// Writes reports into a directory. The document goes to a temp file next to
/// the target and is renamed into place, so a failed save leaves nothing.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ExportSink for FileSink {
    fn is_available(&self) -> bool {
        !self.dir.exists() || self.dir.is_dir()
    }

    async fn save(&self, bytes: &[u8], filename: &str) -> anyhow::Result<String> {
        let path = self.dir.join(filename);
        let bytes = bytes.to_vec();
        let target = path.clone();

        tokio::task::spawn_blocking(move || write_atomically(&target, &bytes))
            .await
            .context("export writer stopped unexpectedly")??;

        Ok(path.display().to_string())
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create export directory {}", parent.display()))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to open a temp file in {}", parent.display()))?;
    temp.write_all(bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    temp.as_file()
        .sync_all()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    temp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to move report into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn saves_into_directory_without_leftovers() {
        let dir = tempfile::TempDir::new().unwrap();
        let sink = FileSink::new(dir.path().join("exports"));
        assert!(sink.is_available());

        let location = sink.save(b"# Report\n", "report.md").await.unwrap();
        assert!(location.ends_with("report.md"));

        let saved = fs::read(dir.path().join("exports/report.md")).unwrap();
        assert_eq!(saved, b"# Report\n");
        let entries = fs::read_dir(dir.path().join("exports")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn file_in_place_of_directory_is_unavailable() {
        let dir = tempfile::TempDir::new().unwrap();
        let blocker = dir.path().join("exports");
        fs::write(&blocker, b"not a directory").unwrap();
        assert!(!FileSink::new(blocker).is_available());
    }
}
