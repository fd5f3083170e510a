//! A thin async wrapper around the handful of filesystem operations the local backends
//! need, in the style of `maelstrom_util::fs`/`async_fs`: every call attaches the path
//! to its error context instead of leaving the caller to guess which path a bare
//! `io::Error` came from.

use anyhow::{Context as _, Result};
use std::path::Path;
use tokio::fs;

#[derive(Default, Clone, Copy)]
pub struct Fs;

impl Fs {
    pub fn new() -> Self {
        Self
    }

    pub async fn create_dir_all(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::create_dir_all(path)
            .await
            .with_context(|| format!("creating directory {}", path.display()))
    }

    pub async fn write(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent).await?;
        }
        fs::write(path, contents)
            .await
            .with_context(|| format!("writing {}", path.display()))
    }

    pub async fn read(&self, path: impl AsRef<Path>) -> Result<Option<Vec<u8>>> {
        let path = path.as_ref();
        match fs::read(path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub async fn copy(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<()> {
        let (from, to) = (from.as_ref(), to.as_ref());
        if let Some(parent) = to.parent() {
            self.create_dir_all(parent).await?;
        }
        fs::copy(from, to)
            .await
            .with_context(|| format!("copying {} to {}", from.display(), to.display()))?;
        Ok(())
    }

    pub async fn remove_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
        }
    }

    pub async fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<()> {
        let (from, to) = (from.as_ref(), to.as_ref());
        if let Some(parent) = to.parent() {
            self.create_dir_all(parent).await?;
        }
        fs::rename(from, to)
            .await
            .with_context(|| format!("renaming {} to {}", from.display(), to.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Fs::new();
        let path = dir.path().join("nested/dir/file.txt");
        fs.write(&path, b"hello").await.unwrap();
        assert_eq!(fs.read(&path).await.unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn read_of_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Fs::new();
        assert_eq!(fs.read(dir.path().join("missing")).await.unwrap(), None);
    }
}
