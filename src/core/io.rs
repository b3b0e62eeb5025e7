use anyhow::Result;
use async_trait::async_trait;

/// Narrow persistence seam so tests and the scheduler never touch the
/// filesystem directly.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;
    async fn delete(&self, path: &str) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
    async fn rename(&self, from: &str, to: &str) -> Result<()>;
}

pub struct NativeStorage;

impl NativeStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NativeStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(path).await?)
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        if tokio::fs::try_exists(path).await? {
            if std::path::Path::new(path).is_dir() {
                tokio::fs::remove_dir_all(path).await?;
            } else {
                tokio::fs::remove_file(path).await?;
            }
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let path = std::path::Path::new(prefix);
        let mut entries = Vec::new();

        if path.is_dir() {
            let mut dir = tokio::fs::read_dir(path).await?;
            while let Some(entry) = dir.next_entry().await? {
                entries.push(entry.path().to_string_lossy().to_string());
            }
        }

        entries.sort();
        Ok(entries)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        if let Some(parent) = std::path::Path::new(to).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::rename(from, to).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_creates_parent_directories() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = NativeStorage::new();
        let path = dir.path().join("a/b/c.json");
        let path_str = path.to_string_lossy().to_string();

        storage.write(&path_str, b"{}").await?;
        assert!(storage.exists(&path_str).await?);
        assert_eq!(storage.read(&path_str).await?, b"{}");
        Ok(())
    }

    #[tokio::test]
    async fn list_returns_sorted_entries() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = NativeStorage::new();
        let root = dir.path().to_string_lossy().to_string();

        storage.write(&format!("{}/b.txt", root), b"b").await?;
        storage.write(&format!("{}/a.txt", root), b"a").await?;

        let entries = storage.list(&root).await?;
        assert_eq!(entries.len(), 2);
        assert!(entries[0].ends_with("a.txt"));
        assert!(entries[1].ends_with("b.txt"));
        Ok(())
    }

    #[tokio::test]
    async fn delete_is_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = NativeStorage::new();
        let path = dir.path().join("gone.txt");
        let path_str = path.to_string_lossy().to_string();

        storage.write(&path_str, b"x").await?;
        storage.delete(&path_str).await?;
        storage.delete(&path_str).await?;
        assert!(!storage.exists(&path_str).await?);
        Ok(())
    }
}
