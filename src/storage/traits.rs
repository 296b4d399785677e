//! Filesystem cleanup helpers, split out from `Segment`/`Log` so the
//! deletion policy (what "remove a segment" means) can vary by backend
//! without touching the append/read/recovery code above it. Only one
//! backend — the local filesystem — is in scope for this crate; the trait
//! exists because `Log::truncate` and topic deletion are implemented in
//! terms of it rather than calling `std::fs::remove_file` directly.

use std::path::Path;

pub trait StorageCleanup {
    type Error: std::error::Error + Send + Sync + 'static;

    fn delete_file(&self, path: &Path) -> Result<(), Self::Error>;

    fn cleanup_segment(&self, store_path: &Path, index_path: &Path) -> Result<(), Self::Error> {
        self.delete_file(store_path)?;
        self.delete_file(index_path)?;
        Ok(())
    }

    fn cleanup_log_directory(&self, log_dir: &Path) -> Result<(), Self::Error>;
}

pub struct LocalFileSystem;

impl StorageCleanup for LocalFileSystem {
    type Error = std::io::Error;

    fn delete_file(&self, path: &Path) -> Result<(), Self::Error> {
        if path.exists() {
            std::fs::remove_file(path)
        } else {
            Ok(())
        }
    }

    fn cleanup_log_directory(&self, log_dir: &Path) -> Result<(), Self::Error> {
        std::fs::remove_dir_all(log_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn cleanup_segment_removes_both_files() {
        let dir = TempDir::new().unwrap();
        let store_path = dir.path().join("0.hrq");
        let index_path = dir.path().join("0.dat");
        std::fs::write(&store_path, b"data").unwrap();
        std::fs::write(&index_path, b"idx").unwrap();

        LocalFileSystem.cleanup_segment(&store_path, &index_path).unwrap();

        assert!(!store_path.exists());
        assert!(!index_path.exists());
    }

    #[test]
    fn cleanup_log_directory_removes_tree() {
        let dir = TempDir::new().unwrap();
        let topic_dir = dir.path().join("orders");
        std::fs::create_dir_all(&topic_dir).unwrap();
        std::fs::write(topic_dir.join("0.hrq"), b"data").unwrap();

        LocalFileSystem.cleanup_log_directory(&topic_dir).unwrap();

        assert!(!topic_dir.exists());
    }
}
