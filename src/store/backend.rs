use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::PathBuf;

/// Opaque persistence for the serialized snapshot blob.
pub trait SnapshotBackend: Send {
    fn read(&self) -> Result<Option<String>>;

    fn write(&self, content: &str) -> Result<()>;

    /// Exclusive access across processes for one read-modify-write.
    fn lock(&self) -> Result<BackendLock> {
        Ok(BackendLock { _file: None })
    }
}

/// Released on drop.
pub struct BackendLock {
    _file: Option<File>,
}

pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SnapshotBackend for JsonFileBackend {
    fn read(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error)
                .with_context(|| format!("Failed to read snapshot: {}", self.path.display())),
        }
    }

    fn write(&self, content: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create snapshot directory: {}", parent.display())
            })?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, content)
            .with_context(|| format!("Failed to write snapshot: {}", temp_path.display()))?;
        fs::rename(&temp_path, &self.path)
            .with_context(|| format!("Failed to replace snapshot: {}", self.path.display()))?;

        Ok(())
    }

    fn lock(&self) -> Result<BackendLock> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create snapshot directory: {}", parent.display())
            })?;
        }

        let lock_path = self.path.with_extension("json.lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open snapshot lock: {}", lock_path.display()))?;
        file.lock()
            .with_context(|| format!("Failed to lock snapshot: {}", lock_path.display()))?;

        Ok(BackendLock { _file: Some(file) })
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct MemoryBackend {
    pub content: std::sync::Mutex<Option<String>>,
}

#[cfg(test)]
impl MemoryBackend {
    pub fn with_content(content: &str) -> Self {
        Self {
            content: std::sync::Mutex::new(Some(content.to_string())),
        }
    }
}

#[cfg(test)]
impl SnapshotBackend for MemoryBackend {
    fn read(&self) -> Result<Option<String>> {
        Ok(self
            .content
            .lock()
            .map_err(|_| anyhow::anyhow!("memory backend poisoned"))?
            .clone())
    }

    fn write(&self, content: &str) -> Result<()> {
        *self
            .content
            .lock()
            .map_err(|_| anyhow::anyhow!("memory backend poisoned"))? = Some(content.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{JsonFileBackend, SnapshotBackend};

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = JsonFileBackend::new(dir.path().join("rituals.json"));
        assert_eq!(backend.read().expect("read"), None);
    }

    #[test]
    fn write_replaces_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = JsonFileBackend::new(dir.path().join("nested").join("rituals.json"));

        backend.write("{\"a\":1}").expect("write");
        backend.write("{\"a\":2}").expect("overwrite");

        assert_eq!(backend.read().expect("read").as_deref(), Some("{\"a\":2}"));
        assert!(!dir.path().join("nested").join("rituals.json.tmp").exists());
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = JsonFileBackend::new(dir.path().join("rituals.json"));

        let held = backend.lock().expect("first lock");
        assert!(dir.path().join("rituals.json.lock").exists());
        drop(held);
        let _again = backend.lock().expect("relock after drop");
    }
}
