use crate::cache::FetchResponse;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use url::Url;

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    url: String,
    status: u16,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    stored_at: i64,
}

/// Named cache generations, one directory each under `root`.
#[derive(Debug, Clone)]
pub struct CacheStorage {
    root: PathBuf,
}

impl CacheStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn generation(&self, name: &str) -> CacheGeneration {
        CacheGeneration {
            dir: self.root.join(name),
        }
    }

    pub async fn names(&self) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(error).with_context(|| {
                    format!("Failed to list cache directory: {}", self.root.display())
                });
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn delete(&self, name: &str) -> Result<bool> {
        let dir = self.root.join(name);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error)
                .with_context(|| format!("Failed to delete cache generation: {}", dir.display())),
        }
    }

    /// Looks through `preferred` generations first, then every other one by name.
    pub async fn match_any(&self, url: &Url, preferred: &[&str]) -> Result<Option<FetchResponse>> {
        let mut order = preferred.iter().map(|name| name.to_string()).collect::<Vec<_>>();
        order.extend(
            self.names()
                .await?
                .into_iter()
                .filter(|name| !preferred.contains(&name.as_str())),
        );

        for name in order {
            if let Some(response) = self.generation(&name).get(url).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}

#[derive(Debug, Clone)]
pub struct CacheGeneration {
    dir: PathBuf,
}

impl CacheGeneration {
    /// Body lands before metadata; an entry is visible once its metadata is renamed in.
    pub async fn put(&self, url: &Url, response: &FetchResponse) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create cache generation: {}", self.dir.display()))?;

        let (meta_path, body_path) = self.entry_paths(url);
        write_atomic(&body_path, &response.body).await?;

        let meta = EntryMeta {
            url: url.to_string(),
            status: response.status,
            headers: response.headers.clone(),
            stored_at: Utc::now().timestamp(),
        };
        let encoded = serde_json::to_vec(&meta).context("Failed to encode cache entry")?;
        write_atomic(&meta_path, &encoded).await
    }

    pub async fn get(&self, url: &Url) -> Result<Option<FetchResponse>> {
        let (meta_path, body_path) = self.entry_paths(url);

        let meta = match fs::read(&meta_path).await {
            Ok(content) => content,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("Failed to read cache entry: {}", meta_path.display()));
            }
        };
        let meta: EntryMeta = serde_json::from_slice(&meta)
            .with_context(|| format!("Corrupt cache entry: {}", meta_path.display()))?;

        let body = fs::read(&body_path)
            .await
            .with_context(|| format!("Failed to read cache body: {}", body_path.display()))?;

        Ok(Some(FetchResponse {
            status: meta.status,
            headers: meta.headers,
            body,
        }))
    }

    pub async fn contains(&self, url: &Url) -> bool {
        let (meta_path, _) = self.entry_paths(url);
        fs::try_exists(meta_path).await.unwrap_or(false)
    }

    fn entry_paths(&self, url: &Url) -> (PathBuf, PathBuf) {
        let digest = format!("{:x}", Sha256::digest(url.as_str().as_bytes()));
        (
            self.dir.join(format!("{digest}.json")),
            self.dir.join(format!("{digest}.body")),
        )
    }
}

async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let temp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    fs::write(&temp, content)
        .await
        .with_context(|| format!("Failed to write cache file: {}", temp.display()))?;
    fs::rename(&temp, path)
        .await
        .with_context(|| format!("Failed to move cache file into place: {}", path.display()))
}
