//! On-disk layout and record persistence.
//!
//! ```text
//! ~/.arngit/
//! ├── config/
//! │   ├── config.yaml       # Typed configuration
//! │   └── protected.json    # Guarded repositories (single mapping document)
//! ├── accounts/
//! │   └── <name>.json       # One record per identity
//! ├── cache/
//! └── logs/
//! ```
//!
//! The base directory can be moved with `ARNGIT_HOME`.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::ffi::OsString;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Environment variable overriding the base directory.
pub const HOME_ENV: &str = "ARNGIT_HOME";

/// Extension used for in-flight writes; such files are never loaded.
const TMP_SUFFIX: &str = ".tmp";

/// Resolved directory layout.
#[derive(Debug, Clone)]
pub struct Storage {
    base_dir: PathBuf,
}

impl Storage {
    /// Open the default location (`$ARNGIT_HOME` or `~/.arngit`).
    pub async fn new() -> std::io::Result<Self> {
        Self::open(default_base_dir()).await
    }

    /// Open (and create if needed) the layout rooted at `base_dir`.
    pub async fn open(base_dir: PathBuf) -> std::io::Result<Self> {
        let storage = Self { base_dir };
        for dir in [
            storage.base_dir.clone(),
            storage.config_dir(),
            storage.accounts_dir(),
            storage.cache_dir(),
            storage.logs_dir(),
        ] {
            create_private_dir(&dir).await?;
        }
        Ok(storage)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn config_dir(&self) -> PathBuf {
        self.base_dir.join("config")
    }

    pub fn accounts_dir(&self) -> PathBuf {
        self.base_dir.join("accounts")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.base_dir.join("cache")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir().join("config.yaml")
    }

    pub fn protected_file(&self) -> PathBuf {
        self.config_dir().join("protected.json")
    }
}

/// `$ARNGIT_HOME`, falling back to `~/.arngit`.
pub fn default_base_dir() -> PathBuf {
    match std::env::var(HOME_ENV) {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => home_dir().join(".arngit"),
    }
}

/// The user profile directory (`$HOME`, then `$USERPROFILE`).
pub fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .or_else(|| std::env::var_os("USERPROFILE").filter(|h| !h.is_empty()))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

async fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await?;
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

/// Write `contents` to a sibling temp file and rename it over `path`.
///
/// Readers observe either the previous file or the complete new one.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let tmp = tmp_path(path);
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(&tmp).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Key-value persistence for individually addressable records.
#[async_trait]
pub trait RecordStore<T>: Send + Sync {
    /// Load every readable record with the key it is stored under.
    /// Unreadable records are skipped.
    async fn load_all(&self) -> std::io::Result<Vec<(String, T)>>;

    /// Durably write one record under `key`.
    async fn save(&self, key: &str, record: &T) -> std::io::Result<()>;

    /// Delete the record under `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> std::io::Result<()>;
}

/// One pretty-printed JSON file per record: `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct JsonDirStore<T> {
    dir: PathBuf,
    _record: PhantomData<fn() -> T>,
}

impl<T> JsonDirStore<T> {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            _record: PhantomData,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl<T> RecordStore<T> for JsonDirStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn load_all(&self) -> std::io::Result<Vec<(String, T)>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
            else {
                tracing::warn!("Skipping record with non UTF-8 name {}", path.display());
                continue;
            };
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("Skipping unreadable record {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_slice::<T>(&bytes) {
                Ok(record) => records.push((key, record)),
                Err(e) => {
                    tracing::warn!("Skipping corrupt record {}: {}", path.display(), e);
                }
            }
        }

        Ok(records)
    }

    async fn save(&self, key: &str, record: &T) -> std::io::Result<()> {
        let data = serde_json::to_vec_pretty(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        write_atomic(&self.record_path(key), &data).await
    }

    async fn delete(&self, key: &str) -> std::io::Result<()> {
        match fs::remove_file(self.record_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        body: String,
    }

    fn note(id: &str, body: &str) -> Note {
        Note {
            id: id.to_string(),
            body: body.to_string(),
        }
    }

    #[tokio::test]
    async fn open_creates_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let storage = Storage::open(temp.path().join("home")).await.unwrap();

        assert!(storage.config_dir().is_dir());
        assert!(storage.accounts_dir().is_dir());
        assert!(storage.cache_dir().is_dir());
        assert!(storage.logs_dir().is_dir());
        assert_eq!(
            storage.protected_file(),
            temp.path().join("home/config/protected.json")
        );
    }

    #[tokio::test]
    async fn save_load_delete() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store: JsonDirStore<Note> = JsonDirStore::new(temp.path().to_path_buf());

        store.save("b", &note("b", "second")).await.unwrap();
        store.save("a", &note("a", "first")).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(
            loaded,
            vec![
                ("a".to_string(), note("a", "first")),
                ("b".to_string(), note("b", "second"))
            ]
        );

        store.delete("a").await.unwrap();
        store.delete("a").await.unwrap();
        assert_eq!(
            store.load_all().await.unwrap(),
            vec![("b".to_string(), note("b", "second"))]
        );
    }

    #[tokio::test]
    async fn corrupt_records_are_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store: JsonDirStore<Note> = JsonDirStore::new(temp.path().to_path_buf());

        store.save("good", &note("good", "ok")).await.unwrap();
        std::fs::write(temp.path().join("bad.json"), "{ not json").unwrap();
        std::fs::write(temp.path().join("half.json.tmp"), "{\"id\":").unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded, vec![("good".to_string(), note("good", "ok"))]);
    }

    #[tokio::test]
    async fn missing_dir_loads_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store: JsonDirStore<Note> = JsonDirStore::new(temp.path().join("nope"));
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_atomic_leaves_no_tmp_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("doc.json");

        write_atomic(&path, b"{}").await.unwrap();
        write_atomic(&path, b"{\"a\":1}").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\":1}");
        assert!(!tmp_path(&path).exists());
    }
}
