use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::traits::{MediaEntry, MediaError, MediaId, MediaMetadata, MediaStore};

const MAX_EXTENSION_LEN: usize = 10;

/// Local filesystem media store. Files are stored under a configurable
/// base directory using UUID-based filenames to avoid collisions.
pub struct LocalMediaStore {
    base_dir: PathBuf,
    max_bytes: Option<u64>,
}

impl LocalMediaStore {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            max_bytes: None,
        }
    }

    /// Reject stored payloads larger than `max_bytes`.
    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve `file_name` inside the base directory, rejecting anything that
    /// could address a path outside it.
    fn resolve(&self, file_name: &str) -> Result<PathBuf, MediaError> {
        validate_file_name(file_name)?;
        Ok(self.base_dir.join(file_name))
    }

    async fn entry_for(&self, file_name: &str) -> Result<MediaEntry, MediaError> {
        let path = self.resolve(file_name)?;

        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Err(MediaError::NotFound(file_name.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MediaError::NotFound(file_name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        // Symlinks or other tricks must not escape the upload directory.
        let base = tokio::fs::canonicalize(&self.base_dir).await?;
        let resolved = tokio::fs::canonicalize(&path).await?;
        if !resolved.starts_with(&base) {
            return Err(MediaError::InvalidName(file_name.to_string()));
        }

        Ok(build_entry(file_name, path, &meta))
    }
}

/// Accept only plain file names: no separators, no parent segments, no dotfiles.
pub fn validate_file_name(file_name: &str) -> Result<(), MediaError> {
    let invalid = file_name.is_empty()
        || file_name.starts_with('.')
        || file_name.contains("..")
        || file_name.contains(['/', '\\', '\0'])
        || file_name.chars().any(char::is_control);
    if invalid {
        return Err(MediaError::InvalidName(file_name.to_string()));
    }
    Ok(())
}

fn sanitized_extension(original_name: Option<&str>) -> String {
    let ext: String = original_name
        .and_then(|f| Path::new(f).extension())
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(MAX_EXTENSION_LEN)
        .collect::<String>()
        .to_ascii_lowercase();

    if ext.is_empty() {
        "bin".to_string()
    } else {
        ext
    }
}

fn build_entry(file_name: &str, path: PathBuf, meta: &std::fs::Metadata) -> MediaEntry {
    let id = file_name
        .split('.')
        .next()
        .unwrap_or(file_name)
        .to_string();
    let created_at = meta
        .modified()
        .map_or_else(|_| chrono::Utc::now(), chrono::DateTime::<chrono::Utc>::from);

    MediaEntry {
        id: MediaId(id),
        file_name: file_name.to_string(),
        path,
        metadata: MediaMetadata {
            original_name: None,
            mime_type: Some(
                mime_guess::from_path(file_name)
                    .first_or_octet_stream()
                    .to_string(),
            ),
            size_bytes: Some(meta.len()),
        },
        created_at,
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn store(&self, data: &[u8], metadata: MediaMetadata) -> Result<MediaEntry, MediaError> {
        let size = data.len() as u64;
        if let Some(max) = self.max_bytes {
            if size > max {
                return Err(MediaError::TooLarge { size, max });
            }
        }

        tokio::fs::create_dir_all(&self.base_dir).await?;

        let id = uuid::Uuid::new_v4().to_string();
        let extension = sanitized_extension(metadata.original_name.as_deref());
        let file_name = format!("{id}.{extension}");
        let path = self.base_dir.join(&file_name);
        let partial = self.base_dir.join(format!(".{file_name}.part"));

        tokio::fs::write(&partial, data).await?;
        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }

        let mime_type = metadata.mime_type.clone().or_else(|| {
            Some(
                mime_guess::from_path(&file_name)
                    .first_or_octet_stream()
                    .to_string(),
            )
        });

        tracing::debug!(file = %file_name, size_bytes = size, "Stored upload");

        Ok(MediaEntry {
            id: MediaId(id),
            file_name,
            path,
            metadata: MediaMetadata {
                original_name: metadata.original_name,
                mime_type,
                size_bytes: Some(size),
            },
            created_at: chrono::Utc::now(),
        })
    }

    async fn open(&self, file_name: &str) -> Result<MediaEntry, MediaError> {
        self.entry_for(file_name).await
    }

    async fn delete(&self, file_name: &str) -> Result<(), MediaError> {
        let entry = self.entry_for(file_name).await?;
        tokio::fs::remove_file(&entry.path).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<MediaEntry>, MediaError> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().to_string();
            // Skip in-flight partial writes and anything that is not a plain file.
            if validate_file_name(&file_name).is_err() {
                continue;
            }
            let fs_meta = entry.metadata().await?;
            if !fs_meta.is_file() {
                continue;
            }
            results.push(build_entry(&file_name, entry.path(), &fs_meta));
        }
        results.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.file_name.cmp(&b.file_name)));
        Ok(results)
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn named(name: &str) -> MediaMetadata {
        MediaMetadata {
            original_name: Some(name.into()),
            ..MediaMetadata::default()
        }
    }

    #[tokio::test]
    async fn store_and_read_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = LocalMediaStore::new(tmp.path());
        let entry = store.store(b"hello", named("notes.txt")).await.unwrap();
        assert!(entry.path.exists());
        assert!(entry.file_name.ends_with(".txt"));
        assert_eq!(entry.metadata.size_bytes, Some(5));
        assert_eq!(entry.metadata.mime_type.as_deref(), Some("text/plain"));
        assert_eq!(entry.metadata.original_name.as_deref(), Some("notes.txt"));

        let (found, data) = store.read(&entry.file_name).await.unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(found.id, entry.id);
    }

    #[tokio::test]
    async fn store_uses_uuid_names_and_default_extension() {
        let tmp = TempDir::new().unwrap();
        let store = LocalMediaStore::new(tmp.path());
        let a = store.store(b"x", MediaMetadata::default()).await.unwrap();
        let b = store.store(b"x", named("weird.t@r!")).await.unwrap();

        assert!(a.file_name.ends_with(".bin"));
        assert!(b.file_name.ends_with(".tr"));
        assert!(uuid::Uuid::parse_str(&a.id.0).is_ok());
        assert_ne!(a.file_name, b.file_name);
    }

    #[tokio::test]
    async fn store_rejects_oversized_payload() {
        let tmp = TempDir::new().unwrap();
        let store = LocalMediaStore::new(tmp.path()).with_max_bytes(4);
        let err = store.store(b"12345", named("a.txt")).await.unwrap_err();
        assert!(matches!(err, MediaError::TooLarge { size: 5, max: 4 }));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_rejects_traversal_names() {
        let tmp = TempDir::new().unwrap();
        let store = LocalMediaStore::new(tmp.path());
        for bad in ["", "../etc/passwd", "a/b.txt", "a\\b.txt", ".hidden", "x..y"] {
            let err = store.open(bad).await.unwrap_err();
            assert!(matches!(err, MediaError::InvalidName(_)), "{bad:?} should be invalid");
        }
    }

    #[tokio::test]
    async fn open_missing_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = LocalMediaStore::new(tmp.path());
        let err = store.open("missing.png").await.unwrap_err();
        assert!(matches!(err, MediaError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let tmp = TempDir::new().unwrap();
        let store = LocalMediaStore::new(tmp.path());
        let entry = store.store(b"data", named("rm.bin")).await.unwrap();
        assert!(entry.path.exists());

        store.delete(&entry.file_name).await.unwrap();
        assert!(!entry.path.exists());
        assert!(matches!(
            store.delete(&entry.file_name).await.unwrap_err(),
            MediaError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn list_returns_stored_entries_only() {
        let tmp = TempDir::new().unwrap();
        let store = LocalMediaStore::new(tmp.path());
        store.store(b"one", named("a.bin")).await.unwrap();
        store.store(b"two", named("b.png")).await.unwrap();
        tokio::fs::write(tmp.path().join(".stray.part"), b"partial")
            .await
            .unwrap();
        tokio::fs::create_dir(tmp.path().join("subdir")).await.unwrap();

        let entries = store.list().await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn list_on_missing_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = LocalMediaStore::new(&tmp.path().join("never-created"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[test]
    fn extension_sanitization() {
        assert_eq!(sanitized_extension(Some("photo.JPG")), "jpg");
        assert_eq!(sanitized_extension(Some("noext")), "bin");
        assert_eq!(sanitized_extension(None), "bin");
        assert_eq!(
            sanitized_extension(Some("a.abcdefghijklmnop")),
            "abcdefghij"
        );
    }
}
