//! Uploaded-file store: bytes on disk, metadata in sled.
//!
//! Uploads are streamed straight to disk (never fully buffered) under
//! a random 128-bit file ID. Each entry also carries a random 96-bit
//! share key; a download URL holding the key authorizes retrieval
//! without a bearer credential.

use std::path::{Path, PathBuf};

use meshchat_types::{FileRecord, MeshError, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

const FILES_TREE: &str = "files";

/// Default cap applied when a caller passes `limit == 0` to
/// [`FileStore::list`].
const DEFAULT_LIST_LIMIT: usize = 50;

// ---------------------------------------------------------------------------
// FileEntry
// ---------------------------------------------------------------------------

/// Stored file metadata including the on-disk path.
///
/// Only [`FileRecord`] (without the path) leaves the store; the path
/// stays an implementation detail of this module and its readers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileEntry {
    /// The UI-visible metadata.
    #[serde(flatten)]
    pub record: FileRecord,
    /// Location of the bytes on disk.
    pub path: PathBuf,
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// Persists uploads on disk and records their metadata in sled.
pub struct FileStore {
    db: sled::Db,
    tree: sled::Tree,
    dir: PathBuf,
}

impl FileStore {
    /// Opens (or creates) the metadata database and the upload
    /// directory.
    pub fn open(db_path: impl AsRef<Path>, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(MeshError::storage)?;
        let db = sled::open(db_path).map_err(MeshError::storage)?;
        let tree = db.open_tree(FILES_TREE).map_err(MeshError::storage)?;
        Ok(Self { db, tree, dir })
    }

    /// Streams `src` to disk and persists a metadata entry.
    ///
    /// The name is reduced to its basename; an empty or root-only name
    /// falls back to `upload.bin`. The MIME type is sniffed from the
    /// first 512 bytes of the stored file.
    pub async fn save<R>(
        &self,
        original_name: &str,
        uploader: &str,
        src: &mut R,
    ) -> Result<FileRecord>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut name = sanitize_file_name(original_name);
        if name.is_empty() {
            name = "upload.bin".to_string();
        }
        let id = new_file_id();
        let path = self.dir.join(&id);

        let mut dst = tokio::fs::File::create(&path)
            .await
            .map_err(MeshError::storage)?;
        let size = tokio::io::copy(src, &mut dst)
            .await
            .map_err(MeshError::storage)?;
        drop(dst);

        let mime = detect_mime(&path).await;

        let entry = FileEntry {
            record: FileRecord {
                id: id.clone(),
                name,
                size: size as i64,
                uploader: uploader.to_string(),
                mime,
                share_key: new_share_key(),
                created_at: chrono::Utc::now(),
            },
            path,
        };

        let value = serde_json::to_vec(&entry).map_err(MeshError::storage)?;
        self.tree
            .insert(id.as_bytes(), value)
            .map_err(MeshError::storage)?;
        Ok(entry.record)
    }

    /// Returns up to `limit` records, newest first.
    pub fn list(&self, limit: usize) -> Result<Vec<FileRecord>> {
        let limit = if limit == 0 { DEFAULT_LIST_LIMIT } else { limit };
        let mut records = Vec::new();
        for item in self.tree.iter() {
            let (_, value) = item.map_err(MeshError::storage)?;
            match serde_json::from_slice::<FileEntry>(&value) {
                Ok(entry) => records.push(entry.record),
                Err(e) => tracing::warn!(error = %e, "skipping undecodable file entry"),
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }

    /// Fetches the full entry for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::NotFound`] if the ID is unknown.
    pub fn get(&self, id: &str) -> Result<FileEntry> {
        let value = self
            .tree
            .get(id.as_bytes())
            .map_err(MeshError::storage)?
            .ok_or_else(|| MeshError::NotFound {
                reason: format!("file {id}"),
            })?;
        serde_json::from_slice(&value).map_err(MeshError::storage)
    }

    /// Fetches the entry for `id` together with an open readable
    /// handle on its bytes.
    pub async fn open_file(&self, id: &str) -> Result<(FileEntry, tokio::fs::File)> {
        let entry = self.get(id)?;
        let file = tokio::fs::File::open(&entry.path)
            .await
            .map_err(|e| MeshError::NotFound {
                reason: format!("file {id} bytes missing: {e}"),
            })?;
        Ok((entry, file))
    }

    /// Flushes and releases the database handle. Idempotent.
    pub fn close(&self) {
        if let Err(e) = self.db.flush() {
            tracing::warn!(error = %e, "file store flush failed on close");
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Reduces an upload name to a safe basename; empty for unusable
/// names (bare separators, `.`, `..`).
fn sanitize_file_name(name: &str) -> String {
    let trimmed = name.trim();
    let base = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if base.is_empty() || base == "." || base == ".." {
        return String::new();
    }
    base.to_string()
}

fn new_file_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn new_share_key() -> String {
    let mut bytes = [0u8; 12];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Sniffs a MIME type from the first 512 bytes of `path`.
async fn detect_mime(path: &Path) -> String {
    let Ok(mut file) = tokio::fs::File::open(path).await else {
        return String::new();
    };
    let mut head = [0u8; 512];
    let n = file.read(&mut head).await.unwrap_or(0);
    match infer::get(&head[..n]) {
        Some(kind) => kind.mime_type().to_string(),
        None if head[..n].is_empty() => String::new(),
        None if std::str::from_utf8(&head[..n]).is_ok() => {
            "text/plain; charset=utf-8".to_string()
        }
        None => "application/octet-stream".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::open(dir.path().join("files.db"), dir.path().join("files"))
            .expect("open file store");
        (dir, store)
    }

    #[tokio::test]
    async fn save_streams_and_records_metadata() -> Result<()> {
        let (_dir, store) = store().await;
        let mut src: &[u8] = b"hello file contents";
        let record = store.save("report.txt", "alice", &mut src).await?;

        assert_eq!(record.name, "report.txt");
        assert_eq!(record.size, 19);
        assert_eq!(record.uploader, "alice");
        assert_eq!(record.id.len(), 32);
        assert_eq!(record.share_key.len(), 24);
        assert!(record.mime.starts_with("text/plain"));
        Ok(())
    }

    #[tokio::test]
    async fn save_strips_path_components() -> Result<()> {
        let (_dir, store) = store().await;
        let mut src: &[u8] = b"x";
        let record = store.save("../../etc/passwd", "mallory", &mut src).await?;
        assert_eq!(record.name, "passwd");
        Ok(())
    }

    #[tokio::test]
    async fn unusable_name_falls_back() -> Result<()> {
        let (_dir, store) = store().await;
        let mut src: &[u8] = b"x";
        let record = store.save("..", "alice", &mut src).await?;
        assert_eq!(record.name, "upload.bin");
        Ok(())
    }

    #[tokio::test]
    async fn open_returns_saved_bytes() -> Result<()> {
        let (_dir, store) = store().await;
        let mut src: &[u8] = b"roundtrip bytes";
        let record = store.save("data.bin", "bob", &mut src).await?;

        let (entry, mut file) = store.open_file(&record.id).await?;
        assert_eq!(entry.record.size, 15);
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await.expect("read back");
        assert_eq!(contents, b"roundtrip bytes");
        Ok(())
    }

    #[tokio::test]
    async fn list_is_newest_first_and_capped() -> Result<()> {
        let (_dir, store) = store().await;
        for i in 0..5 {
            let mut src: &[u8] = b"x";
            store.save(&format!("f{i}.txt"), "alice", &mut src).await?;
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let listed = store.list(3)?;
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].name, "f4.txt");
        assert_eq!(listed[2].name, "f2.txt");
        Ok(())
    }

    #[tokio::test]
    async fn missing_id_is_not_found() {
        let (_dir, store) = store().await;
        let err = store.get("deadbeef").unwrap_err();
        assert!(matches!(err, MeshError::NotFound { .. }));
    }

    #[test]
    fn sanitize_rejects_root_tokens() {
        assert_eq!(sanitize_file_name("notes.txt"), "notes.txt");
        assert_eq!(sanitize_file_name("a/b/c.txt"), "c.txt");
        assert_eq!(sanitize_file_name(r"a\b\c.txt"), "c.txt");
        assert_eq!(sanitize_file_name("/"), "");
        assert_eq!(sanitize_file_name("."), "");
        assert_eq!(sanitize_file_name("  "), "");
    }
}
