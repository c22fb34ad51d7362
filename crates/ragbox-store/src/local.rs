//! Filesystem-backed document store.

use ragbox_core::{Chunk, DocRecord, DocStats, StoreError};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

const META_FILE: &str = "meta.json";
const CHUNKS_FILE: &str = "chunks.jsonl";
const EMBEDDINGS_FILE: &str = "embeddings.bin";

/// A source file copied into the staging area.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub path: PathBuf,
    pub bytes_written: u64,
}

/// Per-document folder store rooted at `<root>/rag/`.
///
/// The store is the only writer to each document folder at a given time;
/// callers enforce this by uniquely keying index workers on the document id.
pub struct LocalRagStore {
    root: PathBuf,
}

impl LocalRagStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn docs_dir(&self) -> PathBuf {
        self.root.join("rag").join("docs")
    }

    pub fn doc_dir(&self, doc_id: Uuid) -> PathBuf {
        self.docs_dir().join(doc_id.to_string())
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("rag").join("staging")
    }

    fn chunks_path(&self, doc_id: Uuid) -> PathBuf {
        self.doc_dir(doc_id).join(CHUNKS_FILE)
    }

    fn embeddings_path(&self, doc_id: Uuid) -> PathBuf {
        self.doc_dir(doc_id).join(EMBEDDINGS_FILE)
    }

    /// Create the store directories.
    pub async fn init(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(self.docs_dir()).await?;
        tokio::fs::create_dir_all(self.staging_dir()).await?;
        Ok(())
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Atomically write `meta.json` for a document.
    pub async fn write_meta(&self, record: &DocRecord) -> Result<(), StoreError> {
        let dir = self.doc_dir(record.doc_id);
        tokio::fs::create_dir_all(&dir).await?;
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&dir.join(META_FILE), &json).await?;
        debug!("wrote meta for {} ({:?})", record.doc_id, record.status);
        Ok(())
    }

    pub async fn read_meta(&self, doc_id: Uuid) -> Result<DocRecord, StoreError> {
        let path = self.doc_dir(doc_id).join(META_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(doc_id))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    // ========================================================================
    // Chunks & embeddings
    // ========================================================================

    /// Atomically write `chunks.jsonl`, one JSON object per line, in order.
    pub async fn write_chunks(&self, doc_id: Uuid, chunks: &[Chunk]) -> Result<(), StoreError> {
        let mut out = Vec::new();
        for chunk in chunks {
            serde_json::to_writer(&mut out, chunk)?;
            out.push(b'\n');
        }
        let dir = self.doc_dir(doc_id);
        tokio::fs::create_dir_all(&dir).await?;
        write_atomic(&dir.join(CHUNKS_FILE), &out).await?;
        Ok(())
    }

    pub async fn read_chunks(&self, doc_id: Uuid) -> Result<Vec<Chunk>, StoreError> {
        let bytes = tokio::fs::read(self.chunks_path(doc_id)).await?;
        let text = String::from_utf8_lossy(&bytes);
        let mut chunks = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            chunks.push(serde_json::from_str(line)?);
        }
        Ok(chunks)
    }

    /// Atomically write the packed embedding buffer.
    pub async fn write_embeddings(&self, doc_id: Uuid, packed: &[u8]) -> Result<(), StoreError> {
        let dir = self.doc_dir(doc_id);
        tokio::fs::create_dir_all(&dir).await?;
        write_atomic(&dir.join(EMBEDDINGS_FILE), packed).await
    }

    pub async fn read_embeddings(&self, doc_id: Uuid) -> Result<Vec<u8>, StoreError> {
        Ok(tokio::fs::read(self.embeddings_path(doc_id)).await?)
    }

    /// Last-modified times of `(chunks.jsonl, embeddings.bin)`, the cache
    /// coherency tokens for this document.
    pub async fn file_mtimes(&self, doc_id: Uuid) -> Result<(SystemTime, SystemTime), StoreError> {
        let chunks = tokio::fs::metadata(self.chunks_path(doc_id))
            .await?
            .modified()?;
        let embeddings = tokio::fs::metadata(self.embeddings_path(doc_id))
            .await?
            .modified()?;
        Ok((chunks, embeddings))
    }

    // ========================================================================
    // Enumeration & stats
    // ========================================================================

    /// All readable document records, sorted by creation time descending.
    ///
    /// Unreadable folders are skipped with a warning, never raised.
    pub async fn list_docs(&self) -> Vec<DocRecord> {
        let mut records = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.docs_dir()).await {
            Ok(entries) => entries,
            Err(_) => return records,
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let meta_path = dir.join(META_FILE);
            match tokio::fs::read(&meta_path).await {
                Ok(bytes) => match serde_json::from_slice::<DocRecord>(&bytes) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!("skipping unreadable meta {:?}: {}", meta_path, e),
                },
                Err(e) => warn!("skipping doc folder {:?}: {}", dir, e),
            }
        }

        records.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        records
    }

    /// Size accounting for one document folder.
    pub async fn doc_stats(&self, doc_id: Uuid) -> Result<DocStats, StoreError> {
        let dir = self.doc_dir(doc_id);
        if !dir.is_dir() {
            return Err(StoreError::NotFound(doc_id));
        }

        let chunk_count = match tokio::fs::read(self.chunks_path(doc_id)).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes)
                .lines()
                .filter(|l| !l.trim().is_empty())
                .count() as u64,
            Err(_) => 0,
        };

        let embedding_bytes = tokio::fs::metadata(self.embeddings_path(doc_id))
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        let mut total_bytes = 0u64;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Ok(meta) = entry.metadata().await {
                total_bytes += meta.len();
            }
        }

        Ok(DocStats {
            chunk_count,
            embedding_bytes,
            total_bytes,
        })
    }

    // ========================================================================
    // Deletion & cleanup
    // ========================================================================

    /// Remove a document folder recursively. Idempotent.
    pub async fn delete_doc(&self, doc_id: Uuid) -> Result<(), StoreError> {
        let dir = self.doc_dir(doc_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!("deleted doc {}", doc_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every document folder.
    pub async fn delete_all(&self) -> Result<(), StoreError> {
        let mut entries = match tokio::fs::read_dir(self.docs_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.path().is_dir() {
                tokio::fs::remove_dir_all(entry.path()).await?;
            }
        }
        Ok(())
    }

    /// Discard stray `.tmp` files in a document folder, left behind by an
    /// interrupted write.
    pub async fn discard_tmp(&self, doc_id: Uuid) -> Result<(), StoreError> {
        let dir = self.doc_dir(doc_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "tmp") {
                warn!("discarding stale tmp file {:?}", path);
                tokio::fs::remove_file(&path).await.ok();
            }
        }
        Ok(())
    }

    // ========================================================================
    // Staging
    // ========================================================================

    /// Copy a source stream into the staging area under the document id.
    ///
    /// Fails when the stream exceeds `cap_bytes`; long-running workers read
    /// from the staged copy, never from the original provider.
    pub async fn stage_stream(
        &self,
        doc_id: Uuid,
        extension: Option<&str>,
        mut reader: Box<dyn AsyncRead + Send + Unpin>,
        cap_bytes: u64,
    ) -> Result<StagedFile, StoreError> {
        tokio::fs::create_dir_all(self.staging_dir()).await?;

        let name = match extension {
            Some(ext) if !ext.is_empty() => format!("{doc_id}.{ext}"),
            _ => doc_id.to_string(),
        };
        let path = self.staging_dir().join(name);

        let mut file = tokio::fs::File::create(&path).await?;
        let mut written = 0u64;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            written += n as u64;
            if written > cap_bytes {
                drop(file);
                tokio::fs::remove_file(&path).await.ok();
                return Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("source exceeds staging cap of {cap_bytes} bytes"),
                )));
            }
            file.write_all(&buf[..n]).await?;
        }
        file.sync_all().await?;

        Ok(StagedFile {
            path,
            bytes_written: written,
        })
    }

    /// Best-effort removal of a staged file, but only when it actually lives
    /// inside the staging area.
    pub async fn remove_staged(&self, path: &Path) {
        if path.starts_with(self.staging_dir()) {
            if let Err(e) = tokio::fs::remove_file(path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!("could not remove staged file {:?}: {}", path, e);
                }
            }
        }
    }

    /// Remove the whole staging area.
    pub async fn clear_staging(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_dir_all(self.staging_dir()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write bytes to a sibling `.tmp`, fsync, then rename over the target.
///
/// Falls back to copy-then-delete when the rename fails (cross-filesystem
/// moves).
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    let tmp = path.with_file_name(format!("{file_name}.tmp"));

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    match tokio::fs::rename(&tmp, path).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            warn!(
                "rename {:?} -> {:?} failed ({}), falling back to copy",
                tmp, path, rename_err
            );
            tokio::fs::copy(&tmp, path).await?;
            tokio::fs::remove_file(&tmp).await.ok();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragbox_core::DocStatus;
    use tempfile::tempdir;

    fn record(created_at_ms: i64) -> DocRecord {
        DocRecord::new_indexing(
            "file:///tmp/source.txt".to_string(),
            "source.txt".to_string(),
            "text/plain".to_string(),
            128,
            created_at_ms,
        )
    }

    fn chunks(n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|i| Chunk {
                chunk_id: format!("c{i}"),
                chunk_index: i as u32,
                text: format!("chunk text {i}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_meta_round_trip() {
        let dir = tempdir().unwrap();
        let store = LocalRagStore::new(dir.path());
        store.init().await.unwrap();

        let rec = record(1000);
        store.write_meta(&rec).await.unwrap();

        let back = store.read_meta(rec.doc_id).await.unwrap();
        assert_eq!(back, rec);

        // Pretty-printed, camelCase wire keys
        let raw = std::fs::read_to_string(store.doc_dir(rec.doc_id).join("meta.json")).unwrap();
        assert!(raw.contains("\"docId\""));
        assert!(raw.contains('\n'));
    }

    #[tokio::test]
    async fn test_read_meta_missing() {
        let dir = tempdir().unwrap();
        let store = LocalRagStore::new(dir.path());
        let id = Uuid::new_v4();
        match store.read_meta(id).await.unwrap_err() {
            StoreError::NotFound(missing) => assert_eq!(missing, id),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_chunks_round_trip_preserves_order() {
        let dir = tempdir().unwrap();
        let store = LocalRagStore::new(dir.path());
        store.init().await.unwrap();

        let id = Uuid::new_v4();
        let written = chunks(5);
        store.write_chunks(id, &written).await.unwrap();

        let back = store.read_chunks(id).await.unwrap();
        assert_eq!(back, written);
        for (i, c) in back.iter().enumerate() {
            assert_eq!(c.chunk_index as usize, i);
        }
    }

    #[tokio::test]
    async fn test_embeddings_round_trip() {
        let dir = tempdir().unwrap();
        let store = LocalRagStore::new(dir.path());
        store.init().await.unwrap();

        let id = Uuid::new_v4();
        let packed = ragbox_core::vector::pack_f32_le(&[1.0, -2.5, 3.25]);
        store.write_embeddings(id, &packed).await.unwrap();

        let back = store.read_embeddings(id).await.unwrap();
        assert_eq!(back, packed);
    }

    #[tokio::test]
    async fn test_atomic_write_leaves_no_tmp() {
        let dir = tempdir().unwrap();
        let store = LocalRagStore::new(dir.path());
        store.init().await.unwrap();

        let rec = record(1);
        store.write_meta(&rec).await.unwrap();
        store.write_meta(&rec).await.unwrap(); // overwrite path

        let doc_dir = store.doc_dir(rec.doc_id);
        let names: Vec<String> = std::fs::read_dir(&doc_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.ends_with(".tmp")), "{names:?}");
    }

    #[tokio::test]
    async fn test_list_docs_sorted_desc_and_skips_garbage() {
        let dir = tempdir().unwrap();
        let store = LocalRagStore::new(dir.path());
        store.init().await.unwrap();

        let older = record(100);
        let newer = record(200);
        store.write_meta(&older).await.unwrap();
        store.write_meta(&newer).await.unwrap();

        // A folder with an unparsable meta.json must be skipped, not raised
        let bad_dir = store.docs_dir().join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(&bad_dir).unwrap();
        std::fs::write(bad_dir.join("meta.json"), "{ not json").unwrap();

        // And a folder with no meta at all
        let empty_dir = store.docs_dir().join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(&empty_dir).unwrap();

        let docs = store.list_docs().await;
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].doc_id, newer.doc_id);
        assert_eq!(docs[1].doc_id, older.doc_id);
    }

    #[tokio::test]
    async fn test_doc_stats() {
        let dir = tempdir().unwrap();
        let store = LocalRagStore::new(dir.path());
        store.init().await.unwrap();

        let rec = record(1);
        store.write_meta(&rec).await.unwrap();
        store.write_chunks(rec.doc_id, &chunks(3)).await.unwrap();
        let packed = vec![0u8; 3 * 8 * 4]; // three 8-dim vectors
        store.write_embeddings(rec.doc_id, &packed).await.unwrap();

        let stats = store.doc_stats(rec.doc_id).await.unwrap();
        assert_eq!(stats.chunk_count, 3);
        assert_eq!(stats.embedding_bytes, 3 * 8 * 4);
        assert!(stats.total_bytes >= stats.embedding_bytes);
        assert_eq!(stats.inferred_dim(), Some(8));
    }

    #[tokio::test]
    async fn test_delete_doc_idempotent() {
        let dir = tempdir().unwrap();
        let store = LocalRagStore::new(dir.path());
        store.init().await.unwrap();

        let rec = record(1);
        store.write_meta(&rec).await.unwrap();
        store.delete_doc(rec.doc_id).await.unwrap();
        store.delete_doc(rec.doc_id).await.unwrap();

        assert!(store.list_docs().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_all() {
        let dir = tempdir().unwrap();
        let store = LocalRagStore::new(dir.path());
        store.init().await.unwrap();

        store.write_meta(&record(1)).await.unwrap();
        store.write_meta(&record(2)).await.unwrap();
        store.delete_all().await.unwrap();

        assert!(store.list_docs().await.is_empty());
    }

    #[tokio::test]
    async fn test_file_mtimes_change_on_rewrite() {
        let dir = tempdir().unwrap();
        let store = LocalRagStore::new(dir.path());
        store.init().await.unwrap();

        let id = Uuid::new_v4();
        store.write_chunks(id, &chunks(1)).await.unwrap();
        store.write_embeddings(id, &[0u8; 16]).await.unwrap();
        let (chunks_m1, emb_m1) = store.file_mtimes(id).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        store.write_chunks(id, &chunks(2)).await.unwrap();
        store.write_embeddings(id, &[0u8; 32]).await.unwrap();
        let (chunks_m2, emb_m2) = store.file_mtimes(id).await.unwrap();

        assert!(chunks_m2 >= chunks_m1);
        assert!(emb_m2 >= emb_m1);
        assert!(chunks_m2 != chunks_m1 || emb_m2 != emb_m1);
    }

    #[tokio::test]
    async fn test_discard_tmp() {
        let dir = tempdir().unwrap();
        let store = LocalRagStore::new(dir.path());
        store.init().await.unwrap();

        let rec = record(1);
        store.write_meta(&rec).await.unwrap();
        let stray = store.doc_dir(rec.doc_id).join("embeddings.bin.tmp");
        std::fs::write(&stray, [0u8; 8]).unwrap();

        store.discard_tmp(rec.doc_id).await.unwrap();
        assert!(!stray.exists());
        // meta.json untouched
        assert!(store.read_meta(rec.doc_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_stage_stream_and_cap() {
        let dir = tempdir().unwrap();
        let store = LocalRagStore::new(dir.path());
        store.init().await.unwrap();

        let id = Uuid::new_v4();
        let data = b"staged bytes".to_vec();
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(std::io::Cursor::new(data));
        let staged = store
            .stage_stream(id, Some("txt"), reader, 1024)
            .await
            .unwrap();
        assert_eq!(staged.bytes_written, 12);
        assert!(staged.path.exists());
        assert!(staged.path.to_string_lossy().ends_with(".txt"));

        // Over the cap: rejected and cleaned up
        let big = vec![0u8; 100];
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(std::io::Cursor::new(big));
        let err = store
            .stage_stream(Uuid::new_v4(), None, reader, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }

    #[tokio::test]
    async fn test_remove_staged_only_inside_staging() {
        let dir = tempdir().unwrap();
        let store = LocalRagStore::new(dir.path());
        store.init().await.unwrap();

        // File outside the staging dir must survive
        let outside = dir.path().join("keep.txt");
        std::fs::write(&outside, "precious").unwrap();
        store.remove_staged(&outside).await;
        assert!(outside.exists());

        // File inside is removed
        let id = Uuid::new_v4();
        let reader: Box<dyn AsyncRead + Send + Unpin> =
            Box::new(std::io::Cursor::new(b"x".to_vec()));
        let staged = store.stage_stream(id, None, reader, 10).await.unwrap();
        store.remove_staged(&staged.path).await;
        assert!(!staged.path.exists());
    }
}
