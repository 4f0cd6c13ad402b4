//! Persistent vector store: a SQLite database inside an index directory it
//! owns.
//!
//! The directory is the unit of existence — "exists and non-empty" is how
//! the index manager distinguishes a usable store from a fresh one. The
//! database holds chunk text/metadata, one embedding BLOB per chunk, and a
//! `meta` row recording the embedding model the store was built under.
//! All mutations are transactional: a reader sees the pre-write or
//! post-write state, never a torn one (WAL snapshot isolation), and a
//! failed `create` removes the directory so a later `open` cannot mistake
//! the leftovers for a valid store.
//!
//! Embedding compatibility is checked lazily on `add`/`search`, not on
//! `open` — a store built under a different embedding model surfaces as
//! [`StoreError::Incompatible`] at first use.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

use crate::embedding::{self, Embedder};
use crate::error::StoreError;
use crate::models::{Chunk, ScoredChunk};

/// Chunks per embedding request.
const EMBED_BATCH: usize = 64;

const DB_FILE: &str = "index.db";

#[derive(Debug)]
pub struct VectorStore {
    pool: SqlitePool,
    dir: PathBuf,
    embedding_model: String,
    dims: usize,
}

impl VectorStore {
    /// Open an existing store. Succeeds only if `dir` exists, is non-empty,
    /// and contains a readable database with a committed `meta` row; every
    /// other condition maps to [`StoreError::NotFound`].
    pub async fn open(dir: &Path) -> Result<Self, StoreError> {
        if !dir_has_content(dir) {
            return Err(StoreError::NotFound);
        }

        let pool = match connect(&dir.join(DB_FILE), false).await {
            Ok(pool) => pool,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "index directory present but unreadable");
                return Err(StoreError::NotFound);
            }
        };

        let meta = sqlx::query("SELECT embedding_model, dims FROM meta LIMIT 1")
            .fetch_optional(&pool)
            .await;

        match meta {
            Ok(Some(row)) => {
                let embedding_model: String = row.get("embedding_model");
                let dims: i64 = row.get("dims");
                debug!(dir = %dir.display(), model = %embedding_model, dims, "opened vector store");
                Ok(VectorStore {
                    pool,
                    dir: dir.to_path_buf(),
                    embedding_model,
                    dims: dims as usize,
                })
            }
            Ok(None) => {
                pool.close().await;
                Err(StoreError::NotFound)
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "index database has no usable meta table");
                pool.close().await;
                Err(StoreError::NotFound)
            }
        }
    }

    /// Create a fresh store at `dir` from a non-empty chunk sequence,
    /// replacing whatever was there. On failure the directory is removed so
    /// no partial store survives.
    pub async fn create(
        dir: &Path,
        chunks: &[Chunk],
        embedder: &dyn Embedder,
    ) -> Result<Self, StoreError> {
        if chunks.is_empty() {
            return Err(StoreError::CreateFailed(
                "refusing to create an empty store".to_string(),
            ));
        }

        let vectors = embed_chunks(chunks, embedder)
            .await
            .map_err(|e| StoreError::CreateFailed(e.to_string()))?;
        let dims = vectors.first().map(|v| v.len()).unwrap_or(0);
        if dims == 0 {
            return Err(StoreError::CreateFailed(
                "embedding backend returned empty vectors".to_string(),
            ));
        }

        if dir.exists() {
            std::fs::remove_dir_all(dir)
                .map_err(|e| StoreError::CreateFailed(e.to_string()))?;
        }
        std::fs::create_dir_all(dir).map_err(|e| StoreError::CreateFailed(e.to_string()))?;

        match Self::create_inner(dir, chunks, &vectors, embedder.model_name(), dims).await {
            Ok(store) => Ok(store),
            Err(e) => {
                // leave nothing a later open() could mistake for a store
                if let Err(cleanup) = std::fs::remove_dir_all(dir) {
                    warn!(dir = %dir.display(), error = %cleanup, "could not clean up failed store");
                }
                Err(StoreError::CreateFailed(e.to_string()))
            }
        }
    }

    async fn create_inner(
        dir: &Path,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        model: &str,
        dims: usize,
    ) -> anyhow::Result<Self> {
        let pool = connect(&dir.join(DB_FILE), true).await?;
        migrate(&pool).await?;

        let mut tx = pool.begin().await?;
        sqlx::query("INSERT INTO meta (embedding_model, dims, created_at) VALUES (?, ?, ?)")
            .bind(model)
            .bind(dims as i64)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;
        insert_rows(&mut tx, chunks, vectors).await?;
        tx.commit().await?;

        debug!(dir = %dir.display(), chunks = chunks.len(), "created vector store");
        Ok(VectorStore {
            pool,
            dir: dir.to_path_buf(),
            embedding_model: model.to_string(),
            dims,
        })
    }

    /// Append chunks to an open store. Atomic with respect to readers; on
    /// failure the pre-add content is untouched.
    pub async fn add(&self, chunks: &[Chunk], embedder: &dyn Embedder) -> Result<usize, StoreError> {
        self.compatible_with(embedder)?;
        if chunks.is_empty() {
            return Ok(0);
        }

        let vectors = embed_chunks(chunks, embedder)
            .await
            .map_err(|e| StoreError::AddFailed(e.to_string()))?;
        self.check_dims(&vectors)?;

        let result: anyhow::Result<()> = async {
            let mut tx = self.pool.begin().await?;
            insert_rows(&mut tx, chunks, &vectors).await?;
            tx.commit().await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => Ok(chunks.len()),
            Err(e) => Err(StoreError::AddFailed(e.to_string())),
        }
    }

    /// Nearest-neighbor search by cosine similarity, descending relevance.
    /// Returns fewer than `k` results when the store holds fewer chunks.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        embedder: &dyn Embedder,
    ) -> anyhow::Result<Vec<ScoredChunk>> {
        self.compatible_with(embedder)?;
        let query_vec = embedding::embed_query(embedder, query).await?;
        if query_vec.len() != self.dims {
            return Err(StoreError::Incompatible {
                stored: format!("{} ({} dims)", self.embedding_model, self.dims),
                configured: format!("{} ({} dims)", embedder.model_name(), query_vec.len()),
            }
            .into());
        }

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.source_path, c.chunk_index, c.start_offset, c.text, c.hash,
                   v.embedding
            FROM vectors v
            JOIN chunks c ON c.id = v.chunk_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = embedding::blob_to_vec(&blob);
                let offset: i64 = row.get("start_offset");
                ScoredChunk {
                    chunk: Chunk {
                        id: row.get("id"),
                        source_path: row.get("source_path"),
                        chunk_index: row.get("chunk_index"),
                        offset: offset as usize,
                        text: row.get("text"),
                        hash: row.get("hash"),
                    },
                    score: embedding::cosine_similarity(&query_vec, &vec),
                }
            })
            .collect();

        // Sort: score desc, id asc (deterministic)
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk.id.cmp(&b.chunk.id))
        });
        scored.truncate(k);

        Ok(scored)
    }

    /// Number of chunks currently stored.
    pub async fn chunk_count(&self) -> anyhow::Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Cheap compatibility probe: the store records the embedding model it
    /// was built under, and refuses any other.
    pub fn compatible_with(&self, embedder: &dyn Embedder) -> Result<(), StoreError> {
        if embedder.model_name() != self.embedding_model {
            return Err(StoreError::Incompatible {
                stored: self.embedding_model.clone(),
                configured: embedder.model_name().to_string(),
            });
        }
        Ok(())
    }

    fn check_dims(&self, vectors: &[Vec<f32>]) -> Result<(), StoreError> {
        if let Some(v) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(StoreError::Incompatible {
                stored: format!("{} ({} dims)", self.embedding_model, self.dims),
                configured: format!("{} ({} dims)", self.embedding_model, v.len()),
            });
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }
}

fn dir_has_content(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_some(),
        Err(_) => false,
    }
}

async fn connect(db_path: &Path, create: bool) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(create)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            embedding_model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            source_path TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            start_offset INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            chunk_id TEXT PRIMARY KEY,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_path)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn embed_chunks(chunks: &[Chunk], embedder: &dyn Embedder) -> anyhow::Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(EMBED_BATCH) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        vectors.extend(embedder.embed(&texts).await?);
    }
    if vectors.len() != chunks.len() {
        anyhow::bail!(
            "embedding backend returned {} vectors for {} chunks",
            vectors.len(),
            chunks.len()
        );
    }
    Ok(vectors)
}

async fn insert_rows(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
) -> anyhow::Result<()> {
    for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
        sqlx::query(
            "INSERT INTO chunks (id, source_path, chunk_index, start_offset, text, hash) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.source_path)
        .bind(chunk.chunk_index)
        .bind(chunk.offset as i64)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut **tx)
        .await?;

        sqlx::query("INSERT INTO vectors (chunk_id, embedding) VALUES (?, ?)")
            .bind(&chunk.id)
            .bind(embedding::vec_to_blob(vector))
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}
