//! The engine: index management and query entry points over shared state.
//!
//! Owns the live retrieval chain, generation backend, and session behind
//! swap points: a rebuild or model switch installs a *new* chain (and, for
//! a switch, a new generator and session) while queries already in flight
//! keep the `Arc`s they captured and finish against stale state rather
//! than being aborted. Locks are held only to clone or swap an `Arc`,
//! never across an await.
//!
//! `rebuild_index` is the index manager. Its policy: documents are
//! additive, so re-running indexing never discards a working index because
//! new input is empty or malformed; only a genuinely unrecoverable state
//! (no documents and no index, or store creation failure) fails the
//! rebuild — and even that keeps the process running.

use anyhow::Result;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::chain::RetrievalChain;
use crate::chunk;
use crate::config::Config;
use crate::embedding::{Embedder, OllamaEmbedder};
use crate::error::{IndexError, StoreError};
use crate::llm::{Generator, OllamaGenerator};
use crate::loader;
use crate::models::QueryMode;
use crate::query::{self, AnswerStream, QueryJob};
use crate::session::Session;
use crate::store::VectorStore;

/// Result of one rebuild attempt, reportable as a human-readable status
/// string.
#[derive(Debug)]
pub enum RebuildOutcome {
    /// A fresh store was created from the loaded documents.
    Created { chunks: usize },
    /// New chunks were appended to the existing store.
    Updated { chunks: usize },
    /// Nothing new to index; the existing store was reused unchanged.
    Reused,
    /// Appending failed; the pre-existing index is still being served.
    PartialAdd { cause: String },
    /// No usable index could be produced this attempt.
    Failed(IndexError),
}

impl RebuildOutcome {
    pub fn message(&self) -> String {
        match self {
            RebuildOutcome::Created { chunks } => {
                format!("index created ({} chunks)", chunks)
            }
            RebuildOutcome::Updated { chunks } => {
                format!("index updated ({} chunks added)", chunks)
            }
            RebuildOutcome::Reused => "no new documents, reused existing index".to_string(),
            RebuildOutcome::PartialAdd { cause } => format!(
                "failed to add new chunks ({}); continuing to serve the existing index",
                cause
            ),
            RebuildOutcome::Failed(err) => format!("failed: {}", err),
        }
    }

    pub fn is_ready(&self) -> bool {
        !matches!(self, RebuildOutcome::Failed(_))
    }
}

/// Snapshot of the engine's state for status reporting.
#[derive(Debug)]
pub struct EngineStatus {
    pub model: String,
    pub embedding_model: String,
    pub ready: bool,
    pub chunk_count: Option<i64>,
}

pub struct Engine {
    config: Config,
    embedder: Arc<dyn Embedder>,
    generator: RwLock<Arc<dyn Generator>>,
    chain: RwLock<Option<Arc<RetrievalChain>>>,
    session: RwLock<Arc<Session>>,
}

impl Engine {
    /// Engine over the configured Ollama backends.
    pub fn new(config: Config) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(&config.ollama)?);
        let generator: Arc<dyn Generator> =
            Arc::new(OllamaGenerator::new(&config.ollama, config.ollama.model.clone())?);
        Ok(Self::with_backends(config, embedder, generator))
    }

    /// Engine over caller-supplied backends (embedding/generation seams).
    pub fn with_backends(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let session = Arc::new(Session::new(generator.model_name()));
        Engine {
            config,
            embedder,
            generator: RwLock::new(generator),
            chain: RwLock::new(None),
            session: RwLock::new(session),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Rebuild or update the index and the retrieval chain over it.
    pub async fn rebuild_index(&self) -> RebuildOutcome {
        let documents = match loader::load_documents(&self.config.documents.dir) {
            Ok(docs) => docs,
            Err(e) => {
                warn!(error = %e, "document loading failed; treating as no documents");
                Vec::new()
            }
        };

        let chunks = chunk::split_documents(
            &documents,
            self.config.chunking.chunk_size,
            self.config.chunking.chunk_overlap,
        );

        if chunks.is_empty() {
            // nothing new: reuse the existing store if there is one
            return match VectorStore::open(&self.config.index.dir).await {
                Ok(store) => {
                    info!("no new documents, reusing existing index");
                    self.install_chain(Arc::new(store));
                    RebuildOutcome::Reused
                }
                Err(_) => RebuildOutcome::Failed(IndexError::NoDataAvailable),
            };
        }

        info!(
            documents = documents.len(),
            chunks = chunks.len(),
            "indexing loaded documents"
        );

        match VectorStore::open(&self.config.index.dir).await {
            Ok(store) => match store.add(&chunks, self.embedder.as_ref()).await {
                Ok(added) => {
                    self.install_chain(Arc::new(store));
                    RebuildOutcome::Updated { chunks: added }
                }
                Err(err @ StoreError::Incompatible { .. }) => {
                    if self.config.index.protect_on_mismatch {
                        RebuildOutcome::Failed(IndexError::IncompatibleIndex(err.to_string()))
                    } else {
                        warn!(error = %err, "existing index incompatible, recreating in place");
                        drop(store);
                        self.create_fresh(&chunks).await
                    }
                }
                Err(err) => {
                    // the pre-add store is still valid; keep serving it
                    warn!(error = %err, "could not append to index, serving previous content");
                    self.install_chain(Arc::new(store));
                    RebuildOutcome::PartialAdd {
                        cause: err.to_string(),
                    }
                }
            },
            Err(_) => self.create_fresh(&chunks).await,
        }
    }

    async fn create_fresh(&self, chunks: &[crate::models::Chunk]) -> RebuildOutcome {
        match VectorStore::create(&self.config.index.dir, chunks, self.embedder.as_ref()).await {
            Ok(store) => {
                self.install_chain(Arc::new(store));
                RebuildOutcome::Created {
                    chunks: chunks.len(),
                }
            }
            Err(err) => RebuildOutcome::Failed(IndexError::CreateFailed(err.to_string())),
        }
    }

    /// Every transition into a usable index rebuilds the retrieval chain;
    /// a chain is never reused across a store-handle change.
    fn install_chain(&self, store: Arc<VectorStore>) {
        let generator = self.generator.read().expect("engine lock").clone();
        let chain = RetrievalChain::new(
            store,
            self.embedder.clone(),
            generator,
            self.config.retrieval.k,
        );
        *self.chain.write().expect("engine lock") = Some(Arc::new(chain));
    }

    /// Answer a query through the retrieval chain (RAG mode).
    pub fn stream_answer(&self, query: &str) -> AnswerStream {
        self.stream_answer_mode(query, QueryMode::Retrieve)
    }

    /// Answer a query in an explicit mode. The job captures the current
    /// chain, generator, and session; later swaps do not affect it.
    pub fn stream_answer_mode(&self, query: &str, mode: QueryMode) -> AnswerStream {
        query::spawn_query(QueryJob {
            mode,
            query: query.to_string(),
            chain: self.chain.read().expect("engine lock").clone(),
            generator: self.generator.read().expect("engine lock").clone(),
            session: self.session.read().expect("engine lock").clone(),
        })
    }

    /// Switch the generation model: installs a new generator, a fresh
    /// session, and a chain rebuilt over the current store.
    pub fn switch_model(&self, model: &str) -> Result<()> {
        let generator: Arc<dyn Generator> =
            Arc::new(OllamaGenerator::new(&self.config.ollama, model)?);
        self.install_generator(generator);
        Ok(())
    }

    pub(crate) fn install_generator(&self, generator: Arc<dyn Generator>) {
        info!(model = generator.model_name(), "switching generation model");
        *self.session.write().expect("engine lock") =
            Arc::new(Session::new(generator.model_name()));
        *self.generator.write().expect("engine lock") = generator.clone();

        let mut chain = self.chain.write().expect("engine lock");
        if let Some(existing) = chain.as_ref() {
            *chain = Some(Arc::new(RetrievalChain::new(
                existing.store().clone(),
                self.embedder.clone(),
                generator,
                self.config.retrieval.k,
            )));
        }
    }

    /// Clear the conversation context, keeping the active model.
    pub fn reset_session(&self) {
        let model = self
            .session
            .read()
            .expect("engine lock")
            .model()
            .to_string();
        *self.session.write().expect("engine lock") = Arc::new(Session::new(model));
    }

    pub async fn status(&self) -> EngineStatus {
        let chain = self.chain.read().expect("engine lock").clone();
        let model = self
            .generator
            .read()
            .expect("engine lock")
            .model_name()
            .to_string();
        let chunk_count = match &chain {
            Some(chain) => chain.store().chunk_count().await.ok(),
            None => None,
        };
        EngineStatus {
            model,
            embedding_model: self.embedder.model_name().to_string(),
            ready: chain.is_some(),
            chunk_count,
        }
    }
}
