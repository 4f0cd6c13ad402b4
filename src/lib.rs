//! # docqa
//!
//! A local-first retrieval-augmented document question answering engine.
//!
//! docqa ingests a folder of heterogeneous documents (PDF, TXT, DOCX),
//! maintains a persistent vector index over chunked text, and answers
//! queries by retrieving the most relevant chunks and streaming a generated
//! answer token-by-token through a cancellable stream. Embeddings and
//! generation run against a local Ollama instance.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────┐
//! │  Loader   │──▶│   Chunker     │──▶│  SQLite    │
//! │ pdf/txt/  │   │ split+overlap │   │ chunks+vec │
//! │   docx    │   └──────────────┘   └─────┬─────┘
//! └───────────┘                            │
//!                      ┌───────────────────┤
//!                      ▼                   ▼
//!                ┌───────────┐      ┌────────────┐
//!                │  Engine   │─────▶│  Retrieval  │
//!                │ (rebuild) │      │   Chain     │
//!                └───────────┘      └─────┬──────┘
//!                                         ▼
//!                                  ┌────────────┐
//!                                  │AnswerStream │
//!                                  │ (cancellable)│
//!                                  └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docqa index                    # build/update the vector index
//! docqa ask "what is alpha?"     # stream a grounded answer
//! docqa ask --mode chat "hi"     # chat mode with session history
//! docqa models                   # list installed Ollama models
//! docqa status                   # index and model status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`loader`] | Document-directory loading |
//! | [`extract`] | PDF/DOCX text extraction |
//! | [`chunk`] | Recursive overlap chunking |
//! | [`embedding`] | Embedding backend (Ollama) |
//! | [`store`] | Persistent vector store |
//! | [`llm`] | Streaming generation backend (Ollama) |
//! | [`chain`] | Retrieval chain |
//! | [`session`] | Conversation session state |
//! | [`query`] | Cancellable answer streaming |
//! | [`engine`] | Index manager and query entry points |

pub mod chain;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extract;
pub mod llm;
pub mod loader;
pub mod models;
pub mod query;
pub mod session;
pub mod store;
