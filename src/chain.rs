//! Retrieval chain: retriever + prompt template + generation backend.
//!
//! A chain is immutable and cheap to rebuild; the engine constructs a fresh
//! one whenever the vector store handle or the active model changes, so a
//! query in flight keeps answering against the chain generation it
//! captured.

use anyhow::Result;
use std::sync::Arc;

use crate::embedding::Embedder;
use crate::llm::{GenStream, Generator};
use crate::models::ScoredChunk;
use crate::store::VectorStore;

/// Prompt shape for grounded question answering: retrieved context is
/// stuffed into a single prompt ahead of the question.
const QA_TEMPLATE: &str = "Answer the question using only the context below. \
If the context does not contain the answer, say that you don't know.\n\n\
<context>\n{context}\n</context>\n\nQuestion: {question}";

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: &'static str,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        PromptTemplate {
            template: QA_TEMPLATE,
        }
    }
}

impl PromptTemplate {
    pub fn render(&self, context: &str, question: &str) -> String {
        self.template
            .replace("{context}", context)
            .replace("{question}", question)
    }
}

/// One retriever + generator pairing, stateless per invocation.
pub struct RetrievalChain {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    k: usize,
    prompt: PromptTemplate,
}

impl RetrievalChain {
    pub fn new(
        store: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        k: usize,
    ) -> Self {
        RetrievalChain {
            store,
            embedder,
            generator,
            k,
            prompt: PromptTemplate::default(),
        }
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    pub fn model(&self) -> &str {
        self.generator.model_name()
    }

    /// Fetch the `k` most relevant chunks for a query.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<ScoredChunk>> {
        self.store.search(query, self.k, self.embedder.as_ref()).await
    }

    /// Retrieve once, then open the generation stream conditioned on the
    /// retrieved context. Retrieval always completes before generation
    /// begins.
    pub async fn answer(&self, query: &str) -> Result<GenStream> {
        let retrieved = self.retrieve(query).await?;
        let context = join_context(&retrieved);
        let prompt = self.prompt.render(&context, query);
        // fresh run: the chain carries no continuation state across queries
        self.generator.stream_generate(&prompt, &[]).await
    }
}

fn join_context(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .map(|s| s.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn scored(text: &str) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: "id".to_string(),
                source_path: "a.txt".to_string(),
                chunk_index: 0,
                offset: 0,
                text: text.to_string(),
                hash: String::new(),
            },
            score: 1.0,
        }
    }

    #[test]
    fn prompt_interpolates_context_and_question() {
        let prompt = PromptTemplate::default().render("CTX", "what?");
        assert!(prompt.contains("<context>\nCTX\n</context>"));
        assert!(prompt.ends_with("Question: what?"));
    }

    #[test]
    fn context_join_separates_chunks() {
        let joined = join_context(&[scored("one"), scored("two")]);
        assert_eq!(joined, "one\n\ntwo");
        assert_eq!(join_context(&[]), "");
    }
}
