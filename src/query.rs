//! Query stream controller.
//!
//! Runs one answer generation as a cancellable task and exposes it to the
//! consumer as a lazy sequence of growing-prefix strings: every item is the
//! full answer so far, not a delta, and the final item is either the
//! complete answer, a fallback message, or a terminal error — failures
//! never cross the consumer boundary as `Err`.
//!
//! Cancellation is cooperative. The flag is checked once per item on both
//! sides of the channel: the producer replaces its next fragment with the
//! cancelled marker and stops, and the consumer replaces the next item it
//! would deliver, closes the channel, and aborts the producer so in-flight
//! network resources are dropped. Either way the sequence yields at most
//! one item after the flag is set.

use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::chain::RetrievalChain;
use crate::llm::Generator;
use crate::models::QueryMode;
use crate::session::Session;

/// Emitted once when a RAG query arrives before any index/chain exists.
pub const NOT_INITIALIZED: &str =
    "The retrieval chain is not initialized. Add documents and rebuild the index first.";
/// Emitted once when the generation stream completes without any content.
pub const NO_ANSWER: &str = "Sorry, no answer was produced.";
/// Emitted once when a stream is cancelled; always the last item.
pub const CANCELLED: &str = "Cancelled.";

/// One unit on the internal channel: a growing prefix, or the last item of
/// the sequence.
enum StreamItem {
    Fragment(String),
    Terminal(String),
}

/// Everything one query run needs, captured at submission time. A rebuild
/// or model switch after capture does not affect this run.
pub struct QueryJob {
    pub mode: QueryMode,
    pub query: String,
    pub chain: Option<Arc<RetrievalChain>>,
    pub generator: Arc<dyn Generator>,
    pub session: Arc<Session>,
}

/// Shared cancellation flag for one stream.
#[derive(Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Consumer half of a running query.
pub struct AnswerStream {
    rx: mpsc::Receiver<StreamItem>,
    cancel: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    done: bool,
}

impl AnswerStream {
    /// Next growing-prefix item, or `None` once the sequence has ended.
    pub async fn next(&mut self) -> Option<String> {
        if self.done {
            return None;
        }
        if self.cancel.load(Ordering::SeqCst) {
            self.finish();
            return Some(CANCELLED.to_string());
        }
        match self.rx.recv().await {
            Some(StreamItem::Fragment(text)) => Some(text),
            Some(StreamItem::Terminal(text)) => {
                self.finish();
                Some(text)
            }
            None => {
                self.done = true;
                None
            }
        }
    }

    /// Token for requesting cooperative cancellation from another task.
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken(self.cancel.clone())
    }

    fn finish(&mut self) {
        self.done = true;
        self.rx.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for AnswerStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Start a query run on a worker task and hand back its consumer half.
pub fn spawn_query(job: QueryJob) -> AnswerStream {
    // capacity 1: at most one fragment is ever in flight, so a cancelled
    // consumer sees the marker before any stale fragment
    let (tx, rx) = mpsc::channel(1);
    let cancel = Arc::new(AtomicBool::new(false));
    let task = tokio::spawn(run_query(job, tx, cancel.clone()));

    AnswerStream {
        rx,
        cancel,
        task: Some(task),
        done: false,
    }
}

async fn run_query(job: QueryJob, tx: mpsc::Sender<StreamItem>, cancel: Arc<AtomicBool>) {
    let stream_result = match job.mode {
        QueryMode::Retrieve => match &job.chain {
            None => {
                let _ = tx.send(StreamItem::Terminal(NOT_INITIALIZED.to_string())).await;
                return;
            }
            Some(chain) => chain.answer(&job.query).await,
        },
        QueryMode::Generate => {
            let context = job.session.generate_context();
            job.generator.stream_generate(&job.query, &context).await
        }
        QueryMode::Chat => {
            let messages = job.session.chat_history_with(&job.query);
            job.generator.stream_chat(&messages).await
        }
    };

    let mut stream = match stream_result {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "query failed before generation started");
            let _ = tx
                .send(StreamItem::Terminal(format!("failed to answer: {}", e)))
                .await;
            return;
        }
    };

    let mut answer = String::new();
    let mut final_context = None;

    while let Some(item) = stream.next().await {
        if cancel.load(Ordering::SeqCst) {
            debug!("query cancelled mid-stream");
            let _ = tx.send(StreamItem::Terminal(CANCELLED.to_string())).await;
            return;
        }
        match item {
            Ok(chunk) => {
                if !chunk.text.is_empty() {
                    answer.push_str(&chunk.text);
                    if tx
                        .send(StreamItem::Fragment(answer.clone()))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                if chunk.done {
                    final_context = chunk.context;
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "generation stream failed");
                let _ = tx
                    .send(StreamItem::Terminal(format!("failed to answer: {}", e)))
                    .await;
                return;
            }
        }
    }

    if answer.is_empty() {
        let _ = tx.send(StreamItem::Terminal(NO_ANSWER.to_string())).await;
        return;
    }

    match job.mode {
        QueryMode::Generate => {
            if let Some(context) = final_context {
                job.session.store_generate_context(context);
            }
        }
        QueryMode::Chat => job.session.store_chat_exchange(&job.query, &answer),
        QueryMode::Retrieve => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedGenerator;

    fn job(mode: QueryMode, generator: ScriptedGenerator) -> QueryJob {
        QueryJob {
            mode,
            query: "question".to_string(),
            chain: None,
            generator: Arc::new(generator),
            session: Arc::new(Session::new("gemma3n")),
        }
    }

    async fn collect(stream: &mut AnswerStream) -> Vec<String> {
        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn retrieve_without_chain_yields_single_notice() {
        let mut stream = spawn_query(job(QueryMode::Retrieve, ScriptedGenerator::new(&["x"])));
        let items = collect(&mut stream).await;
        assert_eq!(items, vec![NOT_INITIALIZED.to_string()]);
    }

    #[tokio::test]
    async fn fragments_grow_monotonically() {
        let g = ScriptedGenerator::new(&["Hel", "lo ", "world"]);
        let mut stream = spawn_query(job(QueryMode::Generate, g));
        let items = collect(&mut stream).await;
        assert_eq!(items, vec!["Hel", "Hello ", "Hello world"]);
        for pair in items.windows(2) {
            assert!(pair[1].starts_with(&pair[0]), "not a prefix extension");
        }
        assert!(!items.last().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_stream_yields_no_answer_fallback() {
        let g = ScriptedGenerator::new(&[]);
        let mut stream = spawn_query(job(QueryMode::Generate, g));
        let items = collect(&mut stream).await;
        assert_eq!(items, vec![NO_ANSWER.to_string()]);
    }

    #[tokio::test]
    async fn blank_fragments_also_fall_back() {
        let g = ScriptedGenerator::new(&["", "", ""]);
        let mut stream = spawn_query(job(QueryMode::Generate, g));
        let items = collect(&mut stream).await;
        assert_eq!(items, vec![NO_ANSWER.to_string()]);
    }

    #[tokio::test]
    async fn startup_failure_is_a_terminal_item() {
        let mut g = ScriptedGenerator::new(&["never"]);
        g.fail_to_start = true;
        let mut stream = spawn_query(job(QueryMode::Generate, g));
        let items = collect(&mut stream).await;
        assert_eq!(items.len(), 1);
        assert!(items[0].starts_with("failed to answer:"));
    }

    #[tokio::test]
    async fn mid_stream_failure_terminates_after_error_item() {
        let mut g = ScriptedGenerator::new(&["par", "tial", "rest"]);
        g.fail_at = Some(2);
        let mut stream = spawn_query(job(QueryMode::Generate, g));
        let items = collect(&mut stream).await;
        assert_eq!(items[0], "par");
        assert_eq!(items[1], "partial");
        assert!(items[2].starts_with("failed to answer:"));
        assert_eq!(items.len(), 3);
    }

    #[tokio::test]
    async fn cancellation_yields_marker_then_ends() {
        let fragments: Vec<String> = (0..50).map(|i| format!("frag{} ", i)).collect();
        let refs: Vec<&str> = fragments.iter().map(|s| s.as_str()).collect();
        let g = ScriptedGenerator::new(&refs);
        let mut stream = spawn_query(job(QueryMode::Generate, g));

        let first = stream.next().await.unwrap();
        assert!(first.starts_with("frag0"));

        stream.cancel_token().cancel();
        let marker = stream.next().await.unwrap();
        assert_eq!(marker, CANCELLED);
        assert_eq!(stream.next().await, None);
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn chat_mode_records_the_exchange() {
        let g = ScriptedGenerator::new(&["the ", "answer"]);
        let session = Arc::new(Session::new("gemma3n"));
        let mut stream = spawn_query(QueryJob {
            mode: QueryMode::Chat,
            query: "what is it?".to_string(),
            chain: None,
            generator: Arc::new(g),
            session: session.clone(),
        });
        let items = collect(&mut stream).await;
        assert_eq!(items.last().unwrap(), "the answer");

        let history = session.chat_history_with("next");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "what is it?");
        assert_eq!(history[1].content, "the answer");
    }

    #[tokio::test]
    async fn generate_mode_stores_continuation_context() {
        let mut g = ScriptedGenerator::new(&["ok"]);
        g.final_context = Some(vec![4, 5, 6]);
        let session = Arc::new(Session::new("gemma3n"));
        let mut stream = spawn_query(QueryJob {
            mode: QueryMode::Generate,
            query: "go".to_string(),
            chain: None,
            generator: Arc::new(g),
            session: session.clone(),
        });
        collect(&mut stream).await;
        assert_eq!(session.generate_context(), vec![4, 5, 6]);
    }

    #[tokio::test]
    async fn cancelled_session_records_nothing() {
        let fragments: Vec<String> = (0..50).map(|i| format!("f{} ", i)).collect();
        let refs: Vec<&str> = fragments.iter().map(|s| s.as_str()).collect();
        let g = ScriptedGenerator::new(&refs);
        let session = Arc::new(Session::new("gemma3n"));
        let mut stream = spawn_query(QueryJob {
            mode: QueryMode::Chat,
            query: "q".to_string(),
            chain: None,
            generator: Arc::new(g),
            session: session.clone(),
        });
        stream.next().await.unwrap();
        stream.cancel_token().cancel();
        assert_eq!(stream.next().await.unwrap(), CANCELLED);
        assert_eq!(stream.next().await, None);
        assert_eq!(session.chat_history_with("n").len(), 1);
    }
}
