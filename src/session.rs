//! Conversation session state.
//!
//! A [`Session`] is the only state that persists across queries: the
//! continuation token for single-shot generate mode and the message history
//! for chat mode. Switching models or resetting produces a *new* session;
//! a query already in flight keeps its captured session and updates that
//! one, so a switch can never race an in-flight update into the fresh
//! session.

use std::sync::Mutex;

use crate::models::ChatMessage;

#[derive(Debug, Default)]
pub struct ConversationState {
    /// Opaque Ollama continuation token from the last generate run.
    pub generate_context: Vec<i64>,
    /// Role-tagged history of the chat conversation.
    pub chat_history: Vec<ChatMessage>,
}

#[derive(Debug)]
pub struct Session {
    model: String,
    state: Mutex<ConversationState>,
}

impl Session {
    pub fn new(model: impl Into<String>) -> Self {
        Session {
            model: model.into(),
            state: Mutex::new(ConversationState::default()),
        }
    }

    /// Model this session talks to; fixed for the session's lifetime.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Snapshot the generate-mode continuation token.
    pub fn generate_context(&self) -> Vec<i64> {
        self.state.lock().expect("session lock").generate_context.clone()
    }

    /// Snapshot the chat history plus a new trailing user message.
    pub fn chat_history_with(&self, user_message: &str) -> Vec<ChatMessage> {
        let state = self.state.lock().expect("session lock");
        let mut messages = state.chat_history.clone();
        messages.push(ChatMessage::user(user_message));
        messages
    }

    /// Record the outcome of a completed generate run.
    pub fn store_generate_context(&self, context: Vec<i64>) {
        self.state.lock().expect("session lock").generate_context = context;
    }

    /// Record a completed chat exchange.
    pub fn store_chat_exchange(&self, user_message: &str, answer: &str) {
        let mut state = self.state.lock().expect("session lock");
        state.chat_history.push(ChatMessage::user(user_message));
        state.chat_history.push(ChatMessage::assistant(answer));
    }
}
