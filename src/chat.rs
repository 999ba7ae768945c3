//! Multi-turn chat over an attached index.
//!
//! Each turn retrieves context for the new message alone, then sends the
//! whole conversation to the LLM with that context in a leading system
//! message. History lives in the session, not in the index.

use tracing::debug;

use crate::error::PackResult;
use crate::llm::ChatMessage;
use crate::models::QueryResult;
use crate::query::{format_context, QueryEngine};

/// System prompt for chat turns. `{context}` is replaced per turn.
pub const DEFAULT_CHAT_TEMPLATE: &str = "\
You are a helpful assistant answering questions about exported documents.
Read the tables row by row and column by column. DO NOT SUMMARIZE; list \
every relevant detail clearly. Answer without guessing and without relying \
on implicit information.
Context information for the latest question is below.
---------------------
{context}
---------------------
";

pub struct ChatSession<'a> {
    engine: &'a QueryEngine,
    history: Vec<ChatMessage>,
}

impl<'a> ChatSession<'a> {
    pub fn new(engine: &'a QueryEngine) -> Self {
        Self {
            engine,
            history: Vec::new(),
        }
    }

    /// Retrieve for `message`, answer it in the context of earlier turns,
    /// and record both sides of the exchange.
    pub async fn send(&mut self, message: &str) -> PackResult<QueryResult> {
        let source_nodes = self.engine.retrieve(message).await?;
        let system = DEFAULT_CHAT_TEMPLATE.replace("{context}", &format_context(&source_nodes));

        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::system(system));
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::user(message));
        debug!(turns = self.history.len() / 2, "sending chat turn");

        let answer = self.engine.llm().chat(&messages).await?;
        self.history.push(ChatMessage::user(message));
        self.history.push(ChatMessage::assistant(answer.clone()));
        Ok(QueryResult {
            answer,
            source_nodes,
        })
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Forget earlier turns.
    pub fn reset(&mut self) {
        self.history.clear();
    }
}
