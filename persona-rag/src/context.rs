//! Injecting retrieved knowledge into a chat prompt.
//!
//! The conversational pipeline calls [`KnowledgeContext::augment`] once per
//! user utterance. Retrieval problems never surface to the caller: they are
//! logged and the messages pass through unchanged.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::RagConfig;
use crate::document::SearchResult;
use crate::embedding::EmbeddingProvider;
use crate::retriever::Retriever;

const SYSTEM_ROLE: &str = "system";
const USER_ROLE: &str = "user";

/// Heading on the system message added by [`ContextStrategy::InjectContext`].
pub const INJECTED_CONTEXT_LABEL: &str = "[Retrieved Context]";

/// Where retrieved context goes in the message list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContextStrategy {
    /// Append the context to the first system message, or prepend a system
    /// message holding only the context when there is none.
    #[default]
    AugmentSystem,
    /// Insert a separate system message after the leading system messages
    /// and before the first user message.
    InjectContext,
}

impl FromStr for ContextStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "augment_system" => Ok(ContextStrategy::AugmentSystem),
            "inject_context" => Ok(ContextStrategy::InjectContext),
            other => Err(format!("unknown context strategy '{other}'")),
        }
    }
}

/// A single chat message as handed to the language model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// `system`, `user` or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Create a message with an arbitrary role.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: role.into(), content: content.into() }
    }

    /// Create a `system` message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(SYSTEM_ROLE, content)
    }

    /// Create a `user` message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(USER_ROLE, content)
    }

    /// Create an `assistant` message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    fn is_system(&self) -> bool {
        self.role == SYSTEM_ROLE
    }
}

/// Render retrieved chunks as a prompt block.
///
/// Produces `header` followed by one numbered entry per result, separated by
/// blank lines. Returns an empty string when `results` is empty.
///
/// ```
/// use persona_rag::format_context;
///
/// assert_eq!(format_context(&[], "Relevant information about me:"), "");
/// ```
pub fn format_context(results: &[SearchResult], header: &str) -> String {
    if results.is_empty() {
        return String::new();
    }
    let mut parts = Vec::with_capacity(results.len() + 1);
    parts.push(header.to_string());
    for (i, result) in results.iter().enumerate() {
        parts.push(format!("\n[{}] {}", i + 1, result.chunk.text));
    }
    parts.join("\n")
}

/// Insert `context` into `messages` according to `strategy`.
///
/// An empty `context` leaves the messages untouched.
pub fn augment_messages(mut messages: Vec<ChatMessage>, context: &str, strategy: ContextStrategy) -> Vec<ChatMessage> {
    if context.is_empty() {
        return messages;
    }
    match strategy {
        ContextStrategy::AugmentSystem => match messages.iter_mut().find(|m| m.is_system()) {
            Some(system) => {
                system.content = format!("{}\n\n{context}", system.content);
            }
            None => messages.insert(0, ChatMessage::system(context)),
        },
        ContextStrategy::InjectContext => {
            let mut at = 0;
            for (i, message) in messages.iter().enumerate() {
                if message.is_system() {
                    at = i + 1;
                } else if message.role == USER_ROLE {
                    break;
                }
            }
            messages.insert(at, ChatMessage::system(format!("{INJECTED_CONTEXT_LABEL}\n{context}")));
        }
    }
    messages
}

/// Retrieval wired to prompt augmentation, safe to call on every turn.
///
/// Disabled when the configuration turns retrieval off or when the index
/// cannot be opened; a disabled context returns no snippets.
#[derive(Debug, Clone)]
pub struct KnowledgeContext {
    retriever: Option<Retriever>,
    strategy: ContextStrategy,
    header: String,
}

impl KnowledgeContext {
    /// Open the configured index for per-turn retrieval.
    pub fn from_config(config: &RagConfig, provider: Arc<dyn EmbeddingProvider>) -> Self {
        let retriever = if !config.enabled {
            info!("retrieval disabled by configuration");
            None
        } else {
            match Retriever::open(config, provider) {
                Ok(retriever) => Some(retriever),
                Err(e) => {
                    error!(error = %e, "failed to open knowledge index; continuing without retrieval");
                    None
                }
            }
        };
        Self { retriever, strategy: config.context_strategy, header: config.context_header.clone() }
    }

    /// Wrap an already opened retriever.
    pub fn new(retriever: Retriever, strategy: ContextStrategy, header: impl Into<String>) -> Self {
        Self { retriever: Some(retriever), strategy, header: header.into() }
    }

    /// A context that never retrieves anything.
    pub fn disabled() -> Self {
        Self {
            retriever: None,
            strategy: ContextStrategy::default(),
            header: crate::config::DEFAULT_CONTEXT_HEADER.to_string(),
        }
    }

    /// Whether an index was opened; a disabled context leaves messages untouched.
    pub fn is_enabled(&self) -> bool {
        self.retriever.is_some()
    }

    /// Ranked results for `query`, or nothing if retrieval fails.
    pub async fn results(&self, query: &str) -> Vec<SearchResult> {
        let Some(retriever) = &self.retriever else {
            return Vec::new();
        };
        match retriever.retrieve_default(query).await {
            Ok(results) => {
                if results.is_empty() {
                    debug!("no knowledge matched the utterance");
                } else {
                    info!(result_count = results.len(), "retrieved knowledge for utterance");
                }
                results
            }
            Err(e) => {
                warn!(error = %e, "retrieval failed; answering without knowledge context");
                Vec::new()
            }
        }
    }

    /// Text snippets for `query`, best match first.
    pub async fn snippets(&self, query: &str) -> Vec<String> {
        self.results(query).await.into_iter().map(|r| r.chunk.text).collect()
    }

    /// Retrieve for `query` and inject the formatted context into `messages`.
    ///
    /// Returns `messages` unchanged when nothing was retrieved.
    pub async fn augment(&self, query: &str, messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
        let results = self.results(query).await;
        let context = format_context(&results, &self.header);
        augment_messages(messages, &context, self.strategy)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::document::Chunk;

    fn result(text: &str, score: f32) -> SearchResult {
        SearchResult {
            chunk: Chunk {
                id: "a.md#0".into(),
                text: text.into(),
                source_id: "a.md".into(),
                ordinal: 0,
                start: 0,
                end: text.len(),
                metadata: BTreeMap::new(),
            },
            score,
        }
    }

    #[test]
    fn formats_numbered_snippets_under_header() {
        let text = format_context(&[result("I was born in Porto.", 0.9), result("I love jazz.", 0.7)], "About me:");
        assert_eq!(text, "About me:\n\n[1] I was born in Porto.\n\n[2] I love jazz.");
    }

    #[test]
    fn augment_system_appends_to_first_system_message() {
        let messages = vec![ChatMessage::system("You are Marco."), ChatMessage::user("Where are you from?")];
        let out = augment_messages(messages, "CTX", ContextStrategy::AugmentSystem);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].content, "You are Marco.\n\nCTX");
    }

    #[test]
    fn augment_system_prepends_when_no_system_message() {
        let out = augment_messages(vec![ChatMessage::user("hi there")], "CTX", ContextStrategy::AugmentSystem);
        assert_eq!(out[0], ChatMessage::system("CTX"));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn inject_context_goes_after_leading_system_messages() {
        let messages = vec![
            ChatMessage::system("persona"),
            ChatMessage::system("rules"),
            ChatMessage::user("first"),
            ChatMessage::assistant("reply"),
            ChatMessage::system("late note"),
        ];
        let out = augment_messages(messages, "CTX", ContextStrategy::InjectContext);
        assert_eq!(out.len(), 6);
        assert_eq!(out[2], ChatMessage::system("[Retrieved Context]\nCTX"));
        assert_eq!(out[3].content, "first");
    }

    #[test]
    fn empty_context_leaves_messages_alone() {
        let messages = vec![ChatMessage::user("hello")];
        assert_eq!(augment_messages(messages.clone(), "", ContextStrategy::InjectContext), messages);
    }

    #[test]
    fn parses_strategy_names() {
        assert_eq!("INJECT_CONTEXT".parse::<ContextStrategy>(), Ok(ContextStrategy::InjectContext));
        assert_eq!("augment-system".parse::<ContextStrategy>(), Ok(ContextStrategy::AugmentSystem));
        assert!("append".parse::<ContextStrategy>().is_err());
    }

    #[tokio::test]
    async fn disabled_context_passes_messages_through() {
        let config = RagConfig::builder().enabled(false).build().unwrap();
        let ctx = KnowledgeContext::from_config(&config, Arc::new(crate::HashingEmbeddingProvider::new(8)));
        assert!(!ctx.is_enabled());
        let messages = vec![ChatMessage::system("persona"), ChatMessage::user("what do you do for fun")];
        assert_eq!(ctx.augment("what do you do for fun", messages.clone()).await, messages);
        assert!(ctx.snippets("what do you do for fun").await.is_empty());
    }
}
