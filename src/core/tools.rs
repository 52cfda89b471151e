//! Tool dispatch for assistant-issued function calls.
//!
//! Handlers are registered by name. A recognized tool always yields a result: failures
//! are logged and replaced by the handler's fallback text so the conversation can
//! continue.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::backend::KnowledgeBackend;
use crate::errors::{ToolError, ToolResult};

/// Name of the knowledge base lookup tool
pub const GET_CHUNKS: &str = "get_chunks";

/// Result returned when the knowledge lookup fails
pub const CHUNKS_FALLBACK: &str = "Could not get chunks data";

/// A function call taken from a `response.done` output item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInvocation {
    pub call_id: String,
    pub name: String,
    /// Raw JSON arguments as sent by the assistant
    pub arguments: String,
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, arguments: &str) -> ToolResult<String>;

    /// Text submitted instead of a result when `invoke` fails.
    fn fallback(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct ChunksArguments {
    userquery: String,
}

/// `get_chunks`: forwards `userquery` to the knowledge backend and returns its text.
pub struct KnowledgeLookupTool {
    backend: Arc<dyn KnowledgeBackend>,
}

impl KnowledgeLookupTool {
    pub fn new(backend: Arc<dyn KnowledgeBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for KnowledgeLookupTool {
    fn name(&self) -> &str {
        GET_CHUNKS
    }

    async fn invoke(&self, arguments: &str) -> ToolResult<String> {
        let args: ChunksArguments = serde_json::from_str(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        debug!(query = %args.userquery, "Searching knowledge base");
        self.backend.lookup_chunks(&args.userquery).await
    }

    fn fallback(&self) -> &str {
        CHUNKS_FALLBACK
    }
}

/// Registry of tool handlers keyed by name.
#[derive(Default, Clone)]
pub struct ToolDispatcher {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher with the built-in `get_chunks` tool.
    pub fn with_knowledge_backend(backend: Arc<dyn KnowledgeBackend>) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(Arc::new(KnowledgeLookupTool::new(backend)));
        dispatcher
    }

    /// Register a handler, replacing any previous handler with the same name.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Run the named tool.
    ///
    /// Returns `None` only when no handler is registered under that name.
    pub async fn dispatch(&self, invocation: &FunctionInvocation) -> Option<String> {
        let handler = self.handlers.get(&invocation.name)?;

        match handler.invoke(&invocation.arguments).await {
            Ok(result) => {
                debug!(
                    call_id = %invocation.call_id,
                    tool = %invocation.name,
                    result_len = result.len(),
                    "Tool call completed"
                );
                Some(result)
            }
            Err(e) => {
                warn!(
                    call_id = %invocation.call_id,
                    tool = %invocation.name,
                    "Tool call failed, using fallback: {}",
                    e
                );
                Some(handler.fallback().to_string())
            }
        }
    }
}

impl std::fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("ToolDispatcher").field("tools", &names).finish()
    }
}
