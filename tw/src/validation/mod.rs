//! Staged tool-call validation pipeline
//!
//! Every planned batch of tool calls passes through the pipeline before
//! execution: format → history → schema → live MCP sync → optional LLM
//! safety. Critical stages reject early; non-critical stage failures
//! downgrade to warnings. Stages may rewrite the batch (fuzzy name and
//! parameter corrections); the corrected batch threads into later stages
//! and is what ultimately executes.

mod fuzzy;
mod metrics;
mod pipeline;
mod result;
pub mod stages;

pub use fuzzy::{DEFAULT_SIMILARITY_THRESHOLD, best_match, best_match_above, similarity};
pub use metrics::{PipelineMetrics, StageMetrics};
pub use pipeline::ValidationPipeline;
pub use result::{Correction, CorrectionKind, StageIssue, StageOutcome, ValidationResult};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::ToolCall;
use crate::mcp::{McpManager, ToolDescriptor};

/// Tunables shared by the validators; the env vars from the configuration
/// surface map directly onto these fields.
#[derive(Debug, Clone)]
pub struct ValidationSettings {
    /// Look-back window for the repetition guard.
    pub anti_repetition_window: usize,
    /// Failures of one exact call that trigger a block.
    pub max_failures_before_block: u32,
    /// Success rate below which a warning is attached.
    pub min_success_rate: f64,
    /// TTL of the MCP-sync validator's catalog cache.
    pub mcp_cache_ttl: Duration,
    /// Fuzzy auto-correction threshold.
    pub similarity_threshold: f64,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            anti_repetition_window: 100,
            max_failures_before_block: 3,
            min_success_rate: 0.3,
            mcp_cache_ttl: Duration::from_secs(60),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

/// One pipeline stage.
#[async_trait]
pub trait Validator: Send + Sync {
    fn name(&self) -> &'static str;
    /// Critical stages halt the pipeline on failure.
    fn is_critical(&self) -> bool;
    async fn validate(&self, calls: &[ToolCall]) -> StageOutcome;
}

/// Source of tool catalogs for the schema and MCP-sync stages. The live
/// implementation is the connection manager; tests use fixed maps.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Tool descriptors for one server, or `None` for an unknown server.
    async fn catalog(&self, server: &str) -> Option<Vec<ToolDescriptor>>;
}

#[async_trait]
impl CatalogProvider for Arc<McpManager> {
    async fn catalog(&self, server: &str) -> Option<Vec<ToolDescriptor>> {
        self.tools(server).await.ok()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Fixed catalogs for validator tests.

    use super::*;
    use std::collections::HashMap;
    use serde_json::json;

    pub struct FixedCatalog {
        servers: HashMap<String, Vec<ToolDescriptor>>,
    }

    impl FixedCatalog {
        pub fn new() -> Self {
            Self {
                servers: HashMap::new(),
            }
        }

        pub fn with_tools(mut self, server: &str, tools: Vec<(&str, serde_json::Value)>) -> Self {
            let descriptors = tools
                .into_iter()
                .map(|(name, schema)| ToolDescriptor {
                    name: name.to_string(),
                    description: None,
                    input_schema: schema,
                })
                .collect();
            self.servers.insert(server.to_string(), descriptors);
            self
        }

        /// A filesystem-ish server with a typical object schema.
        pub fn filesystem() -> Arc<Self> {
            Arc::new(Self::new().with_tools(
                "filesystem",
                vec![
                    (
                        "filesystem_list_directory",
                        json!({
                            "type": "object",
                            "properties": { "path": { "type": "string" } },
                            "required": ["path"],
                        }),
                    ),
                    (
                        "filesystem_read_file",
                        json!({
                            "type": "object",
                            "properties": {
                                "path": { "type": "string" },
                                "limit": { "type": "integer" },
                            },
                            "required": ["path"],
                        }),
                    ),
                ],
            ))
        }
    }

    #[async_trait]
    impl CatalogProvider for FixedCatalog {
        async fn catalog(&self, server: &str) -> Option<Vec<ToolDescriptor>> {
            self.servers.get(server).cloned()
        }
    }
}
