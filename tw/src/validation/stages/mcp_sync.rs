//! Stage 4: sync against the live MCP tool catalogs
//!
//! Confirms every planned tool actually exists on its server right now.
//! Near-miss names are auto-corrected by fuzzy match against the real
//! catalog; anything below the threshold is rejected with the closest
//! candidate as a suggestion. The stage keeps its own short-TTL name cache
//! so repeated validations don't hammer `tools/list`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{self, ToolCall};
use crate::validation::fuzzy::best_match;
use crate::validation::result::{Correction, CorrectionKind, StageOutcome};
use crate::validation::{CatalogProvider, ValidationSettings, Validator};

pub struct McpSyncValidator {
    catalog: Arc<dyn CatalogProvider>,
    ttl: Duration,
    threshold: f64,
    /// server -> (fetched at, wire names); `None` names = unknown server.
    cache: Mutex<HashMap<String, (Instant, Option<Vec<String>>)>>,
}

impl McpSyncValidator {
    pub fn new(catalog: Arc<dyn CatalogProvider>, settings: &ValidationSettings) -> Self {
        Self {
            catalog,
            ttl: settings.mcp_cache_ttl,
            threshold: settings.similarity_threshold,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn wire_names(&self, server: &str) -> Option<Vec<String>> {
        let mut cache = self.cache.lock().await;
        if let Some((at, names)) = cache.get(server) {
            if at.elapsed() < self.ttl {
                return names.clone();
            }
        }

        let names = self
            .catalog
            .catalog(server)
            .await
            .map(|tools| tools.into_iter().map(|t| t.name).collect::<Vec<_>>());
        cache.insert(server.to_string(), (Instant::now(), names.clone()));
        names
    }

    /// Strip the single-underscore wire prefix for short-name comparison.
    fn wire_short<'a>(name: &'a str, server: &str) -> &'a str {
        name.strip_prefix(&format!("{server}_")).unwrap_or(name)
    }
}

#[async_trait]
impl Validator for McpSyncValidator {
    fn name(&self) -> &'static str {
        "mcp_sync"
    }

    fn is_critical(&self) -> bool {
        true
    }

    async fn validate(&self, calls: &[ToolCall]) -> StageOutcome {
        let mut outcome = StageOutcome::default();
        let mut corrected: Vec<ToolCall> = calls.to_vec();
        let mut changed = false;

        for (index, call) in calls.iter().enumerate() {
            let Some(names) = self.wire_names(&call.server).await else {
                outcome
                    .errors
                    .push(format!("call #{index}: unknown MCP server '{}'", call.server));
                continue;
            };

            let wire = domain::denormalize(&call.tool, &call.server);
            let short = domain::short_name(&call.tool, &call.server);
            if names.iter().any(|n| n == &wire || n == short) {
                continue;
            }

            // Fuzzy match on short names against the live catalog
            let shorts: Vec<&str> = names.iter().map(|n| Self::wire_short(n, &call.server)).collect();
            match best_match(short, shorts.iter().copied()) {
                Some((matched_short, score)) if score >= self.threshold => {
                    let matched_wire = names
                        .iter()
                        .find(|n| Self::wire_short(n, &call.server) == matched_short)
                        .expect("matched name came from this list");
                    let canonical = domain::normalize(matched_wire, &call.server);
                    debug!(
                        from = %call.tool,
                        to = %canonical,
                        score,
                        "mcp_sync: correcting tool name"
                    );
                    outcome.corrections.push(Correction {
                        kind: CorrectionKind::ToolNameCorrected,
                        tool: canonical.clone(),
                        detail: format!("{} -> {canonical} (similarity {score:.2})", call.tool),
                    });
                    corrected[index].tool = canonical;
                    changed = true;
                }
                Some((matched_short, score)) => {
                    outcome.errors.push(format!(
                        "{} not found on '{}'; closest is '{matched_short}' (similarity {score:.2}, below threshold)",
                        call.tool, call.server
                    ));
                }
                None => {
                    outcome.errors.push(format!(
                        "{} not found on '{}' and its catalog is empty",
                        call.tool, call.server
                    ));
                }
            }
        }

        if changed && outcome.errors.is_empty() {
            outcome.corrected_calls = Some(corrected);
        }
        outcome
    }
}
