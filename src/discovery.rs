//! Discovery Service (C5): ranks registry tools against a natural-language
//! query using the Embedding Encoder (C1) plus a tag-overlap bonus.

use serde::Serialize;
use std::sync::Arc;

use crate::embeddings::{dot_product, EmbeddingEncoder};
use crate::error::GatewayError;
use crate::registry::ToolRegistry;

const TAG_BONUS_WEIGHT: f64 = 0.2;
const DEFAULT_LIMIT: u32 = 10;
const MAX_LIMIT: u32 = 50;

/// One ranked result (§4.4 step 5 output shape).
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryResult {
    pub tool_id: String,
    pub name: String,
    pub description: String,
    pub score: f64,
    pub matched_tags: Vec<String>,
    pub estimated_tokens: u32,
}

pub struct DiscoveryService {
    registry: Arc<ToolRegistry>,
    encoder: Arc<dyn EmbeddingEncoder>,
}

impl DiscoveryService {
    pub fn new(registry: Arc<ToolRegistry>, encoder: Arc<dyn EmbeddingEncoder>) -> Self {
        Self { registry, encoder }
    }

    /// Rank registry tools against `query` (§4.4).
    ///
    /// `query` must be non-empty. `tags`, when given, narrows the candidate
    /// set to tools whose tag set intersects it. `limit` is clamped to
    /// `1..=50`, defaulting to 10.
    pub fn discover(
        &self,
        query: &str,
        tags: Option<&[String]>,
        context: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<DiscoveryResult>, GatewayError> {
        if query.trim().is_empty() {
            return Err(GatewayError::Config(
                "discover_tools: query must be non-empty".to_string(),
            ));
        }
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

        let all = self.registry.all();
        if all.is_empty() {
            return Ok(Vec::new());
        }

        let candidates: Vec<_> = match tags {
            Some(tags) if !tags.is_empty() => all
                .into_iter()
                .filter(|t| tags.iter().any(|tag| t.tags.contains(tag)))
                .collect(),
            _ => all,
        };

        let query_text = match context {
            Some(ctx) if !ctx.is_empty() => format!("{query} {ctx}"),
            _ => query.to_string(),
        };
        let mut query_vec = self.encoder.encode(&query_text);
        crate::embeddings::l2_normalize(&mut query_vec);

        let mut scored: Vec<DiscoveryResult> = Vec::with_capacity(candidates.len());
        for tool in candidates {
            let embedding = match &tool.embedding {
                Some(v) => v.clone(),
                None => {
                    let text = format!(
                        "{} {} {}",
                        tool.name,
                        tool.description,
                        tool.tags.iter().cloned().collect::<Vec<_>>().join(" ")
                    );
                    let vec = self.encoder.encode(&text);
                    self.registry.set_embedding(&tool.id, vec.clone());
                    vec
                }
            };

            let matched_tags: Vec<String> = match tags {
                Some(tags) => tool
                    .tags
                    .iter()
                    .filter(|t| tags.contains(t))
                    .cloned()
                    .collect(),
                None => Vec::new(),
            };

            let cosine = dot_product(&query_vec, &embedding) as f64;
            let score = cosine + TAG_BONUS_WEIGHT * matched_tags.len() as f64;
            debug_assert!(score.is_finite(), "discovery score must never be NaN");

            scored.push(DiscoveryResult {
                tool_id: tool.id.clone(),
                name: tool.name.clone(),
                description: tool.description.clone(),
                score,
                matched_tags,
                estimated_tokens: tool.estimated_tokens,
            });
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.tool_id.cmp(&b.tool_id))
        });
        scored.truncate(limit as usize);
        Ok(scored)
    }
}
