//! Gating Service (C6): selects a bounded subset of tools under token +
//! count budgets.

use serde::Serialize;

use crate::registry::{Tool, ToolRegistry};

/// One gated tool, shaped for MCP/HTTP export (§4.5 step 4).
#[derive(Debug, Clone, Serialize)]
pub struct GatedTool {
    pub tool_id: String,
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub token_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatingMetadata {
    pub total_tokens: u32,
    pub gating_applied: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatingResult {
    pub tools: Vec<GatedTool>,
    pub metadata: GatingMetadata,
}

pub struct GatingService {
    max_tools_ceiling: u32,
    max_tokens_ceiling: u32,
}

impl GatingService {
    pub fn new(max_tools_ceiling: u32, max_tokens_ceiling: u32) -> Self {
        Self {
            max_tools_ceiling,
            max_tokens_ceiling,
        }
    }

    /// Select a budget-bounded subset of tools (§4.5).
    ///
    /// If `tool_ids` is given, candidates are exactly those ids (unknown ids
    /// are skipped). Otherwise the candidate pool is the registry's tools in
    /// registry order, capped at `2 * max_tools`. Candidates are then
    /// accepted in order while both the token and count budgets allow.
    pub fn gate(
        &self,
        registry: &ToolRegistry,
        tool_ids: Option<&[String]>,
        max_tools: Option<u32>,
        context_tokens: Option<u32>,
    ) -> GatingResult {
        let max_tools = max_tools.unwrap_or(self.max_tools_ceiling).min(self.max_tools_ceiling);
        let context_tokens = context_tokens
            .unwrap_or(self.max_tokens_ceiling)
            .min(self.max_tokens_ceiling);

        let candidates: Vec<Tool> = match tool_ids {
            Some(ids) => ids.iter().filter_map(|id| registry.get(id)).collect(),
            None => {
                let mut all = registry.all();
                all.sort_by(|a, b| a.id.cmp(&b.id));
                all.truncate((2 * max_tools) as usize);
                all
            }
        };

        let mut accepted = Vec::new();
        let mut accumulated_tokens: u32 = 0;
        for tool in candidates {
            if accepted.len() as u32 >= max_tools {
                break;
            }
            let next_total = accumulated_tokens + tool.estimated_tokens;
            if next_total > context_tokens {
                continue;
            }
            accumulated_tokens = next_total;
            accepted.push(GatedTool {
                tool_id: tool.id,
                name: tool.name,
                description: tool.description,
                parameters: tool.parameters,
                token_count: tool.estimated_tokens,
            });
        }

        GatingResult {
            tools: accepted,
            metadata: GatingMetadata {
                total_tokens: accumulated_tokens,
                gating_applied: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_with_tokens(server: &str, name: &str, tokens: u32) -> Tool {
        let mut t = Tool::new(
            server,
            name,
            format!("{name} description"),
            json!({"type": "object"}),
            Default::default(),
            tokens,
        );
        t.estimated_tokens = tokens;
        t
    }

    #[test]
    fn budgeted_provisioning_accepts_only_what_fits() {
        let registry = ToolRegistry::new();
        let tools: Vec<Tool> = (0..20)
            .map(|i| tool_with_tokens("b", &format!("tool_{i:02}"), 150))
            .collect();
        registry.replace_server("b", tools);

        let svc = GatingService::new(10, 2000);
        let result = svc.gate(&registry, None, Some(10), Some(500));

        assert_eq!(result.tools.len(), 3);
        assert_eq!(result.metadata.total_tokens, 450);
        assert!(result.metadata.gating_applied);
    }

    #[test]
    fn explicit_tool_ids_skip_unknown() {
        let registry = ToolRegistry::new();
        registry.replace_server("b", vec![tool_with_tokens("b", "known", 100)]);

        let svc = GatingService::new(10, 2000);
        let result = svc.gate(
            &registry,
            Some(&["b_known".to_string(), "b_missing".to_string()]),
            None,
            None,
        );

        assert_eq!(result.tools.len(), 1);
        assert_eq!(result.tools[0].tool_id, "b_known");
    }

    #[test]
    fn max_tools_ceiling_cannot_be_exceeded_by_caller() {
        let registry = ToolRegistry::new();
        let tools: Vec<Tool> = (0..5)
            .map(|i| tool_with_tokens("b", &format!("tool_{i}"), 10))
            .collect();
        registry.replace_server("b", tools);

        let svc = GatingService::new(3, 2000);
        // Caller asks for 10, but the service ceiling is 3.
        let result = svc.gate(&registry, None, Some(10), None);
        assert!(result.tools.len() <= 3);
    }

    #[test]
    fn empty_registry_yields_empty_selection() {
        let registry = ToolRegistry::new();
        let svc = GatingService::new(10, 2000);
        let result = svc.gate(&registry, None, None, None);
        assert!(result.tools.is_empty());
        assert_eq!(result.metadata.total_tokens, 0);
    }
}
