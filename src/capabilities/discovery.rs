//! Capabilities that search and describe the capability catalog itself.

use super::{CapabilityContext, OperationSet};
use crate::error::{AppError, Result};
use crate::registry::{BoundArgs, OperationDescriptor, ParamType, ParameterSpec};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;

const RECOMMENDATIONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOp {
    FindToolsForTask,
    GetToolRecommendation,
    ListToolsByCategory,
    RefreshToolEmbeddings,
    GetAllToolCategories,
}

#[async_trait]
impl OperationSet for DiscoveryOp {
    const ALL: &'static [Self] = &[
        DiscoveryOp::FindToolsForTask,
        DiscoveryOp::GetToolRecommendation,
        DiscoveryOp::ListToolsByCategory,
        DiscoveryOp::RefreshToolEmbeddings,
        DiscoveryOp::GetAllToolCategories,
    ];

    fn describe(self) -> OperationDescriptor {
        let cat = "tool_discovery";
        match self {
            DiscoveryOp::FindToolsForTask => OperationDescriptor::new(
                "find_tools_for_task",
                "Find the most relevant tools for a task using semantic search",
                cat,
            )
            .param(ParameterSpec::required("query", ParamType::Str))
            .param(ParameterSpec::with_default("max_tools", ParamType::Int, json!(5)))
            .examples(&["which tool should I use", "search available tools", "find a tool for this"])
            .keywords(&["find", "tools", "search", "discover", "semantic"]),
            DiscoveryOp::GetToolRecommendation => OperationDescriptor::new(
                "get_tool_recommendation",
                "Recommend the best tools for what you want to accomplish",
                cat,
            )
            .param(ParameterSpec::required("task_description", ParamType::Str))
            .examples(&["how do I accomplish this", "suggest a tool", "recommend tools for a task"])
            .keywords(&["recommend", "suggest", "tools", "task", "help"]),
            DiscoveryOp::ListToolsByCategory => OperationDescriptor::new(
                "list_tools_by_category",
                "List all tools in a specific category",
                cat,
            )
            .param(ParameterSpec::required("category", ParamType::Str))
            .examples(&["show networking tools", "what can I do with files", "cloud tools"])
            .keywords(&["category", "list", "tools", "browse"]),
            DiscoveryOp::RefreshToolEmbeddings => OperationDescriptor::new(
                "refresh_tool_embeddings",
                "Rebuild the semantic index of tool embeddings",
                cat,
            )
            .examples(&["reindex tools", "refresh tool search"])
            .keywords(&["refresh", "reindex", "embeddings", "index"]),
            DiscoveryOp::GetAllToolCategories => OperationDescriptor::new(
                "get_all_tool_categories",
                "Get a list of all available tool categories with tool counts",
                cat,
            )
            .examples(&["what kinds of tools exist", "list tool categories"])
            .keywords(&["categories", "tools", "overview", "list"]),
        }
    }

    async fn run(self, ctx: &CapabilityContext, args: BoundArgs) -> Result<Value> {
        match self {
            DiscoveryOp::FindToolsForTask => {
                let query = non_empty(args.str("query")?)?;
                let limit = args.int("max_tools")?.clamp(1, ctx.config.max_search_limit as i64) as usize;
                let hits = ctx.index.search(query, limit).await?;
                Ok(json!({ "query": query, "tools": hits }))
            }
            DiscoveryOp::GetToolRecommendation => {
                let task = non_empty(args.str("task_description")?)?;
                let hits = ctx.index.search(task, RECOMMENDATIONS).await?;
                let recommendations: Vec<Value> = hits
                    .iter()
                    .enumerate()
                    .map(|(rank, hit)| {
                        json!({
                            "rank": rank + 1,
                            "name": hit.name,
                            "score": hit.score,
                            "category": hit.category,
                            "description": hit.description,
                            "examples": hit.examples.iter().take(2).collect::<Vec<_>>(),
                            "keywords": hit.keywords.iter().take(3).collect::<Vec<_>>(),
                        })
                    })
                    .collect();
                Ok(json!({ "task": task, "recommendations": recommendations }))
            }
            DiscoveryOp::ListToolsByCategory => {
                let category = args.str("category")?.trim();
                let tools: Vec<Value> = ctx
                    .catalog()
                    .iter()
                    .filter(|d| d.category.eq_ignore_ascii_case(category))
                    .map(|d| {
                        json!({
                            "name": d.name,
                            "description": d.description,
                            "examples": d.examples.iter().take(2).collect::<Vec<_>>(),
                            "keywords": d.keywords.iter().take(3).collect::<Vec<_>>(),
                        })
                    })
                    .collect();
                if tools.is_empty() {
                    let available: Vec<String> = category_counts(ctx.catalog()).into_keys().collect();
                    return Err(AppError::capability(format!(
                        "No tools found in category '{}'. Available categories: {}",
                        category,
                        available.join(", ")
                    )));
                }
                Ok(json!({ "category": category, "tools": tools }))
            }
            DiscoveryOp::RefreshToolEmbeddings => {
                let indexed = ctx.index.refresh(ctx.catalog().to_vec()).await?;
                tracing::info!(indexed, "Tool embeddings refreshed");
                Ok(json!({ "indexed": indexed }))
            }
            DiscoveryOp::GetAllToolCategories => Ok(Value::Array(
                category_counts(ctx.catalog())
                    .into_iter()
                    .map(|(category, count)| json!({ "category": category, "count": count }))
                    .collect(),
            )),
        }
    }
}

/// Tool count per category, ordered by category name.
pub fn category_counts(descriptors: &[OperationDescriptor]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for descriptor in descriptors {
        *counts.entry(descriptor.category.clone()).or_insert(0) += 1;
    }
    counts
}

fn non_empty(text: &str) -> Result<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::InvalidArgument("query must not be empty".to_string()));
    }
    Ok(text)
}
