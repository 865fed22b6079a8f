//! search_attached_materials：在已索引的资料片段中检索与查询相关的内容

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::schema::{parameters_schema, parse_args, SearchMaterialsArgs};
use super::{Tool, ToolError};
use crate::materials::MaterialIndex;

pub struct SearchMaterialsTool {
    index: Arc<MaterialIndex>,
    default_top_k: usize,
}

impl SearchMaterialsTool {
    pub fn new(index: Arc<MaterialIndex>, default_top_k: usize) -> Self {
        Self {
            index,
            default_top_k,
        }
    }
}

#[async_trait]
impl Tool for SearchMaterialsTool {
    fn name(&self) -> &str {
        "search_attached_materials"
    }

    fn description(&self) -> &str {
        "Search the attached materials for passages relevant to a query, optionally restricted to some attachment ids."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<SearchMaterialsArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: SearchMaterialsArgs = parse_args(args)?;
        if args.query.trim().is_empty() {
            return Err(ToolError::InvalidArguments("`query` must not be empty".into()));
        }
        let k = args.top_k.unwrap_or(self.default_top_k);
        let scope: Option<HashSet<Uuid>> = args
            .attachment_ids
            .filter(|ids| !ids.is_empty())
            .map(|ids| ids.into_iter().collect());
        let hits = self.index.search(&args.query, k, scope.as_ref());
        if hits.is_empty() {
            return Ok(format!("No passages found for \"{}\"", args.query));
        }
        Ok(hits
            .iter()
            .map(|hit| format!("**{}:**\n{}", hit.original_filename, hit.content))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}
