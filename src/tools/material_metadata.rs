//! get_materials_metadata：批量读取附件元数据（文件名、MIME 类型、大小、上传时间），用于初步分析资料

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::schema::{parameters_schema, parse_args, MaterialsMetadataArgs};
use super::{material_error, Tool, ToolError};
use crate::materials::MaterialStore;

pub struct MaterialsMetadataTool {
    store: Arc<dyn MaterialStore>,
}

impl MaterialsMetadataTool {
    pub fn new(store: Arc<dyn MaterialStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MaterialsMetadataTool {
    fn name(&self) -> &str {
        "get_materials_metadata"
    }

    fn description(&self) -> &str {
        "Get metadata of attached materials (file name, MIME type, size, upload time). \
         Useful for a first look at what the teacher attached."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<MaterialsMetadataArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: MaterialsMetadataArgs = parse_args(args)?;
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for id in args.attachment_ids {
            match self.store.get(id).await.map_err(material_error)? {
                Some(attachment) => found.push(
                    serde_json::to_value(attachment.metadata())
                        .map_err(|e| ToolError::Unavailable(e.to_string()))?,
                ),
                None => missing.push(id.to_string()),
            }
        }

        let mut out = serde_json::to_string_pretty(&found)
            .map_err(|e| ToolError::Unavailable(e.to_string()))?;
        if !missing.is_empty() {
            out.push_str(&format!("\nMaterials not found: {}", missing.join(", ")));
        }
        Ok(out)
    }
}
