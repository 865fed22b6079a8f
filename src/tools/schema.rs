//! 工具参数结构与 JSON Schema 生成（schemars）
//!
//! 参数结构同时用于 serde 解码与 schema 生成，保证声明给模型的格式与实际解析一致。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use super::ToolError;

/// get_materials_metadata 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct MaterialsMetadataArgs {
    /// 附件 id 列表
    pub attachment_ids: Vec<Uuid>,
}

/// read_attached_material 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadMaterialArgs {
    /// 附件 id
    pub attachment_id: Uuid,
}

/// search_attached_materials 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchMaterialsArgs {
    /// 检索语句
    pub query: String,
    /// 返回片段数（默认取配置值）
    #[serde(default)]
    pub top_k: Option<usize>,
    /// 只在这些附件内检索；省略时检索全部资料
    #[serde(default)]
    pub attachment_ids: Option<Vec<Uuid>>,
}

/// 生成参数结构的 JSON Schema
pub fn parameters_schema<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

/// 解码工具参数；模型给出的参数不是合法 JSON 时会以字符串形式到达这里
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    let args = match args {
        Value::String(raw) => serde_json::from_str(&raw)
            .map_err(|e| ToolError::InvalidArguments(format!("arguments are not JSON: {e}")))?,
        other => other,
    };
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_lists_required_fields() {
        let schema = parameters_schema::<ReadMaterialArgs>();
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "attachment_id"));
        assert_eq!(schema["properties"]["attachment_id"]["format"], "uuid");

        let schema = parameters_schema::<MaterialsMetadataArgs>();
        assert_eq!(schema["properties"]["attachment_ids"]["items"]["format"], "uuid");
    }

    #[test]
    fn test_parse_args_accepts_stringified_json() {
        let id = Uuid::new_v4();
        let raw = Value::String(format!(r#"{{"attachment_id": "{id}"}}"#));
        let args: ReadMaterialArgs = parse_args(raw).unwrap();
        assert_eq!(args.attachment_id, id);

        let bad = parse_args::<ReadMaterialArgs>(serde_json::json!({"attachment_id": "nope"}));
        assert!(matches!(bad, Err(ToolError::InvalidArguments(_))));
        let garbage = parse_args::<SearchMaterialsArgs>(Value::String("{not json".into()));
        assert!(matches!(garbage, Err(ToolError::InvalidArguments(_))));
    }
}
