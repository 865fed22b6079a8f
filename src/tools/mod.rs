//! 工具层：注册表、执行器与教学资料工具

pub mod executor;
pub mod material_metadata;
pub mod read_material;
pub mod registry;
pub mod schema;
pub mod search_materials;

use std::sync::Arc;

pub use executor::ToolExecutor;
pub use material_metadata::MaterialsMetadataTool;
pub use read_material::ReadMaterialTool;
pub use registry::{Tool, ToolError, ToolRegistry};
pub use search_materials::SearchMaterialsTool;

use crate::materials::{MaterialError, MaterialIndex, MaterialStore};

/// 资料存储错误 → 工具错误（仅用于无法作为文本结果返回的情况）
pub(crate) fn material_error(err: MaterialError) -> ToolError {
    ToolError::Unavailable(err.to_string())
}

/// 注册内置的资料工具；index 为 None 时不提供检索工具
pub fn material_tools(
    store: Arc<dyn MaterialStore>,
    index: Option<Arc<MaterialIndex>>,
    default_top_k: usize,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(MaterialsMetadataTool::new(store.clone()));
    registry.register(ReadMaterialTool::new(store, 60_000));
    if let Some(index) = index {
        registry.register(SearchMaterialsTool::new(index, default_top_k));
    }
    registry
}
