//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / side_effects / execute），
//! 由 ToolRegistry 按名注册与查找；invoke 依次做能力解析、参数 Schema 校验、执行，
//! 失败统一映射为 ToolError，由 Worker 写成 tool 消息而不是中断运行。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::{validator_for, Validator};
use serde::Serialize;
use serde_json::Value;

use crate::core::ToolError;

/// 工具副作用声明（写入提示，供模型与审计日志参考）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SideEffects {
    pub network: bool,
    pub filesystem: bool,
    pub code_execution: bool,
    pub browser: bool,
}

impl SideEffects {
    pub const NONE: SideEffects = SideEffects {
        network: false,
        filesystem: false,
        code_execution: false,
        browser: false,
    };

    pub const NETWORK: SideEffects = SideEffects {
        network: true,
        ..SideEffects::NONE
    };

    pub const FILESYSTEM: SideEffects = SideEffects {
        filesystem: true,
        ..SideEffects::NONE
    };

    pub fn is_pure(&self) -> bool {
        *self == SideEffects::NONE
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、副作用、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（用于 JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；注册时编译，调用前校验
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn side_effects(&self) -> SideEffects {
        SideEffects::NONE
    }

    /// 执行工具；Err 为人类可读的失败原因
    async fn execute(&self, args: Value) -> Result<String, String>;

    /// 释放工具持有的外部资源（浏览器进程等）
    async fn shutdown(&self) {}
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    /// Schema 无法编译时为 None（只记录 warn，不做校验）
    validator: Option<Validator>,
}

/// 工具注册表：名称有序，to_schema_json 输出稳定
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// 注册工具；同名工具后注册者覆盖先注册者
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let validator = match validator_for(&tool.parameters_schema()) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "invalid parameters schema, skipping validation");
                None
            }
        };
        if self
            .tools
            .insert(name.clone(), RegisteredTool { tool, validator })
            .is_some()
        {
            tracing::warn!(tool = %name, "tool re-registered, previous definition replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|t| t.tool.clone())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 解析能力 → 校验参数 → 执行；任何一步失败都返回对应 ToolError
    pub async fn invoke(&self, name: &str, args: Value) -> Result<String, ToolError> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownCapability(name.to_string()))?;

        // 省略参数视为空对象
        let args = if args.is_null() {
            Value::Object(Default::default())
        } else {
            args
        };

        if let Some(validator) = &entry.validator {
            if !validator.is_valid(&args) {
                let reason = validator
                    .iter_errors(&args)
                    .map(|err| err.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(ToolError::InvalidArguments {
                    tool: name.to_string(),
                    reason,
                });
            }
        }

        entry
            .tool
            .execute(args)
            .await
            .map_err(|cause| ToolError::ExecutionFailed {
                tool: name.to_string(),
                cause,
            })
    }

    /// 依次释放所有工具的外部资源
    pub async fn shutdown_all(&self) {
        for (name, entry) in &self.tools {
            tracing::debug!(tool = %name, "shutting down tool");
            entry.tool.shutdown().await;
        }
    }

    /// 动态生成工具 schema JSON，拼入 Worker 的 system prompt
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|(name, entry)| {
                let mut spec = serde_json::json!({
                    "name": name,
                    "description": entry.tool.description(),
                    "parameters": entry.tool.parameters_schema(),
                });
                let effects = entry.tool.side_effects();
                if !effects.is_pure() {
                    spec["side_effects"] = serde_json::to_value(effects).unwrap_or(Value::Null);
                }
                spec
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}
