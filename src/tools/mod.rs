//! 工具层：注册表、执行器与内置工具

pub mod arxiv;
pub mod calculator;
pub mod executor;
pub mod fetch;
pub mod filesystem;
pub mod python;
pub mod registry;
pub mod schema;
pub mod web_search;
pub mod wikipedia;

#[cfg(feature = "browser")]
pub mod browser;

pub use arxiv::ArxivTool;
pub use calculator::CalculatorTool;
pub use executor::{ToolExecutor, ToolInvocation};
pub use fetch::FetchTool;
pub use filesystem::{
    CopyFileTool, DeleteFileTool, FileSearchTool, ListDirectoryTool, MoveFileTool, ReadFileTool,
    SafeFs, SandboxError, WriteFileTool,
};
pub use python::PythonTool;
pub use registry::{SideEffects, Tool, ToolRegistry};
pub use schema::{tool_call_schema_json, ToolCall};
pub use web_search::WebSearchTool;
pub use wikipedia::WikipediaTool;

#[cfg(feature = "browser")]
pub use browser::BrowserTool;
