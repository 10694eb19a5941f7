//! Tools the reasoning loop can call.
//!
//! # Tools
//!
//! - **get_datetime**: current time, optionally in a named timezone
//! - **calculate**: arithmetic and math functions
//! - **web_search**: DuckDuckGo HTML search
//! - **read_file** / **write_file** / **list_directory** / **search_files**: filesystem access
//! - **run_command** / **run_python**: child processes with a hard timeout
//! - **list_skills** / **activate_skill** / **deactivate_skill**: skill state
//! - **recall_memory** / **update_user_profile** / **save_note**: identity and memory store
//!
//! `run_command` and `write_file` are registered only when named in
//! `tools.enabled`.

pub mod calculate;
pub mod datetime;
pub mod fs;
pub mod memory_tools;
pub mod registry;
pub mod shell;
pub mod skill_tools;
pub mod types;
pub mod web_search;

use std::sync::Arc;
use std::time::Duration;

pub use calculate::CalculateTool;
pub use datetime::DateTimeTool;
pub use fs::{ListDirectoryTool, ReadFileTool, SearchFilesTool, WriteFileTool};
pub use memory_tools::{RecallMemoryTool, SaveNoteTool, UpdateUserProfileTool};
pub use registry::ToolRegistry;
pub use shell::{RunCommandTool, RunPythonTool};
pub use skill_tools::{
    ActivateSkillTool, DeactivateSkillTool, ListSkillsTool, SKILL_MUTATING_TOOLS,
};
pub use types::{Tool, ToolResult, truncate_chars};
pub use web_search::WebSearchTool;

use crate::config::VoiceAgentConfig;
use crate::skills::SharedSkills;
use crate::soul::SharedSoul;

/// Tools enabled when `tools.enabled` is not set.
pub const DEFAULT_ENABLED_TOOLS: &[&str] = &[
    "get_datetime",
    "calculate",
    "web_search",
    "read_file",
    "run_python",
    "list_directory",
    "search_files",
    "list_skills",
    "activate_skill",
    "deactivate_skill",
    "recall_memory",
    "update_user_profile",
    "save_note",
];

/// Build the registry of built-in tools for one session.
///
/// Memory tools are only available when a soul store is supplied.
/// Unknown names in `tools.enabled` are logged and skipped.
pub fn create_default_registry(
    config: &VoiceAgentConfig,
    skills: SharedSkills,
    soul: Option<SharedSoul>,
) -> ToolRegistry {
    let tools_cfg = &config.tools;
    let workspace = tools_cfg.workspace_dir.clone();
    let command_timeout = Duration::from_secs(tools_cfg.command_timeout_secs);
    let tool_timeout = Duration::from_secs(config.agent.tool_timeout_secs);

    let mut available: Vec<Arc<dyn Tool>> = vec![
        Arc::new(DateTimeTool),
        Arc::new(CalculateTool),
        Arc::new(WebSearchTool::new(tool_timeout)),
        Arc::new(ReadFileTool::new(workspace.clone())),
        Arc::new(WriteFileTool::new(workspace.clone())),
        Arc::new(RunCommandTool::new(
            tools_cfg.allow_shell,
            command_timeout,
            workspace.clone(),
        )),
        Arc::new(RunPythonTool::new(
            tools_cfg.python_exec_enabled,
            tools_cfg.python_bin.clone(),
            command_timeout,
            workspace.clone(),
        )),
        Arc::new(ListDirectoryTool::new(workspace.clone())),
        Arc::new(SearchFilesTool::new(workspace)),
        Arc::new(ListSkillsTool::new(skills.clone())),
        Arc::new(ActivateSkillTool::new(skills.clone())),
        Arc::new(DeactivateSkillTool::new(skills)),
    ];
    if let Some(soul) = soul {
        available.push(Arc::new(RecallMemoryTool::new(
            soul.clone(),
            config.memory.recall_max_chars,
        )));
        available.push(Arc::new(UpdateUserProfileTool::new(soul.clone())));
        available.push(Arc::new(SaveNoteTool::new(soul)));
    }

    let enabled: Vec<String> = match &tools_cfg.enabled {
        Some(list) => list.clone(),
        None => DEFAULT_ENABLED_TOOLS.iter().map(|s| (*s).to_string()).collect(),
    };

    let mut registry = ToolRegistry::new(tool_timeout);
    for name in &enabled {
        match available.iter().find(|t| t.name() == name) {
            Some(tool) => registry.register(Arc::clone(tool)),
            None => tracing::warn!(tool = %name, "unknown tool in enabled list"),
        }
    }
    tracing::info!(tools = ?registry.names(), "tool registry ready");
    registry
}
