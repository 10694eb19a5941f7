//! Memory tools: `recall_memory`, `update_user_profile`, `save_note`.

use std::sync::{MutexGuard, PoisonError};

use super::types::{Tool, ToolResult};
use crate::llm::LlmError;
use crate::soul::{SharedSoul, SoulStore};

fn lock(soul: &SharedSoul) -> MutexGuard<'_, SoulStore> {
    soul.lock().unwrap_or_else(PoisonError::into_inner)
}

fn text_arg<'a>(args: &'a serde_json::Value, field: &str) -> &'a str {
    args.get(field)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or_default()
}

/// Reads the tail of the conversation memory.
pub struct RecallMemoryTool {
    soul: SharedSoul,
    default_max_chars: usize,
}

impl RecallMemoryTool {
    pub fn new(soul: SharedSoul, default_max_chars: usize) -> Self {
        Self {
            soul,
            default_max_chars,
        }
    }
}

impl Tool for RecallMemoryTool {
    fn name(&self) -> &str {
        "recall_memory"
    }

    fn description(&self) -> &str {
        "回忆过去的对话记忆。当用户提到过去的对话内容、之前聊过的话题，或你需要参考历史上下文时使用。"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "max_chars": {
                    "type": "integer",
                    "description": "最多读取的字符数（默认4000）"
                }
            },
            "required": []
        })
    }

    fn execute(&self, args: serde_json::Value) -> Result<ToolResult, LlmError> {
        let max_chars = args
            .get("max_chars")
            .and_then(|v| v.as_u64())
            .map_or(self.default_max_chars, |v| v as usize);
        let memory = lock(&self.soul).recall(max_chars);
        if memory.is_empty() {
            Ok(ToolResult::success("暂无对话记忆。这可能是第一次对话。"))
        } else {
            Ok(ToolResult::success(memory))
        }
    }
}

/// Records a fact about the user in `USER.md`.
pub struct UpdateUserProfileTool {
    soul: SharedSoul,
}

impl UpdateUserProfileTool {
    pub fn new(soul: SharedSoul) -> Self {
        Self { soul }
    }
}

impl Tool for UpdateUserProfileTool {
    fn name(&self) -> &str {
        "update_user_profile"
    }

    fn description(&self) -> &str {
        "记录关于用户的新信息到用户档案。当你在对话中了解到用户的姓名、偏好、兴趣、工作等重要信息时调用。"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "info": {
                    "type": "string",
                    "description": "要记录的用户信息，如'用户名叫小明，是一名软件工程师'"
                }
            },
            "required": ["info"]
        })
    }

    fn execute(&self, args: serde_json::Value) -> Result<ToolResult, LlmError> {
        let info = text_arg(&args, "info");
        if info.is_empty() {
            return Ok(ToolResult::failure("No info provided."));
        }
        lock(&self.soul)
            .update_user(info)
            .map_err(|e| LlmError::Tool(e.to_string()))?;
        Ok(ToolResult::success(format!("已记录用户信息: {info}")))
    }
}

/// Appends a note to `MEMORY.md`.
pub struct SaveNoteTool {
    soul: SharedSoul,
}

impl SaveNoteTool {
    pub fn new(soul: SharedSoul) -> Self {
        Self { soul }
    }
}

impl Tool for SaveNoteTool {
    fn name(&self) -> &str {
        "save_note"
    }

    fn description(&self) -> &str {
        "保存重要信息到长期记忆。当对话中出现重要的事实、决定或用户明确要求你记住的内容时使用。"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "note": {
                    "type": "string",
                    "description": "要保存的笔记内容"
                }
            },
            "required": ["note"]
        })
    }

    fn execute(&self, args: serde_json::Value) -> Result<ToolResult, LlmError> {
        let note = text_arg(&args, "note");
        if note.is_empty() {
            return Ok(ToolResult::failure("No note provided."));
        }
        lock(&self.soul)
            .append_summary(note)
            .map_err(|e| LlmError::Tool(e.to_string()))?;
        Ok(ToolResult::success("已保存笔记到记忆中。"))
    }
}
