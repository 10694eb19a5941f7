//! Skill tools: `list_skills`, `activate_skill`, `deactivate_skill`.
//!
//! These mutate the shared [`SkillManager`](crate::skills::SkillManager);
//! the reasoning loop rebuilds its system prompt after either activation
//! tool runs.

use std::sync::{MutexGuard, PoisonError};

use super::types::{Tool, ToolResult};
use crate::llm::LlmError;
use crate::skills::{SharedSkills, SkillManager};

/// Tool names that change the active skill set.
pub const SKILL_MUTATING_TOOLS: [&str; 2] = ["activate_skill", "deactivate_skill"];

fn lock(skills: &SharedSkills) -> MutexGuard<'_, SkillManager> {
    skills.lock().unwrap_or_else(PoisonError::into_inner)
}

fn skill_name(args: &serde_json::Value) -> &str {
    args.get("name")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or_default()
}

fn name_schema(description: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "name": {
                "type": "string",
                "description": description
            }
        },
        "required": ["name"]
    })
}

/// Lists every discovered skill with its activation state.
pub struct ListSkillsTool {
    skills: SharedSkills,
}

impl ListSkillsTool {
    pub fn new(skills: SharedSkills) -> Self {
        Self { skills }
    }
}

impl Tool for ListSkillsTool {
    fn name(&self) -> &str {
        "list_skills"
    }

    fn description(&self) -> &str {
        "列出所有可用的Agent技能及其激活状态。"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}, "required": []})
    }

    fn execute(&self, _args: serde_json::Value) -> Result<ToolResult, LlmError> {
        let infos = lock(&self.skills).infos();
        if infos.is_empty() {
            return Ok(ToolResult::success("当前没有可用的技能。"));
        }
        let lines: Vec<String> = infos
            .iter()
            .map(|s| {
                let state = if s.active { "[已激活]" } else { "[未激活]" };
                format!("- {} {state}: {}", s.name, s.description)
            })
            .collect();
        Ok(ToolResult::success(lines.join("\n")))
    }
}

/// Activates a skill by name.
pub struct ActivateSkillTool {
    skills: SharedSkills,
}

impl ActivateSkillTool {
    pub fn new(skills: SharedSkills) -> Self {
        Self { skills }
    }
}

impl Tool for ActivateSkillTool {
    fn name(&self) -> &str {
        "activate_skill"
    }

    fn description(&self) -> &str {
        "激活一个Agent技能。激活后，技能的专业指令会加入到对话上下文中，增强该领域的能力。"
    }

    fn schema(&self) -> serde_json::Value {
        name_schema("要激活的技能名称")
    }

    fn execute(&self, args: serde_json::Value) -> Result<ToolResult, LlmError> {
        let name = skill_name(&args);
        if name.is_empty() {
            return Ok(ToolResult::failure("No skill name provided."));
        }
        let mut skills = lock(&self.skills);
        if skills.activate(name) {
            let description = skills
                .get(name)
                .map(|s| s.description.clone())
                .unwrap_or_default();
            Ok(ToolResult::success(format!("已激活技能: {name} - {description}")))
        } else {
            Ok(ToolResult::failure(format!(
                "未找到技能 '{name}'。可用技能: {}",
                skills.names().join(", ")
            )))
        }
    }
}

/// Deactivates an active skill.
pub struct DeactivateSkillTool {
    skills: SharedSkills,
}

impl DeactivateSkillTool {
    pub fn new(skills: SharedSkills) -> Self {
        Self { skills }
    }
}

impl Tool for DeactivateSkillTool {
    fn name(&self) -> &str {
        "deactivate_skill"
    }

    fn description(&self) -> &str {
        "停用一个已激活的Agent技能。"
    }

    fn schema(&self) -> serde_json::Value {
        name_schema("要停用的技能名称")
    }

    fn execute(&self, args: serde_json::Value) -> Result<ToolResult, LlmError> {
        let name = skill_name(&args);
        if name.is_empty() {
            return Ok(ToolResult::failure("No skill name provided."));
        }
        if lock(&self.skills).deactivate(name) {
            Ok(ToolResult::success(format!("已停用技能: {name}")))
        } else {
            Ok(ToolResult::failure(format!("技能 '{name}' 未处于激活状态。")))
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use std::sync::{Arc, Mutex};

    use super::*;

    fn shared() -> (tempfile::TempDir, SharedSkills) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("weather");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("SKILL.md"),
            "---\nname: weather\ndescription: 查询天气\n---\n先查日期。\n",
        )
        .unwrap();
        let mut mgr = SkillManager::new(vec![tmp.path().to_path_buf()]);
        mgr.discover();
        (tmp, Arc::new(Mutex::new(mgr)))
    }

    #[test]
    fn list_shows_activation_state() {
        let (_tmp, skills) = shared();
        let list = ListSkillsTool::new(skills.clone());
        let out = list.execute(serde_json::json!({})).unwrap();
        assert_eq!(out.content, "- weather [未激活]: 查询天气");

        ActivateSkillTool::new(skills)
            .execute(serde_json::json!({"name": "weather"}))
            .unwrap();
        let out = list.execute(serde_json::json!({})).unwrap();
        assert_eq!(out.content, "- weather [已激活]: 查询天气");
    }

    #[test]
    fn list_without_skills() {
        let skills: SharedSkills = Arc::new(Mutex::new(SkillManager::default()));
        let out = ListSkillsTool::new(skills)
            .execute(serde_json::json!({}))
            .unwrap();
        assert_eq!(out.content, "当前没有可用的技能。");
    }

    #[test]
    fn activate_and_deactivate() {
        let (_tmp, skills) = shared();
        let activate = ActivateSkillTool::new(skills.clone());
        let deactivate = DeactivateSkillTool::new(skills.clone());

        let out = activate
            .execute(serde_json::json!({"name": "weather"}))
            .unwrap();
        assert_eq!(out, ToolResult::success("已激活技能: weather - 查询天气"));
        assert!(skills.lock().unwrap().is_active("weather"));

        let out = deactivate
            .execute(serde_json::json!({"name": "weather"}))
            .unwrap();
        assert_eq!(out, ToolResult::success("已停用技能: weather"));

        let out = deactivate
            .execute(serde_json::json!({"name": "weather"}))
            .unwrap();
        assert_eq!(out, ToolResult::failure("技能 'weather' 未处于激活状态。"));
    }

    #[test]
    fn unknown_skill_lists_alternatives() {
        let (_tmp, skills) = shared();
        let out = ActivateSkillTool::new(skills)
            .execute(serde_json::json!({"name": "cooking"}))
            .unwrap();
        assert_eq!(out, ToolResult::failure("未找到技能 'cooking'。可用技能: weather"));
    }

    #[test]
    fn blank_name_is_rejected() {
        let (_tmp, skills) = shared();
        let out = ActivateSkillTool::new(skills)
            .execute(serde_json::json!({"name": " "}))
            .unwrap();
        assert_eq!(out, ToolResult::failure("No skill name provided."));
    }
}
