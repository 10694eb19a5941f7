//! System prompt composition: identity, agent instructions, skills.

use std::sync::PoisonError;

use crate::skills::SharedSkills;
use crate::soul::SharedSoul;

/// Persona used when neither `SOUL.md` nor `AGENT.md` provides one.
pub const DEFAULT_SYSTEM_PROMPT: &str = "你是一个友好的中文语音助手。请用简洁、口语化的中文回复，适合语音播报。回复尽量短一些，一两句话为宜。";

/// Built-in agent instructions appended to the default persona.
pub const DEFAULT_AGENT_INSTRUCTIONS: &str = "<agent_instructions>
你是一个强大的语音智能体。你具备以下能力：
1. 使用工具来获取实时信息、执行计算、搜索互联网、读写文件等。
2. 动态加载和使用技能（Skills）来增强特定领域的能力。
3. 回忆过去的对话（recall_memory）和记录用户信息（update_user_profile）。
4. 用简洁、口语化的中文回复，适合语音播报。

重要规则：
- 回复要简洁自然，适合语音朗读。不要使用 markdown 格式、代码块或特殊符号。
- 当需要获取实时信息（时间、天气、新闻等）时，主动使用对应工具。
- 当用户的请求涉及特定领域时，考虑激活相应技能。
- 工具调用的结果要自然地融入回复中，而不是直接念出原始数据。
- 如果工具调用失败，简要告知用户并提供替代方案。
- 当你了解到用户的重要信息（姓名、偏好、兴趣等）时，用 update_user_profile 记录下来。
- 当用户提到过去的对话或你需要上下文时，用 recall_memory 查看记忆。
</agent_instructions>";

/// The collaborators a system prompt is built from.
#[derive(Clone)]
pub struct PromptContext {
    pub skills: SharedSkills,
    pub soul: Option<SharedSoul>,
}

impl std::fmt::Debug for PromptContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptContext")
            .field("soul", &self.soul.is_some())
            .finish_non_exhaustive()
    }
}

impl PromptContext {
    pub fn new(skills: SharedSkills, soul: Option<SharedSoul>) -> Self {
        Self { skills, soul }
    }

    /// Soul prompt and `AGENT.md` joined by a newline, falling back to the
    /// default persona, then passed through the skill manager.
    pub fn build_system_prompt(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(soul) = &self.soul {
            let soul = soul.lock().unwrap_or_else(PoisonError::into_inner);
            let identity = soul.build_soul_prompt();
            if !identity.is_empty() {
                parts.push(identity);
            }
            let instructions = soul.agent_instructions();
            if !instructions.is_empty() {
                parts.push(instructions.to_string());
            }
        }

        let base = if parts.is_empty() {
            format!("{DEFAULT_SYSTEM_PROMPT}\n\n{DEFAULT_AGENT_INSTRUCTIONS}")
        } else {
            parts.join("\n")
        };

        self.skills
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .build_system_prompt(&base)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::skills::SkillManager;
    use crate::soul::SoulStore;

    #[test]
    fn default_prompt_without_identity() {
        let ctx = PromptContext::new(Arc::new(Mutex::new(SkillManager::default())), None);
        let prompt = ctx.build_system_prompt();
        assert!(prompt.starts_with(DEFAULT_SYSTEM_PROMPT));
        assert!(prompt.contains("<agent_instructions>"));
    }

    #[test]
    fn identity_replaces_default() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("SOUL.md"), "我叫小T。").unwrap();
        std::fs::write(tmp.path().join("AGENT.md"), "只说中文。").unwrap();
        let mut store = SoulStore::open(tmp.path()).unwrap();
        store.load();

        let ctx = PromptContext::new(
            Arc::new(Mutex::new(SkillManager::default())),
            Some(Arc::new(Mutex::new(store))),
        );
        assert_eq!(
            ctx.build_system_prompt(),
            "<agent_soul>\n我叫小T。\n</agent_soul>\n只说中文。"
        );
    }
}
