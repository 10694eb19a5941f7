//! Agent skills: discovery, activation state and system-prompt injection.
//!
//! A skill is a directory containing a `SKILL.md` file (see [`parse`]).
//! Every discovered skill is advertised to the model in an
//! `<available_skills>` block; the full instructions of *active* skills are
//! appended in an `<active_skill_instructions>` block.

pub mod parse;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Serialize;

pub use parse::{Skill, SkillParseError, parse_skill};

/// Skill state shared between the session, its reasoning loop and the skill tools.
pub type SharedSkills = std::sync::Arc<std::sync::Mutex<SkillManager>>;

/// Skill summary sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkillInfo {
    pub name: String,
    pub description: String,
    pub active: bool,
}

/// Discovers and tracks agent skills.
#[derive(Debug, Default)]
pub struct SkillManager {
    dirs: Vec<PathBuf>,
    skills: BTreeMap<String, Skill>,
    active: BTreeSet<String>,
}

impl SkillManager {
    /// Create a manager over the given skill directories.
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self {
            dirs,
            ..Self::default()
        }
    }

    /// Scan the configured directories for `SKILL.md` files.
    ///
    /// Missing directories are skipped. When two directories define the
    /// same name, the first one wins. Returns the number of skills found.
    pub fn discover(&mut self) -> usize {
        self.skills.clear();
        self.active.clear();
        for dir in &self.dirs {
            let Ok(entries) = std::fs::read_dir(dir) else {
                tracing::debug!(dir = %dir.display(), "skills directory does not exist");
                continue;
            };
            let mut children: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect();
            children.sort();

            for child in children {
                let Some(skill) = load_skill_dir(&child) else {
                    continue;
                };
                if self.skills.contains_key(&skill.name) {
                    tracing::warn!(
                        skill = %skill.name,
                        path = %child.display(),
                        "duplicate skill name, keeping first definition"
                    );
                    continue;
                }
                tracing::info!(skill = %skill.name, path = %child.display(), "discovered skill");
                self.skills.insert(skill.name.clone(), skill);
            }
        }
        tracing::info!(count = self.skills.len(), "skills discovered");
        self.skills.len()
    }

    /// Look up a skill by name.
    pub fn get(&self, name: &str) -> Option<&Skill> {
        self.skills.get(name)
    }

    /// All discovered skills, sorted by name.
    pub fn skills(&self) -> impl Iterator<Item = &Skill> {
        self.skills.values()
    }

    /// Sorted names of all discovered skills.
    pub fn names(&self) -> Vec<&str> {
        self.skills.keys().map(String::as_str).collect()
    }

    /// Sorted names of active skills.
    pub fn active_names(&self) -> Vec<&str> {
        self.active.iter().map(String::as_str).collect()
    }

    /// Whether `name` is currently active.
    pub fn is_active(&self, name: &str) -> bool {
        self.active.contains(name)
    }

    /// Activate a discovered skill. Returns `false` for unknown names.
    pub fn activate(&mut self, name: &str) -> bool {
        if self.skills.contains_key(name) {
            self.active.insert(name.to_string());
            tracing::info!(skill = %name, "skill activated");
            true
        } else {
            tracing::warn!(skill = %name, "cannot activate unknown skill");
            false
        }
    }

    /// Deactivate a skill. Returns `false` if it was not active.
    pub fn deactivate(&mut self, name: &str) -> bool {
        let removed = self.active.remove(name);
        if removed {
            tracing::info!(skill = %name, "skill deactivated");
        }
        removed
    }

    /// Skill summaries sorted by name.
    pub fn infos(&self) -> Vec<SkillInfo> {
        self.skills
            .values()
            .map(|s| SkillInfo {
                name: s.name.clone(),
                description: s.description.clone(),
                active: self.active.contains(&s.name),
            })
            .collect()
    }

    /// Append skill metadata and active instructions to `base`.
    pub fn build_system_prompt(&self, base: &str) -> String {
        let mut parts = vec![base.to_string()];

        if !self.skills.is_empty() {
            let mut block = String::from("\n<available_skills>\n");
            for skill in self.skills.values() {
                let active = if self.active.contains(&skill.name) {
                    " active=\"true\""
                } else {
                    ""
                };
                block.push_str(&format!(
                    "<skill{active}>\n  <name>{}</name>\n  <description>{}</description>\n</skill>\n",
                    skill.name, skill.description
                ));
            }
            block.push_str("</available_skills>\n");
            block.push_str(
                "\n你可以通过调用 activate_skill 工具来激活技能，或通过 list_skills 查看所有可用技能。\
                 当用户的请求匹配某个技能的描述时，你应该主动激活它。\n",
            );
            parts.push(block);
        }

        let active: Vec<&Skill> = self
            .active
            .iter()
            .filter_map(|name| self.skills.get(name))
            .collect();
        if !active.is_empty() {
            parts.push("\n<active_skill_instructions>".to_string());
            for skill in active {
                parts.push(format!("\n## 技能: {}\n", skill.name));
                parts.push(skill.instructions.clone());
            }
            parts.push("\n</active_skill_instructions>".to_string());
        }

        parts.join("\n")
    }
}

fn load_skill_dir(dir: &Path) -> Option<Skill> {
    let file = dir.join("SKILL.md");
    if !file.is_file() {
        return None;
    }
    let content = match std::fs::read_to_string(&file) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(path = %file.display(), error = %e, "failed to read SKILL.md");
            return None;
        }
    };
    match parse_skill(&content, dir.to_path_buf()) {
        Ok(skill) => Some(skill),
        Err(e) => {
            tracing::warn!(path = %file.display(), error = %e, "invalid SKILL.md");
            None
        }
    }
}
