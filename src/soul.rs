//! Identity and memory file store.
//!
//! A soul directory holds four markdown files:
//!
//! - `SOUL.md`: who the agent is (personality, voice traits).
//! - `USER.md`: what the agent has learned about the user.
//! - `AGENT.md`: runtime agent instructions.
//! - `MEMORY.md`: timestamped session summaries, read on demand.
//!
//! `SOUL.md`, `USER.md` and `AGENT.md` are loaded once per connection.
//! `MEMORY.md` is never injected into the prompt; the model recalls it
//! through a tool.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Result, SpeechError};

const SOUL_FILE: &str = "SOUL.md";
const USER_FILE: &str = "USER.md";
const AGENT_FILE: &str = "AGENT.md";
const MEMORY_FILE: &str = "MEMORY.md";

const MEMORY_HEADER: &str = "# 对话记忆\n\n*此文件由 TinyAgent 自动维护，记录每次对话的关键摘要。*\n";
const USER_NOTES_HEADING: &str = "## 上下文笔记";
const OMITTED_MARKER: &str = "(较早的记忆已省略)";
/// A recall cut is moved forward to the next line break if one is this close.
const LINE_SNAP_CHARS: usize = 200;

/// Store shared between the session and the memory tools.
pub type SharedSoul = std::sync::Arc<std::sync::Mutex<SoulStore>>;

/// Status of the store, sent to clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SoulInfo {
    pub soul_loaded: bool,
    pub user_loaded: bool,
    pub agent_loaded: bool,
    pub memory_entries: usize,
    pub soul_chars: usize,
    pub user_chars: usize,
    pub agent_chars: usize,
}

/// File-backed agent identity, user profile and memory.
#[derive(Debug)]
pub struct SoulStore {
    dir: PathBuf,
    soul: String,
    user: String,
    agent: String,
}

impl SoulStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Memory`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            SpeechError::Memory(format!("cannot create soul dir {}: {e}", dir.display()))
        })?;
        Ok(Self {
            dir,
            soul: String::new(),
            user: String::new(),
            agent: String::new(),
        })
    }

    /// Directory backing this store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read `SOUL.md`, `USER.md` and `AGENT.md`. Missing files load as empty.
    pub fn load(&mut self) {
        self.soul = read_trimmed(&self.dir.join(SOUL_FILE));
        self.user = read_trimmed(&self.dir.join(USER_FILE));
        self.agent = read_trimmed(&self.dir.join(AGENT_FILE));
        tracing::info!(
            soul_chars = self.soul.chars().count(),
            user_chars = self.user.chars().count(),
            agent_chars = self.agent.chars().count(),
            "soul loaded"
        );
        if self.agent.is_empty() {
            tracing::warn!(dir = %self.dir.display(), "no AGENT.md found; agent instructions are empty");
        }
    }

    /// Identity portion of the system prompt.
    pub fn build_soul_prompt(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if !self.soul.is_empty() {
            parts.extend(["<agent_soul>", &self.soul, "</agent_soul>"]);
        }
        if !self.user.is_empty() {
            parts.extend(["\n<user_profile>", &self.user, "</user_profile>"]);
        }
        parts.join("\n")
    }

    /// `AGENT.md` content.
    pub fn agent_instructions(&self) -> &str {
        &self.agent
    }

    /// Most recent memory, at most about `max_chars` characters.
    ///
    /// Long memories keep their tail, starting at a line boundary when one
    /// is near, behind an omission marker. Returns an empty string when
    /// there is no memory.
    pub fn recall(&self, max_chars: usize) -> String {
        let content = read_trimmed(&self.dir.join(MEMORY_FILE));
        let total = content.chars().count();
        if total <= max_chars {
            return content;
        }

        let skip = total - max_chars;
        let start = content
            .char_indices()
            .nth(skip)
            .map_or(content.len(), |(i, _)| i);
        let mut tail = &content[start..];
        if let Some(nl) = tail.find('\n')
            && nl > 0
            && tail[..nl].chars().count() < LINE_SNAP_CHARS
        {
            tail = &tail[nl + 1..];
        }
        format!("{OMITTED_MARKER}\n\n{tail}")
    }

    /// Append a timestamped summary entry to `MEMORY.md`.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Memory`] if the file cannot be written.
    pub fn append_summary(&self, summary: &str) -> Result<()> {
        let path = self.dir.join(MEMORY_FILE);
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M");
        let mut content = match std::fs::read_to_string(&path) {
            Ok(existing) => existing,
            Err(_) => MEMORY_HEADER.to_string(),
        };
        content.push_str(&format!("\n## {now}\n\n{}\n", summary.trim()));
        std::fs::write(&path, content)
            .map_err(|e| SpeechError::Memory(format!("cannot write {}: {e}", path.display())))?;
        tracing::info!(chars = summary.chars().count(), "appended memory entry");
        Ok(())
    }

    /// Append a note to the user profile's context section.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Memory`] if `USER.md` cannot be written.
    pub fn update_user(&mut self, info: &str) -> Result<()> {
        let path = self.dir.join(USER_FILE);
        let existing = read_trimmed(&path);
        let updated = if existing.is_empty() {
            format!("# 用户档案\n\n{USER_NOTES_HEADING}\n\n- {info}")
        } else if existing.contains(USER_NOTES_HEADING) {
            format!("{existing}\n- {info}")
        } else {
            format!("{existing}\n\n{USER_NOTES_HEADING}\n\n- {info}")
        };
        std::fs::write(&path, format!("{updated}\n"))
            .map_err(|e| SpeechError::Memory(format!("cannot write {}: {e}", path.display())))?;
        self.user = updated;
        tracing::info!(chars = info.chars().count(), "updated user profile");
        Ok(())
    }

    /// Load flags and sizes.
    pub fn info(&self) -> SoulInfo {
        let memory_entries = std::fs::read_to_string(self.dir.join(MEMORY_FILE))
            .map(|c| c.matches("\n## ").count())
            .unwrap_or(0);
        SoulInfo {
            soul_loaded: !self.soul.is_empty(),
            user_loaded: !self.user.is_empty(),
            agent_loaded: !self.agent.is_empty(),
            memory_entries,
            soul_chars: self.soul.chars().count(),
            user_chars: self.user.chars().count(),
            agent_chars: self.agent.chars().count(),
        }
    }
}

fn read_trimmed(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(content) => content.trim().to_string(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read soul file");
            String::new()
        }
    }
}
