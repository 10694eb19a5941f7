//! `SKILL.md` parsing.
//!
//! A skill file starts with YAML frontmatter between `---` delimiters
//! carrying `name` and `description`; everything after the closing
//! delimiter is the instruction body injected when the skill is active.

use std::path::PathBuf;

use serde::Deserialize;

/// A skill loaded from a `SKILL.md` file.
#[derive(Debug, Clone, PartialEq)]
pub struct Skill {
    /// Unique skill name.
    pub name: String,
    /// One-line description shown to the model.
    pub description: String,
    /// Markdown instructions (body after the frontmatter).
    pub instructions: String,
    /// Directory containing `SKILL.md`.
    pub path: PathBuf,
    /// Optional version string.
    pub version: Option<String>,
    /// Optional tags.
    pub tags: Vec<String>,
}

/// Error parsing a `SKILL.md` file.
#[derive(Debug, thiserror::Error)]
pub enum SkillParseError {
    #[error("no YAML frontmatter found (expected --- delimiters)")]
    NoFrontmatter,

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Deserialize)]
struct RawFrontmatter {
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    version: Option<serde_yaml::Value>,
    #[serde(default)]
    tags: Vec<String>,
}

/// Parse `SKILL.md` content. `path` is the skill directory.
pub fn parse_skill(content: &str, path: PathBuf) -> Result<Skill, SkillParseError> {
    let (yaml, body) = split_frontmatter(content)?;
    let raw: RawFrontmatter = serde_yaml::from_str(yaml)?;

    let name = raw
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| SkillParseError::Validation("'name' is required".to_string()))?;
    let description = raw
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .ok_or_else(|| SkillParseError::Validation("'description' is required".to_string()))?;

    // `version: 1.0` parses as a float; keep whatever the author wrote.
    let version = raw.version.and_then(|v| match v {
        serde_yaml::Value::String(s) => Some(s),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    Ok(Skill {
        name,
        description,
        instructions: body.trim().to_string(),
        path,
        version,
        tags: raw.tags,
    })
}

/// Split content into `(frontmatter, body)`.
fn split_frontmatter(content: &str) -> Result<(&str, &str), SkillParseError> {
    let rest = content
        .trim_start()
        .strip_prefix("---")
        .ok_or(SkillParseError::NoFrontmatter)?;
    let rest = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))
        .ok_or(SkillParseError::NoFrontmatter)?;

    let end = rest.find("\n---").ok_or(SkillParseError::NoFrontmatter)?;
    let yaml = &rest[..end];
    let after = &rest[end + 4..];
    // Drop the remainder of the closing delimiter line.
    let body = after.find('\n').map_or("", |nl| &after[nl + 1..]);
    Ok((yaml, body))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn parses_frontmatter_and_body() {
        let content = r#"---
name: weather
description: 查询天气并给出穿衣建议
version: 1.2
tags: [life, weather]
---

## 指令

先获取日期，再搜索天气。
"#;
        let skill = parse_skill(content, PathBuf::from("/skills/weather")).unwrap();
        assert_eq!(skill.name, "weather");
        assert_eq!(skill.description, "查询天气并给出穿衣建议");
        assert_eq!(skill.version.as_deref(), Some("1.2"));
        assert_eq!(skill.tags, vec!["life", "weather"]);
        assert_eq!(skill.instructions, "## 指令\n\n先获取日期，再搜索天气。");
    }

    #[test]
    fn empty_body_is_allowed() {
        let content = "---\nname: simple\ndescription: A simple skill\n---\n";
        let skill = parse_skill(content, PathBuf::from("/skills/simple")).unwrap();
        assert!(skill.instructions.is_empty());
        assert!(skill.tags.is_empty());
        assert!(skill.version.is_none());
    }

    #[test]
    fn missing_frontmatter_is_rejected() {
        let err = parse_skill("# Title\n\ntext", PathBuf::from("/s")).unwrap_err();
        assert!(matches!(err, SkillParseError::NoFrontmatter));

        let err = parse_skill("---\nname: x\n", PathBuf::from("/s")).unwrap_err();
        assert!(matches!(err, SkillParseError::NoFrontmatter));
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        let err = parse_skill("---\ndescription: d\n---\n", PathBuf::from("/s")).unwrap_err();
        assert!(err.to_string().contains("name"));

        let err = parse_skill("---\nname: n\n---\n", PathBuf::from("/s")).unwrap_err();
        assert!(err.to_string().contains("description"));
    }

    #[test]
    fn invalid_yaml_is_rejected() {
        let err = parse_skill("---\nname: [unclosed\n---\n", PathBuf::from("/s")).unwrap_err();
        assert!(matches!(err, SkillParseError::Yaml(_)));
    }
}
