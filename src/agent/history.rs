//! Conversation history maintenance.

use crate::llm::{Message, MessageContent, Role};
use crate::tools::truncate_chars;

/// Drop a trailing assistant tool-call message whose results are incomplete.
///
/// A turn cancelled between recording a tool-call message and recording
/// all of its results leaves history the upstream API would reject. The
/// dangling call message and any partial results after it are removed.
/// Returns `true` if anything was dropped.
pub fn sanitize_history(history: &mut Vec<Message>) -> bool {
    let Some(pos) = history
        .iter()
        .rposition(|m| m.role == Role::Assistant && !m.tool_calls.is_empty())
    else {
        return false;
    };

    let answered: Vec<&str> = history[pos + 1..]
        .iter()
        .filter_map(Message::tool_call_id)
        .collect();
    let complete = history[pos]
        .tool_calls
        .iter()
        .all(|call| answered.contains(&call.call_id.as_str()));
    if complete {
        return false;
    }

    // Keep anything after the partial results (there should be nothing).
    let tail: Vec<Message> = history
        .drain(pos..)
        .skip(1)
        .filter(|m| m.role != Role::Tool)
        .collect();
    tracing::warn!(
        dropped_at = pos,
        "removed tool-call message with incomplete results from history"
    );
    history.extend(tail);
    true
}

/// Rewrite tool-formatted history as plain messages.
///
/// Assistant tool calls become `[调用工具 name: args]` lines and tool
/// results become user messages `[工具 name 返回] content`, so a request
/// without a tool manifest is accepted by every provider.
pub fn history_to_prose(history: &[Message]) -> Vec<Message> {
    history
        .iter()
        .map(|msg| match (&msg.role, &msg.content) {
            (Role::Assistant, MessageContent::Text { text }) if !msg.tool_calls.is_empty() => {
                let mut lines: Vec<String> = Vec::new();
                if !text.trim().is_empty() {
                    lines.push(text.clone());
                }
                lines.extend(
                    msg.tool_calls
                        .iter()
                        .map(|c| format!("[调用工具 {}: {}]", c.function_name, c.arguments)),
                );
                Message::assistant(lines.join("\n"))
            }
            (_, MessageContent::ToolResult { name, content, .. }) => {
                Message::user(format!("[工具 {name} 返回] {content}"))
            }
            _ => msg.clone(),
        })
        .collect()
}

/// One-paragraph summary of a session for the memory store.
///
/// Covers the first five user messages (80 chars each) and the last
/// assistant reply (100 chars). Returns `None` if the user never spoke.
pub fn session_summary(history: &[Message], completed_turns: u32) -> Option<String> {
    let user_messages: Vec<&str> = history
        .iter()
        .filter(|m| m.role == Role::User && m.tool_call_id().is_none())
        .map(Message::text_content)
        .filter(|t| !t.is_empty())
        .collect();
    if user_messages.is_empty() {
        return None;
    }

    let topics: Vec<String> = user_messages
        .iter()
        .take(5)
        .map(|t| truncate_chars(t, 80).0)
        .collect();
    let mut summary = format!("对话 ({completed_turns} 轮): 用户问了 {}", topics.join("; "));

    if let Some(last_reply) = history
        .iter()
        .rev()
        .filter(|m| m.role == Role::Assistant)
        .map(Message::text_content)
        .find(|t| !t.is_empty())
    {
        summary.push_str(&format!("。最后的回复涉及: {}", truncate_chars(last_reply, 100).0));
    }
    Some(summary)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::llm::AssistantToolCall;

    fn call(id: &str, name: &str) -> AssistantToolCall {
        AssistantToolCall {
            call_id: id.into(),
            function_name: name.into(),
            arguments: "{}".into(),
        }
    }

    #[test]
    fn complete_history_is_untouched() {
        let mut history = vec![
            Message::user("几点了"),
            Message::assistant_with_tool_calls(None, vec![call("c1", "get_datetime")]),
            Message::tool_result("c1", "get_datetime", "09:00"),
            Message::assistant("九点了。"),
        ];
        let before = history.clone();
        assert!(!sanitize_history(&mut history));
        assert_eq!(history, before);
    }

    #[test]
    fn dangling_tool_calls_are_dropped() {
        let mut history = vec![
            Message::user("几点了，顺便算一下"),
            Message::assistant_with_tool_calls(
                None,
                vec![call("c1", "get_datetime"), call("c2", "calculate")],
            ),
            Message::tool_result("c1", "get_datetime", "09:00"),
        ];
        assert!(sanitize_history(&mut history));
        assert_eq!(history, vec![Message::user("几点了，顺便算一下")]);
    }

    #[test]
    fn prose_conversion() {
        let history = vec![
            Message::system("sys"),
            Message::user("几点了"),
            Message::assistant_with_tool_calls(Some("我查一下".into()), vec![call("c1", "get_datetime")]),
            Message::tool_result("c1", "get_datetime", "09:00"),
        ];
        let prose = history_to_prose(&history);
        assert_eq!(prose[0], Message::system("sys"));
        assert_eq!(prose[2], Message::assistant("我查一下\n[调用工具 get_datetime: {}]"));
        assert_eq!(prose[3], Message::user("[工具 get_datetime 返回] 09:00"));
        assert!(prose.iter().all(|m| m.tool_calls.is_empty()));
    }

    #[test]
    fn summary_uses_first_questions_and_last_reply() {
        let history = vec![
            Message::user("今天天气怎么样"),
            Message::assistant("今天晴。"),
            Message::user("那明天呢"),
            Message::assistant("明天有雨。"),
        ];
        assert_eq!(
            session_summary(&history, 2).unwrap(),
            "对话 (2 轮): 用户问了 今天天气怎么样; 那明天呢。最后的回复涉及: 明天有雨。"
        );
    }

    #[test]
    fn summary_truncates_and_skips_empty() {
        let long = "问".repeat(100);
        let history = vec![Message::user(long)];
        let summary = session_summary(&history, 1).unwrap();
        assert_eq!(summary.chars().filter(|c| *c == '问').count(), 80);
        assert!(!summary.contains("最后的回复"));
        assert!(session_summary(&[Message::assistant("hi")], 1).is_none());
    }
}
