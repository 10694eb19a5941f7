//! `get_datetime` tool.

use chrono::{DateTime, Datelike, TimeZone};

use super::types::{Tool, ToolResult};
use crate::llm::LlmError;

const WEEKDAYS: [&str; 7] = ["日", "一", "二", "三", "四", "五", "六"];

/// Reports the current date and time, optionally in an IANA timezone.
pub struct DateTimeTool;

/// Format as `YYYY-MM-DD HH:MM:SS TZ (星期X)`.
pub fn format_with_weekday<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let weekday = WEEKDAYS[now.weekday().num_days_from_sunday() as usize];
    format!("{} (星期{weekday})", now.format("%Y-%m-%d %H:%M:%S %Z"))
}

impl Tool for DateTimeTool {
    fn name(&self) -> &str {
        "get_datetime"
    }

    fn description(&self) -> &str {
        "获取当前日期和时间。可选指定时区（如 Asia/Shanghai, America/New_York）。"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "timezone": {
                    "type": "string",
                    "description": "IANA时区名称，如 Asia/Shanghai。留空使用服务器本地时间。"
                }
            },
            "required": []
        })
    }

    fn execute(&self, args: serde_json::Value) -> Result<ToolResult, LlmError> {
        let tz_name = args
            .get("timezone")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or_default();

        if tz_name.is_empty() {
            return Ok(ToolResult::success(format_with_weekday(&chrono::Local::now())));
        }

        match tz_name.parse::<chrono_tz::Tz>() {
            Ok(tz) => Ok(ToolResult::success(format_with_weekday(
                &chrono::Utc::now().with_timezone(&tz),
            ))),
            Err(e) => Ok(ToolResult::failure(format!("Error: {e}"))),
        }
    }
}
