//! Current time tool.

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde_json::{Value, json};

use stepwise_core::error::ToolError;
use stepwise_core::tool::Tool;

/// Reports the current time, optionally shifted to a fixed UTC offset.
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time (RFC 3339) and Unix timestamp. \
         Pass utc_offset_hours to get local time at a fixed offset."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "utc_offset_hours": {
                    "type": "number",
                    "description": "Offset from UTC in hours, between -12 and 14 (default 0)"
                }
            }
        })
    }

    async fn invoke(&self, arguments: Value) -> Result<Value, ToolError> {
        let hours = match arguments.get("utc_offset_hours") {
            None | Some(Value::Null) => 0.0,
            Some(v) => v.as_f64().ok_or_else(|| {
                ToolError::InvalidArguments("'utc_offset_hours' must be a number".into())
            })?,
        };
        if !(-12.0..=14.0).contains(&hours) {
            return Err(ToolError::InvalidArguments(format!(
                "utc_offset_hours {hours} is outside -12..=14"
            )));
        }

        let offset = FixedOffset::east_opt((hours * 3600.0).round() as i32)
            .ok_or_else(|| ToolError::InvalidArguments(format!("invalid offset {hours}")))?;
        let now = Utc::now().with_timezone(&offset);

        Ok(json!({
            "datetime": now.to_rfc3339(),
            "unix": now.timestamp(),
            "utc_offset_hours": hours,
        }))
    }
}
