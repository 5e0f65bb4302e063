//! Run log tool.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{str_arg, Tool};
use crate::agent::AgentSession;

/// Append findings to the processing log handed to the report writer.
pub struct WriteLog;

#[async_trait]
impl Tool for WriteLog {
    fn name(&self) -> &str {
        "write_log"
    }

    fn description(&self) -> &str {
        "Record the important results of data processing (computed values, fitted parameters, \
         figure and table names) in experiment order. Call it once all tasks are done."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "Log text to append"
                }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, args: Value, session: &mut AgentSession) -> anyhow::Result<String> {
        let text = str_arg(&args, "text")?;
        session.append_log(text);
        Ok(format!("Log written ({} chars).", text.chars().count()))
    }
}
