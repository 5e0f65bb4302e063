//! Column expression tool.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{str_arg, Tool};
use crate::agent::AgentSession;
use crate::data::expr;

/// Derive or overwrite columns with the restricted expression language.
pub struct Transform;

#[async_trait]
impl Tool for Transform {
    fn name(&self) -> &str {
        "transform"
    }

    fn description(&self) -> &str {
        "Compute columns. Statements are separated by ';' or new lines. \
         Assign with 'dataset.new_col = expression'; inside a statement bare column names \
         refer to the target's dataset, and names with spaces are written dataset[\"F (N)\"]. \
         Operators: + - * / % ^. Elementwise functions: sqrt abs exp ln log10 log2 sin cos tan \
         asin acos atan sinh cosh tanh deg rad round floor ceil pow(a,b) atan2(a,b) min2(a,b) \
         max2(a,b). Aggregates returning one number: mean sum min max std var count first last. \
         Constants: pi, e, g (9.8). A statement without '=' just reports its value."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Expression program, e.g. \"spring.k = spring.F / spring.x; mean(spring.k)\""
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, args: Value, session: &mut AgentSession) -> anyhow::Result<String> {
        let code = str_arg(&args, "code")?;
        let outcome = expr::execute(code, &mut session.datasets)?;
        tracing::debug!("transform applied: {}", outcome);

        let mut out = format!("Executed successfully.\n{}", outcome);
        let mut touched: Vec<&str> = outcome
            .assigned
            .iter()
            .filter_map(|a| a.split_once('.').map(|(ds, _)| ds))
            .collect();
        touched.dedup();
        for name in touched {
            if let Ok(dataset) = session.datasets.get(name) {
                out.push('\n');
                out.push_str(&dataset.preview(session.preview_rows()));
            }
        }
        Ok(out)
    }
}
