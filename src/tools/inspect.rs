//! Dataset preview tool.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::Tool;
use crate::agent::AgentSession;

/// Show the header and first rows of one dataset, or of all of them.
pub struct Inspect;

#[async_trait]
impl Tool for Inspect {
    fn name(&self) -> &str {
        "inspect"
    }

    fn description(&self) -> &str {
        "Preview uploaded datasets: column names, the first rows and the row count. \
         Always inspect a dataset before transforming or plotting it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dataset": {
                    "type": "string",
                    "description": "Dataset name (the CSV file name without extension), or 'all' for every dataset. Defaults to 'all'."
                }
            }
        })
    }

    async fn execute(&self, args: Value, session: &mut AgentSession) -> anyhow::Result<String> {
        let name = match args.get("dataset") {
            None | Some(Value::Null) => "all",
            Some(Value::String(s)) if s.trim().is_empty() => "all",
            Some(Value::String(s)) => s.trim(),
            Some(other) => anyhow::bail!("Argument 'dataset' must be a string, got {}", other),
        };
        let rows = session.preview_rows();

        if name.eq_ignore_ascii_case("all") {
            if session.datasets.is_empty() {
                return Ok("No datasets loaded.".to_string());
            }
            let previews: Vec<String> = session.datasets.iter().map(|d| d.preview(rows)).collect();
            return Ok(previews.join("\n"));
        }

        Ok(session.datasets.get(name)?.preview(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::plot::Plotter;
    use crate::data::{Dataset, Datasets};

    fn session() -> AgentSession {
        let mut sets = Datasets::new();
        sets.insert(Dataset::from_numbers("spring", &[("x", &[1.0, 2.0])]));
        sets.insert(Dataset::from_numbers("pendulum", &[("L", &[0.5])]));
        AgentSession::new(sets, std::env::temp_dir(), Plotter::bundled().expect("bundled font"))
    }

    #[tokio::test]
    async fn all_previews_every_dataset() {
        let mut session = session();
        let out = Inspect.execute(json!({}), &mut session).await.unwrap();
        assert!(out.contains("Dataset 'spring' (2 rows, 1 columns)"));
        assert!(out.contains("Dataset 'pendulum' (1 rows, 1 columns)"));
    }

    #[tokio::test]
    async fn unknown_dataset_lists_names() {
        let mut session = session();
        let err = Inspect
            .execute(json!({"dataset": "optics"}), &mut session)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("spring, pendulum"));
    }
}
