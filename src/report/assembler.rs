//! Results/discussion writing and whole-document finalization.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use crate::drafting::DraftBuffer;
use crate::llm::{self, strip_code_fence, ChatMessage, ChatOptions, LlmClient};

const WRITER_SYSTEM: &str = "You are a helpful assistant who writes physics lab reports in LaTeX.";

/// Everything the data agent produced, in the order it was produced.
#[derive(Debug, Clone, Copy)]
pub struct AgentArtifacts<'a> {
    pub tasks: &'a str,
    pub log: &'a str,
    pub tables: &'a [PathBuf],
    pub figures: &'a [PathBuf],
    /// User explanation of the uploaded tables.
    pub description: Option<&'a str>,
}

pub struct Assembler {
    llm: Arc<dyn LlmClient>,
    model: String,
    language: String,
}

impl Assembler {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            model: model.into(),
            language: language.into(),
        }
    }

    /// Data processing and discussion sections, appended to `draft`.
    pub async fn write_results(
        &self,
        artifacts: &AgentArtifacts<'_>,
        draft: &DraftBuffer,
    ) -> anyhow::Result<String> {
        let prompt = results_prompt(artifacts, &self.language);
        let messages = [ChatMessage::system(WRITER_SYSTEM), ChatMessage::user(prompt)];
        let raw = llm::complete_text(
            self.llm.as_ref(),
            &self.model,
            &messages,
            ChatOptions::temperature(0.0),
        )
        .await?;

        let sections = strip_code_fence(&raw);
        draft.append(&sections).await?;
        tracing::info!("Results and discussion written ({} chars)", sections.len());
        Ok(sections)
    }

    /// Rewrite the whole draft as a compilable document saved as `tmp_dir/<title>.tex`.
    pub async fn finalize(
        &self,
        title: &str,
        draft: &DraftBuffer,
        tmp_dir: &Path,
    ) -> anyhow::Result<PathBuf> {
        let body = draft.read().await?;
        let prompt = format!(
            "Turn the following LaTeX draft into complete, compilable LaTeX source:\n{body}\n\n\
             Requirements:\n\
             1. The report title is: {title}\n\
             2. Do not change the content of the draft; keep every sentence, formula, \
             figure and table.\n\
             3. Add the document class, the packages needed (graphicx, float, amsmath, geometry, \
             and ctex for Chinese text), and \\geometry margins of about 2.5cm.\n\
             4. Place every figure and table with [H].\n\
             5. The code must compile with xelatex. Answer with the LaTeX source only.",
            body = body,
            title = title,
        );
        let messages = [ChatMessage::system(WRITER_SYSTEM), ChatMessage::user(prompt)];
        let raw = llm::complete_text(
            self.llm.as_ref(),
            &self.model,
            &messages,
            ChatOptions::temperature(0.0),
        )
        .await?;

        let source = strip_code_fence(&raw);
        tokio::fs::create_dir_all(tmp_dir).await?;
        let path = tmp_dir.join(format!("{}.tex", title));
        tokio::fs::write(&path, &source)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::info!("Final source written to {}", path.display());
        Ok(path)
    }
}

fn path_list(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "(none)".to_string();
    }
    paths
        .iter()
        .map(|p| format!("- {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn results_prompt(artifacts: &AgentArtifacts<'_>, language: &str) -> String {
    let description = artifacts
        .description
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or("(none)");

    format!(
        "Write the data processing and the analysis and discussion parts of a physics lab \
         report in LaTeX, from the experiment requirements and data below. Include explanatory \
         text, the figures and the raw data tables, following the order of the tasks.\n\n\
         Data processing tasks:\n{tasks}\n\n\
         Important information recorded during data processing:\n{log}\n\n\
         Raw data tables (already rendered as images, include each with \\includegraphics):\n\
         {tables}\n\n\
         Explanation of the table names: {description}\n\n\
         Figures (include each with \\includegraphics):\n{figures}\n\n\
         Write in {language}. Answer with LaTeX in this form:\n\
         \\section{{Data Processing}}\n\
         explanations, figures and raw data tables, in task order\n\n\
         \\section{{Analysis and Discussion}}\n\
         analysis and discussion text",
        tasks = artifacts.tasks.trim(),
        log = artifacts.log.trim(),
        tables = path_list(artifacts.tables),
        description = description,
        figures = path_list(artifacts.figures),
        language = language,
    )
}
