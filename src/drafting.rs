//! Introduction writing and task summarization from a book section.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::io::AsyncWriteExt;

use crate::llm::{self, strip_code_fence, ChatMessage, ChatOptions, LlmClient};

/// Append-only report draft on disk, shared by every writing stage of a run.
#[derive(Debug, Clone)]
pub struct DraftBuffer {
    path: PathBuf,
}

impl DraftBuffer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncate (or create) the draft at the start of a run.
    pub async fn reset(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, "")
            .await
            .with_context(|| format!("truncating draft {}", self.path.display()))
    }

    /// Append one fragment followed by a newline.
    pub async fn append(&self, fragment: &str) -> anyhow::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening draft {}", self.path.display()))?;
        file.write_all(fragment.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn read(&self) -> anyhow::Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading draft {}", self.path.display()))
    }
}

const LATEX_WRITER_SYSTEM: &str =
    "You are a helpful assistant who writes physics lab reports in LaTeX.";
const SUMMARIZER_SYSTEM: &str =
    "You are a helpful assistant who is good at condensing and extracting information.";

/// Stateless model transforms over the retrieved instructions.
pub struct Drafter {
    llm: Arc<dyn LlmClient>,
    model: String,
    language: String,
}

impl Drafter {
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

    /// Abstract, principles and apparatus/procedure sections, appended to `draft`.
    pub async fn write_introduction(
        &self,
        title: &str,
        section_text: &str,
        draft: &DraftBuffer,
    ) -> anyhow::Result<String> {
        let prompt = format!(
            "Using the instruction book excerpt below, write three parts of a lab report on the \
             experiment \"{title}\" in LaTeX: 1. Abstract, 2. Principles, \
             3. Apparatus and Procedure.\n\
             Format: only these three \\section blocks. Do not include \\documentclass, \
             \\usepackage, \\begin{{document}} or \\end{{document}}.\n\
             Requirements: 1. the abstract states which method and apparatus were used, what was \
             measured and what was obtained; 2. the principles explain the physics involved and \
             derive the formulas (follow the book); 3. the apparatus and procedure part gives a \
             detailed list of instruments and brief steps (follow the book).\n\
             Write in {language}.\n\
             Instruction book excerpt:\n{section_text}",
            title = title,
            language = self.language,
            section_text = section_text,
        );
        let messages = [ChatMessage::system(LATEX_WRITER_SYSTEM), ChatMessage::user(prompt)];
        let raw = llm::complete_text(
            self.llm.as_ref(),
            &self.model,
            &messages,
            ChatOptions::temperature(0.1),
        )
        .await?;

        let introduction = strip_code_fence(&raw);
        draft.append(&introduction).await?;
        tracing::info!("Introduction written ({} chars)", introduction.len());
        Ok(introduction)
    }

    /// Condensed list of data processing tasks, uncertainty work left out.
    pub async fn summarize_tasks(&self, section_text: &str) -> anyhow::Result<String> {
        let prompt = format!(
            "From the instruction book excerpt below, extract the tasks to complete in the data \
             processing part, as concisely as possible. Leave out any uncertainty or error \
             analysis calculations. For every plot to draw, state whether it needs a linear fit \
             or a plain curve.\n\
             Instruction book excerpt:\n{}",
            section_text
        );
        let messages = [ChatMessage::system(SUMMARIZER_SYSTEM), ChatMessage::user(prompt)];
        let raw = llm::complete_text(
            self.llm.as_ref(),
            &self.model,
            &messages,
            ChatOptions::temperature(0.0),
        )
        .await?;
        Ok(strip_code_fence(&raw))
    }
}
