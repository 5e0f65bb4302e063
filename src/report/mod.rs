//! End-to-end workflows: book ingestion and report generation.
//!
//! Every stage runs to completion before the next one starts. Failures
//! surface as `anyhow` errors carrying a [`PipelineError`], a
//! [`WorkspaceError`](crate::workspace::WorkspaceError) or the failing
//! stage's own error; the CLI turns them into the status lines below.

pub mod assembler;
pub mod compiler;

pub use assembler::{AgentArtifacts, Assembler};
pub use compiler::LatexCompiler;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use crate::agent::{AgentSession, DataAgent, TerminalReason};
use crate::config::Config;
use crate::corpus::{
    rasterize_pdf, BookPages, CorpusStore, HeadingPageReader, IngestSummary, PageReader,
    Segmenter, SegmenterOptions, VisionPageReader,
};
use crate::data::plot::Plotter;
use crate::data::Datasets;
use crate::drafting::{DraftBuffer, Drafter};
use crate::llm::{LlmClient, OpenAiClient};
use crate::retrieval::{LlmTitleMatcher, SectionRetriever, TitleMatcher};
use crate::workspace::{Workspace, WorkspaceError};

pub const INGEST_OK: &str = "Book Successfully Loaded!";
pub const INGEST_FAILED: &str = "Failed to Load the Book.";
pub const REPORT_OK: &str = "Report Successfully Written!";
pub const REPORT_FAILED: &str = "Failed to Write the Report.";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No section of the book matches '{query}' (resolved to '{resolved}')")]
    SectionNotFound { query: String, resolved: String },

    #[error("Data agent stopped after {iterations} iterations without finishing its tasks")]
    AgentIncomplete { iterations: usize },

    #[error("Data agent failed: {0}")]
    AgentFailed(String),
}

/// One report request.
#[derive(Debug, Clone)]
pub struct ReportRequest {
    pub book: String,
    /// Experiment name as the user typed it; also the report title.
    pub title: String,
    /// CSV files to upload, one dataset each.
    pub data_files: Vec<PathBuf>,
    /// Free-form explanation of the uploaded files.
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReportOutput {
    pub run_id: Uuid,
    pub resolved_title: String,
    /// Delivered PDF, or the `.tex` source when compilation is disabled.
    pub output: PathBuf,
    pub agent_iterations: usize,
    pub figures: Vec<PathBuf>,
}

pub struct ReportPipeline {
    config: Config,
    workspace: Workspace,
    llm: Arc<dyn LlmClient>,
}

impl ReportPipeline {
    pub fn new(config: Config, llm: Arc<dyn LlmClient>) -> Self {
        let workspace = Workspace::new(config.workspace_dir.clone());
        Self {
            config,
            workspace,
            llm,
        }
    }

    /// Pipeline talking to the configured OpenAI-compatible endpoint.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let llm = OpenAiClient::from_config(&config.llm)?;
        tracing::debug!("Chat endpoint {}", llm.endpoint());
        Ok(Self::new(config, Arc::new(llm)))
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Model-backed title resolution on the chat model.
    pub fn title_matcher(&self) -> LlmTitleMatcher {
        LlmTitleMatcher::new(self.llm.clone(), self.config.llm.chat_model.clone())
    }

    fn corpus(&self, book: &str) -> Result<CorpusStore, WorkspaceError> {
        Workspace::check_name(book)?;
        let store = CorpusStore::new(self.workspace.corpus_path(book));
        if !store.exists() {
            return Err(WorkspaceError::MissingCorpus(store.path().to_path_buf()));
        }
        Ok(store)
    }

    /// Rebuild the corpus of `book`, optionally uploading its PDF first.
    ///
    /// A scanned PDF is read page by page with the vision model. A book
    /// directory holding only `.txt`/`.md` pages is segmented offline.
    pub async fn ingest_book(
        &self,
        book: &str,
        pdf: Option<&Path>,
    ) -> anyhow::Result<IngestSummary> {
        Workspace::check_name(book)?;
        let book_dir = self.workspace.book_dir(book);
        if let Some(pdf) = pdf {
            let placed = self.workspace.place_file(pdf, &book_dir).await?;
            tracing::info!("Uploaded {} to {}", pdf.display(), placed.display());
        }

        let store = CorpusStore::new(self.workspace.corpus_path(book));
        let options = SegmenterOptions {
            flush_trailing_section: self.config.ingest.flush_trailing_section,
        };

        let summary = match self.workspace.find_book_pdf(book) {
            Ok(pdf) => {
                let pages_dir = self.workspace.tmp_dir().join("pages").join(book);
                Workspace::reset_dir(&pages_dir).await?;
                let ingest = &self.config.ingest;
                let images =
                    rasterize_pdf(&ingest.pdftoppm, &pdf, ingest.dpi, &pages_dir).await?;
                tracing::info!("Ingesting {} ({} pages) with the vision model", book, images.len());

                let reader =
                    VisionPageReader::new(self.llm.clone(), self.config.llm.vision_model.clone());
                let pages = BookPages::from_images(images);
                let summary = segment(&reader, &store, options, &pages).await;
                Workspace::remove_dir(&pages_dir).await?;
                summary?
            }
            Err(missing) => {
                let pages = self.workspace.book_text_pages(book);
                if pages.is_empty() {
                    return Err(missing.into());
                }
                tracing::info!("Ingesting {} ({} text pages) offline", book, pages.len());
                let reader = HeadingPageReader::new();
                segment(&reader, &store, options, &BookPages::from_text_files(pages)).await?
            }
        };

        tracing::info!(
            "Corpus {} holds {} sections from {} pages",
            store.path().display(),
            summary.sections_written,
            summary.pages
        );
        Ok(summary)
    }

    /// Titles of an ingested book, in corpus order.
    pub fn titles(&self, book: &str) -> anyhow::Result<Vec<String>> {
        Ok(self.corpus(book)?.titles()?)
    }

    /// Resolve `query` with `matcher` and return the resolved title and section text.
    pub async fn lookup(
        &self,
        book: &str,
        query: &str,
        matcher: &dyn TitleMatcher,
    ) -> anyhow::Result<(String, String)> {
        SectionRetriever::new(self.corpus(book)?).fetch(query, matcher).await
    }

    /// Write the report for `request` and deliver it under `final_pdf/`.
    pub async fn generate_report(&self, request: &ReportRequest) -> anyhow::Result<ReportOutput> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("report", run_id = %run_id, title = %request.title);
        self.run_report(run_id, request).instrument(span).await
    }

    async fn run_report(
        &self,
        run_id: Uuid,
        request: &ReportRequest,
    ) -> anyhow::Result<ReportOutput> {
        Workspace::check_name(&request.title)?;
        let store = self.corpus(&request.book)?;
        if request.data_files.is_empty() {
            return Err(WorkspaceError::NoDatasets.into());
        }

        let ws = &self.workspace;
        // Uploads may live inside the directories about to be reset.
        let uploads = Workspace::read_uploads(&request.data_files).await?;
        for dir in [ws.data_dir(), ws.tmp_dir(), ws.plots_dir()] {
            Workspace::reset_dir(&dir).await?;
        }
        Workspace::write_uploads(&uploads, &ws.data_dir()).await?;
        let draft = DraftBuffer::new(ws.draft_path());
        draft.reset().await?;

        let model = self.config.llm.chat_model.as_str();
        let language = self.config.report.language.as_str();

        tracing::info!("Retrieving instructions for '{}'", request.title);
        let matcher = self.title_matcher();
        let (resolved_title, section) = SectionRetriever::new(store)
            .fetch(&request.title, &matcher)
            .await?;
        if section.trim().is_empty() {
            return Err(PipelineError::SectionNotFound {
                query: request.title.clone(),
                resolved: resolved_title,
            }
            .into());
        }

        tracing::info!("Drafting introduction");
        let drafter = Drafter::new(self.llm.clone(), model, language);
        drafter
            .write_introduction(&request.title, &section, &draft)
            .await?;
        let tasks = drafter.summarize_tasks(&section).await?;

        tracing::info!("Processing data");
        let datasets = Datasets::load(&ws.dataset_files())?;
        let plotter = Plotter::with_font(self.config.report.font_path.as_deref())?;
        let mut session = AgentSession::new(datasets, ws.plots_dir(), plotter)
            .with_preview_rows(self.config.agent.preview_rows);
        let agent = DataAgent::new(self.llm.clone(), model, self.config.agent.max_iterations);
        let outcome = agent
            .run(
                &DataAgent::task_message(&tasks, request.description.as_deref()),
                &mut session,
            )
            .await;
        match outcome.terminal_reason {
            TerminalReason::Completed => {}
            TerminalReason::MaxIterations => {
                return Err(PipelineError::AgentIncomplete {
                    iterations: outcome.iterations,
                }
                .into())
            }
            TerminalReason::LlmError => {
                return Err(PipelineError::AgentFailed(outcome.error.unwrap_or_default()).into())
            }
        }

        let processed = session.save_datasets(&ws.processed_dir())?;
        tracing::info!("Saved {} processed datasets", processed.len());
        session.write_tables()?;

        tracing::info!("Assembling report");
        let assembler = Assembler::new(self.llm.clone(), model, language);
        let log = session.log_report();
        let artifacts = AgentArtifacts {
            tasks: &tasks,
            log: &log,
            tables: session.tables(),
            figures: session.figures(),
            description: request.description.as_deref(),
        };
        assembler.write_results(&artifacts, &draft).await?;
        let tex = assembler.finalize(&request.title, &draft, &ws.tmp_dir()).await?;

        let compiler = LatexCompiler::from_config(&self.config.compiler);
        let output = compiler.compile(&tex, &ws.final_pdf_dir()).await?;

        // An uncompiled source still needs its figures and tables.
        if self.config.compiler.enabled {
            for dir in [ws.plots_dir(), ws.data_dir(), ws.tmp_dir()] {
                Workspace::remove_dir(&dir).await?;
            }
        }

        Ok(ReportOutput {
            run_id,
            resolved_title,
            output,
            agent_iterations: outcome.iterations,
            figures: session.figures().to_vec(),
        })
    }
}

async fn segment(
    reader: &dyn PageReader,
    store: &CorpusStore,
    options: SegmenterOptions,
    pages: &BookPages,
) -> anyhow::Result<IngestSummary> {
    Segmenter::new(reader, store, options).ingest(pages).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::CorpusEntry;
    use crate::llm::scripted::{text_response, tool_response, ScriptedClient};
    use serde_json::json;

    fn config(root: &Path) -> Config {
        let mut config = Config::default();
        config.workspace_dir = root.to_path_buf();
        config.compiler.enabled = false;
        config.llm.chat_model = "chat".to_string();
        config
    }

    fn seed_corpus(ws: &Workspace) {
        let store = CorpusStore::new(ws.corpus_path("mechanics"));
        store
            .append(CorpusEntry::new("Spring Constant", "Measure F against x; k = F / x."))
            .unwrap();
        store
            .append(CorpusEntry::new("Simple Pendulum", "Measure T against L."))
            .unwrap();
    }

    fn upload(root: &Path) -> PathBuf {
        let path = root.join("uploads/spring.csv");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "x,F\n1,3\n2,5\n3,7\n4,9\n").unwrap();
        path
    }

    fn request(root: &Path) -> ReportRequest {
        ReportRequest {
            book: "mechanics".to_string(),
            title: "spring const".to_string(),
            data_files: vec![upload(root)],
            description: Some("spring.csv: extension x and force F".to_string()),
        }
    }

    #[tokio::test]
    async fn report_runs_every_stage_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("ws");
        let pipeline_llm = Arc::new(ScriptedClient::new(vec![
            text_response("Spring Constant"),
            text_response("\\section{Abstract}\nintro"),
            text_response("1. Fit F against x."),
            tool_response("1", "transform", json!({"code": "k = F / x"})),
            tool_response(
                "2",
                "plot_least_squares",
                json!({"dataset": "spring", "x": "x", "y": "F", "title": "F vs x", "name": "fit"}),
            ),
            tool_response("3", "write_log", json!({"text": "slope 2 N/m, figure fit.png"})),
            text_response("done"),
            text_response("\\section{Data Processing}\nd\n\\section{Analysis and Discussion}\na"),
            text_response("\\documentclass{ctexart}\n\\begin{document}\nall\n\\end{document}"),
        ]));
        let pipeline = ReportPipeline::new(config(&root), pipeline_llm.clone());
        seed_corpus(pipeline.workspace());

        let out = pipeline.generate_report(&request(temp.path())).await.unwrap();

        assert_eq!(out.resolved_title, "Spring Constant");
        assert_eq!(out.agent_iterations, 4);
        assert_eq!(out.output, root.join("tmp/spring const.tex"));
        assert_eq!(out.figures, vec![root.join("plots/fit.png")]);
        assert!(out.figures[0].exists());
        assert_eq!(pipeline_llm.call_count(), 9);

        let requests = pipeline_llm.requests();
        assert!(requests[0].prompt_text().contains("- Spring Constant\n- Simple Pendulum"));
        assert!(requests[1].prompt_text().contains("k = F / x."));
        assert!(requests[3].prompt_text().contains("spring.csv: extension x and force F"));
        assert!(requests[7].prompt_text().contains("slope 2 N/m"));
        assert!(requests[7].prompt_text().contains("plots/table_spring.png"));
        let finalize = requests[8].prompt_text();
        assert!(finalize.contains("\\section{Abstract}\nintro\n\\section{Data Processing}"));

        let processed = std::fs::read_to_string(root.join("processed/spring.csv")).unwrap();
        assert!(processed.starts_with("x,F,k"));
    }

    #[tokio::test]
    async fn agent_budget_exhaustion_fails_the_report() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("ws");
        let mut config = config(&root);
        config.agent.max_iterations = 3;
        let inspect = || tool_response("c", "inspect", json!({"dataset": "all"}));
        let llm = Arc::new(ScriptedClient::new(vec![
            text_response("Spring Constant"),
            text_response("\\section{Abstract}"),
            text_response("1. Fit F against x."),
            inspect(),
            inspect(),
            inspect(),
        ]));
        let pipeline = ReportPipeline::new(config, llm.clone());
        seed_corpus(pipeline.workspace());

        let err = pipeline.generate_report(&request(temp.path())).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::AgentIncomplete { iterations: 3 })
        ));
        assert_eq!(llm.call_count(), 6);
    }

    #[tokio::test]
    async fn uploads_from_the_data_directory_are_kept() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("ws");
        let mut config = config(&root);
        config.agent.max_iterations = 1;
        let llm = Arc::new(ScriptedClient::new(vec![
            text_response("Spring Constant"),
            text_response("\\section{Abstract}"),
            text_response("1. Fit F against x."),
            tool_response("c", "inspect", json!({"dataset": "spring"})),
        ]));
        let pipeline = ReportPipeline::new(config, llm.clone());
        seed_corpus(pipeline.workspace());
        let in_place = root.join("data/spring.csv");
        std::fs::create_dir_all(root.join("data")).unwrap();
        std::fs::write(&in_place, "x,F\n1,3\n2,5\n").unwrap();
        let mut request = request(temp.path());
        request.data_files = vec![in_place.clone()];

        let err = pipeline.generate_report(&request).await.unwrap_err();

        // The run got as far as the agent, with the upload loaded.
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::AgentIncomplete { iterations: 1 })
        ));
        assert_eq!(std::fs::read_to_string(&in_place).unwrap(), "x,F\n1,3\n2,5\n");
        let system = llm.requests()[3].messages[0].text_content().unwrap().to_string();
        assert!(system.contains("Loaded datasets: spring"), "{}", system);
    }

    #[tokio::test]
    async fn ingesting_the_book_in_place_keeps_the_pdf() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = config(temp.path());
        config.ingest.pdftoppm = temp.path().join("no-pdftoppm").display().to_string();
        let pipeline = ReportPipeline::new(config, Arc::new(ScriptedClient::new(vec![])));
        let dir = pipeline.workspace().book_dir("mech");
        std::fs::create_dir_all(&dir).unwrap();
        let pdf = dir.join("mech.pdf");
        std::fs::write(&pdf, b"%PDF-1.4 scanned").unwrap();

        // Rasterizing fails without pdftoppm; the upload step must not have
        // truncated the book on the way.
        assert!(pipeline.ingest_book("mech", Some(&pdf)).await.is_err());
        assert_eq!(std::fs::read(&pdf).unwrap(), b"%PDF-1.4 scanned");
    }

    #[tokio::test]
    async fn missing_inputs_fail_before_any_model_call() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("ws");
        let llm = Arc::new(ScriptedClient::new(vec![]));
        let pipeline = ReportPipeline::new(config(&root), llm.clone());

        let err = pipeline.generate_report(&request(temp.path())).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WorkspaceError>(),
            Some(WorkspaceError::MissingCorpus(_))
        ));

        seed_corpus(pipeline.workspace());
        let mut no_data = request(temp.path());
        no_data.data_files.clear();
        let err = pipeline.generate_report(&no_data).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WorkspaceError>(),
            Some(WorkspaceError::NoDatasets)
        ));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn unmatched_title_stops_the_report() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("ws");
        let llm = Arc::new(ScriptedClient::texts(["Optical Rotation"]));
        let pipeline = ReportPipeline::new(config(&root), llm.clone());
        seed_corpus(pipeline.workspace());

        let err = pipeline.generate_report(&request(temp.path())).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::SectionNotFound { .. })
        ));
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn text_books_ingest_offline() {
        let temp = tempfile::tempdir().expect("tempdir");
        let llm = Arc::new(ScriptedClient::new(vec![]));
        let pipeline = ReportPipeline::new(config(temp.path()), llm.clone());
        let dir = pipeline.workspace().book_dir("mechanics");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("p1.md"), "# Spring Constant\nHooke's law.").unwrap();
        std::fs::write(dir.join("p2.txt"), "Apparatus: springs, weights.").unwrap();
        std::fs::write(dir.join("p3.md"), "# Simple Pendulum\nPeriod.").unwrap();

        let summary = pipeline.ingest_book("mechanics", None).await.unwrap();

        assert_eq!(summary.pages, 3);
        assert_eq!(summary.boundaries, 2);
        assert_eq!(summary.sections_written, 1);
        assert_eq!(summary.dropped_title.as_deref(), Some("Simple Pendulum"));
        assert_eq!(pipeline.titles("mechanics").unwrap(), vec!["Spring Constant"]);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_book_directory_reports_missing_pdf() {
        let temp = tempfile::tempdir().expect("tempdir");
        let llm = Arc::new(ScriptedClient::new(vec![]));
        let pipeline = ReportPipeline::new(config(temp.path()), llm);
        std::fs::create_dir_all(pipeline.workspace().book_dir("optics")).unwrap();

        let err = pipeline.ingest_book("optics", None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WorkspaceError>(),
            Some(WorkspaceError::MissingBookPdf(_))
        ));
    }
}
