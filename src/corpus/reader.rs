//! Per-page judgments used by the segmenter: transcription, boundary
//! classification and title extraction.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use super::pages::Page;
use crate::llm::{self, strip_quotes, ChatMessage, ChatOptions, LlmClient, Role};

/// Reads one page at a time.
#[async_trait]
pub trait PageReader: Send + Sync {
    /// Full page text, mathematics kept as `$...$`.
    async fn transcribe(&self, page: &Page) -> anyhow::Result<String>;

    /// Whether this page starts a new titled section.
    async fn is_section_start(&self, page: &Page) -> anyhow::Result<bool>;

    /// Title of a section start page.
    async fn extract_title(&self, page: &Page) -> anyhow::Result<String>;
}

/// Interpret a model's true/false answer. Anything but an affirmative is "no".
pub fn parse_boolean_answer(answer: &str) -> bool {
    let mut cleaned = answer.trim().to_string();
    // Quotes and punctuation may nest either way: 'true'. or "true."
    loop {
        let next = strip_quotes(cleaned.trim_end_matches(['.', '。', '!', '！']));
        if next == cleaned {
            break;
        }
        cleaned = next;
    }
    matches!(cleaned.to_lowercase().as_str(), "true" | "yes" | "是")
}

const TRANSCRIBE_SYSTEM: &str = "You are a helpful assistant that converts page images into text.";
const TRANSCRIBE_PROMPT: &str = "Convert this page image into text. Keep mathematical formulas \
    in markdown math form, i.e. $...$. Output only the page content.";
const BOUNDARY_SYSTEM: &str =
    "You are a helpful assistant that decides whether a page starts a new section.";
const BOUNDARY_PROMPT: &str = "Is this page the first page of a new section? Answer only 'True' \
    or 'False'. A section start page usually contains a title and may contain an introduction.";
const TITLE_SYSTEM: &str = "You are a helpful assistant that extracts titles.";
const TITLE_PROMPT: &str = "Extract the title of this page. It is usually the name of a physics \
    experiment. Answer with the title string only.";

/// Vision-model backed reader for scanned pages.
pub struct VisionPageReader {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl VisionPageReader {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    async fn ask(&self, system: &str, prompt: &str, page: &Page) -> anyhow::Result<String> {
        let image = match page {
            Page::Image { .. } => page.data_url().await?,
            Page::Text { .. } => {
                // Text pages need no vision call; send the text instead.
                let text = page.text().await?;
                let messages = [
                    ChatMessage::system(system),
                    ChatMessage::user(format!("{}\n\nPage text:\n{}", prompt, text)),
                ];
                return llm::complete_text(
                    self.llm.as_ref(),
                    &self.model,
                    &messages,
                    ChatOptions::default(),
                )
                .await;
            }
        };
        let messages = [
            ChatMessage::system(system),
            ChatMessage::with_image(Role::User, prompt, image),
        ];
        // The page prompts leave temperature at the provider default.
        llm::complete_text(self.llm.as_ref(), &self.model, &messages, ChatOptions::default()).await
    }
}

#[async_trait]
impl PageReader for VisionPageReader {
    async fn transcribe(&self, page: &Page) -> anyhow::Result<String> {
        self.ask(TRANSCRIBE_SYSTEM, TRANSCRIBE_PROMPT, page).await
    }

    async fn is_section_start(&self, page: &Page) -> anyhow::Result<bool> {
        let answer = self.ask(BOUNDARY_SYSTEM, BOUNDARY_PROMPT, page).await?;
        let decision = parse_boolean_answer(&answer);
        tracing::debug!(
            "Page {} boundary answer {:?} -> {}",
            page.number(),
            answer.trim(),
            decision
        );
        Ok(decision)
    }

    async fn extract_title(&self, page: &Page) -> anyhow::Result<String> {
        let title = self.ask(TITLE_SYSTEM, TITLE_PROMPT, page).await?;
        Ok(strip_quotes(&title))
    }
}

/// Offline reader for books already available as text pages.
///
/// A page starts a section when its first non-empty line looks like a heading.
pub struct HeadingPageReader {
    patterns: Vec<Regex>,
    numbered: Regex,
}

impl HeadingPageReader {
    pub fn new() -> Self {
        let patterns = [
            r"^#{1,2}\s+\S",
            r"^(?i:chapter|section|experiment|lab)\s+\d+",
            r"^实验\s*[零一二三四五六七八九十百\d]+",
            r"^第[零一二三四五六七八九十百千\d]+[章节]",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect();
        let numbered = Regex::new(r"^\d+(\.\d+)*\.?\s+\S").unwrap();
        Self { patterns, numbered }
    }

    fn first_line(text: &str) -> Option<&str> {
        text.lines().map(str::trim).find(|l| !l.is_empty())
    }

    fn is_heading(&self, line: &str) -> bool {
        // Long lines are body text, not headings.
        if line.chars().count() > 100 {
            return false;
        }
        self.patterns.iter().any(|p| p.is_match(line)) || self.is_numbered_title(line)
    }

    /// `3. Spring Constant` is a title; `1. Measure the length.` is a step.
    fn is_numbered_title(&self, line: &str) -> bool {
        const SENTENCE_END: &[char] = &['.', '。', ',', '，', ';', '；', ':', '：', '!', '?'];
        self.numbered.is_match(line)
            && line.chars().count() <= 40
            && !line.ends_with(SENTENCE_END)
    }

    async fn page_text(page: &Page) -> anyhow::Result<String> {
        match page {
            Page::Text { .. } => page.text().await,
            Page::Image { path, .. } => Err(anyhow::anyhow!(
                "Page {} is an image ({}); the heading reader only reads text pages",
                page.number(),
                path.display()
            )),
        }
    }
}

impl Default for HeadingPageReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageReader for HeadingPageReader {
    async fn transcribe(&self, page: &Page) -> anyhow::Result<String> {
        Self::page_text(page).await
    }

    async fn is_section_start(&self, page: &Page) -> anyhow::Result<bool> {
        let text = Self::page_text(page).await?;
        Ok(Self::first_line(&text)
            .map(|line| self.is_heading(line))
            .unwrap_or(false))
    }

    async fn extract_title(&self, page: &Page) -> anyhow::Result<String> {
        let text = Self::page_text(page).await?;
        let line = Self::first_line(&text).unwrap_or_default();
        Ok(line.trim_start_matches('#').trim().to_string())
    }
}
