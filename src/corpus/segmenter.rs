//! Page-by-page section boundary detection.
//!
//! One section is open at a time. A boundary page closes the open section
//! (writing it to the corpus) and opens a new one with a freshly extracted
//! title. The section still open after the last page is NOT written unless
//! `flush_trailing_section` is set: for N boundary pages the corpus holds N-1
//! entries by default.

use super::pages::BookPages;
use super::reader::PageReader;
use super::{CorpusEntry, CorpusStore};

#[derive(Debug, Clone, Copy, Default)]
pub struct SegmenterOptions {
    /// Also write the section open at the end of the book.
    pub flush_trailing_section: bool,
}

/// Transient state of one ingestion run.
#[derive(Debug, Default)]
pub struct SectionAccumulator {
    current_title: Option<String>,
    accumulated_text: String,
}

impl SectionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_title(&self) -> Option<&str> {
        self.current_title.as_deref()
    }

    /// Extend the open section (or the untitled preamble) with a page.
    pub fn push_page(&mut self, text: &str) {
        if !self.accumulated_text.is_empty() {
            self.accumulated_text.push('\n');
        }
        self.accumulated_text.push_str(text);
    }

    /// Start a section at a boundary page, returning the section it closes.
    ///
    /// Text gathered before the first boundary has no title and is discarded.
    pub fn open(&mut self, title: String, first_page_text: &str) -> Option<CorpusEntry> {
        let closed = self
            .current_title
            .take()
            .map(|t| CorpusEntry::new(t, std::mem::take(&mut self.accumulated_text)));
        self.current_title = Some(title);
        self.accumulated_text = first_page_text.to_string();
        closed
    }

    /// The section still open at the end of the book.
    pub fn finish(self) -> Option<CorpusEntry> {
        self.current_title
            .map(|title| CorpusEntry::new(title, self.accumulated_text))
    }
}

/// Outcome of an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub pages: usize,
    pub boundaries: usize,
    pub sections_written: usize,
    /// Title of the trailing section left out of the corpus.
    pub dropped_title: Option<String>,
}

pub struct Segmenter<'a> {
    reader: &'a dyn PageReader,
    store: &'a CorpusStore,
    options: SegmenterOptions,
}

impl<'a> Segmenter<'a> {
    pub fn new(
        reader: &'a dyn PageReader,
        store: &'a CorpusStore,
        options: SegmenterOptions,
    ) -> Self {
        Self {
            reader,
            store,
            options,
        }
    }

    /// Rebuild the corpus from `pages`.
    ///
    /// The corpus file is deleted first and rewritten after every closed
    /// section. Any reader failure aborts the run; sections written before
    /// the failure stay on disk.
    pub async fn ingest(&self, pages: &BookPages) -> anyhow::Result<IngestSummary> {
        self.store.reset()?;

        let mut acc = SectionAccumulator::new();
        let mut summary = IngestSummary {
            pages: pages.len(),
            ..Default::default()
        };

        for page in pages.iter() {
            let text = self.reader.transcribe(page).await?;

            if self.reader.is_section_start(page).await? {
                summary.boundaries += 1;
                let title = self.reader.extract_title(page).await?;
                tracing::info!("Page {} opens section '{}'", page.number(), title);

                if let Some(closed) = acc.open(title, &text) {
                    let total = self.store.append(closed.clone())?;
                    summary.sections_written += 1;
                    tracing::info!(
                        "Flushed section '{}' ({} chars), corpus now has {} entries",
                        closed.title,
                        closed.text.len(),
                        total
                    );
                }
            } else {
                tracing::debug!("Page {} continues the open section", page.number());
                acc.push_page(&text);
            }
        }

        if let Some(last) = acc.finish() {
            if self.options.flush_trailing_section {
                self.store.append(last)?;
                summary.sections_written += 1;
            } else {
                tracing::warn!(
                    "Trailing section '{}' was not flushed and is missing from the corpus \
                     (set ingest.flush_trailing_section to keep it)",
                    last.title
                );
                summary.dropped_title = Some(last.title);
            }
        }

        Ok(summary)
    }
}
