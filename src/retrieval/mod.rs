//! Title resolution and section lookup over a book corpus.

mod matcher;

pub use matcher::{LlmTitleMatcher, SimilarityTitleMatcher, TitleMatcher};

use std::ops::ControlFlow;

use crate::corpus::{CorpusError, CorpusStore};

/// Reads section text out of one corpus.
pub struct SectionRetriever {
    store: CorpusStore,
}

impl SectionRetriever {
    pub fn new(store: CorpusStore) -> Self {
        Self { store }
    }

    pub fn titles(&self) -> Result<Vec<String>, CorpusError> {
        self.store.titles()
    }

    /// Text of the section named `resolved_title`.
    ///
    /// Exact (case-insensitive) title first, then the first title containing
    /// it. No match, or an empty title, yields an empty string.
    pub fn lookup(&self, resolved_title: &str) -> Result<String, CorpusError> {
        let needle = resolved_title.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(String::new());
        }

        if let Some(text) = self.first_match(|title| title == needle)? {
            return Ok(text);
        }
        if let Some(text) = self.first_match(|title| title.contains(&needle))? {
            tracing::debug!("'{}' matched a corpus title by substring", resolved_title);
            return Ok(text);
        }

        tracing::warn!("No corpus section matches '{}'", resolved_title);
        Ok(String::new())
    }

    fn first_match(&self, matches: impl Fn(&str) -> bool) -> Result<Option<String>, CorpusError> {
        let mut found = None;
        self.store.for_each_entry(|entry| {
            if matches(&entry.title.to_lowercase()) {
                found = Some(entry.text);
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
        Ok(found)
    }

    /// Resolve `query` against the corpus titles, then look the result up.
    ///
    /// Returns the resolved title with the section text.
    pub async fn fetch(
        &self,
        query: &str,
        matcher: &dyn TitleMatcher,
    ) -> anyhow::Result<(String, String)> {
        let titles = self.titles()?;
        let resolved = matcher.resolve(query, &titles).await?;
        tracing::info!("Resolved '{}' to corpus title '{}'", query, resolved);
        let text = self.lookup(&resolved)?;
        Ok((resolved, text))
    }
}
