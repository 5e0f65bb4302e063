//! Title-keyed corpus of instruction-book sections.
//!
//! The corpus is one JSON array of `{title, text}` records per book. Ingestion
//! grows it by rewriting the whole file after every flushed section, so
//! progress survives a failed run. Lookups stream the array item by item.

mod pages;
mod reader;
mod segmenter;

pub use pages::{rasterize_pdf, BookPages, Page};
pub use reader::{HeadingPageReader, PageReader, VisionPageReader};
pub use segmenter::{IngestSummary, SectionAccumulator, Segmenter, SegmenterOptions};

use std::fs::File;
use std::io::BufReader;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use serde::de::{IgnoredAny, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer as _, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("Corpus I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Corpus {path} is not a JSON array of entries: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// One titled section of the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusEntry {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
}

impl CorpusEntry {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
        }
    }
}

/// JSON-file backed corpus.
#[derive(Debug, Clone)]
pub struct CorpusStore {
    path: PathBuf,
}

impl CorpusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn io_err(&self, source: std::io::Error) -> CorpusError {
        CorpusError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn json_err(&self, source: serde_json::Error) -> CorpusError {
        CorpusError::Json {
            path: self.path.clone(),
            source,
        }
    }

    /// Delete the backing file. Re-ingestion always starts from nothing.
    pub fn reset(&self) -> Result<(), CorpusError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err(e)),
        }
    }

    /// Read every entry. A missing file is an empty corpus.
    pub fn load_all(&self) -> Result<Vec<CorpusEntry>, CorpusError> {
        let mut entries = Vec::new();
        if !self.exists() {
            return Ok(entries);
        }
        self.for_each_entry(|entry| {
            entries.push(entry);
            ControlFlow::Continue(())
        })?;
        Ok(entries)
    }

    /// Read-all, append-one, write-all.
    ///
    /// A title already present is replaced: the new entry moves to the end so
    /// the file stays in flush order.
    pub fn append(&self, entry: CorpusEntry) -> Result<usize, CorpusError> {
        let mut entries = self.load_all()?;
        entries.retain(|existing| existing.title != entry.title);
        entries.push(entry);
        self.write_all(&entries)?;
        Ok(entries.len())
    }

    fn write_all(&self, entries: &[CorpusEntry]) -> Result<(), CorpusError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let data = serde_json::to_vec_pretty(entries).map_err(|e| self.json_err(e))?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, data).map_err(|e| self.io_err(e))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| self.io_err(e))
    }

    /// Stream entries in file order until `visit` breaks.
    pub fn for_each_entry<F>(&self, visit: F) -> Result<(), CorpusError>
    where
        F: FnMut(CorpusEntry) -> ControlFlow<()>,
    {
        let file = File::open(&self.path).map_err(|e| self.io_err(e))?;
        let mut de = serde_json::Deserializer::from_reader(BufReader::new(file));
        (&mut de)
            .deserialize_seq(EntryVisitor { visit })
            .map_err(|e| self.json_err(e))?;
        de.end().map_err(|e| self.json_err(e))
    }

    /// All titles, in corpus order.
    pub fn titles(&self) -> Result<Vec<String>, CorpusError> {
        let mut titles = Vec::new();
        self.for_each_entry(|entry| {
            if !entry.title.is_empty() {
                titles.push(entry.title);
            }
            ControlFlow::Continue(())
        })?;
        Ok(titles)
    }
}

struct EntryVisitor<F> {
    visit: F,
}

impl<'de, F> Visitor<'de> for EntryVisitor<F>
where
    F: FnMut(CorpusEntry) -> ControlFlow<()>,
{
    type Value = ();

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("an array of {title, text} objects")
    }

    fn visit_seq<A>(mut self, mut seq: A) -> Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        while let Some(entry) = seq.next_element::<CorpusEntry>()? {
            if (self.visit)(entry).is_break() {
                // Drain without materializing so the array still parses to its end.
                while seq.next_element::<IgnoredAny>()?.is_some() {}
                break;
            }
        }
        Ok(())
    }
}
