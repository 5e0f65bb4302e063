//! On-disk layout for books, uploaded data and report artifacts.
//!
//! ```text
//! <root>/books/<book>/<book>.pdf     source book (or page .txt/.md files)
//! <root>/books/<book>/<book>.json    title-keyed corpus
//! <root>/data/<dataset>.csv          uploaded datasets
//! <root>/processed/<dataset>.csv     datasets after the agent run
//! <root>/plots/<name>.png            figures and table images
//! <root>/tmp/                        draft buffer, final source
//! <root>/final_pdf/<title>.pdf       delivered report
//! ```

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

/// Missing inputs detected before any processing starts.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("No PDF (or .txt/.md page files) found in {0}")]
    MissingBookPdf(PathBuf),

    #[error("Corpus {0} does not exist; ingest the book first")]
    MissingCorpus(PathBuf),

    #[error("No CSV data uploaded")]
    NoDatasets,

    #[error("Invalid name '{0}': use a non-empty name without path separators")]
    InvalidName(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl WorkspaceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn book_dir(&self, book: &str) -> PathBuf {
        self.root.join("books").join(book)
    }

    pub fn corpus_path(&self, book: &str) -> PathBuf {
        self.book_dir(book).join(format!("{}.json", book))
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.join("processed")
    }

    pub fn plots_dir(&self) -> PathBuf {
        self.root.join("plots")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn draft_path(&self) -> PathBuf {
        self.tmp_dir().join("output.txt")
    }

    pub fn final_pdf_dir(&self) -> PathBuf {
        self.root.join("final_pdf")
    }

    /// Reject names that would escape their directory.
    pub fn check_name(name: &str) -> Result<(), WorkspaceError> {
        let trimmed = name.trim();
        if trimmed.is_empty()
            || trimmed.contains('/')
            || trimmed.contains('\\')
            || trimmed == "."
            || trimmed == ".."
        {
            return Err(WorkspaceError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    /// First `.pdf` in the book directory, in name order.
    pub fn find_book_pdf(&self, book: &str) -> Result<PathBuf, WorkspaceError> {
        let dir = self.book_dir(book);
        files_with_extensions(&dir, &["pdf"])
            .into_iter()
            .next()
            .ok_or(WorkspaceError::MissingBookPdf(dir))
    }

    /// Pre-transcribed page files (`.txt`/`.md`) in name order.
    pub fn book_text_pages(&self, book: &str) -> Vec<PathBuf> {
        files_with_extensions(&self.book_dir(book), &["txt", "md"])
    }

    /// Uploaded CSV files in name order.
    pub fn dataset_files(&self) -> Vec<PathBuf> {
        files_with_extensions(&self.data_dir(), &["csv"])
    }

    /// Copy an uploaded file into `dir`, creating it, and return the new path.
    ///
    /// A file already in place is left untouched.
    pub async fn place_file(&self, source: &Path, dir: &Path) -> Result<PathBuf, WorkspaceError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| WorkspaceError::io(dir, e))?;
        let dest = dir.join(upload_name(source)?);
        if same_file(source, &dest).await? {
            return Ok(dest);
        }
        tokio::fs::copy(source, &dest)
            .await
            .map_err(|e| WorkspaceError::io(source, e))?;
        Ok(dest)
    }

    /// Read uploads into memory so their source directories may be reset
    /// before they are written back with [`Workspace::write_uploads`].
    pub async fn read_uploads(sources: &[PathBuf]) -> Result<Vec<Upload>, WorkspaceError> {
        let mut uploads = Vec::with_capacity(sources.len());
        for source in sources {
            let contents = tokio::fs::read(source)
                .await
                .map_err(|e| WorkspaceError::io(source, e))?;
            uploads.push(Upload {
                file_name: upload_name(source)?.to_os_string(),
                contents,
            });
        }
        Ok(uploads)
    }

    pub async fn write_uploads(
        uploads: &[Upload],
        dir: &Path,
    ) -> Result<Vec<PathBuf>, WorkspaceError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| WorkspaceError::io(dir, e))?;
        let mut placed = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let dest = dir.join(&upload.file_name);
            tokio::fs::write(&dest, &upload.contents)
                .await
                .map_err(|e| WorkspaceError::io(&dest, e))?;
            placed.push(dest);
        }
        Ok(placed)
    }

    /// Make `dir` exist and be empty.
    pub async fn reset_dir(dir: &Path) -> Result<(), WorkspaceError> {
        Self::remove_dir(dir).await?;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| WorkspaceError::io(dir, e))
    }

    /// Remove `dir` recursively; a missing directory is fine.
    pub async fn remove_dir(dir: &Path) -> Result<(), WorkspaceError> {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkspaceError::io(dir, e)),
        }
    }
}

/// An uploaded file held in memory.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: OsString,
    pub contents: Vec<u8>,
}

fn upload_name(source: &Path) -> Result<&OsStr, WorkspaceError> {
    source
        .file_name()
        .ok_or_else(|| WorkspaceError::InvalidName(source.display().to_string()))
}

async fn same_file(a: &Path, b: &Path) -> Result<bool, WorkspaceError> {
    let a = tokio::fs::canonicalize(a)
        .await
        .map_err(|e| WorkspaceError::io(a, e))?;
    match tokio::fs::canonicalize(b).await {
        Ok(b) => Ok(a == b),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(WorkspaceError::io(b, e)),
    }
}

/// Regular files directly inside `dir` whose extension matches (case-insensitive), sorted.
fn files_with_extensions(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}

/// File stem as a dataset/figure identity.
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corpus_path_is_named_after_book() {
        let ws = Workspace::new("/w");
        assert_eq!(
            ws.corpus_path("mechanics"),
            PathBuf::from("/w/books/mechanics/mechanics.json")
        );
    }

    #[test]
    fn check_name_rejects_traversal() {
        assert!(Workspace::check_name("mechanics").is_ok());
        assert!(Workspace::check_name("../etc").is_err());
        assert!(Workspace::check_name("").is_err());
        assert!(Workspace::check_name("..").is_err());
    }

    #[test]
    fn missing_pdf_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        std::fs::create_dir_all(ws.book_dir("optics")).unwrap();
        std::fs::write(ws.book_dir("optics").join("notes.txt"), "x").unwrap();
        assert!(matches!(
            ws.find_book_pdf("optics"),
            Err(WorkspaceError::MissingBookPdf(_))
        ));
        assert_eq!(ws.book_text_pages("optics").len(), 1);
    }

    #[test]
    fn pdf_lookup_is_case_insensitive_and_sorted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        let dir = ws.book_dir("optics");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("b.PDF"), "x").unwrap();
        std::fs::write(dir.join("a.pdf"), "x").unwrap();
        assert_eq!(ws.find_book_pdf("optics").unwrap(), dir.join("a.pdf"));
    }

    #[test]
    fn uploads_are_copied_under_their_file_name() {
        let temp = tempfile::tempdir().expect("tempdir");
        let upload = temp.path().join("spring.csv");
        std::fs::write(&upload, "x,F\n1,2\n").unwrap();
        let ws = Workspace::new(temp.path().join("ws"));

        let placed = tokio_test::block_on(ws.place_file(&upload, &ws.data_dir())).unwrap();

        assert_eq!(placed, ws.data_dir().join("spring.csv"));
        assert_eq!(ws.dataset_files(), vec![placed]);
        assert!(upload.exists());
    }

    #[tokio::test]
    async fn placing_a_file_onto_itself_keeps_it() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        let dir = ws.book_dir("mech");
        std::fs::create_dir_all(&dir).unwrap();
        let pdf = dir.join("mech.pdf");
        std::fs::write(&pdf, b"%PDF-1.4 body").unwrap();

        let placed = ws.place_file(&pdf, &dir).await.expect("place");

        assert_eq!(placed, pdf);
        assert_eq!(std::fs::read(&pdf).unwrap(), b"%PDF-1.4 body");

        // Same file reached through a relative component.
        let indirect = dir.join("..").join("mech").join("mech.pdf");
        ws.place_file(&indirect, &dir).await.expect("place");
        assert_eq!(std::fs::read(&pdf).unwrap(), b"%PDF-1.4 body");
    }

    #[tokio::test]
    async fn uploads_survive_a_reset_of_their_own_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::new(temp.path());
        let data = ws.data_dir();
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join("spring.csv"), "x,F\n1,2\n").unwrap();
        std::fs::write(data.join("stale.csv"), "a\n1\n").unwrap();

        let uploads = Workspace::read_uploads(&[data.join("spring.csv")]).await.expect("read");
        Workspace::reset_dir(&data).await.expect("reset");
        let placed = Workspace::write_uploads(&uploads, &data).await.expect("write");

        assert_eq!(placed, vec![data.join("spring.csv")]);
        assert_eq!(ws.dataset_files(), placed);
        assert_eq!(std::fs::read_to_string(&placed[0]).unwrap(), "x,F\n1,2\n");
    }

    #[tokio::test]
    async fn missing_upload_is_an_io_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = Workspace::read_uploads(&[temp.path().join("absent.csv")])
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::Io { .. }));
    }

    #[tokio::test]
    async fn reset_dir_empties_existing_contents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("plots");
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("old.png"), "x").unwrap();

        Workspace::reset_dir(&dir).await.expect("reset");
        assert!(dir.exists());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);

        Workspace::remove_dir(&temp.path().join("never-created"))
            .await
            .expect("missing dir is fine");
    }
}
