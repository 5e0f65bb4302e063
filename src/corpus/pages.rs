//! Page acquisition: scanned PDFs rasterized with `pdftoppm`, or pre-transcribed text pages.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context;
use base64::Engine as _;
use tokio::process::Command;

/// One page of a book, in reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    /// Rasterized page image (PNG).
    Image { number: usize, path: PathBuf },
    /// Page already available as text.
    Text { number: usize, path: PathBuf },
}

impl Page {
    pub fn number(&self) -> usize {
        match self {
            Page::Image { number, .. } | Page::Text { number, .. } => *number,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Page::Image { path, .. } | Page::Text { path, .. } => path,
        }
    }

    /// Inline `data:` URL for vision requests.
    pub async fn data_url(&self) -> anyhow::Result<String> {
        let bytes = tokio::fs::read(self.path())
            .await
            .with_context(|| format!("reading page image {}", self.path().display()))?;
        let mime = match self.path().extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg") => {
                "image/jpeg"
            }
            _ => "image/png",
        };
        Ok(format!(
            "data:{};base64,{}",
            mime,
            base64::engine::general_purpose::STANDARD.encode(bytes)
        ))
    }

    pub async fn text(&self) -> anyhow::Result<String> {
        tokio::fs::read_to_string(self.path())
            .await
            .with_context(|| format!("reading page text {}", self.path().display()))
    }
}

/// Ordered pages of one book.
#[derive(Debug, Clone, Default)]
pub struct BookPages {
    pages: Vec<Page>,
}

impl BookPages {
    pub fn from_images(paths: Vec<PathBuf>) -> Self {
        Self {
            pages: paths
                .into_iter()
                .enumerate()
                .map(|(i, path)| Page::Image { number: i + 1, path })
                .collect(),
        }
    }

    pub fn from_text_files(paths: Vec<PathBuf>) -> Self {
        Self {
            pages: paths
                .into_iter()
                .enumerate()
                .map(|(i, path)| Page::Text { number: i + 1, path })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Page> {
        self.pages.iter()
    }
}

/// Rasterize `pdf` into `out_dir/page-N.png`, one file per page, in page order.
pub async fn rasterize_pdf(
    pdftoppm: &str,
    pdf: &Path,
    dpi: u32,
    out_dir: &Path,
) -> anyhow::Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(out_dir).await?;
    let prefix = out_dir.join("page");

    tracing::info!("Rasterizing {} at {} dpi", pdf.display(), dpi);
    let output = Command::new(pdftoppm)
        .arg("-png")
        .arg("-r")
        .arg(dpi.to_string())
        .arg(pdf)
        .arg(&prefix)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("failed to run {}", pdftoppm))?;

    if !output.status.success() {
        anyhow::bail!(
            "{} exited with {}: {}",
            pdftoppm,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let mut pages: Vec<(usize, PathBuf)> = std::fs::read_dir(out_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter_map(|path| page_number(&path).map(|n| (n, path)))
        .collect();
    pages.sort_by_key(|(n, _)| *n);

    if pages.is_empty() {
        anyhow::bail!("{} produced no pages for {}", pdftoppm, pdf.display());
    }
    Ok(pages.into_iter().map(|(_, path)| path).collect())
}

/// `page-007.png` -> 7. pdftoppm zero-pads to the width of the page count.
fn page_number(path: &Path) -> Option<usize> {
    if !path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("png"))
        .unwrap_or(false)
    {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (_, digits) = stem.rsplit_once('-')?;
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_number_parses_padded_suffix() {
        assert_eq!(page_number(Path::new("/t/page-007.png")), Some(7));
        assert_eq!(page_number(Path::new("/t/page-12.png")), Some(12));
        assert_eq!(page_number(Path::new("/t/page-1.ppm")), None);
        assert_eq!(page_number(Path::new("/t/cover.png")), None);
    }

    #[test]
    fn pages_are_numbered_from_one() {
        let pages =
            BookPages::from_text_files(vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
        let numbers: Vec<usize> = pages.iter().map(|p| p.number()).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[tokio::test]
    async fn data_url_encodes_png() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("page-1.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();
        let page = Page::Image { number: 1, path };
        let url = page.data_url().await.unwrap();
        assert_eq!(url, "data:image/png;base64,iVBORw==");
    }
}
