//! External LaTeX engine invocation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use tokio::process::Command;

use crate::config::CompilerConfig;

const PASS_TIMEOUT: Duration = Duration::from_secs(300);
const AUX_EXTENSIONS: &[&str] = &["aux", "log", "out", "toc"];
/// Lines of engine output kept in the error of a failed pass.
const ERROR_TAIL_LINES: usize = 30;

pub struct LatexCompiler {
    enabled: bool,
    engine: String,
    passes: u32,
}

impl LatexCompiler {
    pub fn from_config(config: &CompilerConfig) -> Self {
        Self {
            enabled: config.enabled,
            engine: config.engine.clone(),
            passes: config.passes.max(1),
        }
    }

    /// Compile `tex` in its own directory and move the PDF into `final_dir`.
    ///
    /// Returns the delivered PDF, or `tex` itself when compilation is disabled.
    pub async fn compile(&self, tex: &Path, final_dir: &Path) -> anyhow::Result<PathBuf> {
        if !self.enabled {
            tracing::info!("Compilation disabled, leaving {}", tex.display());
            return Ok(tex.to_path_buf());
        }

        let file_name = tex
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("{} has no file name", tex.display()))?;
        let stem = crate::workspace::file_stem(tex);
        let parent = tex
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        // The engine runs inside the output directory, so both paths must be absolute.
        let out_dir = tokio::fs::canonicalize(parent)
            .await
            .with_context(|| format!("resolving {}", parent.display()))?;
        let tex = out_dir.join(file_name);
        let out_dir = out_dir.as_path();

        for pass in 1..=self.passes {
            tracing::info!("{} pass {}/{} on {}", self.engine, pass, self.passes, tex.display());
            self.run_pass(&tex, out_dir).await?;
        }

        let pdf = out_dir.join(format!("{}.pdf", stem));
        if !pdf.exists() {
            anyhow::bail!("{} finished but produced no {}", self.engine, pdf.display());
        }
        remove_aux_files(out_dir, &stem).await;

        tokio::fs::create_dir_all(final_dir).await?;
        let dest = final_dir.join(format!("{}.pdf", stem));
        move_file(&pdf, &dest).await?;
        tracing::info!("Report delivered to {}", dest.display());
        Ok(dest)
    }

    async fn run_pass(&self, tex: &Path, out_dir: &Path) -> anyhow::Result<()> {
        let output = tokio::time::timeout(
            PASS_TIMEOUT,
            Command::new(&self.engine)
                .arg("-interaction=nonstopmode")
                .arg(format!("-output-directory={}", out_dir.display()))
                .arg(tex)
                .current_dir(out_dir)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("{} timed out after {:?}", self.engine, PASS_TIMEOUT))?
        .with_context(|| format!("failed to run {}", self.engine))?;

        if !output.status.success() {
            // LaTeX engines report errors on stdout.
            let stdout = String::from_utf8_lossy(&output.stdout);
            anyhow::bail!(
                "{} exited with {}:\n{}",
                self.engine,
                output.status,
                tail(&stdout, ERROR_TAIL_LINES)
            );
        }
        Ok(())
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

async fn remove_aux_files(dir: &Path, stem: &str) {
    for ext in AUX_EXTENSIONS {
        let path = dir.join(format!("{}.{}", stem, ext));
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Could not remove {}: {}", path.display(), e),
        }
    }
}

/// Rename, falling back to copy + delete across filesystems.
async fn move_file(from: &Path, to: &Path) -> anyhow::Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to)
        .await
        .with_context(|| format!("moving {} to {}", from.display(), to.display()))?;
    tokio::fs::remove_file(from).await?;
    Ok(())
}
