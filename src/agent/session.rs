//! Mutable state shared by every tool call of one agent run.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::data::plot::Plotter;
use crate::data::table::write_table;
use crate::data::{DataError, Datasets};

pub struct AgentSession {
    /// Working datasets; tools mutate them in place.
    pub datasets: Datasets,
    /// Datasets as uploaded, for the raw-data tables.
    original: Datasets,
    log: String,
    figures: Vec<PathBuf>,
    tables: Vec<PathBuf>,
    plots_dir: PathBuf,
    plotter: Plotter,
    preview_rows: usize,
    started_at: DateTime<Local>,
}

impl AgentSession {
    pub fn new(datasets: Datasets, plots_dir: impl Into<PathBuf>, plotter: Plotter) -> Self {
        Self {
            original: datasets.clone(),
            datasets,
            log: String::new(),
            figures: Vec::new(),
            tables: Vec::new(),
            plots_dir: plots_dir.into(),
            plotter,
            preview_rows: 5,
            started_at: Local::now(),
        }
    }

    pub fn with_preview_rows(mut self, rows: usize) -> Self {
        self.preview_rows = rows.max(1);
        self
    }

    pub fn preview_rows(&self) -> usize {
        self.preview_rows
    }

    pub fn plots_dir(&self) -> &Path {
        &self.plots_dir
    }

    pub fn plotter(&self) -> &Plotter {
        &self.plotter
    }

    pub fn append_log(&mut self, text: &str) {
        self.log.push_str(text);
        self.log.push('\n');
    }

    /// Everything `write_log` recorded, in call order.
    pub fn log(&self) -> &str {
        &self.log
    }

    /// The log with a timestamped header, as handed to the report writer.
    pub fn log_report(&self) -> String {
        format!(
            "Data processing log (started {})\n{}",
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            self.log
        )
    }

    /// Remember a saved figure. Re-rendering the same file keeps its first position.
    pub fn record_figure(&mut self, path: PathBuf) {
        if !self.figures.contains(&path) {
            self.figures.push(path);
        }
    }

    pub fn figures(&self) -> &[PathBuf] {
        &self.figures
    }

    pub fn tables(&self) -> &[PathBuf] {
        &self.tables
    }

    /// Render one table image per dataset, as uploaded, into the plots directory.
    pub fn write_tables(&mut self) -> anyhow::Result<&[PathBuf]> {
        self.tables.clear();
        for dataset in self.original.iter() {
            self.tables
                .push(write_table(dataset, &self.plotter, &self.plots_dir)?);
        }
        Ok(&self.tables)
    }

    /// Persist the working datasets as `dir/<name>.csv`.
    pub fn save_datasets(&self, dir: &Path) -> Result<Vec<PathBuf>, DataError> {
        self.datasets.save_all(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::expr;
    use crate::data::table::cell_texts;
    use crate::data::Dataset;

    fn session(dir: &Path) -> AgentSession {
        let mut sets = Datasets::new();
        sets.insert(Dataset::from_numbers(
            "d",
            &[("x", &[1.0, 2.0, 3.0]), ("y", &[2.0, 4.0, 6.0])],
        ));
        AgentSession::new(sets, dir.join("plots"), Plotter::bundled().expect("bundled font"))
    }

    #[test]
    fn saved_datasets_reload_with_derived_columns() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut session = session(temp.path());
        expr::execute("z = x + y", &mut session.datasets).unwrap();

        let paths = session.save_datasets(&temp.path().join("processed")).unwrap();
        assert_eq!(paths, vec![temp.path().join("processed/d.csv")]);

        let reloaded = Dataset::load_csv(&paths[0]).unwrap();
        assert_eq!(reloaded.numbers("z").unwrap(), vec![3.0, 6.0, 9.0]);
        assert_eq!(&reloaded, session.datasets.get("d").unwrap());
    }

    #[test]
    fn tables_show_uploaded_data() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut session = session(temp.path());
        expr::execute("z = x + y", &mut session.datasets).unwrap();

        let tables = session.write_tables().unwrap().to_vec();
        assert_eq!(tables, vec![temp.path().join("plots/table_d.png")]);
        assert!(tables[0].exists());
        assert_eq!(session.tables(), tables.as_slice());
        // Derived columns stay out of the raw-data table.
        assert_eq!(cell_texts(session.original.get("d").unwrap())[0], vec!["x", "y"]);
    }

    #[test]
    fn log_accumulates_lines_under_header() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut session = session(temp.path());
        session.append_log("k = 2.0 N/m");
        session.append_log("Figure: fit.png");
        assert_eq!(session.log(), "k = 2.0 N/m\nFigure: fit.png\n");
        assert!(session.log_report().starts_with("Data processing log (started "));
        assert!(session.log_report().ends_with("Figure: fit.png\n"));
    }
}
