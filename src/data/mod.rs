//! In-memory tabular datasets loaded from uploaded CSV files.
//!
//! A dataset is an ordered list of named columns of equal length. Cells keep
//! whatever the CSV held: numbers, free text, or nothing. Arithmetic treats
//! empty cells as missing values and rejects text.

pub mod expr;
pub mod fit;
pub mod plot;
pub mod table;

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::workspace::file_stem;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("Failed to read CSV {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unknown dataset '{name}'. Available datasets: {}", .known.join(", "))]
    UnknownDataset { name: String, known: Vec<String> },

    #[error("Dataset '{dataset}' has no column '{column}'. Columns: {}", .known.join(", "))]
    UnknownColumn {
        dataset: String,
        column: String,
        known: Vec<String>,
    },

    #[error("Column '{column}' needs {expected} rows to fit dataset '{dataset}', got {got}")]
    RowCount {
        dataset: String,
        column: String,
        expected: usize,
        got: usize,
    },

    #[error("Dataset '{dataset}' column '{column}' row {row} is not a number: '{value}'")]
    NonNumeric {
        dataset: String,
        column: String,
        row: usize,
        value: String,
    },
}

/// One CSV cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Text(String),
    Empty,
}

impl Cell {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cell::Empty;
        }
        match trimmed.parse::<f64>() {
            Ok(v) => Cell::Number(v),
            Err(_) => Cell::Text(trimmed.to_string()),
        }
    }

    /// Missing numbers are stored as empty cells.
    pub fn from_number(v: f64) -> Self {
        if v.is_nan() {
            Cell::Empty
        } else {
            Cell::Number(v)
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Number(v) => write!(f, "{}", v),
            Cell::Text(s) => f.write_str(s),
            Cell::Empty => Ok(()),
        }
    }
}

/// Short human-readable rendering for observations and tables.
pub fn format_number(v: f64) -> String {
    if v.is_nan() {
        return "NaN".to_string();
    }
    if v != 0.0 && (v.abs() < 1e-4 || v.abs() >= 1e9) {
        return format!("{:.4e}", v);
    }
    let fixed = format!("{:.6}", v);
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub name: String,
    columns: Vec<Column>,
}

impl Dataset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Build from numeric columns; test and fixture convenience.
    pub fn from_numbers(name: impl Into<String>, columns: &[(&str, &[f64])]) -> Self {
        Self {
            name: name.into(),
            columns: columns
                .iter()
                .map(|(col, values)| Column {
                    name: col.to_string(),
                    values: values.iter().map(|v| Cell::Number(*v)).collect(),
                })
                .collect(),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map(|c| c.values.len()).unwrap_or(0)
    }

    pub fn column(&self, name: &str) -> Result<&Column, DataError> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| DataError::UnknownColumn {
                dataset: self.name.clone(),
                column: name.to_string(),
                known: self.column_names(),
            })
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Numeric view of a column: empty cells become NaN, text is an error.
    pub fn numbers(&self, column: &str) -> Result<Vec<f64>, DataError> {
        let col = self.column(column)?;
        col.values
            .iter()
            .enumerate()
            .map(|(i, cell)| match cell {
                Cell::Number(v) => Ok(*v),
                Cell::Empty => Ok(f64::NAN),
                Cell::Text(t) => Err(DataError::NonNumeric {
                    dataset: self.name.clone(),
                    column: column.to_string(),
                    row: i + 1,
                    value: t.clone(),
                }),
            })
            .collect()
    }

    /// Replace or append a column. Its length must match the existing rows.
    pub fn set_column(&mut self, name: &str, values: Vec<Cell>) -> Result<(), DataError> {
        if !self.columns.is_empty() && values.len() != self.row_count() {
            return Err(DataError::RowCount {
                dataset: self.name.clone(),
                column: name.to_string(),
                expected: self.row_count(),
                got: values.len(),
            });
        }
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(col) => col.values = values,
            None => self.columns.push(Column {
                name: name.to_string(),
                values,
            }),
        }
        Ok(())
    }

    /// Load a CSV with a header row. Short rows are padded with empty cells.
    pub fn load_csv(path: &Path) -> Result<Self, DataError> {
        let csv_err = |source| DataError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(csv_err)?;

        let mut columns: Vec<Column> = reader
            .headers()
            .map_err(csv_err)?
            .iter()
            .enumerate()
            .map(|(i, h)| Column {
                name: if h.is_empty() {
                    format!("column{}", i + 1)
                } else {
                    h.trim_start_matches('\u{feff}').to_string()
                },
                values: Vec::new(),
            })
            .collect();

        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            if record.iter().all(|f| f.trim().is_empty()) {
                continue;
            }
            for (i, col) in columns.iter_mut().enumerate() {
                col.values
                    .push(record.get(i).map(Cell::parse).unwrap_or(Cell::Empty));
            }
        }

        Ok(Self {
            name: file_stem(path),
            columns,
        })
    }

    pub fn save_csv(&self, path: &Path) -> Result<(), DataError> {
        let csv_err = |source| DataError::Csv {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| DataError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
        writer
            .write_record(self.columns.iter().map(|c| c.name.as_str()))
            .map_err(csv_err)?;
        for row in 0..self.row_count() {
            writer
                .write_record(self.columns.iter().map(|c| c.values[row].to_string()))
                .map_err(csv_err)?;
        }
        writer.flush().map_err(|source| DataError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Header, the first `rows` rows and the row count, tab separated.
    pub fn preview(&self, rows: usize) -> String {
        let mut out = format!(
            "Dataset '{}' ({} rows, {} columns)\n",
            self.name,
            self.row_count(),
            self.columns.len()
        );
        out.push_str(&self.column_names().join("\t"));
        out.push('\n');
        for row in 0..self.row_count().min(rows) {
            let cells: Vec<String> = self
                .columns
                .iter()
                .map(|c| match &c.values[row] {
                    Cell::Number(v) => format_number(*v),
                    other => other.to_string(),
                })
                .collect();
            out.push_str(&cells.join("\t"));
            out.push('\n');
        }
        if self.row_count() > rows {
            out.push_str(&format!("... {} more rows\n", self.row_count() - rows));
        }
        out
    }
}

/// Datasets of one run, in upload order, keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Datasets {
    items: Vec<Dataset>,
}

impl Datasets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every CSV; each dataset is named after its file stem.
    pub fn load(paths: &[PathBuf]) -> Result<Self, DataError> {
        let mut datasets = Self::new();
        for path in paths {
            let dataset = Dataset::load_csv(path)?;
            tracing::debug!(
                "Loaded dataset '{}' ({} rows) from {}",
                dataset.name,
                dataset.row_count(),
                path.display()
            );
            datasets.insert(dataset);
        }
        Ok(datasets)
    }

    /// Add a dataset, replacing one with the same name in place.
    pub fn insert(&mut self, dataset: Dataset) {
        match self.items.iter_mut().find(|d| d.name == dataset.name) {
            Some(existing) => *existing = dataset,
            None => self.items.push(dataset),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.items.iter().map(|d| d.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dataset> {
        self.items.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.iter().any(|d| d.name == name)
    }

    pub fn get(&self, name: &str) -> Result<&Dataset, DataError> {
        self.items
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| self.unknown(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Dataset, DataError> {
        let err = self.unknown(name);
        self.items.iter_mut().find(|d| d.name == name).ok_or(err)
    }

    fn unknown(&self, name: &str) -> DataError {
        DataError::UnknownDataset {
            name: name.to_string(),
            known: self.names(),
        }
    }

    /// Write each dataset to `dir/<name>.csv`.
    pub fn save_all(&self, dir: &Path) -> Result<Vec<PathBuf>, DataError> {
        self.items
            .iter()
            .map(|d| {
                let path = dir.join(format!("{}.csv", d.name));
                d.save_csv(&path).map(|_| path)
            })
            .collect()
    }
}
